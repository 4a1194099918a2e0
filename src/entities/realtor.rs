// 🏢 Realtor Entity - the professional user who issues invites
//
// A realtor's buyer list and pending invites are NOT stored on the realtor.
// They are derived from the buyers and invite_codes tables on read, so there
// is exactly one place where an invite lives.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{parse_timestamp, record_event, Event};
use crate::entities::buyer::{buyers_for_realtor, BuyerAccount};
use crate::invites::{pending_invites_for_realtor, InviteCode};
use crate::schema::{describe, normalize_email, validate_realtor};

// ============================================================================
// REALTOR ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtorAccount {
    /// Stable identity (UUID)
    pub id: String,

    pub name: String,

    /// Stored lowercase
    pub email: String,

    pub created_at: DateTime<Utc>,
}

impl RealtorAccount {
    pub fn new(name: String, email: String) -> Self {
        RealtorAccount {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            email: normalize_email(&email),
            created_at: Utc::now(),
        }
    }
}

/// Derived view of everything a realtor manages
#[derive(Debug, Clone, Serialize)]
pub struct RealtorRoster {
    pub realtor: RealtorAccount,
    pub buyers: Vec<BuyerAccount>,
    pub pending_invites: Vec<InviteCode>,
}

// ============================================================================
// REPOSITORY
// ============================================================================

fn row_to_realtor(row: &rusqlite::Row<'_>) -> rusqlite::Result<RealtorAccount> {
    let created_at: String = row.get(3)?;
    Ok(RealtorAccount {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        created_at: parse_timestamp(&created_at, 3)?,
    })
}

/// Validate and persist a realtor record
pub fn insert_realtor(conn: &Connection, realtor: &RealtorAccount) -> Result<()> {
    validate_realtor(realtor).map_err(|errors| anyhow!(describe(&errors)))?;

    conn.execute(
        "INSERT INTO realtors (id, name, email, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            realtor.id,
            realtor.name,
            realtor.email,
            realtor.created_at.to_rfc3339(),
        ],
    )?;

    Ok(())
}

/// Register a new realtor; emails are unique
pub fn create_realtor(conn: &Connection, name: &str, email: &str) -> Result<RealtorAccount> {
    if find_realtor_by_email(conn, email)?.is_some() {
        bail!("A realtor with email {} already exists", normalize_email(email));
    }

    let realtor = RealtorAccount::new(name.to_string(), email.to_string());
    insert_realtor(conn, &realtor)?;

    record_event(
        conn,
        Event::new(
            "realtor_created",
            "realtor",
            &realtor.id,
            serde_json::json!({ "email": realtor.email }),
            "portal",
        ),
    );
    info!(realtor_id = %realtor.id, "realtor registered");

    Ok(realtor)
}

pub fn get_realtor(conn: &Connection, id: &str) -> Result<Option<RealtorAccount>> {
    let realtor = conn
        .query_row(
            "SELECT id, name, email, created_at FROM realtors WHERE id = ?1",
            params![id],
            row_to_realtor,
        )
        .optional()?;
    Ok(realtor)
}

pub fn find_realtor_by_email(conn: &Connection, email: &str) -> Result<Option<RealtorAccount>> {
    let realtor = conn
        .query_row(
            "SELECT id, name, email, created_at FROM realtors WHERE email = ?1",
            params![normalize_email(email)],
            row_to_realtor,
        )
        .optional()?;
    Ok(realtor)
}

pub fn all_realtors(conn: &Connection) -> Result<Vec<RealtorAccount>> {
    let mut stmt =
        conn.prepare("SELECT id, name, email, created_at FROM realtors ORDER BY name, email")?;

    let realtors = stmt
        .query_map([], row_to_realtor)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(realtors)
}

/// Realtor plus the buyers and pending invites that point at them
pub fn realtor_roster(conn: &Connection, realtor_id: &str) -> Result<RealtorRoster> {
    let realtor = get_realtor(conn, realtor_id)?
        .ok_or_else(|| anyhow!("Realtor not found: {}", realtor_id))?;

    Ok(RealtorRoster {
        buyers: buyers_for_realtor(conn, realtor_id)?,
        pending_invites: pending_invites_for_realtor(conn, realtor_id)?,
        realtor,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_events_for_entity, setup_database};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_realtor_creation_normalizes() {
        let realtor = RealtorAccount::new("  Pat Agent ".to_string(), " Pat@Agency.com".to_string());

        assert!(!realtor.id.is_empty());
        assert_eq!(realtor.name, "Pat Agent");
        assert_eq!(realtor.email, "pat@agency.com");
    }

    #[test]
    fn test_create_and_find_realtor() {
        let conn = test_conn();
        let realtor = create_realtor(&conn, "Pat Agent", "pat@agency.com").unwrap();

        let by_id = get_realtor(&conn, &realtor.id).unwrap().unwrap();
        assert_eq!(by_id, realtor);

        let by_email = find_realtor_by_email(&conn, "PAT@agency.com").unwrap().unwrap();
        assert_eq!(by_email.id, realtor.id);

        assert!(get_realtor(&conn, "missing").unwrap().is_none());
        assert_eq!(get_events_for_entity(&conn, "realtor", &realtor.id).unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_realtor_email_rejected() {
        let conn = test_conn();
        create_realtor(&conn, "Pat Agent", "pat@agency.com").unwrap();

        let err = create_realtor(&conn, "Other", "Pat@Agency.com").unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(all_realtors(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_realtor_rejected() {
        let conn = test_conn();
        assert!(create_realtor(&conn, "", "pat@agency.com").is_err());
        assert!(create_realtor(&conn, "Pat", "pat").is_err());
        assert!(all_realtors(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_roster_for_unknown_realtor() {
        let conn = test_conn();
        assert!(realtor_roster(&conn, "nope").is_err());
    }
}
