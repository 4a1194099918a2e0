// 🗄️ Storage - one canonical SQLite database for realtors, buyers and invites
// Every mutation also appends to the events table (audit trail)

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Open (or create) the portal database at `path` and make sure the schema exists.
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    setup_database(&conn)?;
    debug!(path = %path.display(), "database ready");
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    // (in-memory databases answer "memory" and stay that way)
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Realtors
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS realtors (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Invite codes (the single source of truth for every invite)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS invite_codes (
            code TEXT PRIMARY KEY,
            owner_realtor_id TEXT NOT NULL REFERENCES realtors(id),
            recipient_email TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending', 'used')),
            created_at TEXT NOT NULL,
            used_at TEXT,
            used_by_buyer_id TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Buyers
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS buyers (
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL,
            invite_code TEXT NOT NULL,
            realtor_id TEXT NOT NULL REFERENCES realtors(id),
            current_step INTEGER NOT NULL DEFAULT 1,
            completed_steps TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Assistant chat history
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS chat_threads (
            buyer_id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chat_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            upstream_id TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_invites_owner ON invite_codes(owner_realtor_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_buyers_realtor ON buyers(realtor_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_chat_thread ON chat_messages(thread_id)",
        [],
    )?;

    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_chat_upstream ON chat_messages(thread_id, upstream_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Record an event, logging (not failing) when the audit write itself fails.
pub fn record_event(conn: &Connection, event: Event) {
    if let Err(e) = insert_event(conn, &event) {
        tracing::warn!(event_type = %event.event_type, error = %e, "failed to write audit event");
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let timestamp_str: String = row.get(1)?;
    let data_json: String = row.get(5)?;

    Ok(Event {
        event_id: row.get(0)?,
        timestamp: parse_timestamp(&timestamp_str, 1)?,
        event_type: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        data: serde_json::from_str(&data_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?,
        actor: row.get(6)?,
    })
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Most recent events across all entities (activity feed)
pub fn recent_events(conn: &Connection, limit: usize) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         ORDER BY timestamp DESC, id DESC
         LIMIT ?1",
    )?;

    let events = stmt
        .query_map(params![limit as i64], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Newest events touching one realtor: the realtor record, invites it owns
/// (invite events carry `realtor_id` in their data) and its buyers
pub fn events_for_realtor(conn: &Connection, realtor_id: &str, limit: usize) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE (entity_type = 'realtor' AND entity_id = ?1)
            OR (entity_type = 'invite' AND json_extract(data, '$.realtor_id') = ?1)
            OR (entity_type = 'buyer'
                AND entity_id IN (SELECT id FROM buyers WHERE realtor_id = ?1))
         ORDER BY timestamp DESC, id DESC
         LIMIT ?2",
    )?;

    let events = stmt
        .query_map(params![realtor_id, limit as i64], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Whether an event of this type already exists for the entity
pub fn has_event(conn: &Connection, event_type: &str, entity_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM events WHERE event_type = ?1 AND entity_id = ?2",
        params![event_type, entity_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Parse an RFC 3339 column value, reporting the column on failure
pub(crate) fn parse_timestamp(value: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
    column: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|s| parse_timestamp(&s, column)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('realtors', 'buyers', 'invite_codes', 'events', 'chat_threads', 'chat_messages')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 6);
    }

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let event = Event::new(
            "test_event",
            "invite",
            "ABCD1234",
            serde_json::json!({"test": "data"}),
            "test_actor",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "invite", "ABCD1234").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "test_event");
        assert_eq!(events[0].actor, "test_actor");
        assert_eq!(events[0].data["test"], "data");

        assert!(has_event(&conn, "test_event", "ABCD1234").unwrap());
        assert!(!has_event(&conn, "other_event", "ABCD1234").unwrap());
    }

    #[test]
    fn test_recent_events_limit() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        for i in 0..5 {
            record_event(
                &conn,
                Event::new("tick", "test", &i.to_string(), serde_json::json!({}), "test"),
            );
        }

        let events = recent_events(&conn, 3).unwrap();
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_open_database_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portal.db");

        {
            let conn = open_database(&path).unwrap();
            record_event(&conn, Event::new("created", "test", "1", serde_json::json!({}), "test"));
        }

        let conn = open_database(&path).unwrap();
        assert_eq!(get_events_for_entity(&conn, "test", "1").unwrap().len(), 1);
    }

    #[test]
    fn test_events_for_realtor_excludes_other_realtors() {
        use crate::entities::create_realtor;
        use crate::invites::{InvitePolicy, InviteRegistry};
        use crate::signup::{sign_up_buyer, SignupRequest};

        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let pat = create_realtor(&conn, "Pat Agent", "pat@agency.com").unwrap();
        let sam = create_realtor(&conn, "Sam Broker", "sam@brokers.com").unwrap();

        let registry = InviteRegistry::new(&conn);
        let pat_code = registry.create_invite_code("jane@example.com", &pat.id).unwrap().code;
        let pat_revoked = registry.create_invite_code("kim@example.com", &pat.id).unwrap().code;
        let sam_code = registry.create_invite_code("lee@example.com", &sam.id).unwrap().code;
        assert!(registry.revoke(&pat_revoked).unwrap());

        let request = SignupRequest {
            first_name: "Lee".to_string(),
            last_name: "Buyer".to_string(),
            email: "lee@example.com".to_string(),
            invite_code: sam_code.clone(),
        };
        let sam_buyer = sign_up_buyer(&mut conn, &InvitePolicy::default(), &request).unwrap();

        let events = events_for_realtor(&conn, &pat.id, 100).unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(events.len(), 4);
        assert!(kinds.contains(&"realtor_created"));
        assert!(kinds.contains(&"invite_revoked"));
        assert!(events.iter().any(|e| e.entity_id == pat_code));
        assert!(events.iter().all(|e| e.entity_id != sam_code && e.entity_id != sam.id));

        let events = events_for_realtor(&conn, &sam.id, 100).unwrap();
        assert!(events.iter().any(|e| e.event_type == "invite_used" && e.entity_id == sam_code));
        assert!(events.iter().any(|e| e.event_type == "buyer_signed_up" && e.entity_id == sam_buyer.id));
        assert!(events.iter().all(|e| e.entity_id != pat_code && e.entity_id != pat.id));

        assert_eq!(events_for_realtor(&conn, &pat.id, 2).unwrap().len(), 2);
    }
}
