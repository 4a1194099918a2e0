// 🏠 Buyer Entity - client progressing through the guided purchase workflow
//
// current_step only ever moves forward. Completing a step records it and
// moves current_step to the lowest step that is still open.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

use crate::db::{parse_timestamp, record_event, Event};
use crate::schema::{describe, normalize_email, validate_buyer};

pub const TOTAL_STEPS: u8 = 9;

// ============================================================================
// GUIDED STEPS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BuyerStep {
    PreApproval = 1,
    FindRealtor = 2,
    SearchHomes = 3,
    MakeOffer = 4,
    HomeInspection = 5,
    Appraisal = 6,
    SecureFinancing = 7,
    FinalWalkthrough = 8,
    Closing = 9,
}

impl BuyerStep {
    pub const ALL: [BuyerStep; 9] = [
        BuyerStep::PreApproval,
        BuyerStep::FindRealtor,
        BuyerStep::SearchHomes,
        BuyerStep::MakeOffer,
        BuyerStep::HomeInspection,
        BuyerStep::Appraisal,
        BuyerStep::SecureFinancing,
        BuyerStep::FinalWalkthrough,
        BuyerStep::Closing,
    ];

    pub fn from_number(n: u8) -> Option<BuyerStep> {
        BuyerStep::ALL.get((n as usize).checked_sub(1)?).copied()
    }

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn title(self) -> &'static str {
        match self {
            BuyerStep::PreApproval => "Get Pre-Approved",
            BuyerStep::FindRealtor => "Find a Realtor",
            BuyerStep::SearchHomes => "Search for Homes",
            BuyerStep::MakeOffer => "Make an Offer",
            BuyerStep::HomeInspection => "Home Inspection",
            BuyerStep::Appraisal => "Appraisal",
            BuyerStep::SecureFinancing => "Secure Financing",
            BuyerStep::FinalWalkthrough => "Final Walkthrough",
            BuyerStep::Closing => "Closing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Realtor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Realtor => "realtor",
        }
    }
}

// ============================================================================
// BUYER ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyerAccount {
    /// Stable identity (UUID)
    pub id: String,

    pub first_name: String,
    pub last_name: String,

    /// Stored lowercase, unique across buyers
    pub email: String,

    pub role: Role,

    /// Code the buyer signed up with
    pub invite_code: String,

    /// Realtor that issued the code
    pub realtor_id: String,

    /// 1..=9
    pub current_step: u8,

    pub completed_steps: BTreeSet<u8>,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuyerProgress {
    pub completed: usize,
    pub total: u8,
    pub percent: u8,
    pub current_step: u8,
    pub current_title: &'static str,
}

impl BuyerAccount {
    pub fn new(
        first_name: String,
        last_name: String,
        email: String,
        invite_code: String,
        realtor_id: String,
    ) -> Self {
        BuyerAccount {
            id: uuid::Uuid::new_v4().to_string(),
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            email: normalize_email(&email),
            role: Role::Buyer,
            invite_code,
            realtor_id,
            current_step: 1,
            completed_steps: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Mark a step complete. Returns false if it was already complete.
    pub fn complete_step(&mut self, step: BuyerStep) -> bool {
        if !self.completed_steps.insert(step.number()) {
            return false;
        }

        let next_open = (1..=TOTAL_STEPS)
            .find(|s| !self.completed_steps.contains(s))
            .unwrap_or(TOTAL_STEPS);
        self.current_step = self.current_step.max(next_open);
        true
    }

    pub fn is_step_complete(&self, step: BuyerStep) -> bool {
        self.completed_steps.contains(&step.number())
    }

    pub fn is_finished(&self) -> bool {
        self.completed_steps.len() == TOTAL_STEPS as usize
    }

    pub fn progress(&self) -> BuyerProgress {
        let completed = self.completed_steps.len();
        BuyerProgress {
            completed,
            total: TOTAL_STEPS,
            percent: ((completed * 100) / TOTAL_STEPS as usize) as u8,
            current_step: self.current_step,
            current_title: BuyerStep::from_number(self.current_step)
                .map(BuyerStep::title)
                .unwrap_or("Unknown"),
        }
    }
}

// ============================================================================
// REPOSITORY
// ============================================================================

const BUYER_COLUMNS: &str = "id, first_name, last_name, email, invite_code, realtor_id,
                             current_step, completed_steps, created_at";

fn row_to_buyer(row: &rusqlite::Row<'_>) -> rusqlite::Result<BuyerAccount> {
    let completed_json: String = row.get(7)?;
    let created_at: String = row.get(8)?;

    let completed_steps: BTreeSet<u8> = serde_json::from_str(&completed_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(BuyerAccount {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        role: Role::Buyer,
        invite_code: row.get(4)?,
        realtor_id: row.get(5)?,
        current_step: row.get(6)?,
        completed_steps,
        created_at: parse_timestamp(&created_at, 8)?,
    })
}

/// Validate and persist a buyer record
pub fn insert_buyer(conn: &Connection, buyer: &BuyerAccount) -> Result<()> {
    validate_buyer(buyer).map_err(|errors| anyhow!(describe(&errors)))?;

    let completed_json = serde_json::to_string(&buyer.completed_steps)?;

    conn.execute(
        "INSERT INTO buyers (
            id, first_name, last_name, email, invite_code, realtor_id,
            current_step, completed_steps, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            buyer.id,
            buyer.first_name,
            buyer.last_name,
            buyer.email,
            buyer.invite_code,
            buyer.realtor_id,
            buyer.current_step,
            completed_json,
            buyer.created_at.to_rfc3339(),
        ],
    )?;

    Ok(())
}

pub fn get_buyer(conn: &Connection, id: &str) -> Result<Option<BuyerAccount>> {
    let buyer = conn
        .query_row(
            &format!("SELECT {} FROM buyers WHERE id = ?1", BUYER_COLUMNS),
            params![id],
            row_to_buyer,
        )
        .optional()?;
    Ok(buyer)
}

pub fn find_buyer_by_email(conn: &Connection, email: &str) -> Result<Option<BuyerAccount>> {
    let buyer = conn
        .query_row(
            &format!("SELECT {} FROM buyers WHERE email = ?1", BUYER_COLUMNS),
            params![normalize_email(email)],
            row_to_buyer,
        )
        .optional()?;
    Ok(buyer)
}

pub fn buyers_for_realtor(conn: &Connection, realtor_id: &str) -> Result<Vec<BuyerAccount>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM buyers WHERE realtor_id = ?1 ORDER BY last_name, first_name",
        BUYER_COLUMNS
    ))?;

    let buyers = stmt
        .query_map(params![realtor_id], row_to_buyer)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(buyers)
}

pub fn all_buyers(conn: &Connection) -> Result<Vec<BuyerAccount>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM buyers ORDER BY last_name, first_name",
        BUYER_COLUMNS
    ))?;

    let buyers = stmt
        .query_map([], row_to_buyer)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(buyers)
}

/// Complete a guided step for a stored buyer and persist the new progress
pub fn complete_buyer_step(
    conn: &Connection,
    buyer_id: &str,
    step: BuyerStep,
) -> Result<BuyerAccount> {
    let mut buyer =
        get_buyer(conn, buyer_id)?.ok_or_else(|| anyhow!("Buyer not found: {}", buyer_id))?;

    if !buyer.complete_step(step) {
        return Ok(buyer);
    }

    conn.execute(
        "UPDATE buyers SET current_step = ?1, completed_steps = ?2 WHERE id = ?3",
        params![
            buyer.current_step,
            serde_json::to_string(&buyer.completed_steps)?,
            buyer.id,
        ],
    )?;

    record_event(
        conn,
        Event::new(
            "step_completed",
            "buyer",
            &buyer.id,
            serde_json::json!({
                "step": step.number(),
                "title": step.title(),
                "current_step": buyer.current_step,
            }),
            &buyer.email,
        ),
    );
    info!(buyer_id = %buyer.id, step = step.number(), "buyer step completed");

    Ok(buyer)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_events_for_entity, setup_database};
    use crate::entities::realtor::create_realtor;

    fn test_buyer(realtor_id: &str) -> BuyerAccount {
        BuyerAccount::new(
            "Jane".to_string(),
            "Doe".to_string(),
            "Jane@Example.com".to_string(),
            "ABCD1234".to_string(),
            realtor_id.to_string(),
        )
    }

    #[test]
    fn test_step_numbers_round_trip() {
        for step in BuyerStep::ALL {
            assert_eq!(BuyerStep::from_number(step.number()), Some(step));
        }
        assert_eq!(BuyerStep::from_number(0), None);
        assert_eq!(BuyerStep::from_number(10), None);
        assert_eq!(BuyerStep::Closing.title(), "Closing");
    }

    #[test]
    fn test_new_buyer_defaults() {
        let buyer = test_buyer("r1");
        assert_eq!(buyer.email, "jane@example.com");
        assert_eq!(buyer.role, Role::Buyer);
        assert_eq!(buyer.current_step, 1);
        assert!(buyer.completed_steps.is_empty());
        assert_eq!(buyer.full_name(), "Jane Doe");
    }

    #[test]
    fn test_current_step_is_monotonic() {
        let mut buyer = test_buyer("r1");

        // Completing ahead does not move past the open step 1
        assert!(buyer.complete_step(BuyerStep::SearchHomes));
        assert_eq!(buyer.current_step, 1);

        assert!(buyer.complete_step(BuyerStep::PreApproval));
        assert_eq!(buyer.current_step, 2);

        // Step 3 already done, so we jump to 4
        assert!(buyer.complete_step(BuyerStep::FindRealtor));
        assert_eq!(buyer.current_step, 4);

        // Repeating a step is a no-op
        assert!(!buyer.complete_step(BuyerStep::FindRealtor));
        assert_eq!(buyer.current_step, 4);
    }

    #[test]
    fn test_finishing_all_steps() {
        let mut buyer = test_buyer("r1");
        for step in BuyerStep::ALL.iter().rev() {
            buyer.complete_step(*step);
        }

        assert!(buyer.is_finished());
        assert_eq!(buyer.current_step, TOTAL_STEPS);

        let progress = buyer.progress();
        assert_eq!(progress.completed, 9);
        assert_eq!(progress.percent, 100);
        assert_eq!(progress.current_title, "Closing");
    }

    #[test]
    fn test_progress_percent() {
        let mut buyer = test_buyer("r1");
        buyer.complete_step(BuyerStep::PreApproval);
        buyer.complete_step(BuyerStep::FindRealtor);
        buyer.complete_step(BuyerStep::SearchHomes);

        let progress = buyer.progress();
        assert_eq!(progress.completed, 3);
        assert_eq!(progress.percent, 33);
        assert_eq!(progress.current_title, "Make an Offer");
    }

    #[test]
    fn test_persist_and_complete_step() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let realtor = create_realtor(&conn, "Pat", "pat@agency.com").unwrap();

        let buyer = test_buyer(&realtor.id);
        insert_buyer(&conn, &buyer).unwrap();

        let loaded = find_buyer_by_email(&conn, "JANE@example.com").unwrap().unwrap();
        assert_eq!(loaded, buyer);

        let updated = complete_buyer_step(&conn, &buyer.id, BuyerStep::PreApproval).unwrap();
        assert_eq!(updated.current_step, 2);

        let reloaded = get_buyer(&conn, &buyer.id).unwrap().unwrap();
        assert_eq!(reloaded.current_step, 2);
        assert!(reloaded.is_step_complete(BuyerStep::PreApproval));

        // Second completion does not log another event
        complete_buyer_step(&conn, &buyer.id, BuyerStep::PreApproval).unwrap();
        assert_eq!(get_events_for_entity(&conn, "buyer", &buyer.id).unwrap().len(), 1);

        assert_eq!(buyers_for_realtor(&conn, &realtor.id).unwrap().len(), 1);
        assert_eq!(all_buyers(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_complete_step_unknown_buyer() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let err = complete_buyer_step(&conn, "missing", BuyerStep::Closing).unwrap_err();
        assert!(err.to_string().contains("Buyer not found"));
    }
}
