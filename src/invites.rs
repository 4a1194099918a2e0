// 🎟️ Invite Registry - issue, validate and consume realtor invite codes
//
// One table (invite_codes) is the only place an invite lives. A realtor's
// "pending invites" are a query over it, not a second copy.
//
// Lookup order for validate:
//   1. invite_codes (pending only counts as valid)
//   2. configured test-code allow-list

use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::db::{parse_optional_timestamp, parse_timestamp, record_event, Event};
use crate::entities::get_realtor;
use crate::schema::{describe, normalize_email, validate_email, validate_invite};

pub const CODE_LENGTH: usize = 8;
pub const CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Re-draws allowed when a fresh code collides with an existing one
const MAX_GENERATION_ATTEMPTS: usize = 16;

// ============================================================================
// INVITE CODE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Used,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Used => "used",
        }
    }

    pub fn parse(value: &str) -> Option<InviteStatus> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Some(InviteStatus::Pending),
            "used" => Some(InviteStatus::Used),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InviteCode {
    /// 8 chars of A-Z0-9, stored uppercase
    pub code: String,
    pub owner_realtor_id: String,
    pub recipient_email: String,
    pub status: InviteStatus,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by_buyer_id: Option<String>,
}

impl InviteCode {
    pub fn new(code: String, owner_realtor_id: String, recipient_email: String) -> Self {
        InviteCode {
            code: normalize_code(&code),
            owner_realtor_id,
            recipient_email: normalize_email(&recipient_email),
            status: InviteStatus::Pending,
            created_at: Utc::now(),
            used_at: None,
            used_by_buyer_id: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == InviteStatus::Pending
    }
}

// ============================================================================
// CODE FORMAT
// ============================================================================

/// 8 uniform draws from the 36-symbol alphabet
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Trim + uppercase, the only form codes are compared in
pub fn normalize_code(input: &str) -> String {
    input.trim().to_uppercase()
}

pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Registry,
    TestCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    Malformed,
    NotFound,
    AlreadyUsed,
    StorageError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InviteValidation {
    pub valid: bool,
    /// Normalized form of the submitted code
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<MatchSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<InvalidReason>,
}

impl InviteValidation {
    fn valid(code: String, realtor_id: Option<String>, source: MatchSource) -> Self {
        InviteValidation {
            valid: true,
            code,
            realtor_id,
            source: Some(source),
            reason: None,
        }
    }

    fn invalid(code: String, reason: InvalidReason) -> Self {
        InviteValidation {
            valid: false,
            code,
            realtor_id: None,
            source: None,
            reason: Some(reason),
        }
    }
}

// ============================================================================
// STORAGE
// ============================================================================

const INVITE_COLUMNS: &str =
    "code, owner_realtor_id, recipient_email, status, created_at, used_at, used_by_buyer_id";

fn row_to_invite(row: &rusqlite::Row<'_>) -> rusqlite::Result<InviteCode> {
    let status_str: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let used_at: Option<String> = row.get(5)?;

    let status = InviteStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown invite status {:?}", status_str).into(),
        )
    })?;

    Ok(InviteCode {
        code: row.get(0)?,
        owner_realtor_id: row.get(1)?,
        recipient_email: row.get(2)?,
        status,
        created_at: parse_timestamp(&created_at, 4)?,
        used_at: parse_optional_timestamp(used_at, 5)?,
        used_by_buyer_id: row.get(6)?,
    })
}

/// Validate and persist an invite record
pub fn insert_invite(conn: &Connection, invite: &InviteCode) -> Result<()> {
    validate_invite(invite).map_err(|errors| anyhow!(describe(&errors)))?;

    conn.execute(
        "INSERT INTO invite_codes (
            code, owner_realtor_id, recipient_email, status, created_at, used_at, used_by_buyer_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            invite.code,
            invite.owner_realtor_id,
            invite.recipient_email,
            invite.status.as_str(),
            invite.created_at.to_rfc3339(),
            invite.used_at.map(|dt| dt.to_rfc3339()),
            invite.used_by_buyer_id,
        ],
    )?;

    Ok(())
}

pub fn get_invite(conn: &Connection, code: &str) -> Result<Option<InviteCode>> {
    let invite = conn
        .query_row(
            &format!("SELECT {} FROM invite_codes WHERE code = ?1", INVITE_COLUMNS),
            params![normalize_code(code)],
            row_to_invite,
        )
        .optional()?;
    Ok(invite)
}

pub fn code_exists(conn: &Connection, code: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM invite_codes WHERE code = ?1",
        params![normalize_code(code)],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn pending_invites_for_realtor(conn: &Connection, realtor_id: &str) -> Result<Vec<InviteCode>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM invite_codes
         WHERE owner_realtor_id = ?1 AND status = 'pending'
         ORDER BY created_at DESC",
        INVITE_COLUMNS
    ))?;

    let invites = stmt
        .query_map(params![realtor_id], row_to_invite)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(invites)
}

pub fn all_invites(conn: &Connection) -> Result<Vec<InviteCode>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM invite_codes ORDER BY created_at DESC",
        INVITE_COLUMNS
    ))?;

    let invites = stmt
        .query_map([], row_to_invite)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(invites)
}

/// Pending -> Used, at most once. Returns false when nothing changed.
pub fn mark_invite_used(conn: &Connection, code: &str, buyer_id: Option<&str>) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE invite_codes
         SET status = 'used', used_at = ?1, used_by_buyer_id = ?2
         WHERE code = ?3 AND status = 'pending'",
        params![Utc::now().to_rfc3339(), buyer_id, normalize_code(code)],
    )?;
    Ok(changed == 1)
}

// ============================================================================
// INVITE POLICY
// ============================================================================

/// Non-stored codes that validate anyway (demo / QA accounts)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvitePolicy {
    pub test_codes: BTreeSet<String>,
    /// Realtor that test-code signups are attached to
    pub default_realtor_id: Option<String>,
}

impl InvitePolicy {
    pub fn new<I, S>(test_codes: I, default_realtor_id: Option<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        InvitePolicy {
            test_codes: test_codes
                .into_iter()
                .map(|c| normalize_code(c.as_ref()))
                .filter(|c| !c.is_empty())
                .collect(),
            default_realtor_id,
        }
    }

    pub fn is_test_code(&self, code: &str) -> bool {
        self.test_codes.contains(&normalize_code(code))
    }
}

// ============================================================================
// INVITE REGISTRY
// ============================================================================

pub struct InviteRegistry<'a> {
    conn: &'a Connection,
    policy: InvitePolicy,
}

impl<'a> InviteRegistry<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        InviteRegistry {
            conn,
            policy: InvitePolicy::default(),
        }
    }

    pub fn with_policy(conn: &'a Connection, policy: InvitePolicy) -> Self {
        InviteRegistry { conn, policy }
    }

    pub fn policy(&self) -> &InvitePolicy {
        &self.policy
    }

    /// Issue a new pending code for `email` owned by `realtor_id`
    pub fn create_invite_code(&self, email: &str, realtor_id: &str) -> Result<InviteCode> {
        self.create_invite_code_with(email, realtor_id, &mut rand::rng())
    }

    pub fn create_invite_code_with<R: Rng + ?Sized>(
        &self,
        email: &str,
        realtor_id: &str,
        rng: &mut R,
    ) -> Result<InviteCode> {
        validate_email(email).map_err(|errors| anyhow!(describe(&errors)))?;

        if get_realtor(self.conn, realtor_id)?.is_none() {
            bail!("Realtor not found: {}", realtor_id);
        }

        let code = self.unused_code(rng)?;
        let invite = InviteCode::new(code, realtor_id.to_string(), email.to_string());
        insert_invite(self.conn, &invite).context("Failed to store invite code")?;

        record_event(
            self.conn,
            Event::new(
                "invite_created",
                "invite",
                &invite.code,
                serde_json::json!({
                    "realtor_id": invite.owner_realtor_id,
                    "recipient_email": invite.recipient_email,
                }),
                realtor_id,
            ),
        );
        info!(code = %invite.code, realtor_id, "invite issued");

        Ok(invite)
    }

    fn unused_code<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<String> {
        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let candidate = generate_code(rng);
            if !code_exists(self.conn, &candidate)? && !self.policy.is_test_code(&candidate) {
                return Ok(candidate);
            }
            debug!(attempt, "generated invite code collided, drawing again");
        }
        bail!(
            "Could not generate an unused invite code after {} attempts",
            MAX_GENERATION_ATTEMPTS
        )
    }

    /// Read-only lookup. Never fails: storage problems are logged and
    /// reported as an invalid code.
    pub fn validate_invite_code(&self, code: &str) -> InviteValidation {
        let normalized = normalize_code(code);

        if is_well_formed(&normalized) {
            match get_invite(self.conn, &normalized) {
                Ok(Some(invite)) if invite.is_pending() => {
                    return InviteValidation::valid(
                        normalized,
                        Some(invite.owner_realtor_id),
                        MatchSource::Registry,
                    );
                }
                Ok(Some(_)) => {
                    return InviteValidation::invalid(normalized, InvalidReason::AlreadyUsed);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(code = %normalized, error = %e, "invite lookup failed");
                    return InviteValidation::invalid(normalized, InvalidReason::StorageError);
                }
            }
        }

        if self.policy.is_test_code(&normalized) {
            return InviteValidation::valid(
                normalized,
                self.policy.default_realtor_id.clone(),
                MatchSource::TestCode,
            );
        }

        let reason = if is_well_formed(&normalized) {
            InvalidReason::NotFound
        } else {
            InvalidReason::Malformed
        };
        InviteValidation::invalid(normalized, reason)
    }

    /// Consume a pending code. Returns false for unknown, used or test codes.
    pub fn mark_used(&self, code: &str, buyer_id: Option<&str>) -> Result<bool> {
        let normalized = normalize_code(code);
        let changed = mark_invite_used(self.conn, &normalized, buyer_id)?;

        if changed {
            let realtor_id = get_invite(self.conn, &normalized)?.map(|invite| invite.owner_realtor_id);
            record_event(
                self.conn,
                Event::new(
                    "invite_used",
                    "invite",
                    &normalized,
                    serde_json::json!({ "buyer_id": buyer_id, "realtor_id": realtor_id }),
                    buyer_id.unwrap_or("portal"),
                ),
            );
        }

        Ok(changed)
    }

    /// Withdraw a pending code. Used codes stay as history.
    pub fn revoke(&self, code: &str) -> Result<bool> {
        let normalized = normalize_code(code);
        let owner: Option<String> = self
            .conn
            .query_row(
                "DELETE FROM invite_codes WHERE code = ?1 AND status = 'pending'
                 RETURNING owner_realtor_id",
                params![normalized],
                |row| row.get(0),
            )
            .optional()?;

        let Some(realtor_id) = owner else {
            return Ok(false);
        };

        record_event(
            self.conn,
            Event::new(
                "invite_revoked",
                "invite",
                &normalized,
                serde_json::json!({ "realtor_id": realtor_id }),
                "portal",
            ),
        );
        Ok(true)
    }

    pub fn get(&self, code: &str) -> Result<Option<InviteCode>> {
        get_invite(self.conn, code)
    }

    pub fn pending_invites_for_realtor(&self, realtor_id: &str) -> Result<Vec<InviteCode>> {
        pending_invites_for_realtor(self.conn, realtor_id)
    }
}

// ============================================================================
// TESTS
// ============================================================================
