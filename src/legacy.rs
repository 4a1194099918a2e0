// 📦 Legacy Import - bring browser-storage exports into the canonical tables
//
// The old client kept the same invite in up to four places:
//   inviteCodes, pendingInvites, realtors[].pendingInvites, users[].inviteCode
// Here every copy becomes a "claim" on a code. Claims that agree collapse to
// one invite_codes row. Claims that name different owners are reported as
// conflicts and NOT imported.
//
// Importing the same export twice is a no-op (keyed by its SHA-256 digest).

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::db::{has_event, record_event, Event};
use crate::entities::{
    find_buyer_by_email, find_realtor_by_email, get_buyer, get_realtor, insert_buyer,
    insert_realtor, BuyerAccount, RealtorAccount, Role, TOTAL_STEPS,
};
use crate::invites::{code_exists, insert_invite, is_well_formed, normalize_code, InviteCode, InviteStatus};
use crate::schema::{is_valid_email, normalize_email};

const IMPORT_EVENT: &str = "legacy_import";

// ============================================================================
// LEGACY SHAPES (camelCase JSON as written by the browser client)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyExport {
    pub users: Vec<LegacyUser>,
    pub realtors: Vec<LegacyRealtor>,
    pub invite_codes: Vec<LegacyInvite>,
    pub pending_invites: Vec<LegacyInvite>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyUser {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub invite_code: String,
    pub realtor_id: String,
    pub current_step: Value,
    pub completed_steps: Vec<Value>,
    pub created_at: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyRealtor {
    pub id: String,
    pub name: String,
    pub email: String,
    pub pending_invites: Vec<LegacyInvite>,
    pub created_at: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyInvite {
    pub code: String,
    pub realtor_id: String,
    #[serde(alias = "recipientEmail")]
    pub email: String,
    pub status: String,
    pub created_at: Value,
    pub used_at: Value,
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacySource {
    InviteCodes,
    PendingInvites,
    RealtorEmbedded,
    BuyerRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerClaim {
    pub source: LegacySource,
    pub realtor_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InviteConflict {
    pub code: String,
    pub claims: Vec<OwnerClaim>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub digest: String,
    pub already_imported: bool,
    pub realtors: usize,
    pub buyers: usize,
    pub invites: usize,
    pub conflicts: Vec<InviteConflict>,
    pub skipped: Vec<String>,
}

impl ImportReport {
    pub fn summary(&self) -> String {
        if self.already_imported {
            let short = self.digest.get(..12).unwrap_or(&self.digest);
            return format!("Export {} was already imported", short);
        }
        format!(
            "Imported {} realtors, {} buyers, {} invites ({} conflicts, {} skipped)",
            self.realtors,
            self.buyers,
            self.invites,
            self.conflicts.len(),
            self.skipped.len()
        )
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Hex SHA-256 of the raw export
pub fn export_digest(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// JS timestamps arrive as ISO strings or epoch milliseconds
fn parse_legacy_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn parse_step(value: &Value) -> Option<u8> {
    let n = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    u8::try_from(n).ok().filter(|s| (1..=TOTAL_STEPS).contains(s))
}

fn is_buyer(user: &LegacyUser) -> bool {
    match user.role.trim().to_lowercase().as_str() {
        "buyer" => true,
        "realtor" => false,
        _ => !user.invite_code.trim().is_empty(),
    }
}

struct Claim {
    source: LegacySource,
    realtor_id: String,
    email: String,
    used: bool,
    created_at: Option<DateTime<Utc>>,
    used_at: Option<DateTime<Utc>>,
    buyer_id: Option<String>,
}

fn invite_claim(source: LegacySource, invite: &LegacyInvite, owner: &str) -> Claim {
    let realtor_id = if invite.realtor_id.trim().is_empty() {
        owner.trim().to_string()
    } else {
        invite.realtor_id.trim().to_string()
    };
    Claim {
        source,
        realtor_id,
        email: invite.email.clone(),
        used: invite.status.trim().eq_ignore_ascii_case("used")
            || parse_legacy_time(&invite.used_at).is_some(),
        created_at: parse_legacy_time(&invite.created_at),
        used_at: parse_legacy_time(&invite.used_at),
        buyer_id: None,
    }
}

fn collect_claims(export: &LegacyExport) -> BTreeMap<String, Vec<Claim>> {
    let mut claims: BTreeMap<String, Vec<Claim>> = BTreeMap::new();
    let mut push = |code: &str, claim: Claim| {
        let code = normalize_code(code);
        if !code.is_empty() {
            claims.entry(code).or_default().push(claim);
        }
    };

    for invite in &export.invite_codes {
        push(&invite.code, invite_claim(LegacySource::InviteCodes, invite, ""));
    }
    for invite in &export.pending_invites {
        push(&invite.code, invite_claim(LegacySource::PendingInvites, invite, ""));
    }
    for realtor in &export.realtors {
        for invite in &realtor.pending_invites {
            push(
                &invite.code,
                invite_claim(LegacySource::RealtorEmbedded, invite, &realtor.id),
            );
        }
    }
    for user in export.users.iter().filter(|u| is_buyer(u)) {
        push(
            &user.invite_code,
            Claim {
                source: LegacySource::BuyerRecord,
                realtor_id: user.realtor_id.trim().to_string(),
                email: user.email.clone(),
                used: true,
                created_at: None,
                used_at: parse_legacy_time(&user.created_at),
                buyer_id: Some(user.id.clone()).filter(|id| !id.trim().is_empty()),
            },
        );
    }

    claims
}

// ============================================================================
// IMPORT
// ============================================================================

pub fn import_legacy_file(conn: &mut Connection, path: &Path) -> Result<ImportReport> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read legacy export {}", path.display()))?;
    import_legacy_export(conn, &raw)
}

pub fn import_legacy_export(conn: &mut Connection, raw: &str) -> Result<ImportReport> {
    let digest = export_digest(raw);
    let mut report = ImportReport {
        digest: digest.clone(),
        ..Default::default()
    };

    if has_event(conn, IMPORT_EVENT, &digest)? {
        info!(digest = %digest, "legacy export already imported");
        report.already_imported = true;
        return Ok(report);
    }

    let export: LegacyExport =
        serde_json::from_str(raw).context("Legacy export is not valid JSON")?;

    let tx = conn.transaction()?;
    let now = Utc::now();

    // ------------------------------------------------------------------
    // Realtors: the realtors list plus any users with the realtor role
    // ------------------------------------------------------------------
    let realtor_users = export.users.iter().filter(|u| !is_buyer(u)).map(|u| {
        let name = if u.name.trim().is_empty() {
            format!("{} {}", u.first_name.trim(), u.last_name.trim())
        } else {
            u.name.clone()
        };
        (u.id.clone(), name, u.email.clone(), u.created_at.clone())
    });
    let listed = export
        .realtors
        .iter()
        .map(|r| (r.id.clone(), r.name.clone(), r.email.clone(), r.created_at.clone()));

    for (id, name, email, created_at) in listed.chain(realtor_users) {
        let id = id.trim().to_string();
        if id.is_empty() || get_realtor(&tx, &id)?.is_some() {
            continue;
        }
        if find_realtor_by_email(&tx, &email)?.is_some() {
            report
                .skipped
                .push(format!("realtor {}: email {} already registered", id, normalize_email(&email)));
            continue;
        }

        let realtor = RealtorAccount {
            id: id.clone(),
            name: name.trim().to_string(),
            email: normalize_email(&email),
            created_at: parse_legacy_time(&created_at).unwrap_or(now),
        };
        match insert_realtor(&tx, &realtor) {
            Ok(()) => report.realtors += 1,
            Err(e) => report.skipped.push(format!("realtor {}: {}", id, e)),
        }
    }

    // ------------------------------------------------------------------
    // Buyers
    // ------------------------------------------------------------------
    for user in export.users.iter().filter(|u| is_buyer(u)) {
        let id = user.id.trim().to_string();
        if id.is_empty() {
            report.skipped.push(format!("buyer {}: missing id", user.email));
            continue;
        }
        if get_buyer(&tx, &id)?.is_some() {
            continue;
        }
        if find_buyer_by_email(&tx, &user.email)?.is_some() {
            report
                .skipped
                .push(format!("buyer {}: email {} already registered", id, normalize_email(&user.email)));
            continue;
        }
        if get_realtor(&tx, user.realtor_id.trim())?.is_none() {
            report
                .skipped
                .push(format!("buyer {}: unknown realtor {:?}", id, user.realtor_id));
            continue;
        }

        let completed_steps: BTreeSet<u8> = user.completed_steps.iter().filter_map(parse_step).collect();
        let current_step = parse_step(&user.current_step).unwrap_or(1);

        let buyer = BuyerAccount {
            id: id.clone(),
            first_name: user.first_name.trim().to_string(),
            last_name: user.last_name.trim().to_string(),
            email: normalize_email(&user.email),
            role: Role::Buyer,
            invite_code: normalize_code(&user.invite_code),
            realtor_id: user.realtor_id.trim().to_string(),
            current_step,
            completed_steps,
            created_at: parse_legacy_time(&user.created_at).unwrap_or(now),
        };
        match insert_buyer(&tx, &buyer) {
            Ok(()) => report.buyers += 1,
            Err(e) => report.skipped.push(format!("buyer {}: {}", id, e)),
        }
    }

    // ------------------------------------------------------------------
    // Invites: collapse every stored copy into one canonical row
    // ------------------------------------------------------------------
    for (code, claims) in collect_claims(&export) {
        let mut by_owner: BTreeMap<&str, Vec<LegacySource>> = BTreeMap::new();
        for claim in claims.iter().filter(|c| !c.realtor_id.is_empty()) {
            by_owner.entry(claim.realtor_id.as_str()).or_default().push(claim.source);
        }

        if by_owner.len() > 1 {
            let mut conflict_claims: Vec<OwnerClaim> = by_owner
                .iter()
                .flat_map(|(owner, sources)| {
                    sources.iter().map(move |source| OwnerClaim {
                        source: *source,
                        realtor_id: owner.to_string(),
                    })
                })
                .collect();
            conflict_claims.sort_by(|a, b| a.source.cmp(&b.source));
            conflict_claims.dedup();

            warn!(code = %code, owners = by_owner.len(), "conflicting invite owners in legacy export");
            report.conflicts.push(InviteConflict {
                code,
                claims: conflict_claims,
            });
            continue;
        }

        let Some(owner) = by_owner.keys().next().map(|o| o.to_string()) else {
            report.skipped.push(format!("invite {}: no owning realtor", code));
            continue;
        };

        if !is_well_formed(&code) {
            report.skipped.push(format!("invite {}: malformed code", code));
            continue;
        }
        if code_exists(&tx, &code)? {
            continue;
        }
        if get_realtor(&tx, &owner)?.is_none() {
            report
                .skipped
                .push(format!("invite {}: unknown realtor {}", code, owner));
            continue;
        }

        let used = claims.iter().any(|c| c.used);
        let email = claims
            .iter()
            .map(|c| c.email.trim())
            .find(|e| is_valid_email(e))
            .unwrap_or_default()
            .to_string();
        let used_by = claims
            .iter()
            .find_map(|c| c.buyer_id.clone())
            .filter(|id| get_buyer(&tx, id).ok().flatten().is_some());

        let invite = InviteCode {
            code: code.clone(),
            owner_realtor_id: owner,
            recipient_email: normalize_email(&email),
            status: if used { InviteStatus::Used } else { InviteStatus::Pending },
            created_at: claims.iter().filter_map(|c| c.created_at).min().unwrap_or(now),
            used_at: if used {
                Some(claims.iter().filter_map(|c| c.used_at).min().unwrap_or(now))
            } else {
                None
            },
            used_by_buyer_id: used_by,
        };

        match insert_invite(&tx, &invite) {
            Ok(()) => report.invites += 1,
            Err(e) => report.skipped.push(format!("invite {}: {}", code, e)),
        }
    }

    record_event(
        &tx,
        Event::new(
            IMPORT_EVENT,
            "import",
            &digest,
            serde_json::json!({
                "realtors": report.realtors,
                "buyers": report.buyers,
                "invites": report.invites,
                "conflicts": report.conflicts.len(),
                "skipped": report.skipped.len(),
            }),
            "legacy_importer",
        ),
    );

    tx.commit()?;
    info!("{}", report.summary());

    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::invites::{get_invite, InviteRegistry};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_summary_handles_short_digest() {
        let report = ImportReport {
            already_imported: true,
            ..Default::default()
        };
        assert_eq!(report.summary(), "Export  was already imported");

        let report = ImportReport {
            digest: "abc".to_string(),
            already_imported: true,
            ..Default::default()
        };
        assert_eq!(report.summary(), "Export abc was already imported");

        let report = ImportReport {
            digest: "0123456789abcdef".to_string(),
            already_imported: true,
            ..Default::default()
        };
        assert_eq!(report.summary(), "Export 0123456789ab was already imported");
    }

    const EXPORT: &str = r#"{
        "realtors": [
            {
                "id": "r1",
                "name": "Pat Agent",
                "email": "Pat@Agency.com",
                "pendingInvites": [
                    {"code": "abcd1234", "email": "new@buyer.com", "createdAt": "2024-03-01T10:00:00Z"},
                    {"code": "CONF0001", "email": "x@y.com"}
                ]
            },
            {"id": "r2", "name": "Sam Broker", "email": "sam@broker.com"}
        ],
        "users": [
            {
                "id": "b1",
                "firstName": "Jane",
                "lastName": "Doe",
                "email": "jane@example.com",
                "role": "buyer",
                "inviteCode": "USED0001",
                "realtorId": "r1",
                "currentStep": 3,
                "completedSteps": [1, "2", 42]
            }
        ],
        "inviteCodes": [
            {"code": "ABCD1234", "realtorId": "r1", "email": "new@buyer.com", "status": "pending", "createdAt": 1709200000000},
            {"code": "USED0001", "realtorId": "r1", "email": "jane@example.com", "status": "used"},
            {"code": "CONF0001", "realtorId": "r2", "email": "x@y.com", "status": "pending"}
        ],
        "pendingInvites": [
            {"code": "ABCD1234", "realtorId": "r1", "email": "new@buyer.com"}
        ]
    }"#;

    #[test]
    fn test_import_collapses_duplicate_copies() {
        let mut conn = test_conn();
        let report = import_legacy_export(&mut conn, EXPORT).unwrap();

        assert_eq!(report.realtors, 2);
        assert_eq!(report.buyers, 1);
        assert_eq!(report.invites, 2);

        // Four copies of ABCD1234 became one pending row
        let invite = get_invite(&conn, "ABCD1234").unwrap().unwrap();
        assert_eq!(invite.owner_realtor_id, "r1");
        assert_eq!(invite.status, InviteStatus::Pending);
        assert_eq!(invite.created_at.timestamp_millis(), 1709200000000);

        let used = get_invite(&conn, "USED0001").unwrap().unwrap();
        assert_eq!(used.status, InviteStatus::Used);
        assert_eq!(used.used_by_buyer_id.as_deref(), Some("b1"));

        let registry = InviteRegistry::new(&conn);
        assert!(registry.validate_invite_code("abcd1234").valid);
        assert!(!registry.validate_invite_code("USED0001").valid);
    }

    #[test]
    fn test_conflicting_owners_are_reported_not_guessed() {
        let mut conn = test_conn();
        let report = import_legacy_export(&mut conn, EXPORT).unwrap();

        assert_eq!(report.conflicts.len(), 1);
        let conflict = &report.conflicts[0];
        assert_eq!(conflict.code, "CONF0001");

        let owners: BTreeSet<&str> = conflict.claims.iter().map(|c| c.realtor_id.as_str()).collect();
        assert_eq!(owners, BTreeSet::from(["r1", "r2"]));

        assert!(get_invite(&conn, "CONF0001").unwrap().is_none());
    }

    #[test]
    fn test_buyer_steps_are_sanitized() {
        let mut conn = test_conn();
        import_legacy_export(&mut conn, EXPORT).unwrap();

        let buyer = get_buyer(&conn, "b1").unwrap().unwrap();
        assert_eq!(buyer.current_step, 3);
        assert_eq!(buyer.completed_steps, BTreeSet::from([1, 2]));
        assert_eq!(buyer.realtor_id, "r1");

        let realtor = get_realtor(&conn, "r1").unwrap().unwrap();
        assert_eq!(realtor.email, "pat@agency.com");
    }

    #[test]
    fn test_reimport_is_noop() {
        let mut conn = test_conn();
        let first = import_legacy_export(&mut conn, EXPORT).unwrap();
        let second = import_legacy_export(&mut conn, EXPORT).unwrap();

        assert!(!first.already_imported);
        assert!(second.already_imported);
        assert_eq!(second.digest, first.digest);
        assert!(second.summary().contains("already imported"));
    }

    #[test]
    fn test_orphans_are_skipped() {
        let mut conn = test_conn();
        let raw = r#"{
            "users": [
                {"id": "b9", "firstName": "Lost", "lastName": "Buyer", "email": "lost@x.com",
                 "role": "buyer", "inviteCode": "ORPH0001", "realtorId": "ghost"}
            ],
            "pendingInvites": [{"code": "NOOWNER1", "email": "a@b.com"}]
        }"#;

        let report = import_legacy_export(&mut conn, raw).unwrap();

        assert_eq!(report.buyers, 0);
        assert_eq!(report.invites, 0);
        assert_eq!(report.skipped.len(), 3);
    }

    #[test]
    fn test_import_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        fs::write(&path, EXPORT).unwrap();

        let mut conn = test_conn();
        let report = import_legacy_file(&mut conn, &path).unwrap();
        assert_eq!(report.realtors, 2);

        assert!(import_legacy_file(&mut conn, &dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let mut conn = test_conn();
        assert!(import_legacy_export(&mut conn, "not json").is_err());
    }
}
