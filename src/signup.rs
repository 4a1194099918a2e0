// ✍️ Buyer Signup - consume an invite code and attach the buyer to its realtor
//
// Validation, buyer insert and invite consumption run in one SQLite
// transaction: either the buyer exists and the code is used, or neither.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{record_event, Event};
use crate::entities::{find_buyer_by_email, get_realtor, insert_buyer, BuyerAccount};
use crate::invites::{InvalidReason, InvitePolicy, InviteRegistry, MatchSource};
use crate::schema::{is_valid_email, normalize_email};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub invite_code: String,
}

#[derive(Debug, Error)]
pub enum SignupError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("An account with email {0} already exists")]
    EmailTaken(String),

    #[error("Invalid invite code {code} ({reason:?})")]
    InvalidInviteCode { code: String, reason: InvalidReason },

    #[error("Invite code {0} is not linked to a realtor")]
    NoRealtorForCode(String),

    #[error("Realtor {0} referenced by the invite no longer exists")]
    UnknownRealtor(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl SignupError {
    /// Errors the user can fix by changing their input
    pub fn is_user_error(&self) -> bool {
        !matches!(self, SignupError::Database(_) | SignupError::Storage(_))
    }
}

fn require(value: &str, field: &'static str) -> Result<(), SignupError> {
    if value.trim().is_empty() {
        return Err(SignupError::MissingField(field));
    }
    Ok(())
}

/// Create a buyer account from an invite code
pub fn sign_up_buyer(
    conn: &mut Connection,
    policy: &InvitePolicy,
    request: &SignupRequest,
) -> Result<BuyerAccount, SignupError> {
    require(&request.first_name, "first_name")?;
    require(&request.last_name, "last_name")?;
    require(&request.email, "email")?;
    require(&request.invite_code, "invite_code")?;

    if !is_valid_email(&request.email) {
        return Err(SignupError::InvalidEmail(request.email.trim().to_string()));
    }
    let email = normalize_email(&request.email);

    let tx = conn.transaction()?;

    let buyer = {
        let registry = InviteRegistry::with_policy(&tx, policy.clone());

        if find_buyer_by_email(&tx, &email)?.is_some() {
            return Err(SignupError::EmailTaken(email));
        }

        let validation = registry.validate_invite_code(&request.invite_code);
        if validation.reason == Some(InvalidReason::StorageError) {
            return Err(SignupError::Storage(anyhow::anyhow!(
                "Invite lookup failed for {}",
                validation.code
            )));
        }
        if !validation.valid {
            return Err(SignupError::InvalidInviteCode {
                code: validation.code,
                reason: validation.reason.unwrap_or(InvalidReason::NotFound),
            });
        }

        let realtor_id = validation
            .realtor_id
            .clone()
            .ok_or_else(|| SignupError::NoRealtorForCode(validation.code.clone()))?;

        if get_realtor(&tx, &realtor_id)?.is_none() {
            return Err(SignupError::UnknownRealtor(realtor_id));
        }

        if let Some(invite) = registry.get(&validation.code)? {
            if invite.recipient_email != email {
                warn!(
                    code = %invite.code,
                    issued_to = %invite.recipient_email,
                    "invite redeemed by a different email than it was issued to"
                );
            }
        }

        let buyer = BuyerAccount::new(
            request.first_name.clone(),
            request.last_name.clone(),
            email.clone(),
            validation.code.clone(),
            realtor_id,
        );
        insert_buyer(&tx, &buyer)?;

        if validation.source == Some(MatchSource::Registry)
            && !registry.mark_used(&validation.code, Some(&buyer.id))?
        {
            return Err(SignupError::InvalidInviteCode {
                code: validation.code,
                reason: InvalidReason::AlreadyUsed,
            });
        }

        record_event(
            &tx,
            Event::new(
                "buyer_signed_up",
                "buyer",
                &buyer.id,
                serde_json::json!({
                    "realtor_id": buyer.realtor_id,
                    "invite_code": buyer.invite_code,
                }),
                &buyer.email,
            ),
        );

        buyer
    };

    tx.commit()?;
    info!(buyer_id = %buyer.id, realtor_id = %buyer.realtor_id, "buyer signed up");

    Ok(buyer)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::{buyers_for_realtor, create_realtor};
    use crate::invites::{InviteStatus, InviteRegistry};

    fn setup() -> (Connection, String) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let realtor = create_realtor(&conn, "Pat Agent", "pat@agency.com").unwrap();
        (conn, realtor.id)
    }

    fn request(email: &str, code: &str) -> SignupRequest {
        SignupRequest {
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            email: email.to_string(),
            invite_code: code.to_string(),
        }
    }

    #[test]
    fn test_signup_links_buyer_and_consumes_code() {
        let (mut conn, realtor_id) = setup();
        let code = InviteRegistry::new(&conn)
            .create_invite_code("jane@example.com", &realtor_id)
            .unwrap()
            .code;

        let policy = InvitePolicy::default();
        let buyer = sign_up_buyer(&mut conn, &policy, &request("Jane@Example.com", &code.to_lowercase()))
            .unwrap();

        assert_eq!(buyer.realtor_id, realtor_id);
        assert_eq!(buyer.invite_code, code);
        assert_eq!(buyer.current_step, 1);

        let invite = InviteRegistry::new(&conn).get(&code).unwrap().unwrap();
        assert_eq!(invite.status, InviteStatus::Used);
        assert_eq!(invite.used_by_buyer_id.as_deref(), Some(buyer.id.as_str()));

        assert_eq!(buyers_for_realtor(&conn, &realtor_id).unwrap().len(), 1);
    }

    #[test]
    fn test_code_cannot_be_reused() {
        let (mut conn, realtor_id) = setup();
        let code = InviteRegistry::new(&conn)
            .create_invite_code("jane@example.com", &realtor_id)
            .unwrap()
            .code;
        let policy = InvitePolicy::default();

        sign_up_buyer(&mut conn, &policy, &request("jane@example.com", &code)).unwrap();
        let err = sign_up_buyer(&mut conn, &policy, &request("john@example.com", &code)).unwrap_err();

        assert!(matches!(
            err,
            SignupError::InvalidInviteCode { reason: InvalidReason::AlreadyUsed, .. }
        ));
        assert!(err.is_user_error());
    }

    #[test]
    fn test_failed_signup_leaves_code_pending() {
        let (mut conn, realtor_id) = setup();
        let registry_code = InviteRegistry::new(&conn)
            .create_invite_code("jane@example.com", &realtor_id)
            .unwrap()
            .code;
        let policy = InvitePolicy::default();

        sign_up_buyer(&mut conn, &policy, &request("jane@example.com", &registry_code)).unwrap();

        let second_code = InviteRegistry::new(&conn)
            .create_invite_code("jane@example.com", &realtor_id)
            .unwrap()
            .code;

        // Same email again: rejected, and the second code stays usable
        let err = sign_up_buyer(&mut conn, &policy, &request("JANE@example.com", &second_code))
            .unwrap_err();
        assert!(matches!(err, SignupError::EmailTaken(_)));
        assert!(InviteRegistry::new(&conn).validate_invite_code(&second_code).valid);
    }

    #[test]
    fn test_required_fields_and_email_shape() {
        let (mut conn, _) = setup();
        let policy = InvitePolicy::default();

        let mut missing = request("jane@example.com", "ABCD1234");
        missing.last_name = "  ".to_string();
        assert!(matches!(
            sign_up_buyer(&mut conn, &policy, &missing),
            Err(SignupError::MissingField("last_name"))
        ));

        assert!(matches!(
            sign_up_buyer(&mut conn, &policy, &request("jane", "ABCD1234")),
            Err(SignupError::InvalidEmail(_))
        ));

        assert!(matches!(
            sign_up_buyer(&mut conn, &policy, &request("jane@example.com", "ABCD1234")),
            Err(SignupError::InvalidInviteCode { reason: InvalidReason::NotFound, .. })
        ));
    }

    #[test]
    fn test_test_code_needs_default_realtor() {
        let (mut conn, realtor_id) = setup();

        let no_default = InvitePolicy::new(["DEMO2024"], None);
        assert!(matches!(
            sign_up_buyer(&mut conn, &no_default, &request("jane@example.com", "demo2024")),
            Err(SignupError::NoRealtorForCode(_))
        ));

        let with_default = InvitePolicy::new(["DEMO2024"], Some(realtor_id.clone()));
        let buyer =
            sign_up_buyer(&mut conn, &with_default, &request("jane@example.com", "demo2024")).unwrap();
        assert_eq!(buyer.realtor_id, realtor_id);

        // Still valid for the next tester
        let again =
            sign_up_buyer(&mut conn, &with_default, &request("john@example.com", "DEMO2024")).unwrap();
        assert_eq!(again.invite_code, "DEMO2024");
    }

    #[test]
    fn test_storage_failure_is_not_a_user_error() {
        let (mut conn, _) = setup();
        conn.execute("DROP TABLE invite_codes", []).unwrap();

        let err = sign_up_buyer(&mut conn, &InvitePolicy::default(), &request("jane@example.com", "ABCD1234"))
            .unwrap_err();

        assert!(matches!(err, SignupError::Storage(_)));
        assert!(!err.is_user_error());
        assert!(find_buyer_by_email(&conn, "jane@example.com").unwrap().is_none());
    }

    #[test]
    fn test_default_realtor_must_exist() {
        let (mut conn, _) = setup();
        let policy = InvitePolicy::new(["DEMO2024"], Some("ghost".to_string()));

        assert!(matches!(
            sign_up_buyer(&mut conn, &policy, &request("jane@example.com", "DEMO2024")),
            Err(SignupError::UnknownRealtor(_))
        ));
    }
}
