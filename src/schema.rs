// 📐 Shape Layer - validation at the storage boundary
// Every record is checked here before it is written, and legacy records
// are checked here before they are imported.

use crate::entities::{BuyerAccount, RealtorAccount, TOTAL_STEPS};
use crate::invites::{is_well_formed, InviteCode, InviteStatus};
use crate::relay::ContactForm;

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub context: String,
}

impl ValidationError {
    fn new(context: &str, field: &str, message: impl Into<String>) -> Self {
        ValidationError {
            field: field.to_string(),
            message: message.into(),
            context: context.to_string(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.context, self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Join a list of validation errors into one line for logs and API responses
pub fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn finish(errors: Vec<ValidationError>) -> ValidationResult {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// ============================================================================
// FIELD RULES
// ============================================================================

/// Lowercase + trim; emails are compared in this form everywhere
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Minimal shape check: one '@', non-empty local part, dotted domain, no spaces
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.is_empty() || email.chars().any(char::is_whitespace) {
        return false;
    }

    let mut parts = email.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => (local, domain),
        _ => return false,
    };

    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

fn check_required(errors: &mut Vec<ValidationError>, context: &str, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError::new(context, field, "Required field is empty"));
    }
}

fn check_email(errors: &mut Vec<ValidationError>, context: &str, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError::new(context, field, "Required field is empty"));
    } else if !is_valid_email(value) {
        errors.push(ValidationError::new(
            context,
            field,
            format!("Invalid email address: {}", value),
        ));
    }
}

// ============================================================================
// RECORD VALIDATORS
// ============================================================================

pub fn validate_email(email: &str) -> ValidationResult {
    let mut errors = Vec::new();
    check_email(&mut errors, "Email", "email", email);
    finish(errors)
}

pub fn validate_realtor(realtor: &RealtorAccount) -> ValidationResult {
    let mut errors = Vec::new();

    check_required(&mut errors, "Realtor", "id", &realtor.id);
    check_required(&mut errors, "Realtor", "name", &realtor.name);
    check_email(&mut errors, "Realtor", "email", &realtor.email);

    finish(errors)
}

pub fn validate_buyer(buyer: &BuyerAccount) -> ValidationResult {
    let mut errors = Vec::new();

    check_required(&mut errors, "Buyer", "id", &buyer.id);
    check_required(&mut errors, "Buyer", "first_name", &buyer.first_name);
    check_required(&mut errors, "Buyer", "last_name", &buyer.last_name);
    check_email(&mut errors, "Buyer", "email", &buyer.email);
    check_required(&mut errors, "Buyer", "realtor_id", &buyer.realtor_id);
    check_required(&mut errors, "Buyer", "invite_code", &buyer.invite_code);

    if buyer.current_step < 1 || buyer.current_step > TOTAL_STEPS {
        errors.push(ValidationError::new(
            "Buyer",
            "current_step",
            format!("Must be between 1 and {}, got {}", TOTAL_STEPS, buyer.current_step),
        ));
    }

    if let Some(bad) = buyer
        .completed_steps
        .iter()
        .find(|s| **s < 1 || **s > TOTAL_STEPS)
    {
        errors.push(ValidationError::new(
            "Buyer",
            "completed_steps",
            format!("Unknown step {}", bad),
        ));
    }

    finish(errors)
}

pub fn validate_invite(invite: &InviteCode) -> ValidationResult {
    let mut errors = Vec::new();

    if !is_well_formed(&invite.code) {
        errors.push(ValidationError::new(
            "InviteCode",
            "code",
            format!("Must be 8 characters of A-Z or 0-9, got {:?}", invite.code),
        ));
    }
    check_required(&mut errors, "InviteCode", "owner_realtor_id", &invite.owner_realtor_id);
    check_email(&mut errors, "InviteCode", "recipient_email", &invite.recipient_email);

    match invite.status {
        InviteStatus::Pending if invite.used_at.is_some() => {
            errors.push(ValidationError::new(
                "InviteCode",
                "used_at",
                "Pending invite cannot carry a used_at timestamp",
            ));
        }
        InviteStatus::Used if invite.used_at.is_none() => {
            errors.push(ValidationError::new(
                "InviteCode",
                "used_at",
                "Used invite must carry a used_at timestamp",
            ));
        }
        _ => {}
    }

    finish(errors)
}

pub fn validate_contact(form: &ContactForm) -> ValidationResult {
    let mut errors = Vec::new();

    check_required(&mut errors, "Contact", "name", &form.name);
    check_email(&mut errors, "Contact", "email", &form.email);
    check_required(&mut errors, "Contact", "message", &form.message);

    finish(errors)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_email_shapes() {
        assert!(is_valid_email("a@b.com"));
        assert!(is_valid_email("  first.last@agency.realty  "));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("two@@b.com"));
        assert!(!is_valid_email("@b.com"));
        assert!(!is_valid_email("a@localhost"));
        assert!(!is_valid_email("a b@c.com"));
        assert!(!is_valid_email("a@.com"));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Jane@Example.COM "), "jane@example.com");
    }

    #[test]
    fn test_validate_realtor_reports_every_field() {
        let mut realtor = RealtorAccount::new("".to_string(), "not-an-email".to_string());
        realtor.id = String::new();

        let errors = validate_realtor(&realtor).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();

        assert_eq!(fields, vec!["id", "name", "email"]);
        assert!(describe(&errors).contains("[Realtor] email"));
    }

    #[test]
    fn test_validate_buyer_step_range() {
        let mut buyer = BuyerAccount::new(
            "Jane".to_string(),
            "Doe".to_string(),
            "jane@example.com".to_string(),
            "ABCD1234".to_string(),
            "r1".to_string(),
        );
        assert!(validate_buyer(&buyer).is_ok());

        buyer.current_step = 10;
        buyer.completed_steps.insert(0);
        let errors = validate_buyer(&buyer).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_validate_invite_status_consistency() {
        let mut invite = InviteCode::new(
            "ABCD1234".to_string(),
            "r1".to_string(),
            "a@b.com".to_string(),
        );
        assert!(validate_invite(&invite).is_ok());

        invite.status = InviteStatus::Used;
        assert!(validate_invite(&invite).is_err());

        invite.used_at = Some(Utc::now());
        assert!(validate_invite(&invite).is_ok());

        invite.code = "abc".to_string();
        let errors = validate_invite(&invite).unwrap_err();
        assert_eq!(errors[0].field, "code");
    }
}
