use std::sync::OnceLock;

use regex::Regex;

/// Local validation failures; these block progression and never reach the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("enter a valid e-mail address")]
    InvalidEmail,
    #[error("phone number must contain 10 to 15 digits and may start with +")]
    InvalidPhone,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("select at least one role")]
    NoRoleSelected,
    #[error("company name is required when registering as a company")]
    CompanyNameRequired,
    #[error("confirm that the information you entered is accurate")]
    AccuracyNotConfirmed,
    #[error("you already applied for the {0} role")]
    RoleAlreadyRequested(&'static str),
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\+?[0-9]{10,15}$").expect("phone pattern compiles"))
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("email pattern compiles")
    })
}

/// True iff `phone` is an optional `+` followed by 10 to 15 ASCII digits.
pub fn validate_phone(phone: &str) -> bool {
    phone_pattern().is_match(phone)
}

pub fn validate_email(email: &str) -> bool {
    email.len() <= 254 && email_pattern().is_match(email)
}

pub fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(())
    }
}

pub fn require_phone(phone: &str) -> Result<(), ValidationError> {
    require(phone, "phone")?;
    if validate_phone(phone.trim()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidPhone)
    }
}

pub fn require_email(email: &str) -> Result<(), ValidationError> {
    require(email, "e-mail")?;
    if validate_email(email.trim()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidEmail)
    }
}

/// Both fields must be filled and identical.
pub fn require_matching_passwords(password: &str, confirmation: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::MissingField("password"));
    }
    if password != confirmation {
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_pattern_examples() {
        assert!(validate_phone("+992123456789"));
        assert!(validate_phone("1234567890"));
        assert!(validate_phone("+123456789012345"));
        assert!(!validate_phone("12345"));
        assert!(!validate_phone("abc1234567"));
        assert!(!validate_phone("+1234567890123456"));
        assert!(!validate_phone("++1234567890"));
        assert!(!validate_phone("123 456 7890"));
        assert!(!validate_phone(""));
    }

    #[test]
    fn phone_requirement_distinguishes_missing_from_malformed() {
        assert_eq!(require_phone("  "), Err(ValidationError::MissingField("phone")));
        assert_eq!(require_phone("555-0100"), Err(ValidationError::InvalidPhone));
        assert_eq!(require_phone(" +12025550100 "), Ok(()));
    }

    #[test]
    fn password_confirmation_must_match() {
        assert_eq!(
            require_matching_passwords("secret-1", "secret-2"),
            Err(ValidationError::PasswordMismatch)
        );
        assert_eq!(
            require_matching_passwords("", ""),
            Err(ValidationError::MissingField("password"))
        );
        assert_eq!(require_matching_passwords("secret-1", "secret-1"), Ok(()));
    }

    #[test]
    fn email_shape_is_checked() {
        assert!(validate_email("moderator@cargo.com"));
        assert!(!validate_email("moderator@cargo"));
        assert_eq!(require_email("nobody"), Err(ValidationError::InvalidEmail));
    }
}
