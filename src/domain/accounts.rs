//! Validation rules for account registration and login input.
//!
//! The password policy mirrors what the public API promises: at least ten
//! characters with a letter, a digit, and a special character. Emails are
//! checked structurally only; deliverability is out of scope.

use crate::domain::error::DomainError;

pub const MIN_PASSWORD_LEN: usize = 10;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 255;
pub const MAX_BIO_LEN: usize = 1000;

/// Canonical form used for storage and cache keys.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

pub fn validate_name(name: &str) -> Result<(), DomainError> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("name", "must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::validation(
            "name",
            format!("must be at most {MAX_NAME_LEN} characters"),
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), DomainError> {
    let invalid = || DomainError::validation("email", "must be a valid email address");

    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return Err(invalid());
    }
    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let Some((local, host)) = email.split_once('@') else {
        return Err(invalid());
    };
    if local.is_empty() || host.contains('@') {
        return Err(invalid());
    }
    let Some((head, tail)) = host.rsplit_once('.') else {
        return Err(invalid());
    };
    if head.is_empty() || tail.is_empty() {
        return Err(invalid());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), DomainError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(DomainError::validation(
            "password",
            format!("must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(DomainError::validation(
            "password",
            "must contain at least one digit",
        ));
    }
    if !password.chars().any(char::is_alphabetic) {
        return Err(DomainError::validation(
            "password",
            "must contain at least one letter",
        ));
    }
    if !password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
    {
        return Err(DomainError::validation(
            "password",
            "must contain at least one special character",
        ));
    }
    Ok(())
}

pub fn validate_password_pair(password: &str, confirm_password: &str) -> Result<(), DomainError> {
    if password.is_empty() || confirm_password.is_empty() {
        return Err(DomainError::validation(
            "confirm_password",
            "password and confirm password are both required",
        ));
    }
    if password != confirm_password {
        return Err(DomainError::validation(
            "confirm_password",
            "confirm password does not match password",
        ));
    }
    Ok(())
}

pub fn validate_bio(bio: &str) -> Result<(), DomainError> {
    if bio.chars().count() > MAX_BIO_LEN {
        return Err(DomainError::validation(
            "bio",
            format!("must be at most {MAX_BIO_LEN} characters"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_lowercases_and_trims() {
        assert_eq!(normalize_email("  Ann@Example.COM "), "ann@example.com");
    }

    #[test]
    fn validate_email_accepts_plain_addresses() {
        validate_email("ann@example.com").expect("valid email");
        validate_email("a.b+tag@mail.example.org").expect("valid email");
    }

    #[test]
    fn validate_email_rejects_malformed_addresses() {
        for input in ["", "ann", "ann@", "@example.com", "ann@host", "a b@x.io"] {
            validate_email(input).expect_err("should reject");
        }
    }

    #[test]
    fn validate_password_enforces_full_policy() {
        validate_password("Abc12345!!").expect("meets policy");

        validate_password("Ab1!").expect_err("too short");
        validate_password("abcdefghij!").expect_err("missing digit");
        validate_password("1234567890!").expect_err("missing letter");
        validate_password("abcde12345").expect_err("missing special character");
    }

    #[test]
    fn validate_password_pair_requires_matching_confirmation() {
        validate_password_pair("Abc12345!!", "Abc12345!!").expect("matching pair");

        let err = validate_password_pair("Abc12345!!", "Abc12345!?").expect_err("mismatch");
        assert!(err.to_string().contains("confirm password"));

        validate_password_pair("Abc12345!!", "").expect_err("empty confirmation");
    }
}
