//! Input normalization for account fields.

use crate::error::AuthError;
use regex::Regex;

const MAX_NAME_LENGTH: usize = 100;

#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Letters, digits and underscores, 3 to 30 characters.
#[must_use]
pub fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_]{3,30}$").is_ok_and(|regex| regex.is_match(username))
}

pub(crate) fn require_email(email: &str) -> Result<String, AuthError> {
    let email = normalize_email(email);
    if valid_email(&email) {
        Ok(email)
    } else {
        Err(AuthError::InvalidInput("invalid email address".to_string()))
    }
}

pub(crate) fn require_username(username: &str) -> Result<String, AuthError> {
    let username = username.trim();
    if valid_username(username) {
        Ok(username.to_string())
    } else {
        Err(AuthError::InvalidInput(
            "username must be 3-30 letters, digits or underscores".to_string(),
        ))
    }
}

pub(crate) fn require_password(password: &str, min_length: usize) -> Result<(), AuthError> {
    if password.chars().count() < min_length {
        return Err(AuthError::InvalidInput(format!(
            "password must be at least {min_length} characters"
        )));
    }
    Ok(())
}

pub(crate) fn require_name(name: &str) -> Result<String, AuthError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
        return Err(AuthError::InvalidInput(format!(
            "name must be 1-{MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(name.to_string())
}

pub(crate) fn optional_mobile(mobile: Option<&str>) -> Result<Option<String>, AuthError> {
    let Some(mobile) = mobile.map(str::trim).filter(|m| !m.is_empty()) else {
        return Ok(None);
    };
    let valid = Regex::new(r"^\+?[0-9][0-9 \-]{5,19}$").is_ok_and(|regex| regex.is_match(mobile));
    if valid {
        Ok(Some(mobile.to_string()))
    } else {
        Err(AuthError::InvalidInput("invalid mobile number".to_string()))
    }
}
