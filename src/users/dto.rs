use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::repo_types::{Role, User};
use crate::error::{AppError, AppResult};

/// Column widths of `users.email` and `users.phone_number`.
pub const EMAIL_MAX_LEN: usize = 255;
pub const PHONE_MAX_LEN: usize = 32;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trims and lower-cases, then checks the shape and length.
pub(crate) fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    if email.chars().count() > EMAIL_MAX_LEN {
        return Err(AppError::validation(format!(
            "Email must be at most {EMAIL_MAX_LEN} characters"
        )));
    }
    if !is_valid_email(&email) {
        return Err(AppError::validation("Invalid email"));
    }
    Ok(email)
}

pub(crate) fn validate_username(username: &str) -> AppResult<()> {
    let len = username.chars().count();
    if !(3..=50).contains(&len) {
        return Err(AppError::validation(
            "Username must be between 3 and 50 characters",
        ));
    }
    Ok(())
}

/// At least 8 characters with at least one letter and one digit.
pub(crate) fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < 8 {
        return Err(AppError::validation(
            "Password must be at least 8 characters long",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AppError::validation(
            "Password must contain at least one digit",
        ));
    }
    if !password.chars().any(char::is_alphabetic) {
        return Err(AppError::validation(
            "Password must contain at least one letter",
        ));
    }
    Ok(())
}

/// Request body for account creation.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub phone_number: String,
    pub password: String,
    pub password_confirm: String,
}

impl SignupRequest {
    /// Normalizes the email in place and checks every field.
    pub fn validate(&mut self) -> AppResult<()> {
        self.username = self.username.trim().to_string();
        validate_username(&self.username)?;
        self.email = normalize_email(&self.email)?;
        self.phone_number = self.phone_number.trim().to_string();
        if self.phone_number.is_empty() {
            return Err(AppError::validation("Phone number is required"));
        }
        if self.phone_number.chars().count() > PHONE_MAX_LEN {
            return Err(AppError::validation(format!(
                "Phone number must be at most {PHONE_MAX_LEN} characters"
            )));
        }
        validate_password(&self.password)?;
        if self.password != self.password_confirm {
            return Err(AppError::validation("Passwords do not match"));
        }
        Ok(())
    }
}

/// Administrative partial update.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub is_active: Option<bool>,
    pub role: Option<Role>,
}

impl UpdateUserRequest {
    pub fn validate(&mut self) -> AppResult<()> {
        if let Some(username) = self.username.as_mut() {
            *username = username.trim().to_string();
            validate_username(username)?;
        }
        if let Some(email) = self.email.as_mut() {
            *email = normalize_email(email)?;
        }
        Ok(())
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub phone_number: String,
    pub role: Role,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            phone_number: user.phone_number,
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}
