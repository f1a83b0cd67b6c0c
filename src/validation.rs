use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::StudioError;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("regex compiles"));
static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9][0-9 ()\-]{5,19}$").expect("regex compiles"));

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn validate_email(value: &str) -> Result<String, StudioError> {
    let email = value.trim();
    if EMAIL.is_match(email) {
        Ok(email.to_string())
    } else {
        Err(StudioError::Validation("a valid email address is required".into()))
    }
}

pub fn validate_password(value: &str) -> Result<(), StudioError> {
    if value.chars().count() >= MIN_PASSWORD_LEN {
        Ok(())
    } else {
        Err(StudioError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )))
    }
}

/// Empty input means "no phone".
pub fn validate_phone(value: &str) -> Result<Option<String>, StudioError> {
    let phone = value.trim();
    if phone.is_empty() {
        return Ok(None);
    }
    if PHONE.is_match(phone) {
        Ok(Some(phone.to_string()))
    } else {
        Err(StudioError::Validation("phone number is not valid".into()))
    }
}

pub fn require_text(field: &str, value: &str) -> Result<String, StudioError> {
    let text = value.trim();
    if text.is_empty() {
        Err(StudioError::Validation(format!("{field} is required")))
    } else {
        Ok(text.to_string())
    }
}

pub fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

pub fn validate_duration(minutes: u32) -> Result<u32, StudioError> {
    if (1..=600).contains(&minutes) {
        Ok(minutes)
    } else {
        Err(StudioError::Validation(
            "durationMinutes must be between 1 and 600".into(),
        ))
    }
}

pub fn validate_capacity(capacity: u32) -> Result<u32, StudioError> {
    if capacity <= 500 {
        Ok(capacity)
    } else {
        Err(StudioError::Validation(
            "capacity must be between 0 and 500".into(),
        ))
    }
}

pub fn parse_class_date(value: &str) -> Result<NaiveDate, StudioError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| StudioError::Validation("classDate must be YYYY-MM-DD".into()))
}

pub fn parse_start_time(value: &str) -> Result<NaiveTime, StudioError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| StudioError::Validation("startTime must be HH:MM".into()))
}

/// Gate for destructive endpoints; built only from an explicit `confirm=true`.
#[derive(Debug, Clone, Copy)]
pub struct Confirmed(());

impl Confirmed {
    pub fn from_flag(confirm: bool) -> Result<Self, StudioError> {
        if confirm {
            Ok(Confirmed(()))
        } else {
            Err(StudioError::ConfirmationRequired)
        }
    }
}
