use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

lazy_static! {
    /// Three letters, a hyphen, four digits: `ABC-1234`.
    static ref PLATE_REGEX: Regex = Regex::new(r"^[A-Za-z]{3}-[0-9]{4}$").unwrap();
    static ref LICENSE_REGEX: Regex = Regex::new(r"^[0-9]{11}$").unwrap();
    static ref PHONE_REGEX: Regex = Regex::new(r"^[0-9]{1,11}$").unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub vehicle_plate: String,
    pub license_number: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validates a vehicle plate and returns it upper-cased.
pub fn normalize_plate(raw: &str) -> Result<String, AppError> {
    let raw = raw.trim();
    if !PLATE_REGEX.is_match(raw) {
        return Err(AppError::validation(
            "vehicle_plate",
            "vehicle_plate must follow the format XXX-1234",
        ));
    }

    Ok(raw.to_ascii_uppercase())
}

pub fn validate_license(raw: &str) -> Result<String, AppError> {
    let raw = raw.trim();
    if !LICENSE_REGEX.is_match(raw) {
        return Err(AppError::validation(
            "license_number",
            "license_number must have exactly 11 digits",
        ));
    }

    Ok(raw.to_string())
}

pub fn validate_phone(raw: &str) -> Result<String, AppError> {
    let raw = raw.trim();
    if !PHONE_REGEX.is_match(raw) {
        return Err(AppError::validation(
            "phone",
            "phone must have between 1 and 11 digits",
        ));
    }

    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plate_is_upper_cased() {
        assert_eq!(normalize_plate("abc-1234").unwrap(), "ABC-1234");
    }

    #[test]
    fn malformed_plates_are_rejected() {
        for plate in ["AB-1234", "ABC1234", "ABC-12345", "1BC-1234", ""] {
            assert!(normalize_plate(plate).is_err(), "{plate} should be rejected");
        }
    }

    #[test]
    fn license_needs_exactly_eleven_digits() {
        assert!(validate_license("12345678901").is_ok());
        assert!(validate_license("1234567890").is_err());
        assert!(validate_license("1234567890a").is_err());
    }

    #[test]
    fn phone_is_limited_to_eleven_digits() {
        assert!(validate_phone("11987654321").is_ok());
        assert!(validate_phone("119876543210").is_err());
        assert!(validate_phone("(11) 9876").is_err());
    }
}
