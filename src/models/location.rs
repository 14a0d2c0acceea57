use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationPing {
    pub id: Uuid,
    pub delivery_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub latitude: f64,
    pub longitude: f64,
    pub observed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn validate_latitude(latitude: f64) -> Result<f64, AppError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(AppError::validation(
            "latitude",
            "latitude must be between -90 and 90",
        ));
    }

    Ok(latitude)
}

pub fn validate_longitude(longitude: f64) -> Result<f64, AppError> {
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(AppError::validation(
            "longitude",
            "longitude must be between -180 and 180",
        ));
    }

    Ok(longitude)
}

/// Accepts RFC 3339 timestamps and naive ISO-8601 ones, which are read as UTC.
pub fn parse_observed_at(raw: &str) -> Result<DateTime<Utc>, AppError> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            AppError::validation("observed_at", "observed_at must be an ISO-8601 timestamp")
        })
}
