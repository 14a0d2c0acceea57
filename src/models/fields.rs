use uuid::Uuid;

use crate::error::AppError;

pub const MAX_TEXT_LEN: usize = 255;

/// Trims `value` and rejects it when blank or longer than `max_len` characters.
pub fn required_text(field: &'static str, value: &str, max_len: usize) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::validation(field, format!("{field} is required")));
    }

    check_len(field, value, max_len)?;
    Ok(value.to_string())
}

/// Like [`required_text`], but a missing or blank value is `None`.
pub fn optional_text(
    field: &'static str,
    value: Option<&str>,
    max_len: usize,
) -> Result<Option<String>, AppError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => {
            check_len(field, value, max_len)?;
            Ok(Some(value.to_string()))
        }
    }
}

pub fn parse_id(field: &'static str, raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::validation(field, format!("{field} must be a valid UUID")))
}

fn check_len(field: &'static str, value: &str, max_len: usize) -> Result<(), AppError> {
    if value.chars().count() > max_len {
        return Err(AppError::validation(
            field,
            format!("{field} must be at most {max_len} characters"),
        ));
    }

    Ok(())
}
