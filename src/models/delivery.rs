use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

lazy_static! {
    static ref ORDER_CODE_REGEX: Regex = Regex::new(r"^[A-Z0-9]{6}$").unwrap();
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    Pending,
    InTransit,
    Delivered,
    Cancelled,
    NotDelivered,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 5] = [
        DeliveryStatus::Pending,
        DeliveryStatus::InTransit,
        DeliveryStatus::Delivered,
        DeliveryStatus::Cancelled,
        DeliveryStatus::NotDelivered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "Pending",
            DeliveryStatus::InTransit => "InTransit",
            DeliveryStatus::Delivered => "Delivered",
            DeliveryStatus::Cancelled => "Cancelled",
            DeliveryStatus::NotDelivered => "NotDelivered",
        }
    }

    /// No transition may leave a final status.
    pub fn is_final(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }

    /// Statuses whose deliveries can receive anonymous location pings.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::InTransit | DeliveryStatus::NotDelivered | DeliveryStatus::Delivered
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let status = match raw.trim() {
            "" => return Err(AppError::validation("status", "status is required")),
            "Pending" | "pending" => DeliveryStatus::Pending,
            "InTransit" | "in_transit" => DeliveryStatus::InTransit,
            "Delivered" | "delivered" => DeliveryStatus::Delivered,
            "Cancelled" | "cancelled" => DeliveryStatus::Cancelled,
            "NotDelivered" | "not_delivered" => DeliveryStatus::NotDelivered,
            other => {
                let allowed: Vec<&str> = Self::ALL.iter().map(DeliveryStatus::as_str).collect();
                return Err(AppError::validation(
                    "status",
                    format!("unknown status {other:?}; expected one of {allowed:?}"),
                ));
            }
        };

        Ok(status)
    }
}

/// Public six-character identifier of a delivery, drawn from `A-Z0-9`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderCode(String);

impl OrderCode {
    pub const LEN: usize = 6;

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        if !ORDER_CODE_REGEX.is_match(raw) {
            return Err(AppError::validation(
                "order_code",
                "order_code must be exactly 6 upper-case alphanumeric characters",
            ));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OrderCode {
    type Error = AppError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        OrderCode::parse(&raw)
    }
}

impl From<OrderCode> for String {
    fn from(code: OrderCode) -> Self {
        code.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivery {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub address: String,
    pub order_code: OrderCode,
    pub client_name: String,
    pub status: DeliveryStatus,
    pub recipient_name: Option<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub proof_photo: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
