use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::delivery::Delivery;
use crate::models::location::{validate_latitude, validate_longitude, LocationPing};
use crate::observability::metrics::Metrics;
use crate::store::{Store, Tables};

/// The delivery an anonymous ping from `driver_id` belongs to: the most
/// recently updated one in `InTransit`, `NotDelivered` or `Delivered`.
///
/// A driver with two deliveries in progress gets every ping attributed to
/// whichever was touched last.
pub fn active_delivery(tables: &Tables, driver_id: Uuid) -> Option<&Delivery> {
    tables
        .deliveries_of_driver(driver_id)
        .filter(|d| d.status.is_active())
        .max_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        })
}

/// Stores a device ping for `driver_id`, attached to their active delivery
/// when there is one.
pub fn ingest(
    store: &Store,
    metrics: &Metrics,
    driver_id: Uuid,
    latitude: f64,
    longitude: f64,
) -> Result<LocationPing, AppError> {
    let latitude = validate_latitude(latitude)?;
    let longitude = validate_longitude(longitude)?;

    let mut tx = store.begin()?;
    if tx.driver(driver_id).is_none() {
        warn!(%driver_id, "location ping from unknown driver");
        return Err(AppError::NotFound(format!("driver {driver_id} not found")));
    }

    let delivery_id = active_delivery(&tx, driver_id).map(|d| d.id);
    let now = Utc::now();
    let ping = tx.insert_ping(LocationPing {
        id: Uuid::new_v4(),
        delivery_id,
        driver_id: Some(driver_id),
        latitude,
        longitude,
        observed_at: now,
        created_at: now,
        updated_at: now,
    })?;
    tx.commit();

    let correlation = if delivery_id.is_some() {
        "attached"
    } else {
        "unattached"
    };
    metrics
        .pings_ingested_total
        .with_label_values(&[correlation])
        .inc();

    debug!(
        ping_id = %ping.id,
        %driver_id,
        delivery_id = ?delivery_id,
        "location ping ingested"
    );

    Ok(ping)
}
