use chrono::Utc;
use rand::{CryptoRng, RngCore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::order_code::OrderCodeGenerator;
use crate::error::AppError;
use crate::models::delivery::{Delivery, DeliveryStatus, OrderCode};
use crate::models::fields::{optional_text, required_text, MAX_TEXT_LEN};
use crate::observability::metrics::Metrics;
use crate::store::{Store, Tables};

/// Insert attempts made when a generated code loses the race on insert.
pub const MAX_INSERT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub driver_id: Uuid,
    pub address: String,
    pub client_name: String,
    pub notes: Option<String>,
}

impl NewDelivery {
    pub fn new(
        driver_id: Uuid,
        address: &str,
        client_name: &str,
        notes: Option<&str>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            driver_id,
            address: required_text("address", address, MAX_TEXT_LEN)?,
            client_name: required_text("client_name", client_name, MAX_TEXT_LEN)?,
            notes: optional_text("notes", notes, MAX_TEXT_LEN)?,
        })
    }
}

pub fn create_delivery(
    store: &Store,
    metrics: &Metrics,
    new: &NewDelivery,
) -> Result<Delivery, AppError> {
    create_delivery_with(
        store,
        metrics,
        &mut OrderCodeGenerator::new(),
        |tables, code| tables.order_code_taken(code),
        new,
    )
}

/// Creates a `Pending` delivery with a fresh order code.
///
/// `is_taken` is the advisory pre-check consulted while drawing codes; the
/// unique index on insert has the final word. A unique violation is retried
/// with a new code up to [`MAX_INSERT_ATTEMPTS`] times.
pub fn create_delivery_with<R, F>(
    store: &Store,
    metrics: &Metrics,
    generator: &mut OrderCodeGenerator<R>,
    mut is_taken: F,
    new: &NewDelivery,
) -> Result<Delivery, AppError>
where
    R: RngCore + CryptoRng,
    F: FnMut(&Tables, &OrderCode) -> bool,
{
    let mut attempt = 1;
    loop {
        match insert_once(store, metrics, generator, &mut is_taken, new) {
            Err(err) if err.is_retryable() && attempt < MAX_INSERT_ATTEMPTS => {
                warn!(attempt, driver_id = %new.driver_id, "order code collided on insert; retrying");
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn insert_once<R, F>(
    store: &Store,
    metrics: &Metrics,
    generator: &mut OrderCodeGenerator<R>,
    is_taken: &mut F,
    new: &NewDelivery,
) -> Result<Delivery, AppError>
where
    R: RngCore + CryptoRng,
    F: FnMut(&Tables, &OrderCode) -> bool,
{
    let mut tx = store.begin()?;

    if tx.driver(new.driver_id).is_none() {
        return Err(AppError::NotFound(format!(
            "driver {} not found",
            new.driver_id
        )));
    }

    let (order_code, attempts) = match generator.generate(|code| is_taken(&*tx, code)) {
        Ok(generated) => generated,
        Err(err) => {
            metrics.order_code_exhausted_total.inc();
            return Err(err);
        }
    };
    metrics.order_code_attempts.observe(f64::from(attempts));

    let now = Utc::now();
    let delivery = tx.insert_delivery(Delivery {
        id: Uuid::new_v4(),
        driver_id: new.driver_id,
        address: new.address.clone(),
        order_code,
        client_name: new.client_name.clone(),
        status: DeliveryStatus::Pending,
        recipient_name: None,
        reason: None,
        notes: new.notes.clone(),
        proof_photo: None,
        created_at: now,
        updated_at: now,
    })?;
    tx.commit();

    info!(
        delivery_id = %delivery.id,
        driver_id = %delivery.driver_id,
        order_code = %delivery.order_code,
        "delivery created"
    );

    Ok(delivery)
}
