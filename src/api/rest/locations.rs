use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::api::rest::extract::ApiJson;
use crate::auth::AuthDriver;
use crate::engine::correlation::ingest;
use crate::error::AppError;
use crate::models::fields::parse_id;
use crate::models::location::{
    parse_observed_at, validate_latitude, validate_longitude, LocationPing,
};
use crate::state::AppState;
use crate::store::Tables;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/locations", post(create).get(list))
        .route("/locations/iot", post(ingest_device_ping))
        .route(
            "/locations/:id",
            get(get_one).put(update).delete(delete),
        )
        .route("/locations/delivery/:delivery_id", get(list_for_delivery))
        .route("/locations/driver/:driver_id", get(list_for_driver))
}

#[derive(Deserialize)]
pub struct DevicePingRequest {
    pub driver_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Deserialize)]
pub struct CreatePingRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub driver_id: Option<String>,
    pub delivery_id: Option<String>,
    pub observed_at: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct UpdatePingRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub driver_id: Option<String>,
    pub delivery_id: Option<String>,
    pub observed_at: Option<String>,
}

impl UpdatePingRequest {
    fn is_empty(&self) -> bool {
        self.latitude.is_none()
            && self.longitude.is_none()
            && self.driver_id.is_none()
            && self.delivery_id.is_none()
            && self.observed_at.is_none()
    }
}

/// Device path: the ping names only its driver and is attributed to the
/// driver's active delivery.
async fn ingest_device_ping(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<DevicePingRequest>,
) -> Result<(StatusCode, Json<LocationPing>), AppError> {
    let driver_id = parse_id("driver_id", &payload.driver_id)?;
    let ping = ingest(
        &state.store,
        &state.metrics,
        driver_id,
        payload.latitude,
        payload.longitude,
    )?;

    state.publish_ping(&ping);
    Ok((StatusCode::CREATED, Json(ping)))
}

async fn create(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<CreatePingRequest>,
) -> Result<(StatusCode, Json<LocationPing>), AppError> {
    let now = Utc::now();
    let latitude = validate_latitude(payload.latitude)?;
    let longitude = validate_longitude(payload.longitude)?;
    let observed_at = match payload.observed_at.as_deref() {
        Some(raw) => parse_observed_at(raw)?,
        None => now,
    };

    let mut tx = state.store.begin()?;
    let driver_id = existing_driver(&tx, payload.driver_id.as_deref())?;
    let delivery_id = existing_delivery(&tx, payload.delivery_id.as_deref())?;

    let ping = tx.insert_ping(LocationPing {
        id: Uuid::new_v4(),
        delivery_id,
        driver_id,
        latitude,
        longitude,
        observed_at,
        created_at: now,
        updated_at: now,
    })?;
    tx.commit();

    info!(ping_id = %ping.id, "location ping recorded");
    state.publish_ping(&ping);
    Ok((StatusCode::CREATED, Json(ping)))
}

async fn list(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LocationPing>>, AppError> {
    Ok(Json(state.store.read()?.pings()))
}

async fn get_one(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LocationPing>, AppError> {
    let id = parse_id("id", &id)?;
    let ping = state
        .store
        .read()?
        .ping(id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("location ping {id} not found")))?;

    Ok(Json(ping))
}

async fn list_for_delivery(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
    Path(delivery_id): Path<String>,
) -> Result<Json<Vec<LocationPing>>, AppError> {
    let delivery_id = parse_id("delivery_id", &delivery_id)?;
    let tables = state.store.read()?;
    if tables.delivery(delivery_id).is_none() {
        return Err(AppError::NotFound(format!("delivery {delivery_id} not found")));
    }

    Ok(Json(tables.pings_for_delivery(delivery_id)))
}

async fn list_for_driver(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
) -> Result<Json<Vec<LocationPing>>, AppError> {
    let driver_id = parse_id("driver_id", &driver_id)?;
    let tables = state.store.read()?;
    if tables.driver(driver_id).is_none() {
        return Err(AppError::NotFound(format!("driver {driver_id} not found")));
    }

    Ok(Json(tables.pings_for_driver(driver_id)))
}

async fn update(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<UpdatePingRequest>,
) -> Result<Json<LocationPing>, AppError> {
    let id = parse_id("id", &id)?;
    if payload.is_empty() {
        return Err(AppError::validation(
            "body",
            "at least one field must be provided",
        ));
    }

    let mut tx = state.store.begin()?;
    let mut ping = tx
        .ping(id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("location ping {id} not found")))?;

    if let Some(latitude) = payload.latitude {
        ping.latitude = validate_latitude(latitude)?;
    }
    if let Some(longitude) = payload.longitude {
        ping.longitude = validate_longitude(longitude)?;
    }
    if let Some(observed_at) = payload.observed_at.as_deref() {
        ping.observed_at = parse_observed_at(observed_at)?;
    }
    if payload.driver_id.is_some() {
        ping.driver_id = existing_driver(&tx, payload.driver_id.as_deref())?;
    }
    if payload.delivery_id.is_some() {
        ping.delivery_id = existing_delivery(&tx, payload.delivery_id.as_deref())?;
    }

    let ping = tx.update_ping(ping)?;
    tx.commit();

    info!(ping_id = %ping.id, "location ping updated");
    Ok(Json(ping))
}

async fn delete(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id("id", &id)?;

    let mut tx = state.store.begin()?;
    tx.delete_ping(id)?;
    tx.commit();

    info!(ping_id = %id, "location ping deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn existing_driver(tables: &Tables, raw: Option<&str>) -> Result<Option<Uuid>, AppError> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let driver_id = parse_id("driver_id", raw)?;
    if tables.driver(driver_id).is_none() {
        return Err(AppError::NotFound(format!("driver {driver_id} not found")));
    }

    Ok(Some(driver_id))
}

fn existing_delivery(tables: &Tables, raw: Option<&str>) -> Result<Option<Uuid>, AppError> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let delivery_id = parse_id("delivery_id", raw)?;
    if tables.delivery(delivery_id).is_none() {
        return Err(AppError::NotFound(format!("delivery {delivery_id} not found")));
    }

    Ok(Some(delivery_id))
}
