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
use crate::error::AppError;
use crate::models::driver::{normalize_plate, validate_license, validate_phone, Driver};
use crate::models::fields::{parse_id, required_text, MAX_TEXT_LEN};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route(
            "/drivers/:id",
            get(get_driver).put(update_driver).delete(delete_driver),
        )
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub name: String,
    pub vehicle_plate: String,
    pub license_number: String,
    pub phone: String,
}

#[derive(Deserialize, Default)]
pub struct UpdateDriverRequest {
    pub name: Option<String>,
    pub vehicle_plate: Option<String>,
    pub license_number: Option<String>,
    pub phone: Option<String>,
}

impl UpdateDriverRequest {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.vehicle_plate.is_none()
            && self.license_number.is_none()
            && self.phone.is_none()
    }
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<CreateDriverRequest>,
) -> Result<(StatusCode, Json<Driver>), AppError> {
    let now = Utc::now();
    let driver = Driver {
        id: Uuid::new_v4(),
        name: required_text("name", &payload.name, MAX_TEXT_LEN)?,
        vehicle_plate: normalize_plate(&payload.vehicle_plate)?,
        license_number: validate_license(&payload.license_number)?,
        phone: validate_phone(&payload.phone)?,
        created_at: now,
        updated_at: now,
    };

    let mut tx = state.store.begin()?;
    let driver = tx.insert_driver(driver)?;
    tx.commit();

    info!(driver_id = %driver.id, "driver registered");
    Ok((StatusCode::CREATED, Json(driver)))
}

async fn list_drivers(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Driver>>, AppError> {
    Ok(Json(state.store.read()?.drivers()))
}

async fn get_driver(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Driver>, AppError> {
    let id = parse_id("id", &id)?;
    let driver = state
        .store
        .read()?
        .driver(id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    Ok(Json(driver))
}

async fn update_driver(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<UpdateDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    let id = parse_id("id", &id)?;
    if payload.is_empty() {
        return Err(AppError::validation(
            "body",
            "at least one field must be provided",
        ));
    }

    let mut tx = state.store.begin()?;
    let mut driver = tx
        .driver(id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    if let Some(name) = &payload.name {
        driver.name = required_text("name", name, MAX_TEXT_LEN)?;
    }
    if let Some(plate) = &payload.vehicle_plate {
        driver.vehicle_plate = normalize_plate(plate)?;
    }
    if let Some(license) = &payload.license_number {
        driver.license_number = validate_license(license)?;
    }
    if let Some(phone) = &payload.phone {
        driver.phone = validate_phone(phone)?;
    }

    let driver = tx.update_driver(driver)?;
    tx.commit();

    info!(driver_id = %driver.id, "driver updated");
    Ok(Json(driver))
}

async fn delete_driver(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id("id", &id)?;

    let mut tx = state.store.begin()?;
    let removed_deliveries = tx.delete_driver(id)?;
    tx.commit();

    info!(driver_id = %id, removed_deliveries, "driver deleted");
    Ok(StatusCode::NO_CONTENT)
}
