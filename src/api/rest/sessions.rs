use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::rest::extract::ApiJson;
use crate::auth::AuthDriver;
use crate::error::AppError;
use crate::models::driver::{normalize_plate, validate_license, Driver};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(session))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub license_number: String,
    pub vehicle_plate: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub access_token: String,
    pub driver: Driver,
}

async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let license_number = validate_license(&payload.license_number)?;
    let vehicle_plate = normalize_plate(&payload.vehicle_plate)?;

    let driver = state
        .store
        .read()?
        .driver_by_credentials(&license_number, &vehicle_plate)
        .cloned();
    let Some(driver) = driver else {
        warn!("login attempt with unknown credentials");
        return Err(AppError::Unauthorized(
            "invalid license number or vehicle plate".to_string(),
        ));
    };

    let access_token = state.tokens.issue(driver.id)?;
    info!(driver_id = %driver.id, "driver logged in");

    Ok(Json(SessionResponse {
        access_token,
        driver,
    }))
}

async fn logout(
    auth: AuthDriver,
    State(state): State<Arc<AppState>>,
) -> Json<Value> {
    state.tokens.revoke(&auth.claims);
    info!(driver_id = %auth.driver_id, "driver logged out");

    Json(json!({ "message": "logged out" }))
}

/// Confirms the caller's token and hands back a fresh one.
async fn session(
    auth: AuthDriver,
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionResponse>, AppError> {
    let driver = state
        .store
        .read()?
        .driver(auth.driver_id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("driver {} not found", auth.driver_id)))?;

    Ok(Json(SessionResponse {
        access_token: state.tokens.issue(driver.id)?,
        driver,
    }))
}
