use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use tracing::info;

use crate::api::rest::extract::{ApiJson, ApiQuery};
use crate::auth::AuthDriver;
use crate::engine::intake::{create_delivery, NewDelivery};
use crate::engine::status::{transition, StatusChange};
use crate::error::AppError;
use crate::models::delivery::{Delivery, OrderCode};
use crate::models::fields::{optional_text, parse_id, required_text, MAX_TEXT_LEN};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", post(create).get(list))
        .route(
            "/deliveries/:id",
            get(get_one).put(update).delete(delete),
        )
        .route("/deliveries/:id/status", put(change_status))
        .route("/deliveries/driver/:driver_id", get(list_for_driver))
        .route("/deliveries/code/:order_code", get(track))
}

#[derive(Deserialize)]
pub struct CreateDeliveryRequest {
    pub driver_id: String,
    pub address: String,
    pub client_name: String,
    pub notes: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct UpdateDeliveryRequest {
    pub driver_id: Option<String>,
    pub address: Option<String>,
    pub client_name: Option<String>,
    pub notes: Option<String>,
}

impl UpdateDeliveryRequest {
    fn is_empty(&self) -> bool {
        self.driver_id.is_none()
            && self.address.is_none()
            && self.client_name.is_none()
            && self.notes.is_none()
    }
}

#[derive(Deserialize, Default)]
pub struct DeleteParams {
    #[serde(default)]
    pub cascade: bool,
}

async fn create(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<CreateDeliveryRequest>,
) -> Result<(StatusCode, Json<Delivery>), AppError> {
    let new = NewDelivery::new(
        parse_id("driver_id", &payload.driver_id)?,
        &payload.address,
        &payload.client_name,
        payload.notes.as_deref(),
    )?;

    let delivery = create_delivery(&state.store, &state.metrics, &new)?;
    Ok((StatusCode::CREATED, Json(delivery)))
}

async fn list(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Delivery>>, AppError> {
    Ok(Json(state.store.read()?.deliveries()))
}

async fn get_one(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Delivery>, AppError> {
    let id = parse_id("id", &id)?;
    let delivery = state
        .store
        .read()?
        .delivery(id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))?;

    Ok(Json(delivery))
}

async fn list_for_driver(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
) -> Result<Json<Vec<Delivery>>, AppError> {
    let driver_id = parse_id("driver_id", &driver_id)?;
    let tables = state.store.read()?;
    if tables.driver(driver_id).is_none() {
        return Err(AppError::NotFound(format!("driver {driver_id} not found")));
    }

    Ok(Json(tables.deliveries_for_driver(driver_id)))
}

/// Public tracking lookup by order code.
async fn track(
    State(state): State<Arc<AppState>>,
    Path(order_code): Path<String>,
) -> Result<Json<Delivery>, AppError> {
    let order_code = OrderCode::parse(&order_code.trim().to_ascii_uppercase())?;
    let delivery = state
        .store
        .read()?
        .delivery_by_code(&order_code)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("no delivery with order code {order_code}")))?;

    Ok(Json(delivery))
}

async fn update(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<UpdateDeliveryRequest>,
) -> Result<Json<Delivery>, AppError> {
    let id = parse_id("id", &id)?;
    if payload.is_empty() {
        return Err(AppError::validation(
            "body",
            "at least one field must be provided",
        ));
    }

    let mut tx = state.store.begin()?;
    let mut delivery = tx
        .delivery(id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))?;

    if let Some(driver_id) = &payload.driver_id {
        let driver_id = parse_id("driver_id", driver_id)?;
        if tx.driver(driver_id).is_none() {
            return Err(AppError::NotFound(format!("driver {driver_id} not found")));
        }
        delivery.driver_id = driver_id;
    }
    if let Some(address) = &payload.address {
        delivery.address = required_text("address", address, MAX_TEXT_LEN)?;
    }
    if let Some(client_name) = &payload.client_name {
        delivery.client_name = required_text("client_name", client_name, MAX_TEXT_LEN)?;
    }
    if payload.notes.is_some() {
        delivery.notes = optional_text("notes", payload.notes.as_deref(), MAX_TEXT_LEN)?;
    }

    let delivery = tx.update_delivery(delivery)?;
    tx.commit();

    info!(delivery_id = %delivery.id, "delivery updated");
    Ok(Json(delivery))
}

async fn change_status(
    auth: AuthDriver,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<StatusChange>,
) -> Result<Json<Delivery>, AppError> {
    let id = parse_id("id", &id)?;

    // Proof decoding and the fsync'd write stay off the async workers.
    let delivery = tokio::task::spawn_blocking(move || {
        transition(
            &state.store,
            &state.evidence,
            &state.metrics,
            auth.driver_id,
            id,
            &payload,
        )
    })
    .await
    .map_err(|err| AppError::Internal(format!("status change task failed: {err}")))??;

    Ok(Json(delivery))
}

async fn delete(
    _auth: AuthDriver,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiQuery(params): ApiQuery<DeleteParams>,
) -> Result<StatusCode, AppError> {
    let id = parse_id("id", &id)?;

    let mut tx = state.store.begin()?;
    let removed_pings = tx.delete_delivery(id, params.cascade)?;
    tx.commit();

    info!(delivery_id = %id, removed_pings, "delivery deleted");
    Ok(StatusCode::NO_CONTENT)
}
