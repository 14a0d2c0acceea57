use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::rest::extract::ApiQuery;
use crate::models::location::LocationPing;
use crate::state::AppState;

#[derive(Deserialize, Default)]
pub struct StreamParams {
    /// Only forward pings from this driver.
    pub driver_id: Option<Uuid>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<StreamParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.driver_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, driver_filter: Option<Uuid>) {
    let (sender, receiver) = socket.split();
    let rx = state.ping_events_tx.subscribe();

    info!(driver_filter = ?driver_filter, "websocket client connected");
    run_session(sender, receiver, rx, driver_filter).await;
    info!("websocket client disconnected");
}

/// Forwards pings to `sender` until either side finishes, then aborts the
/// other half so no task outlives the session.
async fn run_session<S, R>(
    mut sender: S,
    mut receiver: R,
    mut rx: broadcast::Receiver<LocationPing>,
    driver_filter: Option<Uuid>,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
{
    let mut send_task = tokio::spawn(async move {
        loop {
            let ping = match rx.recv().await {
                Ok(ping) => ping,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket client lagging; pings dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if driver_filter.is_some_and(|id| ping.driver_id != Some(id)) {
                continue;
            }

            let json = match serde_json::to_string(&ping) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize location ping for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}
