use tokio::sync::broadcast;

use crate::auth::TokenService;
use crate::config::Config;
use crate::engine::evidence::EvidenceStore;
use crate::error::AppError;
use crate::models::location::LocationPing;
use crate::observability::metrics::Metrics;
use crate::store::Store;

pub struct AppState {
    pub store: Store,
    pub tokens: TokenService,
    pub evidence: EvidenceStore,
    pub ping_events_tx: broadcast::Sender<LocationPing>,
    pub metrics: Metrics,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        config.validate()?;
        let (ping_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);

        Ok(Self {
            store: Store::new(),
            tokens: TokenService::new(&config.jwt_secret, config.token_ttl_hours),
            evidence: EvidenceStore::open(config.evidence_dir.clone())?,
            ping_events_tx,
            metrics: Metrics::new(),
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Fans a freshly stored ping out to websocket subscribers.
    pub fn publish_ping(&self, ping: &LocationPing) {
        // No subscribers is not an error.
        let _ = self.ping_events_tx.send(ping.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_event_buffer_fails_instead_of_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            http_port: 0,
            log_level: "info".to_string(),
            jwt_secret: "test-secret".to_string(),
            token_ttl_hours: 1,
            evidence_dir: dir.path().to_path_buf(),
            max_body_bytes: 1024,
            event_buffer_size: 0,
        };

        assert!(matches!(AppState::new(&config), Err(AppError::Internal(_))));
    }
}
