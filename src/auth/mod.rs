use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Driver id.
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and validates HS256 bearer tokens.
///
/// Logged-out tokens are kept in an in-process revocation cache keyed by
/// `jti` until they would have expired anyway.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
    revoked: DashMap<String, i64>,
}

impl TokenService {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::hours(ttl_hours),
            revoked: DashMap::new(),
        }
    }

    pub fn issue(&self, driver_id: Uuid) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: driver_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| AppError::Internal(format!("failed to sign token: {err}")))
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| {
                debug!(error = %err, "bearer token rejected");
                AppError::Unauthorized("invalid or expired token".to_string())
            })?
            .claims;

        if self.revoked.contains_key(&claims.jti) {
            return Err(AppError::Unauthorized("token has been revoked".to_string()));
        }

        Ok(claims)
    }

    pub fn revoke(&self, claims: &Claims) {
        let now = Utc::now().timestamp();
        self.revoked.retain(|_, exp| *exp > now);
        self.revoked.insert(claims.jti.clone(), claims.exp);
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }
}

/// The authenticated driver behind a request's bearer token.
#[derive(Debug, Clone)]
pub struct AuthDriver {
    pub driver_id: Uuid,
    pub claims: Claims,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthDriver {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

        let claims = state.tokens.validate(token)?;
        let driver_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AppError::Unauthorized("invalid token subject".to_string()))?;

        if state.store.read()?.driver(driver_id).is_none() {
            warn!(%driver_id, "token presented for a driver that no longer exists");
            return Err(AppError::Unauthorized("driver no longer exists".to_string()));
        }

        Ok(Self { driver_id, claims })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_validates_to_its_driver() {
        let tokens = TokenService::new("test-secret", 1);
        let driver_id = Uuid::new_v4();

        let claims = tokens.validate(&tokens.issue(driver_id).unwrap()).unwrap();

        assert_eq!(claims.sub, driver_id.to_string());
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn each_token_gets_its_own_jti() {
        let tokens = TokenService::new("test-secret", 1);
        let driver_id = Uuid::new_v4();

        let a = tokens.validate(&tokens.issue(driver_id).unwrap()).unwrap();
        let b = tokens.validate(&tokens.issue(driver_id).unwrap()).unwrap();

        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn revoked_token_is_rejected_but_siblings_are_not() {
        let tokens = TokenService::new("test-secret", 1);
        let driver_id = Uuid::new_v4();
        let revoked = tokens.issue(driver_id).unwrap();
        let kept = tokens.issue(driver_id).unwrap();

        tokens.revoke(&tokens.validate(&revoked).unwrap());

        assert!(matches!(
            tokens.validate(&revoked),
            Err(AppError::Unauthorized(_))
        ));
        assert!(tokens.validate(&kept).is_ok());
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let issuer = TokenService::new("secret-a", 1);
        let verifier = TokenService::new("secret-b", 1);

        let token = issuer.issue(Uuid::new_v4()).unwrap();

        assert!(matches!(
            verifier.validate(&token),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = TokenService::new("test-secret", -1);
        let token = tokens.issue(Uuid::new_v4()).unwrap();

        assert!(matches!(
            tokens.validate(&token),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn revocation_prunes_expired_entries() {
        let tokens = TokenService::new("test-secret", 1);
        let stale = Claims {
            sub: Uuid::new_v4().to_string(),
            jti: "stale".to_string(),
            iat: 0,
            exp: 1,
        };
        tokens.revoke(&stale);

        let live = tokens.validate(&tokens.issue(Uuid::new_v4()).unwrap()).unwrap();
        tokens.revoke(&live);

        assert_eq!(tokens.revoked_count(), 1);
    }
}
