//! API key extractor for the `AGINGOS_AUTH_MODE=api_key` path.

use std::sync::Arc;

use agingos_domain::DomainError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use agingos_config::AuthMode;

use crate::AppState;

/// Extractor that enforces `x-api-key` against `AppConfig::api_keys` when
/// the server is running in `api_key` auth mode. A no-op when auth is off.
pub struct ApiKey;

impl FromRequestParts<Arc<AppState>> for ApiKey {
    type Rejection = DomainError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if state.config.auth_mode == AuthMode::Off {
            return Ok(Self);
        }

        let provided = parts
            .headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| DomainError::Unauthorized("missing x-api-key header".to_string()))?;

        if !state.config.api_keys.iter().any(|key| key == provided) {
            return Err(DomainError::Unauthorized("invalid api key".to_string()));
        }

        Ok(Self)
    }
}
