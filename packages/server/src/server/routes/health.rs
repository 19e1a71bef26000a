use std::time::Duration;

use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::common::RequestScope;
use crate::server::app::AxumAppState;

const PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    auth_backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Health check endpoint
///
/// Pings the credential store. Returns 200 OK when it answers in time,
/// 503 Service Unavailable otherwise.
pub async fn health_handler(
    Extension(state): Extension<AxumAppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let scope = RequestScope::new().with_timeout(PING_TIMEOUT);
    let error = match state.store.ping(&scope).await {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Health check ping failed");
            Some(e.to_string())
        }
    };

    let status_code = if error.is_none() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if error.is_none() { "healthy" } else { "unhealthy" }.to_string(),
            version: state.config.version.clone(),
            auth_backend: state.auth.provider_name().to_string(),
            error,
        }),
    )
}
