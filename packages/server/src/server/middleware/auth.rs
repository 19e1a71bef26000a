use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::common::RequestScope;
use crate::domains::auth::User;
use crate::server::app::AxumAppState;

/// Authenticated user resolved from the bearer token
#[derive(Clone, Debug)]
pub struct AuthUser(pub User);

/// Bearer authentication middleware
///
/// Requests without a bearer token continue anonymously. A token that fails
/// verification, or whose subject cannot be resolved, ends the request with
/// 403. On success the user is added to request extensions together with a
/// [`RequestScope`] carrying it.
pub async fn auth_middleware(
    State(state): State<AxumAppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        debug!("No bearer token");
        return next.run(request).await;
    };

    let scope = RequestScope::new();
    let subject = match state.auth.validate_token(&scope, &token).await {
        Ok(subject) => subject,
        Err(e) => {
            debug!(error = %e, "Token rejected");
            return forbidden("invalid token");
        }
    };

    let user = match state.auth.get_user_by_id(&scope, &subject).await {
        Ok(user) => user,
        Err(e) => {
            warn!(subject = %subject, error = %e, "Cannot resolve token subject");
            return forbidden("invalid user token");
        }
    };

    debug!(email = %user.email, roles = %user.roles, "Authenticated user");
    request.extensions_mut().insert(AuthUser(user.clone()));
    request.extensions_mut().insert(scope.with_identity(user));

    next.run(request).await
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn forbidden(message: &str) -> Response {
    (StatusCode::FORBIDDEN, Json(json!({ "error": message }))).into_response()
}
