//! Application setup and server configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Request},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::common::RequestScope;
use crate::config::Config;
use crate::domains::auth::AuthService;
use crate::kernel::CredentialStore;
use crate::server::graphql::{create_schema, GraphQLContext};
use crate::server::middleware::auth_middleware;
use crate::server::routes::{graphql_handler, graphql_playground, health_handler};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state
#[derive(Clone)]
pub struct AxumAppState {
    pub auth: Arc<AuthService>,
    pub store: Arc<dyn CredentialStore>,
    pub config: Arc<Config>,
}

/// Middleware to create GraphQLContext per-request
async fn create_graphql_context(
    Extension(state): Extension<AxumAppState>,
    mut request: Request,
    next: Next,
) -> Response {
    // Scope populated by auth_middleware; anonymous requests get a fresh one
    let scope = request
        .extensions()
        .get::<RequestScope>()
        .cloned()
        .unwrap_or_default();

    let context = GraphQLContext::new(state.auth.clone(), scope);
    request.extensions_mut().insert(context);

    next.run(request).await
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

/// Build the Axum application router
pub fn build_app(state: AxumAppState) -> Router {
    // Create GraphQL schema (singleton)
    let schema = Arc::new(create_schema());

    let mut router = Router::new().route("/graphql", post(graphql_handler));

    if state.config.enable_playground {
        router = router.route("/graphql/playground", get(graphql_playground));
    }

    router
        .route("/health", get(health_handler))
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(middleware::from_fn(create_graphql_context))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(Extension(state.clone()))
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        // State (schema for GraphQL handlers)
        .with_state(schema)
}
