use std::sync::Arc;

use crate::common::RequestScope;
use crate::domains::auth::{AuthService, User};

/// GraphQL request context
///
/// Shared auth service plus the per-request scope built by the auth
/// middleware.
#[derive(Clone)]
pub struct GraphQLContext {
    pub auth: Arc<AuthService>,
    pub scope: RequestScope,
}

impl juniper::Context for GraphQLContext {}

impl GraphQLContext {
    pub fn new(auth: Arc<AuthService>, scope: RequestScope) -> Self {
        Self { auth, scope }
    }

    /// The authenticated caller, if any.
    pub fn identity(&self) -> Option<&User> {
        self.scope.identity()
    }
}
