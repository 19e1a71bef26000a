//! GraphQL schema definition.

use juniper::{EmptySubscription, FieldError, FieldResult, RootNode};
use tracing::{debug, error, info};

use super::context::GraphQLContext;
use crate::domains::auth::data::{NewUserInput, UserData, UserListData};
use crate::domains::auth::{AuthError, Role, Roles};

/// Client-facing message for failed logins, whatever the cause.
const INVALID_CREDENTIALS: &str = "invalid credentials";

/// Map an auth error to a field error. Token and role failures keep their
/// generic text; backend detail is logged and replaced.
fn to_field_error(e: AuthError) -> FieldError {
    let message = match &e {
        AuthError::Store { .. }
        | AuthError::Remote { .. }
        | AuthError::BackendUnavailable(_)
        | AuthError::Internal(_) => {
            error!(error = %e, "Auth backend failure");
            "internal error".to_string()
        }
        _ => e.to_string(),
    };
    FieldError::new(message, juniper::Value::null())
}

fn forbidden(message: &str) -> FieldError {
    FieldError::new(message, juniper::Value::null())
}

pub struct Query;

#[juniper::graphql_object(context = GraphQLContext)]
impl Query {
    /// All users known to the backend (admin only)
    async fn list_users(ctx: &GraphQLContext) -> FieldResult<UserListData> {
        ctx.auth
            .has_role(&ctx.scope, Role::Admin, || async {
                let (users, total) = ctx
                    .auth
                    .get_users(&ctx.scope)
                    .await
                    .map_err(to_field_error)?;
                Ok(UserListData {
                    users: users.into_iter().map(UserData::from).collect(),
                    total_count: total as i32,
                })
            })
            .await
    }

    async fn get_user(ctx: &GraphQLContext, email: String) -> FieldResult<UserData> {
        ctx.auth
            .has_role(&ctx.scope, Role::User, || async {
                let user = ctx
                    .auth
                    .get_user(&ctx.scope, &email)
                    .await
                    .map_err(to_field_error)?;
                Ok(UserData::from(user))
            })
            .await
    }

    async fn get_user_roles(ctx: &GraphQLContext, email: String) -> FieldResult<Vec<Role>> {
        ctx.auth
            .has_role(&ctx.scope, Role::User, || async {
                let roles = ctx
                    .auth
                    .get_user_roles(&ctx.scope, &email)
                    .await
                    .map_err(to_field_error)?;
                Ok(roles.into())
            })
            .await
    }

    /// The authenticated caller, or null
    fn me(ctx: &GraphQLContext) -> Option<UserData> {
        ctx.identity().cloned().map(UserData::from)
    }
}

async fn create_with_roles(
    ctx: &GraphQLContext,
    input: NewUserInput,
    roles: Roles,
) -> FieldResult<UserData> {
    let user = ctx
        .auth
        .create_user(&ctx.scope, &input.email, &input.display_name, &roles)
        .await
        .map_err(to_field_error)?;

    info!(email = %user.email, roles = %user.roles, "User created");
    Ok(UserData::from(user))
}

pub struct Mutation;

#[juniper::graphql_object(context = GraphQLContext)]
impl Mutation {
    /// Create a user with the `user` role (admin only)
    async fn user_create(ctx: &GraphQLContext, new_user: NewUserInput) -> FieldResult<UserData> {
        ctx.auth
            .has_role(&ctx.scope, Role::Admin, || {
                create_with_roles(ctx, new_user, Roles::from([Role::User]))
            })
            .await
    }

    /// Create a super administrator (super admin only)
    async fn admin_create(ctx: &GraphQLContext, new_user: NewUserInput) -> FieldResult<UserData> {
        ctx.auth
            .has_role(&ctx.scope, Role::SuperAdmin, || {
                create_with_roles(ctx, new_user, Roles::from([Role::SuperAdmin]))
            })
            .await
    }

    /// Replace a user's roles (admin only; granting admin or super admin
    /// needs a super admin)
    async fn user_assign_roles(
        ctx: &GraphQLContext,
        email: String,
        roles: Vec<Role>,
    ) -> FieldResult<Vec<Role>> {
        ctx.auth
            .has_role(&ctx.scope, Role::Admin, || async {
                let caller = ctx
                    .identity()
                    .ok_or_else(|| to_field_error(AuthError::NotAuthorized))?;
                let roles = Roles::from(roles);

                if !caller.has_role(Role::SuperAdmin) {
                    if roles.contains(Role::SuperAdmin) {
                        return Err(forbidden(
                            "only super administrators may grant super admin role",
                        ));
                    }
                    if roles.contains(Role::Admin) {
                        return Err(forbidden("only super administrators may grant admin role"));
                    }
                }

                let confirmed = ctx
                    .auth
                    .assign_roles(&ctx.scope, &email, &roles)
                    .await
                    .map_err(to_field_error)?;
                Ok(confirmed.into())
            })
            .await
    }

    /// Exchange a password for a bearer token
    async fn user_login(
        ctx: &GraphQLContext,
        email: String,
        password: String,
    ) -> FieldResult<String> {
        ctx.auth
            .login(&ctx.scope, &email, &password)
            .await
            .map_err(|e| {
                debug!(email = %email, error = %e, "Login rejected");
                forbidden(INVALID_CREDENTIALS)
            })
    }

    /// Set the caller's own password; an empty password disables password
    /// login
    async fn user_set_password(ctx: &GraphQLContext, password: String) -> FieldResult<bool> {
        ctx.auth
            .has_role(&ctx.scope, Role::User, || async {
                let caller = ctx
                    .identity()
                    .ok_or_else(|| to_field_error(AuthError::NotAuthorized))?;
                ctx.auth
                    .set_password(&ctx.scope, caller, &password)
                    .await
                    .map_err(to_field_error)?;
                Ok(true)
            })
            .await
    }
}

pub type Schema = RootNode<'static, Query, Mutation, EmptySubscription<GraphQLContext>>;

pub fn create_schema() -> Schema {
    Schema::new(Query, Mutation, EmptySubscription::new())
}
