pub mod role;
pub mod user;

pub use role::{Role, Roles, UnknownRole};
pub use user::User;
