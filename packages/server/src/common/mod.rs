// Common types and utilities shared across the application

pub mod logging;
pub mod scope;

pub use logging::{init_tracing, LogErr};
pub use scope::{RequestScope, ScopeError};
