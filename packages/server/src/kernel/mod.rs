//! Kernel module - server infrastructure and dependencies.

pub mod dao;
pub mod deps;
#[cfg(test)]
pub mod test_dependencies;
pub mod traits;

pub use dao::{connect, CredentialStore, DaoError, MemoryDao, PgDao, Released, TxRelease};
pub use deps::{Auth0Adapter, JwksAdapter};
pub use traits::*;
