// Budget server - API core
//
// Identity and access control for the personal-budgeting GraphQL backend.
// Pluggable identity backends (remote directory, local credential store,
// in-memory mock) sit behind one auth service; the credential store
// provides scoped transactions over Postgres or memory.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
