//! Per-connection session state.

pub mod key_store;

pub use key_store::{SessionKeyStore, DEFAULT_SESSION_TTL};
