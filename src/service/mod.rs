//! # Lifecycle Managers
//!
//! The two role-specific managers built on the transport boundary:
//! [`client::SessionClient`] drives one outbound connection through
//! connect, key exchange, heartbeat, and reconnection;
//! [`server::SessionServer`] accepts many connections, issues their
//! session keys, and routes their traffic.

pub mod client;
pub mod server;

use tracing::warn;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};

pub use client::{ClientEvent, ClientHandle, ClientPhase, SessionClient};
pub use server::{ServerEvent, SessionServer};

/// Reject hard configuration errors; advisory entries are logged only.
pub(crate) fn check_config(config: &SessionConfig) -> Result<()> {
    let (warnings, errors): (Vec<String>, Vec<String>) = config
        .validate()
        .into_iter()
        .partition(|entry| entry.starts_with("WARNING:"));

    for warning in &warnings {
        warn!("{warning}");
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SessionError::Config(format!(
            "Configuration validation failed:\n  - {}",
            errors.join("\n  - ")
        )))
    }
}
