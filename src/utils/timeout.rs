//! Timeout constants and async timeout wrapper.

use std::future::Future;
use std::time::Duration;

use crate::error::{Result, SessionError};

/// Default connection/operation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default client heartbeat interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(5000);

/// Default server status-report interval.
pub const STATUS_INTERVAL: Duration = Duration::from_millis(5000);

/// Default delay between reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Poll interval the heartbeat task uses while disconnected.
pub const DISCONNECTED_POLL: Duration = Duration::from_millis(1000);

/// Run a future under a deadline, mapping expiry to `SessionError::Timeout`.
pub async fn with_timeout<F, T>(fut: F, limit: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(SessionError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expiry_maps_to_timeout_error() {
        let res: Result<()> = with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_millis(10),
        )
        .await;
        assert!(matches!(res, Err(SessionError::Timeout)));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn completion_passes_value_through() {
        let res = with_timeout(async { Ok(7u32) }, Duration::from_secs(1)).await;
        assert_eq!(res.unwrap(), 7);
    }
}
