//! # Session Key Store
//!
//! Per-connection record of the negotiated symmetric key, with a sliding
//! expiration so abandoned entries do not accumulate.
//!
//! ## Semantics
//! - **Sliding TTL**: every read or write that touches an entry refreshes
//!   its expiration, so active sessions never expire mid-use. The default
//!   window is 24 hours of inactivity ([`DEFAULT_SESSION_TTL`]).
//! - **Linearizable per key**: all operations go through one async mutex,
//!   which serializes concurrent access from independent connection tasks.
//! - **Anonymous fallback**: the encrypt/decrypt helpers fall back to the
//!   bootstrap cipher when no key is stored for an id, which covers
//!   pre-handshake traffic and operation with encryption disabled.
//!
//! Expired entries are evicted lazily on lookup and swept during mutation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::crypto::{self, SessionKey};
use crate::error::Result;

/// Default sliding-expiration window: 24 hours of inactivity.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
struct KeyEntry {
    key: SessionKey,
    /// Last access; the expiration window slides from here.
    touched_at: Instant,
}

impl KeyEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.touched_at.elapsed() > ttl
    }
}

/// Thread-safe store mapping connection ids to session keys.
#[derive(Clone)]
pub struct SessionKeyStore {
    ttl: Duration,
    inner: Arc<Mutex<HashMap<String, KeyEntry>>>,
}

impl Default for SessionKeyStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl SessionKeyStore {
    /// Create a store with a custom inactivity window.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Look up the key for a connection, refreshing its expiration.
    pub async fn get(&self, id: &str) -> Option<SessionKey> {
        let mut inner = self.inner.lock().await;
        match inner.get_mut(id) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                entry.touched_at = Instant::now();
                Some(entry.key.clone())
            }
            Some(_) => {
                // Lazy eviction of an entry that idled past the window.
                inner.remove(id);
                trace!(id, "Expired session key evicted on lookup");
                None
            }
            None => None,
        }
    }

    /// Insert or replace the key for a connection.
    pub async fn set(&self, id: impl Into<String>, key: SessionKey) {
        let mut inner = self.inner.lock().await;
        self.sweep(&mut inner);
        let id = id.into();
        inner.insert(
            id.clone(),
            KeyEntry {
                key,
                touched_at: Instant::now(),
            },
        );
        trace!(id, count = inner.len(), "Session key stored");
    }

    /// Remove the key for a connection.
    pub async fn delete(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if inner.remove(id).is_some() {
            debug!(id, "Session key removed");
        }
    }

    /// Extend the expiration of an entry without reading its key.
    pub async fn touch(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.get_mut(id) {
            entry.touched_at = Instant::now();
        }
    }

    /// Snapshot of all live connection ids.
    pub async fn list_ids(&self) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        self.sweep(&mut inner);
        inner.keys().cloned().collect()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let mut inner = self.inner.lock().await;
        self.sweep(&mut inner);
        inner.len()
    }

    /// Whether the store holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop all entries.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        let count = inner.len();
        inner.clear();
        debug!(cleared = count, "Session key store cleared");
    }

    /// Encrypt outbound payload bytes for a connection.
    ///
    /// Uses the stored session key when one exists (touching its
    /// expiration), the bootstrap cipher otherwise. With `encrypted` false
    /// the bytes pass through untouched.
    pub async fn encrypt_for(&self, id: &str, data: &[u8], encrypted: bool) -> Result<Vec<u8>> {
        if !encrypted {
            return Ok(data.to_vec());
        }
        let key = self.get(id).await.unwrap_or_else(SessionKey::bootstrap);
        crypto::encrypt(data, &key.key, &key.iv)
    }

    /// Decrypt inbound payload bytes from a connection.
    ///
    /// Mirror of [`encrypt_for`](Self::encrypt_for).
    pub async fn decrypt_for(&self, id: &str, data: &[u8], encrypted: bool) -> Result<Vec<u8>> {
        if !encrypted {
            return Ok(data.to_vec());
        }
        let key = self.get(id).await.unwrap_or_else(SessionKey::bootstrap);
        crypto::decrypt(data, &key.key, &key.iv)
    }

    /// Drop every expired entry (called with the lock held).
    fn sweep(&self, inner: &mut HashMap<String, KeyEntry>) {
        let ttl = self.ttl;
        let before = inner.len();
        inner.retain(|_, entry| !entry.is_expired(ttl));
        let removed = before - inner.len();
        if removed > 0 {
            debug!(removed, remaining = inner.len(), "Expired session keys swept");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn set_then_get_returns_key() {
        let store = SessionKeyStore::default();
        let key = SessionKey::generate();

        store.set("conn-1", key.clone()).await;
        assert_eq!(store.get("conn-1").await.unwrap(), key);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = SessionKeyStore::default();
        store.set("conn-1", SessionKey::generate()).await;
        store.delete("conn-1").await;
        assert!(store.get("conn-1").await.is_none());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn set_after_delete_recreates() {
        let store = SessionKeyStore::default();
        store.set("conn-1", SessionKey::generate()).await;
        store.delete("conn-1").await;

        let fresh = SessionKey::generate();
        store.set("conn-1", fresh.clone()).await;
        assert_eq!(store.get("conn-1").await.unwrap(), fresh);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn touch_preserves_stored_key() {
        let store = SessionKeyStore::default();
        let key = SessionKey::generate();
        store.set("conn-1", key.clone()).await;
        store.touch("conn-1").await;
        assert_eq!(store.get("conn-1").await.unwrap(), key);
    }

    #[tokio::test]
    async fn idle_entries_expire() {
        let store = SessionKeyStore::new(Duration::from_millis(20));
        store.set("conn-1", SessionKey::generate()).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("conn-1").await.is_none());
        assert!(store.list_ids().await.is_empty());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn encrypt_helpers_fall_back_to_bootstrap() {
        let store = SessionKeyStore::default();

        // No key stored: both sides of the bootstrap cipher line up.
        let ciphertext = store.encrypt_for("unknown", b"hello", true).await.unwrap();
        let plaintext = store.decrypt_for("unknown", &ciphertext, true).await.unwrap();
        assert_eq!(plaintext, b"hello");

        // With a stored key the bootstrap cipher no longer matches.
        store.set("keyed", SessionKey::generate()).await;
        let keyed_ct = store.encrypt_for("keyed", b"hello", true).await.unwrap();
        assert_ne!(keyed_ct, ciphertext);
        assert!(store.decrypt_for("unknown", &keyed_ct, true).await.is_err());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn encryption_disabled_passes_through() {
        let store = SessionKeyStore::default();
        let out = store.encrypt_for("any", b"plain", false).await.unwrap();
        assert_eq!(out, b"plain");
    }

    #[tokio::test]
    async fn concurrent_access_is_safe() {
        let store = SessionKeyStore::default();
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..32 {
            let store = store.clone();
            tasks.spawn(async move {
                let id = format!("conn-{i}");
                store.set(id.clone(), SessionKey::generate()).await;
                assert!(store.get(&id).await.is_some());
                store.delete(&id).await;
            });
        }
        while let Some(res) = tasks.join_next().await {
            assert!(res.is_ok());
        }
        assert!(store.is_empty().await);
    }
}
