//! Symmetric cipher seam for payload encryption.
//!
//! The session layer treats the cipher as an external primitive with a
//! narrow contract: `encrypt(bytes, key, iv)`, `decrypt(bytes, key, iv)`,
//! and `generate_key()`. The implementation here is XChaCha20-Poly1305 with
//! an explicit per-connection `(key, iv)` pair, where the IV doubles as the
//! cipher nonce.
//!
//! A documented default key/IV pair ([`BOOTSTRAP_KEY`], [`BOOTSTRAP_IV`])
//! exists solely to wrap the pre-session `KeyExchange` frame: the server
//! encrypts freshly generated key material under it so a client that has
//! no session key yet can complete the handshake. It provides obfuscation
//! of the bootstrap frame, not secrecy against an attacker who has read
//! this source; deployments needing stronger bootstrap trust should front
//! the transport with TLS.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::XChaCha20Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, SessionError};

/// Symmetric key length in bytes.
pub const KEY_LEN: usize = 32;

/// IV (nonce) length in bytes.
pub const IV_LEN: usize = 24;

/// Well-known key for the pre-session KeyExchange bootstrap frame.
pub const BOOTSTRAP_KEY: [u8; KEY_LEN] = [
    0x53, 0x45, 0x53, 0x53, 0x49, 0x4F, 0x4E, 0x2D, 0x42, 0x4F, 0x4F, 0x54, 0x53, 0x54, 0x52,
    0x41, 0x50, 0x2D, 0x4B, 0x45, 0x59, 0x2D, 0x56, 0x31, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55,
    0x66, 0x77,
];

/// Well-known IV for the pre-session KeyExchange bootstrap frame.
pub const BOOTSTRAP_IV: [u8; IV_LEN] = [
    0x42, 0x4F, 0x4F, 0x54, 0x2D, 0x49, 0x56, 0x2D, 0x56, 0x31, 0x00, 0x01, 0x02, 0x03, 0x04,
    0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D,
];

/// Per-connection symmetric key material.
///
/// Generated fresh by the server for every new connection, transmitted once
/// via a KeyExchange frame, and replaced whenever the connection errors or
/// disconnects. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    pub key: [u8; KEY_LEN],
    pub iv: [u8; IV_LEN],
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material never reaches logs.
        f.debug_struct("SessionKey").finish_non_exhaustive()
    }
}

impl SessionKey {
    /// Generate fresh random key material from the OS RNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    /// The bootstrap key pair used before any session key exists.
    pub fn bootstrap() -> Self {
        Self {
            key: BOOTSTRAP_KEY,
            iv: BOOTSTRAP_IV,
        }
    }
}

/// Encrypt `data` under the given key/IV pair.
pub fn encrypt(data: &[u8], key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(iv.into(), data)
        .map_err(|_| SessionError::EncryptionFailure)
}

/// Decrypt `data` under the given key/IV pair.
pub fn decrypt(data: &[u8], key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(iv.into(), data)
        .map_err(|_| SessionError::DecryptionFailure)
}
