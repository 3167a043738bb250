//! Application-level message unit.
//!
//! An [`Envelope`] pairs a two-level command classification (main command
//! selects the handler set, sub command is handler-interpreted) with opaque
//! content, a success flag, and an error message. Envelopes are immutable
//! once constructed for send and discarded after dispatch.
//!
//! Wire encoding is bincode; the `content` field itself carries a nested
//! JSON value of an application-chosen type, which the router never
//! inspects.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Application-level message: command pair, opaque content, outcome flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Main command byte; selects the handler set during routing.
    pub main_command: u8,
    /// Sub command byte; interpreted by the handler, not the router.
    pub sub_command: u8,
    /// Nested JSON-serialized content, opaque to the session layer.
    pub content: String,
    /// Whether the operation this message reports succeeded.
    pub success: bool,
    /// Error text accompanying a failed operation, empty otherwise.
    pub error_message: String,
}

impl Envelope {
    /// Build an empty successful envelope for the given command pair.
    pub fn new(main_command: u8, sub_command: u8) -> Self {
        Self {
            main_command,
            sub_command,
            content: String::new(),
            success: true,
            error_message: String::new(),
        }
    }

    /// Attach typed content, serialized to JSON.
    pub fn with_content<T: Serialize>(mut self, content: &T) -> Result<Self> {
        self.content =
            serde_json::to_string(content).map_err(|e| SessionError::SerializeError(e.to_string()))?;
        Ok(self)
    }

    /// Mark the envelope as a failure with the given error text.
    pub fn with_error(mut self, error_message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = error_message.into();
        self
    }

    /// Extract the typed content, if any.
    ///
    /// Returns `None` when the content field is empty.
    pub fn content_as<T: for<'de> Deserialize<'de>>(&self) -> Result<Option<T>> {
        if self.content.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&self.content)
            .map(Some)
            .map_err(|e| SessionError::DeserializeError(e.to_string()))
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn typed_content_roundtrip() {
        let envelope = Envelope::new(0x10, 0x02)
            .with_content(&"payload".to_string())
            .unwrap();
        assert_eq!(
            envelope.content_as::<String>().unwrap(),
            Some("payload".to_string())
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn empty_content_reads_as_none() {
        let envelope = Envelope::new(1, 1);
        assert_eq!(envelope.content_as::<String>().unwrap(), None);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn error_envelope_carries_message() {
        let envelope = Envelope::new(2, 0).with_error("lookup failed");
        assert!(!envelope.success);
        assert_eq!(envelope.error_message, "lookup failed");

        let decoded = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }
}
