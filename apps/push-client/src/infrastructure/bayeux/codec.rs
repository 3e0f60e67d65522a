//! Bayeux Frame Codec
//!
//! Encoding and decoding for the push feed's websocket frames. Every
//! outbound message is wrapped in a single-element JSON array; inbound
//! frames are arrays of one or more messages (the server batches), or
//! occasionally a bare object which is treated as a one-element batch.

use serde::Serialize;

use super::messages::BayeuxMessage;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame was neither a JSON array nor an object.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for Bayeux frames.
#[derive(Debug, Default, Clone)]
pub struct BayeuxCodec;

impl BayeuxCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode one message as a single-element batch frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (should not happen with
    /// valid data).
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<String, CodecError> {
        let frame = serde_json::to_string(&[message])?;
        Ok(frame)
    }

    /// Decode an inbound frame into its batch of messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid JSON or is neither an
    /// array nor an object.
    pub fn decode(&self, text: &str) -> Result<Vec<BayeuxMessage>, CodecError> {
        let trimmed = text.trim();

        if trimmed.starts_with('[') {
            let batch: Vec<BayeuxMessage> = serde_json::from_str(trimmed)?;
            Ok(batch)
        } else if trimmed.starts_with('{') {
            let msg: BayeuxMessage = serde_json::from_str(trimmed)?;
            Ok(vec![msg])
        } else {
            Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {}...",
                &trimmed[..trimmed.len().min(50)]
            )))
        }
    }
}
