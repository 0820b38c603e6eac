//! JSON encoding of protocol messages.
//!
//! Decoding never fails loudly: a payload that does not parse is treated as
//! absent so consumers keep running.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Serialize a message to its wire bytes.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Parse wire bytes, returning `None` for empty or malformed payloads.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Option<T> {
    if payload.is_empty() {
        return None;
    }

    match serde_json::from_slice(payload) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::debug!("Ignoring malformed payload ({} bytes): {}", payload.len(), e);
            None
        }
    }
}
