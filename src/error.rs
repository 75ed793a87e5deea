//! Error types for queue-probe operations.
//!
//! Defines one error type per subsystem:
//! - Key-value store access (retried when transient)
//! - Broker control-plane inspection (always degraded, never fatal)
//! - Queue entry decoding (recorded per item)
//! - Queue-age monitoring state

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to the key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis operation timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Returns true for failures worth retrying: timeouts, refused or dropped
    /// connections, and raw I/O errors.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::ConnectionFailed(_) | StoreError::Timeout(_) => true,
            StoreError::Redis(err) => {
                err.is_timeout()
                    || err.is_connection_dropped()
                    || err.is_connection_refusal()
                    || err.is_io_error()
            }
        }
    }
}

/// Errors that can occur while querying the broker control plane.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Control channel store error: {0}")]
    Store(#[from] StoreError),

    #[error("Control message encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Malformed control reply: {0}")]
    Malformed(String),
}

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        BrokerError::Store(StoreError::Redis(err))
    }
}

/// Errors that can occur while extracting a task body from a queue entry.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Queue entry is not valid JSON: {0}")]
    InvalidEntry(String),

    #[error("Queue entry has no string 'body' field")]
    MissingBody,

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("Body is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("JSON body error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Legacy serialized body error: {0}")]
    Legacy(#[from] serde_pickle::Error),

    #[error("Legacy serialized body is not a mapping")]
    NotAMapping,
}

/// Errors that can occur while reading queue-age monitoring state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid state record for '{queue}': {message}")]
    InvalidRecord { queue: String, message: String },
}
