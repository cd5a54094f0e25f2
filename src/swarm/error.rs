//! Swarm error types

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the swarm engine
#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Timed out after {0:?} waiting for resource metadata")]
    MetadataTimeout(Duration),

    #[error("Invalid resource id: {0}")]
    InvalidResourceId(String),

    #[error("Range {start}-{end} is outside a resource of {length} bytes")]
    RangeOutOfBounds { start: u64, end: u64, length: u64 },

    #[error("Extension name too long: {0}")]
    ExtensionNameTooLong(String),

    #[error("Send buffer full")]
    SendBufferFull,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
