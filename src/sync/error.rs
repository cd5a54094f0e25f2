//! Sync error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding broadcast frames
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    #[error("Message has an empty id")]
    MissingId,
}
