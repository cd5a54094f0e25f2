//! Broadcast message definitions
//!
//! A message is a flat JSON record: `{"id", "paused", "currentTime", "timestamp", ...}`.
//! Fields this version does not know about are kept in `extra` so that a node
//! forwards them untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::SyncError;

/// Opaque message identifier, assigned once at the originating node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh 128-bit random identifier
    pub fn random() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local or remote playback position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub paused: bool,
    /// Position in seconds
    pub current_time: f64,
}

impl PlaybackStatus {
    pub fn new(paused: bool, current_time: f64) -> Self {
        Self {
            paused,
            current_time,
        }
    }
}

/// A message body that has not been assigned an id yet
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub paused: bool,
    pub current_time: f64,
    /// Origin wall clock, milliseconds since the Unix epoch
    pub timestamp: i64,
    pub extra: Map<String, Value>,
}

impl Draft {
    /// Create a status draft stamped with the given origin time
    pub fn status(status: PlaybackStatus, timestamp: i64) -> Self {
        Self {
            paused: status.paused,
            current_time: status.current_time,
            timestamp,
            extra: Map::new(),
        }
    }

    pub(crate) fn seal(self, id: MessageId) -> Message {
        Message {
            id,
            paused: self.paused,
            current_time: self.current_time,
            timestamp: self.timestamp,
            extra: self.extra,
        }
    }
}

/// A broadcast message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub paused: bool,
    pub current_time: f64,
    pub timestamp: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Playback status carried by this message
    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus::new(self.paused, self.current_time)
    }

    /// Serialize to a wire frame
    pub fn to_frame(&self) -> Result<Vec<u8>, SyncError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from a wire frame
    pub fn from_frame(data: &[u8]) -> Result<Self, SyncError> {
        let message: Message = serde_json::from_slice(data)?;
        if message.id.as_str().is_empty() {
            return Err(SyncError::MissingId);
        }
        Ok(message)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
