//! Playback synchronization over the peer mesh
//!
//! - `dedup`: time-windowed set of seen message ids
//! - `broadcaster`: flood-fill fan-out to every attached peer
//! - `extension`: per-connection adapter behind the `flood_fill` handshake
//! - `reconciler`: authority heartbeat and follower convergence

mod broadcaster;
mod dedup;
mod error;
mod extension;
mod message;
mod reconciler;

pub use broadcaster::{EpidemicBroadcaster, PEER_QUEUE_DEPTH};
pub use dedup::{Deduplicator, DEFAULT_RETENTION};
pub use error::SyncError;
pub use extension::{FloodFillExtension, EXTENSION_NAME};
pub use message::{now_millis, Draft, Message, MessageId, PlaybackStatus};
pub use reconciler::{
    estimate_remote_time, reconcile, MediaClock, PlaybackReconciler, ReconcilerConfig, Role,
    SyncDecision, HEARTBEAT_INTERVAL, RESYNC_THRESHOLD_SECS,
};
