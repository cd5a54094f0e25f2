//! syncwatch - Synchronized playback over a peer-to-peer swarm
//!
//! This library provides flood-fill broadcast of playback status between
//! peers, follower reconciliation against an authority's clock, and
//! byte-range streaming of swarm resources over HTTP.

pub mod config;
pub mod player;
pub mod server;
pub mod session;
pub mod stream;
pub mod swarm;
pub mod sync;

pub use config::{AppConfig, ConfigError};
pub use player::SimulatedPlayer;
pub use session::{Session, SessionConfig};
pub use swarm::{LocalSwarm, SwarmEngine, SwarmError};
pub use sync::{EpidemicBroadcaster, MediaClock, PlaybackReconciler, Role, SyncDecision};
