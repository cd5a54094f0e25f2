//! Playback reconciliation between an authority and its followers
//!
//! The authority broadcasts `{paused, currentTime, timestamp}` on every local
//! play/pause transition and on a fixed heartbeat. Followers estimate where the
//! authority is now by adding the one-way latency (`now - timestamp`) to the
//! reported position while it is playing, then:
//! - seek when paused locally, or when off by more than the dead-band
//! - match the authority's paused state
//!
//! Clocks are assumed to be loosely in sync; residual skew is absorbed by the
//! dead-band rather than corrected.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::broadcaster::EpidemicBroadcaster;
use super::message::{now_millis, Draft, Message, PlaybackStatus};

/// Default interval between authority heartbeats
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Default drift tolerated while playing before a follower seeks
pub const RESYNC_THRESHOLD_SECS: f64 = 0.5;

/// Latency beyond this is taken as a bogus timestamp and not applied
pub const MAX_LATENCY_SECS: f64 = 60.0;

/// Capacity of the decision channel
const DECISION_CHANNEL_CAPACITY: usize = 64;

/// Session role, fixed for the lifetime of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Local playback is the ground truth and is broadcast outward
    Authority,
    /// Local playback follows received authority state
    Follower,
}

/// What a follower should do with its media clock
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncDecision {
    #[serde(rename = "shouldSeekTo", skip_serializing_if = "Option::is_none")]
    pub seek_to: Option<f64>,
    #[serde(rename = "shouldSetPaused", skip_serializing_if = "Option::is_none")]
    pub set_paused: Option<bool>,
}

impl SyncDecision {
    pub fn is_noop(&self) -> bool {
        self.seek_to.is_none() && self.set_paused.is_none()
    }
}

/// Local media clock driven by the reconciler
pub trait MediaClock: Send + Sync {
    fn status(&self) -> PlaybackStatus;

    fn seek(&self, position: f64);

    fn set_paused(&self, paused: bool);
}

/// Estimate the authority's current position from a status message
///
/// No latency is added while paused, since the position is not advancing.
/// The timestamp comes from the remote and is not trusted: a latency outside
/// `±MAX_LATENCY_SECS` is ignored.
pub fn estimate_remote_time(message: &Message, now_ms: i64) -> f64 {
    if message.paused {
        return message.current_time;
    }

    let latency = now_ms.saturating_sub(message.timestamp) as f64 / 1000.0;
    if latency.abs() > MAX_LATENCY_SECS {
        debug!(
            "Ignoring implausible latency {:.3}s on message {}",
            latency, message.id
        );
        return message.current_time;
    }
    message.current_time + latency
}

/// Decide how a follower at `local` reacts to `message` received at `now_ms`
pub fn reconcile(
    message: &Message,
    local: PlaybackStatus,
    now_ms: i64,
    threshold_secs: f64,
) -> SyncDecision {
    let estimated = estimate_remote_time(message, now_ms);
    if !estimated.is_finite() || estimated < 0.0 {
        debug!("Ignoring unusable position {} on message {}", estimated, message.id);
        return SyncDecision::default();
    }
    let drift = (estimated - local.current_time).abs();

    SyncDecision {
        seek_to: (local.paused || drift > threshold_secs).then_some(estimated),
        set_paused: (message.paused != local.paused).then_some(message.paused),
    }
}

/// Reconciler configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub heartbeat_interval: Duration,
    pub resync_threshold_secs: f64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            resync_threshold_secs: RESYNC_THRESHOLD_SECS,
        }
    }
}

/// Keeps a local media clock converged with the authority
pub struct PlaybackReconciler {
    role: Role,
    broadcaster: Arc<EpidemicBroadcaster>,
    config: ReconcilerConfig,
    decisions_tx: broadcast::Sender<SyncDecision>,
}

impl PlaybackReconciler {
    pub fn new(
        role: Role,
        broadcaster: Arc<EpidemicBroadcaster>,
        config: ReconcilerConfig,
    ) -> Self {
        let (decisions_tx, _) = broadcast::channel(DECISION_CHANNEL_CAPACITY);
        Self {
            role,
            broadcaster,
            config,
            decisions_tx,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Stream of non-empty decisions applied by a follower
    pub fn subscribe_decisions(&self) -> broadcast::Receiver<SyncDecision> {
        self.decisions_tx.subscribe()
    }

    /// Broadcast the local playback status
    ///
    /// Only the authority originates status; a follower returns `None`.
    pub fn originate_status(&self, status: PlaybackStatus) -> Option<Message> {
        if self.role != Role::Authority {
            warn!("Follower session cannot originate playback status");
            return None;
        }
        Some(self.broadcaster.originate(Draft::status(status, now_millis())))
    }

    /// Compute the decision for an accepted message
    ///
    /// The authority never adjusts its own clock and always gets a no-op.
    pub fn handle_message(
        &self,
        message: &Message,
        local: PlaybackStatus,
        now_ms: i64,
    ) -> SyncDecision {
        match self.role {
            Role::Authority => SyncDecision::default(),
            Role::Follower => reconcile(message, local, now_ms, self.config.resync_threshold_secs),
        }
    }

    /// Apply an accepted message to `clock` and publish the decision
    pub fn apply(&self, message: &Message, clock: &dyn MediaClock) -> SyncDecision {
        let decision = self.handle_message(message, clock.status(), now_millis());
        if decision.is_noop() {
            return decision;
        }

        // Pause before seeking so a paused clock lands exactly on the target
        if let Some(paused) = decision.set_paused {
            info!(
                "Authority {}, following",
                if paused { "paused" } else { "resumed" }
            );
            clock.set_paused(paused);
        }
        if let Some(position) = decision.seek_to {
            debug!("Seeking to {:.3}s to match authority ({})", position, message.id);
            clock.seek(position);
        }

        let _ = self.decisions_tx.send(decision);
        decision
    }

    /// Run the role's background loop until the task is aborted
    ///
    /// The authority emits a heartbeat from `clock`; a follower applies every
    /// accepted message to `clock`.
    pub fn spawn(self: &Arc<Self>, clock: Arc<dyn MediaClock>) -> JoinHandle<()> {
        let reconciler = self.clone();
        match self.role {
            Role::Authority => tokio::spawn(async move { reconciler.run_heartbeat(clock).await }),
            Role::Follower => tokio::spawn(async move { reconciler.run_follower(clock).await }),
        }
    }

    async fn run_heartbeat(&self, clock: Arc<dyn MediaClock>) {
        let mut ticker = interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.originate_status(clock.status());
        }
    }

    async fn run_follower(&self, clock: Arc<dyn MediaClock>) {
        let mut accepted = self.broadcaster.subscribe();

        loop {
            match accepted.recv().await {
                Ok(message) => {
                    self.apply(&message, clock.as_ref());
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Reconciler lagged, skipped {} messages", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
