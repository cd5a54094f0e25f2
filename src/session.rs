//! Watch session
//!
//! Ties the broadcaster, the peer extension and the reconciler together for
//! one synchronized resource, and owns their background tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::swarm::{HandlerId, SwarmEngine, Wire};
use crate::sync::{
    EpidemicBroadcaster, FloodFillExtension, MediaClock, PlaybackReconciler, ReconcilerConfig,
    Role, DEFAULT_RETENTION, HEARTBEAT_INTERVAL, RESYNC_THRESHOLD_SECS,
};

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub role: Role,
    /// How long a message id stays in the seen-set
    pub retention: Duration,
    /// Authority status interval
    pub heartbeat_interval: Duration,
    /// Follower drift tolerance in seconds
    pub resync_threshold_secs: f64,
    /// How often expired ids are purged
    pub sweep_interval: Duration,
}

impl SessionConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            retention: DEFAULT_RETENTION,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            resync_threshold_secs: RESYNC_THRESHOLD_SECS,
            sweep_interval: Duration::from_secs(5),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(Role::Follower)
    }
}

/// A synchronized playback session
pub struct Session {
    config: SessionConfig,
    broadcaster: Arc<EpidemicBroadcaster>,
    reconciler: Arc<PlaybackReconciler>,
    reconcile_handle: Option<JoinHandle<()>>,
    sweep_handle: Option<JoinHandle<()>>,
    registrations: Vec<(Arc<dyn SwarmEngine>, HandlerId)>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let broadcaster = Arc::new(EpidemicBroadcaster::new(config.retention));
        let reconciler = Arc::new(PlaybackReconciler::new(
            config.role,
            broadcaster.clone(),
            ReconcilerConfig {
                heartbeat_interval: config.heartbeat_interval,
                resync_threshold_secs: config.resync_threshold_secs,
            },
        ));

        Self {
            config,
            broadcaster,
            reconciler,
            reconcile_handle: None,
            sweep_handle: None,
            registrations: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn broadcaster(&self) -> &Arc<EpidemicBroadcaster> {
        &self.broadcaster
    }

    pub fn reconciler(&self) -> &Arc<PlaybackReconciler> {
        &self.reconciler
    }

    pub fn is_running(&self) -> bool {
        self.reconcile_handle.is_some()
    }

    /// Install the flood-fill extension on every new connection of `engine`
    ///
    /// The registration is removed again when the session stops.
    pub fn attach(&mut self, engine: Arc<dyn SwarmEngine>) {
        if self.broadcaster.is_closed() {
            warn!("Session already stopped, not attaching to engine");
            return;
        }

        let broadcaster = self.broadcaster.clone();
        let id = engine.on_new_connection(Arc::new(move |wire: Arc<dyn Wire>| {
            if broadcaster.is_closed() {
                return;
            }
            debug!("Installing flood-fill extension for peer {}", wire.peer_id());
            FloodFillExtension::install(wire, broadcaster.clone());
        }));
        self.registrations.push((engine, id));
    }

    /// Start reconciling `clock` and sweeping the seen-set
    pub fn start(&mut self, clock: Arc<dyn MediaClock>) {
        if self.is_running() {
            return;
        }
        if self.broadcaster.is_closed() {
            warn!("Session already stopped, not restarting");
            return;
        }

        self.reconcile_handle = Some(self.reconciler.spawn(clock));

        let broadcaster = self.broadcaster.clone();
        let sweep_interval = self.config.sweep_interval;
        self.sweep_handle = Some(tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let purged = broadcaster.sweep();
                if purged > 0 {
                    debug!("Purged {} expired message ids", purged);
                }
            }
        }));

        info!("Session started as {:?}", self.config.role);
    }

    /// End the session
    ///
    /// Aborts the background tasks, unregisters from every attached engine and
    /// closes the broadcaster so installed extensions stop relaying. A stopped
    /// session cannot be started again.
    pub fn stop(&mut self) {
        let mut stopped = false;
        if let Some(handle) = self.reconcile_handle.take() {
            handle.abort();
            stopped = true;
        }
        if let Some(handle) = self.sweep_handle.take() {
            handle.abort();
        }
        for (engine, id) in self.registrations.drain(..) {
            engine.remove_connection_handler(id);
        }
        self.broadcaster.close();
        if stopped {
            info!("Session stopped");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
