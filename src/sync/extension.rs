//! Per-connection bridge between a peer wire and the broadcaster
//!
//! The adapter stays inert until the remote's extended handshake arrives. If the
//! remote advertises `flood_fill` the adapter attaches to the broadcaster and
//! forwards every outbound message over the wire; otherwise it never sends or
//! processes anything on that connection.

use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::broadcaster::EpidemicBroadcaster;
use super::message::Message;
use crate::swarm::{ExtendedHandshake, Extension, PeerId, SwarmError, Wire};

/// Extension name advertised in the handshake
pub const EXTENSION_NAME: &str = "flood_fill";

enum AdapterState {
    AwaitingHandshake,
    /// Remote does not speak the extension, or the link is gone
    Inert,
    Active {
        forward_task: JoinHandle<()>,
    },
}

/// Flood-fill extension for one peer connection
pub struct FloodFillExtension {
    wire: Weak<dyn Wire>,
    peer_id: PeerId,
    broadcaster: Arc<EpidemicBroadcaster>,
    state: AdapterState,
}

impl FloodFillExtension {
    pub fn new(wire: &Arc<dyn Wire>, broadcaster: Arc<EpidemicBroadcaster>) -> Self {
        Self {
            wire: Arc::downgrade(wire),
            peer_id: wire.peer_id(),
            broadcaster,
            state: AdapterState::AwaitingHandshake,
        }
    }

    /// Register a new adapter on `wire`
    pub fn install(wire: Arc<dyn Wire>, broadcaster: Arc<EpidemicBroadcaster>) {
        let extension = Self::new(&wire, broadcaster);
        wire.use_extension(Box::new(extension));
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, AdapterState::Active { .. })
    }

    fn activate(&mut self) {
        let mut outbound = self.broadcaster.attach(self.peer_id);
        let wire = self.wire.clone();
        let peer_id = self.peer_id;

        let forward_task = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let Some(wire) = wire.upgrade() else {
                    break;
                };

                let frame = match message.to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Failed to encode message {}: {}", message.id, e);
                        continue;
                    }
                };

                match wire.send_extended(EXTENSION_NAME, frame) {
                    Ok(()) => trace!("Forwarded message {} to peer {}", message.id, peer_id),
                    Err(SwarmError::SendBufferFull) => {
                        debug!("Send buffer full for peer {}, dropping {}", peer_id, message.id)
                    }
                    Err(e) => {
                        debug!("Stopping forwarding to peer {}: {}", peer_id, e);
                        break;
                    }
                }
            }
        });

        self.state = AdapterState::Active { forward_task };
    }

    fn deactivate(&mut self) {
        let state = std::mem::replace(&mut self.state, AdapterState::Inert);
        if let AdapterState::Active { forward_task } = state {
            forward_task.abort();
            self.broadcaster.detach(&self.peer_id);
        }
    }
}

impl Extension for FloodFillExtension {
    fn name(&self) -> &'static str {
        EXTENSION_NAME
    }

    fn on_extended_handshake(&mut self, handshake: &ExtendedHandshake) {
        if !matches!(self.state, AdapterState::AwaitingHandshake) {
            debug!("Ignoring repeated handshake from peer {}", self.peer_id);
            return;
        }

        if !handshake.supports(EXTENSION_NAME) {
            debug!(
                "Peer {} does not support {}, staying inert",
                self.peer_id, EXTENSION_NAME
            );
            self.state = AdapterState::Inert;
            return;
        }

        debug!("Peer {} supports {}, forwarding enabled", self.peer_id, EXTENSION_NAME);
        self.activate();
    }

    fn on_message(&mut self, payload: &[u8]) {
        if !self.is_active() {
            trace!("Ignoring frame from inactive peer {}", self.peer_id);
            return;
        }

        match Message::from_frame(payload) {
            Ok(message) => {
                self.broadcaster.receive(message, Some(self.peer_id));
            }
            Err(e) => debug!("Dropping malformed frame from peer {}: {}", self.peer_id, e),
        }
    }

    fn on_close(&mut self) {
        self.deactivate();
    }
}

impl Drop for FloodFillExtension {
    fn drop(&mut self) {
        self.deactivate();
    }
}
