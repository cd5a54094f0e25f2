//! Flood-fill broadcast over all attached peers
//!
//! Every node forwards each message it accepts to all of its peers. The
//! deduplicator stops the re-forwarding once a message has been seen, which is
//! what keeps a cyclic mesh from broadcast-storming.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use super::dedup::Deduplicator;
use super::message::{Draft, Message, MessageId};
use crate::swarm::PeerId;

/// Outbound queue depth per peer; messages beyond this are dropped for that peer
pub const PEER_QUEUE_DEPTH: usize = 64;

/// Capacity of the accepted-message channel
const ACCEPTED_CHANNEL_CAPACITY: usize = 256;

/// Epidemic broadcaster shared by the reconciler and every peer adapter
pub struct EpidemicBroadcaster {
    dedup: Mutex<Deduplicator>,
    peers: RwLock<HashMap<PeerId, mpsc::Sender<Arc<Message>>>>,
    accepted_tx: broadcast::Sender<Message>,
    closed: AtomicBool,
}

impl EpidemicBroadcaster {
    pub fn new(retention: Duration) -> Self {
        let (accepted_tx, _) = broadcast::channel(ACCEPTED_CHANNEL_CAPACITY);
        Self {
            dedup: Mutex::new(Deduplicator::new(retention)),
            peers: RwLock::new(HashMap::new()),
            accepted_tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to messages accepted from the network
    ///
    /// Locally originated messages are not delivered here.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.accepted_tx.subscribe()
    }

    /// Attach a peer and return the receiving end of its outbound queue
    ///
    /// On a closed broadcaster the queue is returned already closed.
    pub fn attach(&self, peer_id: PeerId) -> mpsc::Receiver<Arc<Message>> {
        let (tx, rx) = mpsc::channel(PEER_QUEUE_DEPTH);
        if self.is_closed() {
            debug!("Broadcaster closed, not attaching peer {}", peer_id);
            return rx;
        }
        if self.peers.write().insert(peer_id, tx).is_some() {
            debug!("Peer {} re-attached, previous queue dropped", peer_id);
        }
        rx
    }

    pub fn detach(&self, peer_id: &PeerId) {
        if self.peers.write().remove(peer_id).is_some() {
            debug!("Peer {} detached from broadcaster", peer_id);
        }
    }

    /// Detach every peer and stop accepting messages
    ///
    /// Outbound queues are dropped, so forwarding tasks finish, and later
    /// `receive` calls are ignored.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let detached = {
            let mut peers = self.peers.write();
            let count = peers.len();
            peers.clear();
            count
        };
        debug!("Broadcaster closed, {} peer(s) detached", detached);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    pub fn has_seen(&self, id: &MessageId) -> bool {
        self.dedup.lock().has_seen(id)
    }

    /// Ids currently held in the seen-set, expired or not
    pub fn seen_count(&self) -> usize {
        self.dedup.lock().len()
    }

    /// Assign a fresh id to `draft`, mark it seen and send it to every peer
    pub fn originate(&self, draft: Draft) -> Message {
        let id = {
            let mut dedup = self.dedup.lock();
            let id = loop {
                let candidate = MessageId::random();
                if !dedup.has_seen(&candidate) {
                    break candidate;
                }
            };
            dedup.mark_seen(id.clone());
            id
        };

        let message = draft.seal(id);
        trace!("Originating message {}", message.id);
        self.fan_out(Arc::new(message.clone()), None);
        message
    }

    /// Handle a message received from `from`
    ///
    /// Returns `false` if the message was a duplicate, or the broadcaster is
    /// closed, and has been dropped.
    pub fn receive(&self, message: Message, from: Option<PeerId>) -> bool {
        if self.is_closed() {
            trace!("Broadcaster closed, ignoring message {}", message.id);
            return false;
        }
        if !self.dedup.lock().check_and_mark(&message.id) {
            trace!("Dropping duplicate message {}", message.id);
            return false;
        }

        // No subscribers is fine: a node may relay without reconciling
        let _ = self.accepted_tx.send(message.clone());
        self.fan_out(Arc::new(message), from);
        true
    }

    /// Purge expired ids from the seen-set
    pub fn sweep(&self) -> usize {
        self.dedup.lock().sweep()
    }

    fn fan_out(&self, message: Arc<Message>, origin: Option<PeerId>) {
        let mut closed = Vec::new();
        {
            let peers = self.peers.read();
            for (peer_id, tx) in peers.iter() {
                // The sender already has it; its own dedup would drop the echo anyway
                if Some(*peer_id) == origin {
                    continue;
                }
                match tx.try_send(message.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(
                            "Outbound queue full for peer {}, dropping message {}",
                            peer_id, message.id
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*peer_id),
                }
            }
        }

        if !closed.is_empty() {
            let mut peers = self.peers.write();
            for peer_id in closed {
                peers.remove(&peer_id);
                debug!("Peer {} queue closed, detached", peer_id);
            }
        }
    }
}

impl Default for EpidemicBroadcaster {
    fn default() -> Self {
        Self::new(super::dedup::DEFAULT_RETENTION)
    }
}
