//! Swarm engine interface
//!
//! The peer-to-peer engine that moves file data between participants is consumed
//! through the traits in this module. `LocalSwarm` is the engine shipped with
//! the crate: it serves resources from local files or memory and links peers
//! over WebSocket.

mod error;
mod local;
mod memory;
mod wire;

use std::fmt;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stream::ByteRange;

pub use error::SwarmError;
pub use local::{hash_file, FileResource, LocalSwarm, PeerWire};
pub use memory::MemoryFile;
pub use wire::{decode_extended_frame, encode_extended_frame, ExtendedHandshake};

/// Identifier of one live peer connection
pub type PeerId = Uuid;

/// Lazily produced file bytes
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Content identifier of a resource: lowercase hex SHA-256 of its bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Length of the hex encoding
    pub const LEN: usize = 64;

    pub fn from_digest(digest: &[u8]) -> Self {
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ResourceId {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(SwarmError::InvalidResourceId(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for ResourceId {
    type Error = SwarmError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One file inside a resource
pub trait ResourceFile: Send + Sync {
    fn name(&self) -> &str;

    /// Total length in bytes
    fn length(&self) -> u64;

    fn mime_type(&self) -> String;

    /// Open a stream over `range`, or over the whole file if `None`
    ///
    /// Bytes are only read as the stream is polled.
    fn open_byte_stream(&self, range: Option<ByteRange>) -> Result<ByteStream, SwarmError>;
}

/// A logical resource tracked by the engine
pub struct Resource {
    id: ResourceId,
    files: Vec<Arc<dyn ResourceFile>>,
}

impl Resource {
    pub fn new(id: ResourceId, files: Vec<Arc<dyn ResourceFile>>) -> Self {
        Self { id, files }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn files(&self) -> &[Arc<dyn ResourceFile>] {
        &self.files
    }
}

/// Options for `SwarmEngine::add_or_get`
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    /// The resource must already be held locally; do not wait for metadata
    pub as_seeder: bool,
}

/// A protocol extension attached to one peer connection
pub trait Extension: Send {
    fn name(&self) -> &'static str;

    /// Called once the remote side has advertised its capabilities
    fn on_extended_handshake(&mut self, handshake: &ExtendedHandshake);

    /// Called for every frame the remote sends under this extension's name
    fn on_message(&mut self, payload: &[u8]);

    /// Called when the connection is torn down
    fn on_close(&mut self) {}
}

/// A live connection to a remote participant
pub trait Wire: Send + Sync {
    fn peer_id(&self) -> PeerId;

    /// Register an extension; only effective before the local handshake is sent
    fn use_extension(&self, extension: Box<dyn Extension>);

    /// Queue an extension frame for sending
    fn send_extended(&self, extension: &str, payload: Vec<u8>) -> Result<(), SwarmError>;
}

/// Callback run for every new peer connection
pub type ConnectionHandler = Arc<dyn Fn(Arc<dyn Wire>) + Send + Sync>;

/// Registration returned by `on_new_connection`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u64);

/// The peer-to-peer engine
#[async_trait]
pub trait SwarmEngine: Send + Sync {
    /// Return the tracked resource with `id`, adding it if necessary
    ///
    /// Repeated calls for the same id return the same handle.
    async fn add_or_get(
        &self,
        id: &ResourceId,
        options: AddOptions,
    ) -> Result<Arc<Resource>, SwarmError>;

    fn on_new_connection(&self, handler: ConnectionHandler) -> HandlerId;

    /// Stop running `id` for new connections; existing ones are unaffected
    fn remove_connection_handler(&self, id: HandlerId);
}
