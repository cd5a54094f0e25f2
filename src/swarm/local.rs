//! Local swarm engine
//!
//! Resources come from files on disk (or memory) and peers are linked over
//! WebSocket. File data is not exchanged between peers; every participant is
//! expected to hold its own copy of the resource.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream, SinkExt, StreamExt, TryStreamExt};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, connect_async, WebSocketStream};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::error::SwarmError;
use super::wire::{decode_extended_frame, encode_extended_frame, ExtendedHandshake};
use super::{
    AddOptions, ByteStream, ConnectionHandler, Extension, HandlerId, PeerId, Resource,
    ResourceFile, ResourceId, SwarmEngine, Wire,
};
use crate::stream::ByteRange;

/// Frames queued per connection before `send_extended` reports a full buffer
const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Read size used when hashing files
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Consecutive accept failures after which the listener gives up
const MAX_CONSECUTIVE_ACCEPT_ERRORS: u32 = 16;

/// A resource file backed by a file on disk
#[derive(Debug, Clone)]
pub struct FileResource {
    name: String,
    path: PathBuf,
    length: u64,
    mime_type: String,
}

impl ResourceFile for FileResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn mime_type(&self) -> String {
        self.mime_type.clone()
    }

    fn open_byte_stream(&self, range: Option<ByteRange>) -> Result<ByteStream, SwarmError> {
        let (start, len) = match range {
            Some(range) if !range.fits(self.length) => {
                return Err(SwarmError::RangeOutOfBounds {
                    start: range.start,
                    end: range.end,
                    length: self.length,
                })
            }
            Some(range) => (range.start, range.len()),
            None => (0, self.length),
        };

        // The file is opened on first poll, so a stream dropped unpolled costs nothing
        let path = self.path.clone();
        let stream = stream::once(async move {
            let mut file = tokio::fs::File::open(&path).await?;
            file.seek(io::SeekFrom::Start(start)).await?;
            Ok::<_, io::Error>(ReaderStream::new(file.take(len)))
        })
        .try_flatten();

        Ok(Box::pin(stream))
    }
}

/// Hash a file into its resource id, returning the id and the file length
pub async fn hash_file(path: &Path) -> Result<(ResourceId, u64), SwarmError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    let mut length = 0u64;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        length += n as u64;
    }

    Ok((ResourceId::from_digest(&hasher.finalize()), length))
}

/// One WebSocket link to a remote peer
pub struct PeerWire {
    id: PeerId,
    remote_addr: String,
    outbound: mpsc::Sender<WsMessage>,
    extensions: Mutex<Vec<Box<dyn Extension>>>,
}

impl PeerWire {
    fn new(remote_addr: String, outbound: mpsc::Sender<WsMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_addr,
            outbound,
            extensions: Mutex::new(Vec::new()),
        }
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    fn extension_names(&self) -> Vec<String> {
        self.extensions
            .lock()
            .iter()
            .map(|ext| ext.name().to_string())
            .collect()
    }

    fn handle_handshake(&self, handshake: &ExtendedHandshake) {
        debug!(
            "Handshake from {} (peer {:?}): extensions {:?}",
            self.remote_addr, handshake.peer_id, handshake.extensions
        );
        for ext in self.extensions.lock().iter_mut() {
            ext.on_extended_handshake(handshake);
        }
    }

    fn handle_extended(&self, name: &str, payload: &[u8]) {
        let mut extensions = self.extensions.lock();
        match extensions.iter_mut().find(|ext| ext.name() == name) {
            Some(ext) => ext.on_message(payload),
            None => trace!(
                "No extension {:?} registered, dropping frame from {}",
                name,
                self.remote_addr
            ),
        }
    }

    fn close(&self) {
        let mut extensions = self.extensions.lock();
        for ext in extensions.iter_mut() {
            ext.on_close();
        }
        extensions.clear();
    }
}

impl Wire for PeerWire {
    fn peer_id(&self) -> PeerId {
        self.id
    }

    fn use_extension(&self, extension: Box<dyn Extension>) {
        self.extensions.lock().push(extension);
    }

    fn send_extended(&self, extension: &str, payload: Vec<u8>) -> Result<(), SwarmError> {
        let frame = encode_extended_frame(extension, &payload)?;
        self.outbound
            .try_send(WsMessage::Binary(frame))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SwarmError::SendBufferFull,
                mpsc::error::TrySendError::Closed(_) => SwarmError::ConnectionClosed,
            })
    }
}

/// Swarm engine over local files and WebSocket peer links
pub struct LocalSwarm {
    local_peer_id: Uuid,
    resources: RwLock<HashMap<ResourceId, Arc<Resource>>>,
    resource_added: Notify,
    handlers: RwLock<Vec<(HandlerId, ConnectionHandler)>>,
    next_handler_id: AtomicU64,
    wires: RwLock<HashMap<PeerId, Arc<PeerWire>>>,
    fatal_tx: watch::Sender<Option<String>>,
}

impl LocalSwarm {
    pub fn new() -> Arc<Self> {
        let (fatal_tx, _) = watch::channel(None);
        Arc::new(Self {
            local_peer_id: Uuid::new_v4(),
            resources: RwLock::new(HashMap::new()),
            resource_added: Notify::new(),
            handlers: RwLock::new(Vec::new()),
            next_handler_id: AtomicU64::new(0),
            wires: RwLock::new(HashMap::new()),
            fatal_tx,
        })
    }

    pub fn local_peer_id(&self) -> Uuid {
        self.local_peer_id
    }

    /// Number of open peer connections
    pub fn connection_count(&self) -> usize {
        self.wires.read().len()
    }

    /// Engine-level fatal error, set at most once
    pub fn fatal_errors(&self) -> watch::Receiver<Option<String>> {
        self.fatal_tx.subscribe()
    }

    /// Track `resource`, returning the existing handle if its id is already known
    pub fn add_resource(&self, resource: Resource) -> Arc<Resource> {
        let id = resource.id().clone();
        let handle = self
            .resources
            .write()
            .entry(id)
            .or_insert_with(|| Arc::new(resource))
            .clone();
        self.resource_added.notify_waiters();
        handle
    }

    /// Hash a local file and start seeding it
    pub async fn seed_file(&self, path: impl AsRef<Path>) -> Result<Arc<Resource>, SwarmError> {
        let path = path.as_ref();
        let (id, length) = hash_file(path).await?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.to_string());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();

        info!("Seeding {} as {} ({} bytes)", path.display(), id, length);

        let file = FileResource {
            name,
            path: path.to_path_buf(),
            length,
            mime_type,
        };
        Ok(self.add_resource(Resource::new(id, vec![Arc::new(file)])))
    }

    /// Accept peer connections on `addr`
    pub async fn listen(
        self: &Arc<Self>,
        addr: &str,
    ) -> Result<(SocketAddr, JoinHandle<()>), SwarmError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Peer listener bound to {}", local_addr);

        let swarm = self.clone();
        let handle = tokio::spawn(async move {
            let mut consecutive_errors = 0;
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        consecutive_errors = 0;
                        debug!("New peer connection from {}", peer_addr);
                        let swarm = swarm.clone();
                        tokio::spawn(async move {
                            match accept_async(stream).await {
                                Ok(ws) => swarm.drive_connection(ws, peer_addr.to_string()).await,
                                Err(e) => {
                                    warn!("WebSocket accept from {} failed: {}", peer_addr, e)
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        consecutive_errors += 1;
                        if consecutive_errors >= MAX_CONSECUTIVE_ACCEPT_ERRORS {
                            swarm.report_fatal(format!("peer listener failed: {}", e));
                            break;
                        }
                    }
                }
            }
        });

        Ok((local_addr, handle))
    }

    /// Open a link to the peer at `url` (`ws://host:port`)
    pub async fn connect(self: &Arc<Self>, url: &str) -> Result<(), SwarmError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| SwarmError::WebSocket(e.to_string()))?;
        info!("Connected to peer {}", url);

        let swarm = self.clone();
        let remote = url.to_string();
        tokio::spawn(async move { swarm.drive_connection(ws, remote).await });
        Ok(())
    }

    fn report_fatal(&self, reason: String) {
        self.fatal_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            error!("Swarm fatal error: {}", reason);
            *current = Some(reason);
            true
        });
    }

    async fn drive_connection<S>(self: Arc<Self>, ws: WebSocketStream<S>, remote_addr: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut write, mut read) = ws.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let wire = Arc::new(PeerWire::new(remote_addr, outbound_tx));
        self.wires.write().insert(wire.id, wire.clone());

        // Extensions must be registered before our handshake advertises them
        let handlers: Vec<ConnectionHandler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(wire.clone() as Arc<dyn Wire>);
        }

        let handshake = ExtendedHandshake::new(self.local_peer_id, wire.extension_names());
        let handshake_sent = match serde_json::to_string(&handshake) {
            Ok(json) => write.send(WsMessage::Text(json)).await.is_ok(),
            Err(e) => {
                warn!("Failed to encode handshake: {}", e);
                false
            }
        };

        if handshake_sent {
            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(WsMessage::Text(text))) => {
                                match serde_json::from_str::<ExtendedHandshake>(&text) {
                                    Ok(handshake) => wire.handle_handshake(&handshake),
                                    Err(e) => {
                                        debug!("Invalid handshake from {}: {}", wire.remote_addr, e)
                                    }
                                }
                            }
                            Some(Ok(WsMessage::Binary(data))) => {
                                match decode_extended_frame(&data) {
                                    Some((name, payload)) => wire.handle_extended(name, payload),
                                    None => debug!(
                                        "Malformed extension frame from {}",
                                        wire.remote_addr
                                    ),
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | None => {
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error from {}: {}", wire.remote_addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }

                    frame = outbound_rx.recv() => {
                        match frame {
                            Some(frame) => {
                                if let Err(e) = write.send(frame).await {
                                    warn!("Send to {} failed: {}", wire.remote_addr, e);
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        }

        wire.close();
        self.wires.write().remove(&wire.id);
        info!("Peer connection {} closed", wire.remote_addr);
    }
}

#[async_trait]
impl SwarmEngine for LocalSwarm {
    async fn add_or_get(
        &self,
        id: &ResourceId,
        options: AddOptions,
    ) -> Result<Arc<Resource>, SwarmError> {
        loop {
            // Register interest before checking, so an insert in between is not missed
            let notified = self.resource_added.notified();
            let existing = self.resources.read().get(id).cloned();
            if let Some(resource) = existing {
                return Ok(resource);
            }
            if options.as_seeder {
                return Err(SwarmError::ResourceNotFound(id.to_string()));
            }

            debug!("Waiting for metadata of {}", id);
            notified.await;
        }
    }

    fn on_new_connection(&self, handler: ConnectionHandler) -> HandlerId {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, handler));
        id
    }

    fn remove_connection_handler(&self, id: HandlerId) {
        self.handlers.write().retain(|(handler_id, _)| *handler_id != id);
    }
}
