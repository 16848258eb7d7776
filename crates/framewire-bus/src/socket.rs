//! Socket link: a TCP boundary between contexts in different processes.
//!
//! A [`SocketLink`] started with [`SocketLink::listen`] hosts child contexts:
//! each connecting process introduces itself with a `hello` frame naming its
//! context id and becomes a child locatable by that id. A link created with
//! [`SocketLink::connect`] treats the listener as its parent.
//!
//! Frames are a 4-byte big-endian length followed by a JSON body. The origin of
//! every inbound message is the context id authenticated during the hello
//! exchange, never a value claimed by the frame itself. When a shared secret is
//! configured both sides prove knowledge of it with HMAC-SHA256 over
//! `nonce + context_id`, compared in constant time.
//!
//! Each connection has a single writer task fed by an unbounded queue, so
//! messages posted to one endpoint reach the socket in posting order.

use crate::boundary::{Boundary, BoundaryError, Endpoint, Inbox, InboundMessage};
use dashmap::DashMap;
use framewire_types::ContextId;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Maximum single frame size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Errors from the socket link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },
}

/// Configuration for one end of a socket link.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Id of the local context.
    pub context_id: ContextId,
    /// Pre-shared key. When set, hellos must carry a valid HMAC.
    pub shared_secret: Option<String>,
}

impl SocketConfig {
    pub fn new(context_id: impl Into<ContextId>) -> Self {
        Self {
            context_id: context_id.into(),
            shared_secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.shared_secret = Some(secret.into());
        self
    }
}

/// Frames exchanged on a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkFrame {
    /// First frame from a connecting context.
    Hello {
        context_id: ContextId,
        #[serde(default)]
        nonce: String,
        #[serde(default)]
        auth_hmac: String,
    },
    /// Listener's acceptance of a hello.
    Welcome {
        context_id: ContextId,
        #[serde(default)]
        nonce: String,
        #[serde(default)]
        auth_hmac: String,
    },
    /// Listener's refusal of a hello. The connection closes afterwards.
    Rejected { reason: String },
    /// A serialized envelope.
    Message { data: String },
}

fn hmac_sign(secret: &str, data: &[u8]) -> Result<String, LinkError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| LinkError::HandshakeFailed(format!("invalid shared secret: {e}")))?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn hmac_verify(secret: &str, data: &[u8], signature: &str) -> bool {
    match hmac_sign(secret, data) {
        Ok(expected) => subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), signature.as_bytes()).into(),
        Err(_) => false,
    }
}

/// Build `(nonce, hmac)` credentials for `context_id`, empty when no secret is set.
fn credentials(config: &SocketConfig) -> Result<(String, String), LinkError> {
    match &config.shared_secret {
        Some(secret) => {
            let nonce = uuid::Uuid::new_v4().to_string();
            let auth = hmac_sign(secret, format!("{}{}", nonce, config.context_id).as_bytes())?;
            Ok((nonce, auth))
        }
        None => Ok((String::new(), String::new())),
    }
}

fn verify_credentials(
    config: &SocketConfig,
    context_id: &ContextId,
    nonce: &str,
    auth_hmac: &str,
) -> bool {
    match &config.shared_secret {
        Some(secret) => hmac_verify(secret, format!("{nonce}{context_id}").as_bytes(), auth_hmac),
        None => true,
    }
}

/// Encode a frame to bytes (4-byte big-endian length + JSON).
///
/// Bodies over [`MAX_FRAME_SIZE`] are refused here, since the reading side
/// would drop the whole connection on them.
pub fn encode_frame(frame: &LinkFrame) -> Result<Vec<u8>, LinkError> {
    let json = serde_json::to_vec(frame)?;
    let len = u32::try_from(json.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or_else(|| LinkError::FrameTooLarge {
            size: u32::try_from(json.len()).unwrap_or(u32::MAX),
            max: MAX_FRAME_SIZE,
        })?;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Write one framed message.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &LinkFrame,
) -> Result<(), LinkError> {
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<LinkFrame, LinkError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(LinkError::ConnectionClosed);
        }
        Err(e) => return Err(LinkError::Io(e)),
    }

    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_SIZE {
        return Err(LinkError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Endpoint writing to the remote side of one connection.
///
/// Frames are encoded by the poster, so an unsendable message fails its own
/// `post_message` and never reaches the writer task.
struct RemoteEndpoint {
    id: ContextId,
    frames: mpsc::UnboundedSender<Vec<u8>>,
    alive: Arc<AtomicBool>,
}

impl Endpoint for RemoteEndpoint {
    fn id(&self) -> &ContextId {
        &self.id
    }

    fn post_message(&self, _origin: &ContextId, data: String) -> Result<(), BoundaryError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(BoundaryError::Detached(self.id.clone()));
        }
        let bytes = encode_frame(&LinkFrame::Message { data }).map_err(|e| {
            warn!(peer = %self.id, error = %e, "Refusing to post unsendable message");
            BoundaryError::Link {
                target: self.id.clone(),
                reason: e.to_string(),
            }
        })?;
        self.frames
            .send(bytes)
            .map_err(|_| BoundaryError::Link {
                target: self.id.clone(),
                reason: "writer task stopped".to_string(),
            })
    }
}

/// Endpoint posting straight into the local inbox.
struct LoopbackEndpoint {
    id: ContextId,
    inbox: mpsc::UnboundedSender<InboundMessage>,
}

impl Endpoint for LoopbackEndpoint {
    fn id(&self) -> &ContextId {
        &self.id
    }

    fn post_message(&self, origin: &ContextId, data: String) -> Result<(), BoundaryError> {
        self.inbox
            .send(InboundMessage {
                origin: origin.clone(),
                data,
            })
            .map_err(|_| BoundaryError::Detached(self.id.clone()))
    }
}

struct LinkInner {
    config: SocketConfig,
    inbox_tx: mpsc::UnboundedSender<InboundMessage>,
    inbox_rx: Mutex<Option<Inbox>>,
    parent: RwLock<Option<Arc<RemoteEndpoint>>>,
    children: DashMap<String, Arc<RemoteEndpoint>>,
    child_joined: Notify,
    local_addr: Option<SocketAddr>,
}

/// One context's end of a TCP boundary.
#[derive(Clone)]
pub struct SocketLink {
    inner: Arc<LinkInner>,
}

impl SocketLink {
    fn new(config: SocketConfig, local_addr: Option<SocketAddr>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(LinkInner {
                config,
                inbox_tx,
                inbox_rx: Mutex::new(Some(inbox_rx)),
                parent: RwLock::new(None),
                children: DashMap::new(),
                child_joined: Notify::new(),
                local_addr,
            }),
        }
    }

    /// Bind a listener that hosts child contexts.
    pub async fn listen(
        addr: SocketAddr,
        config: SocketConfig,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), LinkError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, context = %config.context_id, "Socket link listening");

        let link = Self::new(config, Some(local_addr));
        let accept_link = link.clone();
        let handle = tokio::spawn(async move {
            accept_link.accept_loop(listener).await;
        });
        Ok((link, handle))
    }

    /// Connect to a listener, which becomes this context's parent.
    pub async fn connect(addr: SocketAddr, config: SocketConfig) -> Result<Self, LinkError> {
        let stream = TcpStream::connect(addr).await?;
        let (mut reader, mut writer) = stream.into_split();

        let (nonce, auth_hmac) = credentials(&config)?;
        write_frame(
            &mut writer,
            &LinkFrame::Hello {
                context_id: config.context_id.clone(),
                nonce,
                auth_hmac,
            },
        )
        .await?;

        let parent_id = match read_frame(&mut reader).await? {
            LinkFrame::Welcome {
                context_id,
                nonce,
                auth_hmac,
            } => {
                if !verify_credentials(&config, &context_id, &nonce, &auth_hmac) {
                    return Err(LinkError::HandshakeFailed(
                        "HMAC verification failed on welcome".into(),
                    ));
                }
                context_id
            }
            LinkFrame::Rejected { reason } => return Err(LinkError::HandshakeFailed(reason)),
            other => {
                return Err(LinkError::HandshakeFailed(format!(
                    "unexpected reply to hello: {other:?}"
                )))
            }
        };
        info!(parent = %parent_id, addr = %addr, "Socket link connected");

        let link = Self::new(config, None);
        let endpoint = spawn_connection(
            parent_id,
            reader,
            writer,
            link.inner.inbox_tx.clone(),
            None,
        );
        *link.inner.parent.write().unwrap_or_else(|e| e.into_inner()) = Some(endpoint);
        Ok(link)
    }

    /// Address the listener is bound to, for links created with [`SocketLink::listen`].
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    /// Ids of currently connected children.
    pub fn children(&self) -> Vec<ContextId> {
        self.inner
            .children
            .iter()
            .map(|e| e.value().id.clone())
            .collect()
    }

    /// Wait until a child with `context_id` has completed its hello.
    pub async fn wait_for_child(&self, context_id: &str) {
        loop {
            let joined = self.inner.child_joined.notified();
            if self.inner.children.contains_key(context_id) {
                return;
            }
            joined.await;
        }
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(%addr, "Socket link accepted connection");
                    let link = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = link.handle_inbound(stream, addr).await {
                            warn!(%addr, error = %e, "Socket link rejected connection");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Socket link accept error");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn handle_inbound(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), LinkError> {
        let (mut reader, mut writer) = stream.into_split();
        let config = &self.inner.config;

        let child_id = match read_frame(&mut reader).await? {
            LinkFrame::Hello {
                context_id,
                nonce,
                auth_hmac,
            } => {
                if !verify_credentials(config, &context_id, &nonce, &auth_hmac) {
                    write_frame(
                        &mut writer,
                        &LinkFrame::Rejected {
                            reason: "HMAC authentication failed".into(),
                        },
                    )
                    .await?;
                    return Err(LinkError::HandshakeFailed(format!(
                        "HMAC verification failed for '{context_id}'"
                    )));
                }
                context_id
            }
            _ => {
                write_frame(
                    &mut writer,
                    &LinkFrame::Rejected {
                        reason: "hello required before any message".into(),
                    },
                )
                .await?;
                return Err(LinkError::HandshakeFailed(
                    "first frame was not a hello".into(),
                ));
            }
        };

        let (nonce, auth_hmac) = credentials(config)?;
        write_frame(
            &mut writer,
            &LinkFrame::Welcome {
                context_id: config.context_id.clone(),
                nonce,
                auth_hmac,
            },
        )
        .await?;
        info!(child = %child_id, %addr, "Socket link child joined");

        let endpoint = spawn_connection(
            child_id.clone(),
            reader,
            writer,
            self.inner.inbox_tx.clone(),
            Some((self.inner.clone(), child_id.0.clone())),
        );
        if let Some(previous) = self.inner.children.insert(child_id.0.clone(), endpoint) {
            previous.alive.store(false, Ordering::Release);
        }
        self.inner.child_joined.notify_waiters();
        Ok(())
    }
}

/// Start the reader and writer tasks for an authenticated connection.
///
/// When `registration` is set, the child entry is removed once the reader ends.
fn spawn_connection(
    peer_id: ContextId,
    mut reader: tokio::net::tcp::OwnedReadHalf,
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    inbox: mpsc::UnboundedSender<InboundMessage>,
    registration: Option<(Arc<LinkInner>, String)>,
) -> Arc<RemoteEndpoint> {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let alive = Arc::new(AtomicBool::new(true));

    let writer_alive = alive.clone();
    let writer_peer = peer_id.clone();
    tokio::spawn(async move {
        while let Some(bytes) = frames_rx.recv().await {
            let written = async {
                writer.write_all(&bytes).await?;
                writer.flush().await
            };
            if let Err(e) = written.await {
                debug!(peer = %writer_peer, error = %e, "Socket link writer stopped");
                break;
            }
        }
        writer_alive.store(false, Ordering::Release);
    });

    let reader_alive = alive.clone();
    let reader_peer = peer_id.clone();
    tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(LinkFrame::Message { data }) => {
                    let msg = InboundMessage {
                        origin: reader_peer.clone(),
                        data,
                    };
                    if inbox.send(msg).is_err() {
                        debug!(peer = %reader_peer, "Inbox closed, dropping link");
                        break;
                    }
                }
                Ok(other) => {
                    warn!(peer = %reader_peer, frame = ?other, "Unexpected frame on established link");
                }
                Err(LinkError::ConnectionClosed) => {
                    debug!(peer = %reader_peer, "Socket link closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(peer = %reader_peer, error = %e, "Socket link read failed");
                    break;
                }
            }
        }
        reader_alive.store(false, Ordering::Release);
        if let Some((link, key)) = registration {
            link.children
                .remove_if(&key, |_, endpoint| Arc::ptr_eq(&endpoint.alive, &reader_alive));
        }
    });

    Arc::new(RemoteEndpoint {
        id: peer_id,
        frames: frames_tx,
        alive,
    })
}

impl Boundary for SocketLink {
    fn context_id(&self) -> &ContextId {
        &self.inner.config.context_id
    }

    fn own_endpoint(&self) -> Arc<dyn Endpoint> {
        Arc::new(LoopbackEndpoint {
            id: self.inner.config.context_id.clone(),
            inbox: self.inner.inbox_tx.clone(),
        })
    }

    fn parent(&self) -> Option<Arc<dyn Endpoint>> {
        let parent = self.inner.parent.read().unwrap_or_else(|e| e.into_inner());
        parent.clone().map(|p| p as Arc<dyn Endpoint>)
    }

    fn locate_child(&self, selector: &str) -> Option<Arc<dyn Endpoint>> {
        self.inner
            .children
            .get(selector)
            .map(|e| e.value().clone() as Arc<dyn Endpoint>)
    }

    fn take_inbox(&self) -> Option<Inbox> {
        self.inner
            .inbox_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}
