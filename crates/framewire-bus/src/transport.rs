//! Transport adapter: bridges a bus to its context's boundary primitive.
//!
//! The adapter resolves which peer context to address, serializes outbound
//! envelopes, runs the single inbound listener that deserializes inbound ones,
//! and converts every failure of the underlying primitive into a diagnostic
//! plus a typed error. Nothing here panics across the boundary.

use crate::boundary::{Boundary, Endpoint, InboundMessage};
use crate::diagnostics::{DiagnosticLog, TAG_TRANSPORT};
use framewire_types::{
    decode_envelope, encode_envelope, ContextId, Envelope, FramewireError, FramewireResult,
    OriginPolicy,
};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Where an outbound envelope goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The bound peer context.
    Peer,
    /// This same context.
    Loopback,
}

/// How a bus was bound at `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// The selector located a child context, which is addressed.
    Server,
    /// No selector, or it located nothing: the parent context is addressed.
    Client,
}

/// Outcome of peer resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerBinding {
    pub mode: BindMode,
    /// Resolved peer, or `None` when there is no context to address.
    pub peer: Option<ContextId>,
}

impl std::fmt::Display for PeerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.mode {
            BindMode::Server => "server",
            BindMode::Client => "client",
        };
        match &self.peer {
            Some(peer) => write!(f, "{mode} mode, peer '{peer}'"),
            None => write!(f, "{mode} mode, no peer"),
        }
    }
}

/// Running inbound listener. Stopping it (or dropping the handle) ends the task.
#[derive(Debug)]
pub struct ListenerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Ask the listener task to stop after the message it is processing.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Adapter between one bus and its context's boundary.
pub struct TransportAdapter {
    boundary: Arc<dyn Boundary>,
    peer: RwLock<Option<Arc<dyn Endpoint>>>,
    diagnostics: Arc<DiagnosticLog>,
}

impl TransportAdapter {
    pub fn new(boundary: Arc<dyn Boundary>, diagnostics: Arc<DiagnosticLog>) -> Self {
        Self {
            boundary,
            peer: RwLock::new(None),
            diagnostics,
        }
    }

    /// Id of the context this adapter belongs to.
    pub fn context_id(&self) -> &ContextId {
        self.boundary.context_id()
    }

    /// Resolve and store the peer to address.
    ///
    /// A selector that locates a child binds server mode; anything else binds
    /// client mode against the parent, which may not exist.
    pub fn bind_peer(&self, selector: Option<&str>) -> PeerBinding {
        let located = selector
            .filter(|s| !s.is_empty())
            .and_then(|s| self.boundary.locate_child(s));

        let (mode, endpoint) = match located {
            Some(child) => (BindMode::Server, Some(child)),
            None => (BindMode::Client, self.boundary.parent()),
        };

        let binding = PeerBinding {
            mode,
            peer: endpoint.as_ref().map(|e| e.id().clone()),
        };
        *self.peer.write().unwrap_or_else(|e| e.into_inner()) = endpoint;

        match mode {
            BindMode::Server => self.diagnostics.debug(
                TAG_TRANSPORT,
                format!("Messaging set up in server mode ({binding})"),
            ),
            BindMode::Client => self.diagnostics.debug(
                TAG_TRANSPORT,
                format!("Messaging set up in client mode ({binding})"),
            ),
        }
        binding
    }

    /// Whether a peer endpoint is stored.
    pub fn has_peer(&self) -> bool {
        self.peer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Id of the stored peer endpoint, if any.
    pub fn peer_id(&self) -> Option<ContextId> {
        self.peer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|e| e.id().clone())
    }

    /// Forget the stored peer. Peer deliveries fail until the next `bind_peer`.
    pub fn unbind_peer(&self) {
        if self.peer.write().unwrap_or_else(|e| e.into_inner()).take().is_some() {
            self.diagnostics
                .debug(TAG_TRANSPORT, "Peer binding cleared");
        }
    }

    /// Start the context's single inbound listener.
    ///
    /// Each raw message is origin-checked, decoded and handed to `on_message`
    /// as `(name, envelope, origin)`. Rejected or malformed messages are logged
    /// and dropped; the listener keeps running.
    pub fn install_inbound_listener<F>(
        &self,
        policy: OriginPolicy,
        on_message: F,
    ) -> FramewireResult<ListenerHandle>
    where
        F: Fn(&str, &Envelope, &ContextId) + Send + Sync + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            FramewireError::ListenerUnavailable("no tokio runtime to run the listener".into())
        })?;
        let own = self.context_id().clone();
        let mut inbox = self.boundary.take_inbox().ok_or_else(|| {
            FramewireError::ListenerUnavailable(format!(
                "inbox of context '{own}' is already being listened to"
            ))
        })?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let diagnostics = self.diagnostics.clone();

        let task = runtime.spawn(async move {
            loop {
                tokio::select! {
                    msg = inbox.recv() => {
                        match msg {
                            Some(msg) => accept_inbound(&own, &policy, &diagnostics, msg, &on_message),
                            None => {
                                debug!(context = %own, "Inbox closed, listener exiting");
                                break;
                            }
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!(context = %own, "Listener stopped");
                            break;
                        }
                    }
                }
            }
        });

        Ok(ListenerHandle {
            shutdown: shutdown_tx,
            task,
        })
    }

    /// Serialize `envelope` and hand it to the boundary primitive of `route`.
    ///
    /// Every failure is recorded as an error diagnostic and returned; none panic.
    pub fn deliver(&self, envelope: &Envelope, route: Route) -> FramewireResult<()> {
        let raw = encode_envelope(envelope).map_err(|e| {
            self.diagnostics.error(
                TAG_TRANSPORT,
                format!("Unable to serialize '{}': {e}", envelope.name),
            );
            FramewireError::Serialization(e.to_string())
        })?;

        let endpoint = match route {
            Route::Loopback => self.boundary.own_endpoint(),
            Route::Peer => {
                let peer = self.peer.read().unwrap_or_else(|e| e.into_inner()).clone();
                peer.ok_or_else(|| {
                    self.diagnostics.error(
                        TAG_TRANSPORT,
                        format!(
                            "No peer context resolved - unable to post '{}'",
                            envelope.name
                        ),
                    );
                    FramewireError::TransportUnavailable {
                        target: "peer".to_string(),
                        reason: "no peer context resolved".to_string(),
                    }
                })?
            }
        };

        match endpoint.post_message(self.context_id(), raw) {
            Ok(()) => {
                debug!(event = %envelope.name, target = %endpoint.id(), ?route, "Envelope posted");
                Ok(())
            }
            Err(e) => {
                self.diagnostics.error(
                    TAG_TRANSPORT,
                    format!("Unable to post '{}': {e}", envelope.name),
                );
                Err(FramewireError::TransportUnavailable {
                    target: endpoint.id().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn accept_inbound<F>(
    own: &ContextId,
    policy: &OriginPolicy,
    diagnostics: &DiagnosticLog,
    msg: InboundMessage,
    on_message: &F,
) where
    F: Fn(&str, &Envelope, &ContextId),
{
    if !policy.permits(own, &msg.origin) {
        diagnostics.warning(
            TAG_TRANSPORT,
            format!("Dropped message from disallowed origin '{}'", msg.origin),
        );
        return;
    }
    match decode_envelope(&msg.data) {
        Ok(envelope) => on_message(&envelope.name, &envelope, &msg.origin),
        Err(e) => diagnostics.warning(
            TAG_TRANSPORT,
            format!("Dropped malformed message from '{}': {e}", msg.origin),
        ),
    }
}
