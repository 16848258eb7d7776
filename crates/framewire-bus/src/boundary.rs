//! Boundary primitive: the host's one-way asynchronous string delivery.
//!
//! A [`Boundary`] is the view one context has of the host: its own endpoint
//! (for loopback), its parent, its children by selector, and its inbox. An
//! [`Endpoint`] is a handle to some context's delivery primitive. Handles may go
//! stale (the context closed) or point at a context that never supported
//! delivery at all; both are reported as [`BoundaryError`], never panics.
//!
//! Two hosts ship with the crate: [`crate::frames`] (in-process context tree)
//! and [`crate::socket`] (TCP link between processes).

use framewire_types::ContextId;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// A raw message received by a context, tagged with its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Context that posted the message.
    pub origin: ContextId,
    /// Serialized envelope text.
    pub data: String,
}

/// Receiving half of a context's inbox. There is exactly one per context.
pub type Inbox = mpsc::UnboundedReceiver<InboundMessage>;

/// Failures of the host delivery primitive.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BoundaryError {
    /// The target context is gone or its handle is stale.
    #[error("context '{0}' is detached")]
    Detached(ContextId),
    /// The target context exists but cannot receive messages.
    #[error("context '{0}' does not support message delivery")]
    Unsupported(ContextId),
    /// The underlying link failed.
    #[error("link to '{target}' failed: {reason}")]
    Link {
        /// Target context.
        target: ContextId,
        /// Link-level failure description.
        reason: String,
    },
}

/// Handle to a context's delivery primitive.
pub trait Endpoint: Send + Sync {
    /// Id of the context this endpoint delivers to.
    fn id(&self) -> &ContextId;

    /// Queue `data` for asynchronous delivery, tagged with `origin`.
    ///
    /// Never dispatches on the caller's stack; messages posted through the same
    /// endpoint arrive in posting order.
    fn post_message(&self, origin: &ContextId, data: String) -> Result<(), BoundaryError>;
}

/// One context's view of the host.
pub trait Boundary: Send + Sync {
    /// Id of the context this boundary belongs to.
    fn context_id(&self) -> &ContextId;

    /// Endpoint addressing this same context.
    fn own_endpoint(&self) -> Arc<dyn Endpoint>;

    /// Endpoint of the enclosing parent context, if there is one.
    fn parent(&self) -> Option<Arc<dyn Endpoint>>;

    /// Endpoint of the child located by `selector`, if exactly one matches.
    fn locate_child(&self, selector: &str) -> Option<Arc<dyn Endpoint>>;

    /// Take this context's inbox. Returns `None` once it has been taken.
    fn take_inbox(&self) -> Option<Inbox>;
}
