//! Frames: an in-process host of isolated contexts.
//!
//! Contexts form a tree: a top-level [`Frame`] can attach named children, each
//! of which can attach its own. Every frame owns an unbounded FIFO inbox; the
//! only way to reach another frame is to post a string to it through an
//! [`Endpoint`], and delivery always happens on the receiver's listener task,
//! never on the sender's stack.
//!
//! Children can be created without the delivery primitive to model an
//! asymmetric boundary, and frames can be closed to model stale handles.

use crate::boundary::{Boundary, BoundaryError, Endpoint, Inbox, InboundMessage};
use framewire_types::ContextId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::mpsc;
use tracing::debug;

struct FrameInner {
    id: ContextId,
    parent: Option<Weak<FrameInner>>,
    children: RwLock<HashMap<String, Arc<FrameInner>>>,
    tx: mpsc::UnboundedSender<InboundMessage>,
    rx: Mutex<Option<Inbox>>,
    accepts_messages: bool,
    closed: AtomicBool,
}

impl FrameInner {
    fn new(id: ContextId, parent: Option<Weak<FrameInner>>, accepts_messages: bool) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            id,
            parent,
            children: RwLock::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            accepts_messages,
            closed: AtomicBool::new(false),
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Drop an untaken inbox so queued messages are discarded.
        self.rx.lock().unwrap_or_else(|e| e.into_inner()).take();
        let children = self.children.read().unwrap_or_else(|e| e.into_inner());
        for child in children.values() {
            child.close();
        }
    }
}

/// A context in the in-process host.
#[derive(Clone)]
pub struct Frame {
    inner: Arc<FrameInner>,
}

impl Frame {
    /// Create a top-level frame. It has no parent.
    pub fn top(id: impl Into<ContextId>) -> Self {
        Self {
            inner: FrameInner::new(id.into(), None, true),
        }
    }

    /// Attach a child reachable from this frame under `selector`.
    ///
    /// A child already attached under the same selector is closed and replaced.
    pub fn attach_child(&self, selector: &str, id: impl Into<ContextId>) -> Frame {
        self.attach(selector, id.into(), true)
    }

    /// Attach a child whose context lacks the delivery primitive.
    pub fn attach_child_without_messaging(
        &self,
        selector: &str,
        id: impl Into<ContextId>,
    ) -> Frame {
        self.attach(selector, id.into(), false)
    }

    fn attach(&self, selector: &str, id: ContextId, accepts_messages: bool) -> Frame {
        let child = FrameInner::new(id, Some(Arc::downgrade(&self.inner)), accepts_messages);
        let mut children = self.inner.children.write().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = children.insert(selector.to_string(), child.clone()) {
            debug!(selector, replaced = %previous.id, "Replacing attached frame");
            previous.close();
        }
        Frame { inner: child }
    }

    /// Remove and close the child under `selector`.
    pub fn detach_child(&self, selector: &str) -> bool {
        let removed = self
            .inner
            .children
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(selector);
        match removed {
            Some(child) => {
                child.close();
                true
            }
            None => false,
        }
    }

    /// Close this frame and its descendants. Handles to them go stale.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn id(&self) -> &ContextId {
        &self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn endpoint_for(inner: &Arc<FrameInner>) -> Arc<dyn Endpoint> {
        Arc::new(FrameEndpoint {
            id: inner.id.clone(),
            target: Arc::downgrade(inner),
        })
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.inner.id)
            .field("accepts_messages", &self.inner.accepts_messages)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Boundary for Frame {
    fn context_id(&self) -> &ContextId {
        &self.inner.id
    }

    fn own_endpoint(&self) -> Arc<dyn Endpoint> {
        Self::endpoint_for(&self.inner)
    }

    fn parent(&self) -> Option<Arc<dyn Endpoint>> {
        let parent = self.inner.parent.as_ref()?.upgrade()?;
        Some(Self::endpoint_for(&parent))
    }

    fn locate_child(&self, selector: &str) -> Option<Arc<dyn Endpoint>> {
        let children = self.inner.children.read().unwrap_or_else(|e| e.into_inner());
        children.get(selector).map(Self::endpoint_for)
    }

    fn take_inbox(&self) -> Option<Inbox> {
        self.inner.rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Weak handle to a frame's delivery primitive.
struct FrameEndpoint {
    id: ContextId,
    target: Weak<FrameInner>,
}

impl Endpoint for FrameEndpoint {
    fn id(&self) -> &ContextId {
        &self.id
    }

    fn post_message(&self, origin: &ContextId, data: String) -> Result<(), BoundaryError> {
        let target = self
            .target
            .upgrade()
            .ok_or_else(|| BoundaryError::Detached(self.id.clone()))?;
        if target.closed.load(Ordering::Acquire) {
            return Err(BoundaryError::Detached(self.id.clone()));
        }
        if !target.accepts_messages {
            return Err(BoundaryError::Unsupported(self.id.clone()));
        }
        target
            .tx
            .send(InboundMessage {
                origin: origin.clone(),
                data,
            })
            .map_err(|_| BoundaryError::Detached(self.id.clone()))
    }
}
