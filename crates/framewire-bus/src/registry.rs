//! Subscription registry: event name → ordered handler list.
//!
//! Insertion order is dispatch order. Looking up a name nobody registered is
//! never an error: `notify` on an unknown name is a no-op.
//!
//! Dispatch works on a snapshot of the handler list taken at the start of
//! `notify`, so handlers may subscribe further handlers (or notify again)
//! without deadlocking; additions only take effect on the next call. Each
//! handler invocation is isolated: an `Err` return or a panic is reported in the
//! [`NotifyOutcome`] and the remaining handlers still run.

use crate::disposable::Disposable;
use dashmap::DashMap;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a handler failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler refused its arguments or could not do its work.
    #[error("{0}")]
    Rejected(String),
    /// The handler panicked; the registry caught it.
    #[error("panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        HandlerError::Rejected(reason.into())
    }
}

/// What a handler returns.
pub type HandlerResult = Result<(), HandlerError>;

/// A subscriber callback. Receives the positional arguments passed to `notify`.
pub type Handler = Arc<dyn Fn(&[Value]) -> HandlerResult + Send + Sync>;

/// A registered handler and the disposable that owns it, if any.
#[derive(Clone)]
pub struct Subscription {
    /// Event name this handler listens on.
    pub event_name: String,
    callback: Handler,
    owner: Option<Arc<dyn Disposable>>,
}

impl Subscription {
    fn is_stale(&self) -> bool {
        self.owner.as_ref().is_some_and(|o| o.is_disposed())
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event_name", &self.event_name)
            .field("owned", &self.owner.is_some())
            .finish()
    }
}

/// A handler that failed during a `notify` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    /// Position of the handler in registration order.
    pub index: usize,
    /// The returned error or the caught panic.
    pub error: HandlerError,
}

/// Result of one `notify` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyOutcome {
    /// Handlers that ran (successfully or not).
    pub invoked: usize,
    /// Handlers that returned `Err` or panicked.
    pub failures: Vec<HandlerFailure>,
    /// Owner-disposed handlers removed during this call.
    pub pruned: usize,
}

/// Thread-safe map from event name to its ordered subscriptions.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    events: DashMap<String, Vec<Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure an entry exists for `event_name`. Idempotent.
    pub fn register(&self, event_name: &str) -> &Self {
        self.events.entry(event_name.to_string()).or_default();
        self
    }

    /// Append a permanent handler for `event_name`.
    pub fn subscribe<F>(&self, event_name: &str, callback: F) -> &Self
    where
        F: Fn(&[Value]) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(event_name, Arc::new(callback), None)
    }

    /// Append a handler that stops firing once `owner` is disposed.
    pub fn subscribe_owned<F>(
        &self,
        event_name: &str,
        owner: Arc<dyn Disposable>,
        callback: F,
    ) -> &Self
    where
        F: Fn(&[Value]) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(event_name, Arc::new(callback), Some(owner))
    }

    /// Append an already-boxed handler.
    pub fn subscribe_handler(&self, event_name: &str, handler: Handler) -> &Self {
        self.insert(event_name, handler, None)
    }

    fn insert(
        &self,
        event_name: &str,
        callback: Handler,
        owner: Option<Arc<dyn Disposable>>,
    ) -> &Self {
        self.events
            .entry(event_name.to_string())
            .or_default()
            .push(Subscription {
                event_name: event_name.to_string(),
                callback,
                owner,
            });
        self
    }

    /// Invoke every handler registered for `event_name`, in order.
    pub fn notify(&self, event_name: &str, args: &[Value]) -> NotifyOutcome {
        // Snapshot, then release the shard lock before running callbacks.
        let snapshot = match self.events.get(event_name) {
            Some(list) => list.value().clone(),
            None => return NotifyOutcome::default(),
        };

        let mut outcome = NotifyOutcome::default();
        let mut saw_stale = false;

        for (index, sub) in snapshot.iter().enumerate() {
            if sub.is_stale() {
                saw_stale = true;
                continue;
            }
            outcome.invoked += 1;
            let result = catch_unwind(AssertUnwindSafe(|| (sub.callback)(args)));
            let error = match result {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(panic) => HandlerError::Panicked(panic_message(panic.as_ref())),
            };
            warn!(event = event_name, index, error = %error, "Handler failed");
            outcome.failures.push(HandlerFailure { index, error });
        }

        if saw_stale {
            if let Some(mut list) = self.events.get_mut(event_name) {
                let before = list.len();
                list.retain(|s| !s.is_stale());
                outcome.pruned = before - list.len();
            }
            debug!(
                event = event_name,
                pruned = outcome.pruned,
                "Pruned handlers of disposed owners"
            );
        }

        outcome
    }

    /// Names of all registered events, in no particular order.
    pub fn event_names(&self) -> Vec<String> {
        self.events.iter().map(|e| e.key().clone()).collect()
    }

    /// Whether `event_name` has an entry (with or without handlers).
    pub fn has_event(&self, event_name: &str) -> bool {
        self.events.contains_key(event_name)
    }

    /// Number of handlers currently registered for `event_name`.
    pub fn handler_count(&self, event_name: &str) -> usize {
        self.events.get(event_name).map(|l| l.len()).unwrap_or(0)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string payload".to_string()
    }
}
