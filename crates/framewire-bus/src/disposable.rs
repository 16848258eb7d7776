//! Disposable capability.
//!
//! Objects that can be torn down implement [`Disposable`]. The registry uses it
//! to scope subscriptions to an owner: once the owner is disposed, its handlers
//! stop firing and are pruned on the next notify.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Something with a one-way `live → disposed` lifecycle.
pub trait Disposable: Send + Sync {
    /// Mark the object as disposed. Idempotent.
    fn dispose(&self);

    /// Whether [`Disposable::dispose`] has been called.
    fn is_disposed(&self) -> bool;
}

/// A shared dispose flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct DisposeFlag {
    disposed: Arc<AtomicBool>,
}

impl DisposeFlag {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Disposable for DisposeFlag {
    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
