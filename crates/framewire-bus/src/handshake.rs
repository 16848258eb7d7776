//! Hello/ack handshake and the pending-send buffer.
//!
//! With synchronization enabled a bus starts `Pending`: it announces itself
//! with [`HELLO_EVENT`] carrying a random nonce, and peer-bound envelopes are
//! held back until either side proves the other is listening. Receiving the
//! peer's hello, or an ack echoing our own nonce, moves the link to
//! `Established`; the buffer is flushed under the same lock that flips the
//! state, so no later send can overtake a buffered one.

use framewire_types::{Envelope, FramewireError, FramewireResult, SyncConfig};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Announces a bus to its peer.
pub const HELLO_EVENT: &str = "framewire.hello";
/// Answers a hello, echoing its nonce.
pub const HELLO_ACK_EVENT: &str = "framewire.hello-ack";

/// Payload of both handshake events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    /// Name of the sending bus.
    pub bus: String,
    /// Sender's nonce for a hello, the echoed nonce for an ack.
    pub nonce: String,
}

/// Handshake state of a bus's peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Synchronization is off; peer sends go out immediately.
    Disabled,
    /// Waiting for the peer; peer sends are buffered.
    Pending,
    /// The peer answered; peer sends go out immediately.
    Established,
}

#[derive(Debug)]
struct Inner {
    state: LinkState,
    buffer: VecDeque<Envelope>,
}

#[derive(Debug)]
pub struct Handshake {
    nonce: String,
    max_buffered: usize,
    inner: Mutex<Inner>,
}

impl Handshake {
    pub fn new(sync: &SyncConfig) -> Self {
        let state = if sync.enabled {
            LinkState::Pending
        } else {
            LinkState::Disabled
        };
        Self {
            nonce: uuid::Uuid::new_v4().to_string(),
            max_buffered: sync.max_buffered,
            inner: Mutex::new(Inner {
                state,
                buffer: VecDeque::new(),
            }),
        }
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn state(&self) -> LinkState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Number of envelopes waiting for the link.
    pub fn buffered(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .buffer
            .len()
    }

    /// Our hello envelope.
    pub fn hello(&self, bus: &str) -> Envelope {
        Envelope::new(
            HELLO_EVENT,
            serde_json::json!({ "bus": bus, "nonce": self.nonce }),
        )
    }

    /// The ack answering `greeting`.
    pub fn ack_for(&self, bus: &str, greeting: &Greeting) -> Envelope {
        Envelope::new(
            HELLO_ACK_EVENT,
            serde_json::json!({ "bus": bus, "nonce": greeting.nonce }),
        )
    }

    /// Whether an ack carries the nonce we sent.
    pub fn acknowledges(&self, greeting: &Greeting) -> bool {
        greeting.nonce == self.nonce
    }

    /// Offer a peer-bound envelope.
    ///
    /// Returns it back when it may go out now, `None` once it is buffered, or
    /// `BufferFull` when the pending buffer is at capacity.
    pub fn admit(&self, envelope: Envelope) -> FramewireResult<Option<Envelope>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state != LinkState::Pending {
            return Ok(Some(envelope));
        }
        if inner.buffer.len() >= self.max_buffered {
            return Err(FramewireError::BufferFull {
                capacity: self.max_buffered,
            });
        }
        inner.buffer.push_back(envelope);
        Ok(None)
    }

    /// Move `Pending → Established`, passing each buffered envelope to `flush`
    /// in order while the state lock is held. Returns whether the state changed.
    pub fn establish<F>(&self, mut flush: F) -> bool
    where
        F: FnMut(Envelope),
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state != LinkState::Pending {
            return false;
        }
        while let Some(envelope) = inner.buffer.pop_front() {
            flush(envelope);
        }
        inner.state = LinkState::Established;
        true
    }
}
