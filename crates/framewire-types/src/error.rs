//! Shared error type for the Framewire bus.

use thiserror::Error;

/// Top-level error type returned by bus, transport and configuration operations.
///
/// None of these are fatal: every failure at the context boundary is converted
/// into one of these variants plus a diagnostic, never a panic.
#[derive(Error, Debug)]
pub enum FramewireError {
    /// `send` addressed the peer before `init` bound one.
    #[error("Bus '{0}' is not bound to a peer context")]
    NotBound(String),

    /// `init` was called on a bus that is already bound.
    #[error("Bus '{bus}' is already bound to {peer}")]
    AlreadyBound {
        /// Name of the bus.
        bus: String,
        /// Description of the existing binding.
        peer: String,
    },

    /// The bus was disposed.
    #[error("Bus '{0}' has been disposed")]
    Disposed(String),

    /// The target context cannot receive messages (missing, detached, or
    /// lacking the delivery primitive).
    #[error("Transport unavailable for '{target}': {reason}")]
    TransportUnavailable {
        /// The context that was addressed.
        target: String,
        /// Why delivery failed.
        reason: String,
    },

    /// The inbound listener could not be installed.
    #[error("Inbound listener unavailable: {0}")]
    ListenerUnavailable(String),

    /// An envelope could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The handshake buffer is full.
    #[error("Outbound buffer full ({capacity} envelopes pending handshake)")]
    BufferFull {
        /// Configured buffer capacity.
        capacity: usize,
    },

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for FramewireError {
    fn from(e: serde_json::Error) -> Self {
        FramewireError::Serialization(e.to_string())
    }
}

/// Alias for Result with FramewireError.
pub type FramewireResult<T> = Result<T, FramewireError>;
