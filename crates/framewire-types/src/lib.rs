//! Core types for the Framewire cross-context message bus.
//!
//! This crate defines the data shared by every bus participant: the wire
//! envelope, context identifiers, diagnostics records, configuration and the
//! error type. It contains no dispatch logic.

pub mod config;
pub mod context;
pub mod diagnostic;
pub mod envelope;
pub mod error;

pub use config::{load_config, parse_config, BusConfig, DiagnosticsConfig, OriginPolicy, SyncConfig};
pub use context::ContextId;
pub use diagnostic::{Diagnostic, Severity};
pub use envelope::{decode_envelope, encode_envelope, Envelope};
pub use error::{FramewireError, FramewireResult};
