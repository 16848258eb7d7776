//! Bus configuration and its TOML loader.
//!
//! The origin policy has no default: a configuration that omits it is
//! rejected, so every deployment states explicitly whose messages it accepts.
//!
//! ```toml
//! name = "server"
//! echo_alert = false
//!
//! [origin_policy]
//! mode = "allow_list"
//! origins = ["client-app"]
//!
//! [sync]
//! enabled = true
//! max_buffered = 128
//! ```

use crate::context::ContextId;
use crate::error::{FramewireError, FramewireResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Default number of envelopes held while a handshake is pending.
pub const DEFAULT_MAX_BUFFERED: usize = 256;

/// Default number of diagnostics retained in the history ring buffer.
pub const DEFAULT_DIAGNOSTIC_HISTORY: usize = 256;

/// Which origins the inbound listener accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OriginPolicy {
    /// Accept messages from any context.
    AcceptAny,
    /// Accept only messages whose origin is listed. The own context is always accepted.
    AllowList {
        /// Allowed sender context ids.
        origins: Vec<ContextId>,
    },
}

impl OriginPolicy {
    /// Build an allow-list policy.
    pub fn allow<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ContextId>,
    {
        OriginPolicy::AllowList {
            origins: origins.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether a message from `origin` may be dispatched by the context `own`.
    pub fn permits(&self, own: &ContextId, origin: &ContextId) -> bool {
        match self {
            OriginPolicy::AcceptAny => true,
            OriginPolicy::AllowList { origins } => origin == own || origins.contains(origin),
        }
    }
}

/// Handshake and buffering settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Buffer peer-bound sends until the hello/ack handshake completes.
    pub enabled: bool,
    /// Maximum envelopes held while the handshake is pending.
    pub max_buffered: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_buffered: DEFAULT_MAX_BUFFERED,
        }
    }
}

/// Diagnostic log settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Number of diagnostics retained for inspection.
    pub history: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            history: DEFAULT_DIAGNOSTIC_HISTORY,
        }
    }
}

/// Configuration for one message bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus name, used in diagnostics and the echo trace.
    pub name: String,
    /// Whether the built-in echo handler also raises a user-visible alert.
    #[serde(default)]
    pub echo_alert: bool,
    /// Mandatory inbound origin policy.
    pub origin_policy: OriginPolicy,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

impl BusConfig {
    /// Create a configuration with defaults for everything but the name and origin policy.
    pub fn new(name: impl Into<String>, origin_policy: OriginPolicy) -> Self {
        Self {
            name: name.into(),
            echo_alert: false,
            origin_policy,
            sync: SyncConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }

    /// Enable the hello/ack handshake with the default buffer size.
    pub fn synchronized(mut self) -> Self {
        self.sync.enabled = true;
        self
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> FramewireResult<()> {
        if self.name.trim().is_empty() {
            return Err(FramewireError::Config("bus name must not be empty".into()));
        }
        if let OriginPolicy::AllowList { origins } = &self.origin_policy {
            if origins.is_empty() {
                return Err(FramewireError::Config(
                    "origin_policy allow_list needs at least one origin".into(),
                ));
            }
        }
        if self.sync.max_buffered == 0 {
            return Err(FramewireError::Config(
                "sync.max_buffered must be greater than zero".into(),
            ));
        }
        if self.diagnostics.history == 0 {
            return Err(FramewireError::Config(
                "diagnostics.history must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Parse and validate a bus configuration from TOML text.
pub fn parse_config(contents: &str) -> FramewireResult<BusConfig> {
    let config: BusConfig =
        toml::from_str(contents).map_err(|e| FramewireError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Load and validate a bus configuration from a TOML file.
pub fn load_config(path: &Path) -> FramewireResult<BusConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config = parse_config(&contents)?;
    info!(path = %path.display(), bus = %config.name, "Loaded bus configuration");
    Ok(config)
}
