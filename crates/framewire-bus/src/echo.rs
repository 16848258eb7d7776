//! Built-in echo channel.
//!
//! Every bound bus answers the `"echo"` event by tracing
//! `"<bus name> received echo: <data as JSON>"`. When alerts are enabled the
//! same text is also raised on an [`AlertSurface`], the user-visible side
//! channel of the host.

use crate::diagnostics::{DiagnosticLog, TAG_ECHO};
use crate::registry::HandlerResult;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Event name of the connectivity smoke-test channel.
pub const ECHO_EVENT: &str = "echo";

/// A user-visible notification sink.
pub trait AlertSurface: Send + Sync {
    fn alert(&self, message: &str);
}

/// Writes alerts to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrAlert;

impl AlertSurface for StderrAlert {
    fn alert(&self, message: &str) {
        eprintln!("[alert] {message}");
    }
}

/// The echo handler's state: bus name, alert toggle and sinks.
pub struct EchoChannel {
    bus_name: String,
    alert_enabled: AtomicBool,
    surface: Arc<dyn AlertSurface>,
    diagnostics: Arc<DiagnosticLog>,
}

impl EchoChannel {
    pub fn new(
        bus_name: impl Into<String>,
        alert_enabled: bool,
        surface: Arc<dyn AlertSurface>,
        diagnostics: Arc<DiagnosticLog>,
    ) -> Self {
        Self {
            bus_name: bus_name.into(),
            alert_enabled: AtomicBool::new(alert_enabled),
            surface,
            diagnostics,
        }
    }

    pub fn set_alert(&self, enabled: bool) {
        self.alert_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn alert_enabled(&self) -> bool {
        self.alert_enabled.load(Ordering::Relaxed)
    }

    /// The trace line for an echoed payload.
    pub fn format(&self, data: &Value) -> String {
        format!("{} received echo: {data}", self.bus_name)
    }

    /// Handle an inbound echo. `args[0]` is the envelope object; a missing
    /// argument or `data` field echoes `null`.
    pub fn handle(&self, args: &[Value]) -> HandlerResult {
        let data = args
            .first()
            .and_then(|envelope| envelope.get("data"))
            .unwrap_or(&Value::Null);
        let message = self.format(data);
        self.diagnostics.info(TAG_ECHO, message.clone());
        if self.alert_enabled() {
            self.surface.alert(&message);
        }
        Ok(())
    }
}

impl std::fmt::Debug for EchoChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoChannel")
            .field("bus_name", &self.bus_name)
            .field("alert_enabled", &self.alert_enabled())
            .finish()
    }
}
