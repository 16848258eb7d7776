//! `framewire join`: connect to a server, send one event and exit.

use super::{fail, resolve_config, runtime};
use crate::cli::OriginArgs;
use crate::ui;
use framewire_bus::{Disposable, MessageBus, Route, SocketConfig, SocketLink};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Arguments of one `join` invocation.
pub struct JoinRequest {
    pub connect: SocketAddr,
    pub name: String,
    pub event: String,
    pub data: String,
    pub wait_ms: u64,
    pub secret: Option<String>,
}

pub fn cmd_join(config: Option<PathBuf>, origins: &OriginArgs, request: JoinRequest) {
    let bus_config = resolve_config(config, origins, &request.name).unwrap_or_else(|e| fail(&e));
    let data: Value = serde_json::from_str(&request.data)
        .unwrap_or_else(|e| fail(&format!("--data is not valid JSON: {e}")));
    let rt = runtime();
    if let Err(e) = rt.block_on(run(bus_config, request, data)) {
        fail(&e);
    }
}

async fn run(
    bus_config: framewire_types::BusConfig,
    request: JoinRequest,
    data: Value,
) -> Result<(), String> {
    let mut link_config = SocketConfig::new(request.name.as_str());
    if let Some(secret) = request.secret {
        link_config = link_config.with_secret(secret);
    }
    let link = SocketLink::connect(request.connect, link_config)
        .await
        .map_err(|e| e.to_string())?;

    let bus = MessageBus::new(bus_config, Arc::new(link)).map_err(|e| e.to_string())?;
    let binding = bus.init(None).map_err(|e| e.to_string())?;
    ui::kv("Bound", &binding.to_string());

    bus.send(&request.event, data, Route::Peer)
        .map_err(|e| e.to_string())?;
    ui::success(&format!("Sent '{}' to {}", request.event, request.connect));

    tokio::time::sleep(Duration::from_millis(request.wait_ms)).await;
    ui::diagnostics(&bus.diagnostics().history(usize::MAX));
    bus.dispose();
    Ok(())
}
