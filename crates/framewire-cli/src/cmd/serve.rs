//! `framewire serve`: host a socket link and a server bus.

use super::{fail, resolve_config, runtime};
use crate::cli::OriginArgs;
use crate::ui;
use framewire_bus::{Disposable, MessageBus, SocketConfig, SocketLink};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub fn cmd_serve(
    config: Option<PathBuf>,
    origins: &OriginArgs,
    listen: SocketAddr,
    child: &str,
    secret: Option<String>,
) {
    let bus_config = resolve_config(config, origins, "server").unwrap_or_else(|e| fail(&e));
    let rt = runtime();
    if let Err(e) = rt.block_on(run(bus_config, listen, child, secret)) {
        fail(&e);
    }
}

async fn run(
    bus_config: framewire_types::BusConfig,
    listen: SocketAddr,
    child: &str,
    secret: Option<String>,
) -> Result<(), String> {
    let mut link_config = SocketConfig::new(bus_config.name.as_str());
    if let Some(secret) = secret {
        link_config = link_config.with_secret(secret);
    }
    let (link, accept) = SocketLink::listen(listen, link_config)
        .await
        .map_err(|e| e.to_string())?;
    let addr = link.local_addr().map(|a| a.to_string()).unwrap_or_default();

    ui::section("Framewire server");
    ui::kv("Listening", &addr);
    ui::kv("Waiting for", child);
    ui::hint("press Ctrl+C to stop");

    tokio::select! {
        _ = link.wait_for_child(child) => {}
        _ = tokio::signal::ctrl_c() => {
            accept.abort();
            return Ok(());
        }
    }

    let bus = MessageBus::new(bus_config, Arc::new(link)).map_err(|e| e.to_string())?;
    let binding = bus.init(Some(child)).map_err(|e| e.to_string())?;
    ui::success(&format!("Bound: {binding}"));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Unable to wait for Ctrl+C: {e}"))?;
    info!("Shutting down");
    bus.dispose();
    accept.abort();
    Ok(())
}
