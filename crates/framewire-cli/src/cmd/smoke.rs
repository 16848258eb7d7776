//! `framewire smoke`: echo both ways across two in-process frames.

use super::{fail, runtime, wait_until};
use crate::ui;
use framewire_bus::{Frame, MessageBus, Route};
use framewire_types::{BusConfig, OriginPolicy};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SMOKE_TIMEOUT: Duration = Duration::from_secs(3);

pub fn cmd_smoke(alert: bool) {
    let rt = runtime();
    if let Err(e) = rt.block_on(run(alert)) {
        fail(&e);
    }
}

async fn run(alert: bool) -> Result<(), String> {
    let top = Frame::top("top");
    let child = top.attach_child("#client-app", "client-app");

    let mut server_config = BusConfig::new("server", OriginPolicy::allow(["client-app"]));
    server_config.echo_alert = alert;
    let mut client_config = BusConfig::new("client", OriginPolicy::allow(["top"]));
    client_config.echo_alert = alert;

    let server = MessageBus::new(server_config, Arc::new(top.clone())).map_err(|e| e.to_string())?;
    let client = MessageBus::new(client_config, Arc::new(child.clone())).map_err(|e| e.to_string())?;

    let server_binding = server.init(Some("#client-app")).map_err(|e| e.to_string())?;
    let client_binding = client.init(None).map_err(|e| e.to_string())?;

    ui::section("Framewire smoke test");
    ui::kv("Server", &server_binding.to_string());
    ui::kv("Client", &client_binding.to_string());
    ui::blank();

    client
        .send("echo", json!({"from": "client"}), Route::Peer)
        .map_err(|e| e.to_string())?;
    server
        .send("echo", json!({"from": "server"}), Route::Peer)
        .map_err(|e| e.to_string())?;

    let server_heard = wait_until(SMOKE_TIMEOUT, || {
        !server.diagnostics().find("received echo").is_empty()
    })
    .await;
    let client_heard = wait_until(SMOKE_TIMEOUT, || {
        !client.diagnostics().find("received echo").is_empty()
    })
    .await;

    ui::section("Server diagnostics");
    ui::diagnostics(&server.diagnostics().history(usize::MAX));
    ui::section("Client diagnostics");
    ui::diagnostics(&client.diagnostics().history(usize::MAX));
    ui::blank();

    if !(server_heard && client_heard) {
        ui::hint("run with RUST_LOG=debug to trace every envelope");
        return Err("echo did not arrive within the timeout".into());
    }
    ui::success("Echo delivered both ways");
    Ok(())
}
