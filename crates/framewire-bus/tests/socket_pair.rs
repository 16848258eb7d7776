//! Two buses bound across a TCP socket link.

use framewire_bus::{
    BindMode, HandlerError, LinkError, LinkState, MessageBus, Route, SocketConfig, SocketLink,
};
use framewire_types::{BusConfig, FramewireError, OriginPolicy, Severity};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

fn any_port() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn linked(secret: Option<&str>) -> (SocketLink, SocketLink) {
    let mut server_config = SocketConfig::new("server-host");
    let mut client_config = SocketConfig::new("client-app");
    if let Some(secret) = secret {
        server_config = server_config.with_secret(secret);
        client_config = client_config.with_secret(secret);
    }
    let (server, _accept) = SocketLink::listen(any_port(), server_config).await.unwrap();
    let client = SocketLink::connect(server.local_addr().unwrap(), client_config)
        .await
        .unwrap();
    tokio::time::timeout(WAIT, server.wait_for_child("client-app"))
        .await
        .unwrap();
    (server, client)
}

fn collect(bus: &MessageBus, event: &str) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus.subscribe(event, move |args| {
        tx.send(args[0].clone())
            .map_err(|e| HandlerError::rejected(e.to_string()))
    });
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for dispatch")
        .expect("collector closed")
}

#[tokio::test]
async fn test_echo_and_events_over_tcp() {
    let (server_link, client_link) = linked(Some("s3cret")).await;
    let server = MessageBus::new(
        BusConfig::new("server", OriginPolicy::allow(["client-app"])),
        Arc::new(server_link),
    )
    .unwrap();
    let client = MessageBus::new(
        BusConfig::new("client", OriginPolicy::allow(["server-host"])),
        Arc::new(client_link),
    )
    .unwrap();

    let mut pongs = collect(&client, "pong");
    let mut pings = collect(&server, "ping");
    assert_eq!(server.init(Some("client-app")).unwrap().mode, BindMode::Server);
    assert_eq!(client.init(None).unwrap().mode, BindMode::Client);

    for i in 0..50 {
        client.send("ping", i, Route::Peer).unwrap();
    }
    for i in 0..50 {
        assert_eq!(next(&mut pings).await["data"], json!(i));
    }

    server.send("pong", json!({"ok": true}), Route::Peer).unwrap();
    assert_eq!(next(&mut pongs).await, json!({"name": "pong", "data": {"ok": true}}));

    client.send("echo", "over the wire", Route::Peer).unwrap();
    tokio::time::timeout(WAIT, async {
        while server
            .diagnostics()
            .find(r#"server received echo: "over the wire""#)
            .is_empty()
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_synchronized_link_over_tcp() {
    let (server_link, client_link) = linked(None).await;
    let server = MessageBus::new(
        BusConfig::new("server", OriginPolicy::AcceptAny).synchronized(),
        Arc::new(server_link),
    )
    .unwrap();
    let client = MessageBus::new(
        BusConfig::new("client", OriginPolicy::AcceptAny).synchronized(),
        Arc::new(client_link),
    )
    .unwrap();
    let mut rx = collect(&server, "queued");

    client.init(None).unwrap();
    client.send("queued", "first", Route::Peer).unwrap();
    server.init(Some("client-app")).unwrap();
    client.send("queued", "second", Route::Peer).unwrap();

    assert_eq!(next(&mut rx).await["data"], json!("first"));
    assert_eq!(next(&mut rx).await["data"], json!("second"));
    assert_eq!(client.link_state(), LinkState::Established);
}

#[tokio::test]
async fn test_oversized_send_refused_and_link_survives() {
    let (server_link, client_link) = linked(None).await;
    let server = MessageBus::new(
        BusConfig::new("server", OriginPolicy::AcceptAny),
        Arc::new(server_link),
    )
    .unwrap();
    let client = MessageBus::new(
        BusConfig::new("client", OriginPolicy::AcceptAny),
        Arc::new(client_link),
    )
    .unwrap();
    let mut rx = collect(&server, "x");
    server.init(Some("client-app")).unwrap();
    client.init(None).unwrap();

    let huge = "a".repeat(17 * 1024 * 1024);
    match client.send("x", huge, Route::Peer) {
        Err(FramewireError::TransportUnavailable { target, reason }) => {
            assert_eq!(target, "server-host");
            assert!(reason.contains("Frame too large"));
        }
        other => panic!("Expected TransportUnavailable, got {other:?}"),
    }
    assert_eq!(client.diagnostics().count(Severity::Error), 1);

    client.send("x", 1, Route::Peer).unwrap();
    assert_eq!(next(&mut rx).await, json!({"name": "x", "data": 1}));
}

#[tokio::test]
async fn test_wrong_secret_refused() {
    let (server, _accept) = SocketLink::listen(
        any_port(),
        SocketConfig::new("server-host").with_secret("right"),
    )
    .await
    .unwrap();
    let result = SocketLink::connect(
        server.local_addr().unwrap(),
        SocketConfig::new("client-app").with_secret("wrong"),
    )
    .await;
    assert!(matches!(result, Err(LinkError::HandshakeFailed(_))));
    assert!(server.children().is_empty());
}
