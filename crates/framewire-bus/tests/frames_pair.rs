//! End-to-end tests of two buses bound across the in-process frame host.

use framewire_bus::{
    AlertSurface, BindMode, Boundary, DiagnosticLog, Disposable, Frame, HandlerError, LinkState,
    MessageBus, Route, HELLO_ACK_EVENT, HELLO_EVENT,
};
use framewire_types::{
    decode_envelope, encode_envelope, BusConfig, Envelope, FramewireError, OriginPolicy, Severity,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct CollectAlerts(Mutex<Vec<String>>);

impl AlertSurface for CollectAlerts {
    fn alert(&self, message: &str) {
        self.0.lock().unwrap().push(message.to_string());
    }
}

fn bus_with(config: BusConfig, frame: &Frame) -> MessageBus {
    MessageBus::new(config, Arc::new(frame.clone())).unwrap()
}

fn bus(name: &str, frame: &Frame) -> MessageBus {
    bus_with(BusConfig::new(name, OriginPolicy::AcceptAny), frame)
}

/// Parent frame with a `client-app` child, a bound server bus and a bound client bus.
fn bound_pair(server_config: BusConfig, client_config: BusConfig) -> (Frame, Frame, MessageBus, MessageBus) {
    let top = Frame::top("top");
    let child = top.attach_child("#client-app", "client-app");
    let server = bus_with(server_config, &top);
    let client = bus_with(client_config, &child);
    (top, child, server, client)
}

/// Subscribe a handler forwarding the envelope argument into a channel.
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

async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

async fn wait_for_diagnostic(log: &DiagnosticLog, needle: &str) {
    eventually(|| !log.find(needle).is_empty()).await;
}

#[tokio::test]
async fn test_server_and_client_bind() {
    let (_top, _child, server, client) = bound_pair(
        BusConfig::new("server", OriginPolicy::AcceptAny),
        BusConfig::new("client", OriginPolicy::AcceptAny),
    );
    let server_binding = server.init(Some("#client-app")).unwrap();
    let client_binding = client.init(None).unwrap();

    assert_eq!(server_binding.mode, BindMode::Server);
    assert_eq!(server_binding.peer.unwrap().as_str(), "client-app");
    assert_eq!(client_binding.mode, BindMode::Client);
    assert_eq!(client_binding.peer.unwrap().as_str(), "top");
}

#[tokio::test]
async fn test_echo_round_trip_both_ways() {
    let alerts = Arc::new(CollectAlerts::default());
    let top = Frame::top("top");
    let child = top.attach_child("#client-app", "client-app");
    let server = MessageBus::with_parts(
        BusConfig::new("server", OriginPolicy::allow(["client-app"])),
        Arc::new(top.clone()),
        Arc::new(DiagnosticLog::new()),
        alerts.clone(),
    )
    .unwrap();
    let client = bus("client", &child);

    server.init(Some("#client-app")).unwrap();
    client.init(None).unwrap();
    server.set_echo_alert(true);

    client.send("echo", json!({"hello": "world"}), Route::Peer).unwrap();
    server.send("echo", "from server", Route::Peer).unwrap();

    wait_for_diagnostic(server.diagnostics(), r#"server received echo: {"hello":"world"}"#).await;
    wait_for_diagnostic(client.diagnostics(), r#"client received echo: "from server""#).await;
    assert_eq!(
        *alerts.0.lock().unwrap(),
        vec![r#"server received echo: {"hello":"world"}"#.to_string()]
    );
}

#[tokio::test]
async fn test_handlers_receive_envelope_in_registration_order() {
    let (_top, _child, server, client) = bound_pair(
        BusConfig::new("server", OriginPolicy::AcceptAny),
        BusConfig::new("client", OriginPolicy::AcceptAny),
    );
    let order = Arc::new(Mutex::new(Vec::new()));
    for label in ["h1", "h2", "h3"] {
        let order = order.clone();
        server.subscribe("tick", move |args| {
            order
                .lock()
                .unwrap()
                .push((label, args[0]["data"].clone()));
            Ok(())
        });
    }
    let mut done = collect(&server, "tick");
    server.init(Some("#client-app")).unwrap();
    client.init(None).unwrap();

    client.send("tick", 42, Route::Peer).unwrap();
    assert_eq!(next(&mut done).await, json!({"name": "tick", "data": 42}));
    assert_eq!(
        *order.lock().unwrap(),
        vec![("h1", json!(42)), ("h2", json!(42)), ("h3", json!(42))]
    );
}

#[tokio::test]
async fn test_unknown_event_is_ignored() {
    let (_top, _child, server, client) = bound_pair(
        BusConfig::new("server", OriginPolicy::AcceptAny),
        BusConfig::new("client", OriginPolicy::AcceptAny),
    );
    let mut later = collect(&server, "later");
    server.init(Some("#client-app")).unwrap();
    client.init(None).unwrap();

    client.send("nobody-listens", json!([1, 2]), Route::Peer).unwrap();
    client.send("later", "still alive", Route::Peer).unwrap();

    assert_eq!(next(&mut later).await["data"], json!("still alive"));
    assert_eq!(server.diagnostics().count(Severity::Warning), 0);
    assert_eq!(server.diagnostics().count(Severity::Error), 0);
}

#[tokio::test]
async fn test_loopback_without_peer() {
    let top = Frame::top("top");
    let bus = bus("alone", &top);
    let mut rx = collect(&bus, "self-note");
    let binding = bus.init(None).unwrap();
    assert_eq!(binding.peer, None);

    bus.send("self-note", json!({"n": 1}), Route::Loopback).unwrap();
    assert_eq!(next(&mut rx).await["data"], json!({"n": 1}));

    let err = bus.send("self-note", 2, Route::Peer).unwrap_err();
    assert!(matches!(err, FramewireError::TransportUnavailable { .. }));
}

#[tokio::test]
async fn test_failing_handler_does_not_block_others() {
    let (_top, _child, server, client) = bound_pair(
        BusConfig::new("server", OriginPolicy::AcceptAny),
        BusConfig::new("client", OriginPolicy::AcceptAny),
    );
    server.subscribe("work", |_| panic!("handler blew up"));
    server.subscribe("work", |_| Err(HandlerError::rejected("refused")));
    let mut survivor = collect(&server, "work");
    server.init(Some("#client-app")).unwrap();
    client.init(None).unwrap();

    client.send("work", 1, Route::Peer).unwrap();
    client.send("work", 2, Route::Peer).unwrap();

    assert_eq!(next(&mut survivor).await["data"], json!(1));
    assert_eq!(next(&mut survivor).await["data"], json!(2));
    eventually(|| server.diagnostics().find("blew up").len() == 2).await;
    eventually(|| server.diagnostics().find("refused").len() == 2).await;
}

#[tokio::test]
async fn test_fifo_per_link() {
    let (_top, _child, server, client) = bound_pair(
        BusConfig::new("server", OriginPolicy::AcceptAny),
        BusConfig::new("client", OriginPolicy::AcceptAny),
    );
    let mut rx = collect(&client, "seq");
    server.init(Some("#client-app")).unwrap();
    client.init(None).unwrap();

    for i in 0..200 {
        server.send("seq", i, Route::Peer).unwrap();
    }
    for i in 0..200 {
        assert_eq!(next(&mut rx).await["data"], json!(i));
    }
}

#[tokio::test]
async fn test_duplicates_are_both_delivered() {
    let (_top, _child, server, client) = bound_pair(
        BusConfig::new("server", OriginPolicy::AcceptAny),
        BusConfig::new("client", OriginPolicy::AcceptAny),
    );
    let mut rx = collect(&server, "dup");
    server.init(Some("#client-app")).unwrap();
    client.init(None).unwrap();

    client.send("dup", "same", Route::Peer).unwrap();
    client.send("dup", "same", Route::Peer).unwrap();
    assert_eq!(next(&mut rx).await, next(&mut rx).await);
}

#[tokio::test]
async fn test_unsupported_and_closed_peers_report() {
    let top = Frame::top("top");
    top.attach_child_without_messaging("#legacy", "legacy");

    let legacy_bus = bus("to-legacy", &top);
    legacy_bus.init(Some("#legacy")).unwrap();
    let err = legacy_bus.send("echo", "hi", Route::Peer).unwrap_err();
    assert!(matches!(err, FramewireError::TransportUnavailable { .. }));

    let other = Frame::top("other-top");
    let doomed_child = other.attach_child("#doomed", "doomed");
    let doomed_bus = bus("to-doomed", &other);
    doomed_bus.init(Some("#doomed")).unwrap();
    doomed_child.close();
    let err = doomed_bus.send("echo", "hi", Route::Peer).unwrap_err();
    match err {
        FramewireError::TransportUnavailable { target, .. } => assert_eq!(target, "doomed"),
        other => panic!("Expected TransportUnavailable, got {other:?}"),
    }
    assert_eq!(doomed_bus.diagnostics().count(Severity::Error), 1);
}

#[tokio::test]
async fn test_disallowed_origin_dropped() {
    let (_top, _child, server, client) = bound_pair(
        BusConfig::new("server", OriginPolicy::allow(["someone-else"])),
        BusConfig::new("client", OriginPolicy::AcceptAny),
    );
    let mut own = collect(&server, "own");
    server.init(Some("#client-app")).unwrap();
    client.init(None).unwrap();

    client.send("echo", "sneaky", Route::Peer).unwrap();
    wait_for_diagnostic(server.diagnostics(), "disallowed origin 'client-app'").await;
    assert!(server.diagnostics().find("received echo").is_empty());

    // Loopback is always accepted.
    server.send("own", "mine", Route::Loopback).unwrap();
    assert_eq!(next(&mut own).await["data"], json!("mine"));
}

#[tokio::test]
async fn test_malformed_inbound_dropped_listener_survives() {
    let (_top, child, server, _client) = bound_pair(
        BusConfig::new("server", OriginPolicy::AcceptAny),
        BusConfig::new("client", OriginPolicy::AcceptAny),
    );
    let mut rx = collect(&server, "ok");
    server.init(Some("#client-app")).unwrap();

    let parent = child.parent().unwrap();
    parent.post_message(child.id(), "not json".into()).unwrap();
    parent
        .post_message(child.id(), r#"{"data": 1}"#.into())
        .unwrap();
    parent
        .post_message(child.id(), encode_envelope(&Envelope::new("ok", 3)).unwrap())
        .unwrap();

    assert_eq!(next(&mut rx).await["data"], json!(3));
    assert_eq!(server.diagnostics().find("malformed").len(), 2);
}

#[tokio::test]
async fn test_handshake_buffers_until_established() {
    let (_top, _child, server, client) = bound_pair(
        BusConfig::new("server", OriginPolicy::AcceptAny).synchronized(),
        BusConfig::new("client", OriginPolicy::AcceptAny).synchronized(),
    );
    let mut rx = collect(&client, "early");
    server.init(Some("#client-app")).unwrap();
    assert_eq!(server.link_state(), LinkState::Pending);

    for i in 0..3 {
        server.send("early", i, Route::Peer).unwrap();
    }
    assert_eq!(server.buffered(), 3);

    client.init(None).unwrap();
    for i in 0..3 {
        assert_eq!(next(&mut rx).await["data"], json!(i));
    }
    assert_eq!(server.link_state(), LinkState::Established);
    assert_eq!(server.buffered(), 0);

    eventually(|| client.link_state() == LinkState::Established).await;
}

#[tokio::test]
async fn test_handshake_buffer_overflow() {
    let mut config = BusConfig::new("server", OriginPolicy::AcceptAny).synchronized();
    config.sync.max_buffered = 2;
    let top = Frame::top("top");
    top.attach_child("#client-app", "client-app");
    let server = bus_with(config, &top);
    server.init(Some("#client-app")).unwrap();

    server.send("a", 1, Route::Peer).unwrap();
    server.send("b", 2, Route::Peer).unwrap();
    let err = server.send("c", 3, Route::Peer).unwrap_err();
    assert!(matches!(err, FramewireError::BufferFull { capacity: 2 }));
}

#[tokio::test]
async fn test_foreign_ack_ignored() {
    let top = Frame::top("top");
    let child = top.attach_child("#client-app", "client-app");
    let server = bus_with(
        BusConfig::new("server", OriginPolicy::AcceptAny).synchronized(),
        &top,
    );
    server.init(Some("#client-app")).unwrap();

    let ack = Envelope::new(HELLO_ACK_EVENT, json!({"bus": "impostor", "nonce": "bogus"}));
    child
        .parent()
        .unwrap()
        .post_message(child.id(), encode_envelope(&ack).unwrap())
        .unwrap();

    wait_for_diagnostic(server.diagnostics(), "foreign nonce").await;
    assert_eq!(server.link_state(), LinkState::Pending);
}

#[tokio::test]
async fn test_hello_from_sibling_does_not_link() {
    let top = Frame::top("top");
    let child = top.attach_child("#client-app", "client-app");
    let other = top.attach_child("#other", "other");
    let server = bus_with(
        BusConfig::new("server", OriginPolicy::AcceptAny).synchronized(),
        &top,
    );
    server.init(Some("#client-app")).unwrap();
    server.send("queued", 1, Route::Peer).unwrap();

    let hello = Envelope::new(HELLO_EVENT, json!({"bus": "intruder", "nonce": "n-1"}));
    other
        .parent()
        .unwrap()
        .post_message(other.id(), encode_envelope(&hello).unwrap())
        .unwrap();

    wait_for_diagnostic(server.diagnostics(), "not the bound peer").await;
    assert_eq!(server.link_state(), LinkState::Pending);
    assert_eq!(server.buffered(), 1);

    // The bound child saw only the server's own hello: no ack, no flush.
    let mut inbox = child.take_inbox().unwrap();
    let first = decode_envelope(&inbox.try_recv().unwrap().data).unwrap();
    assert_eq!(first.name, HELLO_EVENT);
    assert!(inbox.try_recv().is_err());
}

#[tokio::test]
async fn test_owned_subscription_stops_after_dispose() {
    let (_top, _child, server, client) = bound_pair(
        BusConfig::new("server", OriginPolicy::AcceptAny),
        BusConfig::new("client", OriginPolicy::AcceptAny),
    );
    let owner = framewire_bus::DisposeFlag::new();
    let (tx, mut owned_rx) = mpsc::unbounded_channel();
    server.subscribe_owned("tick", Arc::new(owner.clone()), move |args| {
        tx.send(args[0].clone())
            .map_err(|e| HandlerError::rejected(e.to_string()))
    });
    let mut permanent = collect(&server, "tick");
    server.init(Some("#client-app")).unwrap();
    client.init(None).unwrap();

    client.send("tick", 1, Route::Peer).unwrap();
    assert_eq!(next(&mut permanent).await["data"], json!(1));
    assert_eq!(next(&mut owned_rx).await["data"], json!(1));

    owner.dispose();
    client.send("tick", 2, Route::Peer).unwrap();
    assert_eq!(next(&mut permanent).await["data"], json!(2));
    assert!(owned_rx.try_recv().is_err());
    eventually(|| server.handler_count("tick") == 1).await;
}

#[tokio::test]
async fn test_disposed_bus_stops_dispatching() {
    let (_top, _child, server, client) = bound_pair(
        BusConfig::new("server", OriginPolicy::AcceptAny),
        BusConfig::new("client", OriginPolicy::AcceptAny),
    );
    let mut rx = collect(&server, "after");
    server.init(Some("#client-app")).unwrap();
    client.init(None).unwrap();

    server.dispose();
    // The listener may already have dropped the inbox, so the post itself can fail.
    let _ = client.send("after", 1, Route::Peer);
    assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv())
        .await
        .is_err());
}
