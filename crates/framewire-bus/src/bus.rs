//! Message bus: the facade one context uses to talk to its peer.
//!
//! A bus composes a [`SubscriptionRegistry`], a [`TransportAdapter`], a
//! [`DiagnosticLog`] and, optionally, the hello/ack [`Handshake`]. It moves
//! through `Unbound → Bound → Disposed`:
//!
//! - `Unbound`: handlers can be registered and loopback sends are queued on the
//!   own context; peer sends fail with `NotBound`.
//! - `Bound`: `init` resolved a peer and started the inbound listener, which
//!   re-enters `notify` with the envelope as the single handler argument.
//!   Hello and ack envelopes never reach the registry; they are honoured only
//!   when they come from the bound peer.
//! - `Disposed`: the listener is stopped and every operation that touches the
//!   transport fails with `Disposed`.
//!
//! Nothing on this surface panics. Boundary failures become an error
//! diagnostic plus a typed `Err`.

use crate::boundary::Boundary;
use crate::diagnostics::{DiagnosticLog, TAG_BUS, TAG_HANDSHAKE};
use crate::disposable::{Disposable, DisposeFlag};
use crate::echo::{AlertSurface, EchoChannel, StderrAlert, ECHO_EVENT};
use crate::handshake::{Greeting, Handshake, LinkState, HELLO_ACK_EVENT, HELLO_EVENT};
use crate::registry::{HandlerResult, SubscriptionRegistry};
use crate::transport::{ListenerHandle, PeerBinding, Route, TransportAdapter};
use framewire_types::{
    BusConfig, ContextId, Envelope, FramewireError, FramewireResult,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info};

/// Lifecycle state of a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Unbound,
    Bound,
    Disposed,
}

impl std::fmt::Display for BusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusState::Unbound => write!(f, "unbound"),
            BusState::Bound => write!(f, "bound"),
            BusState::Disposed => write!(f, "disposed"),
        }
    }
}

struct Lifecycle {
    state: BusState,
    binding: Option<PeerBinding>,
    listener: Option<ListenerHandle>,
    builtins_registered: bool,
}

struct BusInner {
    config: BusConfig,
    registry: SubscriptionRegistry,
    transport: TransportAdapter,
    diagnostics: Arc<DiagnosticLog>,
    echo: Arc<EchoChannel>,
    handshake: Handshake,
    lifecycle: Mutex<Lifecycle>,
    disposed: DisposeFlag,
}

/// Publish/subscribe router for one context. Clones share the same bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Create an unbound bus with its own diagnostic log and stderr alerts.
    pub fn new(config: BusConfig, boundary: Arc<dyn Boundary>) -> FramewireResult<Self> {
        let diagnostics = Arc::new(DiagnosticLog::with_capacity(config.diagnostics.history));
        Self::with_parts(config, boundary, diagnostics, Arc::new(StderrAlert))
    }

    /// Create an unbound bus from injected collaborators.
    pub fn with_parts(
        config: BusConfig,
        boundary: Arc<dyn Boundary>,
        diagnostics: Arc<DiagnosticLog>,
        alert: Arc<dyn AlertSurface>,
    ) -> FramewireResult<Self> {
        config.validate()?;
        let echo = Arc::new(EchoChannel::new(
            config.name.clone(),
            config.echo_alert,
            alert,
            diagnostics.clone(),
        ));
        let inner = BusInner {
            registry: SubscriptionRegistry::new(),
            transport: TransportAdapter::new(boundary, diagnostics.clone()),
            handshake: Handshake::new(&config.sync),
            echo,
            diagnostics,
            lifecycle: Mutex::new(Lifecycle {
                state: BusState::Unbound,
                binding: None,
                listener: None,
                builtins_registered: false,
            }),
            disposed: DisposeFlag::new(),
            config,
        };
        debug!(bus = %inner.config.name, context = %inner.transport.context_id(), "Message bus created");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    // --- registry ---

    /// Ensure `event_name` is known. Idempotent.
    pub fn register(&self, event_name: &str) -> &Self {
        self.inner.registry.register(event_name);
        self
    }

    /// Append a handler for `event_name`.
    pub fn subscribe<F>(&self, event_name: &str, callback: F) -> &Self
    where
        F: Fn(&[Value]) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(event_name, callback);
        self
    }

    /// Append a handler that lives only as long as `owner`.
    pub fn subscribe_owned<F>(
        &self,
        event_name: &str,
        owner: Arc<dyn Disposable>,
        callback: F,
    ) -> &Self
    where
        F: Fn(&[Value]) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.registry.subscribe_owned(event_name, owner, callback);
        self
    }

    /// Invoke every handler of `event_name` locally. Unknown names are a no-op.
    pub fn notify(&self, event_name: &str, args: &[Value]) -> &Self {
        self.inner.dispatch(event_name, args);
        self
    }

    pub fn event_names(&self) -> Vec<String> {
        self.inner.registry.event_names()
    }

    pub fn has_event(&self, event_name: &str) -> bool {
        self.inner.registry.has_event(event_name)
    }

    pub fn handler_count(&self, event_name: &str) -> usize {
        self.inner.registry.handler_count(event_name)
    }

    // --- transport ---

    /// Send one event to the peer or to this context.
    ///
    /// Exactly one delivery attempt is made; failures are also recorded as
    /// diagnostics. With synchronization enabled, peer sends made before the
    /// handshake completes are buffered and this returns `Ok`.
    pub fn send(&self, name: &str, data: impl Into<Value>, route: Route) -> FramewireResult<()> {
        self.inner.send(Envelope::new(name, data), route)
    }

    /// Serialize a typed payload and send it.
    pub fn send_payload<T: Serialize>(
        &self,
        name: &str,
        payload: &T,
        route: Route,
    ) -> FramewireResult<()> {
        let envelope = Envelope::with_payload(name, payload).map_err(|e| {
            self.inner
                .diagnostics
                .error(TAG_BUS, format!("Unable to serialize payload of '{name}': {e}"));
            FramewireError::Serialization(e.to_string())
        })?;
        self.inner.send(envelope, route)
    }

    /// Bind the peer and start listening.
    ///
    /// A selector that locates a child binds server mode; otherwise the bus
    /// binds client mode against its parent. Only the first successful call
    /// binds; later calls fail with `AlreadyBound` and change nothing.
    pub fn init(&self, selector: Option<&str>) -> FramewireResult<PeerBinding> {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        match lifecycle.state {
            BusState::Disposed => {
                inner
                    .diagnostics
                    .error(TAG_BUS, format!("Bus '{}' is disposed - init refused", inner.config.name));
                return Err(FramewireError::Disposed(inner.config.name.clone()));
            }
            BusState::Bound => {
                let peer = lifecycle
                    .binding
                    .as_ref()
                    .map(|b| b.to_string())
                    .unwrap_or_default();
                inner.diagnostics.error(
                    TAG_BUS,
                    format!("Bus '{}' is already bound ({peer}) - init ignored", inner.config.name),
                );
                return Err(FramewireError::AlreadyBound {
                    bus: inner.config.name.clone(),
                    peer,
                });
            }
            BusState::Unbound => {}
        }

        if !lifecycle.builtins_registered {
            self.register_builtins();
            lifecycle.builtins_registered = true;
        }

        let binding = inner.transport.bind_peer(selector);

        let weak: Weak<BusInner> = Arc::downgrade(inner);
        let listener = inner
            .transport
            .install_inbound_listener(inner.config.origin_policy.clone(), move |name, envelope, origin| {
                if let Some(bus) = weak.upgrade() {
                    bus.dispatch_inbound(name, envelope, origin);
                }
            })
            .map_err(|e| {
                inner.transport.unbind_peer();
                inner.diagnostics.error(TAG_BUS, format!("Unable to listen: {e}"));
                e
            })?;

        lifecycle.state = BusState::Bound;
        lifecycle.binding = Some(binding.clone());
        lifecycle.listener = Some(listener);
        drop(lifecycle);

        inner.diagnostics.info(
            TAG_BUS,
            format!("Bus '{}' bound in {binding}", inner.config.name),
        );

        if inner.handshake.state() == LinkState::Pending {
            let hello = inner.handshake.hello(&inner.config.name);
            // A missing peer is already recorded; the link stays pending.
            let _ = inner.transport.deliver(&hello, Route::Peer);
        }

        Ok(binding)
    }

    fn register_builtins(&self) {
        let echo = self.inner.echo.clone();
        self.inner
            .registry
            .subscribe(ECHO_EVENT, move |args| echo.handle(args));
    }

    // --- echo and inspection ---

    pub fn set_echo_alert(&self, enabled: bool) -> &Self {
        self.inner.echo.set_alert(enabled);
        self
    }

    pub fn echo_alert(&self) -> bool {
        self.inner.echo.alert_enabled()
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn context_id(&self) -> &ContextId {
        self.inner.transport.context_id()
    }

    pub fn state(&self) -> BusState {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .state
    }

    /// The binding made by `init`, if any.
    pub fn binding(&self) -> Option<PeerBinding> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .binding
            .clone()
    }

    pub fn link_state(&self) -> LinkState {
        self.inner.handshake.state()
    }

    /// Envelopes waiting for the handshake.
    pub fn buffered(&self) -> usize {
        self.inner.handshake.buffered()
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticLog> {
        &self.inner.diagnostics
    }
}

impl Disposable for MessageBus {
    /// Stop the listener and refuse further transport use. Idempotent.
    fn dispose(&self) {
        let mut lifecycle = self
            .inner
            .lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if lifecycle.state == BusState::Disposed {
            return;
        }
        if let Some(listener) = lifecycle.listener.take() {
            listener.stop();
        }
        lifecycle.state = BusState::Disposed;
        self.inner.disposed.dispose();
        drop(lifecycle);
        info!(bus = %self.inner.config.name, "Message bus disposed");
    }

    fn is_disposed(&self) -> bool {
        self.inner.disposed.is_disposed()
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("name", &self.inner.config.name)
            .field("context", self.context_id())
            .field("state", &self.state())
            .field("link", &self.link_state())
            .finish()
    }
}

impl BusInner {
    fn send(&self, envelope: Envelope, route: Route) -> FramewireResult<()> {
        let state = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()).state;
        match (state, route) {
            (BusState::Disposed, _) => {
                self.diagnostics.error(
                    TAG_BUS,
                    format!("Bus '{}' is disposed - '{}' not sent", self.config.name, envelope.name),
                );
                return Err(FramewireError::Disposed(self.config.name.clone()));
            }
            (BusState::Unbound, Route::Peer) => {
                self.diagnostics.error(
                    TAG_BUS,
                    format!(
                        "Bus '{}' has no peer yet - '{}' not sent (call init first)",
                        self.config.name, envelope.name
                    ),
                );
                return Err(FramewireError::NotBound(self.config.name.clone()));
            }
            _ => {}
        }

        match route {
            Route::Loopback => self.transport.deliver(&envelope, Route::Loopback),
            Route::Peer => {
                let name = envelope.name.clone();
                match self.handshake.admit(envelope) {
                    Ok(Some(envelope)) => self.transport.deliver(&envelope, Route::Peer),
                    Ok(None) => {
                        self.diagnostics
                            .debug(TAG_HANDSHAKE, format!("Buffered '{name}' until the peer answers"));
                        Ok(())
                    }
                    Err(e) => {
                        self.diagnostics
                            .error(TAG_HANDSHAKE, format!("Unable to buffer '{name}': {e}"));
                        Err(e)
                    }
                }
            }
        }
    }

    fn dispatch(&self, event_name: &str, args: &[Value]) {
        let outcome = self.registry.notify(event_name, args);
        for failure in &outcome.failures {
            self.diagnostics.warning(
                TAG_BUS,
                format!(
                    "Handler #{} for '{event_name}' failed: {}",
                    failure.index, failure.error
                ),
            );
        }
    }

    fn dispatch_inbound(&self, name: &str, envelope: &Envelope, origin: &ContextId) {
        if self.disposed.is_disposed() {
            return;
        }
        debug!(bus = %self.config.name, event = name, origin = %origin, "Dispatching inbound envelope");
        match name {
            HELLO_EVENT | HELLO_ACK_EVENT => self.on_handshake(name, envelope, origin),
            _ => self.dispatch(name, &[envelope.to_value()]),
        }
    }

    fn on_handshake(&self, name: &str, envelope: &Envelope, origin: &ContextId) {
        if self.transport.peer_id().as_ref() != Some(origin) {
            self.diagnostics.warning(
                TAG_HANDSHAKE,
                format!("Ignored '{name}' from '{origin}': not the bound peer"),
            );
            return;
        }
        let greeting: Greeting = match serde_json::from_value(envelope.data.clone()) {
            Ok(greeting) => greeting,
            Err(e) => {
                self.diagnostics.warning(
                    TAG_HANDSHAKE,
                    format!("Dropped malformed '{name}' from '{origin}': {e}"),
                );
                return;
            }
        };

        if name == HELLO_EVENT {
            let ack = self.handshake.ack_for(&self.config.name, &greeting);
            // Failures are recorded by the transport; the link stays pending.
            if self.transport.deliver(&ack, Route::Peer).is_err() {
                return;
            }
        } else if !self.handshake.acknowledges(&greeting) {
            self.diagnostics.warning(
                TAG_HANDSHAKE,
                format!("Ignored ack from '{}' with a foreign nonce", greeting.bus),
            );
            return;
        }
        self.establish(&greeting.bus);
    }

    fn establish(&self, peer_bus: &str) {
        let established = self.handshake.establish(|envelope| {
            // Failures are already recorded by the transport; the envelope is dropped.
            let _ = self.transport.deliver(&envelope, Route::Peer);
        });
        if established {
            self.diagnostics.info(
                TAG_HANDSHAKE,
                format!("Bus '{}' linked with '{peer_bus}'", self.config.name),
            );
        }
    }
}
