//! Framewire message bus.
//!
//! A publish/subscribe router layered over a one-way, asynchronous,
//! serialize-and-deliver boundary between two isolated contexts. Application
//! code talks to a [`MessageBus`]; the bus turns events into envelopes, hands
//! them to its [`TransportAdapter`] and re-dispatches inbound envelopes to local
//! subscribers.
//!
//! Contexts are provided by a [`Boundary`] host: [`frames::Frame`] for contexts
//! inside one process, [`socket::SocketLink`] for contexts joined over TCP.

pub mod boundary;
pub mod bus;
pub mod diagnostics;
pub mod disposable;
pub mod echo;
pub mod frames;
pub mod handshake;
pub mod registry;
pub mod socket;
pub mod transport;

pub use boundary::{Boundary, BoundaryError, Endpoint, InboundMessage};
pub use bus::{BusState, MessageBus};
pub use diagnostics::DiagnosticLog;
pub use disposable::{Disposable, DisposeFlag};
pub use echo::{AlertSurface, StderrAlert, ECHO_EVENT};
pub use frames::Frame;
pub use handshake::{LinkState, HELLO_ACK_EVENT, HELLO_EVENT};
pub use registry::{
    Handler, HandlerError, HandlerFailure, HandlerResult, NotifyOutcome, SubscriptionRegistry,
};
pub use socket::{LinkError, SocketConfig, SocketLink};
pub use transport::{BindMode, PeerBinding, Route, TransportAdapter};
