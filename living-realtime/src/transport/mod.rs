//! Transport client contract
//!
//! The registry talks to the message broker only through [`Transport`]. The
//! production implementation speaks STOMP over a websocket; [`MemoryTransport`]
//! is an in-process stand-in driven by a harness.

pub mod memory;
pub mod stomp;

use std::fmt;
use std::sync::Arc;

use living_core::ConnectionState;

pub use memory::MemoryTransport;
pub use stomp::{StompConfig, StompWebSocketClient};

/// Callback invoked with the body of every message on a destination
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback receiving connection-state and error events
pub type EventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Handle for one live transport subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: String,
    pub destination: String,
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.destination)
    }
}

/// Connection lifecycle events emitted by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connecting,
    Connected,
    Disconnected { reason: Option<String> },
    Error { message: String },
}

/// Message-queue connection over a web-socket
///
/// All operations are fire-and-forget: results are observed through the
/// event sink or later message delivery, never through a blocking return.
pub trait Transport: Send + Sync {
    /// Start connecting; no-op while connecting or connected
    fn connect(&self);

    /// Close the connection and stop reconnecting
    fn disconnect(&self);

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Send a message to an application destination. Dropped when not connected.
    fn publish(&self, destination: &str, body: String);

    /// Subscribe to a destination. Returns `None` when not connected.
    fn subscribe(&self, destination: &str, handler: MessageHandler) -> Option<SubscriptionHandle>;

    fn unsubscribe(&self, handle: &SubscriptionHandle);

    /// Install the single receiver of connection events
    fn set_event_sink(&self, sink: EventSink);
}
