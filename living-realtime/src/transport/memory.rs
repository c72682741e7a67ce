//! In-process transport
//!
//! Records every call and lets a harness drive connection events and deliver
//! message bodies synchronously. Used by tests and offline tooling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};

use living_core::ConnectionState;

use super::{EventSink, MessageHandler, SubscriptionHandle, Transport, TransportEvent};

#[derive(Default)]
pub struct MemoryTransport {
    state: RwLock<ConnectionState>,
    sink: RwLock<Option<EventSink>>,
    /// Live subscriptions by handle id
    live: Mutex<HashMap<String, (String, MessageHandler)>>,
    next_id: AtomicU64,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    subscribe_calls: Mutex<Vec<String>>,
    unsubscribe_calls: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, String)>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start in the connected state without emitting an event
    pub fn connected() -> Self {
        let transport = Self::default();
        *transport.state.write() = ConnectionState::Connected;
        transport
    }

    fn emit(&self, event: TransportEvent) {
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }

    /// Simulate the handshake completing
    pub fn complete_connect(&self) {
        *self.state.write() = ConnectionState::Connected;
        self.emit(TransportEvent::Connected);
    }

    /// Simulate the connection dropping; live subscriptions are lost
    pub fn drop_connection(&self, reason: Option<&str>) {
        *self.state.write() = ConnectionState::Disconnected;
        self.live.lock().clear();
        self.emit(TransportEvent::Disconnected {
            reason: reason.map(str::to_string),
        });
    }

    /// Simulate a transport-level error
    pub fn fail(&self, message: &str) {
        self.emit(TransportEvent::Error {
            message: message.to_string(),
        });
    }

    /// Deliver a body to every live subscription on `destination`.
    /// Returns the number of handlers invoked.
    pub fn deliver(&self, destination: &str, body: &str) -> usize {
        let handlers: Vec<MessageHandler> = self
            .live
            .lock()
            .values()
            .filter(|(dest, _)| dest == destination)
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in &handlers {
            handler(body);
        }
        handlers.len()
    }

    pub fn live_count(&self, destination: &str) -> usize {
        self.live
            .lock()
            .values()
            .filter(|(dest, _)| dest == destination)
            .count()
    }

    pub fn total_live(&self) -> usize {
        self.live.lock().len()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Destinations passed to `subscribe`, in call order
    pub fn subscribe_calls(&self) -> Vec<String> {
        self.subscribe_calls.lock().clone()
    }

    pub fn unsubscribe_calls(&self) -> Vec<String> {
        self.unsubscribe_calls.lock().clone()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write();
        if *state == ConnectionState::Disconnected {
            *state = ConnectionState::Connecting;
            drop(state);
            self.emit(TransportEvent::Connecting);
        }
    }

    fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.state() != ConnectionState::Disconnected {
            self.drop_connection(Some("client disconnect"));
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn publish(&self, destination: &str, body: String) {
        if self.is_connected() {
            self.published.lock().push((destination.to_string(), body));
        }
    }

    fn subscribe(&self, destination: &str, handler: MessageHandler) -> Option<SubscriptionHandle> {
        self.subscribe_calls.lock().push(destination.to_string());
        if !self.is_connected() {
            return None;
        }
        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.live
            .lock()
            .insert(id.clone(), (destination.to_string(), handler));
        Some(SubscriptionHandle {
            id,
            destination: destination.to_string(),
        })
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.unsubscribe_calls.lock().push(handle.destination.clone());
        self.live.lock().remove(&handle.id);
    }

    fn set_event_sink(&self, sink: EventSink) {
        *self.sink.write() = Some(sink);
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("state", &self.state())
            .field("live", &self.total_live())
            .finish()
    }
}
