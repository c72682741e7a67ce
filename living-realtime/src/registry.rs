//! Subscription registry
//!
//! Single source of truth mapping topic keys to transport subscriptions and
//! listener callbacks. Transport subscriptions are reference counted: one per
//! topic no matter how many hooks hold it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use living_core::{
    ConnectionState, ConnectionStatus, Envelope, ServerError, SubscribeIntent, TopicKey, Update,
    ERROR_DESTINATION, SUBSCRIBE_INTENT_DESTINATION,
};

use crate::transport::{MessageHandler, SubscriptionHandle, Transport, TransportEvent};

/// Receives typed updates for one topic
pub type UpdateListener = Arc<dyn Fn(&Update) + Send + Sync>;

/// Receives the connection status after every change
pub type ConnectionListener = Arc<dyn Fn(&ConnectionStatus) + Send + Sync>;

/// Receives transport and server-pushed error messages
pub type ErrorListener = Arc<dyn Fn(&str) + Send + Sync>;

/// De-registration handle for a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ListenerSet<F: ?Sized> {
    entries: Mutex<Vec<(ListenerId, Arc<F>)>>,
}

impl<F: ?Sized> ListenerSet<F> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    fn add(&self, id: ListenerId, listener: Arc<F>) {
        self.entries.lock().push((id, listener));
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Copy of the current listeners so callbacks run without the lock held
    fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries.lock().iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[derive(Default)]
struct TopicEntry {
    /// Number of outstanding `subscribe` calls
    refs: usize,
    /// Live transport subscription; `None` while pending a connection
    handle: Option<SubscriptionHandle>,
    listeners: Vec<(ListenerId, UpdateListener)>,
}

impl TopicEntry {
    fn is_unused(&self) -> bool {
        self.refs == 0 && self.listeners.is_empty()
    }
}

struct RegistryInner {
    transport: Arc<dyn Transport>,
    topics: DashMap<TopicKey, TopicEntry>,
    error_handle: Mutex<Option<SubscriptionHandle>>,
    status: RwLock<ConnectionStatus>,
    connection_listeners: ListenerSet<dyn Fn(&ConnectionStatus) + Send + Sync>,
    error_listeners: ListenerSet<dyn Fn(&str) + Send + Sync>,
    next_listener_id: AtomicU64,
}

/// Cloneable handle to the shared registry
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    /// Create a registry over `transport` and install it as the event sink
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let status = ConnectionStatus {
            state: transport.state(),
            ..Default::default()
        };
        let inner = Arc::new(RegistryInner {
            transport: Arc::clone(&transport),
            topics: DashMap::new(),
            error_handle: Mutex::new(None),
            status: RwLock::new(status),
            connection_listeners: ListenerSet::new(),
            error_listeners: ListenerSet::new(),
            next_listener_id: AtomicU64::new(1),
        });

        let weak: Weak<RegistryInner> = Arc::downgrade(&inner);
        transport.set_event_sink(Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                SubscriptionRegistry { inner }.handle_transport_event(event);
            }
        }));

        let registry = Self { inner };
        if registry.inner.transport.is_connected() {
            registry.subscribe_error_topic();
        }
        registry
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst))
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    pub fn connect(&self) {
        self.inner.transport.connect();
    }

    pub fn disconnect(&self) {
        self.inner.transport.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.read().clone()
    }

    pub fn on_connection(&self, listener: ConnectionListener) -> ListenerId {
        let id = self.next_listener_id();
        self.inner.connection_listeners.add(id, listener);
        id
    }

    pub fn remove_connection_listener(&self, id: ListenerId) -> bool {
        self.inner.connection_listeners.remove(id)
    }

    pub fn on_error(&self, listener: ErrorListener) -> ListenerId {
        let id = self.next_listener_id();
        self.inner.error_listeners.add(id, listener);
        id
    }

    pub fn remove_error_listener(&self, id: ListenerId) -> bool {
        self.inner.error_listeners.remove(id)
    }

    // ------------------------------------------------------------------
    // Topics
    // ------------------------------------------------------------------

    /// Take a reference on `key`, creating the transport subscription if none
    /// is live. While disconnected the topic stays pending and a connection
    /// is requested.
    pub fn subscribe(&self, key: &TopicKey) {
        let transport = &self.inner.transport;
        let (created, pending) = {
            let mut entry = self.inner.topics.entry(key.clone()).or_default();
            entry.refs += 1;

            if entry.handle.is_some() {
                (false, false)
            } else if transport.is_connected() {
                entry.handle = transport.subscribe(&key.destination(), self.handler_for(key));
                (entry.handle.is_some(), entry.handle.is_none())
            } else {
                (false, true)
            }
        };

        if created {
            debug!("[Registry] Subscribed to {}", key);
            if key.kind.is_keyed() {
                self.publish_intent();
            }
        }

        if pending {
            debug!("[Registry] {} pending until connected", key);
            if transport.state() == ConnectionState::Disconnected {
                transport.connect();
            }
        }
    }

    /// Drop a reference on `key`; the transport subscription is removed with
    /// the last reference.
    pub fn unsubscribe(&self, key: &TopicKey) {
        let released = {
            let Some(mut entry) = self.inner.topics.get_mut(key) else {
                debug!("[Registry] Unsubscribe for unknown topic {}", key);
                return;
            };
            if entry.refs == 0 {
                return;
            }
            entry.refs -= 1;
            if entry.refs == 0 {
                entry.handle.take()
            } else {
                None
            }
        };

        self.inner.topics.remove_if(key, |_, entry| entry.is_unused());

        if let Some(handle) = released {
            debug!("[Registry] Unsubscribed from {}", key);
            self.inner.transport.unsubscribe(&handle);
        }
    }

    pub fn add_listener(&self, key: &TopicKey, listener: UpdateListener) -> ListenerId {
        let id = self.next_listener_id();
        self.inner
            .topics
            .entry(key.clone())
            .or_default()
            .listeners
            .push((id, listener));
        id
    }

    pub fn remove_listener(&self, key: &TopicKey, id: ListenerId) -> bool {
        let removed = match self.inner.topics.get_mut(key) {
            Some(mut entry) => {
                let before = entry.listeners.len();
                entry.listeners.retain(|(existing, _)| *existing != id);
                entry.listeners.len() != before
            }
            None => false,
        };
        self.inner.topics.remove_if(key, |_, entry| entry.is_unused());
        removed
    }

    fn handler_for(&self, key: &TopicKey) -> MessageHandler {
        let weak = Arc::downgrade(&self.inner);
        let key = key.clone();
        Arc::new(move |body: &str| {
            if let Some(inner) = weak.upgrade() {
                SubscriptionRegistry { inner }.dispatch(&key, body);
            }
        })
    }

    /// Single dispatch entry point for inbound messages on `key`
    ///
    /// Malformed or rejected bodies are logged and dropped.
    pub fn dispatch(&self, key: &TopicKey, body: &str) {
        let received_at = Utc::now();
        let decoded = Envelope::parse(body)
            .and_then(|envelope| envelope.into_payload(key.kind))
            .and_then(|payload| Update::decode(key, payload, received_at));

        let update = match decoded {
            Ok(update) => update,
            Err(e) => {
                debug!("[Registry] Discarding message on {}: {}", key, e);
                return;
            }
        };

        let listeners: Vec<UpdateListener> = match self.inner.topics.get(key) {
            Some(entry) => entry.listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return,
        };

        self.inner.status.write().last_update = Some(received_at);

        for listener in listeners {
            listener(&update);
        }
    }

    /// Publish the current set of live stock codes
    fn publish_intent(&self) {
        let codes: BTreeSet<String> = self
            .inner
            .topics
            .iter()
            .filter(|entry| entry.value().handle.is_some())
            .filter_map(|entry| entry.key().stock_code().map(str::to_string))
            .collect();

        if codes.is_empty() {
            return;
        }

        match serde_json::to_string(&SubscribeIntent::new(&codes)) {
            Ok(body) => self
                .inner
                .transport
                .publish(SUBSCRIBE_INTENT_DESTINATION, body),
            Err(e) => warn!("[Registry] Failed to encode subscribe intent: {}", e),
        }
    }

    /// Create transport subscriptions for every referenced topic without one
    fn materialize_pending(&self) -> usize {
        let transport = &self.inner.transport;
        let mut created = 0;
        for mut entry in self.inner.topics.iter_mut() {
            if entry.refs == 0 || entry.handle.is_some() {
                continue;
            }
            let handler = self.handler_for(entry.key());
            let destination = entry.key().destination();
            entry.handle = transport.subscribe(&destination, handler);
            if entry.handle.is_some() {
                created += 1;
            }
        }
        created
    }

    fn subscribe_error_topic(&self) {
        let mut error_handle = self.inner.error_handle.lock();
        if error_handle.is_some() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        *error_handle = self.inner.transport.subscribe(
            ERROR_DESTINATION,
            Arc::new(move |body: &str| {
                if let Some(inner) = weak.upgrade() {
                    SubscriptionRegistry { inner }.handle_server_error(body);
                }
            }),
        );
    }

    fn handle_server_error(&self, body: &str) {
        match ServerError::parse(body) {
            Ok(err) => {
                warn!("[Registry] Server error: {}", err.msg1);
                {
                    let mut status = self.inner.status.write();
                    status.last_error = Some(err.msg1.clone());
                    status.last_update = Some(Utc::now());
                }
                self.notify_error(&err.msg1);
                self.notify_connection();
            }
            Err(e) => debug!("[Registry] Discarding malformed error message: {}", e),
        }
    }

    fn notify_connection(&self) {
        let status = self.status();
        for listener in self.inner.connection_listeners.snapshot() {
            listener(&status);
        }
    }

    fn notify_error(&self, message: &str) {
        for listener in self.inner.error_listeners.snapshot() {
            listener(message);
        }
    }

    fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connecting => {
                self.inner.status.write().state = ConnectionState::Connecting;
                self.notify_connection();
            }
            TransportEvent::Connected => {
                {
                    let mut status = self.inner.status.write();
                    status.state = ConnectionState::Connected;
                    status.connected_at = Some(Utc::now());
                    status.last_error = None;
                }
                self.subscribe_error_topic();
                let restored = self.materialize_pending();
                if restored > 0 {
                    info!("[Registry] Restored {} subscriptions", restored);
                }
                self.publish_intent();
                self.notify_connection();
            }
            TransportEvent::Disconnected { reason } => {
                {
                    let mut status = self.inner.status.write();
                    status.state = ConnectionState::Disconnected;
                    status.connected_at = None;
                }
                // Handles are dead; topics stay referenced and become pending
                for mut entry in self.inner.topics.iter_mut() {
                    entry.handle = None;
                }
                self.inner.error_handle.lock().take();
                info!(
                    "[Registry] Transport disconnected: {}",
                    reason.as_deref().unwrap_or("no reason")
                );
                self.notify_connection();
            }
            TransportEvent::Error { message } => {
                self.inner.status.write().last_error = Some(message.clone());
                self.notify_error(&message);
                self.notify_connection();
            }
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Number of topics with a live transport subscription
    pub fn live_subscription_count(&self) -> usize {
        self.inner
            .topics
            .iter()
            .filter(|entry| entry.value().handle.is_some())
            .count()
    }

    pub fn is_live(&self, key: &TopicKey) -> bool {
        self.inner
            .topics
            .get(key)
            .map(|entry| entry.handle.is_some())
            .unwrap_or(false)
    }

    pub fn ref_count(&self, key: &TopicKey) -> usize {
        self.inner.topics.get(key).map(|entry| entry.refs).unwrap_or(0)
    }

    pub fn listener_count(&self, key: &TopicKey) -> usize {
        self.inner
            .topics
            .get(key)
            .map(|entry| entry.listeners.len())
            .unwrap_or(0)
    }

    pub fn connection_listener_count(&self) -> usize {
        self.inner.connection_listeners.len()
    }

    pub fn topic_count(&self) -> usize {
        self.inner.topics.len()
    }

    /// Release every transport subscription and drop all listeners
    pub fn teardown(&self) {
        let handles: Vec<SubscriptionHandle> = self
            .inner
            .topics
            .iter_mut()
            .filter_map(|mut entry| entry.handle.take())
            .collect();
        self.inner.topics.clear();

        let error_handle = self.inner.error_handle.lock().take();
        for handle in handles.iter().chain(error_handle.iter()) {
            self.inner.transport.unsubscribe(handle);
        }

        self.inner.connection_listeners.clear();
        self.inner.error_listeners.clear();
        info!("[Registry] Torn down ({} subscriptions released)", handles.len());
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("topics", &self.topic_count())
            .field("live", &self.live_subscription_count())
            .field("state", &self.inner.status.read().state)
            .finish()
    }
}
