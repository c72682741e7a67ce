//! Order-book quotation for a single product
//!
//! The quotation topic is only subscribed once the connection is usable.
//! While disconnected the hook arms two triggers, a connection listener and a
//! fallback timer. Whichever fires first subscribes and cancels the other, so
//! exactly one subscription is taken per mount.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use living_core::{ConnectionState, ConnectionStatus, QuoteUpdate, TopicKey, Update};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Mount;
use crate::registry::{ListenerId, SubscriptionRegistry};

/// Delay before subscribing anyway when no connection event arrives
pub const QUOTE_FALLBACK_DELAY: Duration = Duration::from_secs(5);

const REFRESH_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuoteState {
    pub update: Option<QuoteUpdate>,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_subscribed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Immediate,
    Connection,
    Timer,
    Refresh,
}

#[derive(Default)]
struct Armed {
    connection_listener: Option<ListenerId>,
    timer: Option<JoinHandle<()>>,
}

struct QuoteShared {
    registry: SubscriptionRegistry,
    key: TopicKey,
    active: Arc<AtomicBool>,
    fired: AtomicBool,
    /// Whether this hook holds a registry reference on the topic
    held: AtomicBool,
    armed: Mutex<Armed>,
    state: watch::Sender<QuoteState>,
}

impl QuoteShared {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Subscribe once per mount, cancelling whichever trigger did not fire
    fn fire(&self, trigger: Trigger) {
        if !self.is_active() || self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disarm(trigger);
        debug!("[Quote] Subscribing to {} ({:?})", self.key, trigger);
        self.take_reference();
    }

    fn take_reference(&self) {
        if self.held.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry.subscribe(&self.key);
        self.state.send_modify(|state| state.is_subscribed = true);
    }

    fn release_reference(&self) {
        if !self.held.swap(false, Ordering::SeqCst) {
            return;
        }
        self.registry.unsubscribe(&self.key);
        self.state.send_modify(|state| state.is_subscribed = false);
    }

    fn disarm(&self, trigger: Trigger) {
        let armed = std::mem::take(&mut *self.armed.lock());
        if let Some(id) = armed.connection_listener {
            self.registry.remove_connection_listener(id);
        }
        if let Some(timer) = armed.timer {
            // The timer task is finishing on its own when it is the trigger
            if trigger != Trigger::Timer {
                timer.abort();
            }
        }
    }

    fn apply(&self, quote: &QuoteUpdate) {
        if Some(quote.product_id.as_str()) != self.key.id.as_deref() {
            return;
        }
        self.state.send_modify(|state| {
            state.update = Some(quote.clone());
            state.last_updated = Some(Utc::now());
        });
    }
}

pub struct QuoteHook {
    mount: Mount,
    shared: Arc<QuoteShared>,
}

impl QuoteHook {
    pub fn mount(registry: &SubscriptionRegistry, product_id: &str, fallback_delay: Duration) -> Self {
        let mut mount = Mount::new(registry);
        let key = TopicKey::quote(product_id);
        let shared = Arc::new(QuoteShared {
            registry: mount.registry().clone(),
            key: key.clone(),
            active: mount.active_flag(),
            fired: AtomicBool::new(false),
            held: AtomicBool::new(false),
            armed: Mutex::new(Armed::default()),
            state: watch::channel(QuoteState::default()).0,
        });

        let weak = Arc::downgrade(&shared);
        mount.listen(&key, move |update| {
            if let (Update::Quote(quote), Some(shared)) = (update, weak.upgrade()) {
                shared.apply(quote);
            }
        });

        if registry.is_connected() {
            shared.fire(Trigger::Immediate);
        } else {
            arm(&shared, fallback_delay);
        }

        Self { mount, shared }
    }

    pub fn product_id(&self) -> &str {
        self.shared.key.id.as_deref().unwrap_or_default()
    }

    pub fn quote(&self) -> Option<QuoteUpdate> {
        self.shared.state.borrow().update.clone()
    }

    pub fn state(&self) -> QuoteState {
        self.shared.state.borrow().clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared.state.borrow().is_subscribed
    }

    pub fn watch(&self) -> watch::Receiver<QuoteState> {
        self.shared.state.subscribe()
    }

    /// Drop the subscription and take it again shortly after
    pub fn refresh(&self) {
        if !self.shared.is_active() {
            return;
        }
        self.shared.fired.store(true, Ordering::SeqCst);
        self.shared.disarm(Trigger::Refresh);
        self.shared.release_reference();

        match Handle::try_current() {
            Ok(handle) => {
                let weak = Arc::downgrade(&self.shared);
                handle.spawn(async move {
                    tokio::time::sleep(REFRESH_DELAY).await;
                    if let Some(shared) = weak.upgrade() {
                        if shared.is_active() {
                            shared.take_reference();
                        }
                    }
                });
            }
            Err(_) => self.shared.take_reference(),
        }
    }

    pub fn unmount(&mut self) {
        self.mount.unmount();
        self.shared.disarm(Trigger::Refresh);
        self.shared.release_reference();
    }
}

impl Drop for QuoteHook {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn arm(shared: &Arc<QuoteShared>, fallback_delay: Duration) {
    let weak: Weak<QuoteShared> = Arc::downgrade(shared);
    let listener = shared.registry.on_connection(Arc::new(move |status: &ConnectionStatus| {
        if status.state != ConnectionState::Connected {
            return;
        }
        if let Some(shared) = weak.upgrade() {
            shared.fire(Trigger::Connection);
        }
    }));

    let timer = match Handle::try_current() {
        Ok(handle) => {
            let weak = Arc::downgrade(shared);
            Some(handle.spawn(async move {
                tokio::time::sleep(fallback_delay).await;
                if let Some(shared) = weak.upgrade() {
                    shared.fire(Trigger::Timer);
                }
            }))
        }
        Err(_) => {
            warn!("[Quote] No runtime for fallback timer; waiting for connection");
            None
        }
    };

    let mut armed = shared.armed.lock();
    armed.connection_listener = Some(listener);
    armed.timer = timer;
}

impl std::fmt::Debug for QuoteHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteHook")
            .field("product_id", &self.product_id())
            .field("is_subscribed", &self.is_subscribed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use rust_decimal_macros::dec;

    const QUOTE_BODY: &str = r#"{"rt_cd":"0","output":{"stck_prpr":"5120","askp1":"5130","askp_rsqn1":"10","bidp1":"5120","bidp_rsqn1":"7"}}"#;

    fn quote_subscribes(transport: &MemoryTransport, product_id: &str) -> usize {
        let destination = TopicKey::quote(product_id).destination();
        transport
            .subscribe_calls()
            .iter()
            .filter(|dest| **dest == destination)
            .count()
    }

    #[tokio::test]
    async fn test_connected_subscribes_immediately() {
        let transport = Arc::new(MemoryTransport::connected());
        let registry = SubscriptionRegistry::new(transport.clone());
        let hook = QuoteHook::mount(&registry, "395400", QUOTE_FALLBACK_DELAY);

        assert!(hook.is_subscribed());
        assert_eq!(quote_subscribes(&transport, "395400"), 1);

        transport.deliver(&TopicKey::quote("395400").destination(), QUOTE_BODY);
        let quote = hook.quote().unwrap();
        assert_eq!(quote.order_book.spread, Some(dec!(10)));
        assert!(hook.state().last_updated.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_event_wins_over_timer() {
        let transport = Arc::new(MemoryTransport::new());
        let registry = SubscriptionRegistry::new(transport.clone());
        let hook = QuoteHook::mount(&registry, "395400", QUOTE_FALLBACK_DELAY);
        assert!(!hook.is_subscribed());
        assert_eq!(registry.connection_listener_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        transport.complete_connect();
        assert!(hook.is_subscribed());

        // Past the fallback deadline: the cancelled timer must not subscribe again
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(quote_subscribes(&transport, "395400"), 1);
        assert_eq!(registry.ref_count(&TopicKey::quote("395400")), 1);
        assert_eq!(registry.connection_listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_when_no_connection_event() {
        let transport = Arc::new(MemoryTransport::new());
        let registry = SubscriptionRegistry::new(transport.clone());
        let hook = QuoteHook::mount(&registry, "395400", QUOTE_FALLBACK_DELAY);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(hook.is_subscribed());
        assert_eq!(registry.connection_listener_count(), 0);
        // Pending topic requested a connection
        assert_eq!(transport.connect_calls(), 1);

        transport.complete_connect();
        assert!(registry.is_live(&TopicKey::quote("395400")));
        assert_eq!(quote_subscribes(&transport, "395400"), 1);
    }

    #[tokio::test]
    async fn test_other_product_ignored() {
        let transport = Arc::new(MemoryTransport::connected());
        let registry = SubscriptionRegistry::new(transport.clone());
        let hook = QuoteHook::mount(&registry, "395400", QUOTE_FALLBACK_DELAY);

        transport.deliver(&TopicKey::quote("338100").destination(), QUOTE_BODY);
        assert!(hook.quote().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_resubscribes() {
        let transport = Arc::new(MemoryTransport::connected());
        let registry = SubscriptionRegistry::new(transport.clone());
        let key = TopicKey::quote("395400");
        let hook = QuoteHook::mount(&registry, "395400", QUOTE_FALLBACK_DELAY);

        hook.refresh();
        assert!(!hook.is_subscribed());
        assert_eq!(transport.live_count(&key.destination()), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(hook.is_subscribed());
        assert_eq!(transport.live_count(&key.destination()), 1);
        assert_eq!(registry.ref_count(&key), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_before_trigger_leaves_nothing() {
        let transport = Arc::new(MemoryTransport::new());
        let registry = SubscriptionRegistry::new(transport.clone());
        let mut hook = QuoteHook::mount(&registry, "395400", QUOTE_FALLBACK_DELAY);

        hook.unmount();
        tokio::time::sleep(Duration::from_secs(6)).await;
        transport.complete_connect();

        assert!(!hook.is_subscribed());
        assert_eq!(quote_subscribes(&transport, "395400"), 0);
        assert_eq!(registry.topic_count(), 0);
        assert_eq!(registry.connection_listener_count(), 0);
    }
}
