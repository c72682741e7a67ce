use std::sync::Arc;

use living_core::{OrderUpdate, TopicKey, Update};
use tokio::sync::watch;

use super::Mount;
use crate::registry::SubscriptionRegistry;

/// Order events kept per hook
pub const ORDER_HISTORY_LIMIT: usize = 20;

/// Bounded order-event history, most recent first
pub struct OrderHook {
    mount: Mount,
    state: Arc<watch::Sender<Vec<OrderUpdate>>>,
}

impl OrderHook {
    pub fn mount(registry: &SubscriptionRegistry) -> Self {
        let (state, _) = watch::channel(Vec::new());
        let state = Arc::new(state);
        let mut mount = Mount::new(registry);
        let key = TopicKey::orders();

        let sink = Arc::clone(&state);
        mount.listen(&key, move |update| {
            if let Update::Order(order) = update {
                if order.order_id.is_empty() {
                    return;
                }
                sink.send_modify(|history| {
                    history.insert(0, order.clone());
                    history.truncate(ORDER_HISTORY_LIMIT);
                });
            }
        });
        mount.subscribe(&key);

        Self { mount, state }
    }

    pub fn updates(&self) -> Vec<OrderUpdate> {
        self.state.borrow().clone()
    }

    /// Most recent event for `order_id`
    pub fn get(&self, order_id: &str) -> Option<OrderUpdate> {
        self.state
            .borrow()
            .iter()
            .find(|update| update.order_id == order_id)
            .cloned()
    }

    pub fn clear(&self) {
        self.state.send_modify(Vec::clear);
    }

    pub fn watch(&self) -> watch::Receiver<Vec<OrderUpdate>> {
        self.state.subscribe()
    }

    pub fn unmount(&mut self) {
        self.mount.unmount();
    }
}
