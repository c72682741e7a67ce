//! Per-product realtime prices

use std::collections::HashMap;
use std::sync::Arc;

use living_core::{PriceUpdate, TopicKey, Update};
use tokio::sync::watch;

use super::Mount;
use crate::registry::SubscriptionRegistry;

/// Latest price per product id
pub type PriceMap = HashMap<String, PriceUpdate>;

pub struct PriceHook {
    mount: Mount,
    product_ids: Vec<String>,
    state: Arc<watch::Sender<PriceMap>>,
}

impl PriceHook {
    /// Mount for the given products. Updates replace only the entry of the
    /// product they carry.
    pub fn mount<I, S>(registry: &SubscriptionRegistry, product_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let product_ids: Vec<String> = product_ids.into_iter().map(Into::into).collect();
        let (state, _) = watch::channel(PriceMap::new());
        let state = Arc::new(state);
        let mut mount = Mount::new(registry);

        for product_id in &product_ids {
            let key = TopicKey::price(product_id.as_str());
            let state = Arc::clone(&state);
            mount.listen(&key, move |update| {
                if let Update::Price(price) = update {
                    apply(&state, price);
                }
            });
            mount.subscribe(&key);
        }

        Self {
            mount,
            product_ids,
            state,
        }
    }

    pub fn product_ids(&self) -> &[String] {
        &self.product_ids
    }

    pub fn get(&self, product_id: &str) -> Option<PriceUpdate> {
        self.state.borrow().get(product_id).cloned()
    }

    pub fn updates(&self) -> Vec<PriceUpdate> {
        self.state.borrow().values().cloned().collect()
    }

    /// Receiver notified on every applied update
    pub fn watch(&self) -> watch::Receiver<PriceMap> {
        self.state.subscribe()
    }

    pub fn is_mounted(&self) -> bool {
        self.mount.is_mounted()
    }

    pub fn unmount(&mut self) {
        self.mount.unmount();
    }
}

fn apply(state: &watch::Sender<PriceMap>, price: &PriceUpdate) {
    if price.product_id.is_empty() {
        return;
    }
    state.send_modify(|prices| {
        prices.insert(price.product_id.clone(), price.clone());
    });
}

impl std::fmt::Debug for PriceHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceHook")
            .field("product_ids", &self.product_ids)
            .field("prices", &self.state.borrow().len())
            .finish()
    }
}
