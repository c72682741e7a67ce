//! Update hooks
//!
//! Each hook is a reactive adapter over the registry: it registers its
//! listeners and topic references when mounted, exposes its state through a
//! `tokio::sync::watch` channel, and releases everything on `unmount()` or
//! drop.

mod connection;
mod feed;
mod market;
mod order;
mod portfolio;
mod price;
mod quote;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use living_core::{TopicKey, Update};

use crate::registry::{ListenerId, SubscriptionRegistry};

pub use connection::{ConnectionHook, ConnectionHookOptions};
pub use feed::{InvestmentFeed, InvestmentFeedOptions};
pub use market::MarketHook;
pub use order::{OrderHook, ORDER_HISTORY_LIMIT};
pub use portfolio::PortfolioHook;
pub use price::{PriceHook, PriceMap};
pub use quote::{QuoteHook, QuoteState, QUOTE_FALLBACK_DELAY};

/// Latest value of a single-valued stream
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub value: Option<T>,
    /// Local receipt time of `value`
    pub last_updated: Option<DateTime<Utc>>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            value: None,
            last_updated: None,
        }
    }
}

/// Listener registrations and topic references owned by one hook
pub(crate) struct Mount {
    registry: SubscriptionRegistry,
    active: Arc<AtomicBool>,
    listeners: Vec<(TopicKey, ListenerId)>,
    topics: Vec<TopicKey>,
}

impl Mount {
    pub(crate) fn new(registry: &SubscriptionRegistry) -> Self {
        Self {
            registry: registry.clone(),
            active: Arc::new(AtomicBool::new(true)),
            listeners: Vec::new(),
            topics: Vec::new(),
        }
    }

    pub(crate) fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub(crate) fn active_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active)
    }

    /// Register a listener that stops firing once the hook unmounts
    pub(crate) fn listen<F>(&mut self, key: &TopicKey, f: F)
    where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        let active = self.active_flag();
        let id = self.registry.add_listener(
            key,
            Arc::new(move |update: &Update| {
                if active.load(Ordering::SeqCst) {
                    f(update);
                }
            }),
        );
        self.listeners.push((key.clone(), id));
    }

    pub(crate) fn subscribe(&mut self, key: &TopicKey) {
        self.registry.subscribe(key);
        self.topics.push(key.clone());
    }

    pub(crate) fn is_mounted(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Remove listeners, then release topic references. Idempotent.
    pub(crate) fn unmount(&mut self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        for (key, id) in self.listeners.drain(..) {
            self.registry.remove_listener(&key, id);
        }
        for key in self.topics.drain(..) {
            self.registry.unsubscribe(&key);
        }
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        self.unmount();
    }
}
