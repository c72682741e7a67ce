//! Combined investment feed
//!
//! Mounts the price, portfolio, order and market hooks behind one handle with
//! a switch per category.

use living_core::{ConnectionStatus, MarketUpdate, OrderUpdate, PortfolioUpdate, PriceUpdate};

use super::{ConnectionHook, ConnectionHookOptions, MarketHook, OrderHook, PortfolioHook, PriceHook};
use crate::registry::SubscriptionRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvestmentFeedOptions {
    pub product_ids: Vec<String>,
    pub include_portfolio: bool,
    pub include_orders: bool,
    pub include_market: bool,
}

impl Default for InvestmentFeedOptions {
    fn default() -> Self {
        Self {
            product_ids: Vec::new(),
            include_portfolio: true,
            include_orders: true,
            include_market: true,
        }
    }
}

pub struct InvestmentFeed {
    connection: ConnectionHook,
    prices: Option<PriceHook>,
    portfolio: Option<PortfolioHook>,
    orders: Option<OrderHook>,
    market: Option<MarketHook>,
}

impl InvestmentFeed {
    pub fn mount(registry: &SubscriptionRegistry, options: InvestmentFeedOptions) -> Self {
        let connection = ConnectionHook::mount(
            registry,
            ConnectionHookOptions {
                auto_connect: false,
                ..Default::default()
            },
        );

        let prices = (!options.product_ids.is_empty())
            .then(|| PriceHook::mount(registry, options.product_ids.iter().cloned()));

        Self {
            connection,
            prices,
            portfolio: options.include_portfolio.then(|| PortfolioHook::mount(registry)),
            orders: options.include_orders.then(|| OrderHook::mount(registry)),
            market: options.include_market.then(|| MarketHook::mount(registry)),
        }
    }

    pub fn connection(&self) -> &ConnectionHook {
        &self.connection
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn price(&self, product_id: &str) -> Option<PriceUpdate> {
        self.prices.as_ref().and_then(|hook| hook.get(product_id))
    }

    pub fn prices(&self) -> Vec<PriceUpdate> {
        self.prices
            .as_ref()
            .map(PriceHook::updates)
            .unwrap_or_default()
    }

    pub fn portfolio(&self) -> Option<PortfolioUpdate> {
        self.portfolio.as_ref().and_then(PortfolioHook::portfolio)
    }

    pub fn orders(&self) -> Vec<OrderUpdate> {
        self.orders
            .as_ref()
            .map(OrderHook::updates)
            .unwrap_or_default()
    }

    pub fn market(&self) -> Option<MarketUpdate> {
        self.market.as_ref().and_then(MarketHook::market)
    }

    pub fn price_hook(&self) -> Option<&PriceHook> {
        self.prices.as_ref()
    }

    pub fn order_hook(&self) -> Option<&OrderHook> {
        self.orders.as_ref()
    }

    pub fn market_hook(&self) -> Option<&MarketHook> {
        self.market.as_ref()
    }

    pub fn unmount(&mut self) {
        if let Some(hook) = self.prices.as_mut() {
            hook.unmount();
        }
        if let Some(hook) = self.portfolio.as_mut() {
            hook.unmount();
        }
        if let Some(hook) = self.orders.as_mut() {
            hook.unmount();
        }
        if let Some(hook) = self.market.as_mut() {
            hook.unmount();
        }
        self.connection.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use living_core::TopicKey;
    use std::sync::Arc;

    #[test]
    fn test_category_switches() {
        let transport = Arc::new(MemoryTransport::connected());
        let registry = SubscriptionRegistry::new(transport.clone());
        let feed = InvestmentFeed::mount(
            &registry,
            InvestmentFeedOptions {
                product_ids: vec!["395400".into()],
                include_orders: false,
                include_market: false,
                ..Default::default()
            },
        );

        assert!(registry.is_live(&TopicKey::price("395400")));
        assert!(registry.is_live(&TopicKey::portfolio()));
        assert!(!registry.is_live(&TopicKey::orders()));
        assert!(!registry.is_live(&TopicKey::market()));
        assert!(feed.order_hook().is_none());
        assert!(feed.orders().is_empty());
    }

    #[test]
    fn test_default_includes_market() {
        let transport = Arc::new(MemoryTransport::connected());
        let registry = SubscriptionRegistry::new(transport.clone());
        let feed = InvestmentFeed::mount(&registry, InvestmentFeedOptions::default());

        assert!(registry.is_live(&TopicKey::market()));
        assert!(registry.is_live(&TopicKey::portfolio()));
        assert!(registry.is_live(&TopicKey::orders()));
        assert!(feed.market_hook().is_some());
        assert!(feed.market().is_none());
    }

    #[test]
    fn test_unmount_releases_all() {
        let transport = Arc::new(MemoryTransport::connected());
        let registry = SubscriptionRegistry::new(transport.clone());
        let mut feed = InvestmentFeed::mount(
            &registry,
            InvestmentFeedOptions {
                product_ids: vec!["395400".into(), "338100".into()],
                include_market: true,
                ..Default::default()
            },
        );
        assert_eq!(registry.live_subscription_count(), 5);

        feed.unmount();
        assert_eq!(registry.live_subscription_count(), 0);
        assert_eq!(registry.topic_count(), 0);
        assert_eq!(registry.connection_listener_count(), 0);
        // Only the error topic stays live on the transport
        assert_eq!(transport.total_live(), 1);
    }

    #[test]
    fn test_does_not_auto_connect() {
        let transport = Arc::new(MemoryTransport::new());
        let registry = SubscriptionRegistry::new(transport.clone());
        let _feed = InvestmentFeed::mount(&registry, InvestmentFeedOptions::default());
        // Pending portfolio topic requests the connection, not the connection hook
        assert_eq!(transport.connect_calls(), 1);
    }
}
