//! Realtime service wiring
//!
//! Owns the transport, the registry over it, and the lifecycle controller.
//! Applications usually keep one instance per process through the global
//! accessor; tests build their own.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::config::RealtimeConfig;
use crate::hooks::{
    ConnectionHook, ConnectionHookOptions, InvestmentFeed, InvestmentFeedOptions, MarketHook,
    OrderHook, PortfolioHook, PriceHook, QuoteHook,
};
use crate::lifecycle::{AppState, LifecycleController};
use crate::registry::SubscriptionRegistry;
use crate::transport::{StompWebSocketClient, Transport};

static GLOBAL: Mutex<Option<Arc<RealtimeService>>> = Mutex::new(None);

pub struct RealtimeService {
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    registry: SubscriptionRegistry,
    lifecycle: LifecycleController,
}

impl RealtimeService {
    /// Wire a service over an existing transport without connecting
    pub fn new(config: RealtimeConfig, transport: Arc<dyn Transport>) -> Self {
        let registry = SubscriptionRegistry::new(Arc::clone(&transport));
        let lifecycle = LifecycleController::new(Arc::new(registry.clone()));
        Self {
            config,
            transport,
            registry,
            lifecycle,
        }
    }

    /// Build the STOMP transport and start connecting
    pub fn connect_with_stomp(config: RealtimeConfig) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(StompWebSocketClient::new(config.to_stomp_config()));
        let service = Self::new(config, transport);
        info!("[Service] Connecting to {}", service.config.ws_url);
        service.registry.connect();
        service
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    /// Forward a host state change unless resume checks are disabled
    pub fn on_app_state_change(&self, next: AppState) -> bool {
        if !self.config.reconnect_on_resume {
            return false;
        }
        self.lifecycle.on_app_state_change(next)
    }

    pub fn connection_hook(&self, options: ConnectionHookOptions) -> ConnectionHook {
        ConnectionHook::mount(&self.registry, options)
    }

    pub fn price_hook<I, S>(&self, product_ids: I) -> PriceHook
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PriceHook::mount(&self.registry, product_ids)
    }

    pub fn quote_hook(&self, product_id: &str) -> QuoteHook {
        QuoteHook::mount(&self.registry, product_id, self.config.quote_fallback_delay)
    }

    pub fn portfolio_hook(&self) -> PortfolioHook {
        PortfolioHook::mount(&self.registry)
    }

    pub fn order_hook(&self) -> OrderHook {
        OrderHook::mount(&self.registry)
    }

    pub fn market_hook(&self) -> MarketHook {
        MarketHook::mount(&self.registry)
    }

    pub fn investment_feed(&self, options: InvestmentFeedOptions) -> InvestmentFeed {
        InvestmentFeed::mount(&self.registry, options)
    }

    /// Release every subscription and close the transport
    pub fn shutdown(&self) {
        info!("[Service] Shutting down");
        self.registry.teardown();
        self.transport.disconnect();
    }
}

impl std::fmt::Debug for RealtimeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeService")
            .field("ws_url", &self.config.ws_url)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Process-wide service, created with STOMP on first call
pub fn init_global(config: RealtimeConfig) -> Arc<RealtimeService> {
    let mut global = GLOBAL.lock();
    if let Some(service) = global.as_ref() {
        return Arc::clone(service);
    }
    let service = Arc::new(RealtimeService::connect_with_stomp(config));
    *global = Some(Arc::clone(&service));
    service
}

/// Install a prebuilt service as the process-wide instance, replacing any
/// previous one without shutting it down
pub fn set_global(service: Arc<RealtimeService>) -> Option<Arc<RealtimeService>> {
    GLOBAL.lock().replace(service)
}

pub fn global() -> Option<Arc<RealtimeService>> {
    GLOBAL.lock().clone()
}

/// Shut down and clear the process-wide service
pub fn shutdown_global() {
    let service = GLOBAL.lock().take();
    if let Some(service) = service {
        service.shutdown();
    }
}
