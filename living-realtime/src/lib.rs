//! Realtime subscription layer for the Living investment feed
//!
//! A STOMP-over-websocket [`transport`] feeds a reference-counted
//! [`SubscriptionRegistry`], which decodes server envelopes into typed
//! updates and fans them out to [`hooks`]. The [`lifecycle`] controller
//! restores the connection when the host application resumes.
//!
//! ```ignore
//! let service = living_realtime::init_global(RealtimeConfig::from_env()?);
//! let prices = service.price_hook(["395400"]);
//! let mut rx = prices.watch();
//! while rx.changed().await.is_ok() {
//!     println!("{:?}", prices.get("395400"));
//! }
//! ```

pub mod config;
pub mod hooks;
pub mod lifecycle;
pub mod registry;
pub mod service;
pub mod transport;

pub use config::RealtimeConfig;
pub use hooks::{
    ConnectionHook, ConnectionHookOptions, InvestmentFeed, InvestmentFeedOptions, MarketHook,
    OrderHook, PortfolioHook, PriceHook, QuoteHook, QuoteState, Snapshot,
};
pub use lifecycle::{AppState, ConnectivityCheck, LifecycleController};
pub use registry::{ListenerId, SubscriptionRegistry};
pub use service::{global, init_global, set_global, shutdown_global, RealtimeService};
pub use transport::{MemoryTransport, StompConfig, StompWebSocketClient, Transport, TransportEvent};
