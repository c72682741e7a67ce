//! Core types for the Living realtime investment feed
//!
//! This crate defines the wire envelope, update records, topic naming and
//! connection status shared by the realtime client and its hosts.

pub mod connection;
pub mod envelope;
pub mod error;
pub mod topic;
pub mod update;

pub use connection::{ConnectionState, ConnectionStatus};
pub use envelope::{Envelope, ServerError, SUCCESS_CODE};
pub use error::{LivingError, LivingResult};
pub use topic::{
    SubscribeIntent, TopicKey, TopicKind, ERROR_DESTINATION, SUBSCRIBE_INTENT_DESTINATION,
};
pub use update::{
    MarketUpdate, OrderBook, OrderBookEntry, OrderStatus, OrderUpdate, PortfolioPosition,
    PortfolioUpdate, PriceUpdate, QuoteUpdate, Update,
};
