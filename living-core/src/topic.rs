//! Topic naming for the realtime message broker
//!
//! Destinations are part of the server contract and must match the broker
//! configuration byte for byte.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-pushed business errors (`{ "msg1": ... }`)
pub const ERROR_DESTINATION: &str = "/topic/reits/error";

/// Client-to-server subscription intent
pub const SUBSCRIBE_INTENT_DESTINATION: &str = "/app/reits/subscribe";

/// Market code sent with every subscription intent
pub const ALL_MARKETS: &str = "ALL";

/// Category of a realtime stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicKind {
    /// Per-instrument realtime price
    Price,
    /// Per-instrument order book / quotation
    Quote,
    /// Market-wide REITs snapshot list
    Market,
    /// Portfolio valuation for the signed-in user.
    ///
    /// Subscribed at `/user/queue/portfolio`. No server publisher for this
    /// destination is known yet; the path assumes a Spring user queue.
    Portfolio,
    /// Order status events for the signed-in user.
    ///
    /// Subscribed at `/user/queue/orders`, an assumed user queue like
    /// [`TopicKind::Portfolio`].
    Order,
}

impl TopicKind {
    /// Whether topics of this kind are keyed by a stock code
    pub fn is_keyed(&self) -> bool {
        matches!(self, TopicKind::Price | TopicKind::Quote)
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TopicKind::Price => "price",
            TopicKind::Quote => "quote",
            TopicKind::Market => "market",
            TopicKind::Portfolio => "portfolio",
            TopicKind::Order => "order",
        };
        f.write_str(name)
    }
}

/// Unique key for one stream of updates
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicKey {
    pub kind: TopicKind,
    pub id: Option<String>,
}

impl TopicKey {
    pub fn price(stock_code: impl Into<String>) -> Self {
        Self {
            kind: TopicKind::Price,
            id: Some(stock_code.into()),
        }
    }

    pub fn quote(stock_code: impl Into<String>) -> Self {
        Self {
            kind: TopicKind::Quote,
            id: Some(stock_code.into()),
        }
    }

    pub fn market() -> Self {
        Self {
            kind: TopicKind::Market,
            id: None,
        }
    }

    pub fn portfolio() -> Self {
        Self {
            kind: TopicKind::Portfolio,
            id: None,
        }
    }

    pub fn orders() -> Self {
        Self {
            kind: TopicKind::Order,
            id: None,
        }
    }

    /// Stock code for keyed topics
    pub fn stock_code(&self) -> Option<&str> {
        if self.kind.is_keyed() {
            self.id.as_deref()
        } else {
            None
        }
    }

    /// Broker destination for this topic
    pub fn destination(&self) -> String {
        let id = self.id.as_deref().unwrap_or_default();
        match self.kind {
            TopicKind::Market => "/topic/reits/market".to_string(),
            TopicKind::Price => format!("/topic/reits/stock/{}", id),
            TopicKind::Quote => format!("/topic/reits/quotation/{}", id),
            // Assumed user queues, not yet confirmed against a publisher
            TopicKind::Portfolio => "/user/queue/portfolio".to_string(),
            TopicKind::Order => "/user/queue/orders".to_string(),
        }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.kind, id),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Body published to [`SUBSCRIBE_INTENT_DESTINATION`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeIntent {
    /// Comma separated stock codes
    pub stock_code: String,
    pub market_code: String,
}

impl SubscribeIntent {
    pub fn new<I, S>(stock_codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let codes: Vec<String> = stock_codes
            .into_iter()
            .map(|code| code.as_ref().to_string())
            .collect();
        Self {
            stock_code: codes.join(","),
            market_code: ALL_MARKETS.to_string(),
        }
    }
}
