//! Update records pushed by the server
//!
//! Every record is an immutable snapshot. When the server omits a timestamp
//! the decoder stamps the receipt time instead.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{LivingError, LivingResult};
use crate::topic::{TopicKey, TopicKind};

/// Number of levels published on each side of a quotation
pub const QUOTE_DEPTH: usize = 5;

// ============================================================================
// Domain records
// ============================================================================

/// Realtime price for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub product_id: String,
    pub name: String,
    pub current_price: Decimal,
    /// Absolute change versus previous close
    pub change: Decimal,
    /// Percent change versus previous close
    pub change_percent: Decimal,
    /// KIS sign code ("1".."5"), if provided
    pub change_sign: Option<String>,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Single level of an order book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookEntry {
    pub price: Decimal,
    pub volume: Decimal,
    /// 1-based level, 1 is best
    pub level: u8,
}

/// Five-level order book from a quotation snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    /// Sell side, best (lowest) first
    pub asks: Vec<OrderBookEntry>,
    /// Buy side, best (highest) first
    pub bids: Vec<OrderBookEntry>,
    pub spread: Option<Decimal>,
    pub total_ask_volume: Decimal,
    pub total_bid_volume: Decimal,
}

impl OrderBook {
    pub fn best_ask(&self) -> Option<&OrderBookEntry> {
        self.asks.first()
    }

    pub fn best_bid(&self) -> Option<&OrderBookEntry> {
        self.bids.first()
    }
}

/// Order book / quotation snapshot for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteUpdate {
    pub product_id: String,
    pub current_price: Option<Decimal>,
    pub accumulated_volume: Option<Decimal>,
    pub order_book: OrderBook,
    pub timestamp: DateTime<Utc>,
}

/// Market-wide REITs snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketUpdate {
    pub reits: Vec<PriceUpdate>,
    pub timestamp: DateTime<Utc>,
}

impl MarketUpdate {
    pub fn find(&self, product_id: &str) -> Option<&PriceUpdate> {
        self.reits.iter().find(|item| item.product_id == product_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioPosition {
    pub product_id: String,
    pub current_value: Decimal,
    pub profit_loss: Decimal,
    pub profit_loss_rate: Decimal,
}

/// Portfolio valuation for the signed-in user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioUpdate {
    pub user_id: i64,
    pub total_value: Decimal,
    pub total_profit_loss: Decimal,
    pub total_profit_loss_rate: Decimal,
    pub positions: Vec<PortfolioPosition>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Completed,
    Cancelled,
    Failed,
}

/// Status event for a single order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub user_id: i64,
    pub status: OrderStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Typed update delivered to listeners
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Price(PriceUpdate),
    Quote(QuoteUpdate),
    Market(MarketUpdate),
    Portfolio(PortfolioUpdate),
    Order(OrderUpdate),
}

impl Update {
    /// Decode the payload of an envelope received on `key`
    pub fn decode(key: &TopicKey, payload: Value, received_at: DateTime<Utc>) -> LivingResult<Self> {
        match key.kind {
            TopicKind::Price => {
                let wire: ReitsItemWire = serde_json::from_value(payload)?;
                Ok(Update::Price(wire.into_update(received_at)?))
            }
            TopicKind::Quote => {
                let Value::Object(fields) = payload else {
                    return Err(LivingError::parse("quotation payload is not an object"));
                };
                let product_id = key.id.clone().unwrap_or_default();
                Ok(Update::Quote(decode_quote(product_id, &fields, received_at)?))
            }
            TopicKind::Market => {
                let items: Vec<Value> = serde_json::from_value(payload)?;
                let reits = items
                    .into_iter()
                    .filter_map(|item| match decode_reits_item(item, received_at) {
                        Ok(price) => Some(price),
                        Err(e) => {
                            debug!("Skipping undecodable market item: {}", e);
                            None
                        }
                    })
                    .collect();
                Ok(Update::Market(MarketUpdate {
                    reits,
                    timestamp: received_at,
                }))
            }
            TopicKind::Portfolio => {
                let wire: PortfolioWire = serde_json::from_value(payload)?;
                Ok(Update::Portfolio(PortfolioUpdate {
                    user_id: wire.user_id,
                    total_value: wire.total_value,
                    total_profit_loss: wire.total_profit_loss,
                    total_profit_loss_rate: wire.total_profit_loss_rate,
                    positions: wire.positions,
                    timestamp: stamp(wire.timestamp, received_at),
                }))
            }
            TopicKind::Order => {
                let wire: OrderWire = serde_json::from_value(payload)?;
                Ok(Update::Order(OrderUpdate {
                    order_id: wire.order_id,
                    user_id: wire.user_id,
                    status: wire.status,
                    message: wire.message,
                    timestamp: stamp(wire.timestamp, received_at),
                }))
            }
        }
    }

    pub fn kind(&self) -> TopicKind {
        match self {
            Update::Price(_) => TopicKind::Price,
            Update::Quote(_) => TopicKind::Quote,
            Update::Market(_) => TopicKind::Market,
            Update::Portfolio(_) => TopicKind::Portfolio,
            Update::Order(_) => TopicKind::Order,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Update::Price(u) => u.timestamp,
            Update::Quote(u) => u.timestamp,
            Update::Market(u) => u.timestamp,
            Update::Portfolio(u) => u.timestamp,
            Update::Order(u) => u.timestamp,
        }
    }
}

// ============================================================================
// Wire formats
// ============================================================================

/// KIS REITs item (all numeric fields arrive as strings, any of them may be null)
#[derive(Debug, Clone, Deserialize)]
struct ReitsItemWire {
    #[serde(default)]
    stck_shrn_iscd: Option<String>,
    #[serde(default)]
    hts_kor_isnm: Option<String>,
    stck_prpr: String,
    #[serde(default)]
    prdy_vrss: Option<String>,
    #[serde(default)]
    prdy_ctrt: Option<String>,
    #[serde(default)]
    prdy_vrss_sign: Option<String>,
    #[serde(default)]
    acml_vol: Option<String>,
}

impl ReitsItemWire {
    fn into_update(self, received_at: DateTime<Utc>) -> LivingResult<PriceUpdate> {
        Ok(PriceUpdate {
            current_price: parse_decimal("stck_prpr", &self.stck_prpr)?,
            change: parse_optional("prdy_vrss", self.prdy_vrss.as_deref())?,
            change_percent: parse_optional("prdy_ctrt", self.prdy_ctrt.as_deref())?,
            volume: parse_optional("acml_vol", self.acml_vol.as_deref())?,
            change_sign: self.prdy_vrss_sign.filter(|s| !s.is_empty()),
            product_id: self
                .stck_shrn_iscd
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            name: self.hts_kor_isnm.unwrap_or_default(),
            timestamp: received_at,
        })
    }
}

fn decode_reits_item(item: Value, received_at: DateTime<Utc>) -> LivingResult<PriceUpdate> {
    let wire: ReitsItemWire = serde_json::from_value(item)?;
    wire.into_update(received_at)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortfolioWire {
    user_id: i64,
    total_value: Decimal,
    total_profit_loss: Decimal,
    total_profit_loss_rate: Decimal,
    #[serde(default)]
    positions: Vec<PortfolioPosition>,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderWire {
    order_id: String,
    user_id: i64,
    status: OrderStatus,
    #[serde(default)]
    message: String,
    #[serde(default)]
    timestamp: Option<i64>,
}

fn stamp(server_ms: Option<i64>, received_at: DateTime<Utc>) -> DateTime<Utc> {
    server_ms
        .filter(|ms| *ms > 0)
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(received_at)
}

fn parse_decimal(field: &str, raw: &str) -> LivingResult<Decimal> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|e| LivingError::parse(format!("{}: {:?} ({})", field, raw, e)))
}

fn parse_optional(field: &str, raw: Option<&str>) -> LivingResult<Decimal> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Decimal::ZERO),
        Some(value) => parse_decimal(field, value),
    }
}

/// Read a numeric field that may be encoded as a string or a number
fn field_decimal(fields: &Map<String, Value>, name: &str) -> LivingResult<Option<Decimal>> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => parse_decimal(name, s).map(Some),
        Some(Value::Number(n)) => parse_decimal(name, &n.to_string()).map(Some),
        Some(other) => Err(LivingError::parse(format!(
            "{}: unexpected value {}",
            name, other
        ))),
    }
}

fn decode_side(
    fields: &Map<String, Value>,
    price_prefix: &str,
    volume_prefix: &str,
) -> LivingResult<Vec<OrderBookEntry>> {
    let mut entries = Vec::with_capacity(QUOTE_DEPTH);
    for level in 1..=QUOTE_DEPTH {
        let price = field_decimal(fields, &format!("{}{}", price_prefix, level))?;
        let volume = field_decimal(fields, &format!("{}{}", volume_prefix, level))?;
        match price {
            Some(price) if price > Decimal::ZERO => entries.push(OrderBookEntry {
                price,
                volume: volume.unwrap_or(Decimal::ZERO),
                level: level as u8,
            }),
            _ => {}
        }
    }
    Ok(entries)
}

fn decode_quote(
    product_id: String,
    fields: &Map<String, Value>,
    received_at: DateTime<Utc>,
) -> LivingResult<QuoteUpdate> {
    let asks = decode_side(fields, "askp", "askp_rsqn")?;
    let bids = decode_side(fields, "bidp", "bidp_rsqn")?;

    let spread = match (asks.first(), bids.first()) {
        (Some(ask), Some(bid)) => Some(ask.price - bid.price),
        _ => None,
    };
    let total_ask_volume = asks.iter().map(|e| e.volume).sum();
    let total_bid_volume = bids.iter().map(|e| e.volume).sum();

    Ok(QuoteUpdate {
        product_id,
        current_price: field_decimal(fields, "stck_prpr")?,
        accumulated_volume: field_decimal(fields, "acml_vol")?,
        order_book: OrderBook {
            asks,
            bids,
            spread,
            total_ask_volume,
            total_bid_volume,
        },
        timestamp: received_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_decode_price() {
        let payload = json!({
            "stck_shrn_iscd": "395400",
            "hts_kor_isnm": "SK리츠",
            "stck_prpr": "5120",
            "prdy_vrss": "-30",
            "prdy_ctrt": "-0.58",
            "prdy_vrss_sign": "5",
            "acml_vol": "120345"
        });

        let Update::Price(price) = Update::decode(&TopicKey::price("395400"), payload, now()).unwrap() else {
            panic!("expected price update");
        };
        assert_eq!(price.product_id, "395400");
        assert_eq!(price.current_price, dec!(5120));
        assert_eq!(price.change, dec!(-30));
        assert_eq!(price.change_percent, dec!(-0.58));
        assert_eq!(price.change_sign.as_deref(), Some("5"));
        assert_eq!(price.timestamp, now());
    }

    #[test]
    fn test_decode_price_rejects_garbage_price() {
        let payload = json!({ "stck_shrn_iscd": "395400", "stck_prpr": "n/a" });
        assert!(Update::decode(&TopicKey::price("395400"), payload, now()).is_err());
    }

    #[test]
    fn test_decode_quote_builds_order_book() {
        let payload = json!({
            "stck_prpr": "5120",
            "askp1": "5130", "askp2": "5140", "askp3": "0", "askp4": "", "askp5": "5170",
            "bidp1": "5120", "bidp2": "5110", "bidp3": "5100", "bidp4": "5090", "bidp5": "5080",
            "askp_rsqn1": "10", "askp_rsqn2": "20", "askp_rsqn5": "5",
            "bidp_rsqn1": "7", "bidp_rsqn2": "8", "bidp_rsqn3": "9", "bidp_rsqn4": "1", "bidp_rsqn5": 2
        });

        let Update::Quote(quote) = Update::decode(&TopicKey::quote("395400"), payload, now()).unwrap() else {
            panic!("expected quote update");
        };
        assert_eq!(quote.product_id, "395400");
        assert_eq!(quote.order_book.asks.len(), 3);
        assert_eq!(quote.order_book.asks[2].level, 5);
        assert_eq!(quote.order_book.bids.len(), 5);
        assert_eq!(quote.order_book.spread, Some(dec!(10)));
        assert_eq!(quote.order_book.total_ask_volume, dec!(35));
        assert_eq!(quote.order_book.total_bid_volume, dec!(27));
    }

    #[test]
    fn test_decode_market_list() {
        let payload = json!([
            { "stck_shrn_iscd": "395400", "stck_prpr": "5120" },
            { "stck_shrn_iscd": "338100", "stck_prpr": "4210" }
        ]);

        let Update::Market(market) = Update::decode(&TopicKey::market(), payload, now()).unwrap() else {
            panic!("expected market update");
        };
        assert_eq!(market.reits.len(), 2);
        assert_eq!(market.find("338100").unwrap().current_price, dec!(4210));
    }

    #[test]
    fn test_market_tolerates_nulls_and_skips_bad_items() {
        let payload = json!([
            { "stck_shrn_iscd": "395400", "hts_kor_isnm": "SK리츠", "stck_prpr": "5120" },
            { "stck_shrn_iscd": "338100", "hts_kor_isnm": null, "stck_prpr": "4210", "prdy_vrss": null },
            { "stck_shrn_iscd": "330590", "stck_prpr": null },
            { "stck_shrn_iscd": "357120", "stck_prpr": "n/a" }
        ]);

        let Update::Market(market) = Update::decode(&TopicKey::market(), payload, now()).unwrap() else {
            panic!("expected market update");
        };
        assert_eq!(market.reits.len(), 2);
        let unnamed = market.find("338100").unwrap();
        assert_eq!(unnamed.name, "");
        assert_eq!(unnamed.change, Decimal::ZERO);
        assert!(market.find("330590").is_none());
    }

    #[test]
    fn test_price_with_null_code_has_empty_id() {
        let payload = json!({ "stck_shrn_iscd": null, "hts_kor_isnm": null, "stck_prpr": "5120" });
        let Update::Price(price) = Update::decode(&TopicKey::price("395400"), payload, now()).unwrap() else {
            panic!("expected price update");
        };
        assert!(price.product_id.is_empty());
    }

    #[test]
    fn test_order_keeps_server_timestamp() {
        let payload = json!({
            "orderId": "ord-1",
            "userId": 7,
            "status": "COMPLETED",
            "message": "filled",
            "timestamp": 1_700_000_500_000i64
        });

        let Update::Order(order) = Update::decode(&TopicKey::orders(), payload, now()).unwrap() else {
            panic!("expected order update");
        };
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.timestamp.timestamp(), 1_700_000_500);
    }

    #[test]
    fn test_portfolio_stamped_when_missing_timestamp() {
        let payload = json!({
            "userId": 7,
            "totalValue": 1500000,
            "totalProfitLoss": "25000",
            "totalProfitLossRate": 1.69,
            "positions": [
                { "productId": "395400", "currentValue": 500000, "profitLoss": 1000, "profitLossRate": 0.2 }
            ]
        });

        let Update::Portfolio(portfolio) = Update::decode(&TopicKey::portfolio(), payload, now()).unwrap() else {
            panic!("expected portfolio update");
        };
        assert_eq!(portfolio.total_value, dec!(1500000));
        assert_eq!(portfolio.positions.len(), 1);
        assert_eq!(portfolio.timestamp, now());
    }
}
