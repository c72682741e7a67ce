//! Living realtime watcher
//!
//! Connects to the investment feed and logs connection changes, market
//! snapshots and prices for the configured stock codes until Ctrl-C.

use living_realtime::{ConnectionHookOptions, RealtimeConfig};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_STOCK_CODES: &str = "395400";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,living_realtime=debug")),
        )
        .init();

    let config = RealtimeConfig::from_env()?;
    info!("Starting Living realtime watcher against {}", config.ws_url);

    let stock_codes: Vec<String> = std::env::var("WATCH_STOCK_CODES")
        .unwrap_or_else(|_| DEFAULT_STOCK_CODES.to_string())
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect();
    info!("Watching stock codes: {:?}", stock_codes);

    let service = living_realtime::init_global(config);
    let connection = service.connection_hook(ConnectionHookOptions::default());
    let market = service.market_hook();
    let prices = service.price_hook(stock_codes.iter().cloned());

    let mut connection_rx = connection.watch();
    let mut market_rx = market.watch();
    let mut prices_rx = prices.watch();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            changed = connection_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = connection_rx.borrow_and_update().clone();
                match status.last_error.as_deref() {
                    Some(err) => warn!("Connection {} (last error: {})", status.describe(), err),
                    None => info!("Connection {}", status.describe()),
                }
            }
            changed = market_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = market_rx
                    .borrow_and_update()
                    .value
                    .as_ref()
                    .map(|m| m.reits.len())
                    .unwrap_or(0);
                info!("Market snapshot with {} REITs", count);
            }
            changed = prices_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot: Vec<_> = prices_rx.borrow_and_update().values().cloned().collect();
                for price in snapshot {
                    info!(
                        "{} {} {} ({}%)",
                        price.product_id, price.name, price.current_price, price.change_percent
                    );
                }
            }
        }
    }

    drop(prices);
    drop(market);
    drop(connection);
    living_realtime::shutdown_global();
    Ok(())
}
