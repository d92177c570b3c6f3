//! Market data.
//!
//! Defines the `MarketDataSource` trait consumed by the engine and the
//! execution layer, and provides an order-book backed implementation that
//! is refreshed from exchange REST snapshots.

pub mod book;
pub mod poller;

use async_trait::async_trait;

use crate::types::Quote;

/// Source of ticker and depth-aware prices.
///
/// Symbols are concatenated exchange symbols (e.g. "ETHUSDT"). Every price
/// query returns `None` when the data is unavailable or the order book is
/// too thin to fill the requested size.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Last traded price. Symbols confirmed missing are never re-queried.
    async fn ticker_price(&self, symbol: &str) -> Option<f64>;

    /// Selling `base_qty`: average price and quote proceeds.
    async fn market_sell_price(&self, symbol: &str, base_qty: f64) -> Option<Quote>;

    /// Spending `quote_qty`: average price and base obtainable.
    async fn market_buy_price(&self, symbol: &str, quote_qty: f64) -> Option<Quote>;

    /// Realising exactly `quote` by selling: average price and base needed.
    async fn market_sell_price_fill_quote(&self, symbol: &str, quote: f64) -> Option<Quote>;

    /// Minimum order notional in quote currency. Unknown instruments
    /// report infinity so they are never traded.
    async fn min_notional(&self, symbol: &str) -> f64;
}
