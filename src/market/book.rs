//! Order books and depth-aware pricing.
//!
//! `DepthBook` walks price levels to estimate the average fill price of a
//! market order of a given size. `BookMarketData` keeps one book per
//! symbol plus a ticker cache and implements `MarketDataSource` on top.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use super::MarketDataSource;
use crate::types::{Quote, SymbolFilters};

/// Residual below which an order counts as filled, relative to its size.
const FILL_TOLERANCE: f64 = 1e-9;

/// Sizes at or below this are treated as zero.
const ZERO_SIZE: f64 = 1e-15;

// ---------------------------------------------------------------------------
// Depth book
// ---------------------------------------------------------------------------

/// Price levels of one symbol: bids best-first (descending), asks
/// best-first (ascending).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthBook {
    bids: Vec<(f64, f64)>,
    asks: Vec<(f64, f64)>,
}

impl DepthBook {
    /// Build from unsorted `(price, quantity)` levels. Empty levels are
    /// dropped.
    pub fn from_levels(mut bids: Vec<(f64, f64)>, mut asks: Vec<(f64, f64)>) -> Self {
        bids.retain(|&(p, q)| p > 0.0 && q > 0.0);
        asks.retain(|&(p, q)| p > 0.0 && q > 0.0);
        bids.sort_by(|a, b| b.0.total_cmp(&a.0));
        asks.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { bids, asks }
    }

    pub fn bids(&self) -> &[(f64, f64)] {
        &self.bids
    }

    pub fn asks(&self) -> &[(f64, f64)] {
        &self.asks
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Sell `amount` base into the bids.
    pub fn sell_price(&self, amount: f64) -> Option<Quote> {
        if amount.abs() <= ZERO_SIZE {
            return Some(Quote::new(0.0, 0.0));
        }
        let mut quote = 0.0;
        let mut unfilled = amount;
        for &(price, qty) in &self.bids {
            let fill = qty.min(unfilled);
            quote += price * fill;
            unfilled -= fill;
            if unfilled <= amount * FILL_TOLERANCE {
                return Some(Quote::new(quote / amount, quote));
            }
        }
        None
    }

    /// Spend `quote_amount` on the asks.
    pub fn buy_price(&self, quote_amount: f64) -> Option<Quote> {
        if quote_amount.abs() <= ZERO_SIZE {
            return Some(Quote::new(0.0, 0.0));
        }
        let mut amount = 0.0;
        let mut unfilled = quote_amount;
        for &(price, qty) in &self.asks {
            let fill = qty.min(unfilled / price);
            amount += fill;
            unfilled -= fill * price;
            if unfilled <= quote_amount * FILL_TOLERANCE {
                return Some(Quote::new(quote_amount / amount, amount));
            }
        }
        None
    }

    /// Base amount that must be sold into the bids to realise `quote`.
    pub fn sell_price_fill_quote(&self, quote: f64) -> Option<Quote> {
        if quote.abs() <= ZERO_SIZE {
            return Some(Quote::new(0.0, 0.0));
        }
        let mut amount = 0.0;
        let mut unfilled = quote;
        for &(price, qty) in &self.bids {
            let fill = qty.min(unfilled / price);
            amount += fill;
            unfilled -= price * fill;
            if unfilled <= quote * FILL_TOLERANCE {
                return Some(Quote::new(quote / amount, amount));
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Ticker feed
// ---------------------------------------------------------------------------

/// Bulk ticker lookup used to fill cache misses.
#[async_trait]
pub trait TickerFeed: Send + Sync {
    async fn all_ticker_prices(&self) -> Result<HashMap<String, f64>>;
}

// ---------------------------------------------------------------------------
// Book-backed market data
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct BookMarketData {
    books: RwLock<HashMap<String, DepthBook>>,
    tickers: RwLock<HashMap<String, f64>>,
    missing_tickers: RwLock<HashSet<String>>,
    filters: RwLock<HashMap<String, SymbolFilters>>,
    ticker_feed: Option<Arc<dyn TickerFeed>>,
}

impl BookMarketData {
    pub fn new(ticker_feed: Option<Arc<dyn TickerFeed>>) -> Self {
        Self {
            ticker_feed,
            ..Self::default()
        }
    }

    pub fn update_book(&self, symbol: &str, book: DepthBook) {
        if let Ok(mut books) = self.books.write() {
            books.insert(symbol.to_string(), book);
        }
    }

    /// Merge fresh ticker prices into the cache.
    pub fn update_tickers(&self, prices: HashMap<String, f64>) {
        if let Ok(mut tickers) = self.tickers.write() {
            tickers.extend(prices);
        }
    }

    pub fn set_filters(&self, symbol: &str, filters: SymbolFilters) {
        if let Ok(mut all) = self.filters.write() {
            all.insert(symbol.to_string(), filters);
        }
    }

    fn with_book<T>(&self, symbol: &str, f: impl FnOnce(&DepthBook) -> Option<T>) -> Option<T> {
        let books = self.books.read().ok()?;
        let book = books.get(symbol)?;
        f(book)
    }

    fn cached_ticker(&self, symbol: &str) -> Option<f64> {
        self.tickers.read().ok()?.get(symbol).copied()
    }

    fn is_missing(&self, symbol: &str) -> bool {
        self.missing_tickers
            .read()
            .map(|m| m.contains(symbol))
            .unwrap_or(false)
    }
}

#[async_trait]
impl MarketDataSource for BookMarketData {
    async fn ticker_price(&self, symbol: &str) -> Option<f64> {
        if let Some(price) = self.cached_ticker(symbol) {
            return Some(price);
        }
        if self.is_missing(symbol) {
            return None;
        }
        let feed = self.ticker_feed.as_ref()?;

        match feed.all_ticker_prices().await {
            Ok(prices) => {
                debug!(count = prices.len(), "Fetched all ticker prices");
                self.update_tickers(prices);
            }
            Err(e) => {
                warn!(symbol, error = %e, "Ticker refresh failed");
                return None;
            }
        }

        let price = self.cached_ticker(symbol);
        if price.is_none() {
            info!(symbol, "Ticker does not exist, will not be fetched from now on");
            if let Ok(mut missing) = self.missing_tickers.write() {
                missing.insert(symbol.to_string());
            }
        }
        price
    }

    async fn market_sell_price(&self, symbol: &str, base_qty: f64) -> Option<Quote> {
        self.with_book(symbol, |b| b.sell_price(base_qty))
    }

    async fn market_buy_price(&self, symbol: &str, quote_qty: f64) -> Option<Quote> {
        self.with_book(symbol, |b| b.buy_price(quote_qty))
    }

    async fn market_sell_price_fill_quote(&self, symbol: &str, quote: f64) -> Option<Quote> {
        self.with_book(symbol, |b| b.sell_price_fill_quote(quote))
    }

    async fn min_notional(&self, symbol: &str) -> f64 {
        self.filters
            .read()
            .ok()
            .and_then(|f| f.get(symbol).map(|f| f.min_notional))
            .unwrap_or(f64::INFINITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
