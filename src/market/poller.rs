//! REST snapshot poller.
//!
//! Keeps a `BookMarketData` fresh by periodically pulling depth snapshots
//! for every watched symbol and the full ticker table from the exchange.

use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::book::BookMarketData;
use crate::exchange::client::ExchangeClient;

/// Order book levels requested per snapshot.
const DEFAULT_DEPTH_LIMIT: u32 = 100;

pub struct SnapshotPoller {
    client: Arc<ExchangeClient>,
    market: Arc<BookMarketData>,
    symbols: Vec<String>,
    depth_limit: u32,
}

impl SnapshotPoller {
    /// `symbols` are full exchange symbols (base + bridge).
    pub fn new(client: Arc<ExchangeClient>, market: Arc<BookMarketData>, symbols: Vec<String>) -> Self {
        Self {
            client,
            market,
            symbols,
            depth_limit: DEFAULT_DEPTH_LIMIT,
        }
    }

    /// Load instrument filters for every watched symbol. Symbols whose
    /// filters cannot be loaded keep an infinite min-notional and are never
    /// traded.
    pub async fn load_filters(&self) {
        let results = join_all(self.symbols.iter().map(|s| self.client.filters(s))).await;
        for (symbol, result) in self.symbols.iter().zip(results) {
            match result {
                Ok(filters) => self.market.set_filters(symbol, filters),
                Err(e) => warn!(symbol = %symbol, error = %e, "Failed to load instrument filters"),
            }
        }
    }

    /// Pull one round of snapshots.
    pub async fn refresh(&self) -> Result<()> {
        let books = join_all(
            self.symbols
                .iter()
                .map(|s| self.client.depth(s, self.depth_limit)),
        )
        .await;

        let mut updated = 0;
        for (symbol, result) in self.symbols.iter().zip(books) {
            match result {
                Ok(book) => {
                    self.market.update_book(symbol, book);
                    updated += 1;
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "Depth snapshot failed"),
            }
        }

        let tickers = self.client.ticker_prices().await?;
        self.market.update_tickers(tickers);

        debug!(books = updated, "Market snapshot refreshed");
        Ok(())
    }

    /// Refresh every `interval` until `shutdown` flips to true.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        info!(symbols = self.symbols.len(), interval_ms = interval.as_millis() as u64, "Market poller started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "Market refresh failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Market poller stopped");
    }
}
