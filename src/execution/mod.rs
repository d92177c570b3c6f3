//! Order execution.
//!
//! Defines the `ExecutionBackend` and `InstrumentInfo` traits, the shared
//! balance cache with its balance-changed signal, and the
//! `OrderExecutionManager` that drives a backend:
//! - live: real orders through the exchange REST API
//! - simulated: paper wallet persisted to disk

pub mod live;
pub mod manager;
pub mod simulated;
pub mod ttl;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, Notify};

use crate::types::{ExecutionError, OrderRequest, OrderResult, SymbolFilters};

/// Order placement and balance reads.
///
/// Implementations must raise the balance-changed signal of the shared
/// `BalanceCache` whenever balances move because of an order they placed.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Submit a market order and return its terminal result.
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResult, ExecutionError>;

    /// Full snapshot of free balances, keyed by asset.
    async fn fetch_balances(&self) -> Result<HashMap<String, f64>, ExecutionError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Instrument rules and the account fee schedule.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstrumentInfo: Send + Sync {
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExecutionError>;

    /// Taker fee per symbol, or `None` when the schedule cannot be
    /// introspected in this execution domain.
    async fn trade_fees(&self) -> Result<Option<HashMap<String, f64>>, ExecutionError>;

    /// Whether the account pays fees in the discount asset.
    async fn fee_discount_enabled(&self) -> Result<bool, ExecutionError>;
}

// ---------------------------------------------------------------------------
// Balance cache
// ---------------------------------------------------------------------------

/// Snapshot of account balances plus the balance-changed signal.
///
/// The signal behaves like a latch: a notification raised while nobody is
/// waiting is kept until the next wait consumes it.
#[derive(Debug, Default)]
pub struct BalanceCache {
    balances: Mutex<HashMap<String, f64>>,
    changed: Notify,
}

impl BalanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to the snapshot for read-modify-write.
    pub async fn lock(&self) -> MutexGuard<'_, HashMap<String, f64>> {
        self.balances.lock().await
    }

    pub async fn replace(&self, snapshot: HashMap<String, f64>) {
        *self.balances.lock().await = snapshot;
    }

    /// Drop cached entries so the next read refreshes them.
    pub async fn invalidate(&self, assets: &[&str]) {
        let mut balances = self.balances.lock().await;
        for asset in assets {
            balances.remove(*asset);
        }
    }

    pub fn notify_changed(&self) {
        self.changed.notify_one();
    }

    /// Wait up to `timeout` for a balance change. Returns false on timeout.
    pub async fn wait_changed(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.changed.notified()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_without_signal() {
        let cache = BalanceCache::new();
        assert!(!cache.wait_changed(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_latched_until_consumed() {
        let cache = BalanceCache::new();
        cache.notify_changed();
        assert!(cache.wait_changed(Duration::from_secs(1)).await);
        // consumed: the next wait times out
        assert!(!cache.wait_changed(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_invalidate_removes_entries() {
        let cache = BalanceCache::new();
        cache
            .replace(HashMap::from([("ETH".to_string(), 1.0), ("USDT".to_string(), 5.0)]))
            .await;
        cache.invalidate(&["ETH"]).await;
        let balances = cache.lock().await;
        assert!(!balances.contains_key("ETH"));
        assert_eq!(balances.get("USDT"), Some(&5.0));
    }
}
