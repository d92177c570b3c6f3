//! Live execution backend.
//!
//! Places real market orders and reads balances from the exchange account.
//! There is no user-data stream, so after every order the affected assets
//! are dropped from the balance cache and the balance-changed signal is
//! raised; the next read refreshes from the exchange.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{BalanceCache, ExecutionBackend};
use crate::exchange::client::ExchangeClient;
use crate::types::{ExecutionError, OrderRequest, OrderResult};

pub struct LiveBackend {
    client: Arc<ExchangeClient>,
    cache: Arc<BalanceCache>,
}

impl LiveBackend {
    pub fn new(client: Arc<ExchangeClient>, cache: Arc<BalanceCache>) -> Self {
        Self { client, cache }
    }
}

#[async_trait]
impl ExecutionBackend for LiveBackend {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResult, ExecutionError> {
        let result = self.client.market_order(order).await?;
        info!(
            symbol = %result.symbol,
            side = %result.side,
            order_id = %result.order_id,
            filled = result.filled_quantity,
            quote = result.cumulative_quote,
            status = %result.status,
            "Order placed"
        );

        self.cache.invalidate(&[&order.base, &order.quote]).await;
        self.cache.notify_changed();
        Ok(result)
    }

    async fn fetch_balances(&self) -> Result<HashMap<String, f64>, ExecutionError> {
        let balances = self.client.account_balances().await?;
        debug!(assets = balances.len(), "Fetched account balances");
        Ok(balances)
    }

    fn name(&self) -> &str {
        "live"
    }
}
