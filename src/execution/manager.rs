//! Order execution manager.
//!
//! Wraps an `ExecutionBackend` with everything the engine needs around a
//! single order:
//! 1. Balance reads through the shared cache
//! 2. Quantity sizing floored to the instrument lot step
//! 3. Bounded retry of transient failures
//! 4. Fill confirmation against the balance view
//! 5. Trade record lifecycle in the audit sink
//! 6. Effective fee computation including the discount-asset rebate

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::ttl::{TtlCell, TtlMap};
use super::{BalanceCache, ExecutionBackend, InstrumentInfo};
use crate::market::MarketDataSource;
use crate::storage::audit::AuditSink;
use crate::types::{ExecutionError, OrderRequest, OrderResult, Side, SymbolFilters, TradeRecord};

/// Fee schedule and instrument filters change rarely.
const FEE_TTL: Duration = Duration::from_secs(12 * 60 * 60);
const FILTER_TTL: Duration = Duration::from_secs(12 * 60 * 60);
/// The discount opt-in can be toggled by the account holder at any time.
const DISCOUNT_FLAG_TTL: Duration = Duration::from_secs(60);

/// Fee multiplier when paying in the discount asset.
const FEE_DISCOUNT: f64 = 0.75;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSettings {
    /// Asset whose balance pays discounted fees.
    pub discount_asset: String,
    /// Fee used when the schedule cannot be introspected.
    pub default_fee: f64,
    pub retry: RetryPolicy,
    /// How long to wait on the balance-changed signal before forcing a
    /// balance refresh.
    pub confirm_wait: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            discount_asset: "BNB".to_string(),
            default_fee: 0.001,
            retry: RetryPolicy::default(),
            confirm_wait: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct OrderExecutionManager {
    backend: Arc<dyn ExecutionBackend>,
    instruments: Arc<dyn InstrumentInfo>,
    market: Arc<dyn MarketDataSource>,
    cache: Arc<BalanceCache>,
    audit: Arc<dyn AuditSink>,
    settings: ManagerSettings,
    fees: TtlCell<Option<HashMap<String, f64>>>,
    discount_enabled: TtlCell<bool>,
    filters: TtlMap<String, SymbolFilters>,
}

impl OrderExecutionManager {
    /// `cache` must be the balance cache the backend signals on.
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        instruments: Arc<dyn InstrumentInfo>,
        market: Arc<dyn MarketDataSource>,
        cache: Arc<BalanceCache>,
        audit: Arc<dyn AuditSink>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            backend,
            instruments,
            market,
            cache,
            audit,
            settings,
            fees: TtlCell::new(FEE_TTL),
            discount_enabled: TtlCell::new(DISCOUNT_FLAG_TTL),
            filters: TtlMap::new(FILTER_TTL),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    // -- Balances -----------------------------------------------------------

    /// Free balance of `symbol`. A cache miss or `force` refreshes the whole
    /// snapshot in one backend call; unknown assets read as 0.
    pub async fn get_balance(&self, symbol: &str, force: bool) -> Result<f64, ExecutionError> {
        let mut balances = self.cache.lock().await;
        if !force {
            if let Some(balance) = balances.get(symbol) {
                return Ok(*balance);
            }
        }

        let fresh = self.backend.fetch_balances().await?;
        debug!(assets = fresh.len(), forced = force, "Balance snapshot refreshed");
        *balances = fresh;
        Ok(*balances.entry(symbol.to_string()).or_insert(0.0))
    }

    // -- Orders -------------------------------------------------------------

    /// Buy `origin` with the whole `target` balance at about `price`.
    /// Returns None once retries are exhausted or on a non-retryable error.
    pub async fn buy(&self, origin: &str, target: &str, price: f64) -> Option<OrderResult> {
        self.with_retry("buy", || self.try_buy(origin, target, price)).await
    }

    /// Sell the whole `origin` balance into `target` at about `price`.
    pub async fn sell(&self, origin: &str, target: &str, price: f64) -> Option<OrderResult> {
        self.with_retry("sell", || self.try_sell(origin, target, price)).await
    }

    async fn with_retry<F, Fut>(&self, action: &str, mut attempt: F) -> Option<OrderResult>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<OrderResult, ExecutionError>>,
    {
        let policy = &self.settings.retry;
        for n in 1..=policy.attempts {
            match attempt().await {
                Ok(order) => return Some(order),
                Err(e) if e.is_retryable() => {
                    warn!(action, attempt = n, max = policy.attempts, error = %e, "Order attempt failed");
                }
                Err(e) => {
                    error!(action, error = %e, "Order failed, not retrying");
                    return None;
                }
            }
            if n < policy.attempts {
                tokio::time::sleep(policy.delay).await;
            }
        }
        error!(action, attempts = policy.attempts, "Order retries exhausted");
        None
    }

    async fn try_buy(&self, origin: &str, target: &str, price: f64) -> Result<OrderResult, ExecutionError> {
        let origin_balance = self.get_balance(origin, false).await?;
        let target_balance = self.get_balance(target, false).await?;
        let quantity = self
            .buy_quantity(origin, target, Some(target_balance), Some(price))
            .await?;
        if quantity <= 0.0 {
            return Err(ExecutionError::InvalidOrder(format!(
                "{target} balance {target_balance} buys no {origin}"
            )));
        }
        info!(
            origin,
            target,
            quantity,
            price,
            backend = self.backend.name(),
            "Buying"
        );

        let mut record = TradeRecord::start(origin, target, false);
        self.audit.record_trade(&record);

        let order = self
            .backend
            .place_order(&OrderRequest {
                side: Side::Buy,
                base: origin.to_string(),
                quote: target.to_string(),
                quantity,
                quote_quantity: quantity * price,
            })
            .await?;

        record.set_ordered(origin_balance, target_balance, quantity);
        self.audit.record_trade(&record);

        let settled = self.await_balance_move(origin, origin_balance, true).await;
        info!(origin, balance = settled, "Bought");

        record.set_complete(order.cumulative_quote);
        self.audit.record_trade(&record);
        Ok(order)
    }

    async fn try_sell(&self, origin: &str, target: &str, price: f64) -> Result<OrderResult, ExecutionError> {
        let origin_balance = self.get_balance(origin, false).await?;
        let target_balance = self.get_balance(target, false).await?;
        let quantity = self.sell_quantity(origin, target, Some(origin_balance)).await?;
        if quantity <= 0.0 {
            return Err(ExecutionError::InvalidOrder(format!(
                "{origin} balance {origin_balance} is below one lot"
            )));
        }
        info!(
            origin,
            target,
            quantity,
            price,
            backend = self.backend.name(),
            "Selling"
        );

        let mut record = TradeRecord::start(origin, target, true);
        self.audit.record_trade(&record);

        let order = self
            .backend
            .place_order(&OrderRequest {
                side: Side::Sell,
                base: origin.to_string(),
                quote: target.to_string(),
                quantity,
                quote_quantity: quantity * price,
            })
            .await?;

        record.set_ordered(origin_balance, target_balance, quantity);
        self.audit.record_trade(&record);

        let settled = self.await_balance_move(origin, origin_balance, false).await;
        info!(origin, balance = settled, "Sold");

        record.set_complete(order.cumulative_quote);
        self.audit.record_trade(&record);
        Ok(order)
    }

    /// Block until `asset` moved past `before`. Waits on the balance-changed
    /// signal and forces a refresh whenever the wait times out. Unbounded.
    async fn await_balance_move(&self, asset: &str, before: f64, increase: bool) -> f64 {
        let moved = |now: f64| if increase { now > before } else { now < before };
        let mut force = false;
        loop {
            match self.get_balance(asset, force).await {
                Ok(now) if moved(now) => return now,
                Ok(now) => debug!(asset, before, now, "Waiting for balance update"),
                Err(e) => warn!(asset, error = %e, "Balance refresh failed while confirming order"),
            }
            force = !self.cache.wait_changed(self.settings.confirm_wait).await;
        }
    }

    // -- Quantities ---------------------------------------------------------

    /// Base quantity of `origin` that the `target` balance buys at `price`,
    /// floored to the lot step. Missing arguments are looked up.
    pub async fn buy_quantity(
        &self,
        origin: &str,
        target: &str,
        target_balance: Option<f64>,
        price: Option<f64>,
    ) -> Result<f64, ExecutionError> {
        let balance = match target_balance {
            Some(b) => b,
            None => self.get_balance(target, false).await?,
        };
        let symbol = format!("{origin}{target}");
        let price = match price.filter(|p| *p > 0.0) {
            Some(p) => p,
            None => self
                .market
                .ticker_price(&symbol)
                .await
                .ok_or_else(|| ExecutionError::RequestFailed(format!("no ticker price for {symbol}")))?,
        };
        let filters = self.filters(&symbol).await?;
        Ok(floor_to_step(balance / price, filters.step_size))
    }

    /// Sellable quantity of `origin`, floored to the lot step.
    pub async fn sell_quantity(
        &self,
        origin: &str,
        target: &str,
        origin_balance: Option<f64>,
    ) -> Result<f64, ExecutionError> {
        let balance = match origin_balance {
            Some(b) => b,
            None => self.get_balance(origin, false).await?,
        };
        let filters = self.filters(&format!("{origin}{target}")).await?;
        Ok(floor_to_step(balance, filters.step_size))
    }

    async fn filters(&self, symbol: &str) -> Result<SymbolFilters, ExecutionError> {
        let key = symbol.to_string();
        if let Some(filters) = self.filters.get(&key) {
            return Ok(filters);
        }
        let filters = self.instruments.symbol_filters(symbol).await?;
        self.filters.insert(key, filters.clone());
        Ok(filters)
    }

    // -- Fees ---------------------------------------------------------------

    /// Effective taker fee for trading `origin` against `target`.
    pub async fn get_fee(&self, origin: &str, target: &str, selling: bool) -> Result<f64, ExecutionError> {
        let Some(fees) = self.trade_fees().await? else {
            return Ok(self.settings.default_fee);
        };
        let symbol = format!("{origin}{target}");
        let base_fee = match fees.get(&symbol) {
            Some(fee) => *fee,
            None => {
                warn!(symbol = %symbol, "No fee on schedule, using default");
                self.settings.default_fee
            }
        };

        if !self.discount_enabled().await? {
            return Ok(base_fee);
        }

        let amount = if selling {
            self.sell_quantity(origin, target, None).await?
        } else {
            self.buy_quantity(origin, target, None, None).await?
        };
        let fee_amount = amount * base_fee * FEE_DISCOUNT;

        let discount_asset = self.settings.discount_asset.as_str();
        let fee_in_discount_asset = if origin == discount_asset {
            fee_amount
        } else {
            match self.market.ticker_price(&format!("{origin}{discount_asset}")).await {
                Some(price) => fee_amount * price,
                None => return Ok(base_fee),
            }
        };

        let held = self.get_balance(discount_asset, false).await?;
        if held >= fee_in_discount_asset {
            Ok(base_fee * FEE_DISCOUNT)
        } else {
            Ok(base_fee)
        }
    }

    async fn trade_fees(&self) -> Result<Option<HashMap<String, f64>>, ExecutionError> {
        if let Some(fees) = self.fees.get() {
            return Ok(fees);
        }
        let fees = self.instruments.trade_fees().await?;
        self.fees.set(fees.clone());
        Ok(fees)
    }

    async fn discount_enabled(&self) -> Result<bool, ExecutionError> {
        if let Some(enabled) = self.discount_enabled.get() {
            return Ok(enabled);
        }
        let enabled = self.instruments.fee_discount_enabled().await?;
        self.discount_enabled.set(enabled);
        Ok(enabled)
    }
}

/// Floor `value` to a multiple of `step`. A non-positive step leaves the
/// value unchanged; non-finite or negative values floor to 0.
pub fn floor_to_step(value: f64, step: Decimal) -> f64 {
    if !value.is_finite() || value <= 0.0 {
        return 0.0;
    }
    if step <= Decimal::ZERO {
        return value;
    }
    let Some(exact) = Decimal::from_f64(value) else {
        return 0.0;
    };
    ((exact / step).floor() * step).to_f64().unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
