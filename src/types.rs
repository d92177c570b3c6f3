//! Shared types for the COINHOP engine.
//!
//! These types form the data model used across all modules so that the
//! market, execution, engine and storage layers can depend on them without
//! circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order direction, always relative to the base asset of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Wire representation used by the exchange REST API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A market order ready for submission to an execution backend.
///
/// Buys are sized by `quote_quantity` (spend this much bridge currency),
/// sells by `quantity` (sell this much of the base asset). Both fields are
/// always filled in so a simulated backend can book either side.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub side: Side,
    /// Base asset, e.g. "ETH".
    pub base: String,
    /// Quote (bridge) asset, e.g. "USDT".
    pub quote: String,
    pub quantity: f64,
    pub quote_quantity: f64,
}

impl OrderRequest {
    /// Concatenated exchange symbol, e.g. "ETHUSDT".
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

/// Terminal result of a placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    /// Base quantity actually filled.
    pub filled_quantity: f64,
    /// Average fill price. Some venues report 0 for market orders.
    pub price: f64,
    /// Total quote spent (buy) or received (sell).
    pub cumulative_quote: f64,
    pub status: String,
}

impl OrderResult {
    pub fn is_filled(&self) -> bool {
        self.status == "FILLED"
    }

    /// Average price, derived from cumulative amounts when the venue
    /// reports a zero price.
    pub fn effective_price(&self) -> f64 {
        if self.price.abs() < 1e-15 && self.filled_quantity > 0.0 {
            self.cumulative_quote / self.filled_quantity
        } else {
            self.price
        }
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Depth-aware price estimate: average price plus the amount on the other
/// side of the trade (quote proceeds for sells, base obtainable for buys).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub price: f64,
    pub amount: f64,
}

impl Quote {
    pub fn new(price: f64, amount: f64) -> Self {
        Self { price, amount }
    }
}

/// Per-instrument trading rules published by the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolFilters {
    /// LOT_SIZE step, kept as a decimal so flooring is exact.
    pub step_size: rust_decimal::Decimal,
    pub min_notional: f64,
}

// ---------------------------------------------------------------------------
// Audit records
// ---------------------------------------------------------------------------

/// Lifecycle of a recorded trade. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TradeState {
    Starting,
    Ordered,
    Complete,
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeState::Starting => write!(f, "STARTING"),
            TradeState::Ordered => write!(f, "ORDERED"),
            TradeState::Complete => write!(f, "COMPLETE"),
        }
    }
}

/// One trade as seen by the audit sink. Every state transition is emitted
/// as a fresh snapshot of this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub alt_coin: String,
    pub crypto_coin: String,
    pub selling: bool,
    pub state: TradeState,
    pub alt_starting_balance: Option<f64>,
    pub crypto_starting_balance: Option<f64>,
    pub alt_trade_amount: Option<f64>,
    pub crypto_trade_amount: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl TradeRecord {
    pub fn start(alt_coin: &str, crypto_coin: &str, selling: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alt_coin: alt_coin.to_string(),
            crypto_coin: crypto_coin.to_string(),
            selling,
            state: TradeState::Starting,
            alt_starting_balance: None,
            crypto_starting_balance: None,
            alt_trade_amount: None,
            crypto_trade_amount: None,
            timestamp: Utc::now(),
        }
    }

    pub fn set_ordered(&mut self, alt_starting: f64, crypto_starting: f64, alt_amount: f64) {
        self.advance(TradeState::Ordered);
        self.alt_starting_balance = Some(alt_starting);
        self.crypto_starting_balance = Some(crypto_starting);
        self.alt_trade_amount = Some(alt_amount);
    }

    pub fn set_complete(&mut self, crypto_amount: f64) {
        self.advance(TradeState::Complete);
        self.crypto_trade_amount = Some(crypto_amount);
    }

    fn advance(&mut self, next: TradeState) {
        if next > self.state {
            self.state = next;
        }
    }
}

/// One evaluated candidate of a scout pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoutLogEntry {
    pub pair_id: u64,
    pub score: f64,
    pub target_ratio: f64,
    pub current_coin_price: f64,
    pub other_coin_price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Portfolio valuation point for one held asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinValue {
    pub symbol: String,
    pub balance: f64,
    pub bridge_price: Option<f64>,
    pub btc_price: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl CoinValue {
    /// Value of the holding in bridge currency, if priced.
    pub fn bridge_value(&self) -> Option<f64> {
        self.bridge_price.map(|p| p * self.balance)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised by execution backends.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Order rejected by exchange (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("Exchange request failed: {0}")]
    RequestFailed(String),

    #[error("Unexpected exchange response: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),
}

impl ExecutionError {
    /// Transient errors worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionError::Rejected { .. } | ExecutionError::RequestFailed(_)
        )
    }
}

impl From<reqwest::Error> for ExecutionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ExecutionError::Decode(err.to_string())
        } else {
            ExecutionError::RequestFailed(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
