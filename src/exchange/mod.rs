//! Exchange integration.
//!
//! `client` holds the REST binding. `ReducedFidelity` wraps any instrument
//! source for execution domains where the account fee schedule cannot be
//! introspected (paper trading): filters are passed through, fees are
//! reported as unknown and fee discounts as disabled.

pub mod client;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::execution::InstrumentInfo;
use crate::types::{ExecutionError, SymbolFilters};

pub struct ReducedFidelity {
    inner: Arc<dyn InstrumentInfo>,
}

impl ReducedFidelity {
    pub fn new(inner: Arc<dyn InstrumentInfo>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl InstrumentInfo for ReducedFidelity {
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExecutionError> {
        self.inner.symbol_filters(symbol).await
    }

    async fn trade_fees(&self) -> Result<Option<HashMap<String, f64>>, ExecutionError> {
        Ok(None)
    }

    async fn fee_discount_enabled(&self) -> Result<bool, ExecutionError> {
        Ok(false)
    }
}
