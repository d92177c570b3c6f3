//! Paper trading backend.
//!
//! Fills every order immediately at the supplied amounts, minus a 0.1%
//! haircut on the received side. The wallet is persisted after every buy
//! so a restart reproduces the last balances.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::{BalanceCache, ExecutionBackend};
use crate::storage::{self, PaperWallet};
use crate::types::{ExecutionError, OrderRequest, OrderResult, Side};

/// Share of the received amount kept by a simulated fill.
const FILL_KEEP: f64 = 0.999;

/// Insufficient balance, as the exchange reports it.
const INSUFFICIENT_BALANCE: i64 = -2010;

pub struct SimulatedBackend {
    wallet: Mutex<PaperWallet>,
    cache: Arc<BalanceCache>,
    path: Option<PathBuf>,
}

impl SimulatedBackend {
    /// Load the wallet from `path`, or seed a fresh one with
    /// `initial_balance` of the bridge currency. Without a path the wallet
    /// lives in memory only.
    pub fn open(
        path: Option<PathBuf>,
        bridge: &str,
        initial_balance: f64,
        cache: Arc<BalanceCache>,
    ) -> anyhow::Result<Self> {
        let stored = match &path {
            Some(p) => storage::load_json::<PaperWallet>(p)?,
            None => None,
        };
        let wallet = match stored {
            Some(wallet) => {
                info!(assets = wallet.balances.len(), orders = wallet.fake_order_id, "Paper wallet restored");
                wallet
            }
            None => {
                info!(bridge, balance = initial_balance, "Paper wallet seeded");
                PaperWallet::seeded(bridge, initial_balance)
            }
        };
        Ok(Self::from_wallet(wallet, path, cache))
    }

    pub fn from_wallet(wallet: PaperWallet, path: Option<PathBuf>, cache: Arc<BalanceCache>) -> Self {
        Self {
            wallet: Mutex::new(wallet),
            cache,
            path,
        }
    }

    pub fn wallet(&self) -> PaperWallet {
        self.wallet.lock().map(|w| w.clone()).unwrap_or_default()
    }

    fn fill(&self, order: &OrderRequest) -> Result<(OrderResult, HashMap<String, f64>), ExecutionError> {
        let mut wallet = self
            .wallet
            .lock()
            .map_err(|_| ExecutionError::Storage("paper wallet lock poisoned".into()))?;

        let base = wallet.balances.get(&order.base).copied().unwrap_or(0.0);
        let quote = wallet.balances.get(&order.quote).copied().unwrap_or(0.0);

        let (new_base, new_quote) = match order.side {
            Side::Buy => {
                if order.quote_quantity > quote * (1.0 + 1e-9) {
                    return Err(insufficient(&order.quote, order.quote_quantity, quote));
                }
                (base + order.quantity * FILL_KEEP, quote - order.quote_quantity)
            }
            Side::Sell => {
                if order.quantity > base * (1.0 + 1e-9) {
                    return Err(insufficient(&order.base, order.quantity, base));
                }
                (base - order.quantity, quote + order.quote_quantity * FILL_KEEP)
            }
        };
        wallet.balances.insert(order.base.clone(), new_base.max(0.0));
        wallet.balances.insert(order.quote.clone(), new_quote.max(0.0));
        wallet.fake_order_id += 1;

        let result = OrderResult {
            order_id: wallet.fake_order_id.to_string(),
            symbol: order.symbol(),
            side: order.side,
            filled_quantity: order.quantity,
            price: if order.quantity > 0.0 {
                order.quote_quantity / order.quantity
            } else {
                0.0
            },
            cumulative_quote: order.quote_quantity,
            status: "FILLED".to_string(),
        };

        if order.side == Side::Buy {
            if let Some(path) = &self.path {
                storage::save_json(&*wallet, path).map_err(|e| ExecutionError::Storage(e.to_string()))?;
            }
        }

        Ok((result, wallet.balances.clone()))
    }
}

fn insufficient(asset: &str, wanted: f64, held: f64) -> ExecutionError {
    ExecutionError::Rejected {
        code: INSUFFICIENT_BALANCE,
        message: format!("insufficient {asset} balance: need {wanted}, have {held}"),
    }
}

#[async_trait]
impl ExecutionBackend for SimulatedBackend {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResult, ExecutionError> {
        let (result, snapshot) = self.fill(order)?;
        info!(
            symbol = %result.symbol,
            side = %result.side,
            order_id = %result.order_id,
            quantity = order.quantity,
            quote = order.quote_quantity,
            "Paper order filled"
        );

        self.cache.replace(snapshot).await;
        self.cache.notify_changed();
        Ok(result)
    }

    async fn fetch_balances(&self) -> Result<HashMap<String, f64>, ExecutionError> {
        self.wallet
            .lock()
            .map(|w| w.balances.clone())
            .map_err(|_| {
                warn!("Paper wallet lock poisoned");
                ExecutionError::Storage("paper wallet lock poisoned".into())
            })
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
