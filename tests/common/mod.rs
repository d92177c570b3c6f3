//! Shared fixtures for engine integration tests.
//!
//! Builds a full engine stack over in-memory components: flat order books
//! with effectively unlimited depth, a paper wallet, a fee-free instrument
//! schedule and a memory audit sink.

#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coinhop::engine::ratios::{PairBaseline, RatioMatrix};
use coinhop::engine::registry::CoinRegistry;
use coinhop::engine::scoring::ScoreMode;
use coinhop::engine::scout::{ScoutEngine, ScoutSettings};
use coinhop::execution::manager::{ManagerSettings, OrderExecutionManager, RetryPolicy};
use coinhop::execution::simulated::SimulatedBackend;
use coinhop::execution::{BalanceCache, InstrumentInfo};
use coinhop::market::book::{BookMarketData, DepthBook};
use coinhop::market::MarketDataSource;
use coinhop::storage::audit::MemoryAuditSink;
use coinhop::storage::{BaselineStore, PaperWallet};
use coinhop::types::{ExecutionError, Quote, SymbolFilters};

pub const BRIDGE: &str = "USDT";

/// Depth large enough that no test order walks past the first level.
const DEEP: f64 = 1e9;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// Book-backed market whose depth queries can be made to fail per symbol.
#[derive(Default)]
pub struct ScriptedMarket {
    books: BookMarketData,
    thin_fill_quote: Mutex<HashSet<String>>,
}

impl ScriptedMarket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flat book for `coin` against the bridge, plus ticker and filters.
    pub fn set_price(&self, coin: &str, bid: f64, ask: f64) {
        let symbol = format!("{coin}{BRIDGE}");
        self.books
            .update_book(&symbol, DepthBook::from_levels(vec![(bid, DEEP)], vec![(ask, DEEP)]));
        self.books.update_tickers(HashMap::from([(symbol.clone(), bid)]));
        self.books.set_filters(
            &symbol,
            SymbolFilters {
                step_size: dec!(0.001),
                min_notional: 1.0,
            },
        );
    }

    /// Make quote-filling sell estimates for `coin` report a thin book.
    pub fn thin_fill_quote(&self, coin: &str) {
        if let Ok(mut thin) = self.thin_fill_quote.lock() {
            thin.insert(format!("{coin}{BRIDGE}"));
        }
    }

    fn is_thin(&self, symbol: &str) -> bool {
        self.thin_fill_quote
            .lock()
            .map(|t| t.contains(symbol))
            .unwrap_or(false)
    }
}

#[async_trait]
impl MarketDataSource for ScriptedMarket {
    async fn ticker_price(&self, symbol: &str) -> Option<f64> {
        self.books.ticker_price(symbol).await
    }

    async fn market_sell_price(&self, symbol: &str, base_qty: f64) -> Option<Quote> {
        self.books.market_sell_price(symbol, base_qty).await
    }

    async fn market_buy_price(&self, symbol: &str, quote_qty: f64) -> Option<Quote> {
        self.books.market_buy_price(symbol, quote_qty).await
    }

    async fn market_sell_price_fill_quote(&self, symbol: &str, quote: f64) -> Option<Quote> {
        if self.is_thin(symbol) {
            return None;
        }
        self.books.market_sell_price_fill_quote(symbol, quote).await
    }

    async fn min_notional(&self, symbol: &str) -> f64 {
        self.books.min_notional(symbol).await
    }
}

// ---------------------------------------------------------------------------
// Instruments
// ---------------------------------------------------------------------------

/// Zero fees on every listed symbol, 0.001 lot step, no discount asset.
pub struct FreeInstruments {
    fees: HashMap<String, f64>,
}

impl FreeInstruments {
    pub fn new(coins: &[&str]) -> Self {
        Self {
            fees: coins.iter().map(|c| (format!("{c}{BRIDGE}"), 0.0)).collect(),
        }
    }
}

#[async_trait]
impl InstrumentInfo for FreeInstruments {
    async fn symbol_filters(&self, _symbol: &str) -> Result<SymbolFilters, ExecutionError> {
        Ok(SymbolFilters {
            step_size: dec!(0.001),
            min_notional: 1.0,
        })
    }

    async fn trade_fees(&self) -> Result<Option<HashMap<String, f64>>, ExecutionError> {
        Ok(Some(self.fees.clone()))
    }

    async fn fee_discount_enabled(&self) -> Result<bool, ExecutionError> {
        Ok(false)
    }
}

// ---------------------------------------------------------------------------
// Engine stack
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: ScoutEngine,
    pub market: Arc<ScriptedMarket>,
    pub wallet: Arc<SimulatedBackend>,
    pub audit: Arc<MemoryAuditSink>,
}

impl Harness {
    pub fn with_store(self, store: BaselineStore) -> Self {
        Harness {
            engine: self.engine.with_baseline_store(store),
            ..self
        }
    }

    pub fn with_tracked(self, symbols: &[&str]) -> Self {
        Harness {
            engine: self.engine.with_tracked_coins(symbols.iter().copied()),
            ..self
        }
    }

    pub fn balance(&self, asset: &str) -> f64 {
        self.wallet.wallet().balances.get(asset).copied().unwrap_or(0.0)
    }

    /// Trades that reached a terminal state, one entry per order.
    pub fn completed_trades(&self) -> usize {
        self.audit
            .trades()
            .iter()
            .filter(|t| t.state == coinhop::types::TradeState::Complete)
            .count()
    }
}

/// Baseline of `from -> to`.
pub fn baseline(from: &str, to: &str, ratio: f64) -> PairBaseline {
    PairBaseline {
        id: 0,
        from: from.to_string(),
        to: to.to_string(),
        ratio: Some(ratio),
    }
}

/// Engine over `coins` holding `holdings`, with the given baselines and a
/// market already populated by `market`.
pub fn harness(
    coins: &[&str],
    holdings: &[(&str, f64)],
    baselines: &[PairBaseline],
    market: ScriptedMarket,
) -> Harness {
    let registry = CoinRegistry::new(coins);
    let ratios = RatioMatrix::from_baselines(&registry, baselines);
    harness_with_matrix(coins, holdings, registry, ratios, market)
}

pub fn harness_with_matrix(
    coins: &[&str],
    holdings: &[(&str, f64)],
    registry: CoinRegistry,
    ratios: RatioMatrix,
    market: ScriptedMarket,
) -> Harness {
    let market = Arc::new(market);
    let cache = Arc::new(BalanceCache::new());
    let wallet = Arc::new(SimulatedBackend::from_wallet(
        PaperWallet {
            balances: holdings.iter().map(|(a, b)| (a.to_string(), *b)).collect(),
            fake_order_id: 0,
        },
        None,
        cache.clone(),
    ));
    let audit = Arc::new(MemoryAuditSink::new());
    let manager = Arc::new(OrderExecutionManager::new(
        wallet.clone(),
        Arc::new(FreeInstruments::new(coins)),
        market.clone(),
        cache,
        audit.clone(),
        ManagerSettings {
            retry: RetryPolicy {
                attempts: 3,
                delay: Duration::from_millis(10),
            },
            ..ManagerSettings::default()
        },
    ));
    let engine = ScoutEngine::new(
        ScoutSettings::new(BRIDGE, ScoreMode::Margin { margin: 0.8 }),
        registry,
        ratios,
        market.clone(),
        manager,
        audit.clone(),
    );
    Harness {
        engine,
        market,
        wallet,
        audit,
    }
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}
