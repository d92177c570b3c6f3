//! Scout engine.
//!
//! Scores every enabled destination against the coin currently held, walks
//! a chain of hypothetical hops to find the best final destination and
//! executes at most one real trade through the bridge currency per walk.
//!
//! The ratio matrix is locked for the whole walk. Threshold updates made by
//! hops are staged and only become baselines once the walk ends normally;
//! an aborted walk rolls every staged value back.

use anyhow::Result;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::ratios::RatioMatrix;
use super::registry::{CoinId, CoinRegistry};
use super::scoring::{self, ScoreMode};
use crate::execution::manager::OrderExecutionManager;
use crate::market::MarketDataSource;
use crate::storage::audit::AuditSink;
use crate::storage::BaselineStore;
use crate::types::{CoinValue, OrderResult, Quote, ScoutLogEntry};

/// Share of the bridge proceeds expected to survive the sell fee when
/// estimating slippage.
const EXPECTED_SELL_KEEP: f64 = 0.999;

// ---------------------------------------------------------------------------
// Settings & outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ScoutSettings {
    /// Bridge currency every coin is priced and traded against.
    pub bridge: String,
    pub mode: ScoreMode,
    /// Delay between attempts of the post-trade threshold update.
    pub threshold_retry_delay: Duration,
    /// Attempts per price lookup during cold-start initialisation.
    pub init_attempts: u32,
    pub init_sell_backoff: Duration,
    pub init_buy_backoff: Duration,
    /// Attempts at pricing the whole wallet before settling for a partial
    /// valuation.
    pub wallet_value_attempts: u32,
    pub wallet_value_delay: Duration,
}

impl ScoutSettings {
    pub fn new(bridge: impl Into<String>, mode: ScoreMode) -> Self {
        Self {
            bridge: bridge.into(),
            mode,
            threshold_retry_delay: Duration::from_secs(1),
            init_attempts: 10,
            init_sell_backoff: Duration::from_secs(1),
            init_buy_backoff: Duration::from_secs(10),
            wallet_value_attempts: 10,
            wallet_value_delay: Duration::from_secs(1),
        }
    }
}

/// One scored destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub to: CoinId,
    pub score: f64,
    /// Depth-aware buy price of the destination.
    pub buy_price: f64,
    /// Destination quantity obtainable for the quote amount.
    pub amount: f64,
}

/// How a walk ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JumpOutcome {
    /// No destination scored positive.
    Stayed,
    /// The chain returned to its start; fresh prices were kept, no trade.
    LoopEliminated,
    /// Market data vanished mid-walk; everything staged was rolled back.
    Aborted,
    /// A trade towards `to` was attempted. `order` is the buy, if it filled.
    Jumped { to: String, order: Option<OrderResult> },
}

enum Walk {
    Done { chain: Vec<CoinId>, last_buy_price: f64 },
    Aborted,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ScoutEngine {
    settings: ScoutSettings,
    registry: CoinRegistry,
    ratios: Mutex<RatioMatrix>,
    market: Arc<dyn MarketDataSource>,
    manager: Arc<OrderExecutionManager>,
    audit: Arc<dyn AuditSink>,
    baselines: Option<BaselineStore>,
    /// Coins outside the registry that are still valued when held.
    tracked: Vec<String>,
}

impl ScoutEngine {
    pub fn new(
        settings: ScoutSettings,
        registry: CoinRegistry,
        ratios: RatioMatrix,
        market: Arc<dyn MarketDataSource>,
        manager: Arc<OrderExecutionManager>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            settings,
            registry,
            ratios: Mutex::new(ratios),
            market,
            manager,
            audit,
            baselines: None,
            tracked: Vec::new(),
        }
    }

    /// Persist committed baselines to `store` after every commit.
    pub fn with_baseline_store(mut self, store: BaselineStore) -> Self {
        self.baselines = Some(store);
        self
    }

    /// Also value holdings of `symbols` when they are not enabled coins.
    pub fn with_tracked_coins<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tracked: Vec<String> = symbols
            .into_iter()
            .map(Into::into)
            .filter(|s| self.registry.by_symbol(s).is_none() && *s != self.settings.bridge)
            .collect();
        tracked.sort();
        tracked.dedup();
        self.tracked = tracked;
        self
    }

    pub fn registry(&self) -> &CoinRegistry {
        &self.registry
    }

    /// Copy of the ratio matrix, for inspection.
    pub async fn ratios_snapshot(&self) -> RatioMatrix {
        self.ratios.lock().await.clone()
    }

    fn pair(&self, coin: CoinId) -> String {
        format!("{}{}", self.registry.symbol(coin), self.settings.bridge)
    }

    fn commit(&self, ratios: &mut RatioMatrix) {
        let cells = ratios.commit();
        debug!(cells = cells.len(), "Ratios committed");
        if cells.is_empty() {
            return;
        }
        if let Some(store) = &self.baselines {
            if let Err(e) = store.save_matrix(ratios, &self.registry) {
                warn!(error = %e, "Failed to persist baselines");
            }
        }
    }

    // -- Scouting -----------------------------------------------------------

    /// One scout cycle: walk from every held coin worth trading, then try to
    /// deploy idle bridge balance.
    pub async fn scout(&self) -> Result<()> {
        for coin in self.registry.ids() {
            let symbol = self.registry.symbol(coin);
            let balance = self.manager.get_balance(symbol, false).await?;
            if balance <= 0.0 {
                continue;
            }
            let pair = self.pair(coin);
            let Some(sell) = self.market.market_sell_price(&pair, balance).await else {
                info!(pair = %pair, "Skipping scouting, current coin price not available");
                continue;
            };
            if sell.price * balance < self.market.min_notional(&pair).await {
                continue;
            }
            let outcome = self.jump_to_best_coin(coin, sell.price, sell.amount, balance).await?;
            debug!(coin = symbol, outcome = ?outcome, "Walk finished");
        }
        self.bridge_scout().await?;
        Ok(())
    }

    /// Score every destination from `coin` sold at `sell_price` for
    /// `quote_amount` of bridge. Destinations without market data are
    /// skipped. With `log` the evaluated candidates are written to the
    /// audit sink as one batch.
    pub async fn get_ratios(
        &self,
        ratios: &RatioMatrix,
        coin: CoinId,
        sell_price: f64,
        quote_amount: f64,
        log: bool,
    ) -> Result<Vec<Candidate>> {
        let bridge = self.settings.bridge.as_str();
        let from_symbol = self.registry.symbol(coin);
        let from_fee = self.manager.get_fee(from_symbol, bridge, true).await?;

        let mut candidates = Vec::new();
        let mut entries = Vec::new();
        for (idx, &baseline) in ratios.row(coin).iter().enumerate() {
            let to = CoinId(idx);
            if to == coin {
                continue;
            }
            let pair = self.pair(to);
            let buy = match self.market.market_buy_price(&pair, quote_amount).await {
                Some(q) if q.price > 0.0 => q,
                _ => {
                    info!(pair = %pair, "Market price can't be calculated, skipping");
                    continue;
                }
            };

            let to_fee = self.manager.get_fee(self.registry.symbol(to), bridge, false).await?;
            let fee = scoring::round_trip_fee(from_fee, to_fee);
            let score = scoring::score(self.settings.mode, sell_price, buy.price, baseline, fee);

            if log {
                entries.push(ScoutLogEntry {
                    pair_id: ratios.pair_id(coin, to),
                    score,
                    target_ratio: baseline,
                    current_coin_price: sell_price,
                    other_coin_price: buy.price,
                    timestamp: Utc::now(),
                });
            }
            candidates.push(Candidate {
                to,
                score,
                buy_price: buy.price,
                amount: buy.amount,
            });
        }

        if !entries.is_empty() {
            self.audit.log_scouts(&entries);
        }
        Ok(candidates)
    }

    /// Walk the jump chain from `coin` and trade towards its end.
    ///
    /// `sell_price`/`quote_amount` are the depth-aware estimate of selling
    /// the whole `coin_amount`. Any error rolls the matrix back before it is
    /// returned.
    pub async fn jump_to_best_coin(
        &self,
        coin: CoinId,
        sell_price: f64,
        quote_amount: f64,
        coin_amount: f64,
    ) -> Result<JumpOutcome> {
        let mut ratios = self.ratios.lock().await;
        let bridge_balance = self.manager.get_balance(&self.settings.bridge, false).await?;

        let walk = self
            .walk(&mut ratios, coin, sell_price, quote_amount, coin_amount)
            .await;
        let (chain, last_buy_price) = match walk {
            Ok(Walk::Done { chain, last_buy_price }) => (chain, last_buy_price),
            Ok(Walk::Aborted) => {
                ratios.rollback();
                return Ok(JumpOutcome::Aborted);
            }
            Err(e) => {
                ratios.rollback();
                return Err(e);
            }
        };
        self.commit(&mut ratios);

        let start = chain[0];
        let end = chain[chain.len() - 1];
        if chain.len() == 1 {
            return Ok(JumpOutcome::Stayed);
        }
        if chain.len() > 2 {
            let symbols: Vec<&str> = chain.iter().map(|c| self.registry.symbol(*c)).collect();
            info!(chain = ?symbols, "Squashed jump chain");
        }

        if start == end {
            let updated = self
                .update_trade_threshold(&mut ratios, coin, None, sell_price, 0.0, quote_amount)
                .await;
            if updated {
                self.commit(&mut ratios);
            } else {
                ratios.rollback();
            }
            info!(coin = self.registry.symbol(coin), updated, "Eliminated jump loop");
            return Ok(JumpOutcome::LoopEliminated);
        }

        let from_symbol = self.registry.symbol(coin);
        let to_symbol = self.registry.symbol(end);
        info!(from = from_symbol, to = to_symbol, "Will be jumping");
        let order = self
            .transaction_through_bridge(&mut ratios, coin, end, sell_price, last_buy_price)
            .await?;

        if let Some(result) = &order {
            self.log_slippage(coin, end, sell_price, last_buy_price, coin_amount, bridge_balance, result)
                .await;
        }
        Ok(JumpOutcome::Jumped {
            to: to_symbol.to_string(),
            order,
        })
    }

    async fn walk(
        &self,
        ratios: &mut RatioMatrix,
        coin: CoinId,
        sell_price: f64,
        quote_amount: f64,
        coin_amount: f64,
    ) -> Result<Walk> {
        let mut chain = vec![coin];
        let mut last = coin;
        let mut last_sell_price = sell_price;
        let mut last_buy_price = 0.0;
        let mut last_quote = quote_amount;
        let mut last_amount = coin_amount;

        loop {
            let initial = chain.len() == 1;
            if !initial {
                let pair = self.pair(last);
                match self.market.market_sell_price(&pair, last_amount).await {
                    Some(q) => {
                        last_sell_price = q.price;
                        last_quote = q.amount;
                    }
                    None => {
                        info!(pair = %pair, "Hop price unavailable, aborting walk");
                        return Ok(Walk::Aborted);
                    }
                }
            }

            let candidates = self
                .get_ratios(ratios, last, last_sell_price, last_quote, initial)
                .await?;
            let Some(best) = best_candidate(&candidates) else {
                break;
            };

            if !initial
                && !self
                    .update_trade_threshold(
                        ratios,
                        last,
                        Some(best.to),
                        last_buy_price,
                        last_amount,
                        last_quote,
                    )
                    .await
            {
                return Ok(Walk::Aborted);
            }

            last = best.to;
            last_buy_price = best.buy_price;
            last_amount = best.amount;
            chain.push(last);

            // every coin visited once more than the set size means the chain cycles
            if chain.len() > self.registry.len() + 1 {
                warn!(hops = chain.len() - 1, "Jump chain did not settle, stopping walk");
                break;
            }
        }

        Ok(Walk::Done { chain, last_buy_price })
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_slippage(
        &self,
        from: CoinId,
        to: CoinId,
        sell_price: f64,
        buy_price: f64,
        coin_amount: f64,
        bridge_balance: f64,
        result: &OrderResult,
    ) {
        let bridge = self.settings.bridge.as_str();
        let expected = async {
            let sold = self
                .manager
                .sell_quantity(self.registry.symbol(from), bridge, Some(coin_amount))
                .await?;
            let expected_bridge = sold * sell_price * EXPECTED_SELL_KEEP + bridge_balance;
            self.manager
                .buy_quantity(self.registry.symbol(to), bridge, Some(expected_bridge), Some(buy_price))
                .await
        };
        match expected.await {
            Ok(expected) if result.filled_quantity > 0.0 => info!(
                expected,
                actual = result.filled_quantity,
                slippage_pct = (expected / result.filled_quantity - 1.0) * 100.0,
                "Jump fill"
            ),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Slippage estimate unavailable"),
        }
    }

    // -- Threshold updates --------------------------------------------------

    /// Stage `ratio(coin, to) = coin_price / to_buy_price` for every other
    /// coin, priced by selling exactly `quote_amount`. With `from`, also
    /// ratchet the reverse pair `ratio(to, from)` up to the currently
    /// observed rate. Returns false when depth is insufficient; values
    /// staged before the failure stay staged.
    pub async fn update_trade_threshold(
        &self,
        ratios: &mut RatioMatrix,
        to: CoinId,
        from: Option<CoinId>,
        to_buy_price: f64,
        to_amount: f64,
        quote_amount: f64,
    ) -> bool {
        if to_buy_price.is_nan() || to_buy_price <= 0.0 {
            info!(pair = %self.pair(to), "Skipping threshold update, no price for current coin");
            return false;
        }

        for coin in self.registry.ids() {
            if coin == to {
                continue;
            }
            let pair = self.pair(coin);
            match self.market.market_sell_price_fill_quote(&pair, quote_amount).await {
                Some(q) => ratios.set(coin, to, q.price / to_buy_price),
                None => {
                    info!(pair = %pair, "Threshold update can't be performed, not enough orders in order book");
                    return false;
                }
            }
        }

        if let Some(from) = from {
            let from_buy = self.market.market_buy_price(&self.pair(from), quote_amount).await;
            let to_sell = self.market.market_sell_price(&self.pair(to), to_amount).await;
            match (from_buy, to_sell) {
                (Some(from_buy), Some(to_sell)) if from_buy.price > 0.0 => {
                    let observed = to_sell.price / from_buy.price;
                    ratios.set(to, from, ratios.get(to, from).max(observed));
                }
                _ => {
                    info!(
                        from = self.registry.symbol(to),
                        to = self.registry.symbol(from),
                        "Can't update reverse pair, not enough orders in order book"
                    );
                    return false;
                }
            }
        }
        true
    }

    /// Sell `from` into the bridge and buy `to`. On a filled buy the new
    /// coin becomes current and its thresholds are recomputed and
    /// committed, retrying until market depth allows it.
    pub async fn transaction_through_bridge(
        &self,
        ratios: &mut RatioMatrix,
        from: CoinId,
        to: CoinId,
        sell_price: f64,
        buy_price: f64,
    ) -> Result<Option<OrderResult>> {
        let bridge = self.settings.bridge.as_str();
        let from_symbol = self.registry.symbol(from);
        let to_symbol = self.registry.symbol(to);

        if self.manager.sell(from_symbol, bridge, sell_price).await.is_none() {
            error!(from = from_symbol, to = to_symbol, sell_price, "Market sell failed");
        }

        let Some(result) = self.manager.buy(to_symbol, bridge, buy_price).await else {
            info!(coin = to_symbol, "Couldn't buy, going back to scouting mode");
            return Ok(None);
        };
        self.audit.set_current_coin(to_symbol);

        let price = result.effective_price();
        loop {
            let to_amount = self.manager.get_balance(to_symbol, false).await?;
            if self
                .update_trade_threshold(ratios, to, Some(from), price, to_amount, result.cumulative_quote)
                .await
            {
                break;
            }
            info!("Update of ratios failed, retry in 1s");
            tokio::time::sleep(self.settings.threshold_retry_delay).await;
        }
        self.commit(ratios);
        Ok(Some(result))
    }

    // -- Cold start ---------------------------------------------------------

    /// Derive a baseline for every pair that has none, at the notional of
    /// the most valuable single holding. Pairs whose prices stay
    /// unavailable are skipped for this session.
    pub async fn initialize_trade_thresholds(&self) -> Result<()> {
        let missing = self.ratios.lock().await.missing_pairs();
        if missing.is_empty() {
            debug!("All pairs have baselines");
            return Ok(());
        }
        let max_quote = self.max_value_in_wallet().await?;
        info!(pairs = missing.len(), notional = max_quote, "Initialising trade thresholds");

        // pairs arrive grouped by source coin; its price is looked up once
        let mut staged = Vec::new();
        let mut source: Option<(CoinId, Option<f64>)> = None;
        for (from, to) in missing {
            let from_pair = self.pair(from);
            let price = match source {
                Some((coin, price)) if coin == from => price,
                _ => {
                    info!(coin = self.registry.symbol(from), "Initialising pairs");
                    self.price_with_retry(self.settings.init_sell_backoff, || {
                        self.market.market_sell_price_fill_quote(&from_pair, max_quote)
                    })
                    .await
                }
            };
            source = Some((from, price));
            let Some(from_price) = price else {
                info!(pair = %from_pair, "Skipping initialisation, symbol not found");
                continue;
            };

            let to_pair = self.pair(to);
            let to_price = self
                .price_with_retry(self.settings.init_buy_backoff, || {
                    self.market.market_buy_price(&to_pair, max_quote)
                })
                .await;
            match to_price {
                Some(to_price) if to_price > 0.0 => staged.push((from, to, from_price / to_price)),
                _ => info!(pair = %to_pair, "Skipping initialisation, symbol not found"),
            }
        }

        let mut ratios = self.ratios.lock().await;
        for (from, to, ratio) in &staged {
            ratios.set(*from, *to, *ratio);
        }
        self.commit(&mut ratios);
        info!(initialised = staged.len(), "Trade thresholds initialised");
        Ok(())
    }

    async fn price_with_retry<F, Fut>(&self, backoff: Duration, mut lookup: F) -> Option<f64>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<Quote>>,
    {
        for attempt in 1..=self.settings.init_attempts {
            if let Some(q) = lookup().await {
                return Some(q.price);
            }
            if attempt < self.settings.init_attempts {
                tokio::time::sleep(backoff).await;
            }
        }
        None
    }

    /// Largest bridge amount obtainable by liquidating any single holding,
    /// the bridge balance itself included.
    pub async fn max_value_in_wallet(&self) -> Result<f64> {
        let bridge_balance = self.manager.get_balance(&self.settings.bridge, false).await?;
        let mut holdings = Vec::new();
        for coin in self.registry.ids() {
            let balance = self.manager.get_balance(self.registry.symbol(coin), false).await?;
            if balance > 0.0 {
                holdings.push((coin, balance));
            }
        }

        let mut max_quote = bridge_balance;
        for attempt in 1..=self.settings.wallet_value_attempts {
            let mut priced = true;
            for &(coin, balance) in &holdings {
                match self.market.market_sell_price(&self.pair(coin), balance).await {
                    Some(q) => max_quote = max_quote.max(q.amount),
                    None => {
                        priced = false;
                        break;
                    }
                }
            }
            if priced {
                return Ok(max_quote);
            }
            if attempt < self.settings.wallet_value_attempts {
                tokio::time::sleep(self.settings.wallet_value_delay).await;
            }
        }
        warn!(notional = max_quote, "Could not price every holding, using partial wallet value");
        Ok(max_quote)
    }

    // -- Bridge -------------------------------------------------------------

    /// Deploy idle bridge balance into the first coin that holding bridge is
    /// not disadvantaged against. Returns the coin bought.
    pub async fn bridge_scout(&self) -> Result<Option<String>> {
        let bridge = self.settings.bridge.as_str();
        let bridge_balance = self.manager.get_balance(bridge, false).await?;

        let mut min_notionals = Vec::with_capacity(self.registry.len());
        for coin in self.registry.ids() {
            min_notionals.push(self.market.min_notional(&self.pair(coin)).await);
        }
        if min_notionals.iter().all(|mn| bridge_balance <= *mn) {
            return Ok(None);
        }

        for coin in self.registry.ids() {
            let pair = self.pair(coin);
            let Some(price) = self.market.ticker_price(&pair).await else {
                continue;
            };

            let mut ratios = self.ratios.lock().await;
            let candidates = self.get_ratios(&ratios, coin, price, bridge_balance, true).await?;
            if candidates.iter().any(|c| scoring::is_profitable(c.score)) {
                continue;
            }
            if bridge_balance <= min_notionals[coin.0] {
                continue;
            }

            let symbol = self.registry.symbol(coin);
            info!(coin = symbol, "Will be purchasing using bridge coin");
            if self.manager.buy(symbol, bridge, price).await.is_some() {
                self.audit.set_current_coin(symbol);
                self.commit(&mut ratios);
                return Ok(Some(symbol.to_string()));
            }
        }
        Ok(None)
    }

    // -- Valuation ----------------------------------------------------------

    /// Record balance and prices of every held coin, enabled or tracked.
    /// Returns the number of coins valued.
    pub async fn update_values(&self) -> Result<usize> {
        let now = Utc::now();
        let symbols = self
            .registry
            .all()
            .iter()
            .map(|c| c.symbol.as_str())
            .chain(self.tracked.iter().map(String::as_str));

        let mut values = Vec::new();
        for symbol in symbols {
            let balance = self.manager.get_balance(symbol, false).await?;
            if balance == 0.0 {
                continue;
            }
            let bridge_price = self
                .market
                .ticker_price(&format!("{symbol}{}", self.settings.bridge))
                .await;
            let btc_price = self.market.ticker_price(&format!("{symbol}BTC")).await;
            values.push(CoinValue {
                symbol: symbol.to_string(),
                balance,
                bridge_price,
                btc_price,
                timestamp: now,
            });
        }
        self.audit.log_coin_values(&values);
        debug!(coins = values.len(), "Coin values recorded");
        Ok(values.len())
    }
}

/// Highest positive score; the first one wins ties.
fn best_candidate(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates
        .iter()
        .filter(|c| scoring::is_profitable(c.score))
        .fold(None, |best: Option<&Candidate>, c| match best {
            Some(b) if b.score >= c.score => Some(b),
            _ => Some(c),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(to: usize, score: f64) -> Candidate {
        Candidate {
            to: CoinId(to),
            score,
            buy_price: 1.0,
            amount: 1.0,
        }
    }

    #[test]
    fn test_best_candidate_picks_highest_score() {
        let candidates = vec![candidate(1, 0.01), candidate(2, 0.05), candidate(3, 0.02)];
        assert_eq!(best_candidate(&candidates).map(|c| c.to), Some(CoinId(2)));
    }

    #[test]
    fn test_best_candidate_first_wins_ties() {
        let candidates = vec![candidate(1, 0.03), candidate(2, 0.03)];
        assert_eq!(best_candidate(&candidates).map(|c| c.to), Some(CoinId(1)));
    }

    #[test]
    fn test_best_candidate_ignores_non_positive_scores() {
        let candidates = vec![candidate(1, 0.0), candidate(2, -0.5), candidate(3, f64::NAN)];
        assert!(best_candidate(&candidates).is_none());
        assert!(best_candidate(&[]).is_none());
    }

    #[test]
    fn test_default_settings() {
        let settings = ScoutSettings::new("USDT", ScoreMode::default());
        assert_eq!(settings.bridge, "USDT");
        assert_eq!(settings.init_attempts, 10);
        assert_eq!(settings.init_buy_backoff, Duration::from_secs(10));
        assert_eq!(settings.threshold_retry_delay, Duration::from_secs(1));
    }
}
