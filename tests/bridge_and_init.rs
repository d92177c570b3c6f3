//! Bridge deployment, cold-start thresholds and portfolio valuation.

mod common;

use common::{approx, baseline, harness, harness_with_matrix, ScriptedMarket, BRIDGE};

use coinhop::engine::ratios::RatioMatrix;
use coinhop::engine::registry::{CoinId, CoinRegistry};

const ADA: CoinId = CoinId(0);
const BTC: CoinId = CoinId(1);
const ETH: CoinId = CoinId(2);

#[tokio::test]
async fn test_idle_bridge_buys_first_coin_without_better_jump() {
    let market = ScriptedMarket::new();
    market.set_price("ADA", 1.0, 1.0);
    market.set_price("BTC", 1.0, 1.0);
    let h = harness(
        &["ADA", "BTC"],
        &[(BRIDGE, 100.0)],
        &[baseline("ADA", "BTC", 1.0), baseline("BTC", "ADA", 1.0)],
        market,
    );

    let bought = h.engine.bridge_scout().await.unwrap();

    assert_eq!(bought.as_deref(), Some("ADA"));
    assert_eq!(h.audit.current_coins(), vec!["ADA".to_string()]);
    assert!(approx(h.balance("ADA"), 99.9));
    assert!(h.balance(BRIDGE) < 1e-6);
}

#[tokio::test]
async fn test_idle_bridge_skips_coin_with_profitable_jump() {
    let market = ScriptedMarket::new();
    market.set_price("ADA", 1.0, 1.0);
    market.set_price("BTC", 1.0, 1.0);
    // holding ADA would immediately want BTC
    let h = harness(
        &["ADA", "BTC"],
        &[(BRIDGE, 100.0)],
        &[baseline("ADA", "BTC", 0.5), baseline("BTC", "ADA", 1.0)],
        market,
    );

    let bought = h.engine.bridge_scout().await.unwrap();

    assert_eq!(bought.as_deref(), Some("BTC"));
    assert!(h.balance("ADA").abs() < 1e-9);
}

#[tokio::test]
async fn test_bridge_below_min_notional_is_left_alone() {
    let market = ScriptedMarket::new();
    market.set_price("ADA", 1.0, 1.0);
    market.set_price("BTC", 1.0, 1.0);
    let h = harness(
        &["ADA", "BTC"],
        &[(BRIDGE, 0.5)],
        &[baseline("ADA", "BTC", 1.0), baseline("BTC", "ADA", 1.0)],
        market,
    );

    assert_eq!(h.engine.bridge_scout().await.unwrap(), None);
    assert!(h.audit.trades().is_empty());
    assert!(h.audit.scout_batches().is_empty());
}

#[tokio::test]
async fn test_cold_start_derives_missing_baselines() {
    let market = ScriptedMarket::new();
    market.set_price("ADA", 2.0, 2.0);
    market.set_price("BTC", 4.0, 4.0);
    let coins = ["ADA", "BTC"];
    let registry = CoinRegistry::new(coins);
    let h = harness_with_matrix(&coins, &[(BRIDGE, 100.0)], registry, RatioMatrix::new(2), market);

    h.engine.initialize_trade_thresholds().await.unwrap();

    let ratios = h.engine.ratios_snapshot().await;
    assert!(ratios.missing_pairs().is_empty());
    assert!(approx(ratios.get(ADA, BTC), 0.5));
    assert!(approx(ratios.get(BTC, ADA), 2.0));
}

#[tokio::test(start_paused = true)]
async fn test_cold_start_skips_unpriced_coin() {
    let market = ScriptedMarket::new();
    market.set_price("ADA", 2.0, 2.0);
    market.set_price("BTC", 4.0, 4.0);
    let coins = ["ADA", "BTC", "ETH"];
    let registry = CoinRegistry::new(coins);
    let h = harness_with_matrix(&coins, &[(BRIDGE, 100.0)], registry, RatioMatrix::new(3), market);

    h.engine.initialize_trade_thresholds().await.unwrap();

    let ratios = h.engine.ratios_snapshot().await;
    assert!(approx(ratios.get(ADA, BTC), 0.5));
    assert_eq!(
        ratios.missing_pairs(),
        vec![(ADA, ETH), (BTC, ETH), (ETH, ADA), (ETH, BTC)]
    );
}

#[tokio::test]
async fn test_cold_start_uses_largest_holding_as_notional() {
    let market = ScriptedMarket::new();
    market.set_price("ADA", 2.0, 2.0);
    market.set_price("BTC", 4.0, 4.0);
    let h = harness(&["ADA", "BTC"], &[(BRIDGE, 5.0), ("BTC", 10.0)], &[], market);

    assert!(approx(h.engine.max_value_in_wallet().await.unwrap(), 40.0));
}

#[tokio::test]
async fn test_valuation_records_held_coins_only() {
    let market = ScriptedMarket::new();
    market.set_price("ADA", 1.5, 1.5);
    market.set_price("BTC", 4.0, 4.0);
    let h = harness(
        &["ADA", "BTC"],
        &[("ADA", 10.0), (BRIDGE, 5.0)],
        &[baseline("ADA", "BTC", 1.0), baseline("BTC", "ADA", 1.0)],
        market,
    );

    assert_eq!(h.engine.update_values().await.unwrap(), 1);

    let values = h.audit.coin_values();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].symbol, "ADA");
    assert_eq!(values[0].bridge_price, Some(1.5));
    assert_eq!(values[0].btc_price, None);
    assert_eq!(values[0].bridge_value(), Some(15.0));
}

#[tokio::test]
async fn test_valuation_includes_held_disabled_coins() {
    let market = ScriptedMarket::new();
    market.set_price("ADA", 1.5, 1.5);
    market.set_price("BTC", 4.0, 4.0);
    market.set_price("XRP", 0.5, 0.5);
    let h = harness(
        &["ADA", "BTC"],
        &[("ADA", 10.0), ("XRP", 20.0), (BRIDGE, 5.0)],
        &[baseline("ADA", "BTC", 1.0), baseline("BTC", "ADA", 1.0)],
        market,
    )
    .with_tracked(&["XRP", "DOT", "ADA", BRIDGE]);

    assert_eq!(h.engine.update_values().await.unwrap(), 2);

    let values = h.audit.coin_values();
    let symbols: Vec<&str> = values.iter().map(|v| v.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["ADA", "XRP"]);
    assert_eq!(values[1].bridge_price, Some(0.5));
    assert_eq!(values[1].bridge_value(), Some(10.0));
}
