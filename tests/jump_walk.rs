//! End-to-end jump walks over the paper wallet.

mod common;

use common::{approx, baseline, harness, ScriptedMarket, BRIDGE};

use coinhop::engine::registry::CoinId;
use coinhop::engine::scout::JumpOutcome;
use coinhop::storage::BaselineStore;

const ADA: CoinId = CoinId(0);
const BTC: CoinId = CoinId(1);

#[tokio::test]
async fn test_profitable_ratio_jumps_once() {
    let market = ScriptedMarket::new();
    market.set_price("ADA", 1.10, 1.10);
    market.set_price("BTC", 1.0, 1.0);
    let h = harness(
        &["ADA", "BTC"],
        &[("ADA", 10.0)],
        &[baseline("ADA", "BTC", 1.0), baseline("BTC", "ADA", 1.0)],
        market,
    );

    h.engine.scout().await.unwrap();

    // one sell into the bridge plus one buy
    assert_eq!(h.completed_trades(), 2);
    assert_eq!(h.audit.current_coins(), vec!["BTC".to_string()]);
    assert!(h.balance("ADA").abs() < 1e-9);
    assert!(h.balance("BTC") > 10.9);
    assert!(h.balance(BRIDGE) < 0.01);

    // new thresholds are committed from the fill
    let ratios = h.engine.ratios_snapshot().await;
    assert_eq!(ratios.staged_len(), 0);
    assert!(approx(ratios.get(ADA, BTC), 1.1));
    assert!(approx(ratios.get(BTC, ADA), 1.0));
}

#[tokio::test]
async fn test_unprofitable_ratio_stays() {
    let market = ScriptedMarket::new();
    market.set_price("ADA", 1.0, 1.0);
    market.set_price("BTC", 1.0, 1.0);
    let h = harness(
        &["ADA", "BTC"],
        &[("ADA", 10.0)],
        &[baseline("ADA", "BTC", 1.0), baseline("BTC", "ADA", 1.0)],
        market,
    );

    let outcome = h.engine.jump_to_best_coin(ADA, 1.0, 10.0, 10.0).await.unwrap();

    assert_eq!(outcome, JumpOutcome::Stayed);
    assert!(h.audit.trades().is_empty());
    assert!(approx(h.balance("ADA"), 10.0));
    // every candidate was logged as one batch
    let batches = h.audit.scout_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
}

#[tokio::test]
async fn test_thin_book_on_second_hop_rolls_back_everything() {
    let market = ScriptedMarket::new();
    market.set_price("ADA", 1.10, 1.10);
    market.set_price("BTC", 1.0, 1.0);
    market.set_price("ETH", 0.5, 0.5);
    market.thin_fill_quote("ETH");
    let h = harness(
        &["ADA", "BTC", "ETH"],
        &[("ADA", 10.0)],
        &[
            baseline("ADA", "BTC", 1.0),
            baseline("ADA", "ETH", 5.0),
            baseline("BTC", "ADA", 1.0),
            baseline("BTC", "ETH", 1.0),
            baseline("ETH", "ADA", 1.0),
            baseline("ETH", "BTC", 1.0),
        ],
        market,
    );
    let registry = h.engine.registry().clone();
    let before = h.engine.ratios_snapshot().await.baselines(&registry);

    // ADA -> BTC scores, then BTC -> ETH scores, but the BTC threshold
    // update cannot price ETH
    let outcome = h.engine.jump_to_best_coin(ADA, 1.10, 11.0, 10.0).await.unwrap();

    assert_eq!(outcome, JumpOutcome::Aborted);
    assert!(h.audit.trades().is_empty());
    assert!(approx(h.balance("ADA"), 10.0));

    let after = h.engine.ratios_snapshot().await;
    assert_eq!(after.staged_len(), 0);
    assert_eq!(after.baselines(&registry), before);
    assert!(approx(after.get(ADA, BTC), 1.0));
}

#[tokio::test]
async fn test_chain_jumps_straight_to_final_destination() {
    let market = ScriptedMarket::new();
    market.set_price("ADA", 1.10, 1.10);
    market.set_price("BTC", 1.0, 1.0);
    market.set_price("ETH", 0.5, 0.5);
    let h = harness(
        &["ADA", "BTC", "ETH"],
        &[("ADA", 10.0)],
        &[
            baseline("ADA", "BTC", 1.0),
            baseline("ADA", "ETH", 5.0),
            baseline("BTC", "ADA", 1.0),
            baseline("BTC", "ETH", 1.0),
            baseline("ETH", "ADA", 3.0),
            baseline("ETH", "BTC", 3.0),
        ],
        market,
    );

    let outcome = h.engine.jump_to_best_coin(ADA, 1.10, 11.0, 10.0).await.unwrap();

    match outcome {
        JumpOutcome::Jumped { to, order } => {
            assert_eq!(to, "ETH");
            assert!(order.is_some());
        }
        other => panic!("expected a jump, got {other:?}"),
    }
    // BTC is only a hypothetical hop: one sell and one buy
    assert_eq!(h.completed_trades(), 2);
    assert!(h.balance("BTC").abs() < 1e-9);
    assert!(h.balance("ETH") > 21.0);
    assert_eq!(h.engine.ratios_snapshot().await.staged_len(), 0);

    // only the initiating ADA pass is logged, BTC's hop is not
    let batches = h.audit.scout_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    assert!(batches[0].iter().all(|e| approx(e.current_coin_price, 1.10)));
    let mut others: Vec<f64> = batches[0].iter().map(|e| e.other_coin_price).collect();
    others.sort_by(|a, b| a.total_cmp(b));
    assert!(approx(others[0], 0.5) && approx(others[1], 1.0));
    let mut targets: Vec<f64> = batches[0].iter().map(|e| e.target_ratio).collect();
    targets.sort_by(|a, b| a.total_cmp(b));
    assert!(approx(targets[0], 1.0) && approx(targets[1], 5.0));
}

#[tokio::test]
async fn test_loop_back_to_start_keeps_fresh_prices_without_trading() {
    let path = std::env::temp_dir().join(format!("coinhop_test_baselines_{}.json", uuid::Uuid::new_v4()));
    let market = ScriptedMarket::new();
    market.set_price("ADA", 1.0, 1.0);
    market.set_price("BTC", 1.0, 1.0);
    let h = harness(
        &["ADA", "BTC"],
        &[("ADA", 10.0)],
        &[baseline("ADA", "BTC", 0.5), baseline("BTC", "ADA", 0.5)],
        market,
    )
    .with_store(BaselineStore::new(&path));

    let outcome = h.engine.jump_to_best_coin(ADA, 1.0, 10.0, 10.0).await.unwrap();

    assert_eq!(outcome, JumpOutcome::LoopEliminated);
    assert!(h.audit.trades().is_empty());
    let ratios = h.engine.ratios_snapshot().await;
    assert_eq!(ratios.staged_len(), 0);
    assert!(approx(ratios.get(ADA, BTC), 1.0));
    assert!(approx(ratios.get(BTC, ADA), 1.0));

    let stored = BaselineStore::new(&path).load_matrix(h.engine.registry()).unwrap();
    assert!(approx(stored.get(ADA, BTC), 1.0));
    assert!(approx(stored.get(BTC, ADA), 1.0));

    std::fs::remove_file(&path).unwrap();
}

#[tokio::test]
async fn test_failed_loop_update_is_rolled_back() {
    const AAA: CoinId = CoinId(0);
    const BBB: CoinId = CoinId(1);
    const CCC: CoinId = CoinId(2);

    let market = ScriptedMarket::new();
    market.set_price("AAA", 1.0, 1.0);
    market.set_price("BBB", 1.0, 1.0);
    market.set_price("CCC", 1.0, 1.0);
    market.thin_fill_quote("BBB");
    let h = harness(
        &["AAA", "BBB", "CCC"],
        &[("CCC", 10.0)],
        &[
            baseline("AAA", "BBB", 1.0),
            baseline("AAA", "CCC", 3.0),
            baseline("BBB", "AAA", 3.0),
            baseline("BBB", "CCC", 0.5),
            baseline("CCC", "AAA", 3.0),
            baseline("CCC", "BBB", 0.5),
        ],
        market,
    );

    // CCC -> BBB -> CCC; the anchored CCC update prices AAA then fails on BBB
    let outcome = h.engine.jump_to_best_coin(CCC, 1.0, 10.0, 10.0).await.unwrap();

    assert_eq!(outcome, JumpOutcome::LoopEliminated);
    assert!(h.audit.trades().is_empty());
    assert!(approx(h.balance("CCC"), 10.0));

    let ratios = h.engine.ratios_snapshot().await;
    assert_eq!(ratios.staged_len(), 0);
    assert!(approx(ratios.get(AAA, CCC), 3.0));
    // the BBB hop update was committed before the loop update
    assert!(approx(ratios.get(AAA, BBB), 1.0));
    assert!(approx(ratios.get(BBB, CCC), 1.0));
}
