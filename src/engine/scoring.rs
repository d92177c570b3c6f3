//! Jump scoring.
//!
//! Compares the exchange ratio achievable right now against the remembered
//! baseline, net of the round-trip fee.

/// How the safety buffer on top of fees is expressed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreMode {
    /// Require the net ratio to beat the baseline by `margin` percent.
    Margin { margin: f64 },
    /// Inflate the fee by `multiplier` and require the ratio to beat the
    /// baseline in absolute terms.
    Multiplier { multiplier: f64 },
}

impl Default for ScoreMode {
    fn default() -> Self {
        ScoreMode::Margin { margin: 0.8 }
    }
}

/// Combined fee of selling one asset and buying another.
pub fn round_trip_fee(from_fee: f64, to_fee: f64) -> f64 {
    from_fee + to_fee - from_fee * to_fee
}

/// Score of jumping from a coin sold at `sell_price` into a coin bought at
/// `buy_price`, against `baseline`. Positive means profitable.
pub fn score(mode: ScoreMode, sell_price: f64, buy_price: f64, baseline: f64, fee: f64) -> f64 {
    let ratio = sell_price / buy_price;
    match mode {
        ScoreMode::Margin { margin } => (1.0 - fee) * ratio / baseline - 1.0 - margin / 100.0,
        ScoreMode::Multiplier { multiplier } => ratio - fee * multiplier * ratio - baseline,
    }
}

pub fn is_profitable(score: f64) -> bool {
    score > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_fee() {
        let f = round_trip_fee(0.001, 0.001);
        assert!((f - 0.001999).abs() < 1e-12);
        assert_eq!(round_trip_fee(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_margin_mode_value() {
        // ratio 1.1, no fee, baseline 1.0, no margin
        let s = score(ScoreMode::Margin { margin: 0.0 }, 1.1, 1.0, 1.0, 0.0);
        assert!((s - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_multiplier_mode_value() {
        let s = score(ScoreMode::Multiplier { multiplier: 5.0 }, 2.0, 1.0, 1.5, 0.01);
        // 2.0 - 0.01*5*2.0 - 1.5 = 0.4
        assert!((s - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_margin_sign_matches_inequality() {
        let sells = [0.5, 1.0, 1.07, 2.0, 13.3];
        let buys = [0.4, 1.0, 1.9, 7.0];
        let baselines = [0.05, 0.5, 1.0, 1.08, 3.0];
        let fees = [0.0, 0.00075, 0.002, 0.01];
        let margins = [0.0, 0.5, 0.8, 2.0];

        for &ps in &sells {
            for &pb in &buys {
                for &r in &baselines {
                    for &f in &fees {
                        for &m in &margins {
                            let s = score(ScoreMode::Margin { margin: m }, ps, pb, r, f);
                            let lhs = (1.0 - f) * (ps / pb);
                            let rhs = r * (1.0 + m / 100.0);
                            if (lhs - rhs).abs() > 1e-9 {
                                assert_eq!(
                                    is_profitable(s),
                                    lhs > rhs,
                                    "ps={ps} pb={pb} r={r} f={f} m={m}"
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_missing_baseline_never_profitable() {
        let s = score(ScoreMode::default(), 10.0, 1.0, f64::NAN, 0.0);
        assert!(!is_profitable(s));
    }
}
