//! Transactional ratio matrix.
//!
//! Stores the baseline exchange ratio for every ordered pair of enabled
//! coins in a flat `n * n` array. Writes are staged: the first write to a
//! cell during a walk records the cell's committed value in a changelog,
//! `rollback` replays the changelog and `commit` simply forgets it.
//! Readers within the walk observe staged values; `committed` exposes the
//! pre-walk view.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::registry::{CoinId, CoinRegistry};

/// Persisted baseline of one directed pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairBaseline {
    pub id: u64,
    pub from: String,
    pub to: String,
    /// `None` until the pair has been initialised.
    pub ratio: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RatioMatrix {
    n: usize,
    data: Vec<f64>,
    ids: Vec<u64>,
    /// Cell -> committed value before the first staged write.
    changelog: HashMap<(usize, usize), f64>,
}

impl RatioMatrix {
    /// Empty matrix: diagonal 1.0, every other cell without a baseline.
    pub fn new(n: usize) -> Self {
        let data = (0..n * n)
            .map(|k| if k / n.max(1) == k % n.max(1) { 1.0 } else { f64::NAN })
            .collect();
        Self {
            n,
            data,
            ids: vec![0; n * n],
            changelog: HashMap::new(),
        }
    }

    /// Build from persisted baselines. Pairs naming coins outside the
    /// registry are ignored.
    pub fn from_baselines<'a, I>(registry: &CoinRegistry, baselines: I) -> Self
    where
        I: IntoIterator<Item = &'a PairBaseline>,
    {
        let mut matrix = Self::new(registry.len());
        for pair in baselines {
            let (Some(from), Some(to)) = (registry.by_symbol(&pair.from), registry.by_symbol(&pair.to))
            else {
                continue;
            };
            if from == to {
                continue;
            }
            let idx = matrix.cell(from, to);
            matrix.data[idx] = pair.ratio.unwrap_or(f64::NAN);
            matrix.ids[idx] = pair.id;
        }
        matrix
    }

    pub fn size(&self) -> usize {
        self.n
    }

    fn cell(&self, from: CoinId, to: CoinId) -> usize {
        self.n * from.0 + to.0
    }

    /// Current baseline, including values staged by the walk in progress.
    pub fn get(&self, from: CoinId, to: CoinId) -> f64 {
        debug_assert_ne!(from, to, "ratio of a coin against itself");
        self.data[self.cell(from, to)]
    }

    /// Baseline as of the last commit, ignoring staged values.
    pub fn committed(&self, from: CoinId, to: CoinId) -> f64 {
        self.changelog
            .get(&(from.0, to.0))
            .copied()
            .unwrap_or_else(|| self.data[self.cell(from, to)])
    }

    /// All ratios from `from`, indexed by destination.
    pub fn row(&self, from: CoinId) -> &[f64] {
        &self.data[self.n * from.0..self.n * (from.0 + 1)]
    }

    /// Stage a new baseline.
    pub fn set(&mut self, from: CoinId, to: CoinId, ratio: f64) {
        let idx = self.cell(from, to);
        self.changelog.entry((from.0, to.0)).or_insert(self.data[idx]);
        self.data[idx] = ratio;
    }

    /// Number of cells staged since the last commit/rollback.
    pub fn staged_len(&self) -> usize {
        self.changelog.len()
    }

    /// Make every staged value the new baseline. Returns the committed
    /// cells in index order.
    pub fn commit(&mut self) -> Vec<(CoinId, CoinId)> {
        let mut cells: Vec<(CoinId, CoinId)> = self
            .changelog
            .drain()
            .map(|((i, j), _)| (CoinId(i), CoinId(j)))
            .collect();
        cells.sort();
        cells
    }

    /// Discard every staged value.
    pub fn rollback(&mut self) {
        for ((i, j), old) in self.changelog.drain() {
            self.data[self.n * i + j] = old;
        }
    }

    pub fn pair_id(&self, from: CoinId, to: CoinId) -> u64 {
        self.ids[self.cell(from, to)]
    }

    pub fn set_pair_id(&mut self, from: CoinId, to: CoinId, id: u64) {
        let idx = self.cell(from, to);
        self.ids[idx] = id;
    }

    /// Ordered pairs that have no committed baseline yet.
    pub fn missing_pairs(&self) -> Vec<(CoinId, CoinId)> {
        let mut out = Vec::new();
        for i in 0..self.n {
            for j in 0..self.n {
                if i != j && self.committed(CoinId(i), CoinId(j)).is_nan() {
                    out.push((CoinId(i), CoinId(j)));
                }
            }
        }
        out
    }

    /// Export committed baselines for persistence.
    pub fn baselines(&self, registry: &CoinRegistry) -> Vec<PairBaseline> {
        let mut out = Vec::with_capacity(self.n * self.n.saturating_sub(1));
        for from in registry.ids() {
            for to in registry.ids() {
                if from == to {
                    continue;
                }
                let ratio = self.committed(from, to);
                out.push(PairBaseline {
                    id: self.pair_id(from, to),
                    from: registry.symbol(from).to_string(),
                    to: registry.symbol(to).to_string(),
                    ratio: (!ratio.is_nan()).then_some(ratio),
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: CoinId = CoinId(0);
    const B: CoinId = CoinId(1);
    const C: CoinId = CoinId(2);

    fn seeded() -> RatioMatrix {
        let mut m = RatioMatrix::new(3);
        m.set(A, B, 2.0);
        m.set(B, A, 0.5);
        m.set(A, C, 4.0);
        m.commit();
        m
    }

    #[test]
    fn test_new_matrix_has_unit_diagonal() {
        let m = RatioMatrix::new(3);
        assert_eq!(m.row(B)[1], 1.0);
        assert!(m.get(A, B).is_nan());
        assert_eq!(m.missing_pairs().len(), 6);
    }

    #[test]
    fn test_set_then_rollback_restores() {
        let mut m = seeded();
        m.set(A, B, 3.0);
        m.set(A, B, 3.5);
        assert_eq!(m.get(A, B), 3.5);
        assert_eq!(m.committed(A, B), 2.0);
        m.rollback();
        assert_eq!(m.get(A, B), 2.0);
        assert_eq!(m.staged_len(), 0);
    }

    #[test]
    fn test_set_then_commit_is_visible() {
        let mut m = seeded();
        m.set(B, C, 7.0);
        let cells = m.commit();
        assert_eq!(cells, vec![(B, C)]);
        assert_eq!(m.get(B, C), 7.0);
        assert_eq!(m.committed(B, C), 7.0);
    }

    #[test]
    fn test_rollback_after_commit_is_noop() {
        let mut m = seeded();
        m.set(C, A, 0.25);
        m.commit();
        m.rollback();
        assert_eq!(m.get(C, A), 0.25);
    }

    #[test]
    fn test_commit_without_staging_is_noop() {
        let mut m = seeded();
        assert!(m.commit().is_empty());
        assert_eq!(m.get(A, B), 2.0);
    }

    #[test]
    fn test_rollback_discards_all_staged_cells() {
        let mut m = seeded();
        let before: Vec<f64> = (0..3).flat_map(|i| m.row(CoinId(i)).to_vec()).collect();
        m.set(A, B, 10.0);
        m.set(B, A, 11.0);
        m.set(C, B, 12.0);
        m.rollback();
        let after: Vec<f64> = (0..3).flat_map(|i| m.row(CoinId(i)).to_vec()).collect();
        assert_eq!(format!("{before:?}"), format!("{after:?}"));
    }

    #[test]
    fn test_from_baselines_and_export() {
        let reg = CoinRegistry::new(["ADA", "BTC"]);
        let stored = vec![
            PairBaseline { id: 7, from: "ADA".into(), to: "BTC".into(), ratio: Some(0.1) },
            PairBaseline { id: 8, from: "BTC".into(), to: "ADA".into(), ratio: None },
            PairBaseline { id: 9, from: "DOGE".into(), to: "ADA".into(), ratio: Some(1.0) },
        ];
        let m = RatioMatrix::from_baselines(&reg, &stored);
        assert_eq!(m.get(A, B), 0.1);
        assert_eq!(m.pair_id(A, B), 7);
        assert_eq!(m.missing_pairs(), vec![(B, A)]);

        let exported = m.baselines(&reg);
        assert_eq!(exported.len(), 2);
        assert!(exported.contains(&stored[0]));
        assert!(exported.contains(&stored[1]));
    }
}
