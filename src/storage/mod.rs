//! Persistence layer.
//!
//! JSON state files (paper wallet, pair baselines) plus the audit sink in
//! `audit`. State files are rewritten whole on every save.

pub mod audit;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::engine::ratios::{PairBaseline, RatioMatrix};
use crate::engine::registry::CoinRegistry;

/// Paper wallet file inside the data directory.
pub const WALLET_FILE: &str = "paper_wallet.json";

/// Pair baseline file inside the data directory.
pub const BASELINE_FILE: &str = "baselines.json";

/// Serialise `value` to `path`, creating parent directories.
pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value).context("Failed to serialise state")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write state to {}", path.display()))?;
    debug!(path = %path.display(), "State saved");
    Ok(())
}

/// Load JSON state. Returns None if the file doesn't exist (fresh start).
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        info!(path = %path.display(), "No saved state found, starting fresh");
        return Ok(None);
    }
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state from {}", path.display()))?;
    let value = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse state from {}", path.display()))?;
    Ok(Some(value))
}

// ---------------------------------------------------------------------------
// Paper wallet
// ---------------------------------------------------------------------------

/// Balances of the simulated account plus the synthetic order counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperWallet {
    pub balances: HashMap<String, f64>,
    pub fake_order_id: u64,
}

impl PaperWallet {
    /// Fresh wallet holding only `amount` of the bridge currency.
    pub fn seeded(bridge: &str, amount: f64) -> Self {
        Self {
            balances: HashMap::from([(bridge.to_string(), amount)]),
            fake_order_id: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Pair baselines
// ---------------------------------------------------------------------------

/// JSON store of pair baselines. Assigns a persistent id to every pair the
/// first time it is seen.
#[derive(Debug, Clone)]
pub struct BaselineStore {
    path: PathBuf,
}

impl BaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build the ratio matrix for `registry` from the stored baselines.
    /// Pairs not stored yet get fresh ids above the highest stored one.
    pub fn load_matrix(&self, registry: &CoinRegistry) -> Result<RatioMatrix> {
        let stored: Vec<PairBaseline> = load_json(&self.path)?.unwrap_or_default();
        let mut matrix = RatioMatrix::from_baselines(registry, &stored);

        let mut next_id = stored.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        let mut assigned = 0;
        for from in registry.ids() {
            for to in registry.ids() {
                if from != to && matrix.pair_id(from, to) == 0 {
                    matrix.set_pair_id(from, to, next_id);
                    next_id += 1;
                    assigned += 1;
                }
            }
        }

        info!(
            coins = registry.len(),
            stored = stored.len(),
            new_pairs = assigned,
            missing = matrix.missing_pairs().len(),
            "Pair baselines loaded"
        );
        Ok(matrix)
    }

    /// Persist the committed baselines of `matrix`. Only the pairs of
    /// `registry` are overwritten; stored pairs of coins outside it are kept.
    pub fn save_matrix(&self, matrix: &RatioMatrix, registry: &CoinRegistry) -> Result<()> {
        let stored: Vec<PairBaseline> = load_json(&self.path)?.unwrap_or_default();
        let mut merged: Vec<PairBaseline> = stored
            .into_iter()
            .filter(|p| registry.by_symbol(&p.from).is_none() || registry.by_symbol(&p.to).is_none())
            .collect();
        let kept = merged.len();
        merged.extend(matrix.baselines(registry));
        merged.sort_by_key(|p| p.id);
        debug!(pairs = merged.len(), kept, "Saving pair baselines");
        save_json(&merged, &self.path)
    }

    /// Every coin symbol that appears in a stored pair, sorted.
    pub fn known_symbols(&self) -> Result<Vec<String>> {
        let stored: Vec<PairBaseline> = load_json(&self.path)?.unwrap_or_default();
        let symbols: BTreeSet<String> = stored
            .into_iter()
            .flat_map(|p| [p.from, p.to])
            .collect();
        Ok(symbols.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
