//! Audit sink.
//!
//! Receives scout-log batches, trade record transitions, current-coin
//! changes and portfolio valuations. Writes are fire-and-forget: a failing
//! sink logs the error and never interrupts trading.

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::types::{CoinValue, ScoutLogEntry, TradeRecord};

pub trait AuditSink: Send + Sync {
    /// All candidates evaluated by one scout pass.
    fn log_scouts(&self, entries: &[ScoutLogEntry]);

    /// A snapshot of a trade after a state transition.
    fn record_trade(&self, record: &TradeRecord);

    fn set_current_coin(&self, symbol: &str);

    fn log_coin_values(&self, values: &[CoinValue]);
}

// ---------------------------------------------------------------------------
// JSONL files
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CurrentCoinLine<'a> {
    symbol: &'a str,
    timestamp: DateTime<Utc>,
}

/// Appends one JSON object per line to a file per record kind inside `dir`.
pub struct JsonlAuditSink {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub const SCOUT_FILE: &'static str = "scout_history.jsonl";
    pub const TRADE_FILE: &'static str = "trade_history.jsonl";
    pub const CURRENT_COIN_FILE: &'static str = "current_coin_history.jsonl";
    pub const COIN_VALUE_FILE: &'static str = "coin_value.jsonl";

    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append<T: Serialize>(&self, file: &str, rows: &[T]) {
        if rows.is_empty() {
            return;
        }
        if let Err(e) = self.try_append(file, rows) {
            warn!(file, error = %e, "Audit write failed");
        }
    }

    fn try_append<T: Serialize>(&self, file: &str, rows: &[T]) -> anyhow::Result<()> {
        let mut buf = String::new();
        for row in rows {
            buf.push_str(&serde_json::to_string(row)?);
            buf.push('\n');
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("audit lock poisoned"))?;
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))?;
        out.write_all(buf.as_bytes())?;
        debug!(file, rows = rows.len(), "Audit rows appended");
        Ok(())
    }

    // -- Retention ----------------------------------------------------------

    /// Drop scout rows older than `keep`. Returns the number removed.
    pub fn prune_scout_history(&self, keep: Duration, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let cutoff = now - keep;
        let removed = self.retain::<ScoutLogEntry>(Self::SCOUT_FILE, |rows| {
            rows.into_iter().filter(|r| r.timestamp >= cutoff).collect()
        })?;
        if removed > 0 {
            info!(removed, "Scout history pruned");
        }
        Ok(removed)
    }

    /// Thin the valuation history: every point of the last day, the latest
    /// point per coin and hour up to a month, the latest per coin and day
    /// up to a year. Older points are dropped. Returns the number removed.
    pub fn prune_value_history(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let removed = self.retain::<CoinValue>(Self::COIN_VALUE_FILE, |rows| thin_values(rows, now))?;
        if removed > 0 {
            info!(removed, "Coin value history pruned");
        }
        Ok(removed)
    }

    /// Rewrite `file` with the rows `keep` returns. Unreadable lines are
    /// dropped.
    fn retain<T>(&self, file: &str, keep: impl FnOnce(Vec<T>) -> Vec<T>) -> anyhow::Result<usize>
    where
        T: Serialize + DeserializeOwned,
    {
        let path = self.dir.join(file);
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("audit lock poisoned"))?;
        if !path.exists() {
            return Ok(0);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let total = contents.lines().filter(|l| !l.trim().is_empty()).count();
        let rows: Vec<T> = contents
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        let kept = keep(rows);
        if kept.len() == total {
            return Ok(0);
        }

        let mut buf = String::new();
        for row in &kept {
            buf.push_str(&serde_json::to_string(row)?);
            buf.push('\n');
        }
        let tmp = path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, buf).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(total - kept.len())
    }
}

fn thin_values(rows: Vec<CoinValue>, now: DateTime<Utc>) -> Vec<CoinValue> {
    let day = now - Duration::days(1);
    let month = now - Duration::days(30);
    let year = now - Duration::days(365);

    let bucket = |v: &CoinValue| -> Option<String> {
        if v.timestamp >= day {
            None
        } else if v.timestamp >= month {
            Some(v.timestamp.format("h%Y-%m-%dT%H").to_string())
        } else {
            Some(v.timestamp.format("d%Y-%m-%d").to_string())
        }
    };

    // index of the latest row per coin and bucket
    let mut latest: HashMap<(String, String), usize> = HashMap::new();
    for (idx, v) in rows.iter().enumerate() {
        if v.timestamp < year {
            continue;
        }
        if let Some(b) = bucket(v) {
            let slot = latest.entry((v.symbol.clone(), b)).or_insert(idx);
            if rows[*slot].timestamp <= v.timestamp {
                *slot = idx;
            }
        }
    }

    rows.iter()
        .enumerate()
        .filter(|(idx, v)| {
            v.timestamp >= day
                || (v.timestamp >= year
                    && bucket(*v).is_some_and(|b| latest.get(&(v.symbol.clone(), b)) == Some(idx)))
        })
        .map(|(_, v)| v.clone())
        .collect()
}

impl AuditSink for JsonlAuditSink {
    fn log_scouts(&self, entries: &[ScoutLogEntry]) {
        self.append(Self::SCOUT_FILE, entries);
    }

    fn record_trade(&self, record: &TradeRecord) {
        self.append(Self::TRADE_FILE, std::slice::from_ref(record));
    }

    fn set_current_coin(&self, symbol: &str) {
        let line = CurrentCoinLine {
            symbol,
            timestamp: Utc::now(),
        };
        self.append(Self::CURRENT_COIN_FILE, &[line]);
    }

    fn log_coin_values(&self, values: &[CoinValue]) {
        self.append(Self::COIN_VALUE_FILE, values);
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Keeps everything in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    scouts: Mutex<Vec<Vec<ScoutLogEntry>>>,
    trades: Mutex<Vec<TradeRecord>>,
    current_coins: Mutex<Vec<String>>,
    coin_values: Mutex<Vec<CoinValue>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scout batches in arrival order.
    pub fn scout_batches(&self) -> Vec<Vec<ScoutLogEntry>> {
        self.scouts.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Trade record snapshots in arrival order.
    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn current_coins(&self) -> Vec<String> {
        self.current_coins.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn coin_values(&self) -> Vec<CoinValue> {
        self.coin_values.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn log_scouts(&self, entries: &[ScoutLogEntry]) {
        if entries.is_empty() {
            return;
        }
        if let Ok(mut scouts) = self.scouts.lock() {
            scouts.push(entries.to_vec());
        }
    }

    fn record_trade(&self, record: &TradeRecord) {
        if let Ok(mut trades) = self.trades.lock() {
            trades.push(record.clone());
        }
    }

    fn set_current_coin(&self, symbol: &str) {
        if let Ok(mut coins) = self.current_coins.lock() {
            coins.push(symbol.to_string());
        }
    }

    fn log_coin_values(&self, values: &[CoinValue]) {
        if let Ok(mut all) = self.coin_values.lock() {
            all.extend_from_slice(values);
        }
    }
}
