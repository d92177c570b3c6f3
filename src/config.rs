//! Configuration loading from TOML with environment variable overrides.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. A fixed
//! set of environment variables overrides individual settings after
//! loading. Secrets (API keys) are referenced by env-var name in the config
//! and resolved at runtime.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::scoring::ScoreMode;
use crate::storage;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub strategy: StrategyConfig,
    pub execution: ExecutionConfig,
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub name: String,
    /// Seconds between scout cycles.
    pub scout_sleep_time_secs: u64,
    /// Seconds between portfolio valuation snapshots.
    #[serde(default = "default_valuation_interval")]
    pub valuation_interval_secs: u64,
    /// Grace period for an in-flight cycle on shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    pub bridge: String,
    pub watchlist: Vec<String>,
    #[serde(default = "default_true")]
    pub use_margin: bool,
    #[serde(default = "default_scout_margin")]
    pub scout_margin: f64,
    #[serde(default = "default_scout_multiplier")]
    pub scout_multiplier: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    pub paper_trading: bool,
    /// Bridge balance of a freshly seeded paper wallet.
    #[serde(default = "default_paper_balance")]
    pub paper_balance: f64,
    #[serde(default = "default_discount_asset")]
    pub discount_asset: String,
    #[serde(default = "default_fee")]
    pub default_fee: f64,
    #[serde(default = "default_retry_attempts")]
    pub order_retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub order_retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    /// REST endpoint; the client default is used when absent.
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub api_secret_env: String,
    /// Seconds between order book snapshots.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Hours of scout history kept in the audit directory.
    #[serde(default = "default_scout_history_hours")]
    pub scout_history_hours: f64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            scout_history_hours: default_scout_history_hours(),
        }
    }
}

fn default_scout_history_hours() -> f64 {
    1.0
}

fn default_valuation_interval() -> u64 {
    60
}

fn default_shutdown_grace() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_scout_margin() -> f64 {
    0.8
}

fn default_scout_multiplier() -> f64 {
    5.0
}

fn default_paper_balance() -> f64 {
    1000.0
}

fn default_discount_asset() -> String {
    "BNB".to_string()
}

fn default_fee() -> f64 {
    0.001
}

fn default_retry_attempts() -> u32 {
    20
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    5
}

impl AppConfig {
    /// Load configuration from a TOML file and apply environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let mut config = Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its
    /// value (normally the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(bridge) = lookup("BRIDGE_SYMBOL") {
            self.strategy.bridge = bridge;
        }
        if let Some(v) = lookup("SCOUT_MARGIN") {
            self.strategy.scout_margin = parse_var("SCOUT_MARGIN", &v)?;
        }
        if let Some(v) = lookup("SCOUT_MULTIPLIER") {
            self.strategy.scout_multiplier = parse_var("SCOUT_MULTIPLIER", &v)?;
        }
        if let Some(v) = lookup("USE_MARGIN") {
            self.strategy.use_margin = parse_flag("USE_MARGIN", &v)?;
        }
        if let Some(v) = lookup("SCOUT_SLEEP_TIME") {
            self.engine.scout_sleep_time_secs = parse_var("SCOUT_SLEEP_TIME", &v)?;
        }
        if let Some(v) = lookup("WATCHLIST") {
            self.strategy.watchlist = v.split_whitespace().map(str::to_string).collect();
        }
        if let Some(v) = lookup("ENABLE_PAPER_TRADING") {
            self.execution.paper_trading = parse_flag("ENABLE_PAPER_TRADING", &v)?;
        }
        if let Some(v) = lookup("PAPER_BALANCE") {
            self.execution.paper_balance = parse_var("PAPER_BALANCE", &v)?;
        }
        if let Some(v) = lookup("HOURS_TO_KEEP_SCOUTING_HISTORY") {
            self.storage.scout_history_hours = parse_var("HOURS_TO_KEEP_SCOUTING_HISTORY", &v)?;
        }
        Ok(())
    }

    /// Normalise symbols and reject settings the engine cannot run with.
    pub fn validate(&mut self) -> Result<()> {
        self.strategy.bridge = self.strategy.bridge.trim().to_uppercase();
        if self.strategy.bridge.is_empty() {
            bail!("strategy.bridge must not be empty");
        }
        let bridge = self.strategy.bridge.clone();
        self.strategy.watchlist = self
            .strategy
            .watchlist
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty() && *s != bridge)
            .collect();
        if self.strategy.watchlist.len() < 2 {
            bail!("strategy.watchlist needs at least two coins besides the bridge");
        }
        if !self.strategy.scout_margin.is_finite() || !self.strategy.scout_multiplier.is_finite() {
            bail!("scout margin and multiplier must be finite");
        }
        if self.engine.scout_sleep_time_secs == 0 {
            bail!("engine.scout_sleep_time_secs must be positive");
        }
        if !(self.storage.scout_history_hours.is_finite() && self.storage.scout_history_hours > 0.0) {
            bail!("storage.scout_history_hours must be positive");
        }
        Ok(())
    }

    pub fn score_mode(&self) -> ScoreMode {
        if self.strategy.use_margin {
            ScoreMode::Margin {
                margin: self.strategy.scout_margin,
            }
        } else {
            ScoreMode::Multiplier {
                multiplier: self.strategy.scout_multiplier,
            }
        }
    }

    pub fn scout_interval(&self) -> Duration {
        Duration::from_secs(self.engine.scout_sleep_time_secs)
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.storage.data_dir.join(storage::WALLET_FILE)
    }

    pub fn baseline_path(&self) -> PathBuf {
        self.storage.data_dir.join(storage::BASELINE_FILE)
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.storage.data_dir.join("audit")
    }

    pub fn scout_history_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds((self.storage.scout_history_hours * 3600.0) as i64)
    }

    /// API key and secret from the environment. Paper trading only needs
    /// public endpoints, so missing credentials resolve to empty strings
    /// there.
    pub fn api_credentials(&self) -> Result<(String, SecretString)> {
        let key = Self::resolve_env(&self.exchange.api_key_env);
        let secret = Self::resolve_env(&self.exchange.api_secret_env);
        match (key, secret) {
            (Ok(key), Ok(secret)) => Ok((key, SecretString::new(secret))),
            _ if self.execution.paper_trading => Ok((String::new(), SecretString::new(String::new()))),
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {name}: {value}"))
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("Invalid value for {name}: {value}"),
    }
}
