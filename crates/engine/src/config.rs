//! Per-pair configuration loading (C8). The engine receives a plain,
//! immutable struct; everything venue-specific beyond `exchange_a` /
//! `exchange_b` is carried opaquely in `variational_config` and handed to
//! the adapter registry, never inspected by the core.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("pair '{pair}' not found in config file {path}")]
    PairNotFound { pair: String, path: String },

    #[error("invalid config for pair '{pair}': {reason}")]
    Invalid { pair: String, reason: String },
}

/// Rolling-stat override for open/close thresholds (§4.5, §9: the
/// computation rule itself is left as a pluggable parameter by the
/// specification; this struct only carries the knobs a concrete
/// implementation would read).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DynamicThresholdConfig {
    pub enabled: bool,
    #[serde(default = "default_window")]
    pub window_size: usize,
    #[serde(default)]
    pub std_dev_multiplier: Option<f64>,
}

fn default_window() -> usize {
    100
}

impl Default for DynamicThresholdConfig {
    fn default() -> Self {
        DynamicThresholdConfig { enabled: false, window_size: default_window(), std_dev_multiplier: None }
    }
}

/// One trading pair's full configuration, as recognised by the YAML shape
/// in §6. Immutable once loaded; adapter-discovered metadata (contract
/// id, tick size) is never folded back into this struct.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PairConfig {
    pub enabled: bool,
    pub symbol: String,
    pub exchange_a: String,
    pub exchange_b: String,
    pub quantity: Decimal,
    pub quantity_precision: Decimal,
    pub open_threshold: Decimal,
    pub close_threshold: Decimal,
    #[serde(default)]
    pub min_depth_quantity: Option<Decimal>,
    #[serde(default)]
    pub accumulate_mode: bool,
    #[serde(default)]
    pub max_position: Option<Decimal>,
    #[serde(default)]
    pub dynamic_threshold: DynamicThresholdConfig,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_max_signal_delay_ms")]
    pub max_signal_delay_ms: i64,
    /// Opaque per-venue option bag (`variational_config` in §6), passed
    /// through to the adapter registry untouched.
    #[serde(default)]
    pub variational_config: HashMap<String, serde_yaml::Value>,
}

fn default_cooldown_seconds() -> u64 {
    5
}

fn default_max_signal_delay_ms() -> i64 {
    150
}

impl PairConfig {
    fn validate(&self, pair: &str) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid { pair: pair.into(), reason: "symbol is empty".into() });
        }
        if self.quantity <= Decimal::ZERO {
            return Err(ConfigError::Invalid { pair: pair.into(), reason: "quantity must be positive".into() });
        }
        if self.accumulate_mode && self.max_position.is_none() {
            return Err(ConfigError::Invalid {
                pair: pair.into(),
                reason: "accumulate_mode requires max_position".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    pairs: HashMap<String, PairConfig>,
}

/// Loads every pair from a YAML config file.
pub fn load_all(path: impl AsRef<Path>) -> Result<HashMap<String, PairConfig>, ConfigError> {
    let path_ref = path.as_ref();
    let path_str = path_ref.display().to_string();
    let raw = std::fs::read_to_string(path_ref)
        .map_err(|source| ConfigError::Read { path: path_str.clone(), source })?;
    let file: ConfigFile =
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse { path: path_str.clone(), source })?;
    for (name, cfg) in &file.pairs {
        cfg.validate(name)?;
    }
    Ok(file.pairs)
}

/// Loads one named pair from a YAML config file.
pub fn load_pair(path: impl AsRef<Path>, pair: &str) -> Result<PairConfig, ConfigError> {
    let path_ref = path.as_ref();
    let path_str = path_ref.display().to_string();
    let mut pairs = load_all(path_ref)?;
    pairs
        .remove(pair)
        .ok_or_else(|| ConfigError::PairNotFound { pair: pair.to_string(), path: path_str })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
pairs:
  btc-perp:
    enabled: true
    symbol: BTCUSDT
    exchange_a: venue_a
    exchange_b: venue_b
    quantity: "0.01"
    quantity_precision: "0.001"
    open_threshold: 0.05
    close_threshold: 0.0
    min_depth_quantity: "0.01"
    accumulate_mode: false
"#;

    #[test]
    fn loads_pair_with_defaults_filled_in() {
        let dir = std::env::temp_dir().join(format!("arb-config-test-{}", std::process::id()));
        std::fs::write(&dir, SAMPLE).unwrap();
        let pair = load_pair(&dir, "btc-perp").unwrap();
        std::fs::remove_file(&dir).ok();
        assert_eq!(pair.symbol, "BTCUSDT");
        assert_eq!(pair.cooldown_seconds, 5);
        assert_eq!(pair.max_signal_delay_ms, 150);
        assert!(!pair.dynamic_threshold.enabled);
    }

    #[test]
    fn missing_pair_is_an_error() {
        let dir = std::env::temp_dir().join(format!("arb-config-test2-{}", std::process::id()));
        std::fs::write(&dir, SAMPLE).unwrap();
        let result = load_pair(&dir, "eth-perp");
        std::fs::remove_file(&dir).ok();
        assert!(matches!(result, Err(ConfigError::PairNotFound { .. })));
    }

    #[test]
    fn accumulate_without_cap_is_invalid() {
        let bad = SAMPLE.replace("accumulate_mode: false", "accumulate_mode: true");
        let dir = std::env::temp_dir().join(format!("arb-config-test3-{}", std::process::id()));
        std::fs::write(&dir, bad).unwrap();
        let result = load_pair(&dir, "btc-perp");
        std::fs::remove_file(&dir).ok();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
