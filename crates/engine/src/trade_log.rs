//! Trade logger (C6): an audit sink the core depends on only through the
//! [`TradeLogger`] interface. The concrete sink is an implementation
//! choice — this crate ships an append-only CSV sink keyed by
//! `(pair, date)` as described in §6's persisted-state layout, plus a
//! null sink for tests and monitor-only dry runs.

use arb_core::Position;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// One row written by `log_trade`. `slippage_pct` is derived, never
/// supplied directly by the caller.
#[derive(Debug, Clone)]
pub struct TradeLogEntry {
    pub timestamp: DateTime<Utc>,
    pub pair: String,
    pub position_type: &'static str,
    pub venue_a: String,
    pub venue_b: String,
    pub signal_price_a: Decimal,
    pub filled_price_a: Decimal,
    pub signal_price_b: Decimal,
    pub filled_price_b: Decimal,
    pub quantity: Decimal,
    pub order_id_a: Option<String>,
    pub order_id_b: Option<String>,
    pub spread_pct: Decimal,
    pub pnl_pct: Option<Decimal>,
    pub entry_delay_ms: Option<f64>,
    pub exit_delay_ms: Option<f64>,
    pub notes: String,
}

impl TradeLogEntry {
    pub fn from_open(position: &Position) -> Self {
        TradeLogEntry {
            timestamp: position.entry_time,
            pair: position.symbol.clone(),
            position_type: "open",
            venue_a: position.venue_a.clone(),
            venue_b: position.venue_b.clone(),
            signal_price_a: position.signal_entry_price_a,
            filled_price_a: position.filled_entry_price_a,
            signal_price_b: position.signal_entry_price_b,
            filled_price_b: position.filled_entry_price_b,
            quantity: position.quantity,
            order_id_a: position.entry_order_id_a.clone(),
            order_id_b: position.entry_order_id_b.clone(),
            spread_pct: position.open_spread_pct,
            pnl_pct: None,
            entry_delay_ms: position.entry_delay_ms,
            exit_delay_ms: None,
            notes: String::new(),
        }
    }

    pub fn from_close(position: &Position) -> Self {
        TradeLogEntry {
            timestamp: position.exit_time.unwrap_or_else(Utc::now),
            pair: position.symbol.clone(),
            position_type: "close",
            venue_a: position.venue_a.clone(),
            venue_b: position.venue_b.clone(),
            signal_price_a: position.signal_exit_price_a.unwrap_or_default(),
            filled_price_a: position.filled_exit_price_a.unwrap_or_default(),
            signal_price_b: position.signal_exit_price_b.unwrap_or_default(),
            filled_price_b: position.filled_exit_price_b.unwrap_or_default(),
            quantity: position.quantity,
            order_id_a: position.exit_order_id_a.clone(),
            order_id_b: position.exit_order_id_b.clone(),
            spread_pct: position.close_spread_pct.unwrap_or_default(),
            pnl_pct: position.pnl_pct(),
            entry_delay_ms: position.entry_delay_ms,
            exit_delay_ms: position.exit_delay_ms,
            notes: String::new(),
        }
    }

    /// `(filled_price - signal_price) / signal_price * 100` against the
    /// leg whose price moved (buys positive, sells sign-flipped — see
    /// glossary). Computed per-leg since a hedge trade's two legs can
    /// slip in opposite directions.
    pub fn slippage_pct_a(&self, is_buy: bool) -> Decimal {
        slippage(self.signal_price_a, self.filled_price_a, is_buy)
    }

    pub fn slippage_pct_b(&self, is_buy: bool) -> Decimal {
        slippage(self.signal_price_b, self.filled_price_b, is_buy)
    }
}

fn slippage(signal: Decimal, filled: Decimal, is_buy: bool) -> Decimal {
    if signal.is_zero() {
        return Decimal::ZERO;
    }
    let raw = (filled - signal) / signal * Decimal::ONE_HUNDRED;
    if is_buy {
        raw
    } else {
        -raw
    }
}

#[async_trait]
pub trait TradeLogger: Send + Sync {
    async fn log_trade(&self, entry: TradeLogEntry);
}

/// Discards every entry. Used in monitor-only dry runs and unit tests
/// where persistence is irrelevant.
pub struct NullTradeLogger;

#[async_trait]
impl TradeLogger for NullTradeLogger {
    async fn log_trade(&self, _entry: TradeLogEntry) {}
}

/// Append-only CSV sink, one file per `(pair, date)` under `base_dir`,
/// matching §6's persisted-state layout. A single `tokio::sync::Mutex`
/// serialises writes since multiple pairs may share a process.
pub struct CsvTradeLogger {
    base_dir: PathBuf,
    lock: tokio::sync::Mutex<()>,
    header_written: Mutex<std::collections::HashSet<PathBuf>>,
}

const CSV_HEADER: &str = "timestamp,pair,position_type,venue_a,venue_b,signal_price_a,filled_price_a,signal_price_b,filled_price_b,quantity,order_id_a,order_id_b,spread_pct,pnl_pct,entry_delay_ms,exit_delay_ms,notes\n";

impl CsvTradeLogger {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        CsvTradeLogger {
            base_dir: base_dir.into(),
            lock: tokio::sync::Mutex::new(()),
            header_written: Mutex::new(std::collections::HashSet::new()),
        }
    }

    fn path_for(&self, pair: &str, date: DateTime<Utc>) -> PathBuf {
        self.base_dir.join(format!("{pair}.{}.csv", date.format("%Y-%m-%d")))
    }

    async fn append(&self, path: &PathBuf, line: &str) -> std::io::Result<()> {
        let _guard = self.lock.lock().await;
        tokio::fs::create_dir_all(&self.base_dir).await?;

        let needs_header = {
            let mut written = self.header_written.lock().unwrap();
            if written.contains(path) {
                false
            } else {
                let exists = tokio::fs::metadata(path).await.is_ok();
                written.insert(path.clone());
                !exists
            }
        };

        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
        if needs_header {
            file.write_all(CSV_HEADER.as_bytes()).await?;
        }
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl TradeLogger for CsvTradeLogger {
    async fn log_trade(&self, entry: TradeLogEntry) {
        let path = self.path_for(&entry.pair, entry.timestamp);
        let line = format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
            entry.timestamp.to_rfc3339(),
            entry.pair,
            entry.position_type,
            entry.venue_a,
            entry.venue_b,
            entry.signal_price_a,
            entry.filled_price_a,
            entry.signal_price_b,
            entry.filled_price_b,
            entry.quantity,
            entry.order_id_a.as_deref().unwrap_or(""),
            entry.order_id_b.as_deref().unwrap_or(""),
            entry.spread_pct,
            entry.pnl_pct.map(|p| p.to_string()).unwrap_or_default(),
            entry.entry_delay_ms.map(|d| d.to_string()).unwrap_or_default(),
            entry.exit_delay_ms.map(|d| d.to_string()).unwrap_or_default(),
            entry.notes.replace(',', ";"),
        );
        if let Err(err) = self.append(&path, &line).await {
            tracing::error!(%err, pair = %entry.pair, "failed to write trade log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn slippage_is_sign_flipped_for_sells() {
        let entry = TradeLogEntry {
            timestamp: Utc::now(),
            pair: "SYM".into(),
            position_type: "open",
            venue_a: "A".into(),
            venue_b: "B".into(),
            signal_price_a: dec!(100.0),
            filled_price_a: dec!(99.9),
            signal_price_b: dec!(100.0),
            filled_price_b: dec!(100.1),
            quantity: dec!(0.01),
            order_id_a: None,
            order_id_b: None,
            spread_pct: dec!(0.1),
            pnl_pct: None,
            entry_delay_ms: None,
            exit_delay_ms: None,
            notes: String::new(),
        };
        // Sell at A: filled lower than signalled is favourable slippage.
        assert_eq!(entry.slippage_pct_a(false), dec!(0.1));
        // Buy at B: filled higher than signalled is unfavourable slippage.
        assert_eq!(entry.slippage_pct_b(true), dec!(0.1));
    }

    #[tokio::test]
    async fn csv_logger_writes_header_once() {
        let dir = std::env::temp_dir().join(format!("arb-tradelog-test-{}", std::process::id()));
        let logger = CsvTradeLogger::new(&dir);
        let entry = TradeLogEntry {
            timestamp: Utc::now(),
            pair: "SYM".into(),
            position_type: "open",
            venue_a: "A".into(),
            venue_b: "B".into(),
            signal_price_a: dec!(100.0),
            filled_price_a: dec!(100.0),
            signal_price_b: dec!(100.0),
            filled_price_b: dec!(100.0),
            quantity: dec!(0.01),
            order_id_a: Some("a1".into()),
            order_id_b: Some("b1".into()),
            spread_pct: dec!(0.1),
            pnl_pct: None,
            entry_delay_ms: None,
            exit_delay_ms: None,
            notes: String::new(),
        };
        logger.log_trade(entry.clone()).await;
        logger.log_trade(entry.clone()).await;

        let path = logger.path_for("SYM", entry.timestamp);
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        tokio::fs::remove_dir_all(&dir).await.ok();

        assert_eq!(contents.matches("timestamp,pair").count(), 1);
        assert_eq!(contents.lines().count(), 3);
    }
}
