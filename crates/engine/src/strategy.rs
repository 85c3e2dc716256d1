//! Strategy (C5): consumes synchronised `PriceSnapshot`s from the price
//! monitor and drives the executor and position manager. A two-state
//! machine — `Flat` / `Holding` in single-slot mode, or the equivalent
//! `can_open`/`can_close` capacity check in accumulate mode. Grounded on
//! `original_source/arbitrage/strategies/hedge_strategy.py`: the
//! has-position branch, the cooldown/signal-delay/depth gates, and the
//! monitor-only virtual-position path all follow its `_on_price_update` /
//! `_check_open_signal` / `_check_close_signal` shape, translated from an
//! `asyncio.Lock` + boolean flag into a `tokio::sync::Mutex` guard.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use arb_core::{Clock, Position, PositionDirection, PriceSnapshot};
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::config::PairConfig;
use crate::executor::{ExecuteCloseRequest, ExecuteOpenRequest, ExecutorError, OrderExecutor};
use crate::monitor::PriceMonitor;
use crate::notifier::{NotificationLevel, Notifier};
use crate::position_manager::PositionManager;

/// Every leg-pair this engine ever places opens short-A/long-B and closes
/// by reversing it; accumulate mode's "long" direction (mirrored
/// short-B/long-A trades) is not reachable through this strategy, only
/// through `PositionDirection` itself, which a future mirrored strategy
/// could reuse.
const OPEN_DIRECTION: PositionDirection = PositionDirection::OpenShort;
const CLOSE_DIRECTION: PositionDirection = PositionDirection::CloseShort;

/// Emitted on a `FatalUnwindFailure`: the process-entrypoint is expected
/// to log this, notify, and exit non-zero. Never retried or swallowed.
pub type FatalSignal = String;

pub struct Strategy {
    config: PairConfig,
    monitor_only: bool,
    executor: OrderExecutor,
    position_manager: Arc<PositionManager>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    executing: AsyncMutex<()>,
    last_open_at: StdMutex<Option<Instant>>,
    fatal_tx: mpsc::UnboundedSender<FatalSignal>,
}

impl Strategy {
    pub fn new(
        config: PairConfig,
        monitor_only: bool,
        executor: OrderExecutor,
        position_manager: Arc<PositionManager>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<FatalSignal>) {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let strategy = Arc::new(Strategy {
            config,
            monitor_only,
            executor,
            position_manager,
            notifier,
            clock,
            executing: AsyncMutex::new(()),
            last_open_at: StdMutex::new(None),
            fatal_tx,
        });
        (strategy, fatal_rx)
    }

    /// Subscribes this strategy to `monitor`. The monitor's callback is
    /// synchronous, so each snapshot is handed to a spawned task; the
    /// `executing` lock still serialises actual trade execution across
    /// those tasks, matching the single-in-flight-execution invariant.
    pub fn attach(self: &Arc<Self>, monitor: &PriceMonitor) {
        let strategy = self.clone();
        monitor.subscribe(Arc::new(move |snapshot: PriceSnapshot| {
            let strategy = strategy.clone();
            tokio::spawn(async move {
                strategy.on_snapshot(snapshot).await;
            });
        }));
    }

    /// The pluggable dynamic-threshold override point (§4.5, §9): the
    /// specification leaves the recomputation rule undefined, so this is
    /// a pass-through that always returns the statically configured
    /// thresholds. A concrete deployment wanting rolling-spread
    /// recalibration would replace this method's body.
    fn effective_thresholds(&self) -> (Decimal, Decimal) {
        (self.config.open_threshold, self.config.close_threshold)
    }

    fn in_cooldown(&self, now: Instant) -> bool {
        match *self.last_open_at.lock().unwrap() {
            None => false,
            Some(last) => now.duration_since(last) < Duration::from_secs(self.config.cooldown_seconds),
        }
    }

    fn signal_age_ok(&self, snapshot: &PriceSnapshot) -> bool {
        let now = Utc::now();
        let limit = chrono::Duration::milliseconds(self.config.max_signal_delay_ms);
        snapshot.signal_age_a(now) < limit && snapshot.signal_age_b(now) < limit
    }

    fn depth_ok_for_open(&self, snapshot: &PriceSnapshot) -> bool {
        match self.config.min_depth_quantity {
            None => true,
            Some(min) => snapshot.bid_size_a >= min && snapshot.ask_size_b >= min,
        }
    }

    async fn on_snapshot(&self, snapshot: PriceSnapshot) {
        let Ok(_guard) = self.executing.try_lock() else {
            return;
        };

        let open_pct = snapshot.open_spread_pct();
        let close_pct = snapshot.close_spread_pct();
        let (open_threshold, close_threshold) = self.effective_thresholds();

        let has_capacity_to_open = if self.config.accumulate_mode {
            self.position_manager.can_open(OPEN_DIRECTION)
        } else {
            !self.position_manager.has_position()
        };

        if has_capacity_to_open {
            if open_pct < open_threshold {
                return;
            }
            if self.in_cooldown(Instant::now()) {
                tracing::debug!(symbol = %snapshot.symbol, "open signal skipped: cooldown active");
                return;
            }
            if !self.signal_age_ok(&snapshot) {
                tracing::warn!(symbol = %snapshot.symbol, %open_pct, reason = "signal delay exceeded", "open signal skipped");
                return;
            }
            if !self.depth_ok_for_open(&snapshot) {
                tracing::debug!(symbol = %snapshot.symbol, reason = "insufficient depth", "open signal skipped");
                return;
            }
            self.handle_open(snapshot, open_pct).await;
            return;
        }

        let has_position_to_close = if self.config.accumulate_mode {
            self.position_manager.can_close(CLOSE_DIRECTION)
        } else {
            self.position_manager.has_position()
        };
        if !has_position_to_close {
            return;
        }
        if close_pct < close_threshold {
            return;
        }
        if !self.signal_age_ok(&snapshot) {
            tracing::warn!(symbol = %snapshot.symbol, %close_pct, reason = "signal delay exceeded", "close signal skipped");
            return;
        }
        self.handle_close(snapshot, close_pct).await;
    }

    async fn handle_open(&self, snapshot: PriceSnapshot, open_pct: Decimal) {
        let signal_time = Utc::now();

        if self.monitor_only {
            let position = synthesize_open(&snapshot, open_pct, self.config.quantity);
            self.store_open(position).await;
            *self.last_open_at.lock().unwrap() = Some(Instant::now());
            self.notifier
                .notify(NotificationLevel::Info, &format!("[monitor-only] opened {} @ spread {open_pct}%", snapshot.symbol))
                .await;
            return;
        }

        let req = ExecuteOpenRequest {
            symbol: snapshot.symbol.clone(),
            quantity: self.config.quantity,
            reference_price_a: snapshot.bid_a,
            reference_price_b: snapshot.ask_b,
            quote_id_a: snapshot.quote_id_a.clone(),
            quote_id_b: snapshot.quote_id_b.clone(),
            open_spread_pct: open_pct,
            signal_time: Some(signal_time),
        };

        match self.executor.execute_open(req).await {
            Ok(position) => {
                let quantity = position.quantity;
                self.store_open(position).await;
                *self.last_open_at.lock().unwrap() = Some(Instant::now());
                self.notifier
                    .notify(NotificationLevel::Info, &format!("opened {} qty={quantity} spread={open_pct}%", snapshot.symbol))
                    .await;
            }
            Err(ExecutorError::FatalUnwindFailure(msg)) => self.escalate_fatal(msg).await,
            Err(err) => {
                tracing::info!(symbol = %snapshot.symbol, %err, "open cycle did not complete");
            }
        }
    }

    async fn handle_close(&self, snapshot: PriceSnapshot, close_pct: Decimal) {
        let signal_time = Utc::now();

        if self.monitor_only {
            let position = self
                .position_manager
                .open_position()
                .unwrap_or_else(|| synthesize_open(&snapshot, close_pct, self.config.quantity));
            let closed = synthesize_close(position, &snapshot, close_pct);
            let pnl = closed.pnl_pct();
            self.store_close(closed).await;
            self.notifier
                .notify(NotificationLevel::Info, &format!("[monitor-only] closed {} pnl={pnl:?}%", snapshot.symbol))
                .await;
            return;
        }

        let open_position = match self.position_manager.open_position() {
            Some(p) => p,
            None => synthesize_open(&snapshot, close_pct, self.config.quantity),
        };

        let req = ExecuteCloseRequest {
            position: open_position,
            reference_price_a: snapshot.ask_a,
            reference_price_b: snapshot.bid_b,
            quote_id_a: snapshot.quote_id_a.clone(),
            quote_id_b: snapshot.quote_id_b.clone(),
            close_spread_pct: close_pct,
            signal_time: Some(signal_time),
        };

        match self.executor.execute_close(req).await {
            Ok(closed) => {
                let pnl = closed.pnl_pct();
                self.store_close(closed).await;
                self.notifier
                    .notify(NotificationLevel::Info, &format!("closed {} pnl={pnl:?}%", snapshot.symbol))
                    .await;
            }
            Err(ExecutorError::FatalUnwindFailure(msg)) => self.escalate_fatal(msg).await,
            Err(ExecutorError::CloseAttemptFailed) => {
                tracing::warn!(symbol = %snapshot.symbol, "close attempt failed after retries; will retry next signal");
            }
            Err(err) => {
                tracing::warn!(symbol = %snapshot.symbol, %err, "close cycle error");
            }
        }
    }

    async fn store_open(&self, position: Position) {
        if self.config.accumulate_mode {
            self.position_manager.add_position(OPEN_DIRECTION, position).await;
        } else {
            self.position_manager.set_position(position).await;
        }
    }

    async fn store_close(&self, position: Position) {
        if self.config.accumulate_mode {
            self.position_manager.reduce_position(CLOSE_DIRECTION, position).await;
        } else {
            self.position_manager.close_position(position).await;
        }
    }

    async fn escalate_fatal(&self, message: String) {
        tracing::error!(%message, "fatal unwind failure");
        self.notifier.notify(NotificationLevel::Critical, &message).await;
        let _ = self.fatal_tx.send(message);
    }

    /// Exposed for the reconciliation pass the entrypoint runs at
    /// startup and, in accumulate mode, after each round (§4.3).
    pub fn position_manager(&self) -> &Arc<PositionManager> {
        &self.position_manager
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

fn synthesize_open(snapshot: &PriceSnapshot, open_spread_pct: Decimal, quantity: Decimal) -> Position {
    Position {
        symbol: snapshot.symbol.clone(),
        quantity,
        venue_a: snapshot.venue_a.clone(),
        venue_b: snapshot.venue_b.clone(),
        signal_entry_price_a: snapshot.bid_a,
        filled_entry_price_a: snapshot.bid_a,
        signal_entry_price_b: snapshot.ask_b,
        filled_entry_price_b: snapshot.ask_b,
        entry_order_id_a: Some("MONITOR_A".to_string()),
        entry_order_id_b: Some("MONITOR_B".to_string()),
        signal_exit_price_a: None,
        filled_exit_price_a: None,
        signal_exit_price_b: None,
        filled_exit_price_b: None,
        exit_order_id_a: None,
        exit_order_id_b: None,
        open_spread_pct,
        close_spread_pct: None,
        entry_time: Utc::now(),
        exit_time: None,
        entry_delay_ms: None,
        exit_delay_ms: None,
        place_duration_a_ms: None,
        place_duration_b_ms: None,
        execution_duration_a_ms: None,
        execution_duration_b_ms: None,
        attempt_a: None,
        attempt_b: None,
    }
}

fn synthesize_close(mut position: Position, snapshot: &PriceSnapshot, close_spread_pct: Decimal) -> Position {
    position.signal_exit_price_a = Some(snapshot.ask_a);
    position.filled_exit_price_a = Some(snapshot.ask_a);
    position.signal_exit_price_b = Some(snapshot.bid_b);
    position.filled_exit_price_b = Some(snapshot.bid_b);
    position.exit_order_id_a = Some("MONITOR_A".to_string());
    position.exit_order_id_b = Some("MONITOR_B".to_string());
    position.close_spread_pct = Some(close_spread_pct);
    position.exit_time = Some(Utc::now());
    position
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade_log::NullTradeLogger;
    use adapters::sim::SimAdapter;
    use rust_decimal_macros::dec;

    fn snapshot(bid_a: Decimal, ask_a: Decimal, bid_b: Decimal, ask_b: Decimal) -> PriceSnapshot {
        PriceSnapshot {
            symbol: "SYM".into(),
            venue_a: "A".into(),
            venue_b: "B".into(),
            bid_a,
            ask_a,
            bid_size_a: dec!(1),
            ask_size_a: dec!(1),
            timestamp_a: Utc::now(),
            quote_id_a: None,
            bid_b,
            ask_b,
            bid_size_b: dec!(1),
            ask_size_b: dec!(1),
            timestamp_b: Utc::now(),
            quote_id_b: None,
        }
    }

    fn config() -> PairConfig {
        PairConfig {
            enabled: true,
            symbol: "SYM".into(),
            exchange_a: "a".into(),
            exchange_b: "b".into(),
            quantity: dec!(0.01),
            quantity_precision: dec!(0.001),
            open_threshold: dec!(0.05),
            close_threshold: dec!(0.0),
            min_depth_quantity: None,
            accumulate_mode: false,
            max_position: None,
            dynamic_threshold: Default::default(),
            cooldown_seconds: 5,
            max_signal_delay_ms: 150,
            variational_config: Default::default(),
        }
    }

    #[tokio::test]
    async fn clean_open_then_close_round_trip() {
        let a = Arc::new(SimAdapter::new("A", dec!(0.01)));
        let b = Arc::new(SimAdapter::new("B", dec!(0.01)));
        let executor = OrderExecutor::new(a, b, Arc::new(crate::notifier::NoopNotifier));
        let pm = Arc::new(PositionManager::single_slot(Arc::new(NullTradeLogger)));
        let (strategy, _fatal_rx) =
            Strategy::new(config(), false, executor, pm.clone(), Arc::new(crate::notifier::NoopNotifier), Arc::new(arb_core::SystemClock));

        // open: book-a 100.10/100.11, book-b 100.00/100.01 => open_pct ~0.0899%
        let snap_open = snapshot(dec!(100.10), dec!(100.11), dec!(100.00), dec!(100.01));
        strategy.on_snapshot(snap_open).await;
        assert!(pm.has_position());

        // close: book-a 100.00/100.01, book-b 100.10/100.11 => close_pct ~0.0899%
        let snap_close = snapshot(dec!(100.00), dec!(100.01), dec!(100.10), dec!(100.11));
        strategy.on_snapshot(snap_close).await;
        assert!(!pm.has_position());
    }

    #[tokio::test]
    async fn below_threshold_does_not_open() {
        let a = Arc::new(SimAdapter::new("A", dec!(0.01)));
        let b = Arc::new(SimAdapter::new("B", dec!(0.01)));
        let executor = OrderExecutor::new(a, b, Arc::new(crate::notifier::NoopNotifier));
        let pm = Arc::new(PositionManager::single_slot(Arc::new(NullTradeLogger)));
        let (strategy, _fatal_rx) =
            Strategy::new(config(), false, executor, pm.clone(), Arc::new(crate::notifier::NoopNotifier), Arc::new(arb_core::SystemClock));

        // book-b bid 100.09 ask 100.10 => open_pct ~0.00999% < 0.05%
        let snap = snapshot(dec!(100.10), dec!(100.11), dec!(100.09), dec!(100.10));
        strategy.on_snapshot(snap).await;
        assert!(!pm.has_position());
    }

    #[tokio::test]
    async fn stale_snapshot_is_skipped_even_above_threshold() {
        let a = Arc::new(SimAdapter::new("A", dec!(0.01)));
        let b = Arc::new(SimAdapter::new("B", dec!(0.01)));
        let executor = OrderExecutor::new(a, b, Arc::new(crate::notifier::NoopNotifier));
        let pm = Arc::new(PositionManager::single_slot(Arc::new(NullTradeLogger)));
        let (strategy, _fatal_rx) =
            Strategy::new(config(), false, executor, pm.clone(), Arc::new(crate::notifier::NoopNotifier), Arc::new(arb_core::SystemClock));

        let mut snap = snapshot(dec!(101.00), dec!(101.01), dec!(100.00), dec!(100.01));
        snap.timestamp_b = Utc::now() - chrono::Duration::milliseconds(200);
        strategy.on_snapshot(snap).await;
        assert!(!pm.has_position());
    }

    #[tokio::test]
    async fn depth_insufficient_blocks_open() {
        let a = Arc::new(SimAdapter::new("A", dec!(0.01)));
        let b = Arc::new(SimAdapter::new("B", dec!(0.01)));
        let executor = OrderExecutor::new(a, b, Arc::new(crate::notifier::NoopNotifier));
        let pm = Arc::new(PositionManager::single_slot(Arc::new(NullTradeLogger)));
        let mut cfg = config();
        cfg.min_depth_quantity = Some(dec!(0.01));
        let (strategy, _fatal_rx) =
            Strategy::new(cfg, false, executor, pm.clone(), Arc::new(crate::notifier::NoopNotifier), Arc::new(arb_core::SystemClock));

        let mut snap = snapshot(dec!(100.10), dec!(100.11), dec!(100.00), dec!(100.01));
        snap.bid_size_a = dec!(0.001);
        strategy.on_snapshot(snap).await;
        assert!(!pm.has_position());
    }

    #[tokio::test]
    async fn monitor_only_open_then_close_has_zero_slippage_pnl() {
        let a = Arc::new(SimAdapter::new("A", dec!(0.01)));
        let b = Arc::new(SimAdapter::new("B", dec!(0.01)));
        let executor = OrderExecutor::new(a, b, Arc::new(crate::notifier::NoopNotifier));
        let pm = Arc::new(PositionManager::single_slot(Arc::new(NullTradeLogger)));
        let (strategy, _fatal_rx) =
            Strategy::new(config(), true, executor, pm.clone(), Arc::new(crate::notifier::NoopNotifier), Arc::new(arb_core::SystemClock));

        let snap_open = snapshot(dec!(100.10), dec!(100.11), dec!(100.00), dec!(100.01));
        strategy.on_snapshot(snap_open).await;
        assert!(pm.has_position());

        let snap_close = snapshot(dec!(100.00), dec!(100.01), dec!(100.10), dec!(100.11));
        strategy.on_snapshot(snap_close).await;
        assert!(!pm.has_position());
    }

    #[tokio::test]
    async fn cooldown_blocks_second_open_immediately_after_first() {
        let a = Arc::new(SimAdapter::new("A", dec!(0.01)));
        let b = Arc::new(SimAdapter::new("B", dec!(0.01)));
        let executor = OrderExecutor::new(a, b, Arc::new(crate::notifier::NoopNotifier));
        let pm = Arc::new(PositionManager::accumulate(dec!(1), dec!(0.01), Arc::new(NullTradeLogger)));
        let mut cfg = config();
        cfg.accumulate_mode = true;
        cfg.max_position = Some(dec!(1));
        let (strategy, _fatal_rx) =
            Strategy::new(cfg, false, executor, pm.clone(), Arc::new(crate::notifier::NoopNotifier), Arc::new(arb_core::SystemClock));

        let snap = snapshot(dec!(100.10), dec!(100.11), dec!(100.00), dec!(100.01));
        strategy.on_snapshot(snap.clone()).await;
        strategy.on_snapshot(snap).await;
        // Second open within cooldown must not add a second increment.
        assert_eq!(pm.current_net_qty(), dec!(-0.01));
    }
}
