//! Position manager (C3): tracks the live position, enforces the
//! accumulate-mode cap, and reconciles local state against what the
//! venues actually report. Agnostic to log format — trade-log emission is
//! delegated to a [`crate::trade_log::TradeLogger`] supplied at
//! construction time.

use crate::trade_log::{TradeLogEntry, TradeLogger};
use adapters::VenueAdapter;
use arb_core::{Position, PositionDirection, PositionManagerState, PositionMode, VenuePositionSide};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Default reconciliation tolerance: 10% of one position step, per §4.3.
pub fn default_sync_tolerance(step: Decimal) -> Decimal {
    step * Decimal::new(10, 2)
}

struct Inner {
    mode: PositionMode,
    current_net_qty: Decimal,
    max_position: Decimal,
    position_step: Decimal,
    open: Option<Position>,
    /// Accumulate-mode open legs not yet closed, oldest first. Each close
    /// retires the oldest leg so the entry prices logged against a close
    /// are the ones that leg actually opened at, not a fresh synthesis.
    open_legs: VecDeque<Position>,
    history: Vec<Position>,
}

pub struct PositionManager {
    inner: Mutex<Inner>,
    logger: Arc<dyn TradeLogger>,
}

impl PositionManager {
    pub fn single_slot(logger: Arc<dyn TradeLogger>) -> Self {
        PositionManager {
            inner: Mutex::new(Inner {
                mode: PositionMode::Single,
                current_net_qty: Decimal::ZERO,
                max_position: Decimal::ZERO,
                position_step: Decimal::ZERO,
                open: None,
                open_legs: VecDeque::new(),
                history: Vec::new(),
            }),
            logger,
        }
    }

    pub fn accumulate(max_position: Decimal, position_step: Decimal, logger: Arc<dyn TradeLogger>) -> Self {
        PositionManager {
            inner: Mutex::new(Inner {
                mode: PositionMode::Accumulate,
                current_net_qty: Decimal::ZERO,
                max_position,
                position_step,
                open: None,
                open_legs: VecDeque::new(),
                history: Vec::new(),
            }),
            logger,
        }
    }

    pub fn mode(&self) -> PositionMode {
        self.inner.lock().unwrap().mode
    }

    pub fn has_position(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.mode {
            PositionMode::Single => inner.open.is_some(),
            PositionMode::Accumulate => !inner.current_net_qty.is_zero(),
        }
    }

    /// True iff opening in `direction` is currently allowed: in
    /// single-slot mode, iff the slot is empty; in accumulate mode, iff
    /// applying the step keeps `|current_net_qty| <= max_position`.
    pub fn can_open(&self, direction: PositionDirection) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.mode {
            PositionMode::Single => inner.open.is_none(),
            PositionMode::Accumulate => {
                let projected = inner.current_net_qty + direction.net_qty_delta(inner.position_step);
                projected.abs() <= inner.max_position
            }
        }
    }

    /// True iff closing in `direction` is currently allowed. In
    /// accumulate mode this is the same cap check as `can_open` — a close
    /// beyond the slot can be treated as a reverse open once flat.
    pub fn can_close(&self, direction: PositionDirection) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.mode {
            PositionMode::Single => inner.open.is_some(),
            PositionMode::Accumulate => {
                let projected = inner.current_net_qty + direction.net_qty_delta(inner.position_step);
                projected.abs() <= inner.max_position
            }
        }
    }

    /// Single-slot: stores the newly opened position and emits its
    /// trade-log row (`position_type = open`).
    pub async fn set_position(&self, position: Position) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.open = Some(position.clone());
        }
        self.log_open(&position).await;
    }

    /// Single-slot: closes the stored position, computing realised PnL,
    /// emitting a trade-log entry, and clearing the slot.
    pub async fn close_position(&self, exit_update: Position) {
        let closed = {
            let mut inner = self.inner.lock().unwrap();
            inner.open = None;
            inner.history.push(exit_update.clone());
            exit_update
        };
        self.log_close(&closed).await;
    }

    /// Single-slot: the one open position, if any. Accumulate mode: the
    /// oldest not-yet-closed leg, which is the leg the next close retires.
    pub fn open_position(&self) -> Option<Position> {
        let inner = self.inner.lock().unwrap();
        match inner.mode {
            PositionMode::Single => inner.open.clone(),
            PositionMode::Accumulate => inner.open_legs.front().cloned(),
        }
    }

    /// Accumulate mode: records a new leg-pair, applies its signed step to
    /// `current_net_qty`, and queues it so the matching close can retrieve
    /// its real entry prices instead of fabricating them.
    pub async fn add_position(&self, direction: PositionDirection, position: Position) {
        let step = {
            let mut inner = self.inner.lock().unwrap();
            let step = direction.net_qty_delta(inner.position_step);
            inner.current_net_qty += step;
            inner.open_legs.push_back(position.clone());
            step
        };
        tracing::info!(?direction, %step, "accumulate position opened");
        self.log_open(&position).await;
    }

    /// Accumulate mode: retires the oldest open leg (FIFO) and reduces
    /// `current_net_qty` by the closing step. `position` is the full
    /// closed record (real entry prices plus the new exit fill) built by
    /// the executor from the leg returned by `open_position`.
    pub async fn reduce_position(&self, direction: PositionDirection, position: Position) {
        {
            let mut inner = self.inner.lock().unwrap();
            let step = direction.net_qty_delta(inner.position_step);
            inner.current_net_qty += step;
            inner.open_legs.pop_front();
            inner.history.push(position.clone());
        }
        self.log_close(&position).await;
    }

    pub fn current_net_qty(&self) -> Decimal {
        self.inner.lock().unwrap().current_net_qty
    }

    pub fn state(&self) -> PositionManagerState {
        let inner = self.inner.lock().unwrap();
        PositionManagerState {
            mode: inner.mode,
            current_net_qty: inner.current_net_qty,
            max_position: inner.max_position,
            position_step: inner.position_step,
            closed_count: inner.history.len(),
        }
    }

    /// Queries both venues for their actual signed position size (venue A
    /// short = negative, venue B long = positive), logs any per-leg
    /// mismatch beyond `tolerance`, and adopts the venue-reported net as
    /// the authoritative `current_net_qty`.
    pub async fn sync_from_exchanges(
        &self,
        adapter_a: &dyn VenueAdapter,
        adapter_b: &dyn VenueAdapter,
        symbol: &str,
        tolerance: Decimal,
    ) -> Result<Decimal, arb_core::AdapterError> {
        let pos_a = adapter_a.get_position(symbol).await?;
        let pos_b = adapter_b.get_position(symbol).await?;

        let signed_a = signed_size(pos_a.as_ref());
        let signed_b = signed_size(pos_b.as_ref());
        let net = signed_a + signed_b;

        if (signed_a.abs() - signed_b.abs()).abs() > tolerance {
            tracing::warn!(
                venue_a = %signed_a,
                venue_b = %signed_b,
                "leg mismatch exceeds reconciliation tolerance"
            );
        }

        self.inner.lock().unwrap().current_net_qty = net;
        Ok(net)
    }

    /// Checks `expected_qty` against the venue-reported net, overwriting
    /// local state (`SyncDivergence`) if the gap exceeds `tolerance`.
    pub async fn verify_and_sync(
        &self,
        adapter_a: &dyn VenueAdapter,
        adapter_b: &dyn VenueAdapter,
        symbol: &str,
        expected_qty: Decimal,
        tolerance: Decimal,
    ) -> Result<bool, arb_core::AdapterError> {
        let pos_a = adapter_a.get_position(symbol).await?;
        let pos_b = adapter_b.get_position(symbol).await?;
        let actual = signed_size(pos_a.as_ref()) + signed_size(pos_b.as_ref());

        if (actual - expected_qty).abs() > tolerance {
            tracing::warn!(
                expected = %expected_qty,
                actual = %actual,
                tolerance = %tolerance,
                "position sync divergence: adopting venue-reported net"
            );
            self.inner.lock().unwrap().current_net_qty = actual;
            return Ok(true);
        }
        Ok(false)
    }

    async fn log_open(&self, position: &Position) {
        self.logger
            .log_trade(TradeLogEntry::from_open(position))
            .await;
    }

    async fn log_close(&self, position: &Position) {
        self.logger
            .log_trade(TradeLogEntry::from_close(position))
            .await;
    }
}

fn signed_size(position: Option<&arb_core::VenuePosition>) -> Decimal {
    match position {
        None => Decimal::ZERO,
        Some(p) => match p.side {
            VenuePositionSide::Long => p.size,
            VenuePositionSide::Short => -p.size,
            VenuePositionSide::Neutral => Decimal::ZERO,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade_log::NullTradeLogger;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sample_position(qty: Decimal) -> Position {
        Position {
            symbol: "SYM".into(),
            quantity: qty,
            venue_a: "A".into(),
            venue_b: "B".into(),
            signal_entry_price_a: dec!(100.1),
            filled_entry_price_a: dec!(100.1),
            signal_entry_price_b: dec!(100.0),
            filled_entry_price_b: dec!(100.0),
            entry_order_id_a: Some("a1".into()),
            entry_order_id_b: Some("b1".into()),
            signal_exit_price_a: None,
            filled_exit_price_a: None,
            signal_exit_price_b: None,
            filled_exit_price_b: None,
            exit_order_id_a: None,
            exit_order_id_b: None,
            open_spread_pct: dec!(0.1),
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

    #[tokio::test]
    async fn single_slot_cannot_open_twice() {
        let pm = PositionManager::single_slot(Arc::new(NullTradeLogger));
        assert!(pm.can_open(PositionDirection::OpenShort));
        pm.set_position(sample_position(dec!(0.01))).await;
        assert!(!pm.can_open(PositionDirection::OpenShort));
        assert!(pm.has_position());
    }

    #[tokio::test]
    async fn single_slot_close_clears_slot() {
        let pm = PositionManager::single_slot(Arc::new(NullTradeLogger));
        pm.set_position(sample_position(dec!(0.01))).await;
        let mut closed = sample_position(dec!(0.01));
        closed.filled_exit_price_a = Some(dec!(100.0));
        closed.filled_exit_price_b = Some(dec!(100.1));
        pm.close_position(closed).await;
        assert!(!pm.has_position());
    }

    #[tokio::test]
    async fn accumulate_cap_respected() {
        let pm = PositionManager::accumulate(dec!(0.03), dec!(0.01), Arc::new(NullTradeLogger));
        assert!(pm.can_open(PositionDirection::OpenShort));
        for _ in 0..3 {
            pm.add_position(PositionDirection::OpenShort, sample_position(dec!(0.01))).await;
        }
        assert_eq!(pm.current_net_qty(), dec!(-0.03));
        assert!(!pm.can_open(PositionDirection::OpenShort));
        assert!(pm.can_close(PositionDirection::CloseShort));
    }

    #[tokio::test]
    async fn verify_and_sync_overwrites_on_divergence() {
        use adapters::sim::SimAdapter;
        // SimAdapter always reports no venue position, so any non-zero
        // expectation is a divergence and gets overwritten to zero.
        let pm = PositionManager::accumulate(dec!(1), dec!(0.01), Arc::new(NullTradeLogger));
        let a = SimAdapter::new("A", dec!(0.01));
        let b = SimAdapter::new("B", dec!(0.01));
        let changed = pm
            .verify_and_sync(&a, &b, "SYM", dec!(0.05), dec!(0.001))
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(pm.current_net_qty(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn verify_and_sync_within_tolerance_leaves_state_unchanged() {
        use adapters::sim::SimAdapter;
        let pm = PositionManager::accumulate(dec!(1), dec!(0.01), Arc::new(NullTradeLogger));
        let a = SimAdapter::new("A", dec!(0.01));
        let b = SimAdapter::new("B", dec!(0.01));
        let changed = pm
            .verify_and_sync(&a, &b, "SYM", Decimal::ZERO, dec!(0.001))
            .await
            .unwrap();
        assert!(!changed);
        assert_eq!(pm.current_net_qty(), Decimal::ZERO);
    }
}
