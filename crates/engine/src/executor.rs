//! Order executor (C4): the heart of the engine. Executes an open or
//! close as an atomic-intent two-leg operation, never leaving a single-leg
//! residual silently. Implements the happy path, the four first-attempt
//! outcomes, fill-quantity reconciliation, and emergency unwind described
//! in §4.4. Follows the parallel executor variant named in §9 — the
//! sequential variant's divergent retry/unwind semantics are out of scope.

use adapters::VenueAdapter;
use arb_core::{AdapterError, OrderResult, Position, RetryMode, Side};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::notifier::{NotificationLevel, Notifier};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("both legs failed on the first attempt; cycle skipped")]
    SkippedBothFailed,

    #[error("single-leg failure after retries; emergency unwind succeeded, no position opened")]
    UnwoundAfterFailure,

    #[error("close attempt failed after retries; the reopened leg restores the prior hedge, retry next cycle")]
    CloseAttemptFailed,

    #[error("fatal unwind failure: {0}")]
    FatalUnwindFailure(String),

    #[error("balanced quantity reduced to zero after trimming; no position opened")]
    BalancedToZero,

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Bounded-attempt / aggressive-offset knobs. Separate limits for open and
/// close match §4.4: opens retry up to 3 times before abandoning, closes
/// may be raised to 5 since they must not be abandoned.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub open_retry_attempts: u32,
    pub close_retry_attempts: u32,
    pub unwind_retry_attempts: u32,
    /// Tolerance for residual quantity mismatch after trimming (§4.4
    /// default 0.001).
    pub balance_tolerance: Decimal,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            open_retry_attempts: 3,
            close_retry_attempts: 5,
            unwind_retry_attempts: 5,
            balance_tolerance: Decimal::new(1, 3),
        }
    }
}

pub struct ExecuteOpenRequest {
    pub symbol: String,
    pub quantity: Decimal,
    pub reference_price_a: Decimal,
    pub reference_price_b: Decimal,
    pub quote_id_a: Option<String>,
    pub quote_id_b: Option<String>,
    pub open_spread_pct: Decimal,
    pub signal_time: Option<chrono::DateTime<Utc>>,
}

pub struct ExecuteCloseRequest {
    pub position: Position,
    pub reference_price_a: Decimal,
    pub reference_price_b: Decimal,
    pub quote_id_a: Option<String>,
    pub quote_id_b: Option<String>,
    pub close_spread_pct: Decimal,
    pub signal_time: Option<chrono::DateTime<Utc>>,
}

struct LegOutcome {
    order_id: Option<String>,
    filled_price: Decimal,
    filled_quantity: Decimal,
    attempts: u32,
    place_duration_ms: f64,
}

pub struct OrderExecutor {
    adapter_a: Arc<dyn VenueAdapter>,
    adapter_b: Arc<dyn VenueAdapter>,
    notifier: Arc<dyn Notifier>,
    config: ExecutorConfig,
}

impl OrderExecutor {
    pub fn new(
        adapter_a: Arc<dyn VenueAdapter>,
        adapter_b: Arc<dyn VenueAdapter>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        OrderExecutor { adapter_a, adapter_b, notifier, config: ExecutorConfig::default() }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Opens a hedged position: sell-to-open on A (opportunistic), buy-to-open
    /// on B (aggressive), submitted concurrently.
    pub async fn execute_open(&self, req: ExecuteOpenRequest) -> Result<Position, ExecutorError> {
        let now = Instant::now();
        let (result_a, result_b) = tokio::join!(
            self.submit(&*self.adapter_a, Side::Sell, req.quantity, req.reference_price_a, RetryMode::Opportunistic, req.quote_id_a.clone()),
            self.submit(&*self.adapter_b, Side::Buy, req.quantity, req.reference_price_b, RetryMode::Aggressive, req.quote_id_b.clone()),
        );

        let (leg_a, leg_b) = self
            .resolve_legs(
                result_a,
                result_b,
                &*self.adapter_a,
                &*self.adapter_b,
                Side::Sell,
                Side::Buy,
                req.quantity,
                self.config.open_retry_attempts,
                true,
            )
            .await?;

        let (qty_a, qty_b) = self
            .balance_positions(&*self.adapter_a, &*self.adapter_b, Side::Sell, Side::Buy, leg_a.filled_quantity, leg_b.filled_quantity, req.quantity, req.reference_price_a, req.reference_price_b)
            .await?;
        let quantity = qty_a.min(qty_b);
        if quantity.is_zero() {
            return Err(ExecutorError::BalancedToZero);
        }

        let entry_delay_ms = req
            .signal_time
            .map(|t| (Utc::now() - t).num_milliseconds() as f64)
            .unwrap_or_else(|| now.elapsed().as_secs_f64() * 1000.0);

        Ok(Position {
            symbol: req.symbol,
            quantity,
            venue_a: self.adapter_a.venue_name().to_string(),
            venue_b: self.adapter_b.venue_name().to_string(),
            signal_entry_price_a: req.reference_price_a,
            filled_entry_price_a: leg_a.filled_price,
            signal_entry_price_b: req.reference_price_b,
            filled_entry_price_b: leg_b.filled_price,
            entry_order_id_a: leg_a.order_id,
            entry_order_id_b: leg_b.order_id,
            signal_exit_price_a: None,
            filled_exit_price_a: None,
            signal_exit_price_b: None,
            filled_exit_price_b: None,
            exit_order_id_a: None,
            exit_order_id_b: None,
            open_spread_pct: req.open_spread_pct,
            close_spread_pct: None,
            entry_time: Utc::now(),
            exit_time: None,
            entry_delay_ms: Some(entry_delay_ms),
            exit_delay_ms: None,
            place_duration_a_ms: Some(leg_a.place_duration_ms),
            place_duration_b_ms: Some(leg_b.place_duration_ms),
            execution_duration_a_ms: Some(leg_a.place_duration_ms),
            execution_duration_b_ms: Some(leg_b.place_duration_ms),
            attempt_a: Some(leg_a.attempts),
            attempt_b: Some(leg_b.attempts),
        })
    }

    /// Closes a previously opened hedged position: buy-to-close on A
    /// (covers the short), sell-to-close on B (covers the long). Unlike
    /// `execute_open`, a failing leg here is retried to completion — a
    /// close is never abandoned, only escalated to a fatal unwind.
    pub async fn execute_close(&self, req: ExecuteCloseRequest) -> Result<Position, ExecutorError> {
        let now = Instant::now();
        let quantity = req.position.quantity;
        let (result_a, result_b) = tokio::join!(
            self.submit(&*self.adapter_a, Side::Buy, quantity, req.reference_price_a, RetryMode::Opportunistic, req.quote_id_a.clone()),
            self.submit(&*self.adapter_b, Side::Sell, quantity, req.reference_price_b, RetryMode::Aggressive, req.quote_id_b.clone()),
        );

        let (leg_a, leg_b) = self
            .resolve_legs(
                result_a,
                result_b,
                &*self.adapter_a,
                &*self.adapter_b,
                Side::Buy,
                Side::Sell,
                quantity,
                self.config.close_retry_attempts,
                false,
            )
            .await?;

        let (qty_a, qty_b) = self
            .balance_positions(&*self.adapter_a, &*self.adapter_b, Side::Buy, Side::Sell, leg_a.filled_quantity, leg_b.filled_quantity, quantity, req.reference_price_a, req.reference_price_b)
            .await?;
        let balanced_quantity = qty_a.min(qty_b);

        let exit_delay_ms = req
            .signal_time
            .map(|t| (Utc::now() - t).num_milliseconds() as f64)
            .unwrap_or_else(|| now.elapsed().as_secs_f64() * 1000.0);

        let mut closed = req.position;
        closed.quantity = if balanced_quantity.is_zero() { closed.quantity } else { balanced_quantity };
        closed.signal_exit_price_a = Some(req.reference_price_a);
        closed.filled_exit_price_a = Some(leg_a.filled_price);
        closed.signal_exit_price_b = Some(req.reference_price_b);
        closed.filled_exit_price_b = Some(leg_b.filled_price);
        closed.exit_order_id_a = leg_a.order_id;
        closed.exit_order_id_b = leg_b.order_id;
        closed.close_spread_pct = Some(req.close_spread_pct);
        closed.exit_time = Some(Utc::now());
        closed.exit_delay_ms = Some(exit_delay_ms);

        Ok(closed)
    }

    async fn submit(
        &self,
        adapter: &dyn VenueAdapter,
        side: Side,
        quantity: Decimal,
        reference_price: Decimal,
        retry_mode: RetryMode,
        quote_id: Option<String>,
    ) -> OrderResult {
        let t0 = Instant::now();
        let result = adapter.place_open_order(side, quantity, reference_price, retry_mode, quote_id).await;
        tracing::debug!(venue = adapter.venue_name(), ?side, elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0, success = result.success, "leg submitted");
        result
    }

    /// Resolves the four first-attempt outcomes of §4.4 into a pair of
    /// completed legs, retrying the failing side in aggressive mode (with
    /// fresh price/quote_id each attempt) and falling back to emergency
    /// unwind of the already-filled side on exhaustion.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_legs(
        &self,
        result_a: OrderResult,
        result_b: OrderResult,
        adapter_a: &dyn VenueAdapter,
        adapter_b: &dyn VenueAdapter,
        side_a: Side,
        side_b: Side,
        quantity: Decimal,
        max_attempts: u32,
        abandonable: bool,
    ) -> Result<(LegOutcome, LegOutcome), ExecutorError> {
        let success_a = result_a.success;
        let success_b = result_b.success;

        if !success_a && !success_b {
            if abandonable {
                return Err(ExecutorError::SkippedBothFailed);
            }
            // Closes are never abandoned: retry both legs to completion.
            let retried_a = self
                .retry_leg(adapter_a, side_a, quantity, max_attempts, None)
                .await
                .ok_or_else(|| ExecutorError::FatalUnwindFailure(format!("{} leg never filled on close", adapter_a.venue_name())))?;
            let retried_b = self
                .retry_leg(adapter_b, side_b, quantity, max_attempts, None)
                .await
                .ok_or_else(|| ExecutorError::FatalUnwindFailure(format!("{} leg never filled on close", adapter_b.venue_name())))?;
            return Ok((retried_a, retried_b));
        }

        if success_a && success_b {
            return Ok((leg_from_result(result_a), leg_from_result(result_b)));
        }

        if success_b && !success_a {
            let filled_b = leg_from_result(result_b);
            match self.retry_leg(adapter_a, side_a, quantity, max_attempts, None).await {
                Some(retried_a) => Ok((retried_a, filled_b)),
                None => {
                    self.emergency_unwind(adapter_b, side_b.opposite(), filled_b.filled_quantity).await?;
                    if abandonable {
                        Err(ExecutorError::UnwoundAfterFailure)
                    } else {
                        Err(ExecutorError::CloseAttemptFailed)
                    }
                }
            }
        } else {
            let filled_a = leg_from_result(result_a);
            match self.retry_leg(adapter_b, side_b, quantity, max_attempts, None).await {
                Some(retried_b) => Ok((filled_a, retried_b)),
                None => {
                    self.emergency_unwind(adapter_a, side_a.opposite(), filled_a.filled_quantity).await?;
                    if abandonable {
                        Err(ExecutorError::UnwoundAfterFailure)
                    } else {
                        Err(ExecutorError::CloseAttemptFailed)
                    }
                }
            }
        }
    }

    /// Bounded retry of one leg (`_retry_place_order` in §4.4). From
    /// attempt 3 onward forces aggressive mode regardless of caller
    /// intent. Refreshes the reference price and quote_id from the
    /// adapter's latest cached book on every attempt after the first.
    async fn retry_leg(
        &self,
        adapter: &dyn VenueAdapter,
        side: Side,
        quantity: Decimal,
        max_attempts: u32,
        _unused: Option<()>,
    ) -> Option<LegOutcome> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if attempts > max_attempts {
                return None;
            }
            let book = adapter.get_latest_orderbook();
            let (reference_price, quote_id) = match (&book, side) {
                (Some(book), Side::Buy) => (book.best_ask().map(|e| e.price), book.quote_id.clone()),
                (Some(book), Side::Sell) => (book.best_bid().map(|e| e.price), book.quote_id.clone()),
                (None, _) => (None, None),
            };
            let Some(reference_price) = reference_price else {
                tracing::warn!(venue = adapter.venue_name(), attempt = attempts, "no cached book to retry against");
                continue;
            };
            // Retries always cross the book: from attempt 3 onward this is
            // mandated by §4.4 regardless of the caller's original mode,
            // and the first two retries already follow the failing path
            // of an opportunistic order, so there is nothing left to try
            // opportunistically.
            let t0 = Instant::now();
            let result = adapter
                .place_open_order(side, quantity, reference_price, RetryMode::Aggressive, quote_id)
                .await;
            let duration_ms = t0.elapsed().as_secs_f64() * 1000.0;
            if result.success {
                return Some(LegOutcome {
                    order_id: result.order_id,
                    filled_price: result.filled_price.unwrap_or(reference_price),
                    filled_quantity: result.filled_quantity.unwrap_or(quantity),
                    attempts,
                    place_duration_ms: duration_ms,
                });
            }
            tracing::warn!(venue = adapter.venue_name(), attempt = attempts, error = ?result.error_message, "retry attempt failed");
        }
    }

    /// Submits a reverse-direction market order on `adapter` to flatten a
    /// single filled leg that cannot be hedged. Aggressive retry up to
    /// `unwind_retry_attempts`. On success, logs "unwind complete" and
    /// notifies; on exhaustion, escalates to a critical notification —
    /// the caller decides whether that becomes `FatalUnwindFailure`.
    async fn emergency_unwind(
        &self,
        adapter: &dyn VenueAdapter,
        unwind_side: Side,
        quantity: Decimal,
    ) -> Result<(), ExecutorError> {
        for attempt in 1..=self.config.unwind_retry_attempts {
            let Some(book) = adapter.get_latest_orderbook() else {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                continue;
            };
            let reference_price = match unwind_side {
                Side::Buy => book.best_ask().map(|e| e.price),
                Side::Sell => book.best_bid().map(|e| e.price),
            };
            let Some(reference_price) = reference_price else { continue };
            let result = adapter
                .place_market_order(unwind_side, quantity, reference_price, RetryMode::Aggressive)
                .await;
            if result.success {
                tracing::error!(venue = adapter.venue_name(), attempt, "unwind complete");
                self.notifier
                    .notify(NotificationLevel::Critical, &format!("emergency unwind complete on {}", adapter.venue_name()))
                    .await;
                return Ok(());
            }
        }

        let message = format!("unable to unwind residual leg on {}", adapter.venue_name());
        self.notifier.notify(NotificationLevel::Critical, &message).await;
        Err(ExecutorError::FatalUnwindFailure(message))
    }

    /// Fill-quantity reconciliation (`_balance_positions`): tops up the
    /// under-filled side to `target`, then trims the over-filled side by
    /// the excess if a mismatch remains. Returns the two final
    /// (possibly-adjusted) filled quantities.
    #[allow(clippy::too_many_arguments)]
    async fn balance_positions(
        &self,
        adapter_a: &dyn VenueAdapter,
        adapter_b: &dyn VenueAdapter,
        side_a: Side,
        side_b: Side,
        filled_a: Decimal,
        filled_b: Decimal,
        target: Decimal,
        reference_price_a: Decimal,
        reference_price_b: Decimal,
    ) -> Result<(Decimal, Decimal), ExecutorError> {
        let mut qty_a = filled_a;
        let mut qty_b = filled_b;

        if (qty_a - qty_b).abs() <= self.config.balance_tolerance {
            return Ok((qty_a, qty_b));
        }

        if qty_a < target.min(qty_b) {
            let delta = (qty_b.min(target) - qty_a).max(Decimal::ZERO);
            if !delta.is_zero() {
                let topped = adapter_a
                    .place_open_order(side_a, delta, reference_price_a, RetryMode::Aggressive, None)
                    .await;
                if topped.success {
                    qty_a += topped.filled_quantity.unwrap_or(delta);
                }
            }
        } else if qty_b < target.min(qty_a) {
            let delta = (qty_a.min(target) - qty_b).max(Decimal::ZERO);
            if !delta.is_zero() {
                let topped = adapter_b
                    .place_open_order(side_b, delta, reference_price_b, RetryMode::Aggressive, None)
                    .await;
                if topped.success {
                    qty_b += topped.filled_quantity.unwrap_or(delta);
                }
            }
        }

        if (qty_a - qty_b).abs() > self.config.balance_tolerance {
            if qty_a > qty_b {
                let excess = qty_a - qty_b;
                let trimmed = adapter_a
                    .place_open_order(side_a.opposite(), excess, reference_price_a, RetryMode::Aggressive, None)
                    .await;
                if trimmed.success {
                    qty_a -= trimmed.filled_quantity.unwrap_or(excess);
                }
            } else {
                let excess = qty_b - qty_a;
                let trimmed = adapter_b
                    .place_open_order(side_b.opposite(), excess, reference_price_b, RetryMode::Aggressive, None)
                    .await;
                if trimmed.success {
                    qty_b -= trimmed.filled_quantity.unwrap_or(excess);
                }
            }
        }

        Ok((qty_a, qty_b))
    }
}

fn leg_from_result(result: OrderResult) -> LegOutcome {
    LegOutcome {
        order_id: result.order_id,
        filled_price: result.filled_price.unwrap_or_default(),
        filled_quantity: result.filled_quantity.unwrap_or_default(),
        attempts: 1,
        place_duration_ms: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapters::sim::{ScriptedFill, SimAdapter};
    use rust_decimal_macros::dec;

    fn executor(a: Arc<SimAdapter>, b: Arc<SimAdapter>) -> OrderExecutor {
        OrderExecutor::new(a, b, Arc::new(crate::notifier::NoopNotifier))
    }

    #[tokio::test]
    async fn happy_path_both_legs_fill() {
        let a = Arc::new(SimAdapter::new("A", dec!(0.01)));
        let b = Arc::new(SimAdapter::new("B", dec!(0.01)));
        let exec = executor(a, b);
        let position = exec
            .execute_open(ExecuteOpenRequest {
                symbol: "SYM".into(),
                quantity: dec!(0.01),
                reference_price_a: dec!(100.10),
                reference_price_b: dec!(100.01),
                quote_id_a: None,
                quote_id_b: None,
                open_spread_pct: dec!(0.09),
                signal_time: None,
            })
            .await
            .unwrap();
        assert_eq!(position.quantity, dec!(0.01));
        assert_eq!(position.filled_entry_price_a, dec!(100.10));
        assert_eq!(position.filled_entry_price_b, dec!(100.01));
    }

    #[tokio::test]
    async fn both_legs_fail_on_open_skips_cycle() {
        let a = Arc::new(SimAdapter::new("A", dec!(0.01)));
        let b = Arc::new(SimAdapter::new("B", dec!(0.01)));
        a.script_next(ScriptedFill::Rejected { message: "no liquidity".into() });
        b.script_next(ScriptedFill::Rejected { message: "no liquidity".into() });
        let exec = executor(a, b);
        let result = exec
            .execute_open(ExecuteOpenRequest {
                symbol: "SYM".into(),
                quantity: dec!(0.01),
                reference_price_a: dec!(100.10),
                reference_price_b: dec!(100.01),
                quote_id_a: None,
                quote_id_b: None,
                open_spread_pct: dec!(0.09),
                signal_time: None,
            })
            .await;
        assert!(matches!(result, Err(ExecutorError::SkippedBothFailed)));
    }

    #[tokio::test]
    async fn partial_fill_on_a_tops_up_to_target() {
        let a = Arc::new(SimAdapter::new("A", dec!(0.01)));
        let b = Arc::new(SimAdapter::new("B", dec!(0.01)));
        a.script_next(ScriptedFill::Partial { price: dec!(100.10), filled_quantity: dec!(0.007) });
        // Top-up order on A fills the remaining 0.003.
        a.script_next(ScriptedFill::Filled { price: dec!(100.10), quantity: dec!(0.003) });
        b.script_next(ScriptedFill::Filled { price: dec!(100.01), quantity: dec!(0.01) });
        a.push_book(dec!(100.10), dec!(1), dec!(100.11), dec!(1));
        let exec = executor(a, b);
        let position = exec
            .execute_open(ExecuteOpenRequest {
                symbol: "SYM".into(),
                quantity: dec!(0.01),
                reference_price_a: dec!(100.10),
                reference_price_b: dec!(100.01),
                quote_id_a: None,
                quote_id_b: None,
                open_spread_pct: dec!(0.09),
                signal_time: None,
            })
            .await
            .unwrap();
        assert_eq!(position.quantity, dec!(0.01));
    }

    #[tokio::test]
    async fn single_leg_failure_unwinds_other_leg() {
        let a = Arc::new(SimAdapter::new("A", dec!(0.01)));
        let b = Arc::new(SimAdapter::new("B", dec!(0.01)));
        // A rejects on first attempt and on every subsequent retry.
        for _ in 0..5 {
            a.script_next(ScriptedFill::Rejected { message: "rejected".into() });
        }
        b.script_next(ScriptedFill::Filled { price: dec!(100.01), quantity: dec!(0.01) });
        b.push_book(dec!(100.00), dec!(1), dec!(100.01), dec!(1));
        let exec = executor(a, b);
        let result = exec
            .execute_open(ExecuteOpenRequest {
                symbol: "SYM".into(),
                quantity: dec!(0.01),
                reference_price_a: dec!(100.10),
                reference_price_b: dec!(100.01),
                quote_id_a: None,
                quote_id_b: None,
                open_spread_pct: dec!(0.09),
                signal_time: None,
            })
            .await;
        // Unwind succeeds (SimAdapter defaults to a fill once the script is exhausted).
        assert!(matches!(result, Err(ExecutorError::UnwoundAfterFailure)));
    }
}
