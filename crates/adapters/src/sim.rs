//! In-memory adapter used by tests and by the strategy's monitor-only
//! mode. Lets a test script push order-book updates and script the
//! outcome of the next N order placements (fill, partial fill, reject),
//! which is how the executor's retry/reconciliation/unwind paths are
//! exercised without a real venue.

use crate::{round_half_up, OrderBookCallback, VenueAdapter, VenueMetadata};
use arb_core::{
    AdapterError, OrderBook, OrderBookEntry, OrderInfo, OrderResult, OrderStatus, RetryMode, Side,
    VenuePosition,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// One scripted outcome for the next order placed against a `SimAdapter`.
#[derive(Debug, Clone)]
pub enum ScriptedFill {
    Filled { price: Decimal, quantity: Decimal },
    Partial { price: Decimal, filled_quantity: Decimal },
    Rejected { message: String },
}

pub struct SimAdapter {
    venue: String,
    tick_size: Decimal,
    book: Mutex<Option<OrderBook>>,
    callback: Mutex<Option<OrderBookCallback>>,
    script: Mutex<VecDeque<ScriptedFill>>,
    next_order_id: AtomicU64,
    placed_orders: Mutex<Vec<(String, Side, Decimal, Decimal)>>,
}

impl SimAdapter {
    pub fn new(venue: impl Into<String>, tick_size: Decimal) -> Self {
        SimAdapter {
            venue: venue.into(),
            tick_size,
            book: Mutex::new(None),
            callback: Mutex::new(None),
            script: Mutex::new(VecDeque::new()),
            next_order_id: AtomicU64::new(1),
            placed_orders: Mutex::new(Vec::new()),
        }
    }

    /// Pushes a new top-of-book reading, notifying the subscriber if one
    /// has been registered.
    pub fn push_book(&self, bid: Decimal, bid_size: Decimal, ask: Decimal, ask_size: Decimal) {
        let book = OrderBook {
            venue: self.venue.clone(),
            symbol: "SIM".to_string(),
            bids: vec![OrderBookEntry { price: bid, quantity: bid_size }],
            asks: vec![OrderBookEntry { price: ask, quantity: ask_size }],
            updated_at: Utc::now(),
            quote_id: None,
        };
        *self.book.lock().unwrap() = Some(book.clone());
        if let Some(cb) = self.callback.lock().unwrap().as_ref() {
            cb(book);
        }
    }

    /// Queues the outcome of the next `place_*_order` call. Consumed
    /// first-in-first-out; once the queue is empty, orders default to a
    /// full fill at the reference price.
    pub fn script_next(&self, outcome: ScriptedFill) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn placed_orders(&self) -> Vec<(String, Side, Decimal, Decimal)> {
        self.placed_orders.lock().unwrap().clone()
    }

    fn next_order_id(&self) -> String {
        format!("sim-{}", self.next_order_id.fetch_add(1, Ordering::SeqCst))
    }

    fn submit(&self, side: Side, quantity: Decimal, reference_price: Decimal) -> OrderResult {
        let order_id = self.next_order_id();
        let outcome = self.script.lock().unwrap().pop_front();
        let result = match outcome {
            None => OrderResult::filled(order_id.clone(), reference_price, quantity),
            Some(ScriptedFill::Filled { price, quantity }) => {
                OrderResult::filled(order_id.clone(), price, quantity)
            }
            Some(ScriptedFill::Partial { price, filled_quantity }) => {
                OrderResult::partially_filled(order_id.clone(), price, filled_quantity)
            }
            Some(ScriptedFill::Rejected { message }) => {
                OrderResult::failure("OrderRejected", message)
            }
        };
        self.placed_orders
            .lock()
            .unwrap()
            .push((order_id, side, quantity, reference_price));
        result
    }
}

#[async_trait]
impl VenueAdapter for SimAdapter {
    fn venue_name(&self) -> &str {
        &self.venue
    }

    async fn connect(&self) -> Result<VenueMetadata, AdapterError> {
        Ok(VenueMetadata {
            contract_id: format!("{}-SIM", self.venue),
            tick_size: self.tick_size,
            min_order_size: Decimal::new(1, 3),
        })
    }

    async fn disconnect(&self) {
        *self.callback.lock().unwrap() = None;
    }

    async fn subscribe_orderbook(&self, callback: OrderBookCallback) -> Result<(), AdapterError> {
        *self.callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    fn get_latest_orderbook(&self) -> Option<OrderBook> {
        self.book.lock().unwrap().clone()
    }

    async fn place_open_order(
        &self,
        side: Side,
        quantity: Decimal,
        reference_price: Decimal,
        _retry_mode: RetryMode,
        _quote_id: Option<String>,
    ) -> OrderResult {
        self.submit(side, quantity, reference_price)
    }

    async fn place_close_order(
        &self,
        side: Side,
        quantity: Decimal,
        reference_price: Decimal,
        _retry_mode: RetryMode,
        _quote_id: Option<String>,
    ) -> OrderResult {
        self.submit(side, quantity, reference_price)
    }

    async fn place_market_order(
        &self,
        side: Side,
        quantity: Decimal,
        reference_price: Decimal,
        _retry_mode: RetryMode,
    ) -> OrderResult {
        self.submit(side, quantity, reference_price)
    }

    async fn cancel_order(&self, order_id: &str) -> OrderResult {
        OrderResult::failure("Unsupported", format!("sim adapter cannot cancel {order_id}"))
    }

    async fn get_order_info(&self, order_id: &str) -> Result<OrderInfo, AdapterError> {
        Ok(OrderInfo {
            order_id: order_id.to_string(),
            side: Side::Buy,
            requested_size: Decimal::ZERO,
            price: Decimal::ZERO,
            status: OrderStatus::Filled,
            filled_size: Decimal::ZERO,
            remaining_size: Decimal::ZERO,
        })
    }

    async fn get_position(&self, _symbol: &str) -> Result<Option<VenuePosition>, AdapterError> {
        Ok(None)
    }

    fn round_to_tick(&self, price: Decimal) -> Decimal {
        round_half_up(price, self.tick_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn default_fill_uses_reference_price() {
        let adapter = SimAdapter::new("A", dec!(0.01));
        let result = adapter
            .place_open_order(Side::Sell, dec!(0.01), dec!(100.10), RetryMode::Opportunistic, None)
            .await;
        assert!(result.success);
        assert_eq!(result.filled_price, Some(dec!(100.10)));
        assert_eq!(result.filled_quantity, Some(dec!(0.01)));
    }

    #[tokio::test]
    async fn scripted_rejection_surfaces_as_failure() {
        let adapter = SimAdapter::new("A", dec!(0.01));
        adapter.script_next(ScriptedFill::Rejected { message: "no liquidity".into() });
        let result = adapter
            .place_open_order(Side::Sell, dec!(0.01), dec!(100.10), RetryMode::Opportunistic, None)
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn push_book_invokes_subscriber() {
        let adapter = SimAdapter::new("A", dec!(0.01));
        let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        let seen2 = seen.clone();
        adapter
            .subscribe_orderbook(std::sync::Arc::new(move |book| {
                *seen2.lock().unwrap() = Some(book);
            }))
            .await
            .unwrap();
        adapter.push_book(dec!(100.0), dec!(1), dec!(100.1), dec!(1));
        assert!(seen.lock().unwrap().is_some());
    }
}
