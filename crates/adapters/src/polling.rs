//! Polling BBO adapter (venue A type, §4.1 flavour 2): no order-book
//! WebSocket is offered, so the adapter polls a REST best-bid/offer
//! endpoint at a fixed cadence and synthesises a single-level book.
//! Grounded on the teacher's `trader/binance/price_feed.rs` REST-fallback
//! path and `arbitrage/binance_trader.rs`'s signed-REST-call shape.

use crate::order_tracker::OrderTracker;
use crate::{aggressive_price, round_half_up, OrderBookCallback, VenueAdapter, VenueMetadata};
use arb_core::{
    AdapterError, OrderBook, OrderBookEntry, OrderInfo, OrderResult, OrderStatus, RetryMode, Side,
    VenuePosition,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// The venue-specific REST surface a `PollingBboAdapter` drives. Each real
/// venue implements this against its own signing scheme; the adapter
/// itself only knows the normalised contract.
#[async_trait]
pub trait PollingRestClient: Send + Sync {
    async fn fetch_bbo(
        &self,
        symbol: &str,
    ) -> Result<(Decimal, Decimal, Decimal, Decimal), AdapterError>;

    async fn discover_metadata(&self, symbol: &str) -> Result<VenueMetadata, AdapterError>;

    async fn submit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> OrderResult;

    async fn cancel(&self, order_id: &str) -> OrderResult;

    async fn order_info(&self, order_id: &str) -> Result<OrderInfo, AdapterError>;

    async fn position(&self, symbol: &str) -> Result<Option<VenuePosition>, AdapterError>;
}

/// State shared between the adapter handle and its background poll task.
/// Held behind an `Arc` so `subscribe_orderbook(&self, ..)` can spawn a
/// task with its own owning reference, the same shape as the teacher's
/// `BinancePriceFeed { price_state: Arc<RwLock<..>> }`.
struct Shared<C: PollingRestClient> {
    venue: String,
    symbol: String,
    client: C,
    poll_interval: Duration,
    book: Mutex<Option<OrderBook>>,
    metadata: Mutex<Option<VenueMetadata>>,
    tracker: OrderTracker,
    stop_tx: watch::Sender<bool>,
}

impl<C: PollingRestClient> Shared<C> {
    fn tick_size(&self) -> Decimal {
        self.metadata.lock().unwrap().as_ref().map(|m| m.tick_size).unwrap_or(Decimal::ZERO)
    }
}

pub struct PollingBboAdapter<C: PollingRestClient> {
    shared: Arc<Shared<C>>,
    stop_rx: watch::Receiver<bool>,
}

impl<C: PollingRestClient + 'static> PollingBboAdapter<C> {
    pub fn new(venue: impl Into<String>, symbol: impl Into<String>, client: C) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        PollingBboAdapter {
            shared: Arc::new(Shared {
                venue: venue.into(),
                symbol: symbol.into(),
                client,
                poll_interval: Duration::from_millis(500),
                book: Mutex::new(None),
                metadata: Mutex::new(None),
                tracker: OrderTracker::new(),
                stop_tx,
            }),
            stop_rx,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        Arc::get_mut(&mut self.shared)
            .expect("with_poll_interval must run before cloning/subscribing")
            .poll_interval = interval;
        self
    }
}

#[async_trait]
impl<C: PollingRestClient + 'static> VenueAdapter for PollingBboAdapter<C> {
    fn venue_name(&self) -> &str {
        &self.shared.venue
    }

    async fn connect(&self) -> Result<VenueMetadata, AdapterError> {
        let metadata = self.shared.client.discover_metadata(&self.shared.symbol).await?;
        *self.shared.metadata.lock().unwrap() = Some(metadata.clone());

        let (bid, bid_size, ask, ask_size) =
            self.shared.client.fetch_bbo(&self.shared.symbol).await?;
        *self.shared.book.lock().unwrap() = Some(OrderBook {
            venue: self.shared.venue.clone(),
            symbol: self.shared.symbol.clone(),
            bids: vec![OrderBookEntry { price: bid, quantity: bid_size }],
            asks: vec![OrderBookEntry { price: ask, quantity: ask_size }],
            updated_at: Utc::now(),
            quote_id: None,
        });

        Ok(metadata)
    }

    async fn disconnect(&self) {
        let _ = self.shared.stop_tx.send(true);
    }

    async fn subscribe_orderbook(&self, callback: OrderBookCallback) -> Result<(), AdapterError> {
        let shared = self.shared.clone();
        let mut stop_rx = self.stop_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.poll_interval);
            let mut last_emitted: Option<(Decimal, Decimal)> = None;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => break,
                }
                if *stop_rx.borrow() {
                    break;
                }
                match shared.client.fetch_bbo(&shared.symbol).await {
                    Ok((bid, bid_size, ask, ask_size)) => {
                        if last_emitted == Some((bid, ask)) {
                            continue;
                        }
                        last_emitted = Some((bid, ask));
                        let book = OrderBook {
                            venue: shared.venue.clone(),
                            symbol: shared.symbol.clone(),
                            bids: vec![OrderBookEntry { price: bid, quantity: bid_size }],
                            asks: vec![OrderBookEntry { price: ask, quantity: ask_size }],
                            updated_at: Utc::now(),
                            quote_id: None,
                        };
                        *shared.book.lock().unwrap() = Some(book.clone());
                        callback(book);
                    }
                    Err(err) => {
                        tracing::warn!(venue = %shared.venue, %err, "bbo poll failed");
                    }
                }
            }
        });
        Ok(())
    }

    fn get_latest_orderbook(&self) -> Option<OrderBook> {
        self.shared.book.lock().unwrap().clone()
    }

    async fn place_open_order(
        &self,
        side: Side,
        quantity: Decimal,
        reference_price: Decimal,
        retry_mode: RetryMode,
        _quote_id: Option<String>,
    ) -> OrderResult {
        let tick = self.shared.tick_size();
        let price = match retry_mode {
            RetryMode::Opportunistic => round_half_up(reference_price, tick),
            RetryMode::Aggressive => aggressive_price(reference_price, side, tick),
        };
        let result = self.shared.client.submit_order(&self.shared.symbol, side, quantity, price).await;
        if let Some(id) = &result.order_id {
            if result.success && !result.partial_fill {
                self.shared.tracker.notify(id, OrderStatus::Filled);
            }
        }
        result
    }

    async fn place_close_order(
        &self,
        side: Side,
        quantity: Decimal,
        reference_price: Decimal,
        retry_mode: RetryMode,
        quote_id: Option<String>,
    ) -> OrderResult {
        self.place_open_order(side, quantity, reference_price, retry_mode, quote_id).await
    }

    async fn place_market_order(
        &self,
        side: Side,
        quantity: Decimal,
        reference_price: Decimal,
        retry_mode: RetryMode,
    ) -> OrderResult {
        self.place_open_order(side, quantity, reference_price, retry_mode, None).await
    }

    async fn cancel_order(&self, order_id: &str) -> OrderResult {
        self.shared.client.cancel(order_id).await
    }

    async fn get_order_info(&self, order_id: &str) -> Result<OrderInfo, AdapterError> {
        let (_status, _source) = self
            .shared
            .tracker
            .await_terminal_status(order_id, Duration::from_secs(1))
            .await;
        self.shared.client.order_info(order_id).await
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<VenuePosition>, AdapterError> {
        self.shared.client.position(symbol).await
    }

    fn round_to_tick(&self, price: Decimal) -> Decimal {
        round_half_up(price, self.shared.tick_size())
    }
}
