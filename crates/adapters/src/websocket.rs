//! WebSocket snapshot + delta adapter (venue B type, §4.1 flavour 1): the
//! first frame is a full book, subsequent frames are deltas, and a size of
//! zero removes a level. The adapter tracks a sequence offset; on a gap it
//! discards deltas until the next snapshot arrives. Grounded on
//! `original_source/arbitrage/exchanges/lighter_adapter.py`'s
//! snapshot-then-delta handling and the teacher's `Arc<RwLock<..>>`
//! shared-cache shape (`trader/binance/price_feed.rs`).

use crate::order_tracker::OrderTracker;
use crate::{aggressive_price, round_half_up, OrderBookCallback, VenueAdapter, VenueMetadata};
use arb_core::{
    AdapterError, OrderBook, OrderBookEntry, OrderInfo, OrderResult, OrderStatus, RetryMode, Side,
    VenuePosition,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// One frame of the book feed as the venue-specific client decodes it off
/// the wire. `sequence` must be monotone within a connection; a gap
/// (`sequence != last_seen + 1`) forces a rebuild from the next snapshot.
#[derive(Debug, Clone)]
pub enum BookFrame {
    Snapshot { sequence: u64, bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)> },
    Delta { sequence: u64, bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)> },
}

/// The venue-specific WebSocket + REST surface a `WsSnapshotDeltaAdapter`
/// drives.
#[async_trait]
pub trait WsFeedClient: Send + Sync {
    /// Opens the book stream for `symbol`, returning a channel of decoded
    /// frames. Reconnection on socket drop is this client's
    /// responsibility; it should keep pushing frames (starting with a
    /// fresh `Snapshot`) for the adapter's lifetime.
    async fn connect_stream(&self, symbol: &str) -> Result<mpsc::Receiver<BookFrame>, AdapterError>;

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

/// Full-depth book maintained from snapshot + deltas. Bids keyed
/// descending, asks ascending; a zero-size delta level is removed.
struct BookState {
    sequence: Option<u64>,
    rebuilding: bool,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl BookState {
    fn new() -> Self {
        BookState { sequence: None, rebuilding: true, bids: BTreeMap::new(), asks: BTreeMap::new() }
    }

    fn apply(&mut self, frame: BookFrame) -> bool {
        match frame {
            BookFrame::Snapshot { sequence, bids, asks } => {
                self.bids.clear();
                self.asks.clear();
                for (price, qty) in bids {
                    self.bids.insert(price, qty);
                }
                for (price, qty) in asks {
                    self.asks.insert(price, qty);
                }
                self.sequence = Some(sequence);
                self.rebuilding = false;
                true
            }
            BookFrame::Delta { sequence, bids, asks } => {
                if self.rebuilding {
                    return false;
                }
                let expected = self.sequence.map(|s| s + 1);
                if expected != Some(sequence) {
                    tracing::warn!(sequence, expected = ?expected, "book sequence gap, rebuilding");
                    self.rebuilding = true;
                    self.bids.clear();
                    self.asks.clear();
                    self.sequence = None;
                    return false;
                }
                for (price, qty) in bids {
                    if qty.is_zero() {
                        self.bids.remove(&price);
                    } else {
                        self.bids.insert(price, qty);
                    }
                }
                for (price, qty) in asks {
                    if qty.is_zero() {
                        self.asks.remove(&price);
                    } else {
                        self.asks.insert(price, qty);
                    }
                }
                self.sequence = Some(sequence);
                true
            }
        }
    }

    fn to_order_book(&self, venue: &str, symbol: &str) -> OrderBook {
        OrderBook {
            venue: venue.to_string(),
            symbol: symbol.to_string(),
            bids: self
                .bids
                .iter()
                .rev()
                .map(|(price, quantity)| OrderBookEntry { price: *price, quantity: *quantity })
                .collect(),
            asks: self
                .asks
                .iter()
                .map(|(price, quantity)| OrderBookEntry { price: *price, quantity: *quantity })
                .collect(),
            updated_at: Utc::now(),
            quote_id: None,
        }
    }
}

struct Shared<C: WsFeedClient> {
    venue: String,
    symbol: String,
    client: C,
    state: Mutex<BookState>,
    latest_top: Mutex<Option<OrderBook>>,
    metadata: Mutex<Option<VenueMetadata>>,
    tracker: OrderTracker,
    stop_tx: watch::Sender<bool>,
}

impl<C: WsFeedClient> Shared<C> {
    fn tick_size(&self) -> Decimal {
        self.metadata.lock().unwrap().as_ref().map(|m| m.tick_size).unwrap_or(Decimal::ZERO)
    }
}

pub struct WsSnapshotDeltaAdapter<C: WsFeedClient> {
    shared: Arc<Shared<C>>,
    stop_rx: watch::Receiver<bool>,
}

impl<C: WsFeedClient + 'static> WsSnapshotDeltaAdapter<C> {
    pub fn new(venue: impl Into<String>, symbol: impl Into<String>, client: C) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        WsSnapshotDeltaAdapter {
            shared: Arc::new(Shared {
                venue: venue.into(),
                symbol: symbol.into(),
                client,
                state: Mutex::new(BookState::new()),
                latest_top: Mutex::new(None),
                metadata: Mutex::new(None),
                tracker: OrderTracker::new(),
                stop_tx,
            }),
            stop_rx,
        }
    }
}

#[async_trait]
impl<C: WsFeedClient + 'static> VenueAdapter for WsSnapshotDeltaAdapter<C> {
    fn venue_name(&self) -> &str {
        &self.shared.venue
    }

    async fn connect(&self) -> Result<VenueMetadata, AdapterError> {
        let metadata = self.shared.client.discover_metadata(&self.shared.symbol).await?;
        *self.shared.metadata.lock().unwrap() = Some(metadata.clone());
        Ok(metadata)
    }

    async fn disconnect(&self) {
        let _ = self.shared.stop_tx.send(true);
    }

    async fn subscribe_orderbook(&self, callback: OrderBookCallback) -> Result<(), AdapterError> {
        let mut frames = self.shared.client.connect_stream(&self.shared.symbol).await?;
        let shared = self.shared.clone();
        let mut stop_rx = self.stop_rx.clone();
        tokio::spawn(async move {
            let mut last_top: Option<(Decimal, Decimal)> = None;
            loop {
                let frame = tokio::select! {
                    frame = frames.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                    _ = stop_rx.changed() => break,
                };
                if *stop_rx.borrow() {
                    break;
                }
                let applied = {
                    let mut state = shared.state.lock().unwrap();
                    state.apply(frame)
                };
                if !applied {
                    continue;
                }
                let book = {
                    let state = shared.state.lock().unwrap();
                    state.to_order_book(&shared.venue, &shared.symbol)
                };
                if !book.is_warm() {
                    continue;
                }
                let top = (book.bids[0].price, book.asks[0].price);
                if last_top == Some(top) {
                    continue;
                }
                last_top = Some(top);
                *shared.latest_top.lock().unwrap() = Some(book.clone());
                callback(book);
            }
        });
        Ok(())
    }

    fn get_latest_orderbook(&self) -> Option<OrderBook> {
        self.shared.latest_top.lock().unwrap().clone()
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

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn delta_removes_zero_size_level() {
        let mut state = BookState::new();
        state.apply(BookFrame::Snapshot {
            sequence: 1,
            bids: vec![(dec!(100.0), dec!(1.0))],
            asks: vec![(dec!(100.1), dec!(1.0))],
        });
        state.apply(BookFrame::Delta {
            sequence: 2,
            bids: vec![(dec!(100.0), Decimal::ZERO)],
            asks: vec![],
        });
        assert!(state.bids.is_empty());
    }

    #[test]
    fn sequence_gap_forces_rebuild() {
        let mut state = BookState::new();
        state.apply(BookFrame::Snapshot {
            sequence: 1,
            bids: vec![(dec!(100.0), dec!(1.0))],
            asks: vec![(dec!(100.1), dec!(1.0))],
        });
        let applied = state.apply(BookFrame::Delta {
            sequence: 5,
            bids: vec![(dec!(99.9), dec!(2.0))],
            asks: vec![],
        });
        assert!(!applied);
        assert!(state.rebuilding);
        // subsequent deltas are discarded until the next snapshot
        let applied2 = state.apply(BookFrame::Delta {
            sequence: 6,
            bids: vec![(dec!(99.8), dec!(1.0))],
            asks: vec![],
        });
        assert!(!applied2);
        let applied3 = state.apply(BookFrame::Snapshot {
            sequence: 7,
            bids: vec![(dec!(99.0), dec!(1.0))],
            asks: vec![(dec!(99.1), dec!(1.0))],
        });
        assert!(applied3);
        assert!(!state.rebuilding);
    }
}
