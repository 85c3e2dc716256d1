use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Buy or sell, as submitted to a venue. `Side::Buy` increases exposure on
/// the venue it is submitted to; `Side::Sell` decreases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Pricing discipline for a single order submission. `Opportunistic` waits
/// for a passive or near-touch fill; `Aggressive` crosses the book to
/// guarantee immediate execution. See the adapter contract for the exact
/// offset semantics each venue applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    Opportunistic,
    Aggressive,
}

/// One price level: a price and the size resting at it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookEntry {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// A venue's order book as normalised by its adapter. Bids are ordered
/// descending by price, asks ascending. The core only ever reads the first
/// entry of each side; adapters may retain a deeper book internally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub venue: String,
    pub symbol: String,
    pub bids: Vec<OrderBookEntry>,
    pub asks: Vec<OrderBookEntry>,
    pub updated_at: DateTime<Utc>,
    /// Present only for RFQ/quote-id venues; must be echoed back on any
    /// order placed against this book.
    pub quote_id: Option<String>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<OrderBookEntry> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<OrderBookEntry> {
        self.asks.first().copied()
    }

    pub fn is_warm(&self) -> bool {
        !self.bids.is_empty() && !self.asks.is_empty()
    }
}

/// Outcome of one order submission. Every adapter place/cancel call returns
/// this; the executor never sees a raw venue response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub filled_price: Option<Decimal>,
    pub filled_quantity: Option<Decimal>,
    pub partial_fill: bool,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl OrderResult {
    pub fn failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        OrderResult {
            success: false,
            order_id: None,
            filled_price: None,
            filled_quantity: None,
            partial_fill: false,
            error_kind: Some(kind.into()),
            error_message: Some(message.into()),
        }
    }

    pub fn filled(order_id: impl Into<String>, price: Decimal, quantity: Decimal) -> Self {
        OrderResult {
            success: true,
            order_id: Some(order_id.into()),
            filled_price: Some(price),
            filled_quantity: Some(quantity),
            partial_fill: false,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn partially_filled(order_id: impl Into<String>, price: Decimal, quantity: Decimal) -> Self {
        OrderResult {
            success: true,
            order_id: Some(order_id.into()),
            filled_price: Some(price),
            filled_quantity: Some(quantity),
            partial_fill: true,
            error_kind: None,
            error_message: None,
        }
    }
}

/// Status of an order as reported by a venue's order-query endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected)
    }
}

/// Full order state as returned by `get_order_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub order_id: String,
    pub side: Side,
    pub requested_size: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub filled_size: Decimal,
    pub remaining_size: Decimal,
}

/// A signed-direction, bounded-size position snapshot at one venue, as
/// returned by `VenueAdapter::get_position`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub side: VenuePositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenuePositionSide {
    Long,
    Short,
    Neutral,
}

/// A synchronised pair of top-of-book reads from venue A and venue B,
/// produced by the price monitor and consumed by exactly one strategy
/// evaluation before being discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub symbol: String,
    pub venue_a: String,
    pub venue_b: String,

    pub bid_a: Decimal,
    pub ask_a: Decimal,
    pub bid_size_a: Decimal,
    pub ask_size_a: Decimal,
    pub timestamp_a: DateTime<Utc>,
    pub quote_id_a: Option<String>,

    pub bid_b: Decimal,
    pub ask_b: Decimal,
    pub bid_size_b: Decimal,
    pub ask_size_b: Decimal,
    pub timestamp_b: DateTime<Utc>,
    pub quote_id_b: Option<String>,
}

impl PriceSnapshot {
    /// `(bid_a − ask_b) / ask_b × 100` — the immediate profit of selling at
    /// A's bid and buying at B's ask.
    pub fn open_spread_pct(&self) -> Decimal {
        if self.ask_b.is_zero() {
            return Decimal::ZERO;
        }
        (self.bid_a - self.ask_b) / self.ask_b * Decimal::ONE_HUNDRED
    }

    /// `(bid_b − ask_a) / ask_a × 100` — the immediate profit of unwinding
    /// the hedge: selling at B's bid and buying at A's ask.
    pub fn close_spread_pct(&self) -> Decimal {
        if self.ask_a.is_zero() {
            return Decimal::ZERO;
        }
        (self.bid_b - self.ask_a) / self.ask_a * Decimal::ONE_HUNDRED
    }

    pub fn signal_age_a(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp_a
    }

    pub fn signal_age_b(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp_b
    }
}

/// Which direction a leg-pair moves the book: short-A/long-B (`OpenShort`)
/// is the carry trade this engine exists to run; the other three appear
/// when closing or, in accumulate mode, adding further increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionDirection {
    OpenShort,
    OpenLong,
    CloseShort,
    CloseLong,
}

impl PositionDirection {
    /// Signed step applied to `current_net_qty` in accumulate mode.
    pub fn net_qty_delta(self, step: Decimal) -> Decimal {
        match self {
            PositionDirection::OpenShort => -step,
            PositionDirection::OpenLong => step,
            PositionDirection::CloseShort => step,
            PositionDirection::CloseLong => -step,
        }
    }
}

/// One hedged position: a short leg at venue A and a long leg at venue B,
/// opened together and (eventually) closed together. Created only by a
/// successful `execute_open`; mutated only by `execute_close`.
///
/// Several fields are optional because they are populated by the
/// executor's timing instrumentation and are absent for positions
/// synthesised in monitor-only mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub venue_a: String,
    pub venue_b: String,

    pub signal_entry_price_a: Decimal,
    pub filled_entry_price_a: Decimal,
    pub signal_entry_price_b: Decimal,
    pub filled_entry_price_b: Decimal,
    pub entry_order_id_a: Option<String>,
    pub entry_order_id_b: Option<String>,

    pub signal_exit_price_a: Option<Decimal>,
    pub filled_exit_price_a: Option<Decimal>,
    pub signal_exit_price_b: Option<Decimal>,
    pub filled_exit_price_b: Option<Decimal>,
    pub exit_order_id_a: Option<String>,
    pub exit_order_id_b: Option<String>,

    pub open_spread_pct: Decimal,
    pub close_spread_pct: Option<Decimal>,

    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,

    /// Execution-latency fields: absent on monitor-only (virtual) positions.
    pub entry_delay_ms: Option<f64>,
    pub exit_delay_ms: Option<f64>,
    pub place_duration_a_ms: Option<f64>,
    pub place_duration_b_ms: Option<f64>,
    pub execution_duration_a_ms: Option<f64>,
    pub execution_duration_b_ms: Option<f64>,
    pub attempt_a: Option<u32>,
    pub attempt_b: Option<u32>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.filled_exit_price_a.is_none() && self.filled_exit_price_b.is_none()
    }

    /// Realised PnL percentage, computed the same way whether the fills
    /// are live executions or monitor-only synthesised prices:
    /// `open_spread_pct − close_spread_pct`, expressed against the B-leg
    /// entry price to match the source's normalisation.
    pub fn pnl_pct(&self) -> Option<Decimal> {
        let close_a = self.filled_exit_price_a?;
        let close_b = self.filled_exit_price_b?;
        if self.filled_entry_price_b.is_zero() {
            return Some(Decimal::ZERO);
        }
        let open_spread = self.filled_entry_price_a - self.filled_entry_price_b;
        let close_spread = close_a - close_b;
        let pnl = open_spread - close_spread;
        Some(pnl / self.filled_entry_price_b * Decimal::ONE_HUNDRED)
    }
}

/// Position-manager operating mode. Single-slot holds at most one open
/// Position; accumulate tracks a signed net quantity that may grow across
/// many leg-pairs up to `max_position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionMode {
    Single,
    Accumulate,
}

/// Snapshot of the position manager's internal state, useful for logging
/// and for `get_position_summary`-style diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionManagerState {
    pub mode: PositionMode,
    pub current_net_qty: Decimal,
    pub max_position: Decimal,
    pub position_step: Decimal,
    pub closed_count: usize,
}

/// Open or close, as decided by the strategy for one snapshot evaluation.
/// Transient: never persisted, exists only for the duration of one
/// strategy callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub signal_type: SignalType,
    pub symbol: String,
    pub spread_pct: Decimal,
    pub snapshot: PriceSnapshot,
    pub reason: String,
}
