//! Price monitor (C2): holds references to exactly two adapters, caches
//! each side's latest book, and emits synchronised `PriceSnapshot`s to
//! subscribers. Only the trigger venue's updates fire an emission; the
//! other side's cache is sampled at that instant. No freshness join is
//! performed — the strategy is responsible for staleness gating.

use adapters::VenueAdapter;
use arb_core::{OrderBook, PriceSnapshot};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Which venue's book updates drive snapshot emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerVenue {
    A,
    B,
}

pub type SnapshotCallback = Arc<dyn Fn(PriceSnapshot) + Send + Sync>;

#[derive(Debug, Default, Clone)]
struct VenueStats {
    update_count: u64,
    last_update: Option<DateTime<Utc>>,
}

struct Cache {
    book_a: Option<OrderBook>,
    book_b: Option<OrderBook>,
    stats_a: VenueStats,
    stats_b: VenueStats,
    last_emitted: Option<DateTime<Utc>>,
}

/// Subscribes to two adapters and emits `PriceSnapshot`s whenever the
/// trigger venue updates and both sides are warm, rate-limited to one
/// emission per `min_callback_interval`.
pub struct PriceMonitor {
    symbol: String,
    venue_a_name: String,
    venue_b_name: String,
    trigger: TriggerVenue,
    min_callback_interval: Duration,
    staleness_warn_threshold: Duration,
    cache: Arc<Mutex<Cache>>,
    subscribers: Arc<RwLock<Vec<SnapshotCallback>>>,
}

impl PriceMonitor {
    pub fn new(
        symbol: impl Into<String>,
        venue_a_name: impl Into<String>,
        venue_b_name: impl Into<String>,
        trigger: TriggerVenue,
    ) -> Self {
        PriceMonitor {
            symbol: symbol.into(),
            venue_a_name: venue_a_name.into(),
            venue_b_name: venue_b_name.into(),
            trigger,
            min_callback_interval: Duration::from_millis(100),
            staleness_warn_threshold: Duration::from_secs(30),
            cache: Arc::new(Mutex::new(Cache {
                book_a: None,
                book_b: None,
                stats_a: VenueStats::default(),
                stats_b: VenueStats::default(),
                last_emitted: None,
            })),
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_min_callback_interval(mut self, interval: Duration) -> Self {
        self.min_callback_interval = interval;
        self
    }

    pub fn with_staleness_warn_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_warn_threshold = threshold;
        self
    }

    pub fn subscribe(&self, callback: SnapshotCallback) {
        self.subscribers.write().unwrap().push(callback);
    }

    pub fn unsubscribe_all(&self) {
        self.subscribers.write().unwrap().clear();
    }

    /// Wires both adapters' `subscribe_orderbook` callbacks into this
    /// monitor's cache-and-emit logic. Spawns the background staleness
    /// health task.
    pub async fn attach(
        &self,
        adapter_a: Arc<dyn VenueAdapter>,
        adapter_b: Arc<dyn VenueAdapter>,
    ) -> Result<(), arb_core::AdapterError> {
        let cache = self.cache.clone();
        let subscribers = self.subscribers.clone();
        let trigger = self.trigger;
        let symbol = self.symbol.clone();
        let venue_a_name = self.venue_a_name.clone();
        let venue_b_name = self.venue_b_name.clone();
        let min_interval = self.min_callback_interval;

        {
            let cache = cache.clone();
            let subscribers = subscribers.clone();
            let symbol = symbol.clone();
            let venue_a_name = venue_a_name.clone();
            let venue_b_name = venue_b_name.clone();
            adapter_a
                .subscribe_orderbook(Arc::new(move |book| {
                    on_book_update(
                        &cache,
                        &subscribers,
                        trigger,
                        TriggerVenue::A,
                        &symbol,
                        &venue_a_name,
                        &venue_b_name,
                        book,
                        min_interval,
                    )
                }))
                .await?;
        }

        adapter_b
            .subscribe_orderbook(Arc::new(move |book| {
                on_book_update(
                    &cache,
                    &subscribers,
                    trigger,
                    TriggerVenue::B,
                    &symbol,
                    &venue_a_name,
                    &venue_b_name,
                    book,
                    min_interval,
                )
            }))
            .await?;

        self.spawn_health_task();
        Ok(())
    }

    fn spawn_health_task(&self) {
        let cache = self.cache.clone();
        let venue_a_name = self.venue_a_name.clone();
        let venue_b_name = self.venue_b_name.clone();
        let threshold = self.staleness_warn_threshold;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                let now = Utc::now();
                let cache = cache.lock().unwrap();
                warn_if_stale(&venue_a_name, cache.stats_a.last_update, now, threshold);
                warn_if_stale(&venue_b_name, cache.stats_b.last_update, now, threshold);
            }
        });
    }

    /// Age of venue A's cached book relative to `now`; `None` if no book
    /// has been received yet.
    pub fn book_age_a(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.cache.lock().unwrap().stats_a.last_update.map(|t| now - t)
    }

    pub fn book_age_b(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.cache.lock().unwrap().stats_b.last_update.map(|t| now - t)
    }

    /// Synchronous predicate the strategy consults before acting: true if
    /// either venue's cached book is older than `max_age`, or if either
    /// side has not received a book yet.
    pub fn is_orderbook_stale(&self, max_age: chrono::Duration) -> bool {
        let now = Utc::now();
        match (self.book_age_a(now), self.book_age_b(now)) {
            (Some(a), Some(b)) => a > max_age || b > max_age,
            _ => true,
        }
    }

    pub fn update_count_a(&self) -> u64 {
        self.cache.lock().unwrap().stats_a.update_count
    }

    pub fn update_count_b(&self) -> u64 {
        self.cache.lock().unwrap().stats_b.update_count
    }
}

fn warn_if_stale(
    venue: &str,
    last_update: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: Duration,
) {
    match last_update {
        None => tracing::warn!(venue, "no book received yet"),
        Some(t) => {
            let age = now - t;
            if age.num_milliseconds() as u128 > threshold.as_millis() {
                tracing::warn!(venue, age_ms = age.num_milliseconds(), "order book stale");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn on_book_update(
    cache: &Arc<Mutex<Cache>>,
    subscribers: &Arc<RwLock<Vec<SnapshotCallback>>>,
    trigger: TriggerVenue,
    source: TriggerVenue,
    symbol: &str,
    venue_a_name: &str,
    venue_b_name: &str,
    book: OrderBook,
    min_interval: Duration,
) {
    let now = Utc::now();
    let maybe_snapshot = {
        let mut cache = cache.lock().unwrap();
        match source {
            TriggerVenue::A => {
                cache.book_a = Some(book);
                cache.stats_a.update_count += 1;
                cache.stats_a.last_update = Some(now);
            }
            TriggerVenue::B => {
                cache.book_b = Some(book);
                cache.stats_b.update_count += 1;
                cache.stats_b.last_update = Some(now);
            }
        }

        if source != trigger {
            return;
        }

        let (Some(book_a), Some(book_b)) = (cache.book_a.clone(), cache.book_b.clone()) else {
            return;
        };
        if !book_a.is_warm() || !book_b.is_warm() {
            return;
        }

        if let Some(last) = cache.last_emitted {
            if (now - last).num_milliseconds() as u128 <= min_interval.as_millis() {
                return;
            }
        }
        cache.last_emitted = Some(now);

        let best_a = book_a.best_bid().zip(book_a.best_ask());
        let best_b = book_b.best_bid().zip(book_b.best_ask());
        let (Some((bid_a, ask_a)), Some((bid_b, ask_b))) = (best_a, best_b) else {
            return;
        };

        Some(PriceSnapshot {
            symbol: symbol.to_string(),
            venue_a: venue_a_name.to_string(),
            venue_b: venue_b_name.to_string(),
            bid_a: bid_a.price,
            ask_a: ask_a.price,
            bid_size_a: bid_a.quantity,
            ask_size_a: ask_a.quantity,
            timestamp_a: book_a.updated_at,
            quote_id_a: book_a.quote_id.clone(),
            bid_b: bid_b.price,
            ask_b: ask_b.price,
            bid_size_b: bid_b.quantity,
            ask_size_b: ask_b.quantity,
            timestamp_b: book_b.updated_at,
            quote_id_b: book_b.quote_id.clone(),
        })
    };

    if let Some(snapshot) = maybe_snapshot {
        for subscriber in subscribers.read().unwrap().iter() {
            subscriber(snapshot.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapters::sim::SimAdapter;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn no_emission_until_both_sides_warm() {
        let monitor = PriceMonitor::new("SYM", "A", "B", TriggerVenue::A)
            .with_min_callback_interval(Duration::from_millis(0));
        let a = Arc::new(SimAdapter::new("A", dec!(0.01)));
        let b = Arc::new(SimAdapter::new("B", dec!(0.01)));
        monitor.attach(a.clone(), b.clone()).await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        monitor.subscribe(Arc::new(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        }));

        a.push_book(dec!(100.0), dec!(1), dec!(100.1), dec!(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn trigger_venue_fires_snapshot_once_both_warm() {
        let monitor = PriceMonitor::new("SYM", "A", "B", TriggerVenue::A)
            .with_min_callback_interval(Duration::from_millis(0));
        let a = Arc::new(SimAdapter::new("A", dec!(0.01)));
        let b = Arc::new(SimAdapter::new("B", dec!(0.01)));
        monitor.attach(a.clone(), b.clone()).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        monitor.subscribe(Arc::new(move |snap: PriceSnapshot| {
            seen2.lock().unwrap().push(snap);
        }));

        b.push_book(dec!(100.00), dec!(1), dec!(100.01), dec!(1));
        a.push_book(dec!(100.10), dec!(1), dec!(100.11), dec!(1));
        assert_eq!(seen.lock().unwrap().len(), 1);

        // Non-trigger venue update does not re-fire.
        b.push_book(dec!(99.00), dec!(1), dec!(99.01), dec!(1));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn is_orderbook_stale_true_before_both_sides_seen() {
        let monitor = PriceMonitor::new("SYM", "A", "B", TriggerVenue::A);
        assert!(monitor.is_orderbook_stale(chrono::Duration::seconds(30)));
    }
}
