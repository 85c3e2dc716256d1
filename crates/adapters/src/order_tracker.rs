use arb_core::OrderStatus;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

/// Single-waiter primitive for push-vs-poll races on order status. When the
/// core submits an order and then queries its status, it first checks a
/// cached terminal status (for the race where the WebSocket push arrives
/// before the query), then waits on a per-order-id notification with a
/// bounded timeout. Replaces the source's "sleep and poll a flag" loop
/// with an explicit one-shot channel per in-flight order id.
#[derive(Default)]
pub struct OrderTracker {
    cached: Mutex<HashMap<String, OrderStatus>>,
    waiters: Mutex<HashMap<String, oneshot::Sender<OrderStatus>>>,
}

pub enum StatusSource {
    Cache,
    Push,
    RestFallback,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the WebSocket push handler when a fill or status change
    /// arrives for `order_id`.
    pub fn notify(&self, order_id: &str, status: OrderStatus) {
        self.cached.lock().unwrap().insert(order_id.to_string(), status);
        if let Some(tx) = self.waiters.lock().unwrap().remove(order_id) {
            let _ = tx.send(status);
        }
    }

    /// Waits for a terminal status on `order_id`, checking the cache first
    /// to avoid missing a push that arrived before this call. Returns
    /// `None` on timeout so the caller can fall back to REST polling.
    pub async fn await_terminal_status(
        &self,
        order_id: &str,
        timeout: Duration,
    ) -> (Option<OrderStatus>, StatusSource) {
        if let Some(status) = self.cached.lock().unwrap().get(order_id).copied() {
            if status.is_terminal() {
                return (Some(status), StatusSource::Cache);
            }
        }

        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(order_id.to_string(), tx);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(status)) => (Some(status), StatusSource::Push),
            _ => {
                self.waiters.lock().unwrap().remove(order_id);
                (None, StatusSource::RestFallback)
            }
        }
    }

    pub fn forget(&self, order_id: &str) {
        self.cached.lock().unwrap().remove(order_id);
        self.waiters.lock().unwrap().remove(order_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cached_terminal_status_short_circuits() {
        let tracker = OrderTracker::new();
        tracker.notify("o1", OrderStatus::Filled);
        let (status, _) = tracker
            .await_terminal_status("o1", Duration::from_millis(50))
            .await;
        assert_eq!(status, Some(OrderStatus::Filled));
    }

    #[tokio::test]
    async fn push_arrives_while_waiting() {
        let tracker = std::sync::Arc::new(OrderTracker::new());
        let t2 = tracker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            t2.notify("o2", OrderStatus::Filled);
        });
        let (status, _) = tracker
            .await_terminal_status("o2", Duration::from_millis(200))
            .await;
        assert_eq!(status, Some(OrderStatus::Filled));
    }

    #[tokio::test]
    async fn times_out_when_nothing_arrives() {
        let tracker = OrderTracker::new();
        let (status, _) = tracker
            .await_terminal_status("o3", Duration::from_millis(20))
            .await;
        assert_eq!(status, None);
    }
}
