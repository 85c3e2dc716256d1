use std::time::Instant;

/// Monotonic time source for latency measurement and cooldown arithmetic.
/// Wall-clock timestamps (`chrono::DateTime<Utc>`) are used separately for
/// snapshot timestamps and log rows; interval math always goes through
/// this trait so tests can substitute a deterministic clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let t0 = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let t1 = clock.now();
        assert!(t1 > t0);
    }
}
