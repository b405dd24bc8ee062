//! Token-bucket gate in front of rate-limited model calls

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Waiting token bucket.
///
/// Holds up to `burst` permits and refills one permit every `interval`. Unlike a
/// rejecting limiter, [`RateGate::acquire`] sleeps until a permit is available, so a
/// batch of calls is spread out instead of failing. A zero interval disables the gate.
pub struct RateGate {
    state: Option<Mutex<GateState>>,
    capacity: f64,
    interval: Duration,
}

struct GateState {
    tokens: f64,
    last_refill: Instant,
}

impl RateGate {
    pub fn new(interval: Duration, burst: u32) -> Self {
        let capacity = burst.max(1) as f64;
        let state = (!interval.is_zero()).then(|| {
            Mutex::new(GateState {
                tokens: capacity,
                last_refill: Instant::now(),
            })
        });
        Self {
            state,
            capacity,
            interval,
        }
    }

    /// A gate that never waits
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, 1)
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for and consume one permit
    pub async fn acquire(&self) {
        let Some(state) = &self.state else {
            return;
        };

        // Waiters queue on the lock, so permits are handed out in arrival order
        let mut guard = state.lock().await;
        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(guard.last_refill).as_secs_f64();
            guard.last_refill = now;
            guard.tokens =
                (guard.tokens + elapsed / self.interval.as_secs_f64()).min(self.capacity);

            if guard.tokens >= 1.0 {
                guard.tokens -= 1.0;
                return;
            }

            let wait = self.interval.mul_f64(1.0 - guard.tokens);
            log::debug!("Rate gate closed, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }
}
