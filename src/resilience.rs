//! Rate limiting and retry policy shared by every provider call. One global
//! lookup stream with a minimum spacing between outbound requests: provider
//! usage policies, not throughput, set the pace here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};

const MIN_INTERVAL_FLOOR_MS: u64 = 50;

pub struct RateLimiter {
    min_interval_ms: AtomicU64,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms: AtomicU64::new(min_interval_ms.max(MIN_INTERVAL_FLOOR_MS)),
            last_tick: AsyncMutex::new(None),
        }
    }

    pub fn set_interval_ms(&self, min_interval_ms: u64) {
        self.min_interval_ms
            .store(min_interval_ms.max(MIN_INTERVAL_FLOOR_MS), Ordering::SeqCst);
    }

    pub fn interval_ms(&self) -> u64 {
        self.min_interval_ms.load(Ordering::SeqCst)
    }

    fn interval_duration(&self) -> Duration {
        Duration::from_millis(self.interval_ms())
    }

    pub async fn wait(&self) {
        let interval = self.interval_duration();
        let mut guard = self.last_tick.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                sleep(interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}

/// Linear backoff: attempt N sleeps N × base before the next try. Jitter is
/// layered on by the caller so the policy itself stays deterministic.
/// `max_retries` counts retries after the first attempt, so a call may go
/// out `max_retries + 1` times in total.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * attempt.max(1)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1_500))
    }
}
