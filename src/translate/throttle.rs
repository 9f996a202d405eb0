use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Spaces out request starts across all workers.
///
/// Each caller waits until at least `min_interval` (plus up to 10% jitter)
/// has passed since the previous request began.
#[derive(Debug)]
pub struct RequestThrottle {
    min_interval: Duration,
    jitter_ratio: f64,
    last_request: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            jitter_ratio: 0.1,
            last_request: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    fn interval_with_jitter(&self) -> Duration {
        if self.min_interval.is_zero() {
            return Duration::ZERO;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
        self.min_interval.mul_f64(1.0 + jitter)
    }

    pub async fn wait(&self) {
        // Held across the sleep so callers start in turn
        let mut last = self.last_request.lock().await;

        if let Some(previous) = *last {
            let interval = self.interval_with_jitter();
            let elapsed = previous.elapsed();
            if elapsed < interval {
                let pause = interval - elapsed;
                trace!("Throttling request for {:?}", pause);
                tokio::time::sleep(pause).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_request_is_immediate() {
        let throttle = RequestThrottle::new(Duration::from_secs(10));
        let start = Instant::now();
        throttle.wait().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_spaces_concurrent_callers() {
        let throttle = Arc::new(RequestThrottle::new(Duration::from_millis(50)));
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let t = throttle.clone();
                tokio::spawn(async move { t.wait().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_zero_interval_never_waits() {
        let throttle = RequestThrottle::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..20 {
            throttle.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
