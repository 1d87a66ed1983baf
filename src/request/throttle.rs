//! Request fuzzing
//!
//! After every non-fatal request, failed or not, the throttle draws a delay uniformly from
//! `[fuzz_min, fuzz_max]`; the next fetch may not start before
//! `last_request_time + delay`.

use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Randomized inter-request delay
#[derive(Debug)]
pub struct Throttle {
    fuzz_min: Duration,
    fuzz_max: Duration,

    /// Completion time of the last non-fatal request
    last_request_time: Option<Instant>,

    /// Earliest start time for the next fetch
    next_allowed: Option<Instant>,
}

impl Throttle {
    /// Creates a throttle with the given bounds
    ///
    /// Bounds given in the wrong order are swapped.
    pub fn new(fuzz_min: Duration, fuzz_max: Duration) -> Self {
        let (fuzz_min, fuzz_max) = if fuzz_min <= fuzz_max {
            (fuzz_min, fuzz_max)
        } else {
            (fuzz_max, fuzz_min)
        };

        Self {
            fuzz_min,
            fuzz_max,
            last_request_time: None,
            next_allowed: None,
        }
    }

    pub fn fuzz_min(&self) -> Duration {
        self.fuzz_min
    }

    pub fn fuzz_max(&self) -> Duration {
        self.fuzz_max
    }

    pub fn last_request_time(&self) -> Option<Instant> {
        self.last_request_time
    }

    /// Time left before the next fetch may start, if any
    pub fn time_until_next_request(&self, now: Instant) -> Option<Duration> {
        self.next_allowed
            .filter(|next| *next > now)
            .map(|next| next - now)
    }

    /// Sleeps until the next fetch is allowed
    pub async fn wait(&self) {
        if let Some(next) = self.next_allowed {
            if let Some(remaining) = self.time_until_next_request(Instant::now()) {
                tracing::debug!("Fuzzing: sleeping {:?} before next request", remaining);
            }
            tokio::time::sleep_until(next).await;
        }
    }

    /// Records a finished request and draws the next delay
    pub fn record_request(&mut self, now: Instant, rng: &mut StdRng) {
        let delay = if self.fuzz_min == self.fuzz_max {
            self.fuzz_min
        } else {
            let min = self.fuzz_min.as_millis() as u64;
            let max = self.fuzz_max.as_millis() as u64;
            Duration::from_millis(rng.gen_range(min..=max))
        };

        self.last_request_time = Some(now);
        self.next_allowed = Some(now + delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_first_request_is_immediate() {
        let throttle = Throttle::new(Duration::from_secs(3), Duration::from_secs(15));
        assert_eq!(throttle.time_until_next_request(Instant::now()), None);
        assert!(throttle.last_request_time().is_none());
    }

    #[test]
    fn test_bounds_are_ordered() {
        let throttle = Throttle::new(Duration::from_secs(15), Duration::from_secs(3));
        assert_eq!(throttle.fuzz_min(), Duration::from_secs(3));
        assert_eq!(throttle.fuzz_max(), Duration::from_secs(15));
    }

    #[test]
    fn test_delay_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut throttle = Throttle::new(Duration::from_millis(3_000), Duration::from_millis(15_000));

        for _ in 0..200 {
            let now = Instant::now();
            throttle.record_request(now, &mut rng);
            let remaining = throttle.time_until_next_request(now).unwrap();
            assert!(remaining >= Duration::from_millis(3_000));
            assert!(remaining <= Duration::from_millis(15_000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_honors_minimum_delay() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut throttle = Throttle::new(Duration::from_secs(3), Duration::from_secs(15));

        let finished = Instant::now();
        throttle.record_request(finished, &mut rng);
        throttle.wait().await;

        assert!(finished.elapsed() >= Duration::from_secs(3));
        assert!(finished.elapsed() <= Duration::from_secs(15));
    }
}
