//! Proxy rotation
//!
//! Proxies are handed out from a shuffled queue. Once every proxy has been
//! used the queue is refilled from the full pool and shuffled again, so each
//! proxy is used exactly once per round.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::VecDeque;

/// Round-based shuffled proxy queue
#[derive(Debug)]
pub struct ProxyRotation {
    /// Every configured proxy
    pool: Vec<String>,

    /// Proxies left in the current round
    queue: VecDeque<String>,
}

impl ProxyRotation {
    /// Creates a rotation over the given pool
    ///
    /// An empty pool is valid and means every request goes out directly.
    pub fn new(pool: Vec<String>) -> Self {
        Self {
            pool,
            queue: VecDeque::new(),
        }
    }

    /// Returns true if requests go out without a proxy
    pub fn is_direct(&self) -> bool {
        self.pool.is_empty()
    }

    /// Every configured proxy, in configuration order
    pub fn pool(&self) -> &[String] {
        &self.pool
    }

    /// Pops the next proxy, refilling and reshuffling the queue when empty
    ///
    /// Returns `None` when the pool is empty (direct connection).
    pub fn next_proxy(&mut self, rng: &mut StdRng) -> Option<String> {
        if self.pool.is_empty() {
            return None;
        }

        if self.queue.is_empty() {
            let mut round = self.pool.clone();
            round.shuffle(rng);
            self.queue = round.into();
        }

        self.queue.pop_front()
    }
}
