use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

const MICROS_PER_SECOND: u128 = 1_000_000;

/// Token bucket with integer-only accounting.
///
/// Tokens are stored scaled by one million, which gives sub-token precision
/// without floating point. Capacity equals the rate, so at most one second of
/// burst can accumulate.
pub struct RateLimiter {
    /// Target rate in requests per second.
    rps: u64,
    /// Maximum whole tokens that can accumulate.
    capacity: u64,
    /// Current token count, scaled by `MICROS_PER_SECOND`.
    tokens: u128,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(rps: u64) -> Self {
        Self {
            rps,
            capacity: rps,
            // Start with a single token: a fresh bucket must not grant a
            // full second of burst before any time has elapsed.
            tokens: MICROS_PER_SECOND.min((rps as u128) * MICROS_PER_SECOND),
            last_refill: Instant::now(),
        }
    }

    /// Update the target rate mid-run (used by the ramp-up schedule).
    /// Capacity follows the rate so the burst window stays at one second.
    pub fn set_rate(&mut self, rps: u64) {
        self.refill();
        self.rps = rps;
        self.capacity = rps;
        let max_tokens = (self.capacity as u128) * MICROS_PER_SECOND;
        if self.tokens > max_tokens {
            self.tokens = max_tokens;
        }
    }

    pub fn rate(&self) -> u64 {
        self.rps
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed_micros = now.duration_since(self.last_refill).as_micros();
        if elapsed_micros == 0 {
            return;
        }

        // tokens/sec * elapsed_us is already in the scaled representation.
        let tokens_to_add = (self.rps as u128) * elapsed_micros;
        self.tokens = self.tokens.saturating_add(tokens_to_add);

        let max_tokens = (self.capacity as u128) * MICROS_PER_SECOND;
        if self.tokens > max_tokens {
            self.tokens = max_tokens;
        }

        self.last_refill = now;
    }

    /// Try to spend one token without waiting.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= MICROS_PER_SECOND {
            self.tokens -= MICROS_PER_SECOND;
            true
        } else {
            false
        }
    }

    /// Time until one whole token will be available at the current rate.
    pub fn next_token_delay(&mut self) -> Duration {
        self.refill();
        if self.rps == 0 {
            return Duration::from_secs(1);
        }
        let deficit = MICROS_PER_SECOND.saturating_sub(self.tokens);
        Duration::from_micros((deficit / self.rps as u128) as u64)
    }
}

/// Single-threaded shared handle for the connection tasks of one worker.
///
/// The async `acquire` never holds the interior borrow across a suspension
/// point: it either takes a token immediately or computes the deficit sleep,
/// releases the borrow, and retries after waking.
#[derive(Clone)]
pub struct SharedRateLimiter {
    inner: Rc<RefCell<RateLimiter>>,
}

impl SharedRateLimiter {
    pub fn new(rps: u64) -> Self {
        Self {
            inner: Rc::new(RefCell::new(RateLimiter::new(rps))),
        }
    }

    pub fn set_rate(&self, rps: u64) {
        self.inner.borrow_mut().set_rate(rps);
    }

    pub fn rate(&self) -> u64 {
        self.inner.borrow().rate()
    }

    pub fn try_acquire(&self) -> bool {
        self.inner.borrow_mut().try_acquire()
    }

    /// Suspend until a token is spent.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut limiter = self.inner.borrow_mut();
                if limiter.try_acquire() {
                    return;
                }
                limiter.next_token_delay()
            };
            sleep(wait.max(Duration::from_micros(100))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_bucket_grants_a_single_token() {
        let mut limiter = RateLimiter::new(100);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn drained_bucket_refills_at_rate() {
        let mut limiter = RateLimiter::new(1000);
        assert!(limiter.try_acquire());

        sleep(Duration::from_millis(100)).await;

        // ~100 tokens should have come back (1000 rps * 0.1s).
        let mut acquired = 0;
        for _ in 0..200 {
            if limiter.try_acquire() {
                acquired += 1;
            }
        }
        assert!((85..=125).contains(&acquired), "acquired: {acquired}");
    }

    #[tokio::test]
    async fn tokens_cap_at_capacity() {
        let mut limiter = RateLimiter::new(10);
        sleep(Duration::from_millis(1500)).await;

        let mut acquired = 0;
        while limiter.try_acquire() {
            acquired += 1;
        }
        // Burst never exceeds one second of rate.
        assert!(acquired <= 10, "acquired: {acquired}");
    }

    #[tokio::test]
    async fn set_rate_takes_effect() {
        let mut limiter = RateLimiter::new(100);
        limiter.set_rate(1000);
        assert_eq!(limiter.rate(), 1000);
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn shared_acquire_blocks_until_token() {
        let limiter = SharedRateLimiter::new(50);
        while limiter.try_acquire() {}

        let start = Instant::now();
        limiter.acquire().await;
        // One token at 50 rps is 20ms away; allow generous scheduler slack.
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn zero_rate_never_admits() {
        let limiter = SharedRateLimiter::new(0);
        assert!(!limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
