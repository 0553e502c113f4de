use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("rate limit wait of {needed:?} exceeds allowed {allowed:?}")]
pub struct RateLimitExceeded {
    pub needed: Duration,
    pub allowed: Duration,
}

/// Token bucket limiting requests to one upstream source.
///
/// Callers reserve a token under a short lock. When the bucket is empty the
/// reservation borrows against future refills and the caller sleeps until its
/// slot, so concurrent callers are admitted at no more than the refill rate.
/// A reservation that would need longer than `max_wait` is refused instead.
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    /// May go negative while reservations are outstanding.
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_second: refill_per_second.max(0.0),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Reserve one token, waiting at most `max_wait` for it.
    pub async fn acquire(&self, max_wait: Duration) -> Result<(), RateLimitExceeded> {
        let wait = self.reserve(max_wait)?;
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }

    /// Take a token only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.reserve(Duration::ZERO).is_ok()
    }

    /// Tokens currently available (negative while callers are queued).
    pub fn available(&self) -> f64 {
        let mut state = self.lock();
        self.refill(&mut state);
        state.tokens
    }

    fn reserve(&self, max_wait: Duration) -> Result<Duration, RateLimitExceeded> {
        let mut state = self.lock();
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(Duration::ZERO);
        }

        if self.refill_per_second <= 0.0 {
            return Err(RateLimitExceeded {
                needed: Duration::MAX,
                allowed: max_wait,
            });
        }

        let deficit = 1.0 - state.tokens;
        let needed = Duration::from_secs_f64(deficit / self.refill_per_second);
        if needed > max_wait {
            return Err(RateLimitExceeded {
                needed,
                allowed: max_wait,
            });
        }

        state.tokens -= 1.0;
        Ok(needed)
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.capacity);
        state.last_refill = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BucketState> {
        // The critical section never panics, so a poisoned lock still holds a
        // consistent state.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
