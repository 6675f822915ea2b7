//! Shared token-bucket admission control for outbound requests.
//!
//! Every listing fetch and every download request acquires a token from
//! the same bucket before hitting the network, giving one global
//! request-rate ceiling no matter how many tasks are issuing requests.
//!
//! The bucket refills continuously at `rate` tokens per second up to
//! `burst` tokens, so short bursts are absorbed while the sustained rate
//! stays bounded.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Default sustained request rate (requests per second).
pub const DEFAULT_RATE: f64 = 5.0;

/// Default burst allowance.
pub const DEFAULT_BURST: f64 = 5.0;

/// Token bucket shared across all HTTP operations.
///
/// Designed to be wrapped in `Arc` and cloned into spawned tasks.
/// `acquire` suspends the caller until a token is available; callers that
/// need to abandon the wait race it against a cancellation signal with
/// `tokio::select!`, which drops the future without issuing the request.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a bucket with the given sustained rate and burst size.
    ///
    /// Non-positive values fall back to the defaults.
    #[must_use]
    pub fn new(rate_per_sec: f64, burst: f64) -> Self {
        let rate = if rate_per_sec > 0.0 {
            rate_per_sec
        } else {
            DEFAULT_RATE
        };
        let burst = if burst >= 1.0 { burst } else { DEFAULT_BURST };
        debug!(rate, burst, "creating token bucket");
        Self {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Returns the sustained rate in requests per second.
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Waits until a token is available and consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                // Time until one full token accumulates.
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new(DEFAULT_RATE, DEFAULT_BURST)
    }
}
