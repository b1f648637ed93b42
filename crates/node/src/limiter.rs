use std::collections::HashMap;
use std::time::Instant;

use alloy_primitives::Address;
use parking_lot::Mutex;

use crate::{NodeError, RateLimitConfig};

/// The two inbound RPC classes with independent budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitClass {
    /// One-shot requests (status queries, fragment submission).
    Unary,
    /// Long-lived stream opens (SMPC message channels).
    Stream,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    refilled_at: Instant,
}

#[derive(Debug)]
struct ClassLimiter {
    rate_per_sec: f64,
    burst: f64,
    clients: Mutex<HashMap<Address, TokenBucket>>,
}

impl ClassLimiter {
    fn new(rate_per_sec: f64, burst: f64) -> Self {
        Self { rate_per_sec, burst, clients: Mutex::new(HashMap::new()) }
    }

    fn allow(&self, client: Address) -> bool {
        let now = Instant::now();
        let mut clients = self.clients.lock();
        let bucket = clients
            .entry(client)
            .or_insert(TokenBucket { tokens: self.burst, refilled_at: now });

        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-client token buckets for inbound RPC.
///
/// Each client address holds one bucket per class, so a client exhausting
/// its unary budget neither blocks its own streams nor anyone else.
#[derive(Debug)]
pub struct RateLimiter {
    unary: ClassLimiter,
    stream: ClassLimiter,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            unary: ClassLimiter::new(config.unary_per_sec, config.unary_burst),
            stream: ClassLimiter::new(config.stream_per_sec, config.stream_burst),
        }
    }

    /// Charges one request to the client's budget.
    pub fn allow(&self, class: RateLimitClass, client: Address) -> Result<(), NodeError> {
        let allowed = match class {
            RateLimitClass::Unary => self.unary.allow(client),
            RateLimitClass::Stream => self.stream.allow(client),
        };
        if allowed {
            Ok(())
        } else {
            Err(NodeError::RateLimitExceeded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(unary_burst: f64, stream_burst: f64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            unary_per_sec: 0.0, // no refill during the test
            unary_burst,
            stream_per_sec: 0.0,
            stream_burst,
        })
    }

    #[test]
    fn burst_is_honored_then_rejected() {
        let limiter = limiter(3.0, 1.0);
        let client = Address::repeat_byte(1);

        for _ in 0..3 {
            limiter.allow(RateLimitClass::Unary, client).unwrap();
        }
        assert!(matches!(
            limiter.allow(RateLimitClass::Unary, client),
            Err(NodeError::RateLimitExceeded)
        ));
    }

    #[test]
    fn classes_have_independent_budgets() {
        let limiter = limiter(1.0, 2.0);
        let client = Address::repeat_byte(2);

        limiter.allow(RateLimitClass::Unary, client).unwrap();
        assert!(limiter.allow(RateLimitClass::Unary, client).is_err());

        // The stream budget is untouched.
        limiter.allow(RateLimitClass::Stream, client).unwrap();
        limiter.allow(RateLimitClass::Stream, client).unwrap();
        assert!(limiter.allow(RateLimitClass::Stream, client).is_err());
    }

    #[test]
    fn clients_do_not_affect_each_other() {
        let limiter = limiter(1.0, 1.0);
        let greedy = Address::repeat_byte(3);
        let polite = Address::repeat_byte(4);

        limiter.allow(RateLimitClass::Unary, greedy).unwrap();
        assert!(limiter.allow(RateLimitClass::Unary, greedy).is_err());
        limiter.allow(RateLimitClass::Unary, polite).unwrap();
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            unary_per_sec: 1000.0,
            unary_burst: 1.0,
            stream_per_sec: 0.0,
            stream_burst: 1.0,
        });
        let client = Address::repeat_byte(5);

        limiter.allow(RateLimitClass::Unary, client).unwrap();
        assert!(limiter.allow(RateLimitClass::Unary, client).is_err());
        std::thread::sleep(std::time::Duration::from_millis(5));
        limiter.allow(RateLimitClass::Unary, client).unwrap();
    }
}
