//! Token-bucket state and the pure refill/consume step.
//!
//! [`TokenBucket::apply`] is the single read-refill-consume transition. Store
//! adapters must run it (or an exact equivalent, such as the Redis Lua script)
//! atomically per key.

use std::time::Duration;

use crate::domain::policy::RateLimitPolicy;
use crate::ports::RateLimitResult;

/// Persisted bucket state, keyed by `<prefix>:<policy>:<client>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    pub tokens: u32,
    pub last_refill_epoch_secs: u64,
}

/// Outcome of one bucket transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketUpdate {
    pub result: RateLimitResult,
    /// State to write back, with [`RateLimitPolicy::bucket_ttl_secs`] as expiry.
    /// `None` means the store must not be touched.
    pub persist: Option<BucketState>,
}

/// Token-bucket transition function.
pub struct TokenBucket;

impl TokenBucket {
    /// Refill `state` up to `now`, then try to take `requested` tokens.
    ///
    /// A missing state is a full bucket whose last refill is `now`. A stored
    /// token count above the policy capacity is clamped first.
    pub fn apply(
        policy: &RateLimitPolicy,
        state: Option<BucketState>,
        now_epoch_secs: u64,
        requested: u32,
    ) -> BucketUpdate {
        let capacity = u64::from(policy.capacity());
        let refill_tokens = u64::from(policy.refill_tokens());
        let interval = policy.refill_interval_secs();
        let requested = u64::from(requested);

        let (mut tokens, mut last_refill) = match state {
            Some(s) => (u64::from(s.tokens).min(capacity), s.last_refill_epoch_secs),
            None => (capacity, now_epoch_secs),
        };

        // A clock behind last_refill (skew between instances) yields no credit.
        let elapsed = now_epoch_secs.saturating_sub(last_refill);
        let intervals_passed = elapsed / interval;
        let refilled = intervals_passed > 0;
        if refilled {
            tokens = tokens
                .saturating_add(intervals_passed.saturating_mul(refill_tokens))
                .min(capacity);
            last_refill = last_refill.saturating_add(intervals_passed * interval);
        }

        if tokens >= requested {
            tokens -= requested;
            return BucketUpdate {
                result: RateLimitResult {
                    allowed: true,
                    remaining: tokens as u32,
                    retry_after: Duration::ZERO,
                },
                persist: Some(BucketState {
                    tokens: tokens as u32,
                    last_refill_epoch_secs: last_refill,
                }),
            };
        }

        let deficit = requested - tokens;
        let intervals_needed = deficit.div_ceil(refill_tokens);
        let since_refill = now_epoch_secs.saturating_sub(last_refill);
        let retry_after = intervals_needed
            .saturating_mul(interval)
            .saturating_sub(since_refill)
            .max(1);

        BucketUpdate {
            result: RateLimitResult {
                allowed: false,
                remaining: tokens as u32,
                retry_after: Duration::from_secs(retry_after),
            },
            // Keep a refill that happened but wasn't enough, so the next
            // attempt doesn't recompute it.
            persist: refilled.then_some(BucketState {
                tokens: tokens as u32,
                last_refill_epoch_secs: last_refill,
            }),
        }
    }
}
