//! Bucket store port.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::RateLimitPolicy;

/// Shared bucket store - abstraction over atomic token-bucket backends.
///
/// Implementations must run the whole read-refill-consume step for `key` as
/// one indivisible operation, visible to every gateway instance sharing the
/// store (see [`crate::domain::TokenBucket`]).
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Try to take `requested` tokens from the bucket at `key`.
    async fn try_consume(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now_epoch_secs: u64,
        requested: u32,
    ) -> Result<RateLimitResult, RateLimitError>;

    /// Short backend name, reported by the health endpoint.
    fn backend(&self) -> &'static str;
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    /// Zero when allowed.
    pub retry_after: Duration,
}

/// Store interaction errors.
///
/// All variants mean the store could not give an answer for this request.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Bucket store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Bucket store timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed bucket store response: {0}")]
    MalformedResponse(String),
}
