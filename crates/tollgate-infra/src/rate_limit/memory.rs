//! In-memory bucket store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tollgate_core::domain::{BucketState, RateLimitPolicy, TokenBucket};
use tollgate_core::ports::{BucketStore, RateLimitError, RateLimitResult};

/// Expired buckets are swept once every this many operations.
const SWEEP_EVERY: u64 = 1024;

struct Entry {
    state: BucketState,
    expires_at_epoch_secs: u64,
}

struct Buckets {
    entries: HashMap<String, Entry>,
    ops: u64,
}

/// In-memory bucket store using a single async mutex.
///
/// Each `try_consume` runs the whole token-bucket step under one guard, so it
/// is atomic within this process. This is the fallback when Redis is not
/// available.
/// Note: Limits are per-process, not distributed across instances.
pub struct InMemoryBucketStore {
    buckets: Mutex<Buckets>,
}

impl InMemoryBucketStore {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(Buckets {
                entries: HashMap::new(),
                ops: 0,
            }),
        }
    }

    /// Number of live (possibly expired but not yet swept) buckets.
    pub async fn len(&self) -> usize {
        self.buckets.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryBucketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    async fn try_consume(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now_epoch_secs: u64,
        requested: u32,
    ) -> Result<RateLimitResult, RateLimitError> {
        let mut buckets = self.buckets.lock().await;

        buckets.ops = buckets.ops.wrapping_add(1);
        if buckets.ops % SWEEP_EVERY == 0 {
            buckets
                .entries
                .retain(|_, entry| entry.expires_at_epoch_secs > now_epoch_secs);
        }

        // Expiry is judged on the same clock as the bucket timestamps.
        let current = buckets
            .entries
            .get(key)
            .filter(|entry| entry.expires_at_epoch_secs > now_epoch_secs)
            .map(|entry| entry.state);

        let update = TokenBucket::apply(policy, current, now_epoch_secs, requested);

        if let Some(state) = update.persist {
            buckets.entries.insert(
                key.to_string(),
                Entry {
                    state,
                    expires_at_epoch_secs: now_epoch_secs
                        .saturating_add(policy.bucket_ttl_secs()),
                },
            );
        }

        Ok(update.result)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
