//! Per-request admission decisions.
//!
//! [`AdmissionController`] turns a policy and a client identifier into an
//! [`Admission`]: one atomic store call, bounded by a timeout, with store
//! failures surfaced as their own variants instead of errors.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{BucketKeys, RateLimitPolicy};
use crate::ports::{BucketStore, Clock, RateLimitError};

/// Tokens taken by one request.
pub const REQUEST_COST: u32 = 1;

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// What to do with a request when the store can't answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Let the request through unrestricted.
    #[default]
    Open,
    /// Refuse the request.
    Closed,
}

impl FailureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl std::str::FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(format!("expected 'open' or 'closed', got '{other}'")),
        }
    }
}

/// Quota snapshot reported to an admitted client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub remaining: u32,
    pub policy: String,
}

/// Admission decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Continue the pipeline and report the quota.
    Allowed(Quota),
    /// Short-circuit with 429.
    Denied { retry_after: Duration },
    /// Store failed; continue without quota information.
    FailedOpen(RateLimitError),
    /// Store failed; refuse the request.
    FailedClosed(RateLimitError),
}

/// Admission controller settings.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub key_prefix: String,
    pub store_timeout: Duration,
    pub failure_mode: FailureMode,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            key_prefix: crate::domain::DEFAULT_KEY_PREFIX.to_string(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            failure_mode: FailureMode::Open,
        }
    }
}

/// Applies policies against a shared [`BucketStore`].
///
/// Holds no bucket state of its own; every decision is one store call.
pub struct AdmissionController {
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
    keys: BucketKeys,
    store_timeout: Duration,
    failure_mode: FailureMode,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn BucketStore>, clock: Arc<dyn Clock>, config: AdmissionConfig) -> Self {
        Self {
            store,
            clock,
            keys: BucketKeys::new(config.key_prefix),
            store_timeout: config.store_timeout,
            failure_mode: config.failure_mode,
        }
    }

    /// Decide whether `client_id` may make one request under `policy`.
    pub async fn admit(&self, policy: &RateLimitPolicy, client_id: &str) -> Admission {
        let key = self.keys.bucket_key(policy.name(), client_id);
        let now = self.clock.now_epoch_secs();

        let outcome = tokio::time::timeout(
            self.store_timeout,
            self.store.try_consume(&key, policy, now, REQUEST_COST),
        )
        .await
        .unwrap_or(Err(RateLimitError::Timeout(self.store_timeout)));

        match outcome {
            Ok(result) if result.allowed => Admission::Allowed(Quota {
                limit: policy.capacity(),
                remaining: result.remaining,
                policy: policy.name().to_string(),
            }),
            Ok(result) => Admission::Denied {
                retry_after: result.retry_after,
            },
            Err(err) => match self.failure_mode {
                FailureMode::Open => Admission::FailedOpen(err),
                FailureMode::Closed => Admission::FailedClosed(err),
            },
        }
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Backend name of the underlying store.
    pub fn store_backend(&self) -> &'static str {
        self.store.backend()
    }
}
