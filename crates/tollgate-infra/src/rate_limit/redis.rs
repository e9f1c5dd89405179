//! Redis bucket store using a server-side token-bucket script.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, ErrorKind, RedisError, Script};

use tollgate_core::domain::RateLimitPolicy;
use tollgate_core::ports::{BucketStore, RateLimitError, RateLimitResult};

use crate::config::RedisConfig;

/// Token-bucket step evaluated atomically by Redis.
///
/// KEYS[1] = bucket key
/// ARGV    = capacity, refill_tokens, refill_interval_secs, now_epoch_secs,
///           requested, ttl_secs
/// Returns   {allowed (0|1), remaining, retry_after_secs}
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_tokens = tonumber(ARGV[2])
local refill_interval = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local requested = tonumber(ARGV[5])
local ttl = tonumber(ARGV[6])

local bucket = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = capacity
local last_refill = now
if bucket[1] and bucket[2] then
    tokens = math.min(capacity, tonumber(bucket[1]))
    last_refill = tonumber(bucket[2])
end

local elapsed = math.max(0, now - last_refill)
local intervals = math.floor(elapsed / refill_interval)
local refilled = intervals > 0
if refilled then
    tokens = math.min(capacity, tokens + intervals * refill_tokens)
    last_refill = last_refill + intervals * refill_interval
end

if tokens >= requested then
    tokens = tokens - requested
    redis.call('HSET', key, 'tokens', tokens, 'last_refill', last_refill)
    redis.call('EXPIRE', key, ttl)
    return {1, tokens, 0}
end

if refilled then
    redis.call('HSET', key, 'tokens', tokens, 'last_refill', last_refill)
    redis.call('EXPIRE', key, ttl)
end

local intervals_needed = math.ceil((requested - tokens) / refill_tokens)
local since_refill = math.max(0, now - last_refill)
local retry_after = math.max(1, intervals_needed * refill_interval - since_refill)
return {0, tokens, retry_after}
"#;

/// Redis bucket store configuration.
#[derive(Debug, Clone, Default)]
pub struct RedisBucketStoreConfig {
    /// Redis connection config
    pub redis: RedisConfig,
}

impl RedisBucketStoreConfig {
    pub fn from_env() -> Self {
        Self {
            redis: RedisConfig::from_env(),
        }
    }
}

/// Redis-backed bucket store.
///
/// The whole refill/consume step runs inside one Lua script, so it is atomic
/// across every gateway instance sharing the Redis server.
pub struct RedisBucketStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisBucketStore {
    pub async fn new(config: RedisBucketStoreConfig) -> Result<Self, RateLimitError> {
        let client = Client::open(config.redis.url.as_str())
            .map_err(|e| RateLimitError::StoreUnavailable(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn_manager_fut = ConnectionManager::new(client);
        let conn = tokio::time::timeout(config.redis.connect_timeout, conn_manager_fut)
            .await
            .map_err(|_| RateLimitError::Timeout(config.redis.connect_timeout))?
            .map_err(|e| RateLimitError::StoreUnavailable(e.to_string()))?;

        tracing::info!(url = %config.redis.url, "Connected to Redis bucket store");

        Ok(Self {
            conn,
            script: Script::new(TOKEN_BUCKET_SCRIPT),
        })
    }

    /// Create from environment configuration.
    pub async fn from_env() -> Result<Self, RateLimitError> {
        Self::new(RedisBucketStoreConfig::from_env()).await
    }
}

fn map_redis_error(err: RedisError) -> RateLimitError {
    match err.kind() {
        ErrorKind::TypeError => RateLimitError::MalformedResponse(err.to_string()),
        _ => RateLimitError::StoreUnavailable(err.to_string()),
    }
}

/// Decode the script's `{allowed, remaining, retry_after}` reply.
fn parse_reply(reply: &[i64]) -> Result<RateLimitResult, RateLimitError> {
    let [allowed, remaining, retry_after] = reply else {
        return Err(RateLimitError::MalformedResponse(format!(
            "expected 3 integers, got {}",
            reply.len()
        )));
    };

    let allowed = match allowed {
        0 => false,
        1 => true,
        other => {
            return Err(RateLimitError::MalformedResponse(format!(
                "allowed flag must be 0 or 1, got {other}"
            )));
        }
    };
    let remaining = u32::try_from(*remaining).map_err(|_| {
        RateLimitError::MalformedResponse(format!("remaining out of range: {remaining}"))
    })?;
    let retry_after = u64::try_from(*retry_after).map_err(|_| {
        RateLimitError::MalformedResponse(format!("retry_after out of range: {retry_after}"))
    })?;

    Ok(RateLimitResult {
        allowed,
        remaining,
        retry_after: if allowed {
            Duration::ZERO
        } else {
            Duration::from_secs(retry_after)
        },
    })
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn try_consume(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now_epoch_secs: u64,
        requested: u32,
    ) -> Result<RateLimitResult, RateLimitError> {
        let mut conn = self.conn.clone();

        // EVALSHA, falling back to EVAL when the script isn't cached yet.
        let reply: Vec<i64> = self
            .script
            .key(key)
            .arg(policy.capacity())
            .arg(policy.refill_tokens())
            .arg(policy.refill_interval_secs())
            .arg(now_epoch_secs)
            .arg(requested)
            .arg(policy.bucket_ttl_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        parse_reply(&reply)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
