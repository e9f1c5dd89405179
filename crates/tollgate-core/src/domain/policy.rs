use crate::error::PolicyError;

/// Name of the policy applied to routes that don't name one.
pub const DEFAULT_POLICY_NAME: &str = "default";

/// Raw, unvalidated policy parameters as they come out of configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    pub name: String,
    pub capacity: u32,
    pub refill_tokens: u32,
    pub refill_interval_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_POLICY_NAME.to_string(),
            capacity: 10,
            refill_tokens: 5,
            refill_interval_secs: 60,
        }
    }
}

/// Immutable token-bucket policy for one route or use-case.
///
/// The only way to obtain one is [`RateLimitPolicy::new`] (or `TryFrom<PolicyConfig>`),
/// so every value in circulation satisfies `capacity > 0`, `refill_tokens > 0`
/// and `refill_interval_secs > 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    name: String,
    capacity: u32,
    refill_tokens: u32,
    refill_interval_secs: u64,
}

impl RateLimitPolicy {
    pub fn new(
        name: impl Into<String>,
        capacity: u32,
        refill_tokens: u32,
        refill_interval_secs: u64,
    ) -> Result<Self, PolicyError> {
        let name = name.into();

        if name.is_empty() {
            return Err(PolicyError::invalid(&name, "name must not be empty"));
        }
        // The name is a segment of the store key.
        if name.contains(':') || name.chars().any(char::is_whitespace) {
            return Err(PolicyError::invalid(
                &name,
                "name must not contain ':' or whitespace",
            ));
        }
        if capacity == 0 {
            return Err(PolicyError::invalid(&name, "capacity must be > 0"));
        }
        if refill_tokens == 0 {
            return Err(PolicyError::invalid(&name, "refill_tokens must be > 0"));
        }
        if refill_interval_secs == 0 {
            return Err(PolicyError::invalid(
                &name,
                "refill_interval_secs must be > 0",
            ));
        }

        Ok(Self {
            name,
            capacity,
            refill_tokens,
            refill_interval_secs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of tokens the bucket can hold.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Tokens added per elapsed refill interval.
    pub fn refill_tokens(&self) -> u32 {
        self.refill_tokens
    }

    pub fn refill_interval_secs(&self) -> u64 {
        self.refill_interval_secs
    }

    /// Store time-to-live for a bucket: twice the time an empty bucket
    /// needs to fill up again.
    pub fn bucket_ttl_secs(&self) -> u64 {
        let intervals_to_fill = self.capacity.div_ceil(self.refill_tokens) as u64;
        intervals_to_fill
            .saturating_mul(self.refill_interval_secs)
            .saturating_mul(2)
    }
}

impl TryFrom<PolicyConfig> for RateLimitPolicy {
    type Error = PolicyError;

    fn try_from(config: PolicyConfig) -> Result<Self, Self::Error> {
        Self::new(
            config.name,
            config.capacity,
            config.refill_tokens,
            config.refill_interval_secs,
        )
    }
}
