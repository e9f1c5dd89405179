//! Rate limit response header names.
//!
//! Lower-case so they can be used with `HeaderName::from_static`; HTTP header
//! names are case-insensitive on the wire.

/// Policy capacity, or `0` on a denial.
pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";

/// Tokens left after this request, or `0` on a denial.
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Name of the policy that was applied.
pub const RATE_LIMIT_POLICY: &str = "x-ratelimit-policy";

/// Seconds until a denied client may retry.
pub const RETRY_AFTER: &str = "retry-after";

/// Route id attached to forwarded requests.
pub const SERVICE: &str = "x-service";
