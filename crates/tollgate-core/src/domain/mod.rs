//! Domain entities - policies, bucket state and the token-bucket step.

mod bucket;
mod key;
mod policy;
mod registry;

pub use bucket::{BucketState, BucketUpdate, TokenBucket};
pub use key::{BucketKeys, DEFAULT_KEY_PREFIX};
pub use policy::{DEFAULT_POLICY_NAME, PolicyConfig, RateLimitPolicy};
pub use registry::PolicyRegistry;
