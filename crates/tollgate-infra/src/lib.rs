//! # Tollgate Infrastructure
//!
//! Concrete implementations of the `BucketStore` port defined in `tollgate-core`.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external dependencies, in-memory store only
//! - `redis` - Redis bucket store (distributed, atomic via Lua)

pub mod config;
pub mod rate_limit;

pub use config::RedisConfig;
pub use rate_limit::InMemoryBucketStore;

#[cfg(feature = "redis")]
pub use rate_limit::{RedisBucketStore, RedisBucketStoreConfig};
