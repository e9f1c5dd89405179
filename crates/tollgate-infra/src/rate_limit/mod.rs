//! Bucket store implementations.

mod memory;

pub use memory::InMemoryBucketStore;

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::{RedisBucketStore, RedisBucketStoreConfig};
