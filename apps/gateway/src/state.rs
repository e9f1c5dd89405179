//! Application state - shared across all handlers.

use std::sync::Arc;

use tollgate_core::ports::{BucketStore, RateLimitError, SystemClock};
use tollgate_core::{AdmissionController, domain::PolicyRegistry};
use tollgate_infra::{InMemoryBucketStore, RedisConfig};

#[cfg(feature = "redis")]
use tollgate_infra::{RedisBucketStore, RedisBucketStoreConfig};

use crate::config::{AppConfig, RouteConfig};
use crate::middleware::rate_limit::ClientIdSource;
use crate::upstream::Upstream;

/// Errors that stop the gateway from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Bucket store unavailable: {0}")]
    Store(#[from] RateLimitError),

    #[error("Failed to build upstream HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<AdmissionController>,
    pub policies: Arc<PolicyRegistry>,
    pub routes: Arc<Vec<RouteConfig>>,
    pub client_ids: ClientIdSource,
    pub upstream: Upstream,
    pub max_body_bytes: usize,
}

impl AppState {
    /// Build the application state with the configured bucket store.
    pub async fn new(config: &AppConfig) -> Result<Self, StartupError> {
        let store = build_store(&config.redis).await?;
        Ok(Self::with_store(config, store)?)
    }

    /// Build the state around an already constructed store.
    pub fn with_store(
        config: &AppConfig,
        store: Arc<dyn BucketStore>,
    ) -> Result<Self, reqwest::Error> {
        let admission = AdmissionController::new(
            store,
            Arc::new(SystemClock),
            config.admission.clone(),
        );

        tracing::info!(
            backend = admission.store_backend(),
            failure_mode = ?admission.failure_mode(),
            policies = config.policies.len(),
            routes = config.routes.len(),
            "Application state initialized"
        );

        Ok(Self {
            admission: Arc::new(admission),
            policies: config.policies.clone(),
            routes: Arc::new(config.routes.clone()),
            client_ids: config.client_ids,
            upstream: Upstream::new(config.upstream_timeout)?,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

#[cfg(feature = "redis")]
async fn build_store(config: &RedisConfig) -> Result<Arc<dyn BucketStore>, StartupError> {
    let store_config = RedisBucketStoreConfig {
        redis: config.clone(),
    };

    match RedisBucketStore::new(store_config).await {
        Ok(store) => Ok(Arc::new(store)),
        Err(e) if config.fallback_to_memory => {
            tracing::error!(
                "Failed to connect to Redis: {}. Using in-memory bucket store; limits are per instance.",
                e
            );
            Ok(Arc::new(InMemoryBucketStore::new()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(feature = "redis"))]
async fn build_store(_config: &RedisConfig) -> Result<Arc<dyn BucketStore>, StartupError> {
    tracing::warn!("Running without redis feature - using in-memory bucket store");
    Ok(Arc::new(InMemoryBucketStore::new()))
}
