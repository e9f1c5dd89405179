//! Application configuration loaded from environment variables.

use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use tollgate_core::domain::{DEFAULT_KEY_PREFIX, PolicyConfig, PolicyRegistry, RateLimitPolicy};
use tollgate_core::{AdmissionConfig, FailureMode, PolicyError};
use tollgate_infra::RedisConfig;

use crate::middleware::rate_limit::ClientIdSource;

const POLICY_VAR_PREFIX: &str = "RATE_LIMIT_POLICY_";
const ROUTE_VAR_PREFIX: &str = "GATEWAY_ROUTE_";

/// Largest request body relayed upstream unless `GATEWAY_MAX_BODY_BYTES` says otherwise.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Fatal configuration errors, reported before the server binds.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },

    #[error("Route '{route}' references unknown policy '{policy}'")]
    UnknownPolicy { route: String, policy: String },
}

impl ConfigError {
    fn invalid(var: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var: var.to_string(),
            reason: reason.into(),
        }
    }
}

/// A mounted route: requests under `/api<path_prefix>` go to `upstream`.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub id: String,
    pub path_prefix: String,
    pub upstream: String,
    pub policy: Arc<RateLimitPolicy>,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub redis: RedisConfig,
    pub admission: AdmissionConfig,
    pub client_ids: ClientIdSource,
    pub upstream_timeout: Duration,
    pub max_body_bytes: usize,
    pub policies: Arc<PolicyRegistry>,
    pub routes: Vec<RouteConfig>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(utf8_vars(env::vars_os()))
    }

    /// Load configuration from an explicit set of variables.
    pub fn from_vars(
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let var = |name: &str| vars.get(name).cloned();

        let failure_mode = match var("RATE_LIMIT_FAILURE_MODE") {
            Some(raw) => raw
                .parse::<FailureMode>()
                .map_err(|reason| ConfigError::invalid("RATE_LIMIT_FAILURE_MODE", reason))?,
            None => FailureMode::Open,
        };

        let admission = AdmissionConfig {
            key_prefix: var("RATE_LIMIT_KEY_PREFIX")
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            store_timeout: var("RATE_LIMIT_STORE_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(tollgate_core::admission::DEFAULT_STORE_TIMEOUT),
            failure_mode,
        };

        let client_ids = if var("RATE_LIMIT_TRUST_FORWARDED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false)
        {
            ClientIdSource::Forwarded
        } else {
            ClientIdSource::PeerAddr
        };

        let policies = PolicyRegistry::from_configs(Self::parse_policies(&vars)?)?;
        let routes = Self::parse_routes(&vars, &policies)?;

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: var("PORT").and_then(|p| p.parse().ok()).unwrap_or(8080),
            redis: RedisConfig::from_vars(var),
            admission,
            client_ids,
            upstream_timeout: Duration::from_secs(
                vars.get("UPSTREAM_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            max_body_bytes: var("GATEWAY_MAX_BODY_BYTES")
                .and_then(|s| s.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(DEFAULT_MAX_BODY_BYTES),
            policies: Arc::new(policies),
            routes,
        })
    }

    /// Parse policies from environment.
    /// Format: RATE_LIMIT_POLICY_<NAME>=<CAPACITY>,<REFILL_TOKENS>,<REFILL_INTERVAL_SECS>
    /// Example: RATE_LIMIT_POLICY_SEARCH=20,5,10
    fn parse_policies(vars: &HashMap<String, String>) -> Result<Vec<PolicyConfig>, ConfigError> {
        let mut policies = Vec::new();

        for (key, value) in vars {
            let Some(name) = key.strip_prefix(POLICY_VAR_PREFIX) else {
                continue;
            };

            let parts: Vec<&str> = value.split(',').map(str::trim).collect();
            let [capacity, refill_tokens, refill_interval_secs] = parts.as_slice() else {
                return Err(ConfigError::invalid(
                    key,
                    "expected <capacity>,<refill_tokens>,<refill_interval_secs>",
                ));
            };

            policies.push(PolicyConfig {
                name: name.to_lowercase(),
                capacity: parse_number(key, "capacity", capacity)?,
                refill_tokens: parse_number(key, "refill_tokens", refill_tokens)?,
                refill_interval_secs: parse_number(
                    key,
                    "refill_interval_secs",
                    refill_interval_secs,
                )?,
            });
        }

        policies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(policies)
    }

    /// Parse routes from environment.
    /// Format: GATEWAY_ROUTE_<ID>=<PATH_PREFIX>,<UPSTREAM_URL>[,<POLICY>]
    /// Example: GATEWAY_ROUTE_ORDERS=/orders,http://order-service:8080,checkout
    fn parse_routes(
        vars: &HashMap<String, String>,
        policies: &PolicyRegistry,
    ) -> Result<Vec<RouteConfig>, ConfigError> {
        let mut routes: Vec<RouteConfig> = Vec::new();

        for (key, value) in vars {
            let Some(id) = key.strip_prefix(ROUTE_VAR_PREFIX) else {
                continue;
            };
            let id = id.to_lowercase();

            let parts: Vec<&str> = value.split(',').map(str::trim).collect();
            let (path_prefix, upstream, policy_name) = match parts.as_slice() {
                [prefix, upstream] => (*prefix, *upstream, None),
                [prefix, upstream, policy] => (*prefix, *upstream, Some(*policy)),
                _ => {
                    return Err(ConfigError::invalid(
                        key,
                        "expected <path_prefix>,<upstream_url>[,<policy>]",
                    ));
                }
            };

            let path_prefix = path_prefix.trim_end_matches('/');
            if !path_prefix.starts_with('/') || path_prefix.len() < 2 {
                return Err(ConfigError::invalid(
                    key,
                    "path prefix must start with '/' and name at least one segment",
                ));
            }
            if path_prefix == "/health" {
                return Err(ConfigError::invalid(key, "'/health' is reserved"));
            }
            if !(upstream.starts_with("http://") || upstream.starts_with("https://")) {
                return Err(ConfigError::invalid(
                    key,
                    "upstream must be an http:// or https:// URL",
                ));
            }
            if let Some(other) = routes.iter().find(|r| r.path_prefix == path_prefix) {
                return Err(ConfigError::invalid(
                    key,
                    format!("path prefix {} already used by route '{}'", path_prefix, other.id),
                ));
            }

            let policy = match policy_name {
                Some(name) => policies
                    .get(&name.to_lowercase())
                    .ok_or_else(|| ConfigError::UnknownPolicy {
                        route: id.clone(),
                        policy: name.to_string(),
                    })?,
                None => policies.default_policy(),
            };

            routes.push(RouteConfig {
                id,
                path_prefix: path_prefix.to_string(),
                upstream: upstream.trim_end_matches('/').to_string(),
                policy,
            });
        }

        // Most specific prefix first so nested prefixes are matched before their parents.
        routes.sort_by(|a, b| {
            b.path_prefix
                .len()
                .cmp(&a.path_prefix.len())
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(routes)
    }
}

/// Variables that are not valid UTF-8 cannot hold any setting read here.
fn utf8_vars(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> impl Iterator<Item = (String, String)> {
    vars.into_iter()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
}

fn parse_number<T: std::str::FromStr>(var: &str, field: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::invalid(var, format!("{field} is not a valid number: '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_vars(Vec::new()).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.admission.key_prefix, "rate_limit:token_bucket");
        assert_eq!(config.admission.store_timeout, Duration::from_millis(250));
        assert_eq!(config.admission.failure_mode, FailureMode::Open);
        assert_eq!(config.client_ids, ClientIdSource::PeerAddr);
        assert_eq!(config.policies.names(), vec!["default"]);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_policies_and_routes() {
        let config = AppConfig::from_vars(vars(&[
            ("RATE_LIMIT_POLICY_CHECKOUT", "5, 2, 10"),
            ("GATEWAY_ROUTE_ORDERS", "/orders,http://orders:8080/,checkout"),
            ("GATEWAY_ROUTE_ORDERS_ADMIN", "/orders/admin,http://orders-admin:8080"),
            ("RATE_LIMIT_FAILURE_MODE", "closed"),
            ("RATE_LIMIT_TRUST_FORWARDED", "true"),
        ]))
        .unwrap();

        assert_eq!(config.policies.names(), vec!["checkout", "default"]);
        let checkout = config.policies.get("checkout").unwrap();
        assert_eq!(checkout.capacity(), 5);
        assert_eq!(checkout.refill_tokens(), 2);
        assert_eq!(checkout.refill_interval_secs(), 10);

        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].id, "orders_admin");
        assert_eq!(config.routes[0].policy.name(), "default");
        assert_eq!(config.routes[1].id, "orders");
        assert_eq!(config.routes[1].upstream, "http://orders:8080");
        assert!(Arc::ptr_eq(&config.routes[1].policy, &checkout));

        assert_eq!(config.admission.failure_mode, FailureMode::Closed);
        assert_eq!(config.client_ids, ClientIdSource::Forwarded);
    }

    #[test]
    fn test_invalid_policy_is_fatal() {
        let err = AppConfig::from_vars(vars(&[("RATE_LIMIT_POLICY_BROKEN", "0,1,1")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Policy(PolicyError::InvalidPolicy { .. })
        ));

        let err = AppConfig::from_vars(vars(&[("RATE_LIMIT_POLICY_BROKEN", "5,1")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err =
            AppConfig::from_vars(vars(&[("RATE_LIMIT_POLICY_BROKEN", "5,-1,1")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_route_with_unknown_policy_is_fatal() {
        let err = AppConfig::from_vars(vars(&[(
            "GATEWAY_ROUTE_CART",
            "/cart,http://cart:8080,missing",
        )]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownPolicy { ref route, ref policy } if route == "cart" && policy == "missing"
        ));
    }

    #[test]
    fn test_bad_routes_are_rejected() {
        for value in [
            "cart,http://cart:8080",
            "/,http://cart:8080",
            "/health,http://cart:8080",
            "/cart,cart:8080",
            "/cart",
        ] {
            let result = AppConfig::from_vars(vars(&[("GATEWAY_ROUTE_CART", value)]));
            assert!(
                matches!(result, Err(ConfigError::Invalid { .. })),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn test_bad_failure_mode_is_fatal() {
        let err =
            AppConfig::from_vars(vars(&[("RATE_LIMIT_FAILURE_MODE", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "RATE_LIMIT_FAILURE_MODE"));
    }

    #[test]
    fn test_malformed_scalars_fall_back() {
        let config = AppConfig::from_vars(vars(&[
            ("PORT", "http"),
            ("RATE_LIMIT_STORE_TIMEOUT_MS", "fast"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.admission.store_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_route_policy_name_is_case_insensitive() {
        let config = AppConfig::from_vars(vars(&[
            ("RATE_LIMIT_POLICY_CHECKOUT", "5,2,10"),
            ("GATEWAY_ROUTE_CART", "/cart,http://cart:8080,CHECKOUT"),
        ]))
        .unwrap();
        assert_eq!(config.routes[0].policy.name(), "checkout");
    }

    #[test]
    fn test_max_body_bytes() {
        let config = AppConfig::from_vars(Vec::new()).unwrap();
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);

        let config =
            AppConfig::from_vars(vars(&[("GATEWAY_MAX_BODY_BYTES", "1024")])).unwrap();
        assert_eq!(config.max_body_bytes, 1024);

        let config = AppConfig::from_vars(vars(&[("GATEWAY_MAX_BODY_BYTES", "0")])).unwrap();
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_variables_are_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let raw = vec![
            (OsString::from("PORT"), OsString::from("9090")),
            (OsString::from("OPAQUE"), OsString::from_vec(vec![0x66, 0xff, 0x6f])),
            (OsString::from_vec(vec![0xfe, 0x41]), OsString::from("x")),
        ];
        let kept: Vec<(String, String)> = utf8_vars(raw).collect();
        assert_eq!(kept, vars(&[("PORT", "9090")]));

        let config = AppConfig::from_vars(kept).unwrap();
        assert_eq!(config.port, 9090);
    }
}
