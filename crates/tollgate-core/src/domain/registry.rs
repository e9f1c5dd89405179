use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::policy::{DEFAULT_POLICY_NAME, PolicyConfig, RateLimitPolicy};
use crate::error::PolicyError;

/// Validated, read-only set of policies keyed by name.
///
/// Built once at startup; the `default` policy is always present.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<String, Arc<RateLimitPolicy>>,
    default: Arc<RateLimitPolicy>,
}

impl PolicyRegistry {
    /// Validate every config and build the registry.
    ///
    /// Fails on the first invalid or duplicated policy. The default policy is
    /// added unless a policy named `default` is supplied.
    pub fn from_configs(
        configs: impl IntoIterator<Item = PolicyConfig>,
    ) -> Result<Self, PolicyError> {
        let mut policies = HashMap::new();

        for config in configs {
            let policy = RateLimitPolicy::try_from(config)?;
            let name = policy.name().to_string();
            if policies.contains_key(&name) {
                return Err(PolicyError::Duplicate(name));
            }
            policies.insert(name, Arc::new(policy));
        }

        let default = match policies.get(DEFAULT_POLICY_NAME) {
            Some(policy) => policy.clone(),
            None => {
                let policy = Arc::new(RateLimitPolicy::try_from(PolicyConfig::default())?);
                policies.insert(DEFAULT_POLICY_NAME.to_string(), policy.clone());
                policy
            }
        };

        Ok(Self { policies, default })
    }

    pub fn get(&self, name: &str) -> Option<Arc<RateLimitPolicy>> {
        self.policies.get(name).cloned()
    }

    /// The policy used by routes that don't name one.
    pub fn default_policy(&self) -> Arc<RateLimitPolicy> {
        self.default.clone()
    }

    /// Policy names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
