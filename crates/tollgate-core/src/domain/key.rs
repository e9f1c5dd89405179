/// Store namespace for token buckets.
pub const DEFAULT_KEY_PREFIX: &str = "rate_limit:token_bucket";

/// Builds store keys of the form `<prefix>:<policy>:<client>`.
///
/// Namespacing by policy keeps two routes with different policies from
/// sharing one bucket for the same client.
#[derive(Debug, Clone)]
pub struct BucketKeys {
    prefix: String,
}

impl BucketKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches(':').to_string(),
        }
    }

    pub fn bucket_key(&self, policy_name: &str, client_id: &str) -> String {
        format!("{}:{}:{}", self.prefix, policy_name, client_id)
    }
}

impl Default for BucketKeys {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_key_format() {
        let keys = BucketKeys::default();
        assert_eq!(
            keys.bucket_key("search", "10.0.0.7"),
            "rate_limit:token_bucket:search:10.0.0.7"
        );
    }

    #[test]
    fn test_custom_prefix_trailing_separator() {
        let keys = BucketKeys::new("gw:");
        assert_eq!(keys.bucket_key("p", "::1"), "gw:p:::1");
    }
}
