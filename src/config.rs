use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine and cache settings.
///
/// Deserializes from any serde format; missing fields take their defaults.
///
/// ```
/// use household_authz::EngineConfig;
/// let config: EngineConfig = serde_json::from_str(r#"{"cache_ttl_secs": 60}"#).unwrap();
/// assert_eq!(config.cache_ttl().as_secs(), 60);
/// assert!(config.eager_recompute);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of cached rule sets.
    pub cache_capacity: usize,
    /// Lifetime of a cached rule set, in seconds.
    pub cache_ttl_secs: u64,
    /// Recompute and persist affected users right after a role-change event
    /// instead of on their next query.
    pub eager_recompute: bool,
}

impl EngineConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 10_000,
            cache_ttl_secs: 300,
            eager_recompute: true,
        }
    }
}
