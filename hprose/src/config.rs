use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use std::time::Duration;

/// Process-wide service settings.
///
/// Every field has a default, so a partial JSON document (or an empty one)
/// is a valid configuration:
///
/// ```rust
/// # use hprose::ServiceConfig;
/// let config: ServiceConfig =
///     serde_json::from_str(r#"{"debug": true, "error_delay": "0s"}"#).unwrap();
/// assert!(config.debug);
/// assert!(config.error_delay.is_zero());
/// ```
#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct ServiceConfig {
    /// Include captured call stacks in error responses.
    #[serde_inline_default(false)]
    pub debug: bool,
    /// Encode responses without back-references for every method.
    #[serde_inline_default(false)]
    pub simple: bool,
    /// Per-call timeout. Advisory: the core never preempts a running call.
    #[serde_inline_default(Duration::from_secs(120))]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Keep-alive interval for higher layers.
    #[serde_inline_default(Duration::from_secs(3))]
    #[serde(with = "humantime_serde")]
    pub heartbeat: Duration,
    /// Delay applied before answering a request that failed as a whole.
    #[serde_inline_default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub error_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}
