//! Mediator configuration.
//!
//! Every behavioural toggle lives here and is fixed once a
//! [`Mediator`](crate::Mediator) is built.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the handlers of one publish are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStrategy {
    /// One handler at a time, in plan order
    #[default]
    Sequential,
    /// All handlers polled together on the publishing task
    Concurrent,
}

/// What a failing notification handler means for its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Attempt every handler and report all failures
    #[default]
    ContinueOnError,
    /// Skip the remaining handlers after the first failure
    ///
    /// Only meaningful with [`PublishStrategy::Sequential`]; concurrent
    /// handlers are already running when a sibling fails.
    StopOnFirstError,
}

/// Errors from loading a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The document is not a valid configuration
    #[error("Invalid mediator configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Mediator configuration.
///
/// # Example
///
/// ```
/// use switchyard_runtime::config::{FailurePolicy, MediatorConfig, PublishStrategy};
///
/// let config = MediatorConfig::default()
///     .with_publish_strategy(PublishStrategy::Concurrent)
///     .with_notification_middleware(false);
///
/// assert_eq!(config.failure_policy, FailurePolicy::ContinueOnError);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// How notification handlers are driven
    pub publish_strategy: PublishStrategy,
    /// What a failing notification handler means for its siblings
    pub failure_policy: FailurePolicy,
    /// Whether notification handlers run through notification middleware
    pub notification_middleware: bool,
    /// Whether the mediator keeps a [`StatisticsTracker`](crate::statistics::StatisticsTracker)
    pub record_statistics: bool,
    /// Whether dispatches are reported through the `metrics` facade
    pub record_metrics: bool,
}

impl MediatorConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the publish strategy
    #[must_use]
    pub const fn with_publish_strategy(mut self, strategy: PublishStrategy) -> Self {
        self.publish_strategy = strategy;
        self
    }

    /// Set the failure policy
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Enable or disable notification middleware
    #[must_use]
    pub const fn with_notification_middleware(mut self, enabled: bool) -> Self {
        self.notification_middleware = enabled;
        self
    }

    /// Enable or disable the built-in statistics tracker
    #[must_use]
    pub const fn with_statistics(mut self, enabled: bool) -> Self {
        self.record_statistics = enabled;
        self
    }

    /// Enable or disable `metrics` reporting
    #[must_use]
    pub const fn with_metrics(mut self, enabled: bool) -> Self {
        self.record_metrics = enabled;
        self
    }
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            publish_strategy: PublishStrategy::Sequential,
            failure_policy: FailurePolicy::ContinueOnError,
            notification_middleware: true,
            record_statistics: false,
            record_metrics: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_attempt_every_handler_sequentially() {
        let config = MediatorConfig::default();
        assert_eq!(config.publish_strategy, PublishStrategy::Sequential);
        assert_eq!(config.failure_policy, FailurePolicy::ContinueOnError);
        assert!(config.notification_middleware);
        assert!(!config.record_statistics);
    }

    #[test]
    fn test_from_json_fills_missing_fields() {
        let config = MediatorConfig::from_json(
            r#"{"publish_strategy": "concurrent", "failure_policy": "stop_on_first_error"}"#,
        )
        .unwrap();

        assert_eq!(config.publish_strategy, PublishStrategy::Concurrent);
        assert_eq!(config.failure_policy, FailurePolicy::StopOnFirstError);
        assert!(config.notification_middleware);
    }

    #[test]
    fn test_from_json_rejects_unknown_strategy() {
        let error = MediatorConfig::from_json(r#"{"publish_strategy": "parallel"}"#).unwrap_err();
        assert!(error.to_string().starts_with("Invalid mediator configuration"));
    }

    #[test]
    fn test_builders_chain() {
        let config = MediatorConfig::default()
            .with_statistics(true)
            .with_metrics(true)
            .with_notification_middleware(false);

        assert!(config.record_statistics);
        assert!(config.record_metrics);
        assert!(!config.notification_middleware);
    }
}
