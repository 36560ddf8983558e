//! Supervisor configuration.

use std::time::Duration;

use crate::{Error, Result};

/// Default IDLE timeout: RFC 2177 asks clients to re-issue IDLE at least
/// every 29 minutes.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(29 * 60);

/// How the supervisor finds expired sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SupervisorMode {
    /// A dedicated task blocks until the next deadline.
    #[default]
    Continuous,
    /// A ticker sweeps the registry every `period`.
    Periodic {
        /// Time between sweeps.
        period: Duration,
    },
}

/// What a supervisor reports when it is shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CancellationPolicy {
    /// Shutdown is a clean exit.
    #[default]
    Swallow,
    /// Shutdown surfaces as [`Error::Interrupted`].
    Propagate,
}

/// IDLE supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SupervisorConfig {
    /// Deployment strategy.
    pub mode: SupervisorMode,
    /// Shutdown reporting.
    pub cancellation: CancellationPolicy,
    /// Timeout used when drivers register without an explicit one.
    pub default_idle_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisorConfig {
    /// Continuous mode, swallowing shutdown, 29-minute default timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mode: SupervisorMode::Continuous,
            cancellation: CancellationPolicy::Swallow,
            default_idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Creates a configuration builder.
    #[must_use]
    pub const fn builder() -> SupervisorConfigBuilder {
        SupervisorConfigBuilder::new()
    }

    /// Checks that every duration is non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if let SupervisorMode::Periodic { period } = self.mode
            && period.is_zero()
        {
            return Err(Error::Config("sweep period must be non-zero".to_string()));
        }
        if self.default_idle_timeout.is_zero() {
            return Err(Error::Config(
                "default idle timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`SupervisorConfig`].
#[derive(Debug, Clone)]
pub struct SupervisorConfigBuilder {
    config: SupervisorConfig,
}

impl Default for SupervisorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisorConfigBuilder {
    /// Starts from [`SupervisorConfig::new`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            config: SupervisorConfig::new(),
        }
    }

    /// Uses a dedicated blocking task.
    #[must_use]
    pub const fn continuous(mut self) -> Self {
        self.config.mode = SupervisorMode::Continuous;
        self
    }

    /// Sweeps every `period` instead of blocking.
    #[must_use]
    pub const fn periodic(mut self, period: Duration) -> Self {
        self.config.mode = SupervisorMode::Periodic { period };
        self
    }

    /// Sets the shutdown reporting policy.
    #[must_use]
    pub const fn cancellation(mut self, policy: CancellationPolicy) -> Self {
        self.config.cancellation = policy;
        self
    }

    /// Sets the default IDLE timeout.
    #[must_use]
    pub const fn default_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_idle_timeout = timeout;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a duration is zero.
    pub fn build(self) -> Result<SupervisorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.mode, SupervisorMode::Continuous);
        assert_eq!(config.cancellation, CancellationPolicy::Swallow);
        assert_eq!(config.default_idle_timeout, Duration::from_secs(1740));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SupervisorConfig::builder()
            .periodic(Duration::from_secs(5))
            .cancellation(CancellationPolicy::Propagate)
            .default_idle_timeout(Duration::from_secs(600))
            .build()
            .unwrap();

        assert_eq!(
            config.mode,
            SupervisorMode::Periodic {
                period: Duration::from_secs(5)
            }
        );
        assert_eq!(config.cancellation, CancellationPolicy::Propagate);
        assert_eq!(config.default_idle_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_zero_durations_rejected() {
        let err = SupervisorConfig::builder()
            .periodic(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("period")));

        let err = SupervisorConfig::builder()
            .default_idle_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("timeout")));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_from_settings() {
        let json = r#"{
            "mode": { "periodic": { "period": { "secs": 10, "nanos": 0 } } },
            "cancellation": "propagate"
        }"#;
        let config: SupervisorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.mode,
            SupervisorMode::Periodic {
                period: Duration::from_secs(10)
            }
        );
        assert_eq!(config.cancellation, CancellationPolicy::Propagate);
        assert_eq!(config.default_idle_timeout, DEFAULT_IDLE_TIMEOUT);
    }
}
