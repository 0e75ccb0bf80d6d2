//! Static negotiation configuration.
//!
//! Every parameter is required to be positive. Values arriving through serde
//! are not trusted: call [`NegotiationConfig::validate`] after deserializing,
//! or construct through [`NegotiationConfig::builder`], which validates.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration shared by every agent of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Students the corridor clears per interval.
    pub capacity: u32,
    /// Minutes needed to clear one batch of `capacity` students.
    pub clearance_time_mins: u32,
    /// Largest schedule shift, in minutes, a commitment may carry.
    pub max_adjustment_mins: u32,
    /// Strikes after which an agent stops receiving offers.
    pub violation_limit: u32,
    /// Risk above which the bottleneck opens a negotiation round.
    pub risk_threshold: f64,
    /// Bound on every broker-mediated wait, in milliseconds.
    pub round_timeout_ms: u64,
    /// Minutes between consecutive batches of a staggered exit.
    #[serde(default = "default_batch_spacing")]
    pub batch_spacing_mins: u32,
}

const fn default_batch_spacing() -> u32 {
    2
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            clearance_time_mins: 2,
            max_adjustment_mins: 10,
            violation_limit: 3,
            risk_threshold: 0.4,
            round_timeout_ms: 250,
            batch_spacing_mins: default_batch_spacing(),
        }
    }
}

impl NegotiationConfig {
    /// Returns a builder seeded with the defaults.
    #[must_use]
    pub fn builder() -> NegotiationConfigBuilder {
        NegotiationConfigBuilder::default()
    }

    /// Round timeout as a [`Duration`].
    #[must_use]
    pub const fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    /// How long a classroom waits for a reply to its own offer, measured
    /// from the round's start: three quarters of the round, so a timeout
    /// still reaches the coordinator before the round closes.
    #[must_use]
    pub const fn offer_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms - self.round_timeout_ms / 4)
    }

    /// Checks every parameter.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::NonPositive { field: "capacity" });
        }
        if self.clearance_time_mins == 0 {
            return Err(ConfigError::NonPositive {
                field: "clearance_time_mins",
            });
        }
        if self.max_adjustment_mins == 0 {
            return Err(ConfigError::NonPositive {
                field: "max_adjustment_mins",
            });
        }
        if self.violation_limit == 0 {
            return Err(ConfigError::NonPositive {
                field: "violation_limit",
            });
        }
        if self.round_timeout_ms == 0 {
            return Err(ConfigError::NonPositive {
                field: "round_timeout_ms",
            });
        }
        if self.batch_spacing_mins == 0 {
            return Err(ConfigError::NonPositive {
                field: "batch_spacing_mins",
            });
        }
        if !self.risk_threshold.is_finite()
            || self.risk_threshold <= 0.0
            || self.risk_threshold > 1.0
        {
            return Err(ConfigError::OutOfRange {
                field: "risk_threshold",
                value: self.risk_threshold,
                expected: "(0, 1]",
            });
        }
        Ok(())
    }
}

/// Builder for [`NegotiationConfig`].
#[derive(Debug, Clone, Default)]
pub struct NegotiationConfigBuilder {
    config: NegotiationConfig,
}

impl NegotiationConfigBuilder {
    /// Sets the corridor capacity per interval.
    #[must_use]
    pub const fn capacity(mut self, students: u32) -> Self {
        self.config.capacity = students;
        self
    }

    /// Sets the clearance time per batch.
    #[must_use]
    pub const fn clearance_time_mins(mut self, minutes: u32) -> Self {
        self.config.clearance_time_mins = minutes;
        self
    }

    /// Sets the maximum adjustment magnitude.
    #[must_use]
    pub const fn max_adjustment_mins(mut self, minutes: u32) -> Self {
        self.config.max_adjustment_mins = minutes;
        self
    }

    /// Sets the violation limit.
    #[must_use]
    pub const fn violation_limit(mut self, strikes: u32) -> Self {
        self.config.violation_limit = strikes;
        self
    }

    /// Sets the negotiation risk threshold.
    #[must_use]
    pub const fn risk_threshold(mut self, threshold: f64) -> Self {
        self.config.risk_threshold = threshold;
        self
    }

    /// Sets the minutes between staggered exit batches.
    #[must_use]
    pub const fn batch_spacing_mins(mut self, minutes: u32) -> Self {
        self.config.batch_spacing_mins = minutes;
        self
    }

    /// Sets the round timeout, saturating at `u64::MAX` milliseconds.
    #[must_use]
    pub fn round_timeout(mut self, timeout: Duration) -> Self {
        self.config.round_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any parameter is invalid.
    pub fn build(self) -> Result<NegotiationConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(NegotiationConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_overrides() {
        let config = NegotiationConfig::builder()
            .capacity(15)
            .clearance_time_mins(3)
            .max_adjustment_mins(6)
            .violation_limit(2)
            .risk_threshold(0.5)
            .round_timeout(Duration::from_millis(40))
            .build()
            .unwrap();

        assert_eq!(config.capacity, 15);
        assert_eq!(config.clearance_time_mins, 3);
        assert_eq!(config.max_adjustment_mins, 6);
        assert_eq!(config.violation_limit, 2);
        assert_eq!(config.round_timeout(), Duration::from_millis(40));
        assert_eq!(config.batch_spacing_mins, 2);
    }

    #[test]
    fn offers_expire_before_the_round() {
        let config = NegotiationConfig::builder()
            .round_timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        assert_eq!(config.offer_timeout(), Duration::from_millis(150));
        assert!(config.offer_timeout() < config.round_timeout());
    }

    #[test]
    fn huge_timeout_saturates() {
        let config = NegotiationConfig::builder()
            .round_timeout(Duration::MAX)
            .build()
            .unwrap();
        assert_eq!(config.round_timeout_ms, u64::MAX);
    }

    #[test]
    fn zero_capacity_rejected() {
        let err = NegotiationConfig::builder().capacity(0).build().unwrap_err();
        assert_eq!(err, ConfigError::NonPositive { field: "capacity" });
    }

    #[test]
    fn zero_fields_rejected() {
        assert!(NegotiationConfig::builder().clearance_time_mins(0).build().is_err());
        assert!(NegotiationConfig::builder().max_adjustment_mins(0).build().is_err());
        assert!(NegotiationConfig::builder().violation_limit(0).build().is_err());
        assert!(NegotiationConfig::builder().batch_spacing_mins(0).build().is_err());
        assert!(NegotiationConfig::builder()
            .round_timeout(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn threshold_range_enforced() {
        assert!(NegotiationConfig::builder().risk_threshold(0.0).build().is_err());
        assert!(NegotiationConfig::builder().risk_threshold(-0.1).build().is_err());
        assert!(NegotiationConfig::builder().risk_threshold(1.5).build().is_err());
        assert!(NegotiationConfig::builder().risk_threshold(f64::NAN).build().is_err());
        assert!(NegotiationConfig::builder().risk_threshold(1.0).build().is_ok());
    }

    #[test]
    fn deserialized_config_must_be_validated() {
        let json = r#"{
            "capacity": 0,
            "clearance_time_mins": 2,
            "max_adjustment_mins": 10,
            "violation_limit": 3,
            "risk_threshold": 0.4,
            "round_timeout_ms": 100
        }"#;
        let config: NegotiationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.batch_spacing_mins, 2);
        assert!(config.validate().is_err());
    }
}
