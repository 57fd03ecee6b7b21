//! Tuning profile for the growth filter
//!
//! A `ConfigProfile` is an immutable, versioned set of filter parameters. The
//! surrounding system decides which profile is active; every estimator call
//! receives the resolved profile explicitly.

use crate::error::ScoreError;
use serde::{Deserialize, Serialize};

/// Default process noise Q (per-day variance)
pub const DEFAULT_PROCESS_NOISE: f64 = 0.1;

/// Default initial uncertainty P0
pub const DEFAULT_INITIAL_UNCERTAINTY: f64 = 10.0;

/// Default time-decay factor λ
pub const DEFAULT_TIME_DECAY_FACTOR: f64 = 0.01;

/// Default minimum observations before trend claims are trusted
pub const DEFAULT_MIN_OBSERVATIONS: u32 = 3;

/// Default cap on the elapsed-days term
pub const DEFAULT_MAX_DAYS_BETWEEN: u32 = 30;

/// Filter tuning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigProfile {
    /// Base per-day variance injected into propagation (Q > 0)
    #[serde(alias = "processNoise")]
    pub process_noise: f64,
    /// Variance of both state dimensions at initialization (P0 > 0)
    #[serde(alias = "initialUncertainty")]
    pub initial_uncertainty: f64,
    /// Additional uncertainty per elapsed day (λ >= 0)
    #[serde(alias = "timeDecayFactor")]
    pub time_decay_factor: f64,
    /// Below this count a state is flagged unreliable
    #[serde(alias = "minObservations")]
    pub min_observations: u32,
    /// Cap on elapsed days used in propagation
    #[serde(alias = "maxDaysBetween")]
    pub max_days_between: u32,
    /// Profile revision
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

impl Default for ConfigProfile {
    fn default() -> Self {
        Self {
            process_noise: DEFAULT_PROCESS_NOISE,
            initial_uncertainty: DEFAULT_INITIAL_UNCERTAINTY,
            time_decay_factor: DEFAULT_TIME_DECAY_FACTOR,
            min_observations: DEFAULT_MIN_OBSERVATIONS,
            max_days_between: DEFAULT_MAX_DAYS_BETWEEN,
            version: default_version(),
        }
    }
}

impl ConfigProfile {
    /// Reject profiles the filter cannot run with.
    pub fn validate(&self) -> Result<(), ScoreError> {
        if !self.process_noise.is_finite() || self.process_noise <= 0.0 {
            return Err(ScoreError::InvalidConfig(format!(
                "process_noise must be > 0, got {}",
                self.process_noise
            )));
        }
        if !self.initial_uncertainty.is_finite() || self.initial_uncertainty <= 0.0 {
            return Err(ScoreError::InvalidConfig(format!(
                "initial_uncertainty must be > 0, got {}",
                self.initial_uncertainty
            )));
        }
        if !self.time_decay_factor.is_finite() || self.time_decay_factor < 0.0 {
            return Err(ScoreError::InvalidConfig(format!(
                "time_decay_factor must be >= 0, got {}",
                self.time_decay_factor
            )));
        }
        if self.min_observations < 1 {
            return Err(ScoreError::InvalidConfig(
                "min_observations must be >= 1".to_string(),
            ));
        }
        if self.max_days_between < 1 {
            return Err(ScoreError::InvalidConfig(
                "max_days_between must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a profile from JSON
    pub fn from_json(json: &str) -> Result<Self, ScoreError> {
        let profile: ConfigProfile = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Serialize the profile to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_is_valid() {
        assert!(ConfigProfile::default().validate().is_ok());
    }

    #[test]
    fn test_zero_process_noise_rejected() {
        let profile = ConfigProfile {
            process_noise: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            profile.validate(),
            Err(ScoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_each_bound_rejected() {
        let cases = [
            ConfigProfile {
                initial_uncertainty: -1.0,
                ..Default::default()
            },
            ConfigProfile {
                time_decay_factor: -0.01,
                ..Default::default()
            },
            ConfigProfile {
                min_observations: 0,
                ..Default::default()
            },
            ConfigProfile {
                max_days_between: 0,
                ..Default::default()
            },
            ConfigProfile {
                process_noise: f64::NAN,
                ..Default::default()
            },
        ];

        for profile in cases {
            assert!(
                matches!(profile.validate(), Err(ScoreError::InvalidConfig(_))),
                "expected rejection for {:?}",
                profile
            );
        }
    }

    #[test]
    fn test_zero_time_decay_allowed() {
        let profile = ConfigProfile {
            time_decay_factor: 0.0,
            ..Default::default()
        };
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn test_from_json_accepts_camel_case() {
        let json = r#"{
            "processNoise": 0.2,
            "initialUncertainty": 5.0,
            "timeDecayFactor": 0.05,
            "minObservations": 4,
            "maxDaysBetween": 14
        }"#;

        let profile = ConfigProfile::from_json(json).unwrap();
        assert_eq!(profile.process_noise, 0.2);
        assert_eq!(profile.min_observations, 4);
        assert_eq!(profile.max_days_between, 14);
        assert_eq!(profile.version, 1);
    }

    #[test]
    fn test_from_json_validates() {
        let json = r#"{
            "process_noise": 0.0,
            "initial_uncertainty": 10.0,
            "time_decay_factor": 0.01,
            "min_observations": 3,
            "max_days_between": 30
        }"#;
        assert!(matches!(
            ConfigProfile::from_json(json),
            Err(ScoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let profile = ConfigProfile {
            version: 7,
            ..Default::default()
        };
        let loaded = ConfigProfile::from_json(&profile.to_json().unwrap()).unwrap();
        assert_eq!(loaded, profile);
    }
}
