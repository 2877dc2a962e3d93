//! Configuration options for the Levenberg-Marquardt fitter.
//!
//! This module defines the solver-wide settings: convergence criteria, damping
//! bounds and growth factor, the singular-value threshold, regularization and
//! perturbation switches, and diagnostics. Per-parameter settings live in
//! [`crate::parameters::ConstraintSet`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LmSvdError, Result};
use crate::utils::summation::DEFAULT_CHANNELS;

/// Configuration options for the Levenberg-Marquardt fitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Minimum relative change of the cost between accepted steps. Default: 1e-5
    pub xtol: f64,

    /// Stop as soon as the cost drops below this value. Default: 1.0
    pub chi2_threshold: f64,

    /// Relative cut-off for small singular values. Default: 1e-13
    pub svd_threshold: f64,

    /// Initial damping parameter. Default: 1.0
    pub initial_lambda: f64,

    /// Minimum damping parameter. Default: 1e-4
    pub lambda_min: f64,

    /// Maximum damping parameter. Default: 1e4
    pub lambda_max: f64,

    /// Factor by which damping grows or shrinks. Default: 10.0
    pub lambda_factor: f64,

    /// Maximum consecutive rejected steps. Default: 7
    pub max_reject: usize,

    /// Report iterations through the `log` facade. Default: false
    pub verbose: bool,

    /// Fold the regularization term into cost and normal equations. Default: false
    pub regularize: bool,

    /// Scale handed to the regularization term at the start of a fit. Default: 1.0
    pub regularization_scale: f64,

    /// Work with perturbations: parameters restart from zero after every accepted step. Default: false
    pub perturbation_mode: bool,

    /// Number of interleaved data channels for the grouped sums. Default: 4
    pub channels: usize,

    /// Tag printed in diagnostics to tell concurrent fits apart. Default: 0
    pub worker: u32,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            xtol: 1e-5,
            chi2_threshold: 1.0,
            svd_threshold: 1e-13,
            initial_lambda: 1.0,
            lambda_min: 1e-4,
            lambda_max: 1e4,
            lambda_factor: 10.0,
            max_reject: 7,
            verbose: false,
            regularize: false,
            regularization_scale: 1.0,
            perturbation_mode: false,
            channels: DEFAULT_CHANNELS,
            worker: 0,
        }
    }
}

impl LmConfig {
    /// Parses a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LmConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serializes the configuration as pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks that the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if !(self.lambda_min > 0.0) || !self.lambda_min.is_finite() {
            return Err(LmSvdError::InvalidConfig(format!(
                "lambda_min must be positive, got {}",
                self.lambda_min
            )));
        }
        if !(self.lambda_max >= self.lambda_min) || !self.lambda_max.is_finite() {
            return Err(LmSvdError::InvalidConfig(format!(
                "lambda_max ({}) must be finite and not below lambda_min ({})",
                self.lambda_max, self.lambda_min
            )));
        }
        if !(self.lambda_factor > 1.0) || !self.lambda_factor.is_finite() {
            return Err(LmSvdError::InvalidConfig(format!(
                "lambda_factor must be larger than 1, got {}",
                self.lambda_factor
            )));
        }
        if self.initial_lambda.is_nan() {
            return Err(LmSvdError::InvalidConfig(
                "initial_lambda is NaN".to_string(),
            ));
        }
        if !(self.svd_threshold >= 0.0) {
            return Err(LmSvdError::InvalidConfig(format!(
                "svd_threshold must be non-negative, got {}",
                self.svd_threshold
            )));
        }
        if self.xtol.is_nan() || self.chi2_threshold.is_nan() {
            return Err(LmSvdError::InvalidConfig(
                "xtol and chi2_threshold must be numbers".to_string(),
            ));
        }
        if self.max_reject == 0 {
            return Err(LmSvdError::InvalidConfig(
                "max_reject must be at least 1".to_string(),
            ));
        }
        if self.channels == 0 {
            return Err(LmSvdError::InvalidConfig(
                "channels must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_reject, 7);
        assert_eq!(config.channels, 4);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            LmConfig::from_json_str(r#"{"xtol": 1e-6, "chi2_threshold": 1e-10, "verbose": true}"#)
                .unwrap();
        assert_eq!(config.xtol, 1e-6);
        assert_eq!(config.chi2_threshold, 1e-10);
        assert!(config.verbose);
        assert_eq!(config.lambda_max, 1e4);
    }

    #[test]
    fn test_json_round_trip() {
        let config = LmConfig {
            perturbation_mode: true,
            worker: 12,
            ..LmConfig::default()
        };
        let json = config.to_json_string().unwrap();
        assert_eq!(LmConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_damping_bounds() {
        let config = LmConfig {
            lambda_min: 10.0,
            lambda_max: 1.0,
            ..LmConfig::default()
        };
        assert!(matches!(config.validate(), Err(LmSvdError::InvalidConfig(_))));

        let config = LmConfig {
            lambda_factor: 1.0,
            ..LmConfig::default()
        };
        assert!(config.validate().is_err());

        assert!(LmConfig::from_json_str(r#"{"max_reject": 0}"#).is_err());
    }
}
