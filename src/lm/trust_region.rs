//! Damping parameter bookkeeping for the Levenberg-Marquardt fitter.
//!
//! The damping value moves in two ways: the line search picks the best value
//! around the current one, and the driver then prepares the value for the next
//! iteration depending on whether the step was accepted.

use crate::lm::config::LmConfig;

/// Damping at or above this value is pulled back before deciding on a step.
const COLLAPSE_AT: f64 = 1e4;
const COLLAPSE_TO: f64 = 1e2;

/// After an accepted step, damping at or below `RAISE_AT` restarts from `RAISE_TO`.
const RAISE_AT: f64 = 1e-3;
const RAISE_TO: f64 = 1e-1;

/// After an accepted step, damping at or above `LOWER_AT` is lowered to `LOWER_TO`.
const LOWER_AT: f64 = 1e5;
const LOWER_TO: f64 = 1e4;

/// Current damping value and its limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Damping {
    /// Current value of the damping parameter
    pub lambda: f64,

    /// Minimum allowed value for the damping parameter
    pub lambda_min: f64,

    /// Maximum allowed value for the damping parameter
    pub lambda_max: f64,

    /// Growth factor
    pub factor: f64,
}

impl Damping {
    /// Starts from the configured initial value, clamped to the configured limits.
    pub fn from_config(config: &LmConfig) -> Self {
        let mut damping = Self {
            lambda: config.initial_lambda,
            lambda_min: config.lambda_min,
            lambda_max: config.lambda_max,
            factor: config.lambda_factor,
        };
        damping.lambda = damping.clamp(damping.lambda);
        damping
    }

    /// Restricts a value to `[lambda_min, lambda_max]`.
    pub fn clamp(&self, lambda: f64) -> f64 {
        lambda.min(self.lambda_max).max(self.lambda_min)
    }

    /// Adopts the value chosen by the line search, pulling runaway values back.
    pub fn settle(&mut self, searched: f64) {
        self.lambda = if searched >= COLLAPSE_AT {
            COLLAPSE_TO
        } else {
            searched
        };
    }

    /// Prepares damping after an accepted step. The line search shrinks it again
    /// if smaller values work, so growing here keeps the next search bracketed.
    pub fn accept(&mut self) {
        let mut lambda = self.lambda * self.factor;
        if lambda <= RAISE_AT {
            lambda = RAISE_TO;
        }
        if lambda >= LOWER_AT {
            lambda = LOWER_TO;
        }
        self.lambda = lambda;
    }

    /// Grows damping by `factor²` after a rejected step.
    pub fn reject(&mut self) {
        self.lambda = self.clamp(self.lambda * self.factor * self.factor);
    }
}
