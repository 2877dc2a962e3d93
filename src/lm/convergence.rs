//! Termination criteria for the Levenberg-Marquardt fitter.
//!
//! A fit ends when the cost drops below the target, when two consecutive
//! accepted steps barely change the cost, after too many rejected steps in a
//! row, or when the iteration budget is spent. Model failures and NaN costs end
//! it early as errors.

use std::fmt;

/// Why a fit stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FitStatus {
    /// The cost dropped below `chi2_threshold`.
    ChiSquareThreshold,

    /// Two consecutive accepted steps changed the cost by less than `xtol`.
    Stalled,

    /// `max_reject` consecutive steps were rejected.
    MaxRejections,

    /// The iteration budget was spent.
    MaxIterations,

    /// The model callback reported an error.
    CallbackFailure(String),

    /// The cost became NaN.
    NumericalDivergence,
}

impl FitStatus {
    /// Returns true if the fit stopped on one of its convergence criteria.
    pub fn is_converged(&self) -> bool {
        matches!(self, FitStatus::ChiSquareThreshold | FitStatus::Stalled)
    }

    /// Returns true if the fit was aborted by an error.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            FitStatus::CallbackFailure(_) | FitStatus::NumericalDivergence
        )
    }

    /// Returns a description of the status.
    pub fn description(&self) -> String {
        match self {
            FitStatus::ChiSquareThreshold => "Converged: cost below threshold".to_string(),
            FitStatus::Stalled => "Converged: relative cost change below xtol".to_string(),
            FitStatus::MaxRejections => {
                "Terminated: too many consecutive rejected steps".to_string()
            }
            FitStatus::MaxIterations => "Terminated: maximum iterations reached".to_string(),
            FitStatus::CallbackFailure(msg) => format!("Error: model evaluation failed: {}", msg),
            FitStatus::NumericalDivergence => "Error: cost became NaN".to_string(),
        }
    }
}

impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Relative cost change `2(new − old)/(new + old)`.
pub fn relative_change(new: f64, old: f64) -> f64 {
    2.0 * (new - old) / (new + old)
}

/// Detects two consecutive accepted steps with a small relative cost change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StallDetector {
    xtol: f64,
    armed: bool,
    stalled: bool,
}

impl StallDetector {
    pub fn new(xtol: f64) -> Self {
        Self {
            xtol,
            armed: false,
            stalled: false,
        }
    }

    /// Records an accepted step with relative cost change `reldchi`.
    ///
    /// Returns true once two consecutive small changes have been seen.
    pub fn record(&mut self, reldchi: f64) -> bool {
        if reldchi.abs() < self.xtol {
            if self.armed {
                self.stalled = true;
            }
            self.armed = true;
        } else {
            self.armed = false;
        }
        self.stalled
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }
}
