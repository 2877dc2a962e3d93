//! Levenberg-Marquardt fitter.
//!
//! This module provides the damped least-squares solver: normal equations solved
//! through a filtered SVD, a line search over the damping parameter, and the
//! outer loop that decides when to accept a step and when to stop.

// Include module declarations and re-exports
pub mod algorithm;
pub mod bracket;
pub mod config;
pub mod convergence;
pub mod step;
pub mod svd;
pub mod trust_region;

// Re-export key types
pub use algorithm::{LevenbergMarquardt, LmResult};
pub use bracket::{Bracketer, SearchOutcome, Trial};
pub use config::LmConfig;
pub use convergence::{FitStatus, StallDetector};
pub use step::{LmStep, NormalEquations, StepResult};
pub use trust_region::Damping;
