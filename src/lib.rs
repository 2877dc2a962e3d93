//! # lmsvd-rs
//!
//! `lmsvd-rs` is a Levenberg-Marquardt solver for nonlinear least-squares
//! problems whose parameters span several physical kinds with very different
//! sensitivities.
//!
//! The library provides:
//! - Normal equations solved through an SVD, with singular values filtered per parameter group
//! - A line search over the damping parameter with parabolic refinement
//! - Per-parameter bounds, wrapping, reflection, step caps and scale factors
//! - An optional L2 regularization term supplied by the model
//! - Compensated (Kahan-Babuška) summation for every large reduction
//!
//! ## Basic Usage
//!
//! ```
//! use lmsvd_rs::{FnProblem, LevenbergMarquardt, Regularization};
//! use ndarray::array;
//!
//! // y = a·t + b
//! let t = array![0.0, 1.0, 2.0, 3.0, 4.0];
//! let y = array![1.0, 3.0, 5.0, 7.0, 9.0];
//! let mut problem = FnProblem::new(2, 5, move |p, res, jac, _reg, _accepted| {
//!     for w in 0..t.len() {
//!         res[w] = y[w] - (p[0] * t[w] + p[1]);
//!     }
//!     if let Some(jac) = jac {
//!         for w in 0..t.len() {
//!             jac[[0, w]] = t[w];
//!             jac[[1, w]] = 1.0;
//!         }
//!     }
//!     Ok(())
//! });
//!
//! let mut params = array![0.0, 0.0];
//! let result = LevenbergMarquardt::new()
//!     .with_chi2_threshold(1e-12)
//!     .fit(&mut problem, &mut params, 50, &mut Regularization::disabled())
//!     .unwrap();
//!
//! assert!(result.success);
//! assert!((params[0] - 2.0).abs() < 1e-4);
//! ```

// Public modules
pub mod error;

// Parameter system
pub mod parameters;

pub mod utils;

pub mod regularization;

pub mod problem;

pub mod lm;

// Re-exports for convenience
pub use error::{LmSvdError, Result};
pub use lm::{FitStatus, LevenbergMarquardt, LmConfig, LmResult};
pub use parameters::{ConstraintSet, ParameterControl};
pub use problem::{FnProblem, Problem};
pub use regularization::Regularization;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
