//! # Parameter Controls
//!
//! Fit parameters are plain `f64` values in an `Array1`, ordered as the model
//! callback expects them. Everything the solver needs to know about each of
//! them lives in a [`ParameterControl`]:
//!
//! - **Bounds**: the feasible interval, always enforced by a final clip
//! - **Cyclic / bounce**: wrap by one range width, or reflect across the violated bound
//! - **Step cap**: two-sided maximum correction per step, optionally relative to `|value|`
//! - **Scale**: physical units per normalized unit, used to condition the normal equations
//! - **Group**: tag for the per-group singular-value filter
//!
//! ## Example Usage
//!
//! ```rust
//! use lmsvd_rs::parameters::{ConstraintSet, MaxChange, ParameterControl};
//! use ndarray::array;
//!
//! let constraints = ConstraintSet::new(vec![
//!     // temperature-like parameter, at most 1500 per step
//!     ParameterControl::bounded(2500.0, 50000.0)
//!         .unwrap()
//!         .with_max_change(MaxChange::symmetric(1500.0))
//!         .with_group(0),
//!     // azimuth, wraps around
//!     ParameterControl::bounded(0.0, std::f64::consts::PI)
//!         .unwrap()
//!         .with_cyclic(true)
//!         .with_group(1),
//! ])
//! .unwrap();
//!
//! let mut params = array![60000.0, 3.5];
//! constraints.enforce(&mut params);
//! assert_eq!(params[0], 50000.0);
//! assert!(params[1] < std::f64::consts::PI);
//! ```

pub mod constraints;
pub mod control;

// Re-export key types
pub use constraints::{ConstraintSet, ParameterGroups};
pub use control::{Bounds, BoundsError, MaxChange, ParameterControl};
