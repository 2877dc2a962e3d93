//! Utility functions and helpers for the lmsvd-rs library.

pub mod matrix_convert;
pub mod summation;

// Re-export commonly used utilities
pub use matrix_convert::{nalgebra_to_ndarray, nalgebra_vec_to_ndarray, ndarray_to_nalgebra};
pub use summation::{
    grouped_sum, grouped_sum_sq, stable_sum, stable_sum_sq, CompensatedSum, DEFAULT_CHANNELS,
};
