//! L2 regularization term.
//!
//! The model callback fills a [`Regularization`] with the individual penalties
//! `γ_k` and their derivatives `∂γ_k/∂p_i`. The solver adds `Σ γ_k²` to the cost
//! and folds `LᵀL` / `−Lᵀγ` into the normal equations.
//!
//! The term is a value type. Exploratory evaluations inside the damping line
//! search each work on their own clone, so the penalties and derivatives used to
//! assemble the next system are never overwritten by a trial that is later
//! discarded.

use ndarray::{Array1, Array2};

use crate::error::{LmSvdError, Result};
use crate::utils::summation::{stable_sum_sq, CompensatedSum};

#[derive(Debug, Clone, PartialEq)]
pub struct Regularization {
    enabled: bool,
    scale: f64,
    penalties: Array1<f64>,
    derivatives: Array2<f64>,
}

impl Default for Regularization {
    fn default() -> Self {
        Self::disabled()
    }
}

impl Regularization {
    /// Term with `nreg` penalties over `npar` parameters. `npar == 0` yields a disabled term.
    pub fn new(npar: usize, nreg: usize, scale: f64) -> Self {
        if npar == 0 {
            return Self::disabled();
        }
        Self {
            enabled: true,
            scale,
            penalties: Array1::zeros(nreg),
            derivatives: Array2::zeros((nreg, npar)),
        }
    }

    /// Term that contributes nothing anywhere.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            scale: 0.0,
            penalties: Array1::zeros(0),
            derivatives: Array2::zeros((0, 0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of penalty terms.
    pub fn len(&self) -> usize {
        self.penalties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.penalties.is_empty()
    }

    /// Number of parameters the derivatives refer to.
    pub fn parameter_count(&self) -> usize {
        self.derivatives.ncols()
    }

    /// Weight the model callback applies to its penalties.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
    }

    pub fn penalties(&self) -> &Array1<f64> {
        &self.penalties
    }

    pub fn penalties_mut(&mut self) -> &mut Array1<f64> {
        &mut self.penalties
    }

    /// `nreg × npar` derivative matrix.
    pub fn derivatives(&self) -> &Array2<f64> {
        &self.derivatives
    }

    pub fn derivatives_mut(&mut self) -> &mut Array2<f64> {
        &mut self.derivatives
    }

    /// Sum of squared penalties, or 0 when disabled.
    pub fn penalty(&self) -> f64 {
        if !self.enabled || self.penalties.is_empty() {
            return 0.0;
        }
        match self.penalties.as_slice() {
            Some(values) => stable_sum_sq(values),
            None => stable_sum_sq(&self.penalties.to_vec()),
        }
    }

    /// Clears penalties and derivatives in place.
    pub fn zero(&mut self) {
        if self.enabled {
            self.penalties.fill(0.0);
            self.derivatives.fill(0.0);
        }
    }

    /// Takes over the penalty values of `other`, keeping this term's derivatives.
    pub fn copy_penalties_from(&mut self, other: &Regularization) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if other.penalties.len() != self.penalties.len() {
            return Err(LmSvdError::DimensionMismatch(format!(
                "expected {} penalties, got {}",
                self.penalties.len(),
                other.penalties.len()
            )));
        }
        self.penalties.assign(&other.penalties);
        Ok(())
    }

    /// `LᵀL`, the `npar × npar` regularization block of the normal equations.
    pub fn normal_matrix(&self) -> Array2<f64> {
        let npar = self.parameter_count();
        let mut out = Array2::zeros((npar, npar));
        if !self.enabled {
            return out;
        }
        for y in 0..npar {
            for x in 0..=y {
                let value = self
                    .derivatives
                    .rows()
                    .into_iter()
                    .map(|row| row[x] * row[y])
                    .collect::<CompensatedSum>()
                    .value();
                out[[y, x]] = value;
                out[[x, y]] = value;
            }
        }
        out
    }

    /// `−Lᵀγ`, the regularization part of the right-hand side.
    pub fn normal_rhs(&self) -> Array1<f64> {
        let npar = self.parameter_count();
        let mut out = Array1::zeros(npar);
        if !self.enabled {
            return out;
        }
        for y in 0..npar {
            let value = self
                .derivatives
                .rows()
                .into_iter()
                .zip(self.penalties.iter())
                .map(|(row, &gamma)| row[y] * gamma)
                .collect::<CompensatedSum>()
                .value();
            out[y] = -value;
        }
        out
    }
}
