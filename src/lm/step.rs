//! Step calculation for the Levenberg-Marquardt algorithm.
//!
//! The normal equations `H = JᵀJ`, `g = Jᵀr` are assembled once per outer
//! iteration. Every trial damping value then works on a damped copy:
//! `H[i][i] += λ·H[i][i]`, solved through the filtered SVD. The raw correction
//! is converted back to physical units, capped and added to the current
//! parameters, and the result is made feasible.

use ndarray::{Array1, Array2, Axis};

use crate::error::{LmSvdError, Result};
use crate::lm::svd::solve_filtered;
use crate::parameters::{ConstraintSet, ParameterGroups};
use crate::regularization::Regularization;
use crate::utils::summation::grouped_sum;

/// Undamped normal equations of one linearization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalEquations {
    /// `JᵀJ (+ LᵀL)`, symmetric `npar × npar`
    pub hessian: Array2<f64>,

    /// `Jᵀr (− Lᵀγ)`
    pub gradient: Array1<f64>,
}

impl NormalEquations {
    /// Assembles the system from an `npar × nd` Jacobian and the residuals.
    ///
    /// Inner products over the data use channel-grouped compensated sums.
    /// When `regularization` is given, its blocks are added to both sides.
    pub fn assemble(
        jacobian: &Array2<f64>,
        residuals: &Array1<f64>,
        regularization: Option<&Regularization>,
        channels: usize,
    ) -> Result<Self> {
        let npar = jacobian.nrows();
        let nd = jacobian.ncols();
        if residuals.len() != nd {
            return Err(LmSvdError::DimensionMismatch(format!(
                "Jacobian has {} columns but there are {} residuals",
                nd,
                residuals.len()
            )));
        }

        let mut hessian = Array2::zeros((npar, npar));
        let mut gradient = Array1::zeros(npar);
        let mut scratch = vec![0.0; nd];

        for (y, row_y) in jacobian.axis_iter(Axis(0)).enumerate() {
            for (x, row_x) in jacobian.axis_iter(Axis(0)).enumerate().take(y + 1) {
                for (s, (a, b)) in scratch.iter_mut().zip(row_y.iter().zip(row_x.iter())) {
                    *s = a * b;
                }
                let value = grouped_sum(&scratch, channels);
                hessian[[y, x]] = value;
                hessian[[x, y]] = value;
            }

            for (s, (a, r)) in scratch.iter_mut().zip(row_y.iter().zip(residuals.iter())) {
                *s = a * r;
            }
            gradient[y] = grouped_sum(&scratch, channels);
        }

        if let Some(reg) = regularization.filter(|r| r.is_enabled()) {
            if reg.parameter_count() != npar {
                return Err(LmSvdError::DimensionMismatch(format!(
                    "regularization covers {} parameters, Jacobian has {}",
                    reg.parameter_count(),
                    npar
                )));
            }
            hessian += &reg.normal_matrix();
            gradient += &reg.normal_rhs();
        }

        Ok(Self { hessian, gradient })
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.gradient.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gradient.is_empty()
    }

    /// Copy with the diagonal scaled by `1 + lambda`.
    pub fn damped(&self, lambda: f64) -> Self {
        let mut out = self.clone();
        for i in 0..out.len() {
            out.hessian[[i, i]] += lambda * out.hessian[[i, i]];
        }
        out
    }
}

/// Result of a Levenberg-Marquardt step calculation.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Updated parameters, capped and made feasible
    pub params: Array1<f64>,

    /// Correction actually applied, `params − current` before enforcement
    pub step: Array1<f64>,

    /// The damping parameter used to calculate the step
    pub lambda: f64,
}

/// Turns the normal equations into trial parameter vectors.
#[derive(Debug, Clone)]
pub struct LmStep<'a> {
    constraints: &'a ConstraintSet,
    groups: ParameterGroups,
    svd_threshold: f64,
    enforce: bool,
}

impl<'a> LmStep<'a> {
    /// # Arguments
    ///
    /// * `constraints` - Per-parameter controls (scale, step cap, bounds, group)
    /// * `svd_threshold` - Relative cut-off for small singular values
    /// * `enforce` - Whether to make trial parameters feasible. Off in perturbation mode.
    pub fn new(constraints: &'a ConstraintSet, svd_threshold: f64, enforce: bool) -> Self {
        Self {
            constraints,
            groups: constraints.groups(),
            svd_threshold,
            enforce,
        }
    }

    /// Computes the parameters reached from `current` with damping `lambda`.
    pub fn propose(
        &self,
        system: &NormalEquations,
        current: &Array1<f64>,
        lambda: f64,
    ) -> Result<StepResult> {
        if current.len() != system.len() || current.len() != self.constraints.len() {
            return Err(LmSvdError::DimensionMismatch(format!(
                "{} parameters, {} equations, {} controls",
                current.len(),
                system.len(),
                self.constraints.len()
            )));
        }

        let damped = system.damped(lambda);
        let mut step = solve_filtered(
            &damped.hessian,
            &damped.gradient,
            &self.groups,
            self.svd_threshold,
        )?;

        step *= &self.constraints.scales();
        self.constraints.cap_step(&mut step, current);

        let mut params = current + &step;
        if self.enforce {
            self.constraints.enforce(&mut params);
        }

        Ok(StepResult {
            params,
            step,
            lambda,
        })
    }
}
