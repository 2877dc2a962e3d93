//! Problem definition trait and implementations.
//!
//! This module defines the `Problem` trait, the only point where the solver
//! talks to the outside world. A problem evaluates the weighted residuals of a
//! model for a parameter vector and, when asked, the Jacobian and the
//! regularization term. [`FnProblem`] wraps a closure so that callers can
//! capture whatever model state they need without defining a type.

use ndarray::{Array1, Array2};

use crate::error::Result;
use crate::regularization::Regularization;

/// A nonlinear least-squares model evaluated by the fitter.
///
/// Conventions:
///
/// * `residuals[w] = (observed[w] − model[w]) / σ[w]`, length [`Problem::residual_count`]
/// * `jacobian` has shape `npar × nd`; row `p` holds `∂(model/σ)/∂p` in physical units
/// * `regularization` receives the penalties `γ_k` and derivatives `∂γ_k/∂p`
///
/// The output buffers arrive zeroed. Returning an error aborts the fit.
pub trait Problem {
    /// Number of fit parameters.
    fn parameter_count(&self) -> usize;

    /// Number of residuals.
    fn residual_count(&self) -> usize;

    /// Evaluate the model at `params`.
    ///
    /// # Arguments
    ///
    /// * `params` - Parameter values (physical units, or a perturbation in perturbation mode)
    /// * `residuals` - Output residual vector
    /// * `jacobian` - Output Jacobian, `None` when only the cost is needed
    /// * `regularization` - Output regularization term
    /// * `accepted` - True when `params` is an accepted perturbation to fold into the model state
    fn evaluate(
        &mut self,
        params: &Array1<f64>,
        residuals: &mut Array1<f64>,
        jacobian: Option<&mut Array2<f64>>,
        regularization: &mut Regularization,
        accepted: bool,
    ) -> Result<()>;
}

/// Adapter turning a closure into a [`Problem`].
///
/// ```
/// use lmsvd_rs::problem::{FnProblem, Problem};
/// use lmsvd_rs::Regularization;
/// use ndarray::{array, Array1};
///
/// let t = array![0.0, 1.0, 2.0];
/// let y = array![1.0, 3.0, 5.0];
/// let mut problem = FnProblem::new(2, 3, move |p, res, jac, _reg, _accepted| {
///     for w in 0..t.len() {
///         res[w] = y[w] - (p[0] * t[w] + p[1]);
///     }
///     if let Some(jac) = jac {
///         for w in 0..t.len() {
///             jac[[0, w]] = t[w];
///             jac[[1, w]] = 1.0;
///         }
///     }
///     Ok(())
/// });
///
/// let mut res = Array1::zeros(3);
/// let mut reg = Regularization::disabled();
/// problem.evaluate(&array![2.0, 1.0], &mut res, None, &mut reg, false).unwrap();
/// assert_eq!(res, array![0.0, 0.0, 0.0]);
/// ```
pub struct FnProblem<F> {
    npar: usize,
    nd: usize,
    func: F,
}

impl<F> FnProblem<F>
where
    F: FnMut(
        &Array1<f64>,
        &mut Array1<f64>,
        Option<&mut Array2<f64>>,
        &mut Regularization,
        bool,
    ) -> Result<()>,
{
    /// Wraps `func` as a problem with `npar` parameters and `nd` residuals.
    pub fn new(npar: usize, nd: usize, func: F) -> Self {
        Self { npar, nd, func }
    }
}

impl<F> Problem for FnProblem<F>
where
    F: FnMut(
        &Array1<f64>,
        &mut Array1<f64>,
        Option<&mut Array2<f64>>,
        &mut Regularization,
        bool,
    ) -> Result<()>,
{
    fn parameter_count(&self) -> usize {
        self.npar
    }

    fn residual_count(&self) -> usize {
        self.nd
    }

    fn evaluate(
        &mut self,
        params: &Array1<f64>,
        residuals: &mut Array1<f64>,
        jacobian: Option<&mut Array2<f64>>,
        regularization: &mut Regularization,
        accepted: bool,
    ) -> Result<()> {
        (self.func)(params, residuals, jacobian, regularization, accepted)
    }
}
