//! Implementation of the Levenberg-Marquardt fit driver.
//!
//! This module contains the outer loop of the solver. Each iteration linearizes
//! the model once, runs the damping line search on the resulting normal
//! equations and either accepts the best trial or raises the damping and tries
//! again on the same linearization.

use std::borrow::Cow;
use std::fmt;

use log::{debug, info, warn};
use ndarray::{Array1, Array2};

use crate::error::{LmSvdError, Result};
use crate::parameters::ConstraintSet;
use crate::problem::Problem;
use crate::regularization::Regularization;
use crate::utils::summation::grouped_sum_sq;

use super::bracket::{Bracketer, Trial};
use super::config::LmConfig;
use super::convergence::{relative_change, FitStatus, StallDetector};
use super::step::{LmStep, NormalEquations};
use super::trust_region::Damping;

/// Result of a Levenberg-Marquardt fit.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Best parameter values found (also written back to the caller's vector)
    pub params: Array1<f64>,

    /// Best cost: mean squared residual plus regularization penalty
    pub cost: f64,

    /// Regularization penalty included in `cost`
    pub penalty: f64,

    /// Number of completed iterations (fresh Jacobian evaluations)
    pub iterations: usize,

    /// Number of model evaluations
    pub func_evals: usize,

    /// Damping value at exit
    pub lambda: f64,

    /// Why the fit stopped
    pub status: FitStatus,

    /// False when the fit was aborted by an error
    pub success: bool,

    /// A message describing the result
    pub message: String,
}

impl fmt::Display for LmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fit Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Cost: {:.6e} (penalty {:.6e})", self.cost, self.penalty)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Lambda: {:e}", self.lambda)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

/// Best-so-far bookkeeping of one fit call.
struct FitState {
    best_params: Array1<f64>,
    best_cost: f64,
    best_penalty: f64,
    iterations: usize,
    func_evals: usize,
}

/// The Levenberg-Marquardt fitter.
///
/// The fitter is configured once and can then run any number of fits. It keeps
/// no state between calls.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    /// Configuration options
    config: LmConfig,

    /// Per-parameter controls; unconstrained when absent
    constraints: Option<ConstraintSet>,
}

impl LevenbergMarquardt {
    /// Create a new fitter with default configuration and no constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new fitter with the given configuration.
    pub fn with_config(config: LmConfig) -> Self {
        Self {
            config,
            constraints: None,
        }
    }

    /// Set the per-parameter controls.
    pub fn with_constraints(mut self, constraints: ConstraintSet) -> Self {
        self.constraints = Some(constraints);
        self
    }

    /// Set the tolerance for the relative change of the cost.
    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.config.xtol = xtol;
        self
    }

    /// Set the cost below which the fit stops.
    pub fn with_chi2_threshold(mut self, threshold: f64) -> Self {
        self.config.chi2_threshold = threshold;
        self
    }

    /// Set the relative singular-value cut-off.
    pub fn with_svd_threshold(mut self, threshold: f64) -> Self {
        self.config.svd_threshold = threshold;
        self
    }

    /// Set the initial value for the damping parameter.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.config.initial_lambda = lambda;
        self
    }

    /// Set the damping limits.
    pub fn with_lambda_bounds(mut self, lambda_min: f64, lambda_max: f64) -> Self {
        self.config.lambda_min = lambda_min;
        self.config.lambda_max = lambda_max;
        self
    }

    /// Set the factor by which damping grows or shrinks.
    pub fn with_lambda_factor(mut self, factor: f64) -> Self {
        self.config.lambda_factor = factor;
        self
    }

    /// Set the maximum number of consecutive rejected steps.
    pub fn with_max_reject(mut self, max_reject: usize) -> Self {
        self.config.max_reject = max_reject;
        self
    }

    /// Enable per-iteration diagnostics.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Enable the regularization term with the given scale.
    pub fn with_regularization(mut self, scale: f64) -> Self {
        self.config.regularize = true;
        self.config.regularization_scale = scale;
        self
    }

    /// Work with perturbations around a model state kept by the caller.
    ///
    /// The returned parameters are the last accepted perturbation.
    pub fn with_perturbation_mode(mut self, enabled: bool) -> Self {
        self.config.perturbation_mode = enabled;
        self
    }

    /// Set the number of interleaved data channels.
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.config.channels = channels;
        self
    }

    /// Set the tag printed in diagnostics.
    pub fn with_worker(mut self, worker: u32) -> Self {
        self.config.worker = worker;
        self
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    pub fn constraints(&self) -> Option<&ConstraintSet> {
        self.constraints.as_ref()
    }

    /// Fit `problem` starting from `params`.
    ///
    /// On return `params` holds the best parameters found. Invalid input is
    /// reported as `Err` before the model is evaluated. A failing model or a NaN
    /// cost stops the fit early with `success == false` and the best
    /// parameters seen so far.
    ///
    /// # Arguments
    ///
    /// * `problem` - The model to fit
    /// * `params` - Initial guess, overwritten with the result
    /// * `max_iterations` - Iteration budget
    /// * `regularization` - Regularization term filled by the model; used only
    ///   when enabled and `regularize` is set in the configuration
    pub fn fit<P: Problem + ?Sized>(
        &self,
        problem: &mut P,
        params: &mut Array1<f64>,
        max_iterations: usize,
        regularization: &mut Regularization,
    ) -> Result<LmResult> {
        let config = &self.config;
        config.validate()?;

        let npar = problem.parameter_count();
        let nd = problem.residual_count();
        let constraints = match &self.constraints {
            Some(constraints) => Cow::Borrowed(constraints),
            None => Cow::Owned(ConstraintSet::unconstrained(npar)),
        };
        self.validate_inputs(npar, nd, params, &constraints, regularization)?;

        let use_reg = config.regularize && regularization.is_enabled();
        if config.regularize {
            regularization.set_scale(config.regularization_scale);
        }

        if config.perturbation_mode {
            params.fill(0.0);
        } else {
            constraints.enforce(params);
        }

        let mut damping = Damping::from_config(config);
        let bracketer = Bracketer::new(config.lambda_factor);
        let stepper = LmStep::new(&constraints, config.svd_threshold, !config.perturbation_mode);

        let mut state = FitState {
            best_params: params.clone(),
            best_cost: f64::INFINITY,
            best_penalty: 0.0,
            iterations: 0,
            func_evals: 0,
        };

        let mut residuals = Array1::zeros(nd);
        let mut jacobian = Array2::zeros((npar, nd));
        regularization.zero();

        state.func_evals += 1;
        if let Err(err) = problem.evaluate(
            params,
            &mut residuals,
            Some(&mut jacobian),
            regularization,
            false,
        ) {
            return self.abort(callback_error(err), state, params, damping.lambda);
        }
        constraints.scale_jacobian(&mut jacobian);

        let initial = self.cost(&residuals, regularization, use_reg);
        let penalty = penalty_of(regularization, use_reg);
        if initial.is_nan() {
            return Ok(self.finish(state, params, FitStatus::NumericalDivergence, damping.lambda));
        }
        state.best_cost = initial;
        state.best_penalty = penalty;

        if config.verbose {
            info!(
                "[p:{:4}, Init] chi2={} ({}), lambda={:e}",
                config.worker,
                initial - penalty,
                penalty,
                damping.lambda
            );
        }

        let mut stall = StallDetector::new(config.xtol);
        let mut nretry = 0;
        let mut last_cost = initial;
        let mut system: Option<NormalEquations> = None;
        let mut status = FitStatus::MaxIterations;

        while state.iterations <= max_iterations {
            let equations = match system.take() {
                Some(equations) => equations,
                None => {
                    let reg = use_reg.then_some(&*regularization);
                    match NormalEquations::assemble(&jacobian, &residuals, reg, config.channels) {
                        Ok(equations) => equations,
                        Err(err) => return self.abort(err, state, params, damping.lambda),
                    }
                }
            };

            let current = params.clone();
            let canonical = &*regularization;
            let mut evaluations = 0;
            let searched = bracketer.search(damping.lambda, state.best_cost, |lambda| {
                let step = stepper.propose(&equations, &current, lambda)?;
                let mut trial_reg = canonical.clone();
                trial_reg.zero();
                let mut trial_res = Array1::zeros(nd);

                evaluations += 1;
                problem
                    .evaluate(&step.params, &mut trial_res, None, &mut trial_reg, false)
                    .map_err(callback_error)?;

                Ok(Trial {
                    lambda,
                    cost: self.cost(&trial_res, &trial_reg, use_reg),
                    params: step.params,
                    regularization: trial_reg,
                })
            });
            state.func_evals += evaluations;

            let trial = match searched {
                Ok(outcome) => outcome.best,
                Err(err) => return self.abort(err, state, params, damping.lambda),
            };

            if trial.cost.is_nan() {
                status = FitStatus::NumericalDivergence;
                break;
            }

            let reldchi = relative_change(trial.cost, state.best_cost);
            let searched_lambda = trial.lambda;
            let trial_penalty = penalty_of(&trial.regularization, use_reg);
            damping.settle(searched_lambda);

            if trial.cost < state.best_cost {
                damping.accept();
                stall.record(reldchi);

                state.best_cost = trial.cost;
                state.best_penalty = trial_penalty;
                if use_reg {
                    if let Err(err) = regularization.copy_penalties_from(&trial.regularization) {
                        return self.abort(err, state, params, damping.lambda);
                    }
                }
                params.assign(&trial.params);
                state.best_params = trial.params;
                nretry = 0;

                if config.perturbation_mode {
                    residuals.fill(0.0);
                    jacobian.fill(0.0);
                    regularization.zero();
                    state.func_evals += 1;
                    if let Err(err) = problem.evaluate(
                        params,
                        &mut residuals,
                        Some(&mut jacobian),
                        regularization,
                        true,
                    ) {
                        return self.abort(callback_error(err), state, params, damping.lambda);
                    }
                    params.fill(0.0);
                }
            } else {
                damping.reject();
                nretry += 1;

                if nretry < config.max_reject {
                    if config.verbose {
                        info!(
                            "[p:{:4},i:{:4}]  ->  chi2={} ({}), increasing lambda [{:e} -> {:e}]",
                            config.worker,
                            state.iterations,
                            trial.cost - trial_penalty,
                            trial_penalty,
                            searched_lambda,
                            damping.lambda
                        );
                    }
                    system = Some(equations);
                    continue;
                }
            }

            if config.verbose {
                info!(
                    "[p:{:4},i:{:4}] chi2={:14.5} ({}, {}), dchi2={:e}, lambda={:e}{}",
                    config.worker,
                    state.iterations,
                    trial.cost - trial_penalty,
                    trial_penalty,
                    regularization.scale(),
                    trial.cost - last_cost,
                    searched_lambda,
                    if nretry > 0 { " *" } else { "" }
                );
            }
            debug!(
                "[p:{:4},i:{:4}] best={:e} reldchi={:e} nretry={}",
                config.worker, state.iterations, state.best_cost, reldchi, nretry
            );
            last_cost = trial.cost;

            if trial.cost < config.chi2_threshold {
                status = FitStatus::ChiSquareThreshold;
                break;
            }
            if nretry >= config.max_reject {
                status = FitStatus::MaxRejections;
                break;
            }
            if stall.is_stalled() {
                status = FitStatus::Stalled;
                break;
            }

            residuals.fill(0.0);
            jacobian.fill(0.0);
            regularization.zero();
            state.func_evals += 1;
            if let Err(err) = problem.evaluate(
                params,
                &mut residuals,
                Some(&mut jacobian),
                regularization,
                false,
            ) {
                return self.abort(callback_error(err), state, params, damping.lambda);
            }
            constraints.scale_jacobian(&mut jacobian);
            state.iterations += 1;
        }

        Ok(self.finish(state, params, status, damping.lambda))
    }

    /// Mean squared residual plus the regularization penalty when active.
    fn cost(&self, residuals: &Array1<f64>, regularization: &Regularization, use_reg: bool) -> f64 {
        let sum = match residuals.as_slice() {
            Some(values) => grouped_sum_sq(values, self.config.channels),
            None => grouped_sum_sq(&residuals.to_vec(), self.config.channels),
        };
        sum / residuals.len() as f64 + penalty_of(regularization, use_reg)
    }

    fn validate_inputs(
        &self,
        npar: usize,
        nd: usize,
        params: &Array1<f64>,
        constraints: &ConstraintSet,
        regularization: &Regularization,
    ) -> Result<()> {
        if npar == 0 || nd == 0 {
            return Err(LmSvdError::DimensionMismatch(format!(
                "problem needs at least one parameter and one residual, got {} and {}",
                npar, nd
            )));
        }
        if params.len() != npar {
            return Err(LmSvdError::DimensionMismatch(format!(
                "expected {} parameters, got {}",
                npar,
                params.len()
            )));
        }
        if constraints.len() != npar {
            return Err(LmSvdError::DimensionMismatch(format!(
                "expected {} parameter controls, got {}",
                npar,
                constraints.len()
            )));
        }
        constraints.validate()?;

        if !self.config.perturbation_mode && params.iter().any(|p| !p.is_finite()) {
            return Err(LmSvdError::InvalidParameter(
                "initial parameters must be finite".to_string(),
            ));
        }
        if self.config.regularize
            && regularization.is_enabled()
            && regularization.parameter_count() != npar
        {
            return Err(LmSvdError::DimensionMismatch(format!(
                "regularization covers {} parameters, problem has {}",
                regularization.parameter_count(),
                npar
            )));
        }
        Ok(())
    }

    /// Stops the fit after an error, restoring the best parameters.
    ///
    /// Model failures and numerical breakdowns become a failed [`LmResult`];
    /// anything else is returned as an error.
    fn abort(
        &self,
        err: LmSvdError,
        state: FitState,
        params: &mut Array1<f64>,
        lambda: f64,
    ) -> Result<LmResult> {
        let status = match err {
            LmSvdError::CallbackFailure(msg) => FitStatus::CallbackFailure(msg),
            LmSvdError::LinearAlgebraError(_) => FitStatus::NumericalDivergence,
            other => {
                params.assign(&state.best_params);
                return Err(other);
            }
        };
        Ok(self.finish(state, params, status, lambda))
    }

    fn finish(
        &self,
        state: FitState,
        params: &mut Array1<f64>,
        status: FitStatus,
        lambda: f64,
    ) -> LmResult {
        params.assign(&state.best_params);

        let worker = self.config.worker;
        if status.is_error() {
            if self.config.verbose {
                warn!("[p:{:4}] {}, aborting fit", worker, status);
            }
        } else if self.config.verbose {
            match status {
                FitStatus::ChiSquareThreshold => info!(
                    "[p:{:4}] chi2 threshold reached [{}] -> chi2={}",
                    worker, self.config.chi2_threshold, state.best_cost
                ),
                FitStatus::MaxRejections => {
                    info!("[p:{:4}] too many failed attempts, finalizing fit", worker)
                }
                FitStatus::Stalled => info!(
                    "[p:{:4}] relative change in chi2 is too low, fit finished",
                    worker
                ),
                _ => info!("[p:{:4}] {}", worker, status),
            }
        }

        LmResult {
            params: state.best_params,
            cost: state.best_cost,
            penalty: state.best_penalty,
            iterations: state.iterations,
            func_evals: state.func_evals,
            lambda,
            success: !status.is_error(),
            message: status.description(),
            status,
        }
    }
}

fn penalty_of(regularization: &Regularization, use_reg: bool) -> f64 {
    if use_reg {
        regularization.penalty()
    } else {
        0.0
    }
}

/// Any error coming out of the model is a callback failure.
fn callback_error(err: LmSvdError) -> LmSvdError {
    match err {
        LmSvdError::CallbackFailure(_) => err,
        other => LmSvdError::CallbackFailure(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ParameterControl;
    use crate::problem::FnProblem;
    use approx::assert_relative_eq;
    use ndarray::array;

    /// y = a·t + b on t = 0..5, exact at a = 2, b = 1.
    struct LinearModel {
        t: Array1<f64>,
        y: Array1<f64>,
    }

    impl LinearModel {
        fn new() -> Self {
            let t = array![0.0, 1.0, 2.0, 3.0, 4.0];
            let y = t.mapv(|t| 2.0 * t + 1.0);
            Self { t, y }
        }
    }

    impl Problem for LinearModel {
        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            self.t.len()
        }

        fn evaluate(
            &mut self,
            params: &Array1<f64>,
            residuals: &mut Array1<f64>,
            jacobian: Option<&mut Array2<f64>>,
            _regularization: &mut Regularization,
            _accepted: bool,
        ) -> Result<()> {
            for w in 0..self.t.len() {
                residuals[w] = self.y[w] - (params[0] * self.t[w] + params[1]);
            }
            if let Some(jacobian) = jacobian {
                for w in 0..self.t.len() {
                    jacobian[[0, w]] = self.t[w];
                    jacobian[[1, w]] = 1.0;
                }
            }
            Ok(())
        }
    }

    fn bounded_fitter() -> LevenbergMarquardt {
        let constraints = ConstraintSet::new(vec![
            ParameterControl::bounded(-10.0, 10.0).unwrap(),
            ParameterControl::bounded(-10.0, 10.0).unwrap(),
        ])
        .unwrap();
        LevenbergMarquardt::new()
            .with_xtol(1e-6)
            .with_chi2_threshold(1e-10)
            .with_constraints(constraints)
    }

    #[test]
    fn test_linear_fit() {
        let mut model = LinearModel::new();
        let mut params = array![0.0, 0.0];
        let mut reg = Regularization::disabled();

        let result = bounded_fitter()
            .fit(&mut model, &mut params, 20, &mut reg)
            .unwrap();

        assert!(result.success, "{}", result);
        assert!(result.cost < 1e-10);
        assert_relative_eq!(params[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(params[1], 1.0, epsilon = 1e-4);
        assert_eq!(result.params, params);
    }

    #[test]
    fn test_wrong_parameter_count_is_rejected() {
        let mut model = LinearModel::new();
        let mut params = array![0.0, 0.0, 0.0];
        let mut reg = Regularization::disabled();
        let result = LevenbergMarquardt::new().fit(&mut model, &mut params, 10, &mut reg);
        assert!(matches!(result, Err(LmSvdError::DimensionMismatch(_))));
    }

    #[test]
    fn test_constraint_count_is_checked() {
        let mut model = LinearModel::new();
        let mut params = array![0.0, 0.0];
        let mut reg = Regularization::disabled();
        let fitter = LevenbergMarquardt::new().with_constraints(ConstraintSet::unconstrained(3));
        assert!(fitter.fit(&mut model, &mut params, 10, &mut reg).is_err());
    }

    #[test]
    fn test_invalid_config_is_rejected_before_evaluation() {
        let mut calls = 0;
        let mut problem = FnProblem::new(1, 1, |_p, _res, _jac, _reg, _accepted| {
            calls += 1;
            Ok(())
        });
        let mut params = array![0.0];
        let mut reg = Regularization::disabled();
        let result = LevenbergMarquardt::new()
            .with_lambda_factor(0.5)
            .fit(&mut problem, &mut params, 10, &mut reg);
        assert!(matches!(result, Err(LmSvdError::InvalidConfig(_))));
        drop(problem);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_initial_failure_keeps_parameters() {
        let mut problem = FnProblem::new(1, 2, |_p, _res, _jac, _reg, _accepted| {
            Err(LmSvdError::Other("table lookup out of range".to_string()))
        });
        let mut params = array![3.0];
        let mut reg = Regularization::disabled();
        let result = LevenbergMarquardt::new()
            .fit(&mut problem, &mut params, 10, &mut reg)
            .unwrap();

        assert!(!result.success);
        assert!(matches!(result.status, FitStatus::CallbackFailure(ref msg) if msg.contains("table lookup")));
        assert_eq!(params, array![3.0]);
        assert_eq!(result.func_evals, 1);
    }

    #[test]
    fn test_display_mentions_status() {
        let mut model = LinearModel::new();
        let mut params = array![0.0, 0.0];
        let mut reg = Regularization::disabled();
        let result = bounded_fitter()
            .fit(&mut model, &mut params, 20, &mut reg)
            .unwrap();
        let text = result.to_string();
        assert!(text.contains("Success: true"));
        assert!(text.contains(&result.status.description()));
    }
}
