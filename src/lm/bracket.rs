//! Line search over the damping parameter.
//!
//! Starting from the current damping value, the search first shrinks it while
//! the cost keeps improving. If the best point is the largest value tried, it
//! grows the damping until the minimum is bracketed. A bracketed minimum is then
//! refined by fitting a parabola through the three points around it in `ln λ`.

use log::trace;
use ndarray::Array1;

use crate::error::Result;
use crate::regularization::Regularization;

/// One evaluated damping value.
#[derive(Debug, Clone)]
pub struct Trial {
    pub lambda: f64,
    pub cost: f64,
    pub params: Array1<f64>,
    /// Regularization term as filled by the model at `params`
    pub regularization: Regularization,
}

/// Outcome of a damping search.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Lowest-cost trial found
    pub best: Trial,

    /// Whether the first trial already beat the reference cost
    pub improved: bool,

    /// Number of trials evaluated
    pub evaluations: usize,
}

/// Settings of the damping search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracketer {
    /// Multiplicative step between neighbouring damping values
    pub factor: f64,

    /// Maximum number of shrinking trials
    pub max_shrink: usize,

    /// Maximum number of growing trials
    pub max_grow: usize,

    /// Maximum number of parabolic refinements
    pub refinements: usize,

    /// No further shrinking once the damping is at or below this value
    pub lambda_floor: f64,
}

impl Default for Bracketer {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl Bracketer {
    pub fn new(factor: f64) -> Self {
        Self {
            factor,
            max_shrink: 5,
            max_grow: 5,
            refinements: 3,
            lambda_floor: 1e-5,
        }
    }

    /// Searches for the damping value with the lowest cost.
    ///
    /// `evaluate` computes a trial for a damping value. If the trial at
    /// `initial_lambda` does not beat `reference_cost`, it is returned at once
    /// with `improved == false`. Errors from `evaluate` abort the search.
    pub fn search<F>(
        &self,
        initial_lambda: f64,
        reference_cost: f64,
        mut evaluate: F,
    ) -> Result<SearchOutcome>
    where
        F: FnMut(f64) -> Result<Trial>,
    {
        let first = evaluate(initial_lambda)?;
        let mut evaluations = 1;
        trace!(
            "damping search: lambda={:e} cost={:e} reference={:e}",
            first.lambda,
            first.cost,
            reference_cost
        );

        if !(first.cost < reference_cost) {
            return Ok(SearchOutcome {
                best: first,
                improved: false,
                evaluations,
            });
        }

        // Ordered by decreasing damping.
        let mut points = vec![first];

        for shrink in 0..self.max_shrink {
            let n = points.len();
            let last = &points[n - 1];
            if shrink > 0 && (!(last.cost < points[n - 2].cost) || last.lambda <= self.lambda_floor)
            {
                break;
            }
            let trial = evaluate(last.lambda / self.factor)?;
            evaluations += 1;
            points.push(trial);
        }

        let mut idx = best_index(&points);
        if idx + 1 == points.len() {
            return Ok(finish(points, idx, evaluations));
        }

        let mut grown = 0;
        while idx == 0 && grown < self.max_grow {
            let trial = evaluate(points[0].lambda * self.factor)?;
            evaluations += 1;
            grown += 1;
            points.insert(0, trial);
            idx = best_index(&points);
        }

        if idx == 0 || idx + 1 >= points.len() {
            return Ok(finish(points, idx, evaluations));
        }

        for _ in 0..self.refinements {
            let (a, b, c) = (&points[idx - 1], &points[idx], &points[idx + 1]);
            let vertex = match parabola_vertex(
                [a.lambda.ln(), b.lambda.ln(), c.lambda.ln()],
                [a.cost, b.cost, c.cost],
            ) {
                Some(vertex) => vertex,
                None => break,
            };

            let lambda = vertex.exp();
            if !lambda.is_finite() || lambda <= 0.0 {
                break;
            }

            let trial = evaluate(lambda)?;
            evaluations += 1;
            trace!("damping refinement: lambda={:e} cost={:e}", lambda, trial.cost);

            if trial.cost < points[idx].cost {
                return Ok(SearchOutcome {
                    best: trial,
                    improved: true,
                    evaluations,
                });
            }

            let neighbour = if lambda < points[idx].lambda {
                idx + 1
            } else {
                idx - 1
            };
            points[neighbour] = trial;
        }

        Ok(finish(points, idx, evaluations))
    }
}

fn finish(mut points: Vec<Trial>, idx: usize, evaluations: usize) -> SearchOutcome {
    SearchOutcome {
        best: points.swap_remove(idx),
        improved: true,
        evaluations,
    }
}

/// Index of the first trial with the lowest cost.
fn best_index(points: &[Trial]) -> usize {
    let mut best = 0;
    for (k, trial) in points.iter().enumerate().skip(1) {
        if trial.cost < points[best].cost {
            best = k;
        }
    }
    best
}

/// Abscissa of the minimum of the parabola through three points.
///
/// `None` when the points are degenerate or the parabola opens downwards.
pub fn parabola_vertex(x: [f64; 3], y: [f64; 3]) -> Option<f64> {
    let d01 = (y[0] - y[1]) / (x[0] - x[1]);
    let d12 = (y[1] - y[2]) / (x[1] - x[2]);
    let c2 = (d01 - d12) / (x[0] - x[2]);
    if !c2.is_finite() || c2 <= 0.0 {
        return None;
    }
    let c1 = d01 - c2 * (x[0] + x[1]);
    let vertex = -c1 / (2.0 * c2);
    vertex.is_finite().then_some(vertex)
}
