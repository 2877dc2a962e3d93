//! SVD solve of the damped normal equations.
//!
//! Small singular values are discarded before inverting. With a single
//! parameter group the cut is relative to the largest singular value. When the
//! parameters belong to several physical groups, each singular value is
//! projected onto the parameters of every group and thresholded against that
//! group's own maximum, following Ruiz Cobo & del Toro Iniesta (1992). A strong
//! group (e.g. temperature) then cannot mask the corrections of a weak one.

use log::trace;
use ndarray::{Array1, Array2};

use crate::error::{LmSvdError, Result};
use crate::parameters::ParameterGroups;
use crate::utils::matrix_convert::{nalgebra_to_ndarray, nalgebra_vec_to_ndarray, ndarray_to_nalgebra};

/// Filtered values whose second-pass weight is below this are dropped.
const NEGLIGIBLE_WEIGHT: f64 = 1e-10;

/// Singular value decomposition `A = U·diag(w)·Vᵀ` of a square system.
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub u: Array2<f64>,
    pub w: Array1<f64>,
    pub v: Array2<f64>,
}

impl Decomposition {
    /// Decomposes a square matrix.
    pub fn new(matrix: &Array2<f64>) -> Result<Self> {
        if matrix.nrows() != matrix.ncols() {
            return Err(LmSvdError::DimensionMismatch(format!(
                "expected a square matrix, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(LmSvdError::LinearAlgebraError(
                "normal equations contain non-finite values".to_string(),
            ));
        }

        let svd = ndarray_to_nalgebra(matrix).svd(true, true);
        let u = svd
            .u
            .ok_or_else(|| LmSvdError::LinearAlgebraError("SVD did not return U".to_string()))?;
        let v_t = svd
            .v_t
            .ok_or_else(|| LmSvdError::LinearAlgebraError("SVD did not return Vᵀ".to_string()))?;

        Ok(Self {
            u: nalgebra_to_ndarray(&u),
            w: nalgebra_vec_to_ndarray(&svd.singular_values),
            v: nalgebra_to_ndarray(&v_t.transpose()),
        })
    }

    /// Zeroes singular values not above `threshold · max(w)`.
    pub fn threshold(&mut self, threshold: f64) {
        self.w = relative_threshold(&self.w, threshold);
    }

    /// Replaces the singular values by their group-filtered counterparts.
    pub fn filter_by_group(&mut self, groups: &ParameterGroups, threshold: f64) {
        self.w = grouped_filter(&self.w, &self.v, groups, threshold);
    }

    /// `V·diag(1/w)·Uᵀ·b`, skipping zero singular values.
    pub fn back_substitute(&self, b: &Array1<f64>) -> Array1<f64> {
        let n = self.w.len();
        let mut tmp = Array1::zeros(n);
        for j in 0..n {
            if self.w[j] != 0.0 {
                let s: f64 = (0..n).map(|i| self.u[[i, j]] * b[i]).sum();
                tmp[j] = s / self.w[j];
            }
        }
        self.v.dot(&tmp)
    }
}

/// Solves `A·x = b`, filtering singular values per group when there is more than one.
pub fn solve_filtered(
    matrix: &Array2<f64>,
    rhs: &Array1<f64>,
    groups: &ParameterGroups,
    threshold: f64,
) -> Result<Array1<f64>> {
    if rhs.len() != matrix.nrows() {
        return Err(LmSvdError::DimensionMismatch(format!(
            "right-hand side has {} entries for a {}x{} system",
            rhs.len(),
            matrix.nrows(),
            matrix.ncols()
        )));
    }

    let mut svd = Decomposition::new(matrix)?;
    if groups.is_split() {
        svd.filter_by_group(groups, threshold);
    } else {
        svd.threshold(threshold);
    }
    trace!("filtered singular values: {:?}", svd.w);

    Ok(svd.back_substitute(rhs))
}

/// Keeps singular values strictly above `threshold · max(w)`.
pub fn relative_threshold(w: &Array1<f64>, threshold: f64) -> Array1<f64> {
    let wmax = w.iter().fold(0.0_f64, |acc, &v| acc.max(v.abs()));
    let cut = wmax * threshold;
    w.mapv(|v| if v.abs() > cut { v } else { 0.0 })
}

/// Two-pass per-group singular-value filter.
///
/// Each pass weights every singular value by the group's entries in the
/// matching row of `V`, `wt[j] = w[j] · Σ_{i∈group} V[j][i]²`, drops those below
/// `threshold` times the group maximum and sums the survivors over groups. The
/// second pass repeats this on the output of the first. The result combines
/// both passes as `w0² / w1`, or 0 where `w1` is negligible.
pub fn grouped_filter(
    w: &Array1<f64>,
    v: &Array2<f64>,
    groups: &ParameterGroups,
    threshold: f64,
) -> Array1<f64> {
    let n = w.len();
    let mut current = w.clone();
    let mut passes: [Array1<f64>; 2] = [Array1::zeros(n), Array1::zeros(n)];

    for pass in passes.iter_mut() {
        let mut kept = Array1::zeros(n);

        for group in groups.iter() {
            let wt: Array1<f64> = (0..n)
                .map(|j| {
                    let weight: f64 = group.iter().map(|&i| v[[j, i]] * v[[j, i]]).sum();
                    weight * current[j]
                })
                .collect();

            let cut = wt.iter().fold(0.0_f64, |acc, &x| acc.max(x)) * threshold;
            for j in 0..n {
                if wt[j] >= cut {
                    kept[j] += wt[j];
                }
            }
        }

        current.assign(&kept);
        *pass = kept;
    }

    let [first, second] = passes;
    Array1::from_iter(first.iter().zip(second.iter()).map(|(&w0, &w1)| {
        if w1.abs() > NEGLIGIBLE_WEIGHT {
            w0 * w0 / w1
        } else {
            0.0
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn spd_matrix() -> Array2<f64> {
        array![
            [4.0, 1.0, 0.5, 0.2],
            [1.0, 3.0, 0.3, 0.1],
            [0.5, 0.3, 2.0, 0.4],
            [0.2, 0.1, 0.4, 1.5]
        ]
    }

    #[test]
    fn test_decomposition_reconstructs_matrix() {
        let a = spd_matrix();
        let svd = Decomposition::new(&a).unwrap();
        let rebuilt = svd.u.dot(&Array2::from_diag(&svd.w)).dot(&svd.v.t());
        for (x, y) in rebuilt.iter().zip(a.iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_single_group_solves_system() {
        let a = spd_matrix();
        let x_true = array![1.0, -2.0, 0.5, 3.0];
        let b = a.dot(&x_true);

        let x = solve_filtered(&a, &b, &ParameterGroups::single(4), 1e-13).unwrap();
        for (xi, ti) in x.iter().zip(x_true.iter()) {
            assert_relative_eq!(xi, ti, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_grouped_filter_is_identity_without_cuts() {
        let a = spd_matrix();
        let b = array![1.0, 2.0, 3.0, 4.0];
        let groups = ParameterGroups::from_tags(vec![0, 0, 1, 1]);

        let grouped = solve_filtered(&a, &b, &groups, 1e-13).unwrap();
        let plain = solve_filtered(&a, &b, &ParameterGroups::single(4), 1e-13).unwrap();
        for (g, p) in grouped.iter().zip(plain.iter()) {
            assert_relative_eq!(g, p, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_grouping_protects_weak_parameters() {
        // One strong parameter and two weak ones of another kind.
        let a = Array2::from_diag(&array![1e6, 1.0, 1e-5]);
        let b = array![1e6, 1.0, 1e-5];

        let global = solve_filtered(&a, &b, &ParameterGroups::single(3), 1e-3).unwrap();
        assert_relative_eq!(global[0], 1.0, epsilon = 1e-12);
        assert_eq!(global[1], 0.0);
        assert_eq!(global[2], 0.0);

        let groups = ParameterGroups::from_tags(vec![0, 1, 1]);
        let grouped = solve_filtered(&a, &b, &groups, 1e-3).unwrap();
        assert_relative_eq!(grouped[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(grouped[1], 1.0, epsilon = 1e-12);
        assert_eq!(grouped[2], 0.0);
    }

    /// Orthogonal `V` built from two Givens rotations (cos 0.8, sin 0.6).
    fn rotation() -> Array2<f64> {
        array![[0.8, -0.48, 0.36], [0.6, 0.64, -0.48], [0.0, 0.6, 0.8]]
    }

    #[test]
    fn test_grouped_filter_on_rotated_basis() {
        let v = rotation();
        let w = array![50.0, 5.0, 2.0];
        let groups = ParameterGroups::from_tags(vec![0, 0, 1]);

        // First pass keeps [50, 1.152, 1.28], second [50, 0, 0.8192].
        let filtered = grouped_filter(&w, &v, &groups, 0.1);
        assert_relative_eq!(filtered[0], 50.0, epsilon = 1e-12);
        assert_eq!(filtered[1], 0.0);
        assert_relative_eq!(filtered[2], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_grouped_solve_on_rotated_system() {
        let v = rotation();
        let a = v.dot(&Array2::from_diag(&array![50.0, 5.0, 2.0])).dot(&v.t());
        let b = array![1.0, 2.0, 3.0];
        let groups = ParameterGroups::from_tags(vec![0, 0, 1]);

        let dx = solve_filtered(&a, &b, &groups, 0.1).unwrap();
        assert_relative_eq!(dx[0], 0.356, epsilon = 1e-10);
        assert_relative_eq!(dx[1], -0.408, epsilon = 1e-10);
        assert_relative_eq!(dx[2], 0.72, epsilon = 1e-10);

        let full = solve_filtered(&a, &b, &ParameterGroups::single(3), 1e-13).unwrap();
        assert!((full[2] - dx[2]).abs() > 0.1);
    }

    #[test]
    fn test_relative_threshold() {
        let w = array![10.0, 1.0, 1e-3, 0.0];
        assert_eq!(relative_threshold(&w, 1e-2), array![10.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_back_substitution_skips_zero_values() {
        let svd = Decomposition {
            u: Array2::eye(2),
            w: array![2.0, 0.0],
            v: Array2::eye(2),
        };
        assert_eq!(svd.back_substitute(&array![4.0, 5.0]), array![2.0, 0.0]);
    }

    #[test]
    fn test_non_finite_system_is_rejected() {
        let a = array![[1.0, f64::NAN], [0.0, 1.0]];
        assert!(matches!(
            Decomposition::new(&a),
            Err(LmSvdError::LinearAlgebraError(_))
        ));
    }
}
