//! Compensated summation.
//!
//! Every reduction over many doubles in the solver (normal equations, gradient,
//! cost, regularization penalty) goes through this module. The accumulator keeps
//! a running correction term (Kahan-Babuska/Neumaier form), so the result does not
//! depend on the ordering of the terms beyond the last few bits.
//!
//! The channel-grouped variants handle interleaved data such as polarimetric
//! measurements `[I0, Q0, U0, V0, I1, Q1, ...]`: each channel is reduced on its own
//! before the channel totals are combined, which keeps a strong channel from
//! swallowing the rounding error of a weak one.

/// Default number of interleaved channels used by the grouped reductions.
pub const DEFAULT_CHANNELS: usize = 4;

/// Running compensated sum.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompensatedSum {
    sum: f64,
    correction: f64,
}

impl CompensatedSum {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one term.
    #[inline]
    pub fn add(&mut self, value: f64) {
        let t = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.correction += (self.sum - t) + value;
        } else {
            self.correction += (value - t) + self.sum;
        }
        self.sum = t;
    }

    /// Returns the compensated total.
    #[inline]
    pub fn value(&self) -> f64 {
        self.sum + self.correction
    }
}

impl Extend<f64> for CompensatedSum {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for value in iter {
            self.add(value);
        }
    }
}

impl FromIterator<f64> for CompensatedSum {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut acc = CompensatedSum::new();
        acc.extend(iter);
        acc
    }
}

/// Compensated sum of the elements.
pub fn stable_sum(values: &[f64]) -> f64 {
    values.iter().copied().collect::<CompensatedSum>().value()
}

/// Compensated sum of the squared elements.
pub fn stable_sum_sq(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).collect::<CompensatedSum>().value()
}

/// Compensated sum where interleaved channels are reduced independently.
///
/// When `values.len()` is not a multiple of `channels` (or `channels < 2`) this is
/// the same as [`stable_sum`].
pub fn grouped_sum(values: &[f64], channels: usize) -> f64 {
    grouped_reduce(values, channels, |v| v)
}

/// Channel-grouped compensated sum of squares, see [`grouped_sum`].
pub fn grouped_sum_sq(values: &[f64], channels: usize) -> f64 {
    grouped_reduce(values, channels, |v| v * v)
}

fn grouped_reduce<F>(values: &[f64], channels: usize, term: F) -> f64
where
    F: Fn(f64) -> f64,
{
    if channels < 2 || values.is_empty() || values.len() % channels != 0 {
        return values.iter().map(|&v| term(v)).collect::<CompensatedSum>().value();
    }

    let per_channel = (0..channels).map(|channel| {
        values
            .iter()
            .skip(channel)
            .step_by(channels)
            .map(|&v| term(v))
            .collect::<CompensatedSum>()
            .value()
    });

    per_channel.collect::<CompensatedSum>().value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_empty_sums_are_zero() {
        assert_eq!(stable_sum(&[]), 0.0);
        assert_eq!(stable_sum_sq(&[]), 0.0);
        assert_eq!(grouped_sum(&[], 4), 0.0);
    }

    #[test]
    fn test_compensation_recovers_small_terms() {
        // Naive summation loses every 1.0 against 1e16.
        let mut values = vec![1e16];
        values.extend(std::iter::repeat(1.0).take(1000));
        values.push(-1e16);

        let naive: f64 = values.iter().sum();
        assert_ne!(naive, 1000.0);
        assert_eq!(stable_sum(&values), 1000.0);
    }

    #[test]
    fn test_sum_of_squares() {
        assert_relative_eq!(stable_sum_sq(&[1.0, -2.0, 3.0]), 14.0);
    }

    #[test]
    fn test_grouped_matches_plain_for_well_scaled_data() {
        let values: Vec<f64> = (0..40).map(|i| (i as f64) * 0.25 - 3.0).collect();
        assert_relative_eq!(grouped_sum(&values, 4), stable_sum(&values), epsilon = 1e-12);
        assert_relative_eq!(
            grouped_sum_sq(&values, 4),
            stable_sum_sq(&values),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_grouped_falls_back_when_not_divisible() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(grouped_sum(&values, 4), 15.0);
        assert_eq!(grouped_sum_sq(&values, 4), 55.0);
    }

    #[test]
    fn test_grouped_keeps_weak_channel() {
        // Channel 0 is huge and cancels out, channel 1 carries small values.
        let mut values = Vec::new();
        for k in 0..100 {
            let big = if k % 2 == 0 { 1e17 } else { -1e17 };
            values.push(big);
            values.push(0.5);
        }
        assert_relative_eq!(grouped_sum(&values, 2), 50.0);
    }
}
