//! Per-parameter fit controls.
//!
//! Each fit parameter carries one [`ParameterControl`]: its feasible interval,
//! how out-of-range values are brought back (wrap or reflect, then clip), the
//! largest correction a single step may apply, the scale factor between physical
//! and normalized units, and the group tag used by the singular-value filter.

use serde::{Deserialize, Serialize};
use std::f64::{INFINITY, NEG_INFINITY};
use thiserror::Error;

/// Errors that can occur when working with parameter controls
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid bounds: min ({min}) must not exceed max ({max})")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Cyclic parameter needs finite bounds, got [{min}, {max}]")]
    UnboundedCyclic { min: f64, max: f64 },

    #[error("Scale factor must be finite and non-zero, got {0}")]
    InvalidScale(f64),

    #[error("Maximum change must be finite, got [{lower}, {upper}]")]
    InvalidMaxChange { lower: f64, upper: f64 },
}

/// Feasible interval of a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Minimum allowed value for the parameter
    pub min: f64,

    /// Maximum allowed value for the parameter
    pub max: f64,
}

impl Serialize for Bounds {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("Bounds", 2)?;

        // JSON has no infinity, open ends are written as null
        if self.min.is_infinite() && self.min.is_sign_negative() {
            state.serialize_field("min", &serde_json::Value::Null)?;
        } else {
            state.serialize_field("min", &self.min)?;
        }

        if self.max.is_infinite() && self.max.is_sign_positive() {
            state.serialize_field("max", &serde_json::Value::Null)?;
        } else {
            state.serialize_field("max", &self.max)?;
        }

        state.end()
    }
}

impl<'de> Deserialize<'de> for Bounds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct BoundsHelper {
            #[serde(default)]
            min: Option<f64>,

            #[serde(default)]
            max: Option<f64>,
        }

        let helper = BoundsHelper::deserialize(deserializer)?;

        let min = helper.min.unwrap_or(NEG_INFINITY);
        let max = helper.max.unwrap_or(INFINITY);

        Bounds::new(min, max).map_err(serde::de::Error::custom)
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min: NEG_INFINITY,
            max: INFINITY,
        }
    }
}

impl Bounds {
    /// Create a new interval, failing when `min > max`.
    ///
    /// # Examples
    ///
    /// ```
    /// use lmsvd_rs::parameters::Bounds;
    ///
    /// let bounds = Bounds::new(0.0, 10.0).unwrap();
    /// assert_eq!(bounds.range(), 10.0);
    /// assert!(Bounds::new(1.0, 0.0).is_err());
    /// ```
    pub fn new(min: f64, max: f64) -> Result<Self, BoundsError> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(BoundsError::InvalidBounds { min, max });
        }

        Ok(Self { min, max })
    }

    /// Create an unbounded interval (negative infinity to positive infinity)
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Width of the interval.
    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    /// Check if a value is within the bounds
    pub fn is_within_bounds(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Check if the bounds are finite (both min and max are finite)
    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    /// Clamp a value to be within the bounds
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Largest correction a single step may apply, chosen by the sign of the step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaxChange {
    /// Limit for negative corrections
    #[serde(with = "open_limit")]
    pub lower: f64,

    /// Limit for positive corrections
    #[serde(with = "open_limit")]
    pub upper: f64,
}

/// Infinite limits are written as null.
mod open_limit {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_infinite() {
            serializer.serialize_none()
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

impl MaxChange {
    /// Same limit in both directions.
    pub fn symmetric(limit: f64) -> Self {
        Self {
            lower: limit,
            upper: limit,
        }
    }

    /// Limit that applies to a correction `delta`.
    pub fn limit_for(&self, delta: f64) -> f64 {
        if delta >= 0.0 {
            self.upper.abs()
        } else {
            self.lower.abs()
        }
    }
}

impl Default for MaxChange {
    fn default() -> Self {
        Self::symmetric(INFINITY)
    }
}

/// Fit control record of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterControl {
    /// Feasible interval
    pub bounds: Bounds,

    /// Wrap values that leave the interval by one range width
    pub cyclic: bool,

    /// Reflect values that leave the interval across the violated bound
    pub bounce: bool,

    /// Enforce `max_change` on every step
    pub capped: bool,

    /// Interpret `max_change` relative to `|value|`
    pub relative_cap: bool,

    /// Two-sided step limit
    pub max_change: MaxChange,

    /// Physical units per normalized unit
    pub scale: f64,

    /// Group tag for the singular-value filter
    pub group: usize,
}

impl Default for ParameterControl {
    fn default() -> Self {
        Self {
            bounds: Bounds::default(),
            cyclic: false,
            bounce: false,
            capped: false,
            relative_cap: false,
            max_change: MaxChange::default(),
            scale: 1.0,
            group: 0,
        }
    }
}

impl ParameterControl {
    /// Unbounded, uncapped parameter with unit scale.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameter restricted to `[min, max]`.
    pub fn bounded(min: f64, max: f64) -> Result<Self, BoundsError> {
        Ok(Self {
            bounds: Bounds::new(min, max)?,
            ..Self::default()
        })
    }

    pub fn with_cyclic(mut self, cyclic: bool) -> Self {
        self.cyclic = cyclic;
        self
    }

    pub fn with_bounce(mut self, bounce: bool) -> Self {
        self.bounce = bounce;
        self
    }

    /// Cap every step at `max_change`, in absolute units.
    pub fn with_max_change(mut self, max_change: MaxChange) -> Self {
        self.capped = true;
        self.relative_cap = false;
        self.max_change = max_change;
        self
    }

    /// Cap every step at `max_change · |value|`.
    pub fn with_relative_max_change(mut self, max_change: MaxChange) -> Self {
        self.capped = true;
        self.relative_cap = true;
        self.max_change = max_change;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_group(mut self, group: usize) -> Self {
        self.group = group;
        self
    }

    /// Checks the record invariants.
    pub fn validate(&self) -> Result<(), BoundsError> {
        Bounds::new(self.bounds.min, self.bounds.max)?;

        if self.cyclic && !self.bounds.is_finite() {
            return Err(BoundsError::UnboundedCyclic {
                min: self.bounds.min,
                max: self.bounds.max,
            });
        }

        if !self.scale.is_finite() || self.scale == 0.0 {
            return Err(BoundsError::InvalidScale(self.scale));
        }

        if self.capped && (self.max_change.lower.is_nan() || self.max_change.upper.is_nan()) {
            return Err(BoundsError::InvalidMaxChange {
                lower: self.max_change.lower,
                upper: self.max_change.upper,
            });
        }

        Ok(())
    }

    /// Brings one value back into the feasible interval.
    ///
    /// Wrapping and reflection are applied first (at most once each), the final
    /// clip always runs.
    pub fn enforce(&self, value: f64) -> f64 {
        let Bounds { min, max } = self.bounds;
        let mut par = value;

        if self.cyclic {
            let range = self.bounds.range();
            if par < min {
                par += range;
            }
            if par > max {
                par -= range;
            }
        }

        if self.bounce {
            if par < min {
                par = min + (min - par);
            }
            if par > max {
                par = max - (par - max);
            }
        }

        self.bounds.clamp(par)
    }

    /// Shrinks a correction so it does not exceed the configured step limit.
    pub fn cap(&self, delta: f64, current: f64) -> f64 {
        if !self.capped {
            return delta;
        }

        let mut limit = self.max_change.limit_for(delta);
        if self.relative_cap {
            limit *= current.abs();
        }

        if delta.abs() > limit {
            delta * (limit / delta.abs())
        } else {
            delta
        }
    }
}
