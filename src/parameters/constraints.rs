//! Constraint set applied to the whole parameter vector.
//!
//! [`ConstraintSet`] owns one [`ParameterControl`] per fit parameter and applies
//! them after every proposed update: step capping first, then feasibility
//! enforcement. It also carries the scale factors used to move between physical
//! and normalized units, and derives the [`ParameterGroups`] used by the grouped
//! singular-value filter.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{LmSvdError, Result};
use crate::parameters::control::ParameterControl;

/// Controls for every parameter of a fit, in parameter order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintSet {
    controls: Vec<ParameterControl>,
}

impl ConstraintSet {
    /// Builds a set from per-parameter controls, validating every record.
    pub fn new(controls: Vec<ParameterControl>) -> Result<Self> {
        let set = Self { controls };
        set.validate()?;
        Ok(set)
    }

    /// `npar` unbounded, uncapped parameters with unit scale.
    pub fn unconstrained(npar: usize) -> Self {
        Self {
            controls: vec![ParameterControl::default(); npar],
        }
    }

    /// Loads a set from a JSON array of controls.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let controls: Vec<ParameterControl> = serde_json::from_str(json)?;
        Self::new(controls)
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    pub fn controls(&self) -> &[ParameterControl] {
        &self.controls
    }

    /// Mutable access to one record. The caller is responsible for keeping it valid.
    pub fn control_mut(&mut self, index: usize) -> Option<&mut ParameterControl> {
        self.controls.get_mut(index)
    }

    /// Re-checks every record, e.g. after edits through [`ConstraintSet::control_mut`].
    pub fn validate(&self) -> Result<()> {
        for (index, control) in self.controls.iter().enumerate() {
            control.validate().map_err(|err| {
                LmSvdError::BoundsError(format!("parameter {}: {}", index, err))
            })?;
        }
        Ok(())
    }

    /// Wraps, reflects and clips every parameter into its feasible interval.
    pub fn enforce(&self, params: &mut Array1<f64>) {
        for (value, control) in params.iter_mut().zip(self.controls.iter()) {
            *value = control.enforce(*value);
        }
    }

    /// Rescales every capped correction so it does not exceed its step limit.
    pub fn cap_step(&self, delta: &mut Array1<f64>, current: &Array1<f64>) {
        for ((d, &x), control) in delta.iter_mut().zip(current.iter()).zip(self.controls.iter()) {
            *d = control.cap(*d, x);
        }
    }

    /// Scale factors in parameter order.
    pub fn scales(&self) -> Array1<f64> {
        self.controls.iter().map(|c| c.scale).collect()
    }

    /// Physical to normalized units.
    pub fn normalize(&self, params: &mut Array1<f64>) {
        for (value, control) in params.iter_mut().zip(self.controls.iter()) {
            *value /= control.scale;
        }
    }

    /// Normalized to physical units.
    pub fn denormalize(&self, params: &mut Array1<f64>) {
        for (value, control) in params.iter_mut().zip(self.controls.iter()) {
            *value *= control.scale;
        }
    }

    /// Multiplies each Jacobian row (one row per parameter) by that parameter's scale.
    pub fn scale_jacobian(&self, jacobian: &mut Array2<f64>) {
        for (mut row, control) in jacobian.axis_iter_mut(Axis(0)).zip(self.controls.iter()) {
            row *= control.scale;
        }
    }

    /// Parameter indices grouped by their group tag.
    pub fn groups(&self) -> ParameterGroups {
        ParameterGroups::from_tags(self.controls.iter().map(|c| c.group))
    }
}

/// Parameter indices partitioned by group tag, ordered by tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterGroups {
    groups: Vec<Vec<usize>>,
}

impl ParameterGroups {
    /// Builds the partition from one tag per parameter.
    pub fn from_tags<I>(tags: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let mut by_tag: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (index, tag) in tags.into_iter().enumerate() {
            by_tag.entry(tag).or_default().push(index);
        }
        Self {
            groups: by_tag.into_values().collect(),
        }
    }

    /// A single group holding parameters `0..npar`.
    pub fn single(npar: usize) -> Self {
        Self::from_tags(std::iter::repeat(0).take(npar))
    }

    /// Number of distinct groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// True when the singular-value filter must work per group.
    pub fn is_split(&self) -> bool {
        self.groups.len() > 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &[usize]> {
        self.groups.iter().map(|g| g.as_slice())
    }
}
