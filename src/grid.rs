//! Parameter axes and the result grid.

use serde::{Deserialize, Serialize};

use crate::SweepError;

/// Largest number of points a single axis may hold.
pub const MAX_AXIS_LEN: usize = 1 << 20;

/// One parameter axis, either generated from a range or listed explicitly.
///
/// Ranges are half-open: the axis holds
/// `ceil((stop - start) / step)` values `start + i * step`, so `stop` itself
/// is excluded unless rounding lets the last value land on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisSpec {
    Range { start: f64, stop: f64, step: f64 },
    Values(Vec<f64>),
}

impl AxisSpec {
    pub fn range(start: f64, stop: f64, step: f64) -> Self {
        Self::Range { start, stop, step }
    }

    pub fn validate(&self, name: &str) -> Result<(), SweepError> {
        if let Self::Range { start, stop, step } = *self {
            if !(start.is_finite() && stop.is_finite() && step.is_finite()) {
                return Err(SweepError::InvalidConfig(format!(
                    "{name} range bounds must be finite"
                )));
            }
            if step <= 0.0 {
                return Err(SweepError::InvalidConfig(format!(
                    "{name} step must be greater than zero"
                )));
            }
            let points = ((stop - start) / step).ceil();
            if points > MAX_AXIS_LEN as f64 {
                return Err(SweepError::InvalidConfig(format!(
                    "{name} range holds {points} points, more than {MAX_AXIS_LEN}"
                )));
            }
        }
        if self.len() > MAX_AXIS_LEN {
            return Err(SweepError::InvalidConfig(format!(
                "{name} axis holds {} values, more than {MAX_AXIS_LEN}",
                self.len()
            )));
        }

        let values = self.values();
        if values.is_empty() {
            return Err(SweepError::InvalidConfig(format!("{name} axis is empty")));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SweepError::InvalidConfig(format!(
                "{name} values must be finite"
            )));
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Range { start, stop, step } => arange_len(*start, *stop, *step),
            Self::Values(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<f64> {
        match self {
            Self::Range { start, step, .. } => (0..self.len())
                .map(|idx| start + idx as f64 * step)
                .collect(),
            Self::Values(values) => values.clone(),
        }
    }
}

fn arange_len(start: f64, stop: f64, step: f64) -> usize {
    if step <= 0.0 || !step.is_finite() {
        return 0;
    }
    let len = ((stop - start) / step).ceil();
    if len.is_finite() && len > 0.0 {
        (len as usize).min(MAX_AXIS_LEN)
    } else {
        0
    }
}

/// Rounds to a fixed number of decimal digits, as used for axis labels.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let scale = 10_f64.powi(decimals as i32);
    (value * scale).round() / scale
}

/// The Cartesian product the sweep runs over. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterGrid {
    k_values: Vec<f64>,
    eps_values: Vec<f64>,
}

impl ParameterGrid {
    pub fn new(k_values: Vec<f64>, eps_values: Vec<f64>) -> Result<Self, SweepError> {
        if k_values.is_empty() || eps_values.is_empty() {
            return Err(SweepError::InvalidConfig(
                "parameter grid axes must be non-empty".to_string(),
            ));
        }
        if k_values.iter().any(|&k| !(k.is_finite() && k > 0.0)) {
            return Err(SweepError::InvalidConfig(
                "K values must be finite and greater than zero".to_string(),
            ));
        }
        if eps_values.iter().any(|eps| !eps.is_finite()) {
            return Err(SweepError::InvalidConfig(
                "eps values must be finite".to_string(),
            ));
        }

        Ok(Self {
            k_values,
            eps_values,
        })
    }

    pub fn from_axes(k_axis: &AxisSpec, eps_axis: &AxisSpec) -> Result<Self, SweepError> {
        k_axis.validate("K")?;
        eps_axis.validate("eps")?;
        Self::new(k_axis.values(), eps_axis.values())
    }

    pub fn k_values(&self) -> &[f64] {
        &self.k_values
    }

    pub fn eps_values(&self) -> &[f64] {
        &self.eps_values
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.k_values.len(), self.eps_values.len())
    }

    pub fn cell_count(&self) -> usize {
        self.k_values.len() * self.eps_values.len()
    }

    /// `(k_index, eps_index)` of a row-major flat index.
    pub fn cell_indices(&self, flat: usize) -> (usize, usize) {
        let n = self.eps_values.len();
        (flat / n, flat % n)
    }
}

/// Row-major matrix of probability estimates: rows are K values, columns are
/// eps values. Failed cells hold NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultGrid {
    k_values: Vec<f64>,
    eps_values: Vec<f64>,
    values: Vec<f64>,
}

impl ResultGrid {
    pub fn filled_nan(grid: &ParameterGrid) -> Self {
        Self {
            k_values: grid.k_values.clone(),
            eps_values: grid.eps_values.clone(),
            values: vec![f64::NAN; grid.cell_count()],
        }
    }

    pub fn from_parts(
        k_values: Vec<f64>,
        eps_values: Vec<f64>,
        values: Vec<f64>,
    ) -> Result<Self, SweepError> {
        let expected = k_values.len() * eps_values.len();
        if values.len() != expected {
            return Err(SweepError::LengthMismatch {
                context: "result grid cells",
                expected,
                got: values.len(),
            });
        }

        Ok(Self {
            k_values,
            eps_values,
            values,
        })
    }

    pub fn k_values(&self) -> &[f64] {
        &self.k_values
    }

    pub fn eps_values(&self) -> &[f64] {
        &self.eps_values
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.k_values.len(), self.eps_values.len())
    }

    pub fn get(&self, k_index: usize, eps_index: usize) -> f64 {
        self.values[k_index * self.eps_values.len() + eps_index]
    }

    pub fn set(&mut self, k_index: usize, eps_index: usize, value: f64) {
        let n = self.eps_values.len();
        self.values[k_index * n + eps_index] = value;
    }

    pub fn row(&self, k_index: usize) -> &[f64] {
        let n = self.eps_values.len();
        &self.values[k_index * n..(k_index + 1) * n]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn failed_cells(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }

    /// Minimum and maximum over the non-NaN cells.
    pub fn finite_range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}
