//! Drift and diffusion of the resource-competition diffusion approximation.
//!
//! `p` is the frequency of the first allele type, `k` the carrying capacity
//! and `eps` the selection asymmetry. The closed forms are evaluated as is;
//! the configured [`DiffusionPolicy`] only applies where the diffusion term is
//! used as a divisor.

use serde::{Deserialize, Serialize};

use crate::NumericalError;

/// Mutation rate used throughout the published sweep.
pub const DEFAULT_MUTATION_RATE: f64 = 0.001;

/// What to do when `diffusion_squared` is zero or negative where it is divided by.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffusionPolicy {
    /// Divide by the raw value; infinities and NaNs flow into the quadrature.
    #[default]
    Propagate,
    /// Divide by `max(value, floor)`.
    Clamp { floor: f64 },
    /// Treat any value `<= 0` as a failure of the cell.
    Reject,
}

/// Read-only model constants threaded through every evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelParams {
    /// Mutation rate `mu`
    pub mutation_rate: f64,
    /// Handling of non-positive diffusion values
    pub diffusion_policy: DiffusionPolicy,
}

impl ModelParams {
    pub fn new(mutation_rate: f64, diffusion_policy: DiffusionPolicy) -> Self {
        Self {
            mutation_rate,
            diffusion_policy,
        }
    }

    pub fn drift(&self, p: f64, k: f64, eps: f64) -> f64 {
        drift(p, k, eps, self.mutation_rate)
    }

    pub fn diffusion_squared(&self, p: f64, k: f64, eps: f64) -> f64 {
        diffusion_squared(p, k, eps, self.mutation_rate)
    }

    /// Diffusion term after the configured policy, ready to be used as a divisor.
    pub fn divisor(&self, p: f64, k: f64, eps: f64) -> Result<f64, NumericalError> {
        let value = self.diffusion_squared(p, k, eps);
        match self.diffusion_policy {
            DiffusionPolicy::Propagate => Ok(value),
            DiffusionPolicy::Clamp { floor } => Ok(value.max(floor)),
            DiffusionPolicy::Reject => {
                if value > 0.0 {
                    Ok(value)
                } else {
                    Err(NumericalError::NonPositiveDiffusion { p, value })
                }
            }
        }
    }

    /// `drift / diffusion_squared`, the derivative of the potential.
    pub fn integrand(&self, p: f64, k: f64, eps: f64) -> Result<f64, NumericalError> {
        Ok(self.drift(p, k, eps) / self.divisor(p, k, eps)?)
    }
}

impl Default for ModelParams {
    fn default() -> Self {
        Self::new(DEFAULT_MUTATION_RATE, DiffusionPolicy::default())
    }
}

/// Deterministic first-moment term.
pub fn drift(p: f64, k: f64, eps: f64, mu: f64) -> f64 {
    let q = 1.0 - p;
    p * q * q * ((2.0 - eps * (k - 1.0)) / k) + mu * (1.0 - 2.0 * p) * (1.0 - 1.0 / k)
}

/// Second-moment (variance-rate) term.
pub fn diffusion_squared(p: f64, k: f64, eps: f64, mu: f64) -> f64 {
    let pq = p * (1.0 - p);
    (pq * (2.0 + (2.0 + eps) * (-p * p + 2.0 * p - 1.0)) + mu * (1.0 - 3.0 * pq)) / k
}
