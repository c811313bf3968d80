//! Stationary-measure parameter sweep for a one-dimensional diffusion
//! approximation of a resource-competition model.
//!
//! For every `(K, eps)` pair on a grid the sweep integrates the speed density
//! of the diffusion and reports the stationary probability that the allele
//! frequency is at least one half. Results are written as CSV and rendered as
//! a heatmap.

pub mod config;
pub mod density;
pub mod grid;
pub mod logging;
pub mod model;
pub mod output;
pub mod plot;
pub mod quadrature;
pub mod sweep;

use thiserror::Error;

pub use config::SweepConfig;
pub use density::SpeedMeasure;
pub use grid::{AxisSpec, ParameterGrid, ResultGrid};
pub use model::{diffusion_squared, drift, DiffusionPolicy, ModelParams};
pub use output::create_timestamped_output_dir;
pub use quadrature::{ConvergencePolicy, Quadrature, QuadratureOptions};
pub use sweep::{
    run_sweep, run_sweep_into_dir, stationary_probability, CellEstimate, CellFailure, SweepOutcome,
};

/// Failure of a single numerical evaluation. Always local to one grid cell.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NumericalError {
    #[error("integrand is not finite at x = {x}: {value}")]
    NonFiniteIntegrand { x: f64, value: f64 },
    #[error("diffusion term is not positive at p = {p}: {value}")]
    NonPositiveDiffusion { p: f64, value: f64 },
    #[error("quadrature did not converge: value {value}, estimated error {abs_error}")]
    NotConverged { value: f64, abs_error: f64 },
    #[error("normalizing integral is not finite and positive: {value}")]
    DegenerateNormalizer { value: f64 },
    #[error("probability estimate {value} lies outside [0, 1]")]
    ProbabilityOutOfRange { value: f64 },
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{context} length mismatch: expected {expected}, got {got}")]
    LengthMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("plot error: {0}")]
    Plot(String),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error(transparent)]
    Numerical(#[from] NumericalError),
}

/// Runs the configured sweep and writes every artefact into a fresh
/// timestamped directory under `output_root`.
pub fn run_configured_sweep(
    config: &SweepConfig,
    output_root: &std::path::Path,
) -> Result<output::RunSummary, SweepError> {
    config.validate()?;
    let output_dir = create_timestamped_output_dir(output_root)?;
    sweep::write_run(config, &output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_sweep_writes_into_fresh_run_dir() {
        let root = tempfile::tempdir().unwrap();
        let config = SweepConfig {
            k_axis: AxisSpec::Values(vec![500.0]),
            eps_axis: AxisSpec::Values(vec![0.0, 0.002]),
            enable_plot: false,
            ..SweepConfig::default()
        };

        let summary = run_configured_sweep(&config, root.path()).unwrap();
        assert_eq!(summary.outputs.output_dir.parent(), Some(root.path()));
        assert!(summary.outputs.grid_csv_path.exists());
        assert!(summary.outputs.summary_path.exists());
        assert_eq!(summary.shape, (1, 2));
    }

    #[test]
    fn invalid_config_creates_no_run_dir() {
        let root = tempfile::tempdir().unwrap();
        let config = SweepConfig {
            mutation_rate: -1.0,
            ..SweepConfig::coarse()
        };

        assert!(matches!(
            run_configured_sweep(&config, root.path()),
            Err(SweepError::InvalidConfig(_))
        ));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
