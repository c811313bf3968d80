use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SweepConfig;
use crate::density::SpeedMeasure;
use crate::grid::{ParameterGrid, ResultGrid};
use crate::output::{
    write_failures_csv, write_grid_csv, write_summary_json, OutputFiles, RunSummary,
};
use crate::plot::plot_heatmap;
use crate::quadrature::Quadrature;
use crate::{NumericalError, SweepError};

/// Distance outside [0, 1] attributed to rounding and clamped away.
const PROBABILITY_SLACK: f64 = 1e-9;

/// Successful evaluation of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellEstimate {
    /// `1 - lower / total`
    pub probability: f64,
    /// Speed density integrated over `[0, 0.5]`
    pub lower: Quadrature,
    /// Speed density integrated over `[0, 1]`
    pub total: Quadrature,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellFailure {
    pub k_index: usize,
    pub eps_index: usize,
    pub k: f64,
    pub eps: f64,
    pub error: NumericalError,
}

#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub grid: ResultGrid,
    pub failures: Vec<CellFailure>,
    /// Largest estimated absolute error of any normalising integral
    pub max_abs_error: f64,
}

/// Stationary probability that the first allele type's frequency is at
/// least one half, under the speed measure at `(k, eps)`.
pub fn stationary_probability(
    measure: &SpeedMeasure,
    k: f64,
    eps: f64,
) -> Result<CellEstimate, NumericalError> {
    let lower = measure.integrate_density(0.0, 0.5, k, eps)?;
    let total = measure.integrate_density(0.0, 1.0, k, eps)?;

    if !(total.value.is_finite() && total.value > 0.0) {
        return Err(NumericalError::DegenerateNormalizer { value: total.value });
    }

    let probability = 1.0 - lower.value / total.value;
    if !(-PROBABILITY_SLACK..=1.0 + PROBABILITY_SLACK).contains(&probability) {
        return Err(NumericalError::ProbabilityOutOfRange { value: probability });
    }

    Ok(CellEstimate {
        probability: probability.clamp(0.0, 1.0),
        lower,
        total,
    })
}

/// Validates `config` and evaluates every cell of its parameter grid.
pub fn run_sweep(config: &SweepConfig) -> Result<SweepOutcome, SweepError> {
    config.validate()?;
    sweep_validated(config)
}

fn sweep_validated(config: &SweepConfig) -> Result<SweepOutcome, SweepError> {
    let grid = config.parameter_grid()?;
    let measure = config.speed_measure();
    Ok(evaluate_grid(
        &grid,
        &measure,
        config.parallel,
        config.progress_every,
    ))
}

/// Evaluates every cell. A failing cell is recorded as NaN plus a
/// [`CellFailure`]; the remaining cells are unaffected.
pub fn evaluate_grid(
    grid: &ParameterGrid,
    measure: &SpeedMeasure,
    parallel: bool,
    progress_every: usize,
) -> SweepOutcome {
    let (m, n) = grid.shape();
    info!(k_values = m, eps_values = n, parallel, "starting sweep");

    let progress = Progress::new(grid.cell_count(), progress_every);
    let results = evaluate_cells(grid, measure, parallel, &progress);

    let mut outcome = SweepOutcome {
        grid: ResultGrid::filled_nan(grid),
        failures: Vec::new(),
        max_abs_error: 0.0,
    };

    for (flat, result) in results {
        let (i, j) = grid.cell_indices(flat);
        let (k, eps) = (grid.k_values()[i], grid.eps_values()[j]);
        match result {
            Ok(estimate) => {
                debug!(k, eps, probability = estimate.probability, "cell done");
                outcome.grid.set(i, j, estimate.probability);
                outcome.max_abs_error = outcome
                    .max_abs_error
                    .max(estimate.lower.abs_error)
                    .max(estimate.total.abs_error);
            }
            Err(error) => {
                warn!(k, eps, %error, "cell failed");
                outcome.failures.push(CellFailure {
                    k_index: i,
                    eps_index: j,
                    k,
                    eps,
                    error,
                });
            }
        }
    }

    info!(
        cells = grid.cell_count(),
        failures = outcome.failures.len(),
        elapsed_s = progress.elapsed_secs(),
        "sweep finished"
    );
    outcome
}

type CellResult = (usize, Result<CellEstimate, NumericalError>);

fn evaluate_cell(
    grid: &ParameterGrid,
    measure: &SpeedMeasure,
    progress: &Progress,
    flat: usize,
) -> CellResult {
    let (i, j) = grid.cell_indices(flat);
    let result = stationary_probability(measure, grid.k_values()[i], grid.eps_values()[j]);
    progress.tick();
    (flat, result)
}

#[cfg(feature = "parallel")]
fn evaluate_cells(
    grid: &ParameterGrid,
    measure: &SpeedMeasure,
    parallel: bool,
    progress: &Progress,
) -> Vec<CellResult> {
    if parallel {
        (0..grid.cell_count())
            .into_par_iter()
            .map(|flat| evaluate_cell(grid, measure, progress, flat))
            .collect()
    } else {
        evaluate_sequential(grid, measure, progress)
    }
}

#[cfg(not(feature = "parallel"))]
fn evaluate_cells(
    grid: &ParameterGrid,
    measure: &SpeedMeasure,
    parallel: bool,
    progress: &Progress,
) -> Vec<CellResult> {
    if parallel {
        debug!("built without the `parallel` feature, sweeping sequentially");
    }
    evaluate_sequential(grid, measure, progress)
}

fn evaluate_sequential(
    grid: &ParameterGrid,
    measure: &SpeedMeasure,
    progress: &Progress,
) -> Vec<CellResult> {
    let (m, n) = grid.shape();
    let mut results = Vec::with_capacity(m * n);
    for i in 0..m {
        for j in 0..n {
            results.push(evaluate_cell(grid, measure, progress, i * n + j));
        }
    }
    results
}

struct Progress {
    done: AtomicUsize,
    total: usize,
    every: usize,
    started: Instant,
}

impl Progress {
    fn new(total: usize, every: usize) -> Self {
        Self {
            done: AtomicUsize::new(0),
            total,
            every: every.max(1),
            started: Instant::now(),
        }
    }

    fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if done % self.every == 0 || done == self.total {
            info!(
                done,
                total = self.total,
                percent = 100.0 * done as f64 / self.total as f64,
                elapsed_s = self.elapsed_secs(),
                "sweep progress"
            );
        }
    }

    fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// Runs the sweep and writes the grid CSV, failure list, heatmap and run
/// summary into `output_dir`.
pub fn run_sweep_into_dir(
    config: &SweepConfig,
    output_dir: &Path,
) -> Result<RunSummary, SweepError> {
    config.validate()?;
    write_run(config, output_dir)
}

/// Body of [`run_sweep_into_dir`] for a config that already passed validation.
pub(crate) fn write_run(
    config: &SweepConfig,
    output_dir: &Path,
) -> Result<RunSummary, SweepError> {
    fs::create_dir_all(output_dir)?;

    let started = Instant::now();
    let outcome = sweep_validated(config)?;
    let elapsed_s = started.elapsed().as_secs_f64();

    let files = OutputFiles::in_dir(output_dir, config.enable_plot);
    write_grid_csv(&files.grid_csv_path, &outcome.grid, config.label_decimals)?;
    write_failures_csv(&files.failures_csv_path, &outcome.failures)?;
    if let Some(plot_path) = &files.plot_path {
        plot_heatmap(&outcome.grid, &config.plot, plot_path)?;
    }

    let summary = RunSummary::new(config.clone(), &outcome, elapsed_s, files);
    write_summary_json(&summary.outputs.summary_path, &summary)?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::grid::AxisSpec;
    use crate::model::{DiffusionPolicy, ModelParams};
    use crate::quadrature::{ConvergencePolicy, QuadratureOptions};

    fn small_config(k: Vec<f64>, eps: Vec<f64>) -> SweepConfig {
        SweepConfig {
            k_axis: AxisSpec::Values(k),
            eps_axis: AxisSpec::Values(eps),
            progress_every: 1,
            ..SweepConfig::default()
        }
    }

    #[test]
    fn reference_cells_match_baseline() {
        let outcome = run_sweep(&small_config(vec![500.0], vec![0.0, 0.002])).unwrap();
        assert_eq!(outcome.grid.shape(), (1, 2));
        assert!(outcome.failures.is_empty());

        let neutral = outcome.grid.get(0, 0);
        let biased = outcome.grid.get(0, 1);
        assert_abs_diff_eq!(neutral, 0.562_620_4, epsilon = 1e-4);
        assert_abs_diff_eq!(biased, 0.492_880_7, epsilon = 1e-4);
        assert!(biased < neutral);
    }

    #[test]
    fn successful_cells_lie_in_unit_interval() {
        let config = small_config(vec![10.0, 300.0, 900.0, 1300.0], vec![0.0, 0.001, 0.0041]);
        let outcome = run_sweep(&config).unwrap();
        assert!(outcome.failures.is_empty());
        for &value in outcome.grid.values() {
            assert!((0.0..=1.0).contains(&value), "{value}");
        }
        assert!(outcome.max_abs_error.is_finite());
    }

    #[test]
    fn selection_asymmetry_lowers_probability() {
        let outcome = run_sweep(&small_config(
            vec![1300.0],
            vec![0.0, 0.001, 0.002, 0.003, 0.004],
        ))
        .unwrap();
        let row = outcome.grid.row(0);
        assert!(row.windows(2).all(|pair| pair[1] < pair[0]), "{row:?}");
    }

    #[test]
    fn parallel_and_sequential_sweeps_agree() {
        let mut config = small_config(vec![300.0, 800.0], vec![0.0, 0.003]);
        let parallel = run_sweep(&config).unwrap();
        config.parallel = false;
        let sequential = run_sweep(&config).unwrap();
        assert_eq!(parallel.grid, sequential.grid);
    }

    #[test]
    fn overflowing_cell_is_flagged_without_aborting() {
        let outcome = run_sweep(&small_config(vec![500.0, 1.0e6], vec![0.0])).unwrap();
        assert_abs_diff_eq!(outcome.grid.get(0, 0), 0.562_620_4, epsilon = 1e-4);
        assert!(outcome.grid.get(1, 0).is_nan());
        assert_eq!(outcome.failures.len(), 1);

        let failure = &outcome.failures[0];
        assert_eq!((failure.k_index, failure.eps_index), (1, 0));
        assert_eq!(failure.k, 1.0e6);
        assert!(matches!(
            failure.error,
            NumericalError::NonFiniteIntegrand { .. }
        ));
    }

    #[test]
    fn rejected_diffusion_is_a_cell_failure() {
        let config = SweepConfig {
            diffusion_policy: DiffusionPolicy::Reject,
            ..small_config(vec![500.0], vec![0.002, 0.5])
        };
        let outcome = run_sweep(&config).unwrap();
        assert!(!outcome.grid.get(0, 0).is_nan());
        assert!(outcome.grid.get(0, 1).is_nan());
        assert!(matches!(
            outcome.failures[0].error,
            NumericalError::NonPositiveDiffusion { .. }
        ));
    }

    #[test]
    fn strict_convergence_flags_truncated_integrals() {
        let measure = SpeedMeasure::new(
            ModelParams::default(),
            QuadratureOptions {
                max_subdivisions: 1,
                ..QuadratureOptions::default()
            },
            ConvergencePolicy::Strict,
        );
        assert!(matches!(
            stationary_probability(&measure, 500.0, 0.002),
            Err(NumericalError::NotConverged { .. })
        ));
    }

    #[test]
    fn estimate_keeps_error_bounds() {
        let estimate = stationary_probability(&SpeedMeasure::default(), 500.0, 0.002).unwrap();
        assert!(estimate.lower.converged && estimate.total.converged);
        assert!(estimate.lower.value < estimate.total.value);
        assert!(estimate.total.abs_error <= 1.49e-8 * estimate.total.value);
    }

    #[test]
    fn run_writes_all_artefacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = SweepConfig {
            enable_plot: false,
            ..small_config(vec![500.0], vec![0.0, 0.002])
        };
        let summary = run_sweep_into_dir(&config, dir.path()).unwrap();
        assert_eq!(summary.shape, (1, 2));
        assert_eq!(summary.failed_cells, 0);
        assert!(summary.outputs.grid_csv_path.exists());
        assert!(summary.outputs.failures_csv_path.exists());
        assert!(summary.outputs.summary_path.exists());
        assert!(summary.outputs.plot_path.is_none());
    }
}
