use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use csv::{ReaderBuilder, Writer};
use serde::Serialize;

use crate::config::SweepConfig;
use crate::grid::{round_to, ResultGrid};
use crate::sweep::{CellFailure, SweepOutcome};
use crate::SweepError;

pub const DEFAULT_OUTPUT_ROOT: &str = "output-stationary-sweep";
pub const GRID_CSV: &str = "stationary_probability.csv";
pub const FAILURES_CSV: &str = "failures.csv";
pub const SUMMARY_JSON: &str = "summary.json";
pub const HEATMAP_PNG: &str = "stationary_probability.png";

#[derive(Debug, Clone, Serialize)]
pub struct OutputFiles {
    pub output_dir: PathBuf,
    pub grid_csv_path: PathBuf,
    pub failures_csv_path: PathBuf,
    pub summary_path: PathBuf,
    pub plot_path: Option<PathBuf>,
}

impl OutputFiles {
    pub fn in_dir(output_dir: &Path, with_plot: bool) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            grid_csv_path: output_dir.join(GRID_CSV),
            failures_csv_path: output_dir.join(FAILURES_CSV),
            summary_path: output_dir.join(SUMMARY_JSON),
            plot_path: with_plot.then(|| output_dir.join(HEATMAP_PNG)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub config: SweepConfig,
    pub shape: (usize, usize),
    pub failed_cells: usize,
    pub min_probability: Option<f64>,
    pub max_probability: Option<f64>,
    pub max_abs_error: f64,
    pub elapsed_s: f64,
    pub outputs: OutputFiles,
}

impl RunSummary {
    pub fn new(
        config: SweepConfig,
        outcome: &SweepOutcome,
        elapsed_s: f64,
        outputs: OutputFiles,
    ) -> Self {
        let range = outcome.grid.finite_range();
        Self {
            config,
            shape: outcome.grid.shape(),
            failed_cells: outcome.failures.len(),
            min_probability: range.map(|(lo, _)| lo),
            max_probability: range.map(|(_, hi)| hi),
            max_abs_error: outcome.max_abs_error,
            elapsed_s,
            outputs,
        }
    }
}

pub fn create_timestamped_output_dir(output_root: &Path) -> Result<PathBuf, SweepError> {
    fs::create_dir_all(output_root)?;

    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let mut output_dir = output_root.join(&timestamp);
    let mut counter = 1_u32;

    while output_dir.exists() {
        output_dir = output_root.join(format!("{timestamp}-{counter:02}"));
        counter += 1;
    }

    fs::create_dir_all(&output_dir)?;
    Ok(output_dir)
}

fn fmt_label(value: f64, decimals: u32) -> String {
    format!("{}", round_to(value, decimals))
}

// Shortest representation that parses back to the same f64; NaN is blank.
fn fmt_cell(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        format!("{value}")
    }
}

fn parse_label(raw: &str, context: &str) -> Result<f64, SweepError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|err| SweepError::Parse(format!("{context} label {raw:?}: {err}")))
}

fn parse_cell(raw: &str) -> Result<f64, SweepError> {
    match raw.trim() {
        "" | "NaN" | "nan" | "NA" => Ok(f64::NAN),
        other => other
            .parse::<f64>()
            .map_err(|err| SweepError::Parse(format!("cell value {other:?}: {err}"))),
    }
}

/// Writes the grid with K as the index column and eps labels, rounded to
/// `decimals` digits, as the header row.
pub fn write_grid_csv(path: &Path, grid: &ResultGrid, decimals: u32) -> Result<(), SweepError> {
    let mut writer = Writer::from_path(path)?;

    let mut header = Vec::with_capacity(grid.eps_values().len() + 1);
    header.push(String::new());
    header.extend(grid.eps_values().iter().map(|&eps| fmt_label(eps, decimals)));
    writer.write_record(&header)?;

    for (idx, &k) in grid.k_values().iter().enumerate() {
        let mut record = Vec::with_capacity(header.len());
        record.push(fmt_label(k, decimals));
        record.extend(grid.row(idx).iter().map(|&value| fmt_cell(value)));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn read_grid_csv(path: &Path) -> Result<ResultGrid, SweepError> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;

    let header = reader.headers()?.clone();
    let eps_values = header
        .iter()
        .skip(1)
        .map(|raw| parse_label(raw, "eps"))
        .collect::<Result<Vec<_>, _>>()?;

    let mut k_values = Vec::new();
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != eps_values.len() + 1 {
            return Err(SweepError::LengthMismatch {
                context: "grid csv row",
                expected: eps_values.len() + 1,
                got: record.len(),
            });
        }

        k_values.push(parse_label(&record[0], "K")?);
        for raw in record.iter().skip(1) {
            values.push(parse_cell(raw)?);
        }
    }

    ResultGrid::from_parts(k_values, eps_values, values)
}

pub fn write_failures_csv(path: &Path, failures: &[CellFailure]) -> Result<(), SweepError> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record(["k_index", "eps_index", "k", "eps", "reason"])?;

    for failure in failures {
        writer.write_record([
            failure.k_index.to_string(),
            failure.eps_index.to_string(),
            failure.k.to_string(),
            failure.eps.to_string(),
            failure.error.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

pub fn write_summary_json(path: &Path, summary: &RunSummary) -> Result<(), SweepError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data = serde_json::to_string_pretty(summary)?;
    fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::ParameterGrid;
    use crate::NumericalError;

    fn sample_grid() -> ResultGrid {
        let params = ParameterGrid::new(
            vec![300.0, 325.0, 350.0],
            vec![0.0, 0.000_004_1, 0.000_008_2, 0.001_234_567_89],
        )
        .unwrap();
        let mut grid = ResultGrid::filled_nan(&params);
        for i in 0..3 {
            for j in 0..4 {
                if (i, j) != (2, 3) {
                    grid.set(i, j, 0.3 + 0.01 * (i * 4 + j) as f64 + 1e-13);
                }
            }
        }
        grid
    }

    #[test]
    fn grid_round_trip_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(GRID_CSV);
        let grid = sample_grid();
        write_grid_csv(&path, &grid, 7).unwrap();
        let back = read_grid_csv(&path).unwrap();

        assert_eq!(back.shape(), grid.shape());
        assert_eq!(back.k_values(), grid.k_values());
        for (a, b) in back.eps_values().iter().zip(grid.eps_values()) {
            assert!((a - b).abs() <= 0.5e-7);
        }
        for (a, b) in back.values().iter().zip(grid.values()) {
            assert!(a == b || (a.is_nan() && b.is_nan()));
        }
        assert_eq!(back.failed_cells(), 1);
    }

    #[test]
    fn grid_csv_layout_matches_tabular_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(GRID_CSV);
        let params = ParameterGrid::new(vec![500.0], vec![0.0, 0.002]).unwrap();
        let mut grid = ResultGrid::filled_nan(&params);
        grid.set(0, 0, 0.5);
        write_grid_csv(&path, &grid, 7).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines, vec![",0,0.002", "500,0.5,"]);
    }

    #[test]
    fn malformed_cells_are_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(GRID_CSV);
        fs::write(&path, ",0.001\n500,abc\n").unwrap();
        assert!(matches!(read_grid_csv(&path), Err(SweepError::Parse(_))));
    }

    #[test]
    fn failures_csv_lists_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FAILURES_CSV);
        let failures = vec![CellFailure {
            k_index: 1,
            eps_index: 0,
            k: 1.0e6,
            eps: 0.0,
            error: NumericalError::DegenerateNormalizer { value: 0.0 },
        }];
        write_failures_csv(&path, &failures).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let mut lines = raw.lines();
        assert_eq!(lines.next(), Some("k_index,eps_index,k,eps,reason"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("1,0,1000000,0,"));
        assert!(row.contains("normalizing integral"));
    }

    #[test]
    fn timestamped_dirs_do_not_collide() {
        let root = tempfile::tempdir().unwrap();
        let a = create_timestamped_output_dir(root.path()).unwrap();
        let b = create_timestamped_output_dir(root.path()).unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
    }
}
