use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use stationary_sweep::logging::init_logging;
use stationary_sweep::output::{read_grid_csv, DEFAULT_OUTPUT_ROOT, HEATMAP_PNG};
use stationary_sweep::plot::plot_heatmap;
use stationary_sweep::{create_timestamped_output_dir, run_configured_sweep, SweepConfig};

#[derive(Debug, Parser)]
#[command(author, version, about = "Stationary probability sweep over (K, eps)")]
struct Cli {
    /// JSON configuration; defaults to ./config.json when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the 41 x 41 development grid instead of the full sweep
    #[arg(long, default_value_t = false, conflicts_with = "config")]
    coarse: bool,

    /// Output root; each run gets a timestamped subdirectory
    #[arg(long, default_value = DEFAULT_OUTPUT_ROOT)]
    output: PathBuf,

    /// Re-plot a saved grid CSV instead of running the sweep
    #[arg(long)]
    from_csv: Option<PathBuf>,

    /// Skip the heatmap
    #[arg(long, default_value_t = false)]
    no_plot: bool,

    /// Evaluate cells one after another
    #[arg(long, default_value_t = false)]
    sequential: bool,

    /// Log level for this crate (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let mut config = load_config(&cli)?;
    if cli.no_plot {
        config.enable_plot = false;
    }
    if cli.sequential {
        config.parallel = false;
    }

    if let Some(csv_path) = &cli.from_csv {
        let grid = read_grid_csv(csv_path)
            .with_context(|| format!("failed to read grid {}", csv_path.display()))?;
        let output_dir = create_timestamped_output_dir(&cli.output).with_context(|| {
            format!("failed to create run directory under {}", cli.output.display())
        })?;
        let plot_path = output_dir.join(HEATMAP_PNG);
        plot_heatmap(&grid, &config.plot, &plot_path)
            .with_context(|| format!("failed to render {}", plot_path.display()))?;
        println!("Re-plotted {} cells", grid.values().len());
        println!("Heatmap: {}", plot_path.display());
        return Ok(());
    }

    let summary = run_configured_sweep(&config, &cli.output).context("sweep failed")?;

    println!(
        "Sweep complete. Grid: {} x {} | Failed cells: {} | {:.1} s",
        summary.shape.0, summary.shape.1, summary.failed_cells, summary.elapsed_s
    );
    if let (Some(lo), Some(hi)) = (summary.min_probability, summary.max_probability) {
        println!("Probability range: {lo:.6} .. {hi:.6}");
    }
    println!("Run directory: {}", summary.outputs.output_dir.display());
    println!("Grid CSV: {}", summary.outputs.grid_csv_path.display());
    println!("Failures: {}", summary.outputs.failures_csv_path.display());
    println!("Summary: {}", summary.outputs.summary_path.display());
    if let Some(plot_path) = &summary.outputs.plot_path {
        println!("Heatmap: {}", plot_path.display());
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<SweepConfig> {
    if let Some(path) = &cli.config {
        return load_config_file(path);
    }
    if cli.coarse {
        return Ok(SweepConfig::coarse());
    }

    let cwd_config = PathBuf::from("config.json");
    if cwd_config.exists() {
        return load_config_file(&cwd_config);
    }

    Ok(SweepConfig::default())
}

fn load_config_file(path: &Path) -> anyhow::Result<SweepConfig> {
    SweepConfig::from_json_file(path)
        .with_context(|| format!("failed to load config {}", path.display()))
}
