use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};

use crate::density::SpeedMeasure;
use crate::grid::{AxisSpec, ParameterGrid};
use crate::model::{DiffusionPolicy, ModelParams, DEFAULT_MUTATION_RATE};
use crate::plot::PlotSettings;
use crate::quadrature::{ConvergencePolicy, QuadratureOptions};
use crate::SweepError;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    #[serde_as(as = "DefaultOnNull")]
    pub mutation_rate: f64,
    pub k_axis: AxisSpec,
    pub eps_axis: AxisSpec,
    pub quadrature: QuadratureOptions,
    pub diffusion_policy: DiffusionPolicy,
    pub convergence_policy: ConvergencePolicy,
    #[serde_as(as = "DefaultOnNull")]
    pub label_decimals: u32,
    #[serde_as(as = "DefaultOnNull")]
    pub parallel: bool,
    #[serde_as(as = "DefaultOnNull")]
    pub progress_every: usize,
    #[serde_as(as = "DefaultOnNull")]
    pub enable_plot: bool,
    pub plot: PlotSettings,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            mutation_rate: DEFAULT_MUTATION_RATE,
            k_axis: AxisSpec::range(300.0, 1301.0, 1.0),
            eps_axis: AxisSpec::range(0.0, 0.0041, 0.000_004_1),
            quadrature: QuadratureOptions::default(),
            diffusion_policy: DiffusionPolicy::default(),
            convergence_policy: ConvergencePolicy::default(),
            label_decimals: 7,
            parallel: true,
            progress_every: 1000,
            enable_plot: true,
            plot: PlotSettings::default(),
        }
    }
}

impl SweepConfig {
    /// The 41 x 41 grid used while developing the model.
    pub fn coarse() -> Self {
        Self {
            k_axis: AxisSpec::range(300.0, 1301.0, 25.0),
            eps_axis: AxisSpec::range(0.0, 0.0041, 0.0001),
            progress_every: 100,
            plot: PlotSettings {
                tick_every: 8,
                ..PlotSettings::default()
            },
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, SweepError> {
        let raw = fs::read_to_string(path)?;
        let config: SweepConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        if !(self.mutation_rate.is_finite() && self.mutation_rate > 0.0) {
            return Err(SweepError::InvalidConfig(
                "mutation_rate must be finite and greater than zero".to_string(),
            ));
        }

        self.parameter_grid()?;

        let q = &self.quadrature;
        if !(q.abs_tol.is_finite() && q.rel_tol.is_finite()) || q.abs_tol < 0.0 || q.rel_tol < 0.0
        {
            return Err(SweepError::InvalidConfig(
                "quadrature tolerances must be finite and non-negative".to_string(),
            ));
        }
        if q.abs_tol == 0.0 && q.rel_tol == 0.0 {
            return Err(SweepError::InvalidConfig(
                "at least one quadrature tolerance must be positive".to_string(),
            ));
        }
        if q.max_subdivisions == 0 {
            return Err(SweepError::InvalidConfig(
                "quadrature.max_subdivisions must be greater than zero".to_string(),
            ));
        }

        if let DiffusionPolicy::Clamp { floor } = self.diffusion_policy {
            if !(floor.is_finite() && floor > 0.0) {
                return Err(SweepError::InvalidConfig(
                    "diffusion clamp floor must be finite and greater than zero".to_string(),
                ));
            }
        }

        if self.label_decimals > 15 {
            return Err(SweepError::InvalidConfig(
                "label_decimals must be at most 15".to_string(),
            ));
        }

        if self.progress_every == 0 {
            return Err(SweepError::InvalidConfig(
                "progress_every must be greater than zero".to_string(),
            ));
        }

        self.plot.validate()
    }

    pub fn parameter_grid(&self) -> Result<ParameterGrid, SweepError> {
        ParameterGrid::from_axes(&self.k_axis, &self.eps_axis)
    }

    pub fn model_params(&self) -> ModelParams {
        ModelParams::new(self.mutation_rate, self.diffusion_policy)
    }

    pub fn speed_measure(&self) -> SpeedMeasure {
        SpeedMeasure::new(
            self.model_params(),
            self.quadrature,
            self.convergence_policy,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_full_sweep() {
        let config = SweepConfig::default();
        config.validate().unwrap();
        let grid = config.parameter_grid().unwrap();
        assert_eq!(grid.shape(), (1001, 1001));
        assert_eq!(grid.k_values()[0], 300.0);
        assert_eq!(grid.k_values()[1000], 1300.0);
        assert_eq!(config.mutation_rate, 0.001);
        assert_eq!(config.label_decimals, 7);
    }

    #[test]
    fn coarse_preset_is_valid() {
        let config = SweepConfig::coarse();
        config.validate().unwrap();
        assert_eq!(config.parameter_grid().unwrap().shape(), (41, 41));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let raw = r#"{
            "k_axis": [500],
            "eps_axis": [0.0, 0.002],
            "diffusion_policy": {"kind": "clamp", "floor": 1e-12},
            "convergence_policy": "strict",
            "quadrature": {"max_subdivisions": 100},
            "progress_every": null
        }"#;
        let config: SweepConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.progress_every, 0);
        assert!(config.validate().is_err());
        let config = SweepConfig {
            progress_every: 10,
            ..config
        };
        config.validate().unwrap();
        assert_eq!(config.mutation_rate, DEFAULT_MUTATION_RATE);
        assert_eq!(config.parameter_grid().unwrap().shape(), (1, 2));
        assert_eq!(
            config.diffusion_policy,
            DiffusionPolicy::Clamp { floor: 1e-12 }
        );
        assert_eq!(config.convergence_policy, ConvergencePolicy::Strict);
        assert_eq!(config.quadrature.max_subdivisions, 100);
        assert_eq!(config.quadrature.abs_tol, 1.49e-8);
        assert!(config.parallel);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_mu = SweepConfig {
            mutation_rate: 0.0,
            ..SweepConfig::coarse()
        };
        assert!(bad_mu.validate().is_err());

        let bad_k = SweepConfig {
            k_axis: AxisSpec::Values(vec![0.0, 500.0]),
            ..SweepConfig::coarse()
        };
        assert!(bad_k.validate().is_err());

        let bad_floor = SweepConfig {
            diffusion_policy: DiffusionPolicy::Clamp { floor: 0.0 },
            ..SweepConfig::coarse()
        };
        assert!(bad_floor.validate().is_err());

        let bad_quadrature = SweepConfig {
            quadrature: QuadratureOptions {
                max_subdivisions: 0,
                ..QuadratureOptions::default()
            },
            ..SweepConfig::coarse()
        };
        assert!(bad_quadrature.validate().is_err());
    }

    #[test]
    fn json_round_trip_preserves_config() {
        let config = SweepConfig::coarse();
        let raw = serde_json::to_string(&config).unwrap();
        let back: SweepConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn shipped_presets_load() {
        let configs = Path::new(env!("CARGO_MANIFEST_DIR")).join("configs");

        let coarse = SweepConfig::from_json_file(&configs.join("coarse.json")).unwrap();
        assert_eq!(coarse, SweepConfig::coarse());

        let full = SweepConfig::from_json_file(&configs.join("full.json")).unwrap();
        full.validate().unwrap();
        assert_eq!(full.parameter_grid().unwrap().shape(), (1001, 1001));
        assert_eq!(full.diffusion_policy, DiffusionPolicy::Reject);
    }
}
