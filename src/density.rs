//! Potential function and speed density of the diffusion.

use crate::model::ModelParams;
use crate::quadrature::{try_integrate, ConvergencePolicy, Quadrature, QuadratureOptions};
use crate::NumericalError;

/// Everything needed to evaluate the speed measure at arbitrary points:
/// model constants plus the quadrature contract used for every integral.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeedMeasure {
    pub model: ModelParams,
    pub quadrature: QuadratureOptions,
    pub convergence: ConvergencePolicy,
}

impl SpeedMeasure {
    pub fn new(
        model: ModelParams,
        quadrature: QuadratureOptions,
        convergence: ConvergencePolicy,
    ) -> Self {
        Self {
            model,
            quadrature,
            convergence,
        }
    }

    /// `U(p) = ∫_{p0}^{p} drift / diffusion_squared`, with its error bound.
    pub fn potential(
        &self,
        p: f64,
        k: f64,
        eps: f64,
        p0: f64,
    ) -> Result<Quadrature, NumericalError> {
        let model = self.model;
        let quadrature = try_integrate(|x| model.integrand(x, k, eps), p0, p, &self.quadrature)?;
        self.convergence.check(quadrature)
    }

    /// Unnormalised stationary density `exp(U(p)) / diffusion_squared(p)`,
    /// with the potential anchored at zero. Not memoised: every call runs a
    /// fresh potential integral.
    pub fn speed_density(&self, p: f64, k: f64, eps: f64) -> Result<f64, NumericalError> {
        let potential = self.potential(p, k, eps, 0.0)?;
        Ok(potential.value.exp() / self.model.divisor(p, k, eps)?)
    }

    /// Integral of the speed density over `[a, b]`.
    pub fn integrate_density(
        &self,
        a: f64,
        b: f64,
        k: f64,
        eps: f64,
    ) -> Result<Quadrature, NumericalError> {
        let quadrature = try_integrate(|p| self.speed_density(p, k, eps), a, b, &self.quadrature)?;
        self.convergence.check(quadrature)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::model::DiffusionPolicy;

    #[test]
    fn potential_matches_reference_value() {
        let measure = SpeedMeasure::default();
        let u = measure.potential(0.7, 500.0, 0.002, 0.0).unwrap().value;
        assert_relative_eq!(u, 12.832_491_848_797_5, max_relative = 1e-9);
    }

    #[test]
    fn potential_is_antisymmetric_in_its_bounds() {
        let measure = SpeedMeasure::default();
        let forward = measure.potential(0.8, 700.0, 0.001, 0.2).unwrap().value;
        let backward = measure.potential(0.2, 700.0, 0.001, 0.8).unwrap().value;
        assert_relative_eq!(forward, -backward, max_relative = 1e-12);
    }

    #[test]
    fn speed_density_combines_potential_and_diffusion() {
        let measure = SpeedMeasure::default();
        let (p, k, eps) = (0.35, 400.0, 0.003);
        let u = measure.potential(p, k, eps, 0.0).unwrap().value;
        let expected = u.exp() / measure.model.diffusion_squared(p, k, eps);
        assert_relative_eq!(
            measure.speed_density(p, k, eps).unwrap(),
            expected,
            max_relative = 1e-15
        );
    }

    #[test]
    fn speed_density_at_origin_is_inverse_diffusion() {
        let measure = SpeedMeasure::default();
        let m0 = measure.speed_density(0.0, 500.0, 0.002).unwrap();
        assert_relative_eq!(m0, 500.0 / 0.001, max_relative = 1e-12);
    }

    #[test]
    fn rejected_diffusion_surfaces_from_potential() {
        let measure = SpeedMeasure::new(
            ModelParams::new(0.001, DiffusionPolicy::Reject),
            QuadratureOptions::default(),
            ConvergencePolicy::Accept,
        );
        assert!(matches!(
            measure.potential(0.5, 500.0, 0.5, 0.0),
            Err(NumericalError::NonPositiveDiffusion { .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn potential_is_additive(
            p0 in 0.0_f64..0.3,
            p1 in 0.3_f64..0.6,
            p2 in 0.6_f64..1.0,
            k in 300.0_f64..1300.0,
            eps in 0.0_f64..0.0041,
        ) {
            let measure = SpeedMeasure::default();
            let whole = measure.potential(p2, k, eps, p0).unwrap().value;
            let first = measure.potential(p1, k, eps, p0).unwrap().value;
            let second = measure.potential(p2, k, eps, p1).unwrap().value;
            let scale = whole.abs().max(first.abs()).max(second.abs()).max(1.0);
            prop_assert!((whole - (first + second)).abs() <= 1e-7 * scale);
        }

        #[test]
        fn potential_over_empty_interval_is_zero(
            p in 0.0_f64..=1.0,
            k in 300.0_f64..1300.0,
            eps in 0.0_f64..0.0041,
        ) {
            let measure = SpeedMeasure::default();
            prop_assert_eq!(measure.potential(p, k, eps, p).unwrap().value, 0.0);
        }
    }
}
