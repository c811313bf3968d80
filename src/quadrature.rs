//! Adaptive Gauss–Kronrod quadrature.
//!
//! Globally adaptive bisection driven by the 21-point Kronrod rule with its
//! embedded 10-point Gauss rule, in the manner of QUADPACK's `QAG`. The
//! subinterval with the largest error estimate is bisected until the summed
//! error estimate meets `max(abs_tol, rel_tol * |value|)` or the subdivision
//! limit is reached.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};

use crate::NumericalError;

const XGK: [f64; 11] = [
    0.995_657_163_025_808_080_735_527_280_689_003,
    0.973_906_528_517_171_720_077_964_012_084_452,
    0.930_157_491_355_708_226_001_207_180_059_508,
    0.865_063_366_688_984_510_732_096_688_423_493,
    0.780_817_726_586_416_897_063_717_578_345_042,
    0.679_409_568_299_024_406_234_327_365_114_874,
    0.562_757_134_668_604_683_339_000_099_272_694,
    0.433_395_394_129_247_190_799_265_943_165_784,
    0.294_392_862_701_460_198_131_126_603_103_866,
    0.148_874_338_981_631_210_884_826_001_129_720,
    0.0,
];

const WGK: [f64; 11] = [
    0.011_694_638_867_371_874_278_064_396_062_192,
    0.032_558_162_307_964_727_478_818_972_459_390,
    0.054_755_896_574_351_996_031_381_300_244_580,
    0.075_039_674_810_919_952_767_043_140_916_190,
    0.093_125_454_583_697_605_535_065_465_083_366,
    0.109_387_158_802_297_641_899_210_590_325_805,
    0.123_491_976_262_065_851_077_208_287_686_972,
    0.134_709_217_311_473_325_928_054_001_771_707,
    0.142_775_938_577_060_080_797_094_273_138_717,
    0.147_739_104_901_338_491_374_841_515_972_068,
    0.149_445_554_002_916_905_664_936_468_389_821,
];

// Gauss weights for the odd-indexed Kronrod nodes.
const WG: [f64; 5] = [
    0.066_671_344_308_688_137_593_568_809_893_332,
    0.149_451_349_150_580_593_145_776_339_657_697,
    0.219_086_362_515_982_043_995_534_934_228_163,
    0.269_266_719_309_996_355_091_226_921_569_469,
    0.295_524_224_714_752_870_173_892_994_651_338,
];

/// Tolerances and subdivision budget. Defaults match QUADPACK's usual
/// `epsabs = epsrel = 1.49e-8`, `limit = 50`.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadratureOptions {
    #[serde_as(as = "DefaultOnNull")]
    pub abs_tol: f64,
    #[serde_as(as = "DefaultOnNull")]
    pub rel_tol: f64,
    #[serde_as(as = "DefaultOnNull")]
    pub max_subdivisions: usize,
}

impl Default for QuadratureOptions {
    fn default() -> Self {
        Self {
            abs_tol: 1.49e-8,
            rel_tol: 1.49e-8,
            max_subdivisions: 50,
        }
    }
}

/// Whether an integral that exhausted its subdivision budget is still used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergencePolicy {
    /// Keep the best estimate and carry on.
    #[default]
    Accept,
    /// Report the integral as [`NumericalError::NotConverged`].
    Strict,
}

impl ConvergencePolicy {
    pub fn check(self, quadrature: Quadrature) -> Result<Quadrature, NumericalError> {
        match self {
            Self::Strict if !quadrature.converged => Err(NumericalError::NotConverged {
                value: quadrature.value,
                abs_error: quadrature.abs_error,
            }),
            _ => Ok(quadrature),
        }
    }
}

/// Integral value together with the diagnostics of the adaptive scheme.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quadrature {
    pub value: f64,
    /// Estimated absolute error of `value`
    pub abs_error: f64,
    /// Number of integrand evaluations
    pub evaluations: usize,
    /// Number of subintervals in the final partition
    pub subdivisions: usize,
    /// False when the tolerance was not met within the subdivision budget
    pub converged: bool,
}

impl Quadrature {
    fn zero() -> Self {
        Self {
            value: 0.0,
            abs_error: 0.0,
            evaluations: 0,
            subdivisions: 0,
            converged: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    a: f64,
    b: f64,
    value: f64,
    error: f64,
}

/// Integrates an infallible function over `[a, b]`.
pub fn integrate<F>(
    mut f: F,
    a: f64,
    b: f64,
    options: &QuadratureOptions,
) -> Result<Quadrature, NumericalError>
where
    F: FnMut(f64) -> f64,
{
    try_integrate(|x| Ok(f(x)), a, b, options)
}

/// Integrates `f` over `[a, b]`. `b < a` yields the negated integral over
/// `[b, a]` and `a == b` yields exactly zero without evaluating `f`.
///
/// Any error returned by `f`, and any non-finite sample, aborts the
/// integration.
pub fn try_integrate<F>(
    mut f: F,
    a: f64,
    b: f64,
    options: &QuadratureOptions,
) -> Result<Quadrature, NumericalError>
where
    F: FnMut(f64) -> Result<f64, NumericalError>,
{
    if a == b {
        return Ok(Quadrature::zero());
    }

    let mut evaluations = 0_usize;
    let mut sample = |x: f64| -> Result<f64, NumericalError> {
        evaluations += 1;
        let value = f(x)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(NumericalError::NonFiniteIntegrand { x, value })
        }
    };

    let (value, error) = kronrod21(&mut sample, a, b)?;
    let mut segments = vec![Segment { a, b, value, error }];
    let limit = options.max_subdivisions.max(1);

    let converged = loop {
        let total: f64 = segments.iter().map(|s| s.value).sum();
        let error: f64 = segments.iter().map(|s| s.error).sum();
        if error <= options.abs_tol.max(options.rel_tol * total.abs()) {
            break true;
        }
        if segments.len() >= limit {
            break false;
        }

        let worst = segments
            .iter()
            .enumerate()
            .max_by(|(_, x), (_, y)| x.error.total_cmp(&y.error))
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        let segment = segments.swap_remove(worst);
        let mid = 0.5 * (segment.a + segment.b);

        // Interval can no longer be split in floating point.
        if mid == segment.a || mid == segment.b {
            segments.push(segment);
            break false;
        }

        let (left_value, left_error) = kronrod21(&mut sample, segment.a, mid)?;
        let (right_value, right_error) = kronrod21(&mut sample, mid, segment.b)?;
        segments.push(Segment {
            a: segment.a,
            b: mid,
            value: left_value,
            error: left_error,
        });
        segments.push(Segment {
            a: mid,
            b: segment.b,
            value: right_value,
            error: right_error,
        });
    };

    let value: f64 = segments.iter().map(|s| s.value).sum();
    let abs_error: f64 = segments.iter().map(|s| s.error).sum();
    drop(sample);

    Ok(Quadrature {
        value,
        abs_error,
        evaluations,
        subdivisions: segments.len(),
        converged,
    })
}

/// One application of the 21-point Kronrod rule: (integral, error estimate).
fn kronrod21<F>(f: &mut F, a: f64, b: f64) -> Result<(f64, f64), NumericalError>
where
    F: FnMut(f64) -> Result<f64, NumericalError>,
{
    let center = 0.5 * (a + b);
    let half = 0.5 * (b - a);
    let f_center = f(center)?;

    let mut gauss = 0.0;
    let mut kronrod = f_center * WGK[10];
    let mut abs_sum = kronrod.abs();
    let mut left = [0.0; 10];
    let mut right = [0.0; 10];

    for j in 0..10 {
        let dx = half * XGK[j];
        let f1 = f(center - dx)?;
        let f2 = f(center + dx)?;
        left[j] = f1;
        right[j] = f2;
        kronrod += WGK[j] * (f1 + f2);
        abs_sum += WGK[j] * (f1.abs() + f2.abs());
        if j % 2 == 1 {
            gauss += WG[j / 2] * (f1 + f2);
        }
    }

    let mean = 0.5 * kronrod;
    let mut asc = WGK[10] * (f_center - mean).abs();
    for j in 0..10 {
        asc += WGK[j] * ((left[j] - mean).abs() + (right[j] - mean).abs());
    }

    let result = kronrod * half;
    let abs_sum = abs_sum * half.abs();
    let asc = asc * half.abs();
    let mut error = ((kronrod - gauss) * half).abs();

    if asc != 0.0 && error != 0.0 {
        error = asc * (200.0 * error / asc).powf(1.5).min(1.0);
    }
    if abs_sum > f64::MIN_POSITIVE / (50.0 * f64::EPSILON) {
        error = error.max(50.0 * f64::EPSILON * abs_sum);
    }

    Ok((result, error))
}
