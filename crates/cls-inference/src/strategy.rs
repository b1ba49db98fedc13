//! Per-bin nuisance strategies: fluctuators perturb expected yields before
//! Poisson sampling, priors weight the perturbed configurations.

use cls_core::{Error, Result};
use cls_prob::IntervalMode;
use rand::{Rng, RngCore};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Half-width, in standard deviations, of the window on which the
/// continuous Poisson uncertainty is tabulated.
const UNCERTAINTY_WINDOW_NSIGMA: f64 = 5.0;

/// User fluctuator: `(bin, expected, rng) -> perturbed mean`.
pub type FluctuateFn = dyn Fn(usize, f64, &mut dyn RngCore) -> f64 + Send + Sync;

/// User prior: `(bin, expected, fluctuated) -> weight`.
pub type PriorFn = dyn Fn(usize, f64, f64) -> f64 + Send + Sync;

/// Distribution of the skew variable `r` of [`Fluctuator::AsymmetricPoisson`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FluctuationDraw {
    /// `r ~ U[0, 1)`; the perturbation only ever raises the mean.
    #[default]
    Uniform,
    /// `r ~ N(0, 1)`; the mean moves both ways.
    Gaussian,
}

/// Strategy returning a non-negative perturbed mean for one bin.
#[derive(Clone)]
pub enum Fluctuator {
    /// `m · (1 + ½ r (σ_high + σ_low) + ½ r² (σ_high − σ_low))` with relative,
    /// per-bin `σ_low` / `σ_high`.
    AsymmetricPoisson {
        /// Relative downward uncertainty per bin.
        sigma_low: Vec<f64>,
        /// Relative upward uncertainty per bin.
        sigma_high: Vec<f64>,
        /// Distribution of `r`.
        draw: FluctuationDraw,
    },
    /// `m · (1 + σ z)`, `z ~ N(0, 1)`, with relative per-bin `σ`.
    Gaussian {
        /// Relative uncertainty per bin.
        sigma: Vec<f64>,
    },
    /// Caller-supplied strategy.
    Custom(Arc<FluctuateFn>),
}

impl fmt::Debug for Fluctuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fluctuator::AsymmetricPoisson { sigma_low, sigma_high, draw } => f
                .debug_struct("AsymmetricPoisson")
                .field("sigma_low", sigma_low)
                .field("sigma_high", sigma_high)
                .field("draw", draw)
                .finish(),
            Fluctuator::Gaussian { sigma } => f.debug_struct("Gaussian").field("sigma", sigma).finish(),
            Fluctuator::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn check_sigmas(what: &str, sigma: &[f64]) -> Result<()> {
    if let Some((i, s)) = sigma.iter().enumerate().find(|(_, s)| !s.is_finite() || **s < 0.0) {
        return Err(Error::Domain(format!("{what}[{i}] must be finite and >= 0, got {s}")));
    }
    Ok(())
}

impl Fluctuator {
    /// Asymmetric Poisson fluctuator from explicit relative uncertainties.
    pub fn asymmetric_poisson(sigma_low: Vec<f64>, sigma_high: Vec<f64>, draw: FluctuationDraw) -> Result<Self> {
        if sigma_low.len() != sigma_high.len() {
            return Err(Error::dimension("sigma_high bins", sigma_low.len(), sigma_high.len()));
        }
        check_sigmas("sigma_low", &sigma_low)?;
        check_sigmas("sigma_high", &sigma_high)?;
        Ok(Fluctuator::AsymmetricPoisson { sigma_low, sigma_high, draw })
    }

    /// Asymmetric Poisson fluctuator whose uncertainties are the `cl` Bayesian
    /// Poisson interval of each expected yield (continuous mode), relative to
    /// the yield. Empty bins get no uncertainty.
    pub fn from_expected(expected: &[f64], cl: f64, draw: FluctuationDraw) -> Result<Self> {
        let mut sigma_low = Vec::with_capacity(expected.len());
        let mut sigma_high = Vec::with_capacity(expected.len());
        for &e in expected {
            if e > 0.0 {
                let (lo, hi) = cls_prob::poisson::bayes_asymmetric_uncertainty(
                    e,
                    cl,
                    IntervalMode::Continuous,
                    UNCERTAINTY_WINDOW_NSIGMA,
                )?;
                sigma_low.push(lo / e);
                sigma_high.push(hi / e);
            } else {
                sigma_low.push(0.0);
                sigma_high.push(0.0);
            }
        }
        Self::asymmetric_poisson(sigma_low, sigma_high, draw)
    }

    /// Gaussian fluctuator with relative per-bin widths.
    pub fn gaussian(sigma: Vec<f64>) -> Result<Self> {
        check_sigmas("sigma", &sigma)?;
        Ok(Fluctuator::Gaussian { sigma })
    }

    /// Wrap a caller-supplied strategy.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(usize, f64, &mut dyn RngCore) -> f64 + Send + Sync + 'static,
    {
        Fluctuator::Custom(Arc::new(f))
    }

    /// Number of bins the strategy is parameterized for (`None` for custom strategies).
    pub fn n_bins(&self) -> Option<usize> {
        match self {
            Fluctuator::AsymmetricPoisson { sigma_low, .. } => Some(sigma_low.len()),
            Fluctuator::Gaussian { sigma } => Some(sigma.len()),
            Fluctuator::Custom(_) => None,
        }
    }

    /// Perturbed mean for `bin`, clamped to `>= 0` (NaN becomes 0).
    pub fn fluctuate(&self, bin: usize, expected: f64, rng: &mut dyn RngCore) -> f64 {
        let m = match self {
            Fluctuator::AsymmetricPoisson { sigma_low, sigma_high, draw } => {
                let lo = sigma_low.get(bin).copied().unwrap_or(0.0);
                let hi = sigma_high.get(bin).copied().unwrap_or(0.0);
                let r: f64 = match draw {
                    FluctuationDraw::Uniform => rng.random::<f64>(),
                    FluctuationDraw::Gaussian => StandardNormal.sample(rng),
                };
                expected * (1.0 + 0.5 * r * (hi + lo) + 0.5 * r * r * (hi - lo))
            }
            Fluctuator::Gaussian { sigma } => {
                let s = sigma.get(bin).copied().unwrap_or(0.0);
                let z: f64 = StandardNormal.sample(rng);
                expected * (1.0 + s * z)
            }
            Fluctuator::Custom(f) => f(bin, expected, rng),
        };
        m.max(0.0)
    }
}

/// Strategy weighting a fluctuated configuration of one bin.
#[derive(Clone, Default)]
pub enum Prior {
    /// Weight 1 everywhere.
    #[default]
    Uniform,
    /// `exp(-½ ((m − e) / (σ e))²)` with relative per-bin `σ`.
    Gaussian {
        /// Relative width per bin.
        sigma: Vec<f64>,
    },
    /// Caller-supplied weight.
    Custom(Arc<PriorFn>),
}

impl fmt::Debug for Prior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prior::Uniform => f.write_str("Uniform"),
            Prior::Gaussian { sigma } => f.debug_struct("Gaussian").field("sigma", sigma).finish(),
            Prior::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Prior {
    /// Gaussian prior with relative per-bin widths.
    pub fn gaussian(sigma: Vec<f64>) -> Result<Self> {
        check_sigmas("prior sigma", &sigma)?;
        Ok(Prior::Gaussian { sigma })
    }

    /// Wrap a caller-supplied weight function.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(usize, f64, f64) -> f64 + Send + Sync + 'static,
    {
        Prior::Custom(Arc::new(f))
    }

    /// `true` for the flat prior; samples then stay unweighted.
    pub fn is_uniform(&self) -> bool {
        matches!(self, Prior::Uniform)
    }

    /// Number of bins the prior is parameterized for (`None` when bin-independent).
    pub fn n_bins(&self) -> Option<usize> {
        match self {
            Prior::Gaussian { sigma } => Some(sigma.len()),
            Prior::Uniform | Prior::Custom(_) => None,
        }
    }

    /// Weight of `fluctuated` given the nominal `expected` in `bin`.
    ///
    /// Fails with [`Error::Domain`] when the weight is negative or not finite.
    pub fn evaluate(&self, bin: usize, expected: f64, fluctuated: f64) -> Result<f64> {
        let w = match self {
            Prior::Uniform => return Ok(1.0),
            Prior::Gaussian { sigma } => {
                let width = sigma.get(bin).copied().unwrap_or(0.0) * expected;
                if width > 0.0 {
                    let z = (fluctuated - expected) / width;
                    (-0.5 * z * z).exp()
                } else {
                    1.0
                }
            }
            Prior::Custom(f) => f(bin, expected, fluctuated),
        };
        if !w.is_finite() || w < 0.0 {
            return Err(Error::Domain(format!("prior weight for bin {bin} must be finite and >= 0, got {w}")));
        }
        Ok(w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn uniform_draw_only_raises_the_mean() {
        let f = Fluctuator::asymmetric_poisson(vec![0.3], vec![0.5], FluctuationDraw::Uniform).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let m = f.fluctuate(0, 4.0, &mut rng);
            // r in [0, 1): m in [4, 4 * (1 + 0.4 + 0.1))
            assert!((4.0..6.0).contains(&m), "{m}");
        }
    }

    #[test]
    fn gaussian_draw_is_clamped() {
        let f = Fluctuator::gaussian(vec![5.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let draws: Vec<f64> = (0..2000).map(|_| f.fluctuate(0, 1.0, &mut rng)).collect();
        assert!(draws.iter().all(|&m| m >= 0.0));
        assert!(draws.iter().any(|&m| m == 0.0));
    }

    #[test]
    fn from_expected_uses_poisson_interval() {
        let f = Fluctuator::from_expected(&[0.0, 9.0], 0.6827, FluctuationDraw::Uniform).unwrap();
        let Fluctuator::AsymmetricPoisson { sigma_low, sigma_high, .. } = &f else {
            panic!("expected asymmetric fluctuator");
        };
        assert_eq!((sigma_low[0], sigma_high[0]), (0.0, 0.0));
        // Gamma(10, 1) posterior: about [6.9, 13.1] around 9.
        assert!(sigma_low[1] > 0.15 && sigma_low[1] < 0.35, "{}", sigma_low[1]);
        assert!(sigma_high[1] > 0.35 && sigma_high[1] < 0.6, "{}", sigma_high[1]);
        assert!(sigma_high[1] > sigma_low[1]);
        assert_eq!(f.n_bins(), Some(2));
    }

    #[test]
    fn custom_results_are_clamped() {
        let f = Fluctuator::custom(|_, e, _| -e);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(f.fluctuate(0, 2.0, &mut rng), 0.0);
        assert_eq!(f.n_bins(), None);
        assert_eq!(format!("{f:?}"), "Custom(..)");
    }

    #[test]
    fn prior_weights() {
        assert_eq!(Prior::Uniform.evaluate(0, 1.0, 5.0).unwrap(), 1.0);
        let p = Prior::gaussian(vec![0.5]).unwrap();
        assert_relative_eq!(p.evaluate(0, 2.0, 3.0).unwrap(), (-0.5f64).exp(), epsilon = 1e-14);
        assert_eq!(p.evaluate(0, 0.0, 3.0).unwrap(), 1.0);
        assert!(matches!(Prior::custom(|_, _, _| -1.0).evaluate(0, 1.0, 1.0), Err(Error::Domain(_))));
        assert!(Prior::custom(|_, _, _| f64::NAN).evaluate(0, 1.0, 1.0).is_err());
    }

    #[test]
    fn rejects_negative_sigma() {
        assert!(Fluctuator::gaussian(vec![-0.1]).is_err());
        assert!(Fluctuator::asymmetric_poisson(vec![0.1], vec![0.1, 0.2], FluctuationDraw::Uniform).is_err());
    }
}
