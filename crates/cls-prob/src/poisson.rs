//! Poisson distribution utilities.

use crate::{IntervalMode, central_levels};
use cls_core::{Error, Result};
use statrs::function::gamma::{gamma_lr, gamma_ur, ln_gamma};

/// Grid resolution used by the continuous uncertainty interpolation.
const WINDOW_POINTS: usize = 256;

#[inline]
fn ln_factorial(n: u64) -> f64 {
    ln_gamma(n as f64 + 1.0)
}

fn check_lambda(lambda: f64) -> Result<()> {
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(Error::Domain(format!("lambda must be finite and >= 0, got {}", lambda)));
    }
    Ok(())
}

/// Log-PMF of a Poisson distribution with mean `lambda` at count `k`.
pub fn logpmf(k: u64, lambda: f64) -> Result<f64> {
    check_lambda(lambda)?;
    if lambda == 0.0 {
        return Ok(if k == 0 { 0.0 } else { f64::NEG_INFINITY });
    }

    let kf = k as f64;
    Ok(kf * lambda.ln() - lambda - ln_factorial(k))
}

/// `P(X <= k)` for `X ~ Poisson(lambda)`.
pub fn cdf(k: u64, lambda: f64) -> Result<f64> {
    check_lambda(lambda)?;
    if lambda == 0.0 {
        return Ok(1.0);
    }
    // P(X <= k) = Q(k + 1, lambda), the regularized upper incomplete gamma.
    Ok(gamma_ur(k as f64 + 1.0, lambda))
}

/// Integer central `cl` interval `[lo, hi]` of `Poisson(lambda)`.
///
/// `lo` is the smallest count with `P(X <= lo) >= (1 - cl) / 2` and `hi` the
/// smallest count with `P(X <= hi) >= (1 + cl) / 2`.
pub fn interval(lambda: f64, cl: f64) -> Result<(u64, u64)> {
    check_lambda(lambda)?;
    let (lo_level, hi_level) = central_levels(cl)?;
    if lambda == 0.0 {
        return Ok((0, 0));
    }

    let spread = 12.0 * lambda.sqrt() + 12.0;
    let mut k = (lambda - spread).floor().max(0.0) as u64;
    let k_max = (lambda + spread).ceil() as u64;
    let mut lo = None;
    while k < k_max {
        let c = cdf(k, lambda)?;
        if lo.is_none() && c >= lo_level {
            lo = Some(k);
        }
        if c >= hi_level {
            return Ok((lo.unwrap_or(k), k));
        }
        k += 1;
    }
    Ok((lo.unwrap_or(k_max), k_max))
}

/// Bayesian asymmetric uncertainty `(low, high)` on `n` observed events.
///
/// - [`IntervalMode::Discrete`]: the integer `cl` interval of `Poisson(n)`,
///   reported as `(n - lo, hi - n)`.
/// - [`IntervalMode::Continuous`]: the flat-prior posterior `Gamma(n + 1, 1)`
///   of the Poisson mean, whose CDF is tabulated on `n ± nsigma·σ`
///   (`σ = max(√n, 1)`) and linearly interpolated at the interval levels.
///
/// Both components are clamped to be non-negative.
pub fn bayes_asymmetric_uncertainty(
    n: f64,
    cl: f64,
    mode: IntervalMode,
    nsigma: f64,
) -> Result<(f64, f64)> {
    check_lambda(n)?;
    let (lo_level, hi_level) = central_levels(cl)?;

    let (lo, hi) = match mode {
        IntervalMode::Discrete => {
            let (lo, hi) = interval(n, cl)?;
            (lo as f64, hi as f64)
        }
        IntervalMode::Continuous => {
            if !nsigma.is_finite() || nsigma <= 0.0 {
                return Err(Error::Domain(format!("nsigma must be finite and > 0, got {}", nsigma)));
            }
            let width = nsigma * n.sqrt().max(1.0);
            let start = (n - width).max(0.0);
            let stop = n + width;
            let step = (stop - start) / (WINDOW_POINTS - 1) as f64;
            let xs: Vec<f64> = (0..WINDOW_POINTS).map(|i| start + step * i as f64).collect();
            let cdfs: Vec<f64> = xs.iter().map(|&x| gamma_lr(n + 1.0, x)).collect();
            (interpolate_level(&xs, &cdfs, lo_level), interpolate_level(&xs, &cdfs, hi_level))
        }
    };

    Ok(((n - lo).max(0.0), (hi - n).max(0.0)))
}

/// First `x` at which the tabulated non-decreasing CDF reaches `level`.
///
/// Levels outside the tabulated range resolve to the window edges.
fn interpolate_level(xs: &[f64], cdfs: &[f64], level: f64) -> f64 {
    if level <= cdfs[0] {
        return xs[0];
    }
    for i in 1..xs.len() {
        if cdfs[i] >= level {
            let (f0, f1) = (cdfs[i - 1], cdfs[i]);
            if f1 - f0 <= 0.0 {
                return xs[i];
            }
            let t = (level - f0) / (f1 - f0);
            return xs[i - 1] + t * (xs[i] - xs[i - 1]);
        }
    }
    xs[xs.len() - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn factorial(n: u64) -> u64 {
        (1..=n).product()
    }

    #[test]
    fn test_basic_value_matches_naive() {
        let k = 3u64;
        let lambda: f64 = 2.5;
        let prob = lambda.powi(k as i32) * (-lambda).exp() / factorial(k) as f64;
        let lp = logpmf(k, lambda).unwrap();
        assert!((lp - prob.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_lambda_zero() {
        assert_eq!(logpmf(0, 0.0).unwrap(), 0.0);
        assert!(logpmf(1, 0.0).unwrap().is_infinite());
        assert_eq!(cdf(0, 0.0).unwrap(), 1.0);
        assert_eq!(interval(0.0, 0.68).unwrap(), (0, 0));
    }

    #[test]
    fn test_invalid_lambda() {
        assert!(logpmf(0, -1.0).is_err());
        assert!(cdf(2, f64::NAN).is_err());
    }

    #[test]
    fn test_cdf_matches_pmf_sum() {
        let lambda = 4.2;
        let mut acc = 0.0;
        for k in 0..15u64 {
            acc += logpmf(k, lambda).unwrap().exp();
            assert_abs_diff_eq!(cdf(k, lambda).unwrap(), acc, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_interval_brackets_mean() {
        let (lo, hi) = interval(10.0, 0.6827).unwrap();
        assert!(lo <= 10 && hi >= 10);
        assert!(cdf(lo, 10.0).unwrap() >= 0.158);
        assert!(lo == 0 || cdf(lo - 1, 10.0).unwrap() < 0.15865);
        assert!(cdf(hi, 10.0).unwrap() >= 0.84135);
    }

    #[test]
    fn test_interval_rejects_bad_cl() {
        assert!(interval(3.0, 0.0).is_err());
        assert!(interval(3.0, 1.0).is_err());
    }

    #[test]
    fn test_discrete_uncertainty_from_interval() {
        let (lo, hi) = interval(7.0, 0.9).unwrap();
        let (l, h) = bayes_asymmetric_uncertainty(7.0, 0.9, IntervalMode::Discrete, 5.0).unwrap();
        assert_eq!(l, 7.0 - lo as f64);
        assert_eq!(h, hi as f64 - 7.0);
    }

    #[test]
    fn test_continuous_uncertainty_is_upper_skewed() {
        // The posterior of a Poisson mean has a longer upper tail.
        let (l, h) = bayes_asymmetric_uncertainty(5.0, 0.6827, IntervalMode::Continuous, 5.0).unwrap();
        assert!(l > 0.0 && h > 0.0);
        assert!(h > l, "low={l} high={h}");
        // Roughly one sigma for moderate counts.
        assert!(l > 1.0 && l < 3.5, "low={l}");
        assert!(h > 2.0 && h < 4.5, "high={h}");
    }

    #[test]
    fn test_continuous_uncertainty_zero_count() {
        let (l, h) = bayes_asymmetric_uncertainty(0.0, 0.6827, IntervalMode::Continuous, 5.0).unwrap();
        assert_eq!(l, 0.0);
        assert!(h > 0.0 && h < 2.5, "high={h}");
    }
}
