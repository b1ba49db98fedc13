//! Selection efficiencies with binomial and Bayesian uncertainties.
//!
//! All estimators take `k` passing events out of `n` trials.

use crate::{IntervalMode, beta, binomial, central_levels};
use cls_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Efficiency with a symmetric uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Efficiency {
    /// Central value.
    pub value: f64,
    /// Symmetric uncertainty.
    pub error: f64,
}

/// Efficiency with an asymmetric uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AsymmetricEfficiency {
    /// Central value `k / n`.
    pub value: f64,
    /// `value - lower`.
    pub err_low: f64,
    /// `upper - value`.
    pub err_high: f64,
}

fn check_counts(k: u64, n: u64) -> Result<()> {
    if n == 0 {
        return Err(Error::Domain("efficiency requires n > 0 trials".to_string()));
    }
    if k > n {
        return Err(Error::Domain(format!("k must be <= n, got k={} n={}", k, n)));
    }
    Ok(())
}

/// Binomial efficiency `k/n` with uncertainty `sqrt(k (1 - k/n)) / n`.
pub fn binomial(k: u64, n: u64) -> Result<Efficiency> {
    check_counts(k, n)?;
    let (kf, nf) = (k as f64, n as f64);
    Ok(Efficiency { value: kf / nf, error: (kf * (1.0 - kf / nf)).sqrt() / nf })
}

/// Bayesian symmetric efficiency.
///
/// Continuous mode reports the mean and standard deviation of the
/// `Beta(k + 1, n - k + 1)` posterior; discrete mode those of the binomial
/// with `p = k/n`, in efficiency units.
pub fn bayes(k: u64, n: u64, mode: IntervalMode) -> Result<Efficiency> {
    check_counts(k, n)?;
    let (kf, nf) = (k as f64, n as f64);
    match mode {
        IntervalMode::Continuous => {
            let (a, b) = (kf + 1.0, nf - kf + 1.0);
            Ok(Efficiency { value: beta::mean(a, b)?, error: beta::std_dev(a, b)? })
        }
        IntervalMode::Discrete => {
            let p = kf / nf;
            Ok(Efficiency { value: p, error: (p * (1.0 - p) / nf).sqrt() })
        }
    }
}

/// Bayesian asymmetric efficiency: the central `cl` interval of the same
/// distribution as [`bayes`], reported as `(p, p - lower, upper - p)`.
pub fn bayes_asymmetric(k: u64, n: u64, cl: f64, mode: IntervalMode) -> Result<AsymmetricEfficiency> {
    check_counts(k, n)?;
    let (lo_level, hi_level) = central_levels(cl)?;
    let (kf, nf) = (k as f64, n as f64);
    let p = kf / nf;
    let (lower, upper) = match mode {
        IntervalMode::Continuous => {
            let (a, b) = (kf + 1.0, nf - kf + 1.0);
            (beta::quantile(lo_level, a, b)?, beta::quantile(hi_level, a, b)?)
        }
        IntervalMode::Discrete => {
            let (lo, hi) = binomial::interval(n, p, cl)?;
            (lo as f64 / nf, hi as f64 / nf)
        }
    };
    Ok(AsymmetricEfficiency {
        value: p,
        err_low: (p - lower).max(0.0),
        err_high: (upper - p).max(0.0),
    })
}
