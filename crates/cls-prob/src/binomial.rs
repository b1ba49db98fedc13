//! Binomial distribution utilities.

use crate::central_levels;
use cls_core::{Error, Result};
use statrs::function::gamma::ln_gamma;

fn ln_choose(n: u64, k: u64) -> f64 {
    // ln(n choose k) = ln Γ(n+1) - ln Γ(k+1) - ln Γ(n-k+1)
    let n1 = (n as f64) + 1.0;
    let k1 = (k as f64) + 1.0;
    let nk1 = ((n - k) as f64) + 1.0;
    ln_gamma(n1) - ln_gamma(k1) - ln_gamma(nk1)
}

fn check_p(p: f64) -> Result<()> {
    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
        return Err(Error::Domain(format!("p must be finite and in [0,1], got {}", p)));
    }
    Ok(())
}

/// Log-PMF of a Binomial distribution `Binom(n, p)` at count `k`.
pub fn logpmf(k: u64, n: u64, p: f64) -> Result<f64> {
    check_p(p)?;
    if k > n {
        return Err(Error::Domain(format!("k must be <= n, got k={} n={}", k, n)));
    }

    if p == 0.0 {
        return Ok(if k == 0 { 0.0 } else { f64::NEG_INFINITY });
    }
    if p == 1.0 {
        return Ok(if k == n { 0.0 } else { f64::NEG_INFINITY });
    }
    let kf = k as f64;
    let nf = n as f64;
    Ok(ln_choose(n, k) + kf * p.ln() + (nf - kf) * (1.0 - p).ln())
}

/// `P(X <= k)` for `X ~ Binom(n, p)`.
pub fn cdf(k: u64, n: u64, p: f64) -> Result<f64> {
    check_p(p)?;
    if k >= n {
        return Ok(1.0);
    }
    let mut acc = 0.0;
    for j in 0..=k {
        acc += logpmf(j, n, p)?.exp();
    }
    Ok(acc.min(1.0))
}

/// Integer central `cl` interval `[lo, hi]` of `Binom(n, p)`.
pub fn interval(n: u64, p: f64, cl: f64) -> Result<(u64, u64)> {
    check_p(p)?;
    let (lo_level, hi_level) = central_levels(cl)?;
    let mut acc = 0.0;
    let mut lo = None;
    for k in 0..=n {
        acc += logpmf(k, n, p)?.exp();
        if lo.is_none() && acc >= lo_level {
            lo = Some(k);
        }
        if acc >= hi_level {
            return Ok((lo.unwrap_or(k), k));
        }
    }
    Ok((lo.unwrap_or(n), n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_edges_p0_p1() {
        assert_eq!(logpmf(0, 5, 0.0).unwrap(), 0.0);
        assert!(logpmf(1, 5, 0.0).unwrap().is_infinite());
        assert_eq!(logpmf(5, 5, 1.0).unwrap(), 0.0);
        assert!(logpmf(4, 5, 1.0).unwrap().is_infinite());
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(logpmf(5, 4, 0.5).is_err());
        assert!(logpmf(2, 4, -0.1).is_err());
        assert!(interval(10, 0.5, 1.5).is_err());
    }

    #[test]
    fn test_cdf_symmetric_half() {
        // Binom(4, 0.5): P(X <= 1) = (1 + 4) / 16
        assert_abs_diff_eq!(cdf(1, 4, 0.5).unwrap(), 5.0 / 16.0, epsilon = 1e-12);
        assert_eq!(cdf(4, 4, 0.5).unwrap(), 1.0);
    }

    #[test]
    fn test_interval_contains_mode() {
        let (lo, hi) = interval(100, 0.3, 0.6827).unwrap();
        assert!(lo < 30 && hi > 30, "({lo}, {hi})");
        assert!(cdf(hi, 100, 0.3).unwrap() >= 0.84135);
    }
}
