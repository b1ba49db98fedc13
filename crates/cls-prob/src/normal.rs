//! Normal distribution utilities.

use cls_core::{Error, Result};
use std::f64::consts::SQRT_2;

/// Natural log of `sqrt(2π)`.
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// Log-PDF of a Normal distribution `N(mu, sigma)` at `x`.
pub fn logpdf(x: f64, mu: f64, sigma: f64) -> Result<f64> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(Error::Domain(format!("sigma must be finite and > 0, got {}", sigma)));
    }
    let z = (x - mu) / sigma;
    Ok(-0.5 * z * z - sigma.ln() - LN_SQRT_2PI)
}

/// Standard-normal CDF.
pub fn cdf(x: f64) -> f64 {
    // Φ(x) = 0.5 * erfc(-x / sqrt(2)) keeps precision in the lower tail.
    0.5 * statrs::function::erf::erfc(-x / SQRT_2)
}

/// Standard-normal inverse CDF `Φ⁻¹(p)` for `p ∈ [0, 1]`.
///
/// Returns `-inf` at `p = 0` and `+inf` at `p = 1`.
pub fn quantile(p: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&p) {
        return Err(Error::Domain(format!("probability must be in [0, 1], got {}", p)));
    }
    if p == 0.0 {
        return Ok(f64::NEG_INFINITY);
    }
    if p == 1.0 {
        return Ok(f64::INFINITY);
    }
    Ok(-SQRT_2 * statrs::function::erf::erfc_inv(2.0 * p))
}

/// Significance `Φ⁻¹(1 - clb)` of a background right-tail probability.
pub fn significance(clb: f64) -> Result<f64> {
    quantile(1.0 - clb)
}
