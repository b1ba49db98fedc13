//! Beta distribution utilities.

use cls_core::{Error, Result};
use statrs::distribution::{Beta, ContinuousCDF};
use statrs::function::gamma::ln_gamma;

#[inline]
fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

fn check_shapes(a: f64, b: f64) -> Result<()> {
    if !a.is_finite() || a <= 0.0 {
        return Err(Error::Domain(format!("a must be finite and > 0, got {}", a)));
    }
    if !b.is_finite() || b <= 0.0 {
        return Err(Error::Domain(format!("b must be finite and > 0, got {}", b)));
    }
    Ok(())
}

/// Log-PDF of a Beta(`a`, `b`) distribution at `x`.
///
/// Support: `0 <= x <= 1`.
pub fn logpdf(x: f64, a: f64, b: f64) -> Result<f64> {
    check_shapes(a, b)?;
    if !(0.0..=1.0).contains(&x) {
        return Ok(f64::NEG_INFINITY);
    }

    let ln_norm = -ln_beta(a, b);
    if x == 0.0 {
        if a < 1.0 {
            return Ok(f64::INFINITY);
        }
        if a > 1.0 {
            return Ok(f64::NEG_INFINITY);
        }
        return Ok(ln_norm);
    }
    if x == 1.0 {
        if b < 1.0 {
            return Ok(f64::INFINITY);
        }
        if b > 1.0 {
            return Ok(f64::NEG_INFINITY);
        }
        return Ok(ln_norm);
    }

    Ok(ln_norm + (a - 1.0) * x.ln() + (b - 1.0) * (1.0 - x).ln())
}

/// Mean `a / (a + b)`.
pub fn mean(a: f64, b: f64) -> Result<f64> {
    check_shapes(a, b)?;
    Ok(a / (a + b))
}

/// Standard deviation `sqrt(ab / ((a+b)^2 (a+b+1)))`.
pub fn std_dev(a: f64, b: f64) -> Result<f64> {
    check_shapes(a, b)?;
    let s = a + b;
    Ok((a * b / (s * s * (s + 1.0))).sqrt())
}

/// Inverse CDF of Beta(`a`, `b`) at probability `p`.
pub fn quantile(p: f64, a: f64, b: f64) -> Result<f64> {
    check_shapes(a, b)?;
    if !(0.0..=1.0).contains(&p) {
        return Err(Error::Domain(format!("probability must be in [0, 1], got {}", p)));
    }
    let dist = Beta::new(a, b).map_err(|e| Error::Domain(format!("Beta({a}, {b}): {e}")))?;
    Ok(dist.inverse_cdf(p))
}
