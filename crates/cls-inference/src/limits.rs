//! Upper limits on the signal strength from a CLs scan.

use cls_core::{Error, Result, ScanPoint};
use serde::{Deserialize, Serialize};

const FLAT: f64 = 1e-18;

/// μ where `ys` crosses `alpha`, by linear interpolation over `xs`.
///
/// `xs` must be ascending. The first crossing in the direction of the scan
/// wins; targets outside the range of `ys` clamp to the nearer end. Noisy,
/// non-monotone scans fall back to the first sign change of `ys - alpha`.
pub fn interp_limit(alpha: f64, xs: &[f64], ys: &[f64]) -> Result<f64> {
    if xs.len() != ys.len() {
        return Err(Error::dimension("limit interpolation points", xs.len(), ys.len()));
    }
    let n = xs.len();
    if n < 2 {
        return Err(Error::Domain(format!("limit interpolation needs >= 2 points, got {n}")));
    }
    if let Some(i) = ys.iter().position(|y| !y.is_finite()) {
        return Err(Error::Domain(format!("CLs at mu = {} is not finite", xs[i])));
    }

    let lerp = |i: usize| {
        let (y0, y1) = (ys[i], ys[i + 1]);
        xs[i] + (alpha - y0) / (y1 - y0) * (xs[i + 1] - xs[i])
    };

    let decreasing = ys[0] >= ys[n - 1];
    let (first, last) = (ys[0], ys[n - 1]);
    if decreasing {
        if alpha >= first {
            return Ok(xs[0]);
        }
        if alpha <= last {
            return Ok(xs[n - 1]);
        }
    } else {
        if alpha <= first {
            return Ok(xs[0]);
        }
        if alpha >= last {
            return Ok(xs[n - 1]);
        }
    }

    for i in 0..n - 1 {
        let (y0, y1) = (ys[i], ys[i + 1]);
        if (y0 - alpha).abs() < FLAT {
            return Ok(xs[i]);
        }
        let brackets = if decreasing { y0 >= alpha && y1 <= alpha } else { y0 <= alpha && y1 >= alpha };
        if brackets && (y1 - y0).abs() >= FLAT {
            return Ok(lerp(i));
        }
    }

    log::warn!("non-monotonic CLs scan; using first sign change for the limit");
    for i in 0..n - 1 {
        let (d0, d1) = (ys[i] - alpha, ys[i + 1] - alpha);
        if d0 == 0.0 {
            return Ok(xs[i]);
        }
        if d0 * d1 < 0.0 {
            return Ok(lerp(i));
        }
    }

    let nearest = (0..n)
        .min_by(|&a, &b| (ys[a] - alpha).abs().total_cmp(&(ys[b] - alpha).abs()))
        .unwrap_or(n - 1);
    Ok(xs[nearest])
}

/// Observed and expected upper limits at `CLs = alpha`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpperLimits {
    /// CLs level.
    pub alpha: f64,
    /// Limit from the observed CLs curve, when every point carries one.
    pub observed: Option<f64>,
    /// Expected limits in band order: median, 0.317, 0.683, 0.046, 0.954
    /// background quantile.
    pub expected: [f64; 5],
}

impl UpperLimits {
    /// Interpolate every band of an ascending scan.
    pub fn from_points(points: &[ScanPoint], alpha: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(Error::Domain(format!("alpha must be in (0, 1), got {alpha}")));
        }
        let xs: Vec<f64> = points.iter().map(|p| p.mu).collect();

        let mut expected = [f64::NAN; 5];
        for (k, slot) in expected.iter_mut().enumerate() {
            let ys: Vec<f64> = points.iter().map(|p| p.band()[k]).collect();
            *slot = interp_limit(alpha, &xs, &ys)?;
        }

        let observed: Option<Vec<f64>> = points.iter().map(|p| p.cls_observed).collect();
        let observed = match observed {
            Some(ys) => Some(interp_limit(alpha, &xs, &ys)?),
            None => None,
        };

        Ok(Self { alpha, observed, expected })
    }

    /// Median expected limit.
    pub fn expected_median(&self) -> f64 {
        self.expected[0]
    }
}
