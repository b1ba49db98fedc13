//! Common data types for clscan

use serde::{Deserialize, Serialize};

/// Background test-statistic quantiles used for the expected CLs band, in
/// [`ScanPoint`] field order: median, 1σ low/high, 2σ low/high.
pub const BAND_QUANTILES: [f64; 5] = [0.5, 0.317, 0.683, 0.046, 0.954];

/// CLb values at or below this are treated as zero.
const CLB_MIN: f64 = 1e-300;

/// CLs = CLsb / CLb, clamped to `[0, 1]`; defined as 1 when CLb vanishes.
#[inline]
pub fn cls_ratio(clsb: f64, clb: f64) -> f64 {
    if !(clsb.is_finite() && clb.is_finite()) {
        return 1.0;
    }
    if clb <= CLB_MIN {
        return 1.0;
    }
    (clsb / clb).clamp(0.0, 1.0)
}

/// Outcome of one CLs evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClsResult {
    /// Test statistic at which the tails were evaluated.
    pub test_statistic: f64,
    /// Right-tail probability of `test_statistic` under the null hypothesis.
    pub clb: f64,
    /// Right-tail probability of `test_statistic` under the alternative.
    pub clsb: f64,
    /// `clsb / clb` (1 when `clb == 0`).
    pub cls: f64,
    /// Standard-normal upper-tail quantile of `1 - clb`; `±inf` at `clb ∈ {0, 1}`.
    pub significance: f64,
}

impl ClsResult {
    /// Assemble a result from the two tail probabilities and a precomputed significance.
    pub fn new(test_statistic: f64, clb: f64, clsb: f64, significance: f64) -> Self {
        let clb = clb.clamp(0.0, 1.0);
        let clsb = clsb.clamp(0.0, 1.0);
        Self { test_statistic, clb, clsb, cls: cls_ratio(clsb, clb), significance }
    }
}

/// One step of a signal-strength scan.
///
/// Band fields are labelled by the background test-statistic quantile they
/// were evaluated at (see [`BAND_QUANTILES`]), not by the relative size of
/// the CLs values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    /// Signal strength.
    pub mu: f64,
    /// CLs at the background median.
    pub cls_median: f64,
    /// CLs at the 0.317 background quantile.
    pub cls_1sigma_low: f64,
    /// CLs at the 0.683 background quantile.
    pub cls_1sigma_high: f64,
    /// CLs at the 0.046 background quantile.
    pub cls_2sigma_low: f64,
    /// CLs at the 0.954 background quantile.
    pub cls_2sigma_high: f64,
    /// CLs of the configured observation, if any.
    pub cls_observed: Option<f64>,
}

impl ScanPoint {
    /// Build a point from the five band values in [`BAND_QUANTILES`] order.
    pub fn from_band(mu: f64, band: [f64; 5], cls_observed: Option<f64>) -> Self {
        Self {
            mu,
            cls_median: band[0],
            cls_1sigma_low: band[1],
            cls_1sigma_high: band[2],
            cls_2sigma_low: band[3],
            cls_2sigma_high: band[4],
            cls_observed,
        }
    }

    /// The five band values in [`BAND_QUANTILES`] order.
    pub fn band(&self) -> [f64; 5] {
        [
            self.cls_median,
            self.cls_1sigma_low,
            self.cls_1sigma_high,
            self.cls_2sigma_low,
            self.cls_2sigma_high,
        ]
    }
}
