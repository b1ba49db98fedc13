//! Counting-statistics building blocks for clscan.
//!
//! This crate hosts the probability math shared by the CLs engine:
//! - per-distribution helpers (log-pmf, CDF, central intervals)
//! - efficiency estimators with binomial and Bayesian uncertainties
//! - asymmetric Poisson uncertainties used by the scan fluctuators

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod beta;
pub mod binomial;
pub mod efficiency;
pub mod normal;
pub mod poisson;

use serde::{Deserialize, Serialize};

/// How an interval is extracted from a discrete distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalMode {
    /// Integer quantiles of the distribution.
    Discrete,
    /// Continuous counterpart (Beta posterior, interpolated Poisson CDF).
    #[default]
    Continuous,
}

/// Lower and upper CDF levels of a central `cl` interval.
pub(crate) fn central_levels(cl: f64) -> cls_core::Result<(f64, f64)> {
    if !cl.is_finite() || cl <= 0.0 || cl >= 1.0 {
        return Err(cls_core::Error::Domain(format!(
            "confidence level must be in (0, 1), got {cl}"
        )));
    }
    Ok((0.5 * (1.0 - cl), 0.5 * (1.0 + cl)))
}
