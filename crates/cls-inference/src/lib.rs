//! # cls-inference
//!
//! Toy-based CLs hypothesis testing for clscan.
//!
//! This crate provides:
//! - The Poisson log-likelihood-ratio test statistic
//! - Per-bin fluctuators and priors for composite hypotheses
//! - `ClsHypothesis` / `ClsFactory`: pseudo-experiment generation and CLb, CLs+b, CLs
//! - `MuScanDriver`: signal-strength scans with expected bands and upper limits
//!
//! Randomness is deterministic under a fixed seed. Scan point `i` reseeds
//! its factory with `seed + i`, so sequential and parallel scans agree.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod factory;
pub mod hypothesis;
pub mod limits;
pub mod scan;
pub mod strategy;
pub mod teststat;

pub use config::{PriorConfig, ScanConfig};
pub use factory::ClsFactory;
pub use hypothesis::ClsHypothesis;
pub use limits::{UpperLimits, interp_limit};
pub use scan::{HypotestResult, MuScanDriver, ScanResult, Snapshot, TsHistogram, point_seed};
pub use strategy::{FluctuationDraw, Fluctuator, Prior};
pub use teststat::LikelihoodRatio;
