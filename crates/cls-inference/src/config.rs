//! Scan configuration record.

use crate::strategy::{FluctuationDraw, Prior};
use crate::teststat::check_yields;
use cls_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prior selection as written in a configuration file.
///
/// JSON: `"uniform"` or `{ "gaussian": { "sigma": [..] } }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorConfig {
    /// Flat prior.
    #[default]
    Uniform,
    /// Gaussian prior with relative per-bin widths.
    Gaussian {
        /// Relative width per bin.
        sigma: Vec<f64>,
    },
}

impl PriorConfig {
    /// Build the runtime prior.
    pub fn build(&self) -> Result<Prior> {
        match self {
            PriorConfig::Uniform => Ok(Prior::Uniform),
            PriorConfig::Gaussian { sigma } => Prior::gaussian(sigma.clone()),
        }
    }
}

fn default_n_bins_hist() -> usize {
    50
}

fn default_true() -> bool {
    true
}

fn default_fluctuation_cl() -> f64 {
    0.6827
}

fn default_alpha() -> f64 {
    0.05
}

fn default_threads() -> usize {
    1
}

/// Everything a signal-strength scan needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Background expectation per bin.
    pub bkg_expected: Vec<f64>,
    /// Signal shape per bin; the alternative is `bkg + mu * sig`.
    pub sig_shape: Vec<f64>,
    /// Observed counts; enables observed CLs. An empty list means none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<Vec<u64>>,
    /// First scanned signal strength.
    pub mu_min: f64,
    /// Last scanned signal strength.
    pub mu_max: f64,
    /// Number of equally spaced points in `[mu_min, mu_max]`.
    pub n_points: usize,
    /// Pseudo-experiments per hypothesis and point.
    pub n_gen: usize,
    /// Bins of the snapshot histograms.
    #[serde(default = "default_n_bins_hist")]
    pub n_bins_hist: usize,
    /// Random seed; drawn (and logged) when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Install the asymmetric Poisson fluctuator on the alternative.
    #[serde(default = "default_true")]
    pub fluctuate: bool,
    /// Confidence level of the fluctuator's Poisson interval.
    #[serde(default = "default_fluctuation_cl")]
    pub fluctuation_cl: f64,
    /// Distribution of the fluctuator's skew variable.
    #[serde(default)]
    pub fluctuation_draw: FluctuationDraw,
    /// Prior applied to both hypotheses.
    #[serde(default)]
    pub prior: PriorConfig,
    /// CLs level for upper limits.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Worker threads for parallel scans (0 = all cores).
    #[serde(default = "default_threads")]
    pub threads: usize,
}

impl ScanConfig {
    /// Configuration with defaults for every optional field.
    pub fn new(
        bkg_expected: Vec<f64>,
        sig_shape: Vec<f64>,
        (mu_min, mu_max): (f64, f64),
        n_points: usize,
        n_gen: usize,
    ) -> Self {
        Self {
            bkg_expected,
            sig_shape,
            observation: None,
            mu_min,
            mu_max,
            n_points,
            n_gen,
            n_bins_hist: default_n_bins_hist(),
            seed: None,
            fluctuate: true,
            fluctuation_cl: default_fluctuation_cl(),
            fluctuation_draw: FluctuationDraw::default(),
            prior: PriorConfig::default(),
            alpha: default_alpha(),
            threads: default_threads(),
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: ScanConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.bkg_expected.len()
    }

    /// Observation, treating an empty list as absent.
    pub fn observation(&self) -> Option<&[u64]> {
        self.observation.as_deref().filter(|o| !o.is_empty())
    }

    /// Scanned signal strengths, ascending, endpoints included.
    pub fn mu_values(&self) -> Vec<f64> {
        if self.n_points <= 1 {
            return vec![self.mu_min; self.n_points];
        }
        let step = (self.mu_max - self.mu_min) / (self.n_points - 1) as f64;
        (0..self.n_points)
            .map(|i| if i + 1 == self.n_points { self.mu_max } else { self.mu_min + step * i as f64 })
            .collect()
    }

    /// Check every field before any work is done.
    pub fn validate(&self) -> Result<()> {
        let b = self.n_bins();
        if b == 0 {
            return Err(Error::Domain("bkg_expected must have at least one bin".into()));
        }
        check_yields("bkg_expected", &self.bkg_expected)?;
        if self.sig_shape.len() != b {
            return Err(Error::dimension("sig_shape bins", b, self.sig_shape.len()));
        }
        check_yields("sig_shape", &self.sig_shape)?;
        if !(self.mu_min.is_finite() && self.mu_max.is_finite()) {
            return Err(Error::Domain(format!(
                "mu range must be finite, got [{}, {}]",
                self.mu_min, self.mu_max
            )));
        }
        if self.mu_min > self.mu_max {
            return Err(Error::Domain(format!("mu_min ({}) > mu_max ({})", self.mu_min, self.mu_max)));
        }
        // The alternative is linear in mu: checking both ends covers the range.
        for mu in [self.mu_min, self.mu_max] {
            if let Some(i) =
                self.bkg_expected.iter().zip(&self.sig_shape).position(|(b, s)| b + mu * s < 0.0)
            {
                return Err(Error::Domain(format!("alternative yield in bin {i} is negative at mu = {mu}")));
            }
        }
        if self.n_points < 1 {
            return Err(Error::Domain("n_points must be >= 1".into()));
        }
        if self.n_gen < 1 {
            return Err(Error::Domain("n_gen must be >= 1".into()));
        }
        if self.n_bins_hist < 1 {
            return Err(Error::Domain("n_bins_hist must be >= 1".into()));
        }
        if let Some(obs) = self.observation() {
            if obs.len() != b {
                return Err(Error::dimension("observation bins", b, obs.len()));
            }
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(Error::Domain(format!("alpha must be in (0, 1), got {}", self.alpha)));
        }
        if !(self.fluctuation_cl > 0.0 && self.fluctuation_cl < 1.0) {
            return Err(Error::Domain(format!(
                "fluctuation_cl must be in (0, 1), got {}",
                self.fluctuation_cl
            )));
        }
        if let PriorConfig::Gaussian { sigma } = &self.prior {
            if sigma.len() != b {
                return Err(Error::dimension("prior sigma bins", b, sigma.len()));
            }
            self.prior.build()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> &'static str {
        r#"{
            "bkg_expected": [1.5, 1.0, 0.5],
            "sig_shape": [2.0, 4.0, 2.0],
            "mu_min": 0.0,
            "mu_max": 1.0,
            "n_points": 5,
            "n_gen": 1000
        }"#
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let c = ScanConfig::from_json(minimal()).unwrap();
        assert_eq!(c.n_bins_hist, 50);
        assert!(c.fluctuate);
        assert_eq!(c.seed, None);
        assert_eq!(c.prior, PriorConfig::Uniform);
        assert_eq!(c.fluctuation_draw, FluctuationDraw::Uniform);
        assert_eq!(c.alpha, 0.05);
        assert_eq!(c.threads, 1);
        assert_eq!(c.mu_values(), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn prior_and_draw_parse() {
        let text = r#"{
            "bkg_expected": [1.0, 2.0], "sig_shape": [1.0, 1.0],
            "mu_min": 0.0, "mu_max": 2.0, "n_points": 3, "n_gen": 10,
            "prior": { "gaussian": { "sigma": [0.1, 0.2] } },
            "fluctuation_draw": "gaussian", "observation": [], "seed": 7
        }"#;
        let c = ScanConfig::from_json(text).unwrap();
        assert_eq!(c.prior, PriorConfig::Gaussian { sigma: vec![0.1, 0.2] });
        assert_eq!(c.fluctuation_draw, FluctuationDraw::Gaussian);
        assert_eq!(c.observation(), None);
        assert_eq!(c.seed, Some(7));
    }

    #[test]
    fn validation_failures() {
        let base = ScanConfig::from_json(minimal()).unwrap();

        let mut c = base.clone();
        c.sig_shape.pop();
        assert!(matches!(c.validate(), Err(Error::DimensionMismatch { expected: 3, got: 2, .. })));

        let mut c = base.clone();
        c.bkg_expected[1] = -1.0;
        assert!(matches!(c.validate(), Err(Error::Domain(_))));

        let mut c = base.clone();
        c.mu_min = 2.0;
        assert!(matches!(c.validate(), Err(Error::Domain(_))));

        let mut c = base.clone();
        c.n_points = 0;
        assert!(matches!(c.validate(), Err(Error::Domain(_))));

        let mut c = base.clone();
        c.observation = Some(vec![1, 2]);
        assert!(matches!(c.validate(), Err(Error::DimensionMismatch { .. })));

        let mut c = base.clone();
        c.alpha = 1.0;
        assert!(c.validate().is_err());

        let mut c = base;
        c.mu_min = -1.0;
        assert!(matches!(c.validate(), Err(Error::Domain(_))));
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(ScanConfig::from_json("{ not json"), Err(Error::Json(_))));
    }
}
