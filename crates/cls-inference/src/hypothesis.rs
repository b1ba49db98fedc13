//! Composite Poisson hypothesis over independent bins and its cache of
//! test-statistic samples.

use crate::strategy::{Fluctuator, Prior};
use crate::teststat::{LikelihoodRatio, check_yields};
use cls_core::{Error, Result};
use rand::RngCore;
use rand_distr::{Distribution, Poisson};
use std::sync::Arc;

/// Below this many cached samples tail probabilities are flagged as coarse.
const MIN_OCCUPANCY: usize = 100;

/// One hypothesis (null or alternative): per-bin expected yields, optional
/// fluctuator and prior, and the ascending cache of generated test statistics.
#[derive(Debug, Clone)]
pub struct ClsHypothesis {
    label: String,
    expected: Vec<f64>,
    fluctuator: Option<Arc<Fluctuator>>,
    prior: Arc<Prior>,
    /// Ascending test-statistic samples.
    samples: Vec<f64>,
    /// Prior weight of each sample, aligned with `samples`.
    weights: Vec<f64>,
    /// Running sum of `weights`.
    cumulative: Vec<f64>,
    weighted: bool,
}

/// Draw from `Poisson(mean)`; a non-positive mean yields 0.
pub(crate) fn sample_poisson(mean: f64, rng: &mut dyn RngCore) -> Result<f64> {
    if mean <= 0.0 || mean.is_nan() {
        return Ok(0.0);
    }
    let pois = Poisson::new(mean).map_err(|e| Error::Domain(format!("poisson mean {mean}: {e}")))?;
    Ok(pois.sample(rng))
}

/// Linearly interpolated `p`-quantile of an ascending slice.
fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 1.0 {
        return sorted[n - 1];
    }
    let idx = p * ((n - 1) as f64);
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let w = idx - (lo as f64);
    let (a, b) = (sorted[lo], sorted[hi]);
    if a == b {
        return a;
    }
    if !a.is_finite() || !b.is_finite() {
        // No interpolation towards an infinite neighbour: nearer order statistic.
        return if w < 0.5 { a } else { b };
    }
    a + w * (b - a)
}

impl ClsHypothesis {
    /// Hypothesis with the given per-bin expectation and no nuisances.
    pub fn new(label: impl Into<String>, expected: Vec<f64>) -> Result<Self> {
        let label = label.into();
        check_yields(&label, &expected)?;
        Ok(Self {
            label,
            expected,
            fluctuator: None,
            prior: Arc::new(Prior::Uniform),
            samples: Vec::new(),
            weights: Vec::new(),
            cumulative: Vec::new(),
            weighted: false,
        })
    }

    /// Builder-style [`set_fluctuator`](Self::set_fluctuator).
    pub fn with_fluctuator(mut self, fluctuator: Arc<Fluctuator>) -> Result<Self> {
        self.set_fluctuator(Some(fluctuator))?;
        Ok(self)
    }

    /// Builder-style [`set_prior`](Self::set_prior).
    pub fn with_prior(mut self, prior: Arc<Prior>) -> Result<Self> {
        self.set_prior(prior)?;
        Ok(self)
    }

    /// Install or remove the fluctuator.
    pub fn set_fluctuator(&mut self, fluctuator: Option<Arc<Fluctuator>>) -> Result<()> {
        if let Some(n) = fluctuator.as_ref().and_then(|f| f.n_bins()) {
            if n != self.n_bins() {
                return Err(Error::dimension("fluctuator bins", self.n_bins(), n));
            }
        }
        self.fluctuator = fluctuator;
        Ok(())
    }

    /// Install the prior.
    pub fn set_prior(&mut self, prior: Arc<Prior>) -> Result<()> {
        if let Some(n) = prior.n_bins() {
            if n != self.n_bins() {
                return Err(Error::dimension("prior bins", self.n_bins(), n));
            }
        }
        self.prior = prior;
        Ok(())
    }

    /// Name used in log messages and errors.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Per-bin expected yields.
    pub fn expected(&self) -> &[f64] {
        &self.expected
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.expected.len()
    }

    /// Installed fluctuator, if any.
    pub fn fluctuator(&self) -> Option<&Arc<Fluctuator>> {
        self.fluctuator.as_ref()
    }

    /// Installed prior.
    pub fn prior(&self) -> &Arc<Prior> {
        &self.prior
    }

    /// Draw one pseudo-experiment: per-bin counts and its prior weight.
    pub fn pseudo_experiment(&self, rng: &mut dyn RngCore) -> Result<(Vec<f64>, f64)> {
        let mut counts = Vec::with_capacity(self.n_bins());
        let mut weight = 1.0;
        for (bin, &e) in self.expected.iter().enumerate() {
            let m = match &self.fluctuator {
                Some(f) => f.fluctuate(bin, e, rng),
                None => e,
            };
            counts.push(sample_poisson(m, rng)?);
            if !self.prior.is_uniform() {
                weight *= self.prior.evaluate(bin, e, m)?;
            }
        }
        Ok((counts, weight))
    }

    /// Generate `n` pseudo-experiments, evaluate `stat` on each and add them
    /// to the cache, which stays sorted ascending.
    pub fn generate(&mut self, n: usize, stat: &LikelihoodRatio, rng: &mut dyn RngCore) -> Result<()> {
        if stat.n_bins() != self.n_bins() {
            return Err(Error::dimension("test statistic bins", self.n_bins(), stat.n_bins()));
        }
        let mut pairs: Vec<(f64, f64)> =
            self.samples.iter().copied().zip(self.weights.iter().copied()).collect();
        pairs.reserve(n);
        for _ in 0..n {
            let (counts, w) = self.pseudo_experiment(rng)?;
            let t = stat.evaluate_unchecked(&counts);
            if t.is_nan() {
                return Err(Error::Domain(format!("{}: undefined test statistic for counts {counts:?}", self.label)));
            }
            pairs.push((t, w));
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        self.weighted = !self.prior.is_uniform() || self.weighted;
        self.samples = pairs.iter().map(|p| p.0).collect();
        self.weights = pairs.iter().map(|p| p.1).collect();
        let mut acc = 0.0;
        self.cumulative = self
            .weights
            .iter()
            .map(|w| {
                acc += w;
                acc
            })
            .collect();
        log::debug!("{}: {} samples cached", self.label, self.samples.len());
        Ok(())
    }

    /// Empty the cache.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.weights.clear();
        self.cumulative.clear();
        self.weighted = false;
    }

    /// Number of cached samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// `true` before any generation (or after [`clear`](Self::clear)).
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Cached samples, ascending.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Sample weights aligned with [`samples`](Self::samples).
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Sum of sample weights.
    pub fn total_weight(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    fn check_ready(&self) -> Result<f64> {
        if self.samples.is_empty() {
            return Err(Error::EmptyCache(self.label.clone()));
        }
        if self.samples.len() < MIN_OCCUPANCY {
            log::warn!(
                "{}: only {} samples cached; tail probabilities are coarse",
                self.label,
                self.samples.len()
            );
        }
        let total = self.total_weight();
        if total <= 0.0 {
            return Err(Error::Domain(format!("{}: all sample weights vanish", self.label)));
        }
        Ok(total)
    }

    /// Ascending `p`-quantile of the cached test statistic, `p ∈ (0, 1)`.
    pub fn test_stat_from_prob(&self, p: f64) -> Result<f64> {
        let total = self.check_ready()?;
        if !(p > 0.0 && p < 1.0) {
            return Err(Error::Domain(format!("probability must be in (0, 1), got {p}")));
        }
        if !self.weighted {
            return Ok(quantile_sorted(&self.samples, p));
        }
        // Weighted step quantile: first sample whose cumulative weight reaches p.
        let idx = self.cumulative.partition_point(|c| c / total < p);
        Ok(self.samples[idx.min(self.samples.len() - 1)])
    }

    /// Right-tail probability: (weighted) fraction of cached samples `>= t`.
    pub fn prob_from_test_stat(&self, t: f64) -> Result<f64> {
        if t.is_nan() {
            return Err(Error::Domain(format!("{}: tail probability of a NaN test statistic", self.label)));
        }
        let total = self.check_ready()?;
        let idx = self.samples.partition_point(|v| *v < t);
        if !self.weighted {
            let n = self.samples.len();
            return Ok((n - idx) as f64 / n as f64);
        }
        let below = if idx == 0 { 0.0 } else { self.cumulative[idx - 1] };
        Ok(((total - below) / total).clamp(0.0, 1.0))
    }
}
