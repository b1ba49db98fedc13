//! Paired null/alternative generation and CLs evaluation.

use crate::hypothesis::ClsHypothesis;
use crate::teststat::LikelihoodRatio;
use cls_core::types::BAND_QUANTILES;
use cls_core::{ClsResult, Error, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Owns the null (background-only) and alternative (signal + background)
/// hypotheses and the random source that feeds both.
///
/// The test statistic is `t = -2 ln(L_alt / L_null)`: large values are
/// background-like, so CLb and CLs+b are right-tail probabilities of `t`
/// under the null and the alternative.
#[derive(Debug, Clone)]
pub struct ClsFactory {
    null: ClsHypothesis,
    alt: ClsHypothesis,
    stat: LikelihoodRatio,
    seed: u64,
    rng: StdRng,
}

impl ClsFactory {
    /// Pair two hypotheses over the same bins.
    pub fn new(null: ClsHypothesis, alt: ClsHypothesis, seed: u64) -> Result<Self> {
        if null.n_bins() != alt.n_bins() {
            return Err(Error::dimension("alternative bins", null.n_bins(), alt.n_bins()));
        }
        let stat = LikelihoodRatio::new(alt.expected(), null.expected())?;
        Ok(Self { null, alt, stat, seed, rng: StdRng::seed_from_u64(seed) })
    }

    /// Null hypothesis.
    pub fn null(&self) -> &ClsHypothesis {
        &self.null
    }

    /// Alternative hypothesis.
    pub fn alternative(&self) -> &ClsHypothesis {
        &self.alt
    }

    /// Test statistic shared by both hypotheses.
    pub fn test_statistic(&self) -> &LikelihoodRatio {
        &self.stat
    }

    /// Seed of the current random stream.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Restart the random stream from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Swap in a new alternative.
    ///
    /// Both caches are cleared: null samples were evaluated against the
    /// previous alternative's expectation, and samples already held by `alt`
    /// against some other statistic.
    pub fn replace_alternative(&mut self, mut alt: ClsHypothesis) -> Result<()> {
        if alt.n_bins() != self.null.n_bins() {
            return Err(Error::dimension("alternative bins", self.null.n_bins(), alt.n_bins()));
        }
        self.stat = LikelihoodRatio::new(alt.expected(), self.null.expected())?;
        alt.clear();
        self.alt = alt;
        self.null.clear();
        Ok(())
    }

    /// Generate `n` pseudo-experiments under the null, then `n` under the alternative.
    pub fn generate(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Err(Error::Domain("number of pseudo-experiments must be >= 1".into()));
        }
        self.null.generate(n, &self.stat, &mut self.rng)?;
        self.alt.generate(n, &self.stat, &mut self.rng)?;
        log::debug!("generated {} pseudo-experiments per hypothesis (seed {})", n, self.seed);
        Ok(())
    }

    /// Test statistic of an observed count vector.
    pub fn observed_test_stat(&self, observation: &[u64]) -> Result<f64> {
        self.stat.evaluate_counts(observation)
    }

    /// CLs of an observed count vector.
    pub fn calculate(&self, observation: &[u64]) -> Result<ClsResult> {
        self.calculate_ts(self.observed_test_stat(observation)?)
    }

    /// CLs at a raw test-statistic value.
    pub fn calculate_ts(&self, ts: f64) -> Result<ClsResult> {
        let clb = self.null.prob_from_test_stat(ts)?;
        let clsb = self.alt.prob_from_test_stat(ts)?;
        let significance = cls_prob::normal::significance(clb)?;
        Ok(ClsResult::new(ts, clb, clsb, significance))
    }

    /// CLs at the `p`-quantile of the null test-statistic distribution.
    pub fn calculate_at_null_quantile(&self, p: f64) -> Result<ClsResult> {
        self.calculate_ts(self.null.test_stat_from_prob(p)?)
    }

    /// Expected results at the background quantiles
    /// `[0.5, 0.317, 0.683, 0.046, 0.954]`.
    pub fn expected_band(&self) -> Result<[ClsResult; 5]> {
        let mut out = [ClsResult::new(0.0, 1.0, 1.0, f64::NEG_INFINITY); 5];
        for (slot, &p) in out.iter_mut().zip(BAND_QUANTILES.iter()) {
            *slot = self.calculate_at_null_quantile(p)?;
        }
        Ok(out)
    }
}
