//! Signal-strength scan: one CLs evaluation per μ point.

use crate::config::ScanConfig;
use crate::factory::ClsFactory;
use crate::hypothesis::ClsHypothesis;
use crate::limits::UpperLimits;
use crate::strategy::{Fluctuator, Prior};
use cls_core::{ClsResult, Result, ScanPoint};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Seed of scan point `index`.
#[inline]
pub fn point_seed(seed: u64, index: usize) -> u64 {
    seed.wrapping_add(index as u64)
}

/// Weighted histogram of a test-statistic cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsHistogram {
    /// `n + 1` ascending bin edges.
    pub edges: Vec<f64>,
    /// Summed weight per bin.
    pub counts: Vec<f64>,
    /// Weight of `-inf` samples.
    pub underflow: f64,
    /// Weight of `+inf` samples.
    pub overflow: f64,
}

impl TsHistogram {
    /// Empty histogram of `n_bins` equal bins over `[lo, hi]`.
    pub fn new(lo: f64, hi: f64, n_bins: usize) -> Self {
        let n_bins = n_bins.max(1);
        let width = (hi - lo) / n_bins as f64;
        let edges = (0..=n_bins).map(|i| if i == n_bins { hi } else { lo + width * i as f64 }).collect();
        Self { edges, counts: vec![0.0; n_bins], underflow: 0.0, overflow: 0.0 }
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    /// Add `weight` at `x`. The upper edge belongs to the last bin; NaN is ignored.
    pub fn fill(&mut self, x: f64, weight: f64) {
        if x.is_nan() {
            return;
        }
        let n = self.n_bins();
        let (lo, hi) = (self.edges[0], self.edges[n]);
        if x < lo {
            self.underflow += weight;
        } else if x > hi {
            self.overflow += weight;
        } else {
            let idx = if hi > lo { ((x - lo) / (hi - lo) * n as f64) as usize } else { 0 };
            self.counts[idx.min(n - 1)] += weight;
        }
    }

    /// Total weight, under- and overflow included.
    pub fn total(&self) -> f64 {
        self.counts.iter().sum::<f64>() + self.underflow + self.overflow
    }
}

/// Smallest and largest finite value over both caches; a degenerate range is
/// widened by 0.5 on each side.
fn joint_range(a: &[f64], b: &[f64]) -> (f64, f64) {
    let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
    for &x in a.iter().chain(b).filter(|x| x.is_finite()) {
        lo = lo.min(x);
        hi = hi.max(x);
    }
    if lo > hi {
        return (-0.5, 0.5);
    }
    if lo == hi {
        return (lo - 0.5, hi + 0.5);
    }
    (lo, hi)
}

fn histogram(h: &ClsHypothesis, lo: f64, hi: f64, n_bins: usize) -> TsHistogram {
    let mut out = TsHistogram::new(lo, hi, n_bins);
    for (&t, &w) in h.samples().iter().zip(h.weights()) {
        out.fill(t, w);
    }
    out
}

/// Test-statistic distributions of one scan point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Signal strength.
    pub mu: f64,
    /// Null (background-only) distribution.
    pub null: TsHistogram,
    /// Alternative (signal + background) distribution.
    pub alt: TsHistogram,
    /// Test statistic of the observation, if one is configured.
    pub observed_ts: Option<f64>,
}

impl Snapshot {
    fn from_factory(mu: f64, factory: &ClsFactory, n_bins: usize, observed_ts: Option<f64>) -> Self {
        let (lo, hi) = joint_range(factory.null().samples(), factory.alternative().samples());
        Self {
            mu,
            null: histogram(factory.null(), lo, hi, n_bins),
            alt: histogram(factory.alternative(), lo, hi, n_bins),
            observed_ts,
        }
    }
}

/// CLs at a single signal strength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypotestResult {
    /// Signal strength.
    pub mu: f64,
    /// Result for the configured observation.
    pub observed: Option<ClsResult>,
    /// Results at the background quantiles `[0.5, 0.317, 0.683, 0.046, 0.954]`.
    pub expected: [ClsResult; 5],
}

/// Output of a scan, ascending in μ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// One point per completed μ step.
    pub points: Vec<ScanPoint>,
    /// Test-statistic histograms aligned with `points`.
    pub snapshots: Vec<Snapshot>,
    /// Base seed; point `i` used `point_seed(seed, i)`.
    pub seed: u64,
    /// Upper limits, when at least two points completed.
    pub limits: Option<UpperLimits>,
}

impl ScanResult {
    fn assemble(mut rows: Vec<(ScanPoint, Snapshot)>, seed: u64, alpha: f64) -> Result<Self> {
        rows.sort_by(|a, b| a.0.mu.total_cmp(&b.0.mu));
        let (points, snapshots): (Vec<_>, Vec<_>) = rows.into_iter().unzip();
        let limits = if points.len() >= 2 { Some(UpperLimits::from_points(&points, alpha)?) } else { None };
        Ok(Self { points, snapshots, seed, limits })
    }

    /// Median expected CLs per point.
    pub fn cls_median(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.cls_median).collect()
    }
}

/// Work done at one μ point, shared by the sequential and parallel paths.
struct PointRunner<'a> {
    config: &'a ScanConfig,
    prior: &'a Arc<Prior>,
    seed: u64,
}

impl PointRunner<'_> {
    fn alternative(&self, mu: f64) -> Result<ClsHypothesis> {
        let expected: Vec<f64> = self
            .config
            .bkg_expected
            .iter()
            .zip(&self.config.sig_shape)
            .map(|(b, s)| (b + mu * s).max(0.0))
            .collect();
        let mut alt = ClsHypothesis::new(format!("alt(mu={mu})"), expected)?.with_prior(self.prior.clone())?;
        if self.config.fluctuate {
            let f = Fluctuator::from_expected(alt.expected(), self.config.fluctuation_cl, self.config.fluctuation_draw)?;
            alt.set_fluctuator(Some(Arc::new(f)))?;
        }
        Ok(alt)
    }

    fn generate(&self, factory: &mut ClsFactory, index: usize, mu: f64) -> Result<()> {
        factory.replace_alternative(self.alternative(mu)?)?;
        factory.reseed(point_seed(self.seed, index));
        factory.generate(self.config.n_gen)
    }

    fn hypotest(&self, factory: &mut ClsFactory, index: usize, mu: f64) -> Result<HypotestResult> {
        self.generate(factory, index, mu)?;
        let expected = factory.expected_band()?;
        let observed = match self.config.observation() {
            Some(obs) => Some(factory.calculate(obs)?),
            None => None,
        };
        Ok(HypotestResult { mu, observed, expected })
    }

    fn point(&self, factory: &mut ClsFactory, index: usize, mu: f64) -> Result<(ScanPoint, Snapshot)> {
        let r = self.hypotest(factory, index, mu)?;
        let point = ScanPoint::from_band(mu, r.expected.map(|e| e.cls), r.observed.map(|o| o.cls));
        let snapshot =
            Snapshot::from_factory(mu, factory, self.config.n_bins_hist, r.observed.map(|o| o.test_statistic));
        log::debug!("mu = {mu}: median CLs {:.4}", point.cls_median);
        Ok((point, snapshot))
    }
}

/// Drives a [`ClsFactory`] over the μ grid of a [`ScanConfig`].
#[derive(Debug, Clone)]
pub struct MuScanDriver {
    config: ScanConfig,
    prior: Arc<Prior>,
    seed: u64,
    factory: ClsFactory,
}

impl MuScanDriver {
    /// Validate `config` and set up the factory.
    ///
    /// Without a configured seed a fresh one is drawn and logged so the run
    /// can be repeated.
    pub fn new(config: ScanConfig) -> Result<Self> {
        config.validate()?;
        let seed = match config.seed {
            Some(seed) => seed,
            None => {
                let seed = rand::random::<u64>();
                log::info!("no seed configured; using seed {seed}");
                seed
            }
        };
        let prior = Arc::new(config.prior.build()?);
        let null = ClsHypothesis::new("null", config.bkg_expected.clone())?.with_prior(prior.clone())?;
        let alt = ClsHypothesis::new("alt", config.bkg_expected.clone())?.with_prior(prior.clone())?;
        let factory = ClsFactory::new(null, alt, seed)?;
        Ok(Self { config, prior, seed, factory })
    }

    /// Scan configuration.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Base seed of the scan.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Factory in its state after the last evaluated point.
    pub fn factory(&self) -> &ClsFactory {
        &self.factory
    }

    fn runner(&self) -> PointRunner<'_> {
        PointRunner { config: &self.config, prior: &self.prior, seed: self.seed }
    }

    /// [`runner`](Self::runner) together with the factory it drives.
    fn runner_mut(&mut self) -> (PointRunner<'_>, &mut ClsFactory) {
        let Self { config, prior, seed, factory } = self;
        (PointRunner { config, prior, seed: *seed }, factory)
    }

    /// CLs at a single μ, seeded as scan point 0.
    pub fn hypotest(&mut self, mu: f64) -> Result<HypotestResult> {
        let (runner, factory) = self.runner_mut();
        runner.hypotest(factory, 0, mu)
    }

    /// Run every point on the calling thread.
    pub fn run(&mut self) -> Result<ScanResult> {
        self.run_with_cancel(&AtomicBool::new(false))
    }

    /// Like [`run`](Self::run), checking `cancel` before each point. A
    /// cancelled scan returns the points completed so far.
    pub fn run_with_cancel(&mut self, cancel: &AtomicBool) -> Result<ScanResult> {
        let start = Instant::now();
        let mus = self.config.mu_values();
        let (runner, factory) = self.runner_mut();
        let mut rows = Vec::with_capacity(mus.len());
        for (i, &mu) in mus.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                log::info!("scan cancelled after {i} of {} points", mus.len());
                break;
            }
            rows.push(runner.point(factory, i, mu)?);
        }
        log::info!("scanned {} points in {:.3}s", rows.len(), start.elapsed().as_secs_f64());
        ScanResult::assemble(rows, self.seed, self.config.alpha)
    }

    /// Run points on a rayon pool of `config.threads` workers (0 = all cores).
    ///
    /// Every point works on its own clone of the factory with the same seed
    /// it would get sequentially, so the result equals [`run`](Self::run).
    pub fn run_parallel(&self) -> Result<ScanResult> {
        let start = Instant::now();
        let mus = self.config.mu_values();
        let runner = self.runner();
        let run_points = || -> Result<Vec<(ScanPoint, Snapshot)>> {
            mus.par_iter()
                .enumerate()
                .map(|(i, &mu)| {
                    let mut factory = self.factory.clone();
                    runner.point(&mut factory, i, mu)
                })
                .collect()
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()
            .map_err(|e| std::io::Error::other(format!("failed to create thread pool: {e}")))?;
        let rows = pool.install(run_points)?;
        log::info!(
            "scanned {} points on {} threads in {:.3}s",
            rows.len(),
            pool.current_num_threads(),
            start.elapsed().as_secs_f64()
        );
        ScanResult::assemble(rows, self.seed, self.config.alpha)
    }
}
