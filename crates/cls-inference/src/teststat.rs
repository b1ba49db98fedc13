//! Poisson log-likelihood-ratio test statistic.

use cls_core::{Error, Result};

/// `t(x) = -2 Σᵢ [ xᵢ ln(numᵢ / denᵢ) - numᵢ + denᵢ ]`, i.e. `-2 ln(L_num / L_den)`
/// for independent Poisson bins.
///
/// Zero expectations are guarded per bin:
/// - `numᵢ == denᵢ` contributes nothing;
/// - `xᵢ == 0` drops the log term;
/// - `numᵢ == 0 < xᵢ` makes `t = +inf` (the numerator cannot produce the count);
/// - `denᵢ == 0 < xᵢ` makes `t = -inf`.
///
/// A count vector impossible under both hypotheses (one bin of each kind)
/// leaves the ratio undefined. The infinite bins then cancel and the finite
/// bins alone decide, so every pseudo-experiment keeps a value.
#[derive(Debug, Clone, PartialEq)]
pub struct LikelihoodRatio {
    numerator: Vec<f64>,
    denominator: Vec<f64>,
}

pub(crate) fn check_yields(what: &str, yields: &[f64]) -> Result<()> {
    if let Some((i, y)) = yields.iter().enumerate().find(|(_, y)| !y.is_finite() || **y < 0.0) {
        return Err(Error::Domain(format!("{what}: expected yield in bin {i} must be finite and >= 0, got {y}")));
    }
    Ok(())
}

impl LikelihoodRatio {
    /// Ratio of the `numerator` over the `denominator` expectation.
    pub fn new(numerator: &[f64], denominator: &[f64]) -> Result<Self> {
        if numerator.len() != denominator.len() {
            return Err(Error::dimension("likelihood ratio bins", numerator.len(), denominator.len()));
        }
        check_yields("numerator", numerator)?;
        check_yields("denominator", denominator)?;
        Ok(Self { numerator: numerator.to_vec(), denominator: denominator.to_vec() })
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.numerator.len()
    }

    /// Numerator expectation.
    pub fn numerator(&self) -> &[f64] {
        &self.numerator
    }

    /// Denominator expectation.
    pub fn denominator(&self) -> &[f64] {
        &self.denominator
    }

    /// Evaluate on a count vector of length [`n_bins`](Self::n_bins).
    pub fn evaluate(&self, counts: &[f64]) -> Result<f64> {
        if counts.len() != self.n_bins() {
            return Err(Error::dimension("observation bins", self.n_bins(), counts.len()));
        }
        Ok(self.evaluate_unchecked(counts))
    }

    /// Evaluate on integer counts.
    pub fn evaluate_counts(&self, counts: &[u64]) -> Result<f64> {
        let counts: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
        self.evaluate(&counts)
    }

    pub(crate) fn evaluate_unchecked(&self, counts: &[f64]) -> f64 {
        let mut finite = 0.0;
        let (mut pos_inf, mut neg_inf) = (false, false);
        for (&x, (&num, &den)) in counts.iter().zip(self.numerator.iter().zip(&self.denominator)) {
            let term = bin_term(x, num, den);
            if term == f64::INFINITY {
                pos_inf = true;
            } else if term == f64::NEG_INFINITY {
                neg_inf = true;
            } else {
                finite += term;
            }
        }
        let sum = match (pos_inf, neg_inf) {
            (true, false) => f64::INFINITY,
            (false, true) => f64::NEG_INFINITY,
            _ => finite,
        };
        -2.0 * sum
    }
}

#[inline]
fn bin_term(x: f64, num: f64, den: f64) -> f64 {
    if num == den {
        return 0.0;
    }
    let log_term = if x == 0.0 {
        0.0
    } else if num == 0.0 {
        f64::NEG_INFINITY
    } else if den == 0.0 {
        f64::INFINITY
    } else {
        x * (num / den).ln()
    };
    log_term - num + den
}
