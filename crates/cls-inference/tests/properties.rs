//! Property tests for the hypothesis cache and CLs results.

use cls_inference::{ClsFactory, ClsHypothesis, LikelihoodRatio};
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Per-bin expectations, empty bins included.
fn yields(n_bins: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(prop_oneof![1 => Just(0.0), 3 => 0.05f64..8.0], n_bins)
}

fn hypotheses() -> impl Strategy<Value = (Vec<f64>, Vec<f64>)> {
    (1usize..5).prop_flat_map(|b| (yields(b), yields(b)))
}

fn generated_factory(null: Vec<f64>, alt: Vec<f64>, seed: u64, n: usize) -> ClsFactory {
    let mut f = ClsFactory::new(
        ClsHypothesis::new("null", null).unwrap(),
        ClsHypothesis::new("alt", alt).unwrap(),
        seed,
    )
    .unwrap();
    f.generate(n).unwrap();
    f
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 48, .. ProptestConfig::default() })]

    #[test]
    fn generate_fills_sorted_cache((null, alt) in hypotheses(), n in 1usize..400, seed in any::<u64>()) {
        let stat = LikelihoodRatio::new(&alt, &null).unwrap();
        let mut h = ClsHypothesis::new("null", null).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        h.generate(n, &stat, &mut rng).unwrap();
        prop_assert_eq!(h.len(), n);
        prop_assert!(h.samples().windows(2).all(|w| w[0] <= w[1]));
        for p in [0.05, 0.317, 0.5, 0.683, 0.954] {
            prop_assert!(!h.test_stat_from_prob(p).unwrap().is_nan());
        }
    }

    #[test]
    fn cls_results_are_probabilities(
        (null, alt) in hypotheses(),
        seed in any::<u64>(),
        counts in prop::collection::vec(0u64..15, 4),
    ) {
        let b = null.len();
        let f = generated_factory(null, alt, seed, 300);
        let r = f.calculate(&counts[..b]).unwrap();
        prop_assert!((0.0..=1.0).contains(&r.clb));
        prop_assert!((0.0..=1.0).contains(&r.clsb));
        prop_assert!((0.0..=1.0).contains(&r.cls));
        if r.clb == 0.0 {
            prop_assert_eq!(r.cls, 1.0);
        }
        prop_assert_eq!(f.null().len(), 300);
        prop_assert_eq!(f.alternative().len(), 300);
        for q in f.expected_band().unwrap() {
            prop_assert!(!q.test_statistic.is_nan());
            prop_assert!((0.0..=1.0).contains(&q.cls));
        }
    }

    #[test]
    fn significance_falls_as_clb_rises(
        (null, alt) in hypotheses(),
        seed in any::<u64>(),
        a in prop::collection::vec(0u64..12, 4),
        b in prop::collection::vec(0u64..12, 4),
    ) {
        let n_bins = null.len();
        let f = generated_factory(null, alt, seed, 300);
        let ra = f.calculate(&a[..n_bins]).unwrap();
        let rb = f.calculate(&b[..n_bins]).unwrap();
        let (lo, hi) = if ra.clb <= rb.clb { (ra, rb) } else { (rb, ra) };
        prop_assert!(lo.significance >= hi.significance, "clb {} -> {}, z {} -> {}", lo.clb, hi.clb, lo.significance, hi.significance);
    }
}
