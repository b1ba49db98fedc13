//! Property tests for cut masks, derivation, compile idempotence and text round-trips.

use cls_table::{Column, ColumnKind, ColumnTable, CompiledExpr, DeriveMode, read_text, write_text};
use proptest::prelude::*;
use std::io::Cursor;

const CUTS: [&str; 6] = [
    "a > b",
    "a > 0 and b <= 10",
    "not (a < -5) || b == 3",
    "(a > 0) ^ (b > 0)",
    "-100 < a * 2 < 100",
    "fabs(a - b) > 1 or min(a, b) > 50",
];

const DERIVED: [&str; 4] = ["a * b + 1", "sqrt(a * a + b * b)", "max(a, b, 0) - min(a, b)", "a / (fabs(b) + 1)"];

fn table_strategy() -> impl Strategy<Value = ColumnTable> {
    (1usize..64).prop_flat_map(|n| {
        (prop::collection::vec(-200.0f64..200.0, n), prop::collection::vec(-20i64..20, n)).prop_map(
            |(a, b)| {
                ColumnTable::from_columns([("a", Column::from(a)), ("b", Column::from(b))]).unwrap()
            },
        )
    })
}

proptest! {
    #[test]
    fn cut_mask_length_and_support(t in table_strategy(), k in 0usize..CUTS.len()) {
        let mask = t.cut_mask(CUTS[k]).unwrap();
        prop_assert_eq!(mask.len(), t.n_rows());

        let idx = t.cut_indices(CUTS[k]).unwrap();
        prop_assert!(idx.windows(2).all(|w| w[0] < w[1]));
        let support: Vec<usize> = mask.iter().enumerate().filter(|(_, m)| **m).map(|(i, _)| i).collect();
        prop_assert_eq!(idx, support);
    }

    #[test]
    fn derived_column_matches_row_evaluation(t in table_strategy(), k in 0usize..DERIVED.len()) {
        let mut t = t;
        t.derive("d", DERIVED[k], DeriveMode::Create).unwrap();
        let e = CompiledExpr::compile(DERIVED[k]).unwrap();
        let d = t.values("d").unwrap();
        for i in 0..t.n_rows() {
            let row: Vec<f64> = e
                .required_columns
                .iter()
                .map(|c| t.values(c).unwrap()[i])
                .collect();
            let want = e.eval_row(&row);
            prop_assert!(d[i] == want || (d[i].is_nan() && want.is_nan()));
        }
    }

    #[test]
    fn compiling_twice_is_idempotent(t in table_strategy(), k in 0usize..CUTS.len()) {
        let first = t.eval(CUTS[k]).unwrap();
        let second = t.eval(CUTS[k]).unwrap();
        prop_assert_eq!(first, second);

        let rewritten = CompiledExpr::compile(CUTS[k]).unwrap().rewritten();
        prop_assert_eq!(t.eval(&rewritten).unwrap(), t.eval(CUTS[k]).unwrap());
    }

    #[test]
    fn text_round_trip(t in table_strategy()) {
        let mut buf = Vec::new();
        write_text(&t, &mut buf).unwrap();
        let back = read_text(Cursor::new(buf), None).unwrap();
        prop_assert_eq!(back.column("b").unwrap().kind(), ColumnKind::Integer);
        prop_assert_eq!(back.values("b").unwrap(), t.values("b").unwrap());
        for (x, y) in t.values("a").unwrap().iter().zip(back.values("a").unwrap()) {
            prop_assert!((x - y).abs() <= 1e-12 * x.abs().max(1.0));
        }
    }
}
