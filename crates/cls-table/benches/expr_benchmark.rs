//! Expression compile and column-wise evaluation benchmarks.

use cls_table::{ColumnTable, CompiledExpr};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

const CUT: &str = "njet >= 4 && abs(eta) < 2.5 && sqrt(px*px + py*py) > 25";

fn make_table(n: usize) -> ColumnTable {
    let col = |scale: f64, shift: f64| -> Vec<f64> {
        (0..n).map(|i| ((i as f64 * scale).sin() + shift) * 40.0).collect()
    };
    let njet: Vec<i64> = (0..n as i64).map(|i| i % 9).collect();
    let mut t = ColumnTable::new();
    t.add("njet", njet).unwrap();
    t.add("eta", (0..n).map(|i| ((i as f64) * 0.013).cos() * 3.0).collect::<Vec<_>>()).unwrap();
    t.add("px", col(0.71, 0.2)).unwrap();
    t.add("py", col(0.29, -0.1)).unwrap();
    t
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_cut", |b| b.iter(|| CompiledExpr::compile(black_box(CUT)).unwrap()));
}

fn bench_eval(c: &mut Criterion) {
    let mut group = c.benchmark_group("cut_mask");
    let expr = CompiledExpr::compile(CUT).unwrap();
    for n in [1_000usize, 100_000] {
        let t = make_table(n);
        group.bench_with_input(BenchmarkId::new("columnwise", n), &t, |b, t| {
            b.iter(|| t.evaluate(black_box(&expr)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("rowwise", n), &t, |b, t| {
            let cols: Vec<&[f64]> =
                expr.required_columns.iter().map(|c| t.values(c).unwrap()).collect();
            b.iter(|| {
                let mut row = vec![0.0; cols.len()];
                (0..t.n_rows())
                    .filter(|&i| {
                        for (slot, c) in row.iter_mut().zip(&cols) {
                            *slot = c[i];
                        }
                        expr.eval_row(&row) != 0.0
                    })
                    .count()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_eval);
criterion_main!(benches);
