use cls_inference::{ClsFactory, ClsHypothesis, MuScanDriver, ScanConfig};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn load_config() -> ScanConfig {
    let json = include_str!("../../../tests/fixtures/scan_config.json");
    ScanConfig::from_json(json).unwrap()
}

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("factory_generate");
    for n in [1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::new("e3", n), &n, |b, &n| {
            b.iter(|| {
                let mut f = ClsFactory::new(
                    ClsHypothesis::new("null", vec![1.5, 1.0, 0.5]).unwrap(),
                    ClsHypothesis::new("alt", vec![3.5, 5.0, 2.5]).unwrap(),
                    7,
                )
                .unwrap();
                f.generate(black_box(n)).unwrap();
                black_box(f.expected_band().unwrap())
            })
        });
    }
    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("mu_scan");
    group.sample_size(10);
    for threads in [1usize, 0] {
        let mut config = load_config();
        config.threads = threads;
        let driver = MuScanDriver::new(config).unwrap();
        group.bench_with_input(BenchmarkId::new("parallel", threads), &driver, |b, d| {
            b.iter(|| black_box(d.run_parallel().unwrap()))
        });
    }
    let mut driver = MuScanDriver::new(load_config()).unwrap();
    group.bench_function("sequential", |b| b.iter(|| black_box(driver.run().unwrap())));
    group.finish();
}

criterion_group!(benches, bench_generate, bench_scan);
criterion_main!(benches);
