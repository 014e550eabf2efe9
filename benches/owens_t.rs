use criterion::{black_box, criterion_group, criterion_main, Criterion};

use graphquant::math::owens_t;

fn bench_owens_t(c: &mut Criterion) {
    let mut group = c.benchmark_group("owens_t");

    // One point per dispatch regime: series, asymptotic, quadrature.
    let points = [
        (0.05, 0.5),
        (2.0, 0.5),
        (5.0, 0.99),
        (0.5, 10.0),
    ];

    group.bench_function("dispatch_grid", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for &(h, a) in &points {
                acc += owens_t(black_box(h), black_box(a));
            }
            acc
        })
    });

    group.finish();
}

criterion_group!(benches, bench_owens_t);
criterion_main!(benches);
