use std::collections::BTreeMap;
use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use adhoc_dataset::composition;
use adhoc_dataset::subject::{SubjectSet, cap_population};

fn striped(count: u64, step: u64, offset: u64) -> SubjectSet {
    (0..count).filter(|i| i % step == offset).collect()
}

fn compose_benchmark(c: &mut Criterion) {
    let universe: SubjectSet = (0..1_000_000).collect();
    let mut results = BTreeMap::new();
    results.insert(1, striped(1_000_000, 2, 0));
    results.insert(2, striped(1_000_000, 3, 0));
    results.insert(3, striped(1_000_000, 5, 1));

    c.bench_function("compose default", |b| {
        b.iter(|| composition::evaluate(black_box("1 AND 2 AND 3"), &results, &universe))
    });
    c.bench_function("compose with negation", |b| {
        b.iter(|| composition::evaluate(black_box("(1 OR 2) AND NOT 3"), &results, &universe))
    });
    c.bench_function("preview cap", |b| b.iter(|| cap_population(black_box(&universe), 10)));
}

criterion_group!(benches, compose_benchmark);
criterion_main!(benches);
