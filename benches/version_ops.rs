//! Benchmarks for version ordering and identity parsing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use modlink::identity::ModuleIdentity;
use modlink::version::VersionKey;

fn bench_version_split(c: &mut Criterion) {
    c.bench_function("version_split", |bench| {
        bench.iter(|| black_box(VersionKey::new(black_box("10.4.2-rc7_build.20240101"))))
    });
}

fn bench_version_compare(c: &mut Criterion) {
    let a = VersionKey::new("1.2.0.0.1");
    let b = VersionKey::new("1.2-SNAPSHOT");

    c.bench_function("version_compare", |bench| {
        bench.iter(|| black_box(black_box(&a).cmp(black_box(&b))))
    });
}

fn bench_version_sort(c: &mut Criterion) {
    let versions: Vec<VersionKey> = (0..200)
        .map(|i| VersionKey::new(format!("{}.{}.{}-rc{}", i % 7, i % 13, i % 3, i % 5)))
        .collect();

    c.bench_function("version_sort_200", |bench| {
        bench.iter(|| {
            let mut sorted = versions.clone();
            sorted.sort();
            black_box(sorted)
        })
    });
}

fn bench_identity_parse(c: &mut Criterion) {
    c.bench_function("identity_parse", |bench| {
        bench.iter(|| black_box(ModuleIdentity::parse(black_box("my-plugin-lib-v12.4")).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_version_split,
    bench_version_compare,
    bench_version_sort,
    bench_identity_parse
);
criterion_main!(benches);
