/// Tracked descriptor lookup and list encoding
///
/// `contains` runs on every intercepted output call, so it must stay cheap
/// both for small descriptors and for ones in the overflow list.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fdcolor::codec;
use fdcolor::tracked::{SharedFds, TrackedFds, STATIC_SLOTS};

fn bench_contains(c: &mut Criterion) {
    let mut group = c.benchmark_group("contains");

    for overflow in [0usize, 10, 100] {
        let base = STATIC_SLOTS as i32;
        let set = TrackedFds::from_fds(
            [1, 2].into_iter().chain((0..overflow as i32).map(|i| base + i * 3)),
        );
        group.bench_with_input(BenchmarkId::new("table", overflow), &set, |b, set| {
            b.iter(|| black_box(set.contains(black_box(2))));
        });
        group.bench_with_input(BenchmarkId::new("overflow_miss", overflow), &set, |b, set| {
            b.iter(|| black_box(set.contains(black_box(base + 1))));
        });

        let shared = SharedFds::new();
        shared.store(&set);
        group.bench_with_input(BenchmarkId::new("shared_table", overflow), &shared, |b, shared| {
            b.iter(|| black_box(shared.contains(black_box(2))));
        });
        group.bench_with_input(BenchmarkId::new("shared_overflow_miss", overflow), &shared, |b, shared| {
            b.iter(|| black_box(shared.contains(black_box(base + 1))));
        });
    }

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let set = TrackedFds::from_fds((0..64).chain(1000..1064));
    let encoded = codec::encode(&set);

    group.bench_function("encode", |b| b.iter(|| black_box(codec::encode(black_box(&set)))));
    group.bench_function("decode", |b| b.iter(|| black_box(codec::decode(black_box(&encoded)))));

    group.finish();
}

criterion_group!(benches, bench_contains, bench_codec);
criterion_main!(benches);
