//! # Light ODR Benchmarks
//!
//! Hot paths of the distributor's per-dispatch work:
//!
//! | Path | Called |
//! |------|--------|
//! | `DecaySet::score` | once per eligible peer per dispatch |
//! | `select_best` | once per dispatch |
//! | `ValueTracker::update` | once per response |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

use qc_18_light_odr::algorithms::{select_best, Candidate, DecaySet};
use qc_18_light_odr::test_utils::ManualClock;
use qc_18_light_odr::{
    InMemoryKVStore, PeerId, RequestKind, Timestamp, ValueTracker, ValueTrackerConfig,
};

fn half_lives() -> Vec<Duration> {
    ValueTrackerConfig::default().half_lives()
}

fn bench_decay_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18-decay");
    let lives = half_lives();
    let weights = ValueTrackerConfig::default().weights;

    let mut set = DecaySet::new(&lives, Timestamp::from_millis(0));
    for i in 0..1_000u64 {
        set.add(Timestamp::from_millis(i * 1_000), 10.0, (i % 10) as f64);
    }
    let later = Timestamp::from_millis(2_000_000);

    group.bench_function("score", |b| {
        b.iter(|| black_box(set.score(later, &weights, 0.5, 1_000.0)))
    });
    group.bench_function("add", |b| {
        let mut set = set.clone();
        let mut t = 2_000_000u64;
        b.iter(|| {
            t += 1;
            set.add(Timestamp::from_millis(t), 10.0, 5.0);
        })
    });
    group.finish();
}

fn bench_select_best(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18-selection");
    for size in [4usize, 32, 256] {
        let candidates: Vec<Candidate> = (0..size)
            .map(|i| Candidate {
                id: PeerId::new([(i % 256) as u8; 32]),
                score: (i * 7 % 100) as f64 / 100.0,
                outstanding: i % 4,
                order: i as u64,
            })
            .collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("select_best", size), &candidates, |b, c| {
            b.iter(|| black_box(select_best(c.iter().copied())))
        });
    }
    group.finish();
}

fn bench_tracker_update(c: &mut Criterion) {
    let tracker = ValueTracker::new(
        ValueTrackerConfig::default(),
        Arc::new(InMemoryKVStore::new()),
        Arc::new(ManualClock::new(0)),
    );
    let handle = tracker.register(PeerId::new([1; 32]));

    c.bench_function("qc-18-tracker/update", |b| {
        b.iter(|| tracker.update(handle, RequestKind::Receipts, 10.0, black_box(7.5)))
    });
}

criterion_group!(benches, bench_decay_score, bench_select_best, bench_tracker_update);
criterion_main!(benches);
