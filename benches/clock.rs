//! Benchmarks for the late-join hot path
//!
//! Run with: cargo bench --bench clock

use chrono::{Duration, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

use radio_sync::catalog::{Catalog, Track};
use radio_sync::sync::{to_byte_offset, ProgramClock};

fn catalog(tracks: usize) -> Catalog {
    Catalog::new(
        (0..tracks)
            .map(|index| {
                // 2-6 minute tracks at 128 kbit/s
                let duration = 120.0 + (index % 5) as f64 * 60.0;
                Track {
                    index,
                    name: format!("{:05}.mp3", index),
                    size: (duration * 16_000.0) as u64,
                    probed_duration: Some(duration),
                    duration,
                }
            })
            .collect(),
    )
}

fn bench_position_at(c: &mut Criterion) {
    let mut group = c.benchmark_group("position_at");

    let epoch = Utc::now() - Duration::days(3);
    let clock = ProgramClock::new(epoch);
    let now = Utc::now();

    for tracks in [10, 1_000, 100_000].iter() {
        let catalog = catalog(*tracks);
        group.bench_with_input(BenchmarkId::from_parameter(tracks), tracks, |b, _| {
            b.iter(|| black_box(clock.position_at(black_box(&catalog), black_box(now))));
        });
    }

    group.finish();
}

fn bench_late_join(c: &mut Criterion) {
    let catalog = catalog(1_000);
    let clock = ProgramClock::new(Utc::now() - Duration::hours(7));
    let now = Utc::now();

    c.bench_function("late_join_offset", |b| {
        b.iter(|| {
            let position = clock.position_at(&catalog, black_box(now));
            let track = &catalog.tracks()[position.track_index];
            black_box(to_byte_offset(track, position.offset_secs))
        });
    });
}

criterion_group!(benches, bench_position_at, bench_late_join);
criterion_main!(benches);
