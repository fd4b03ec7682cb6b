//! Client-side state benchmarks.
//!
//! Measures the per-event cost on the supervisor task:
//! - Telemetry merge for small and wide partial updates
//! - Log ring append at capacity
//! - Full envelope routing
//!
//! Run with: cargo bench --bench telemetry
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::{Map, Value, json};

use liftcore_link::LogKind;
use liftcore_link::negotiation::AckRegistry;
use liftcore_link::protocol::Envelope;
use liftcore_link::router::EventRouter;
use liftcore_link::state::{LogRing, TelemetryStore};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const FIELD_COUNTS: &[usize] = &[1, 8, 64];

fn partial(fields: usize, seed: u64) -> Map<String, Value> {
    (0..fields)
        .map(|i| (format!("field_{i}"), Value::from(seed + i as u64)))
        .collect()
}

// ============================================================================
// Benchmark: Telemetry Merge
// ============================================================================

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("telemetry_merge");

    for &fields in FIELD_COUNTS {
        group.bench_with_input(BenchmarkId::new("fields", fields), &fields, |b, &n| {
            let store = TelemetryStore::new();
            let mut seed = 0u64;
            b.iter(|| {
                seed += 1;
                black_box(store.apply_partial(partial(n, seed)));
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Log Ring
// ============================================================================

fn bench_log_ring(c: &mut Criterion) {
    c.bench_function("log_ring_push_full", |b| {
        let ring = LogRing::default();
        for i in 0..ring.capacity() {
            ring.push(LogKind::Info, i.to_string(), None);
        }
        b.iter(|| black_box(ring.push(LogKind::Warning, "obstacle", None)));
    });
}

// ============================================================================
// Benchmark: Routing
// ============================================================================

fn bench_route(c: &mut Criterion) {
    let router = EventRouter::new(
        Arc::new(TelemetryStore::new()),
        Arc::new(LogRing::default()),
        Arc::new(AckRegistry::new()),
        64,
    );
    let telemetry = Envelope::new("telemetry", json!({"battery": 71, "mode": "auto"}));
    let obstacle = Envelope::new("obstacle_detected", json!({"distance": 0.8}));

    c.bench_function("route_telemetry", |b| {
        b.iter(|| black_box(router.route(&telemetry)));
    });
    c.bench_function("route_obstacle", |b| {
        b.iter(|| black_box(router.route(&obstacle)));
    });
}

criterion_group!(benches, bench_merge, bench_log_ring, bench_route);
criterion_main!(benches);
