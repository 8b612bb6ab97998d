use std::time::{Duration, SystemTime};

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pumawatch::export::metric::build_metric_data;
use pumawatch::normalize::normalize;
use pumawatch::source::parse_snapshot;
use pumawatch::storage::WindowStore;
use serde_json::{json, Value};

fn cluster_snapshot(workers: usize) -> Value {
    let statuses: Vec<Value> = (0..workers)
        .map(|i| {
            json!({
                "pid": 20_000 + i,
                "index": i,
                "booted": true,
                "last_status": {
                    "backlog": i % 3,
                    "running": 16,
                    "busy_threads": i % 16,
                    "pool_capacity": 16 - (i % 16),
                    "requests_count": 1_000 + i
                }
            })
        })
        .collect();

    json!({
        "started_at": "2024-01-01T00:00:00Z",
        "workers": workers,
        "phase": 0,
        "booted_workers": workers,
        "old_workers": 0,
        "worker_status": statuses
    })
}

fn socket_response(workers: usize) -> String {
    format!(
        "HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n{}",
        cluster_snapshot(workers)
    )
}

fn bench_parse_snapshot(c: &mut Criterion) {
    let body = socket_response(16);

    c.bench_function("parse_snapshot/cluster_16", |b| {
        b.iter(|| parse_snapshot(black_box(&body)).expect("parse snapshot"))
    });
}

fn bench_normalize(c: &mut Criterion) {
    let snapshot = cluster_snapshot(16);

    c.bench_function("normalize/cluster_16", |b| {
        b.iter(|| normalize(black_box(&snapshot)).expect("normalize"))
    });
}

fn bench_aggregate(c: &mut Criterion) {
    let batch = normalize(&cluster_snapshot(16)).expect("normalize");
    let store = WindowStore::new(Duration::from_secs(60));
    let now = SystemTime::now();

    c.bench_function("store/aggregate_cluster_16", |b| {
        b.iter(|| black_box(store.aggregate(black_box(&batch), now)))
    });
}

fn bench_flush(c: &mut Criterion) {
    let batch = normalize(&cluster_snapshot(16)).expect("normalize");
    let store = WindowStore::new(Duration::from_secs(60));
    let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    for i in 0..60u64 {
        store.aggregate(&batch, start + Duration::from_secs(i * 60));
    }
    let windows = store.snapshot();

    c.bench_function("export/build_metric_data_60_windows", |b| {
        b.iter(|| {
            let doc = build_metric_data("Puma", black_box(&windows), Duration::from_secs(60));
            black_box(doc.metric_data.len())
        })
    });
}

fn bench_suite(c: &mut Criterion) {
    bench_parse_snapshot(c);
    bench_normalize(c);
    bench_aggregate(c);
    bench_flush(c);
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
