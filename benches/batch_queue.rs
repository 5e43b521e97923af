//! Benchmarks for batch cutting
//!
//! This benchmark measures:
//! - Queue push and dequeue throughput
//! - Adaptive sizing overhead with weight tiers
//! - Aggregate response reconciliation

use bulk_dispatch::batch::BatchQueue;
use bulk_dispatch::config::BatchLimits;
use bulk_dispatch::message::EmailMessage;
use bulk_dispatch::reconcile::reconcile;
use bulk_dispatch::response::{AggregateResponse, ItemResult};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn message(body_len: usize) -> EmailMessage {
    EmailMessage::new("to@example.com", "from@example.com", "subject")
        .with_html_body("x".repeat(body_len))
}

fn bench_queue_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_cycle");

    for &n in &[100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("push_drain", n), &n, |b, &n| {
            b.iter(|| {
                let mut queue = BatchQueue::new(BatchLimits::default());
                for i in 0..n {
                    queue.push(format!("item-{i}"), None);
                }
                black_box(queue.drain_batches().len())
            })
        });
    }

    group.finish();
}

fn bench_adaptive_sizing(c: &mut Criterion) {
    let mut group = c.benchmark_group("adaptive_sizing");

    for &body in &[512usize, 16 * 1024, 64 * 1024] {
        let items: Vec<EmailMessage> = (0..200).map(|_| message(body)).collect();
        group.throughput(Throughput::Bytes((body * items.len()) as u64));
        group.bench_with_input(BenchmarkId::new("html_body", body), &items, |b, items| {
            b.iter(|| {
                let mut queue = BatchQueue::new(BatchLimits::default());
                for item in items.iter().cloned() {
                    queue.push(item, None);
                }
                black_box(queue.drain_batches().len())
            })
        });
    }

    group.finish();
}

fn bench_reconcile(c: &mut Criterion) {
    let results: Vec<ItemResult> = (0..50)
        .map(|i| {
            if i % 10 == 0 {
                ItemResult::failed(1002)
            } else {
                ItemResult::ok().with_message_id(format!("m-{i}"))
            }
        })
        .collect();
    let response = AggregateResponse::from_results(results);

    c.bench_function("reconcile_50", |b| {
        b.iter(|| black_box(reconcile(black_box(&response), 50)))
    });
}

criterion_group!(benches, bench_queue_cycle, bench_adaptive_sizing, bench_reconcile);
criterion_main!(benches);
