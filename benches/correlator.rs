//! Request correlator benchmark suite.
//!
//! Measures the hot paths of the request layer without any I/O:
//! - Routing one-shot requests and matching their responses
//! - Fanning subscription notifications out through a shared publisher
//! - Flushing a queue built up while offline
//!
//! Run with: cargo bench --bench correlator
//! Results saved to: target/criterion/

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use wallet_socket::client::{QueuedRequest, RequestCorrelator, Route};
use wallet_socket::{CorrelationId, PublisherId};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const BATCH_SIZES: &[usize] = &[10, 100, 1000];

// ============================================================================
// Helpers
// ============================================================================

fn request_payload(id: i64) -> String {
    json!({"jsonrpc": "2.0", "id": id, "method": "eth_getBalance", "params": ["0xabc"]})
        .to_string()
}

fn response_frame(id: i64) -> String {
    json!({"jsonrpc": "2.0", "id": id, "result": "0x0"}).to_string()
}

/// Correlator that has already seen a `Connected` flush.
fn connected() -> RequestCorrelator {
    let mut correlator = RequestCorrelator::new();
    assert!(correlator.next_flush().is_none());
    correlator
}

// ============================================================================
// Benchmark: One-shot Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_trip");

    for &count in BATCH_SIZES {
        let frames: Vec<String> = (0..count as i64).map(response_frame).collect();
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("route_and_match", count), &count, |b, _| {
            b.iter(|| {
                let mut correlator = connected();
                let mut replies = Vec::with_capacity(count);

                for id in 0..count as i64 {
                    let (request, reply) =
                        QueuedRequest::once(CorrelationId::Number(id), request_payload(id));
                    let route = correlator.route(request).expect("unique id");
                    assert!(matches!(route, Route::Send(_)));
                    replies.push(reply);
                }

                for frame in &frames {
                    black_box(correlator.on_frame(frame));
                }

                black_box(replies)
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Publisher Fan-out
// ============================================================================

fn bench_publisher_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("publisher_fan_out");

    for &listeners in &[1usize, 10, 50] {
        group.bench_with_input(
            BenchmarkId::new("listeners", listeners),
            &listeners,
            |b, &listeners| {
                let publisher = PublisherId::new("heads");
                let mut correlator = connected();
                let mut receivers: Vec<_> = (0..listeners)
                    .map(|_| correlator.attach_publisher(publisher.clone()))
                    .collect();

                let subscribe = QueuedRequest::publisher(
                    CorrelationId::Number(1),
                    request_payload(1),
                    publisher,
                );
                correlator.route(subscribe).expect("unique id");
                correlator.on_frame(r#"{"jsonrpc":"2.0","id":1,"result":"0xsub"}"#);

                let notification = json!({
                    "jsonrpc": "2.0",
                    "method": "eth_subscription",
                    "params": {"subscription": "0xsub", "result": {"number": "0x10"}},
                })
                .to_string();

                b.iter(|| {
                    black_box(correlator.on_frame(&notification));
                    for receiver in &mut receivers {
                        while let Ok(reply) = receiver.try_recv() {
                            black_box(reply);
                        }
                    }
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Benchmark: Offline Queue Flush
// ============================================================================

fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush");

    for &count in BATCH_SIZES {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("queued", count), &count, |b, &count| {
            b.iter(|| {
                let mut correlator = RequestCorrelator::new();
                for id in 0..count as i64 {
                    let request =
                        QueuedRequest::forget(CorrelationId::Number(id), request_payload(id));
                    correlator.route(request).expect("unique id");
                }

                let mut flushed = 0;
                while let Some(batch) = correlator.next_flush() {
                    flushed += batch.len();
                }
                assert_eq!(flushed, count);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_round_trip,
    bench_publisher_fan_out,
    bench_flush
);
criterion_main!(benches);
