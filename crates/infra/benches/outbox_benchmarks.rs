use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use relaykit_events::{EventBus, EventHandler, EventMessage, HandlerError, InProcessEventBus};
use relaykit_infra::config::RelayOptions;
use relaykit_infra::outbox::{
    InMemoryOutboxStore, NewOutboxMessage, OutboxDispatcher, OutboxStore, RetryPolicy,
};

struct NoopHandler {
    seen: AtomicUsize,
}

#[async_trait]
impl EventHandler for NoopHandler {
    fn name(&self) -> &str {
        "noop"
    }

    async fn handle(&self, _message: &EventMessage) -> Result<(), HandlerError> {
        self.seen.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to build benchmark runtime")
}

fn bench_backoff_calculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_backoff");
    group.sample_size(1000);

    let policy = RetryPolicy::exponential(64, Duration::from_secs(10), Duration::from_secs(900));
    for attempt in [1u32, 4, 16, 64].iter() {
        group.bench_with_input(
            BenchmarkId::new("delay_for_attempt", attempt),
            attempt,
            |b, &attempt| {
                b.iter(|| black_box(policy.delay_for_attempt(black_box(attempt))));
            },
        );
    }

    group.finish();
}

fn bench_outbox_lifecycle_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("outbox_lifecycle_throughput");
    let rt = runtime();

    for batch_size in [10usize, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("enqueue_claim_mark", batch_size),
            batch_size,
            |b, &size| {
                b.iter(|| {
                    rt.block_on(async {
                        let store = InMemoryOutboxStore::new();
                        let now = Utc::now();
                        for i in 0..size {
                            store
                                .enqueue(
                                    &mut (),
                                    NewOutboxMessage::new(
                                        "bench.event",
                                        json!({"n": i}),
                                        now,
                                    ),
                                )
                                .await
                                .unwrap();
                        }

                        let lease = now + chrono::Duration::seconds(30);
                        let pending = store.get_pending(size, now, 8).await.unwrap();
                        for record in &pending {
                            store
                                .try_mark_processing(record.message_id, now, lease, 8)
                                .await
                                .unwrap();
                            store.mark_succeeded(record.message_id, now).await.unwrap();
                        }
                        black_box(pending.len())
                    });
                });
            },
        );
    }

    group.finish();
}

fn bench_dispatch_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_tick");
    let rt = runtime();

    for batch_size in [10usize, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("run_once", batch_size),
            batch_size,
            |b, &size| {
                b.iter(|| {
                    rt.block_on(async {
                        let store = InMemoryOutboxStore::arc();
                        let bus = InProcessEventBus::new();
                        bus.subscribe(
                            "bench.event",
                            Arc::new(NoopHandler {
                                seen: AtomicUsize::new(0),
                            }),
                        );
                        let now = Utc::now();
                        for i in 0..size {
                            store
                                .enqueue(
                                    &mut (),
                                    NewOutboxMessage::new("bench.event", json!({"n": i}), now),
                                )
                                .await
                                .unwrap();
                        }
                        let options = RelayOptions::default().with_batch_size(size);
                        let dispatcher = OutboxDispatcher::new(store.clone(), bus, options);

                        black_box(dispatcher.run_once(now).await)
                    });
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_backoff_calculation,
    bench_outbox_lifecycle_throughput,
    bench_dispatch_tick
);
criterion_main!(benches);
