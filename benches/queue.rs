//! Dispatch benchmarks — queue ordering and capability selection.
//!
//! - Queue push+pop (single entry):   P50 <5μs
//! - Queue drain (1 000 mixed bands): P50 <1ms
//! - Capability selection (32 backends): P50 <10μs

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fleet_dispatch::dispatch::{Coordinator, DispatchQueue, EchoInvoker, TaskStatus};
use fleet_dispatch::routing::capability_first_available;
use fleet_dispatch::{Backend, DispatchConfig, Priority};
use tokio::runtime::Runtime;

const BANDS: [Priority; 4] = [
    Priority::Low,
    Priority::Normal,
    Priority::High,
    Priority::Urgent,
];

fn bench_queue_push_pop(c: &mut Criterion) {
    let queue = DispatchQueue::new();
    c.bench_function("queue_push_pop", |b| {
        b.iter(|| {
            queue.push(black_box(Priority::High), "task");
            black_box(queue.try_pop());
        })
    });
}

fn bench_queue_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_drain");
    for size in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let queue = DispatchQueue::new();
                for i in 0..size {
                    queue.push(BANDS[i % BANDS.len()], format!("t{i}"));
                }
                while let Some(item) = queue.try_pop() {
                    black_box(item);
                }
            })
        });
    }
    group.finish();
}

fn bench_capability_selection(c: &mut Criterion) {
    let fleet: Vec<Backend> = (0..32u32)
        .map(|i| {
            let cap = if i % 2 == 0 { "llm" } else { "vision" };
            let mut b = Backend::new(format!("b{i}"), format!("http://b{i}"), [cap], 4);
            b.is_online = i % 5 != 0;
            b.current_load = i % 4;
            b
        })
        .collect();

    c.bench_function("capability_first_available_32", |b| {
        b.iter(|| black_box(capability_first_available(black_box(&fleet), "vision")))
    });
}

fn bench_end_to_end_echo(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    c.bench_function("submit_to_completed_echo", |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let mut config = DispatchConfig::default();
            config.coordinator.requeue_backoff_ms = 1;
            let coordinator = Coordinator::with_invoker(&config, Arc::new(EchoInvoker::default()))
                .expect("coordinator");
            coordinator.register_backend(Backend::new("a", "http://a", ["all"], 64));
            coordinator.registry().set_online("a", true);
            coordinator.start_worker();

            let start = std::time::Instant::now();
            let ids: Vec<String> = (0..iters)
                .map(|_| coordinator.submit_task("llm", serde_json::Value::Null, Priority::Normal))
                .collect();
            for id in &ids {
                while coordinator.get_task_status(id).map(|t| t.status)
                    != Some(TaskStatus::Completed)
                {
                    tokio::time::sleep(Duration::from_micros(50)).await;
                }
            }
            let elapsed = start.elapsed();
            coordinator.shutdown().await;
            elapsed
        })
    });
}

criterion_group!(
    benches,
    bench_queue_push_pop,
    bench_queue_drain,
    bench_capability_selection,
    bench_end_to_end_echo
);
criterion_main!(benches);
