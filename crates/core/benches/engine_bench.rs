//! Retry engine benchmarks
//!
//! Benchmarks for backoff calculation, the per-key state store and the
//! executor's hot paths (first-attempt success and open-circuit rejection).
//!
//! Run with: `cargo bench --bench engine_bench -p steadfast-core`

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use steadfast_core::testing::{ScriptedOperation, TestError};
use steadfast_core::{
    Backoff, CircuitBreaker, CircuitBreakerConfig, MockClock, NoOpMetricsCollector, RetryExecutor,
    RetryPolicy, RetryStateStore, SystemClock,
};
use tokio::runtime::Builder as RuntimeBuilder;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Backoff Benchmarks
// ============================================================================

fn bench_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff");
    let backoff = Backoff {
        initial_interval: Duration::from_millis(100),
        max_interval: Duration::from_secs(30),
        multiplier: 2.0,
        jitter: true,
    };

    for attempt in [1u32, 8, 64] {
        group.bench_with_input(BenchmarkId::new("base_delay", attempt), &attempt, |b, &n| {
            b.iter(|| black_box(backoff.base_delay(black_box(n))));
        });
    }

    group.bench_function("jittered_seeded_rng", |b| {
        let mut rng = StdRng::seed_from_u64(7);
        b.iter(|| black_box(backoff.delay_with_rng(black_box(5), &mut rng)));
    });

    group.bench_function("jittered_thread_rng", |b| {
        b.iter(|| black_box(backoff.delay(black_box(5))));
    });

    group.finish();
}

// ============================================================================
// State Store Benchmarks
// ============================================================================

fn bench_state_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_store");

    group.bench_function("init_record_clear", |b| {
        let store = RetryStateStore::new(Arc::new(SystemClock));
        b.iter(|| {
            store.init("bench-key", 3);
            let _ = store.record("bench-key", Some("boom".to_string()), Duration::from_millis(5));
            black_box(store.clear("bench-key"));
        });
    });

    group.bench_function("get_among_1k_keys", |b| {
        let store = RetryStateStore::new(Arc::new(MockClock::new()));
        for i in 0..1_000 {
            store.init(&format!("key-{i}"), 3);
        }
        b.iter(|| black_box(store.get(black_box("key-500"))));
    });

    group.finish();
}

// ============================================================================
// Executor Benchmarks
// ============================================================================

fn bench_executor(c: &mut Criterion) {
    let runtime = RuntimeBuilder::new_current_thread()
        .enable_time()
        .build()
        .expect("tokio runtime for benchmarks");
    let mut group = c.benchmark_group("executor");

    let policy = RetryPolicy::builder()
        .max_attempts(3)
        .initial_interval(Duration::from_micros(1))
        .max_interval(Duration::from_micros(1))
        .jitter(false)
        .build()
        .expect("valid policy for benchmarks");
    let executor = RetryExecutor::builder()
        .name("bench")
        .policy(policy)
        .metrics(Arc::new(NoOpMetricsCollector))
        .build();
    let cancel = CancellationToken::new();

    group.bench_function("first_attempt_success", |b| {
        b.to_async(&runtime).iter(|| async {
            let result = executor
                .execute_with_retry(&cancel, "hot", |_| async { Ok::<_, TestError>(1u32) })
                .await;
            black_box(result)
        });
    });

    group.bench_function("one_retry_then_success", |b| {
        b.to_async(&runtime).iter(|| async {
            let op = ScriptedOperation::failing_times(1);
            black_box(executor.execute_with_retry(&cancel, "retry", |_| op.call()).await)
        });
    });

    group.bench_function("open_circuit_rejection", |b| {
        let config = CircuitBreakerConfig::builder()
            .max_failures(1)
            .reset_timeout(Duration::from_secs(3600))
            .build()
            .expect("valid breaker config for benchmarks");
        let breaker = CircuitBreaker::new("bench", executor.clone(), config)
            .expect("circuit breaker should build for benchmarks");
        let failing = ScriptedOperation::always_fatal();
        let _ = runtime.block_on(breaker.execute(&cancel, "trip", |_| failing.call()));

        b.to_async(&runtime).iter(|| async {
            let result = breaker
                .execute(&cancel, "rejected", |_| async { Ok::<_, TestError>(()) })
                .await;
            black_box(result)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_backoff, bench_state_store, bench_executor);
criterion_main!(benches);
