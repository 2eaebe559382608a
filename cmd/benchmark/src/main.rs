//! Benchmark suite for the service scheduler
//!
//! Measures pool allocation throughput, message round-trip throughput
//! through a live scheduler, and timing-wheel dispatch throughput. Uses a
//! plain `Instant`-timed report rather than a `criterion` harness -- there
//! is nothing here that needs statistical rigor across runs, just a
//! ballpark of the hot paths.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use svc::interpreter::mock;
use svc::{Interpreter, InterpreterFactory, Message, MessageType, Runtime, RuntimeConfig, Service, ServiceId, TimingWheel};

fn main() {
    println!("=== Service Scheduler Benchmarks ===\n");

    bench_pool_allocation();
    bench_message_roundtrip();
    bench_timer_dispatch();

    println!("\n=== Benchmarks Complete ===");
}

fn bench_pool_allocation() {
    println!("Benchmark: Pool allocation");
    println!("{}", "-".repeat(40));

    let iterations = 50_000;
    let runtime = Runtime::new(RuntimeConfig::new().worker(1).max_service((iterations + 16).next_power_of_two()))
        .expect("failed to build runtime");

    let start = Instant::now();
    for _ in 0..iterations {
        runtime.pool().new_service(None).expect("pool exhausted");
    }
    let elapsed = start.elapsed();

    report("allocations", iterations, elapsed);
}

/// Sends one request to `echoer` per resume, waiting for that request's
/// reply to land in its own inbox before sending the next. Unlike pushing
/// messages into a service's outbox from an outside thread, the send
/// happens from inside the service's own `resume` call, which is the only
/// point at which the scheduler's outbox harvest is guaranteed to observe
/// it (see `ServicePool::for_each_running`).
fn round_tripper(echoer: ServiceId, iterations: u64, sent: Arc<AtomicU64>) -> impl InterpreterFactory {
    move |handle: Arc<Service>| -> Box<dyn Interpreter> {
        let sent = Arc::clone(&sent);
        Box::new(mock::ClosureInterpreter::new(handle, move |svc| {
            while svc.pop_message().is_some() {}
            let n = sent.load(Ordering::Relaxed);
            if n < iterations {
                let msg = Message::new(svc.id(), echoer, n, MessageType::Request, Some(vec![0u8; 16]));
                if svc.send_message(msg).is_ok() {
                    sent.fetch_add(1, Ordering::Relaxed);
                }
            }
            svc::ResumeOutcome::Yield
        }))
    }
}

fn bench_message_roundtrip() {
    println!("Benchmark: Message round-trip (echo)");
    println!("{}", "-".repeat(40));

    let iterations: u64 = 20_000;
    let runtime = Runtime::new(RuntimeConfig::new().worker(4).queue(64).max_service(64))
        .expect("failed to build runtime");
    runtime.start();

    let replies = Arc::new(AtomicU64::new(0));
    let echoer = runtime
        .spawn_service(&mock::echo(Arc::clone(&replies)), b"bench", b"", "echo")
        .unwrap();

    let sent = Arc::new(AtomicU64::new(0));
    runtime
        .spawn_service(&round_tripper(echoer, iterations, sent), b"bench", b"", "driver")
        .unwrap();

    let start = Instant::now();
    let deadline = start + Duration::from_secs(10);
    while replies.load(Ordering::Relaxed) < iterations && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    let elapsed = start.elapsed();

    report("round trips", replies.load(Ordering::Relaxed) as usize, elapsed);
    runtime.shutdown();
}

fn bench_timer_dispatch() {
    println!("Benchmark: Timing wheel dispatch");
    println!("{}", "-".repeat(40));

    let iterations: u32 = 50_000;
    let wheel: TimingWheel<ServiceId> = TimingWheel::new(0);
    for i in 0..iterations {
        wheel.add(ServiceId::from_raw(1), i % 16_384);
    }

    let fired = AtomicU64::new(0);
    let start = Instant::now();
    wheel.update(16_384, |_| {
        fired.fetch_add(1, Ordering::Relaxed);
    });
    let elapsed = start.elapsed();

    assert_eq!(fired.load(Ordering::Relaxed), iterations as u64);
    report("dispatches", iterations as usize, elapsed);
}

fn report(unit: &str, iterations: usize, elapsed: Duration) {
    let per_op = elapsed.as_nanos() as f64 / iterations.max(1) as f64;
    println!("  Iterations:  {iterations}");
    println!("  Total time:  {elapsed:?}");
    println!("  Per op:      {per_op:.1} ns");
    println!("  Rate:        {:.0} {unit}/sec\n", iterations as f64 / elapsed.as_secs_f64());
}
