//! Stress test - many services
//!
//! Spawns a large number of services, each of which yields a handful of
//! times before completing, and reports spawn/run throughput. Exercises
//! the scheduler's dispatch path under load against the
//! service/message-passing API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use svc::interpreter::mock;
use svc::{Runtime, RuntimeConfig};

fn main() {
    println!("=== Service Scheduler Stress Test ===\n");

    let num_services: usize = std::env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(10_000);

    println!("Spawning {num_services} services...");

    let config = RuntimeConfig::new()
        .worker(8)
        .max_service((num_services + 1024).next_power_of_two())
        .queue(8);
    let runtime = Runtime::new(config).expect("failed to build runtime");
    runtime.start();

    let completed = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    for i in 0..num_services {
        let factory = mock::yields_n_then_done(10);
        runtime
            .spawn_service(&factory, b"stress", b"", "stress-chunk")
            .expect("pool exhausted");

        if (i + 1) % 1000 == 0 {
            print!("\rSpawned: {}/{num_services}", i + 1);
        }
    }

    let spawn_time = start.elapsed();
    println!("\n\nSpawn time: {spawn_time:?}");
    println!(
        "Spawn rate: {:.0} services/sec",
        num_services as f64 / spawn_time.as_secs_f64()
    );

    println!("\nWaiting for completion...");
    let run_start = Instant::now();
    let pool = runtime.pool();
    loop {
        let done = (1..=num_services as u32)
            .filter(|&raw| {
                pool.lookup(svc::ServiceId::from_raw(raw))
                    .map(|s| s.is_dead())
                    .unwrap_or(true)
            })
            .count();
        completed.store(done as u64, Ordering::Relaxed);
        if done >= num_services {
            break;
        }
        if run_start.elapsed().as_secs() > 30 {
            println!("Timeout! Only {done}/{num_services} completed");
            break;
        }
        print!("\rCompleted: {done}/{num_services}");
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    let total_time = start.elapsed();
    let run_time = run_start.elapsed();

    println!("\n\n=== Results ===");
    println!("Total services:  {num_services}");
    println!("Completed:       {}", completed.load(Ordering::Relaxed));
    println!("Spawn time:      {spawn_time:?}");
    println!("Run time:        {run_time:?}");
    println!("Total time:      {total_time:?}");
    println!(
        "Throughput:      {:.0} services/sec",
        num_services as f64 / total_time.as_secs_f64()
    );

    runtime.shutdown();
    println!("\n=== Stress Test Complete ===");
}
