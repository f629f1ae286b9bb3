// This is just a binary wrapper - the actual library is in lib.rs
// Run the demo with: cargo run --example basic

use expiring_pool::{ExpiringPool, ManualClock, PoolConfiguration};
use std::convert::Infallible;
use std::time::Duration;

fn main() {
    println!("=== expiring_pool ===");
    println!("See demos/ directory for usage examples");
    println!("Run: cargo run --example basic");
    println!();

    // Quick demo
    println!("Quick Demo:");
    let clock = ManualClock::new();
    let pool: ExpiringPool<u32, String, Infallible> =
        ExpiringPool::new(|id: &u32| Ok(format!("handle-{id}")), PoolConfiguration::default())
            .with_clock(clock.clone());

    if let Ok(handle) = pool.acquire(&1) {
        println!("  Got value: {}", handle);
    }
    pool.release(&1, Duration::from_secs(5));
    println!("  Idle after release: {}", pool.idle_len());

    clock.advance(Duration::from_secs(5));
    match pool.prune() {
        Ok(destroyed) => println!("  Destroyed after 5s: {}", destroyed),
        Err(e) => println!("  Prune failed: {}", e),
    }
}
