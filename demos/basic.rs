//! Basic usage examples for the expiring pool

use expiring_pool::{ExpiringPool, ManualClock, PoolConfiguration, PoolError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
enum ConnectionError {
    #[error("host {0} is unreachable")]
    Unreachable(String),
    #[error("connection {0} did not close cleanly")]
    Close(usize),
}

#[derive(Debug)]
struct Connection {
    id: usize,
    host: String,
}

fn main() {
    println!("=== expiring_pool - Basic Examples ===\n");

    // Example 1: Sharing and reviving
    shared_values();

    // Example 2: Deadline-ordered eviction
    eviction_order();

    // Example 3: Guards
    guards();

    // Example 4: Failures
    failures();
}

fn connection_pool(clock: &ManualClock) -> ExpiringPool<String, Arc<Connection>, ConnectionError> {
    let next_id = AtomicUsize::new(1);

    ExpiringPool::new(
        move |host: &String| {
            if host.ends_with(".invalid") {
                return Err(ConnectionError::Unreachable(host.clone()));
            }
            let id = next_id.fetch_add(1, Ordering::Relaxed);
            println!("   Opening connection {} to {}", id, host);
            Ok(Arc::new(Connection { id, host: host.clone() }))
        },
        PoolConfiguration::new().with_default_ttl(Duration::from_secs(30)),
    )
    .with_destructor(|conn: Arc<Connection>| {
        println!("   Closing connection {} to {}", conn.id, conn.host);
        if conn.host.starts_with("flaky") {
            return Err(ConnectionError::Close(conn.id));
        }
        Ok(())
    })
    .with_clock(clock.clone())
}

fn shared_values() {
    println!("1. Sharing and reviving:");
    let clock = ManualClock::new();
    let pool = connection_pool(&clock);
    let host = "db.internal".to_string();

    let a = pool.acquire(&host).unwrap();
    let b = pool.acquire(&host).unwrap();
    println!("   Same connection: {}", Arc::ptr_eq(&a, &b));
    println!("   References: {:?}", pool.ref_count(&host));

    pool.release(&host, Duration::from_secs(60));
    pool.release(&host, Duration::from_secs(60));
    clock.advance(Duration::from_secs(30));

    let c = pool.acquire(&host).unwrap();
    println!("   Revived connection {} without reopening", c.id);
    pool.release(&host, Duration::from_secs(60));

    println!();
}

fn eviction_order() {
    println!("2. Deadline-ordered eviction:");
    let clock = ManualClock::new();
    let pool = connection_pool(&clock);

    for (host, secs) in [("a.internal", 3600), ("b.internal", 60), ("c.internal", 600)] {
        let host = host.to_string();
        pool.acquire(&host).unwrap();
        pool.release(&host, Duration::from_secs(secs));
    }

    clock.advance(Duration::from_secs(120));
    println!("   After 2 minutes, destroyed: {}", pool.prune().unwrap());

    clock.advance(Duration::from_secs(3600));
    println!("   After another hour, destroyed: {}", pool.prune().unwrap());

    println!();
}

fn guards() {
    println!("3. Guards:");
    let clock = ManualClock::new();
    let pool = connection_pool(&clock);

    {
        let conn = pool.acquire_pooled(&"cache.internal".to_string()).unwrap();
        println!("   Using connection {} to {}", conn.id, conn.host);
    }

    println!("   Idle after guard dropped: {}", pool.idle_len());
    println!("   Expires in: {:?}", pool.time_until_expiry(&"cache.internal".to_string()));

    println!();
}

fn failures() {
    println!("4. Failures:");
    let clock = ManualClock::new();
    let pool = connection_pool(&clock);

    match pool.acquire(&"nowhere.invalid".to_string()) {
        Ok(_) => println!("   Unexpected connection"),
        Err(e) => println!("   Error: {} ({})", e, e.callback_error()),
    }

    let flaky = "flaky.internal".to_string();
    pool.acquire(&flaky).unwrap();
    pool.release(&flaky, Duration::from_secs(1));
    clock.advance(Duration::from_secs(1));

    if let Err(PoolError::Destruction { key, source }) = pool.prune() {
        println!("   Could not close {}: {}", key, source);
    }
    println!("   Still tracked: {}", pool.contains_key(&flaky));

    println!("   Metrics: {:?}", pool.get_metrics());
}
