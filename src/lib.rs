//! # expiring_pool
//!
//! Reference-counted object pool keyed by an arbitrary identifier, for
//! expensive resources shared across concurrent callers: connections,
//! handles, computed artifacts.
//!
//! ## Features
//!
//! - Construct-on-demand per key, shared while in use
//! - Lazy destruction after a per-release grace period
//! - Idle entries revived on reacquire without reconstruction
//! - Deadline-ordered eviction with O(log n) removal of revived entries
//! - Opportunistic pruning only; no background threads
//! - Injectable clock for deterministic expiration
//! - RAII guards that release on drop
//! - Metrics with Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use expiring_pool::{ExpiringPool, PoolConfiguration};
//! use std::convert::Infallible;
//! use std::time::Duration;
//!
//! let pool: ExpiringPool<String, usize, Infallible> =
//!     ExpiringPool::new(|key: &String| Ok(key.len()), PoolConfiguration::default());
//!
//! let key = "replica-a".to_string();
//! let value = pool.acquire(&key).unwrap();
//! println!("Got: {}", value);
//!
//! // Keep the value around for another minute after the last release
//! pool.release(&key, Duration::from_secs(60));
//! ```

mod pool;
mod config;
mod metrics;
mod eviction;
mod clock;
mod errors;

pub use pool::{ExpiringPool, PooledValue};
pub use config::PoolConfiguration;
pub use metrics::{PoolMetrics, MetricsExporter};
pub use clock::{Clock, SystemClock, ManualClock};
pub use errors::{PoolError, PoolResult};
