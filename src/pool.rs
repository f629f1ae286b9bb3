//! Keyed, reference-counted pool with deadline-based eviction

use crate::clock::{Clock, SystemClock, deadline_after};
use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::eviction::DeadlineHeap;
use crate::metrics::{MetricsExporter, MetricsTracker, PoolMetrics};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

type Constructor<K, V, E> = Box<dyn Fn(&K) -> Result<V, E> + Send + Sync>;
type Destructor<V, E> = Box<dyn Fn(V) -> Result<(), E> + Send + Sync>;

struct Entry<K, V> {
    key: K,
    value: V,
    ref_count: usize,
}

/// Everything guarded by the pool lock.
///
/// Entries live in `slots`; a slot index is the stable handle shared by the
/// key map and the eviction heap. A slot is queued in `idle` iff its entry
/// has a reference count of zero.
struct PoolState<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Option<Entry<K, V>>>,
    free_slots: Vec<usize>,
    idle: DeadlineHeap,
}

impl<K: Eq + Hash + Clone, V> PoolState<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free_slots: Vec::new(),
            idle: DeadlineHeap::with_capacity(capacity),
        }
    }

    fn entry(&self, key: &K) -> Option<(usize, &Entry<K, V>)> {
        let slot = *self.index.get(key)?;
        self.slots.get(slot)?.as_ref().map(|entry| (slot, entry))
    }

    fn entry_mut(&mut self, slot: usize) -> Option<&mut Entry<K, V>> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn insert(&mut self, key: K, value: V) -> usize {
        let entry = Entry {
            key: key.clone(),
            value,
            ref_count: 1,
        };

        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };

        self.index.insert(key, slot);
        slot
    }

    /// Add a reference to a tracked key, pulling it out of the eviction queue.
    ///
    /// Returns the value and whether the entry was idle before.
    fn revive(&mut self, key: &K) -> Option<(V, bool)>
    where
        V: Clone,
    {
        let slot = *self.index.get(key)?;
        let entry = self.entry_mut(slot)?;
        entry.ref_count += 1;
        let value = entry.value.clone();
        let was_idle = self.idle.remove(slot).is_some();
        Some((value, was_idle))
    }

    /// Stop tracking the entry in `slot` entirely
    fn take(&mut self, slot: usize) -> Option<Entry<K, V>> {
        let entry = self.slots.get_mut(slot)?.take()?;
        self.index.remove(&entry.key);
        self.idle.remove(slot);
        self.free_slots.push(slot);
        Some(entry)
    }

    fn compact_if_empty(&mut self) {
        if self.index.is_empty() {
            self.slots.clear();
            self.free_slots.clear();
            self.idle.clear();
        }
    }
}

/// Pool of values keyed by `K`, shared while referenced and destroyed lazily
/// after a grace period once nobody holds them.
///
/// Every `acquire` adds a reference; every `release` drops one. When the count
/// reaches zero the entry becomes idle with a deadline of `now + ttl`. Idle
/// entries are only destroyed when a later call (`acquire`, `prune` or
/// `clear`) observes the deadline has passed; there is no background thread.
///
/// A single lock covers each operation, including the constructor and
/// destructor callbacks. Slow callbacks stall every other caller of the pool.
///
/// # Examples
///
/// ```
/// use expiring_pool::{ExpiringPool, ManualClock, PoolConfiguration};
/// use std::convert::Infallible;
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let pool: ExpiringPool<u16, String, Infallible> =
///     ExpiringPool::new(|port: &u16| Ok(format!("conn:{port}")), PoolConfiguration::default())
///         .with_clock(clock.clone());
///
/// let conn = pool.acquire(&8080).unwrap();
/// assert_eq!(conn, "conn:8080");
///
/// pool.release(&8080, Duration::from_secs(30));
/// assert_eq!(pool.idle_len(), 1);
///
/// clock.advance(Duration::from_secs(31));
/// assert_eq!(pool.prune().unwrap(), 1);
/// assert!(pool.is_empty());
/// ```
pub struct ExpiringPool<K, V, E> {
    state: Mutex<PoolState<K, V>>,
    constructor: Constructor<K, V, E>,
    destructor: Option<Destructor<V, E>>,
    clock: Arc<dyn Clock>,
    config: PoolConfiguration,
    metrics: MetricsTracker,
}

impl<K, V, E> ExpiringPool<K, V, E>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
    E: Error,
{
    /// Create a pool that builds values on demand with `constructor`.
    ///
    /// Values are simply dropped on eviction unless a destructor is set with
    /// [`with_destructor`](Self::with_destructor).
    pub fn new<C>(constructor: C, config: PoolConfiguration) -> Self
    where
        C: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
    {
        Self {
            state: Mutex::new(PoolState::with_capacity(config.initial_capacity)),
            constructor: Box::new(constructor),
            destructor: None,
            clock: Arc::new(SystemClock),
            config,
            metrics: MetricsTracker::new(),
        }
    }

    /// Run `destructor` on every value the pool evicts or clears
    pub fn with_destructor<D>(mut self, destructor: D) -> Self
    where
        D: Fn(V) -> Result<(), E> + Send + Sync + 'static,
    {
        self.destructor = Some(Box::new(destructor));
        self
    }

    /// Replace the wall clock used for deadlines
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Get the value for `key`, constructing it if the key is not tracked.
    ///
    /// Adds a reference that must be returned with [`release`](Self::release).
    /// Reacquiring an idle entry revives it and cancels its pending eviction.
    /// Expired idle entries are pruned on every call.
    ///
    /// # Errors
    ///
    /// [`PoolError::Construction`] if the constructor fails; nothing is
    /// tracked for `key` in that case. [`PoolError::Destruction`] if the prune
    /// pass fails; when `key` was already tracked its reference has still been
    /// taken and must be released.
    pub fn acquire(&self, key: &K) -> PoolResult<V, K, E> {
        let mut state = self.state.lock();

        if let Some((value, was_idle)) = state.revive(key) {
            MetricsTracker::increment(&self.metrics.total_acquired);
            if was_idle {
                debug!(key = ?key, "revived idle entry");
            }
            self.prune_locked(&mut state)?;
            return Ok(value);
        }

        self.prune_locked(&mut state)?;

        let value = match (self.constructor)(key) {
            Ok(value) => value,
            Err(source) => {
                MetricsTracker::increment(&self.metrics.construction_failures);
                warn!(key = ?key, error = %source, "constructor failed");
                return Err(PoolError::Construction(source));
            }
        };

        MetricsTracker::increment(&self.metrics.total_constructed);
        MetricsTracker::increment(&self.metrics.total_acquired);
        debug!(key = ?key, "constructed pooled value");

        state.insert(key.clone(), value.clone());
        Ok(value)
    }

    /// Like [`acquire`](Self::acquire), but the reference is released with the
    /// configured default ttl when the returned guard is dropped.
    pub fn acquire_pooled(&self, key: &K) -> PoolResult<PooledValue<'_, K, V, E>, K, E> {
        let value = self.acquire(key)?;
        Ok(PooledValue {
            pool: self,
            key: key.clone(),
            value,
            ttl: self.config.default_ttl,
        })
    }

    /// Drop one reference to `key`.
    ///
    /// When the last reference goes, the entry becomes eligible for eviction
    /// once `ttl` has elapsed. Unknown keys and keys without references are
    /// ignored.
    pub fn release(&self, key: &K, ttl: Duration) {
        let mut state = self.state.lock();

        let Some(slot) = state.index.get(key).copied() else {
            return;
        };
        let Some(entry) = state.entry_mut(slot) else {
            return;
        };
        if entry.ref_count == 0 {
            return;
        }

        entry.ref_count -= 1;
        let now_idle = entry.ref_count == 0;
        MetricsTracker::increment(&self.metrics.total_released);

        if now_idle {
            let deadline = deadline_after(self.clock.now(), ttl);
            state.idle.push(slot, deadline);
            debug!(key = ?key, ttl = ?ttl, "entry idle, scheduled for eviction");
        }
    }

    /// Destroy every idle entry whose deadline has passed.
    ///
    /// Returns the number of values destroyed. A destructor error stops the
    /// pass; entries destroyed before it stay removed, and the failing key is
    /// no longer tracked.
    pub fn prune(&self) -> PoolResult<usize, K, E> {
        let mut state = self.state.lock();
        self.prune_locked(&mut state)
    }

    /// Destroy every tracked value immediately.
    ///
    /// Clear does not check reference counts or deadlines: values still held
    /// by callers are destroyed too, so this is meant for shutdown. On a
    /// destructor error the remaining entries are left in place and the pool
    /// should be considered partially cleared.
    pub fn clear(&self) -> PoolResult<usize, K, E> {
        let mut state = self.state.lock();
        state.idle.clear();

        let slots: Vec<usize> = state.index.values().copied().collect();
        let mut destroyed = 0;
        for slot in slots {
            let Some(entry) = state.take(slot) else {
                continue;
            };
            self.destroy(entry)?;
            destroyed += 1;
        }

        state.compact_if_empty();
        info!(destroyed, "cleared pool");
        Ok(destroyed)
    }

    /// Number of tracked keys, in use or idle
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries waiting for their deadline
    pub fn idle_len(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.state.lock().index.contains_key(key)
    }

    /// Current reference count of `key`, `None` if it is not tracked
    pub fn ref_count(&self, key: &K) -> Option<usize> {
        self.state.lock().entry(key).map(|(_, entry)| entry.ref_count)
    }

    /// Time left before an idle `key` becomes eligible for eviction.
    ///
    /// `None` if the key is not tracked or still referenced.
    pub fn time_until_expiry(&self, key: &K) -> Option<Duration> {
        let state = self.state.lock();
        let (slot, _) = state.entry(key)?;
        let deadline = state.idle.deadline(slot)?;
        Some(deadline.saturating_duration_since(self.clock.now()))
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        let (tracked, idle) = {
            let state = self.state.lock();
            (state.index.len(), state.idle.len())
        };
        self.metrics.get_metrics(tracked, idle)
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let metrics = self.get_metrics();
        MetricsExporter::export_prometheus(&metrics, pool_name, tags)
    }

    fn prune_locked(&self, state: &mut PoolState<K, V>) -> PoolResult<usize, K, E> {
        let now = self.clock.now();
        let mut destroyed = 0;

        while let Some((slot, deadline)) = state.idle.peek() {
            if deadline > now {
                break;
            }
            state.idle.pop();

            let Some(entry) = state.take(slot) else {
                continue;
            };
            debug!(key = ?entry.key, "evicting expired entry");
            self.destroy(entry)?;
            destroyed += 1;
        }

        Ok(destroyed)
    }

    fn destroy(&self, entry: Entry<K, V>) -> PoolResult<(), K, E> {
        let Entry { key, value, .. } = entry;

        if let Some(destructor) = &self.destructor
            && let Err(source) = destructor(value)
        {
            MetricsTracker::increment(&self.metrics.destruction_failures);
            warn!(key = ?key, error = %source, "destructor failed");
            return Err(PoolError::Destruction { key, source });
        }

        MetricsTracker::increment(&self.metrics.total_destroyed);
        Ok(())
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let state = self.state.lock();
        state.idle.assert_consistent();
        for (key, &slot) in &state.index {
            let entry = state.slots[slot].as_ref().expect("indexed slot is empty");
            assert_eq!(&entry.key, key);
            assert_eq!(entry.ref_count == 0, state.idle.contains(slot), "idle queue out of sync for {key:?}");
        }
    }
}

/// A value checked out of an [`ExpiringPool`] that releases its reference on drop
///
/// # Examples
///
/// ```
/// use expiring_pool::{ExpiringPool, PoolConfiguration};
/// use std::convert::Infallible;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new().with_default_ttl(Duration::from_secs(10));
/// let pool: ExpiringPool<u32, u64, Infallible> =
///     ExpiringPool::new(|id: &u32| Ok(u64::from(*id) * 2), config);
///
/// {
///     let value = pool.acquire_pooled(&21).unwrap();
///     assert_eq!(*value, 42);
///     assert_eq!(pool.ref_count(&21), Some(1));
/// }
///
/// assert_eq!(pool.ref_count(&21), Some(0));
/// ```
pub struct PooledValue<'a, K, V, E>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
    E: Error,
{
    pool: &'a ExpiringPool<K, V, E>,
    key: K,
    value: V,
    ttl: Duration,
}

impl<K, V, E> PooledValue<'_, K, V, E>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
    E: Error,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Grace period to apply when this guard is dropped
    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }
}

impl<K, V, E> Deref for PooledValue<'_, K, V, E>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
    E: Error,
{
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<K, V, E> Drop for PooledValue<'_, K, V, E>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
    E: Error,
{
    fn drop(&mut self) {
        self.pool.release(&self.key, self.ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use thiserror::Error;

    #[derive(Error, Debug, PartialEq)]
    #[error("{0}")]
    struct TestError(String);

    type TestPool = ExpiringPool<String, String, TestError>;

    #[derive(Default, Clone)]
    struct Journal {
        constructed: Arc<Mutex<Vec<String>>>,
        destructed: Arc<Mutex<Vec<String>>>,
    }

    impl Journal {
        fn constructed(&self) -> Vec<String> {
            self.constructed.lock().clone()
        }

        fn destructed(&self) -> Vec<String> {
            self.destructed.lock().clone()
        }

        fn destructed_sorted(&self) -> Vec<String> {
            let mut destructed = self.destructed();
            destructed.sort();
            destructed
        }
    }

    fn k(key: &str) -> String {
        key.to_string()
    }

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|key| key.to_string()).collect()
    }

    /// Pool recording every construction and destruction.
    /// Constructing `"bad"` fails; destroying `fail_destroy` fails.
    fn tracked_pool(fail_destroy: Option<&'static str>) -> (TestPool, Journal, ManualClock) {
        let journal = Journal::default();
        let clock = ManualClock::new();

        let constructed = Arc::clone(&journal.constructed);
        let destructed = Arc::clone(&journal.destructed);

        let pool = ExpiringPool::new(
            move |key: &String| {
                if key == "bad" {
                    return Err(TestError("refused".to_string()));
                }
                constructed.lock().push(key.clone());
                Ok(key.clone())
            },
            PoolConfiguration::default(),
        )
        .with_destructor(move |value: String| {
            if Some(value.as_str()) == fail_destroy {
                return Err(TestError(format!("cannot close {value}")));
            }
            destructed.lock().push(value);
            Ok(())
        })
        .with_clock(clock.clone());

        (pool, journal, clock)
    }

    #[test]
    fn test_acquire_release_lifecycle() {
        let (pool, journal, clock) = tracked_pool(None);

        assert_eq!(pool.acquire(&k("key1")).unwrap(), "key1");
        assert_eq!(journal.constructed(), keys(&["key1"]));

        pool.release(&k("key1"), Duration::from_secs(3600));
        assert_eq!(pool.acquire(&k("key1")).unwrap(), "key1");
        assert_eq!(journal.constructed(), keys(&["key1"]));
        assert!(journal.destructed().is_empty());

        pool.release(&k("key1"), Duration::from_secs(3600));
        clock.advance(Duration::from_secs(3660));

        assert_eq!(pool.acquire(&k("key2")).unwrap(), "key2");
        assert_eq!(journal.constructed(), keys(&["key1", "key2"]));
        assert_eq!(journal.destructed(), keys(&["key1"]));

        assert_eq!(pool.acquire(&k("key1")).unwrap(), "key1");
        assert_eq!(journal.constructed(), keys(&["key1", "key2", "key1"]));
        assert_eq!(journal.destructed(), keys(&["key1"]));

        assert_eq!(pool.clear().unwrap(), 2);
        assert_eq!(journal.destructed_sorted(), keys(&["key1", "key1", "key2"]));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_release_unknown_key_is_noop() {
        let (pool, journal, _clock) = tracked_pool(None);

        pool.release(&k("unknown key"), Duration::from_secs(60));

        assert!(journal.constructed().is_empty());
        assert!(journal.destructed().is_empty());
        assert!(pool.is_empty());
        assert_eq!(pool.get_metrics().total_released, 0);
    }

    #[test]
    fn test_extra_release_does_not_go_negative() {
        let (pool, _journal, _clock) = tracked_pool(None);

        pool.acquire(&k("key1")).unwrap();
        pool.release(&k("key1"), Duration::from_secs(60));
        pool.release(&k("key1"), Duration::from_secs(1));

        assert_eq!(pool.ref_count(&k("key1")), Some(0));
        assert_eq!(pool.idle_len(), 1);
        assert_eq!(pool.time_until_expiry(&k("key1")), Some(Duration::from_secs(60)));
        pool.assert_consistent();
    }

    #[test]
    fn test_entry_stays_active_until_last_release() {
        let (pool, _journal, _clock) = tracked_pool(None);

        pool.acquire(&k("key1")).unwrap();
        pool.acquire(&k("key1")).unwrap();
        assert_eq!(pool.ref_count(&k("key1")), Some(2));

        pool.release(&k("key1"), Duration::from_secs(60));
        assert_eq!(pool.idle_len(), 0);
        assert_eq!(pool.time_until_expiry(&k("key1")), None);

        pool.release(&k("key1"), Duration::from_secs(60));
        assert_eq!(pool.idle_len(), 1);
        pool.assert_consistent();
    }

    #[test]
    fn test_clear_destroys_in_use_and_idle() {
        let (pool, journal, _clock) = tracked_pool(None);

        pool.acquire(&k("key1")).unwrap();
        pool.acquire(&k("key2")).unwrap();
        pool.release(&k("key1"), Duration::from_secs(3600));

        assert_eq!(pool.clear().unwrap(), 2);
        assert_eq!(journal.constructed(), keys(&["key1", "key2"]));
        assert_eq!(journal.destructed_sorted(), keys(&["key1", "key2"]));
        assert!(pool.is_empty());
        assert_eq!(pool.idle_len(), 0);
    }

    #[test]
    fn test_prune_follows_deadline_order() {
        let (pool, journal, clock) = tracked_pool(None);

        for key in ["key1", "key2", "key3"] {
            pool.acquire(&k(key)).unwrap();
        }

        pool.release(&k("key1"), Duration::from_secs(3600));
        pool.release(&k("key2"), Duration::from_secs(60));
        pool.release(&k("key3"), Duration::from_secs(600));
        assert!(journal.destructed().is_empty());

        clock.advance(Duration::from_secs(120));
        assert_eq!(pool.prune().unwrap(), 1);
        assert_eq!(journal.destructed(), keys(&["key2"]));

        clock.advance(Duration::from_secs(3600));
        assert_eq!(pool.prune().unwrap(), 2);
        assert_eq!(journal.destructed(), keys(&["key2", "key3", "key1"]));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_prune_is_idempotent() {
        let (pool, journal, clock) = tracked_pool(None);

        pool.acquire(&k("key1")).unwrap();
        pool.acquire(&k("key2")).unwrap();
        pool.release(&k("key1"), Duration::from_secs(10));
        pool.release(&k("key2"), Duration::from_secs(100));

        clock.advance(Duration::from_secs(50));
        assert_eq!(pool.prune().unwrap(), 1);
        assert_eq!(pool.prune().unwrap(), 0);
        assert_eq!(journal.destructed(), keys(&["key1"]));
    }

    #[test]
    fn test_deadline_is_inclusive() {
        let (pool, journal, clock) = tracked_pool(None);

        pool.acquire(&k("key1")).unwrap();
        pool.release(&k("key1"), Duration::from_secs(60));

        clock.advance(Duration::from_secs(59));
        assert_eq!(pool.prune().unwrap(), 0);

        clock.advance(Duration::from_secs(1));
        assert_eq!(pool.prune().unwrap(), 1);
        assert_eq!(journal.destructed(), keys(&["key1"]));
    }

    #[test]
    fn test_reacquire_revives_idle_entry() {
        let (pool, journal, clock) = tracked_pool(None);

        pool.acquire(&k("key1")).unwrap();
        pool.acquire(&k("key2")).unwrap();
        pool.release(&k("key1"), Duration::from_secs(60));
        pool.release(&k("key2"), Duration::from_secs(90));

        clock.advance(Duration::from_secs(30));
        assert_eq!(pool.acquire(&k("key1")).unwrap(), "key1");
        assert_eq!(journal.constructed(), keys(&["key1", "key2"]));
        assert_eq!(pool.ref_count(&k("key1")), Some(1));
        assert_eq!(pool.idle_len(), 1);
        pool.assert_consistent();

        clock.advance(Duration::from_secs(600));
        assert_eq!(pool.prune().unwrap(), 1);
        assert_eq!(journal.destructed(), keys(&["key2"]));
        assert!(pool.contains_key(&k("key1")));
    }

    #[test]
    fn test_acquire_after_eviction_constructs_fresh_value() {
        let (pool, journal, clock) = tracked_pool(None);

        pool.acquire(&k("key1")).unwrap();
        pool.release(&k("key1"), Duration::from_secs(5));
        clock.advance(Duration::from_secs(5));
        pool.prune().unwrap();

        assert_eq!(pool.acquire(&k("key1")).unwrap(), "key1");
        assert_eq!(journal.constructed(), keys(&["key1", "key1"]));
        assert_eq!(pool.ref_count(&k("key1")), Some(1));
    }

    #[test]
    fn test_construction_failure_leaves_no_entry() {
        let (pool, journal, _clock) = tracked_pool(None);

        let err = pool.acquire(&k("bad")).unwrap_err();
        assert!(err.is_construction());
        assert_eq!(err.callback_error(), &TestError("refused".to_string()));

        assert!(!pool.contains_key(&k("bad")));
        assert!(journal.destructed().is_empty());
        assert_eq!(pool.get_metrics().construction_failures, 1);
        assert_eq!(pool.get_metrics().total_acquired, 0);
    }

    #[test]
    fn test_destructor_failure_halts_prune() {
        let (pool, journal, clock) = tracked_pool(Some("b"));

        for (key, secs) in [("a", 60), ("b", 120), ("c", 180)] {
            pool.acquire(&k(key)).unwrap();
            pool.release(&k(key), Duration::from_secs(secs));
        }

        clock.advance(Duration::from_secs(300));
        let err = pool.prune().unwrap_err();
        assert_eq!(err.key(), Some(&k("b")));
        assert_eq!(journal.destructed(), keys(&["a"]));
        assert!(!pool.contains_key(&k("b")));
        assert!(pool.contains_key(&k("c")));
        assert_eq!(pool.idle_len(), 1);
        pool.assert_consistent();

        assert_eq!(pool.prune().unwrap(), 1);
        assert_eq!(journal.destructed(), keys(&["a", "c"]));
        assert_eq!(pool.get_metrics().destruction_failures, 1);
    }

    #[test]
    fn test_destructor_failure_surfaces_through_acquire() {
        let (pool, journal, clock) = tracked_pool(Some("old"));

        pool.acquire(&k("old")).unwrap();
        pool.release(&k("old"), Duration::from_secs(1));
        clock.advance(Duration::from_secs(2));

        let err = pool.acquire(&k("new")).unwrap_err();
        assert!(err.is_destruction());
        assert_eq!(err.key(), Some(&k("old")));
        assert!(!pool.contains_key(&k("new")));
        assert_eq!(journal.constructed(), keys(&["old"]));

        assert_eq!(pool.acquire(&k("new")).unwrap(), "new");
        assert_eq!(journal.constructed(), keys(&["old", "new"]));
    }

    #[test]
    fn test_clear_failure_reports_key_and_stops() {
        let (pool, journal, _clock) = tracked_pool(Some("b"));

        for key in ["a", "b", "c"] {
            pool.acquire(&k(key)).unwrap();
        }

        let err = pool.clear().unwrap_err();
        assert_eq!(err.key(), Some(&k("b")));
        assert!(!pool.contains_key(&k("b")));
        assert_eq!(journal.destructed().len() + pool.len(), 2);

        let remaining = pool.len();
        assert_eq!(pool.clear().unwrap(), remaining);
        assert!(pool.is_empty());
        assert_eq!(journal.destructed_sorted(), keys(&["a", "c"]));
    }

    #[test]
    fn test_pooled_value_releases_with_default_ttl() {
        let clock = ManualClock::new();
        let config = PoolConfiguration::new().with_default_ttl(Duration::from_secs(15));
        let pool: ExpiringPool<u32, Arc<String>, TestError> =
            ExpiringPool::new(|id: &u32| Ok(Arc::new(format!("session-{id}"))), config)
                .with_clock(clock.clone());

        {
            let session = pool.acquire_pooled(&7).unwrap();
            assert_eq!(session.as_str(), "session-7");
            assert_eq!(*session.key(), 7);
            assert_eq!(pool.idle_len(), 0);
        }
        assert_eq!(pool.time_until_expiry(&7), Some(Duration::from_secs(15)));

        {
            let mut session = pool.acquire_pooled(&7).unwrap();
            session.set_ttl(Duration::from_secs(1));
        }
        clock.advance(Duration::from_secs(1));
        assert_eq!(pool.prune().unwrap(), 1);
    }

    #[test]
    fn test_slots_are_reused_after_eviction() {
        let (pool, _journal, clock) = tracked_pool(None);

        for round in 0..5u64 {
            for i in 0..20u64 {
                let key = format!("r{round}-{i}");
                pool.acquire(&key).unwrap();
                pool.release(&key, Duration::from_secs(i + 1));
            }
            pool.assert_consistent();
            clock.advance(Duration::from_secs(10));
            // Later rounds also expire the longer-lived half of the previous round.
            let expected = if round == 0 { 10 } else { 20 };
            assert_eq!(pool.prune().unwrap(), expected);
            pool.assert_consistent();
        }

        assert!(pool.state.lock().slots.len() <= 30);
    }

    #[test]
    fn test_metrics_reflect_activity() {
        let (pool, _journal, clock) = tracked_pool(None);

        pool.acquire(&k("key1")).unwrap();
        pool.acquire(&k("key1")).unwrap();
        pool.acquire(&k("key2")).unwrap();
        pool.release(&k("key2"), Duration::from_secs(1));

        let metrics = pool.get_metrics();
        assert_eq!(metrics.total_acquired, 3);
        assert_eq!(metrics.total_constructed, 2);
        assert_eq!(metrics.tracked_entries, 2);
        assert_eq!(metrics.idle_entries, 1);
        assert_eq!(metrics.active_entries(), 1);

        clock.advance(Duration::from_secs(1));
        pool.prune().unwrap();
        assert_eq!(pool.export_metrics().get("total_destroyed").map(String::as_str), Some("1"));
        assert!(pool.export_metrics_prometheus("test", None).contains("expiringpool_entries_tracked{pool=\"test\"} 1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_release() {
        let (pool, journal, _clock) = tracked_pool(None);
        let pool = Arc::new(pool);

        let mut handles = vec![];
        for task in 0..8usize {
            let pool = Arc::clone(&pool);
            handles.push(tokio::task::spawn_blocking(move || {
                for i in 0..500usize {
                    let key = format!("key{}", (task + i) % 4);
                    let value = pool.acquire(&key).unwrap();
                    assert_eq!(value, key);
                    pool.release(&key, Duration::from_secs(60));
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let mut constructed = journal.constructed();
        constructed.sort();
        assert_eq!(constructed, keys(&["key0", "key1", "key2", "key3"]));
        assert_eq!(pool.idle_len(), 4);
        for i in 0..4 {
            assert_eq!(pool.ref_count(&format!("key{i}")), Some(0));
        }
        pool.assert_consistent();
    }
}
