//! Concurrency-safe pool of [`RuntimeHandle`]s.
//!
//! ## Acquire policy
//!
//! 1. Hand out any idle handle (no ordering guarantee).
//! 2. Otherwise, if fewer than `max_handles` exist, initialise a new one.
//!    Initialisation runs outside the lock; a failure gives the slot back.
//! 3. Otherwise wait for a release, up to `acquire_timeout`, then fail with
//!    [`ConvertError::PoolExhausted`]. Acquire never blocks indefinitely.
//!
//! A checked-out handle is owned by its [`PooledHandle`] guard and returns to
//! the pool when the guard drops, so one in-flight call maps to exactly one
//! handle and no handle is ever shared between two callers.
//!
//! ## Drain policy
//!
//! [`HandlePool::drain`] closes the pool (new acquires fail with
//! [`ConvertError::ShuttingDown`]), waits up to a grace period for
//! checked-out handles to come back, then cleans every idle handle. A handle
//! still in flight after the grace period is never cleaned underneath its
//! caller: it is cleaned when its guard drops. The runtime is torn down once,
//! when the last live handle is gone.

use crate::config::ConverterConfig;
use crate::error::ConvertError;
use crate::handle::{HandleId, RuntimeHandle};
use crate::runtime::ForeignRuntime;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

struct PoolState<R: ForeignRuntime> {
    idle: Vec<RuntimeHandle<R>>,
    checked_out: HashSet<HandleId>,
    /// Handles alive or being initialised.
    created: usize,
    closed: bool,
}

/// Outcome of [`HandlePool::drain`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DrainReport {
    /// Idle handles cleaned by the drain itself.
    pub cleaned: usize,
    /// Handles still checked out when the grace period ended; each is
    /// cleaned on release.
    pub in_flight: usize,
    /// Time spent waiting for in-flight handles.
    pub waited_ms: u64,
    /// `false` when the pool had already been drained.
    pub first_drain: bool,
}

/// A pool of runtime handles sharing one [`ForeignRuntime`].
pub struct HandlePool<R: ForeignRuntime> {
    runtime: Arc<R>,
    config: ConverterConfig,
    state: Mutex<PoolState<R>>,
    released: Condvar,
    next_id: AtomicU64,
    acquisitions: AtomicUsize,
    torn_down: AtomicBool,
}

impl<R: ForeignRuntime> HandlePool<R> {
    pub fn new(runtime: Arc<R>, config: ConverterConfig) -> Self {
        Self {
            runtime,
            config,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                checked_out: HashSet::new(),
                created: 0,
                closed: false,
            }),
            released: Condvar::new(),
            next_id: AtomicU64::new(1),
            acquisitions: AtomicUsize::new(0),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check out a handle. See the module docs for the blocking policy.
    pub fn acquire(&self) -> Result<PooledHandle<'_, R>, ConvertError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let timeout = self.config.acquire_timeout();
        let started = Instant::now();
        let mut state = self.lock();

        loop {
            if state.closed {
                return Err(ConvertError::ShuttingDown);
            }

            if let Some(handle) = state.idle.pop() {
                state.checked_out.insert(handle.id());
                debug!("Acquired idle handle {}", handle.id());
                return Ok(PooledHandle::new(self, handle));
            }

            if state.created < self.config.max_handles {
                state.created += 1;
                drop(state);
                return self.create_checked_out();
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                warn!(
                    "Pool exhausted: {} handles busy for {}ms",
                    self.config.max_handles,
                    elapsed.as_millis()
                );
                return Err(ConvertError::PoolExhausted {
                    waited_ms: elapsed.as_millis() as u64,
                    max_handles: self.config.max_handles,
                });
            }
            state = self
                .released
                .wait_timeout(state, timeout - elapsed)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Initialise a handle for a slot already reserved in `created`.
    fn create_checked_out(&self) -> Result<PooledHandle<'_, R>, ConvertError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let result = RuntimeHandle::initialize(Arc::clone(&self.runtime), &self.config, id);

        let mut state = self.lock();
        match result {
            Ok(mut handle) if state.closed => {
                state.created -= 1;
                let last = state.created == 0;
                drop(state);
                handle.cleanup();
                if last {
                    self.teardown_once();
                }
                Err(ConvertError::ShuttingDown)
            }
            Ok(handle) => {
                state.checked_out.insert(id);
                info!("Created runtime handle {} ({} live)", id, state.created);
                Ok(PooledHandle::new(self, handle))
            }
            Err(e) => {
                state.created -= 1;
                drop(state);
                self.released.notify_one();
                warn!("Runtime handle initialisation failed: {}", e);
                Err(e)
            }
        }
    }

    /// Return a handle. Called by [`PooledHandle`] on drop.
    fn release(&self, mut handle: RuntimeHandle<R>) {
        let mut state = self.lock();
        state.checked_out.remove(&handle.id());

        if state.closed {
            state.created -= 1;
            let last = state.created == 0;
            drop(state);
            handle.cleanup();
            debug!("Handle {} cleaned on release after shutdown", handle.id());
            self.released.notify_all();
            if last {
                self.teardown_once();
            }
            return;
        }

        debug!("Released handle {}", handle.id());
        state.idle.push(handle);
        drop(state);
        self.released.notify_all();
    }

    /// Initialise handles until `n` exist, surfacing the first error.
    pub fn prewarm(&self, n: usize) -> Result<(), ConvertError> {
        let n = n.min(self.config.max_handles);
        let mut warm = Vec::with_capacity(n);
        while self.created_count() < n {
            warm.push(self.acquire()?);
        }
        info!("Pre-warmed {} runtime handle(s)", self.created_count());
        Ok(())
    }

    /// Close the pool and clean every handle. Runs at most once; later calls
    /// return a report with `first_drain = false`.
    pub fn drain(&self, grace: Duration) -> DrainReport {
        let started = Instant::now();
        let mut state = self.lock();
        if state.closed {
            return DrainReport::default();
        }
        state.closed = true;
        self.released.notify_all();

        while !state.checked_out.is_empty() {
            let elapsed = started.elapsed();
            if elapsed >= grace {
                break;
            }
            state = self
                .released
                .wait_timeout(state, grace - elapsed)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        let idle = std::mem::take(&mut state.idle);
        state.created -= idle.len();
        // Includes handles still initialising, not just checked-out ones.
        let in_flight = state.created;
        let nothing_left = in_flight == 0;
        drop(state);

        let cleaned = idle.len();
        for mut handle in idle {
            handle.cleanup();
        }

        if nothing_left {
            self.teardown_once();
        } else {
            warn!(
                "{} handle(s) still in flight after {}ms grace; they will be cleaned on release",
                in_flight,
                grace.as_millis()
            );
        }

        let report = DrainReport {
            cleaned,
            in_flight,
            waited_ms: started.elapsed().as_millis() as u64,
            first_drain: true,
        };
        info!(
            "Pool drained: {} cleaned, {} in flight",
            report.cleaned, report.in_flight
        );
        report
    }

    fn teardown_once(&self) {
        if !self.torn_down.swap(true, Ordering::SeqCst) {
            self.runtime.teardown();
        }
    }

    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    pub fn checked_out_count(&self) -> usize {
        self.lock().checked_out.len()
    }

    /// Ids of the handles currently checked out.
    pub fn checked_out_ids(&self) -> Vec<HandleId> {
        self.lock().checked_out.iter().copied().collect()
    }

    pub fn created_count(&self) -> usize {
        self.lock().created
    }

    /// Number of `acquire` calls made so far, successful or not.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// A checked-out handle. Dropping it returns the handle to its pool.
pub struct PooledHandle<'a, R: ForeignRuntime> {
    pool: &'a HandlePool<R>,
    handle: Option<RuntimeHandle<R>>,
}

impl<'a, R: ForeignRuntime> PooledHandle<'a, R> {
    fn new(pool: &'a HandlePool<R>, handle: RuntimeHandle<R>) -> Self {
        Self {
            pool,
            handle: Some(handle),
        }
    }

    /// Return the handle now rather than at end of scope.
    pub fn release(self) {}
}

impl<R: ForeignRuntime> Deref for PooledHandle<'_, R> {
    type Target = RuntimeHandle<R>;

    fn deref(&self) -> &RuntimeHandle<R> {
        // Only `Drop` takes the handle out.
        self.handle.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<R: ForeignRuntime> Drop for PooledHandle<'_, R> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::FakeRuntime;
    use crate::error::InitStage;
    use std::sync::Barrier;

    fn pool(max_handles: usize, timeout_secs: u64) -> (Arc<FakeRuntime>, HandlePool<FakeRuntime>) {
        let rt = Arc::new(FakeRuntime::new());
        let config = ConverterConfig::builder()
            .max_handles(max_handles)
            .acquire_timeout_secs(timeout_secs)
            .build()
            .unwrap();
        (Arc::clone(&rt), HandlePool::new(rt, config))
    }

    #[test]
    fn handles_are_created_lazily_and_reused() {
        let (rt, pool) = pool(2, 1);
        assert_eq!(pool.created_count(), 0);
        assert_eq!(rt.imports(), 0);

        let first_id = pool.acquire().unwrap().id();
        assert_eq!(pool.created_count(), 1);
        assert_eq!(pool.idle_count(), 1);

        let second_id = pool.acquire().unwrap().id();
        assert_eq!(first_id, second_id);
        assert_eq!(rt.imports(), 1);
    }

    #[test]
    fn exhausted_pool_times_out() {
        let (_rt, pool) = pool(1, 0);
        let _held = pool.acquire().unwrap();
        let second = pool.acquire().map(|h| h.id());
        match second {
            Err(ConvertError::PoolExhausted { max_handles, .. }) => assert_eq!(max_handles, 1),
            other => panic!("expected PoolExhausted, got {:?}", other),
        }
    }

    #[test]
    fn waiter_gets_released_handle() {
        let (_rt, pool) = pool(1, 5);
        let pool = Arc::new(pool);
        let held = pool.acquire().unwrap();
        let held_id = held.id();

        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.acquire().map(|h| h.id()))
        };
        std::thread::sleep(Duration::from_millis(50));
        held.release();

        assert_eq!(waiter.join().unwrap().unwrap(), held_id);
    }

    #[test]
    fn concurrent_callers_never_share_a_handle() {
        const THREADS: usize = 8;
        let (_rt, pool) = pool(3, 10);
        let pool = Arc::new(pool);
        let in_use = Arc::new(Mutex::new(HashSet::new()));
        let barrier = Arc::new(Barrier::new(THREADS));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let in_use = Arc::clone(&in_use);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..20 {
                        let handle = pool.acquire().unwrap();
                        assert!(
                            in_use.lock().unwrap().insert(handle.id()),
                            "handle {} handed out twice",
                            handle.id()
                        );
                        std::thread::sleep(Duration::from_micros(200));
                        in_use.lock().unwrap().remove(&handle.id());
                    }
                })
            })
            .collect();

        for w in workers {
            w.join().unwrap();
        }
        assert!(pool.created_count() <= 3);
        assert_eq!(pool.checked_out_count(), 0);
        assert_eq!(pool.idle_count(), pool.created_count());
    }

    #[test]
    fn failed_initialisation_returns_the_slot() {
        let (rt, pool) = pool(1, 0);
        rt.fail_init(Some(InitStage::ModuleImport));
        assert!(matches!(
            pool.acquire(),
            Err(ConvertError::Initialization { .. })
        ));
        assert_eq!(pool.created_count(), 0);

        rt.fail_init(None);
        assert!(pool.acquire().is_ok());
        assert_eq!(rt.live_objects(), 2);
    }

    #[test]
    fn drain_cleans_idle_handles_and_closes() {
        let (rt, pool) = pool(2, 1);
        pool.prewarm(2).unwrap();
        assert_eq!(pool.idle_count(), 2);

        let report = pool.drain(Duration::from_millis(10));
        assert_eq!(report.cleaned, 2);
        assert_eq!(report.in_flight, 0);
        assert!(report.first_drain);
        assert_eq!(rt.live_objects(), 0);
        assert_eq!(rt.teardowns(), 1);
        assert!(matches!(pool.acquire(), Err(ConvertError::ShuttingDown)));

        let again = pool.drain(Duration::ZERO);
        assert!(!again.first_drain);
        assert_eq!(rt.teardowns(), 1);
    }

    #[test]
    fn straggler_is_cleaned_on_release() {
        let (rt, pool) = pool(1, 1);
        let held = pool.acquire().unwrap();

        let report = pool.drain(Duration::from_millis(20));
        assert_eq!(report.in_flight, 1);
        assert_eq!(rt.teardowns(), 0, "runtime must outlive in-flight handles");
        assert!(held.is_initialized());

        held.release();
        assert_eq!(pool.created_count(), 0);
        assert_eq!(rt.live_objects(), 0);
        assert_eq!(rt.teardowns(), 1);
    }

    #[test]
    fn drain_waits_for_in_flight_release() {
        let (rt, pool) = pool(1, 1);
        let held = pool.acquire().unwrap();

        let report = std::thread::scope(|s| {
            s.spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                held.release();
            });
            pool.drain(Duration::from_secs(5))
        });

        // The pool was already closed when the handle came back, so the
        // release itself cleaned it.
        assert_eq!(report.in_flight, 0);
        assert_eq!(report.cleaned, 0);
        assert_eq!(pool.created_count(), 0);
        assert_eq!(rt.live_objects(), 0);
        assert_eq!(rt.teardowns(), 1);
    }
}
