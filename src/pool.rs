//! Generic bounded object pool.
//!
//! `Pool<F>` hands out objects produced by an [`ObjectFactory`], validating
//! them on the way out and back in, and keeps at most `max_total` of them
//! alive. Capacity is a Tokio semaphore with `max_total` permits: every object
//! that is not sitting in the idle queue is covered by a permit (held by a
//! borrower, a returning guard or the evictor), so a permit holder that finds
//! the idle queue empty can always create a new object.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::PoolConfig;
use crate::error::{FtpError, Result};

/// Lifecycle authority for pooled objects
#[async_trait]
pub trait ObjectFactory: Send + Sync + 'static {
    type Object: Send + 'static;

    /// Produce a new, ready to use object
    async fn create(&self) -> Result<Self::Object>;

    /// Tear an object down. Must not fail outward.
    async fn destroy(&self, object: Self::Object);

    /// Health check; false means the object must not be handed out again
    async fn validate(&self, object: &mut Self::Object) -> bool;

    /// Cheap local check run on every return
    fn is_broken(&self, _object: &Self::Object) -> bool {
        false
    }
}

/// An object plus the pool's bookkeeping about it.
struct Slot<T> {
    object: T,
    id: u64,
    created_at: Instant,
    last_returned: Instant,
    borrow_count: u64,
}

impl<T> Slot<T> {
    fn new(object: T, id: u64) -> Self {
        let now = Instant::now();
        Self {
            object,
            id,
            created_at: now,
            last_returned: now,
            borrow_count: 0,
        }
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects ever created.
    pub created: u64,
    /// Objects ever destroyed.
    pub destroyed: u64,
    /// Successful borrows.
    pub borrowed: u64,
    /// Returns, explicit or through drop.
    pub returned: u64,
    /// Objects discarded because a health check failed.
    pub validation_failures: u64,
    /// Objects currently borrowed.
    pub active: usize,
    /// Objects currently idle.
    pub idle: usize,
}

struct PoolState<T> {
    idle: VecDeque<Slot<T>>,
    /// Live objects: idle, borrowed, or held by an in-flight create/validate/destroy
    total: usize,
    active: usize,
    closed: bool,
    stats: PoolStats,
}

/// One live object that is neither idle nor borrowed, plus the permit covering it.
///
/// `total` already counts the object. Dropping an armed guard gives that
/// capacity back, and an object still inside is destroyed on a spawned task
/// first, so a borrow, return or shutdown future cancelled halfway through
/// create, validate or destroy still tears its object down.
struct InFlight<F: ObjectFactory> {
    inner: Arc<PoolInner<F>>,
    slot: Option<Slot<F::Object>>,
    permit: Option<OwnedSemaphorePermit>,
    armed: bool,
}

impl<F: ObjectFactory> InFlight<F> {
    fn new(
        inner: &Arc<PoolInner<F>>,
        permit: Option<OwnedSemaphorePermit>,
        slot: Option<Slot<F::Object>>,
    ) -> Self {
        Self {
            inner: Arc::clone(inner),
            slot,
            permit,
            armed: true,
        }
    }

    fn hold(&mut self, slot: Slot<F::Object>) {
        self.slot = Some(slot);
    }

    fn id(&self) -> Option<u64> {
        self.slot.as_ref().map(|slot| slot.id)
    }

    fn is_broken(&self) -> bool {
        self.slot
            .as_ref()
            .is_some_and(|slot| self.inner.factory.is_broken(&slot.object))
    }

    async fn validate(&mut self) -> bool {
        match self.slot.as_mut() {
            Some(slot) => self.inner.validate(&mut slot.object).await,
            None => false,
        }
    }

    /// Destroys the object and gives its capacity back, returning the permit.
    async fn discard(mut self) -> Option<OwnedSemaphorePermit> {
        if let Some(slot) = self.slot.take() {
            self.inner.destroy(slot).await;
        }
        self.inner.release_capacity();
        self.armed = false;
        self.permit.take()
    }

    /// Moves the object into the idle queue, at `at` or by the LIFO setting.
    ///
    /// Refused while the pool is closed or already holds `limit` idle objects.
    fn park(mut self, at: Option<usize>, limit: usize) -> std::result::Result<(), Self> {
        {
            let mut state = self.inner.state.lock();
            if state.closed || state.idle.len() >= limit {
                drop(state);
                return Err(self);
            }
            let Some(slot) = self.slot.take() else {
                drop(state);
                return Err(self);
            };
            trace!(object_id = slot.id, "Object parked in idle queue");
            match at {
                Some(pos) => {
                    let pos = pos.min(state.idle.len());
                    state.idle.insert(pos, slot);
                }
                None => self.inner.idle_insert(&mut state, slot),
            }
        }
        self.armed = false;
        Ok(())
    }

    /// Hands the object to a borrower, unless the pool closed meanwhile.
    fn lend(mut self) -> std::result::Result<Pooled<F>, Self> {
        {
            let mut state = self.inner.state.lock();
            if state.closed || self.slot.is_none() {
                drop(state);
                return Err(self);
            }
            state.active += 1;
            state.stats.borrowed += 1;
        }
        self.armed = false;
        let mut slot = self.slot.take();
        if let Some(slot) = slot.as_mut() {
            slot.borrow_count += 1;
            debug!(
                object_id = slot.id,
                borrow_count = slot.borrow_count,
                "Borrowed pooled object"
            );
        }
        Ok(Pooled {
            slot,
            permit: self.permit.take(),
            inner: Arc::clone(&self.inner),
        })
    }
}

impl<F: ObjectFactory> Drop for InFlight<F> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let permit = self.permit.take();
        let Some(slot) = self.slot.take() else {
            self.inner.release_capacity();
            drop(permit);
            return;
        };

        let inner = Arc::clone(&self.inner);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(object_id = slot.id, "Destroying object abandoned mid-operation");
                drop(runtime.spawn(async move {
                    inner.destroy(slot).await;
                    inner.release_capacity();
                    drop(permit);
                }));
            }
            Err(_) => {
                warn!(object_id = slot.id, "Dropping object without teardown, no runtime available");
                drop(slot);
                inner.state.lock().stats.destroyed += 1;
                inner.release_capacity();
                drop(permit);
            }
        }
    }
}

struct PoolInner<F: ObjectFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Object>>,
    permits: Arc<Semaphore>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

/// Bounded, thread-safe pool of objects produced by `F`.
///
/// Cloning is cheap and every clone refers to the same pool.
pub struct Pool<F: ObjectFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ObjectFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ObjectFactory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: ObjectFactory> Pool<F> {
    /// Creates an empty pool.
    ///
    /// When `time_between_eviction_runs` is set the idle evictor is spawned
    /// on the current Tokio runtime.
    ///
    /// # Errors
    /// Returns [`FtpError::Config`] if `config` is invalid, or if eviction is
    /// enabled outside a Tokio runtime.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            max_total = config.max_total,
            max_idle = config.max_idle,
            min_idle = config.min_idle,
            max_wait = ?config.max_wait(),
            "Creating session pool"
        );

        let max_total = config.max_total;
        let eviction = config.time_between_eviction_runs();
        let inner = Arc::new(PoolInner {
            factory,
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(max_total),
                total: 0,
                active: 0,
                closed: false,
                stats: PoolStats::default(),
            }),
            permits: Arc::new(Semaphore::new(max_total)),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        });

        if let Some(period) = eviction {
            let runtime = tokio::runtime::Handle::try_current()
                .map_err(|_| FtpError::config("idle eviction requires a Tokio runtime"))?;
            runtime.spawn(run_evictor(
                Arc::downgrade(&inner),
                period,
                inner.shutdown.clone(),
            ));
        }

        Ok(Self { inner })
    }

    /// Borrows an object, waiting up to `max_wait` for capacity.
    ///
    /// Idle objects are preferred; a new one is created when none is left.
    /// Objects failing validation are destroyed and never handed out.
    ///
    /// # Errors
    /// - [`FtpError::PoolExhausted`] if no capacity frees up within
    ///   `max_wait`, or if `max_total` fresh objects in a row fail validation
    /// - [`FtpError::PoolClosed`] after [`shutdown`](Self::shutdown), including
    ///   one that lands while this borrow is creating or validating
    /// - any error returned by [`ObjectFactory::create`]
    pub async fn borrow(&self) -> Result<Pooled<F>> {
        let inner = &self.inner;
        let started = Instant::now();
        let mut spare = Some(inner.acquire_permit().await?);

        let mut fresh_failures = 0;
        loop {
            let permit = match spare.take() {
                Some(permit) => permit,
                None => inner.acquire_permit().await?,
            };
            let candidate = {
                let mut state = inner.state.lock();
                if state.closed {
                    return Err(FtpError::PoolClosed);
                }
                match state.idle.pop_front() {
                    Some(slot) => Some(slot),
                    None if state.total < inner.config.max_total => {
                        state.total += 1;
                        None
                    }
                    None => {
                        // Unreachable while every non-idle object holds a permit.
                        warn!(total = state.total, "Permit granted but pool is at capacity");
                        return Err(inner.exhausted(started));
                    }
                }
            };
            let fresh = candidate.is_none();
            let mut in_flight = InFlight::new(inner, Some(permit), candidate);

            if fresh {
                let object = inner.factory.create().await?;
                let slot = Slot::new(object, inner.next_id.fetch_add(1, Ordering::Relaxed));
                inner.state.lock().stats.created += 1;
                trace!(object_id = slot.id, "Created pooled object");
                in_flight.hold(slot);
            }

            if inner.config.test_on_borrow && !in_flight.validate().await {
                warn!(object_id = ?in_flight.id(), fresh, "Object failed validation on borrow, destroying");
                spare = in_flight.discard().await;
                if fresh {
                    fresh_failures += 1;
                    if fresh_failures >= inner.config.max_total {
                        return Err(inner.exhausted(started));
                    }
                }
                continue;
            }

            return match in_flight.lend() {
                Ok(pooled) => Ok(pooled),
                Err(in_flight) => {
                    debug!(object_id = ?in_flight.id(), "Pool closed during borrow, destroying object");
                    in_flight.discard().await;
                    Err(FtpError::PoolClosed)
                }
            };
        }
    }

    /// Returns an object to its pool.
    ///
    /// Total over its input: `None` is a no-op, and a guard always goes back
    /// to the pool that issued it. Never fails.
    pub async fn release(&self, pooled: Option<Pooled<F>>) {
        match pooled {
            Some(pooled) => pooled.release().await,
            None => trace!("Release called without an object"),
        }
    }

    /// Fills the idle queue up to `min_idle`, returning how many objects were created.
    ///
    /// # Errors
    /// Propagates the first [`ObjectFactory::create`] failure.
    pub async fn prepare(&self) -> Result<usize> {
        self.inner.ensure_min_idle().await
    }

    /// Runs one eviction pass over the idle queue, then refills it to `min_idle`.
    pub async fn evict(&self) {
        self.inner.evict().await;
        if let Err(e) = self.inner.ensure_min_idle().await {
            warn!(error = %e, "Failed to refill idle objects");
        }
    }

    /// Closes the pool and destroys every idle object.
    ///
    /// Blocked and future borrows fail with [`FtpError::PoolClosed`]; objects
    /// still borrowed are destroyed when they are returned.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let drained: Vec<_> = {
            let mut state = inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.idle.drain(..).collect()
        };
        inner.shutdown.cancel();
        inner.permits.close();
        info!(idle = drained.len(), "Shutting down session pool");

        futures::future::join_all(
            drained
                .into_iter()
                .map(|slot| InFlight::new(inner, None, Some(slot)).discard()),
        )
        .await;
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            active: state.active,
            idle: state.idle.len(),
            ..state.stats.clone()
        }
    }

    pub fn num_idle(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    pub fn num_active(&self) -> usize {
        self.inner.state.lock().active
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn factory(&self) -> &F {
        &self.inner.factory
    }
}

impl<F: ObjectFactory> PoolInner<F> {
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        let acquire = Arc::clone(&self.permits).acquire_owned();
        let permit = match self.config.max_wait() {
            Some(wait) => tokio::time::timeout(wait, acquire).await.map_err(|_| {
                debug!(waited = ?wait, "Timed out waiting for a pooled object");
                FtpError::PoolExhausted {
                    max_total: self.config.max_total,
                    waited: wait,
                }
            })?,
            None => acquire.await,
        };
        permit.map_err(|_| FtpError::PoolClosed)
    }

    fn exhausted(&self, started: Instant) -> FtpError {
        FtpError::PoolExhausted {
            max_total: self.config.max_total,
            waited: started.elapsed(),
        }
    }

    async fn validate(&self, object: &mut F::Object) -> bool {
        let valid = self.factory.validate(object).await;
        if !valid {
            self.state.lock().stats.validation_failures += 1;
        }
        valid
    }

    /// The counterpart of every `total += 1`.
    fn release_capacity(&self) {
        let mut state = self.state.lock();
        state.total = state.total.saturating_sub(1);
    }

    /// Destroys the object. The caller's guard gives back the capacity.
    async fn destroy(&self, slot: Slot<F::Object>) {
        trace!(
            object_id = slot.id,
            age = ?slot.created_at.elapsed(),
            "Destroying pooled object"
        );
        self.factory.destroy(slot.object).await;
        self.state.lock().stats.destroyed += 1;
    }

    fn idle_insert(&self, state: &mut PoolState<F::Object>, slot: Slot<F::Object>) {
        if self.config.lifo {
            state.idle.push_front(slot);
        } else {
            state.idle.push_back(slot);
        }
    }

    async fn check_in(self: &Arc<Self>, mut slot: Slot<F::Object>, permit: OwnedSemaphorePermit) {
        let closed = {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
            state.stats.returned += 1;
            state.closed
        };
        slot.last_returned = Instant::now();
        let object_id = slot.id;
        let mut in_flight = InFlight::new(self, Some(permit), Some(slot));

        let keep = if closed {
            debug!(object_id, "Pool closed, destroying returned object");
            false
        } else if in_flight.is_broken() {
            warn!(object_id, "Returned object is broken, destroying");
            false
        } else if self.config.test_on_return && !in_flight.validate().await {
            warn!(object_id, "Returned object failed validation, destroying");
            false
        } else {
            true
        };

        if keep {
            if let Err(in_flight) = in_flight.park(None, self.config.effective_max_idle()) {
                in_flight.discard().await;
            }
        } else {
            in_flight.discard().await;
        }
    }

    /// Return path for guards dropped outside a Tokio runtime. No async
    /// teardown is possible here, so rejected objects are simply dropped.
    fn check_in_detached(self: &Arc<Self>, mut slot: Slot<F::Object>, permit: OwnedSemaphorePermit) {
        let closed = {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
            state.stats.returned += 1;
            state.closed
        };
        slot.last_returned = Instant::now();
        let in_flight = InFlight::new(self, Some(permit), Some(slot));
        if !closed && !in_flight.is_broken() {
            // A refused park hands the guard back; dropping it discards the object.
            let _ = in_flight.park(None, self.config.effective_max_idle());
        }
    }

    async fn evict(self: &Arc<Self>) {
        let ids: Vec<u64> = self.state.lock().idle.iter().map(|slot| slot.id).collect();
        let max_idle_age = self.config.min_evictable_idle_time();
        let mut evicted = 0;

        for id in ids {
            // A missing permit means every other object is borrowed; try again next run.
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };
            let taken = {
                let mut state = self.state.lock();
                if state.closed {
                    break;
                }
                let pos = state.idle.iter().position(|slot| slot.id == id);
                pos.and_then(|pos| state.idle.remove(pos).map(|slot| (pos, slot)))
            };
            let Some((pos, slot)) = taken else {
                continue;
            };
            let idle_for = slot.last_returned.elapsed();
            let mut in_flight = InFlight::new(self, Some(permit), Some(slot));

            let keep = if max_idle_age.is_some_and(|limit| idle_for > limit) {
                debug!(object_id = id, idle_for = ?idle_for, "Evicting expired idle object");
                false
            } else if self.config.test_while_idle && !in_flight.validate().await {
                warn!(object_id = id, "Idle object failed validation, evicting");
                false
            } else {
                true
            };

            let rejected = if keep {
                in_flight.park(Some(pos), usize::MAX).err()
            } else {
                Some(in_flight)
            };
            if let Some(in_flight) = rejected {
                in_flight.discard().await;
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!(evicted, "Eviction run complete");
        }
    }

    async fn ensure_min_idle(self: &Arc<Self>) -> Result<usize> {
        let target = self.config.effective_min_idle();
        let mut created = 0;

        while let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() {
            let reserved = {
                let mut state = self.state.lock();
                if state.closed || state.idle.len() >= target || state.total >= self.config.max_total
                {
                    false
                } else {
                    state.total += 1;
                    true
                }
            };
            if !reserved {
                break;
            }
            let mut in_flight = InFlight::new(self, Some(permit), None);

            let object = self.factory.create().await?;
            in_flight.hold(Slot::new(object, self.next_id.fetch_add(1, Ordering::Relaxed)));
            self.state.lock().stats.created += 1;
            if let Err(in_flight) = in_flight.park(None, usize::MAX) {
                in_flight.discard().await;
                break;
            }
            created += 1;
        }

        if created > 0 {
            debug!(created, "Filled idle queue towards min_idle");
        }
        Ok(created)
    }
}

async fn run_evictor<F: ObjectFactory>(
    pool: Weak<PoolInner<F>>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = pool.upgrade() else {
                    break;
                };
                inner.evict().await;
                if let Err(e) = inner.ensure_min_idle().await {
                    warn!(error = %e, "Failed to refill idle objects");
                }
            }
        }
    }
    debug!("Idle evictor stopped");
}

/// An object borrowed from a [`Pool`].
///
/// Derefs to the object. Give it back with [`Pooled::release`] or
/// [`Pool::release`]; a guard that is simply dropped is returned on a
/// spawned task.
pub struct Pooled<F: ObjectFactory> {
    slot: Option<Slot<F::Object>>,
    permit: Option<OwnedSemaphorePermit>,
    inner: Arc<PoolInner<F>>,
}

impl<F: ObjectFactory> Pooled<F> {
    /// Pool-assigned identifier, unique within the issuing pool
    pub fn id(&self) -> u64 {
        self.slot().id
    }

    /// How many times this object has been borrowed, this borrow included
    pub fn borrow_count(&self) -> u64 {
        self.slot().borrow_count
    }

    /// Returns the object to the pool that issued it.
    pub async fn release(mut self) {
        if let (Some(slot), Some(permit)) = (self.slot.take(), self.permit.take()) {
            let inner = Arc::clone(&self.inner);
            drop(self);
            inner.check_in(slot, permit).await;
        }
    }

    fn slot(&self) -> &Slot<F::Object> {
        self.slot.as_ref().expect("pooled object used after release")
    }
}

impl<F: ObjectFactory> std::ops::Deref for Pooled<F> {
    type Target = F::Object;

    fn deref(&self) -> &Self::Target {
        &self.slot().object
    }
}

impl<F: ObjectFactory> std::ops::DerefMut for Pooled<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self
            .slot
            .as_mut()
            .expect("pooled object used after release")
            .object
    }
}

impl<F: ObjectFactory> Drop for Pooled<F> {
    fn drop(&mut self) {
        if let (Some(slot), Some(permit)) = (self.slot.take(), self.permit.take()) {
            let inner = Arc::clone(&self.inner);
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    drop(runtime.spawn(async move { inner.check_in(slot, permit).await }));
                }
                Err(_) => inner.check_in_detached(slot, permit),
            }
        }
    }
}

impl<F: ObjectFactory> std::fmt::Debug for Pooled<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("Pooled");
        if let Some(slot) = &self.slot {
            debug
                .field("id", &slot.id)
                .field("borrow_count", &slot.borrow_count);
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Debug)]
    struct TestConn {
        serial: usize,
        broken: bool,
    }

    #[derive(Default)]
    struct TestFactory {
        created: AtomicUsize,
        destroyed: AtomicUsize,
        fail_create: AtomicBool,
        reject_all: AtomicBool,
        reject_next: AtomicUsize,
        create_delay_ms: AtomicU64,
        validate_delay_ms: AtomicU64,
    }

    impl TestFactory {
        fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        fn destroyed(&self) -> usize {
            self.destroyed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ObjectFactory for TestFactory {
        type Object = TestConn;

        async fn create(&self) -> Result<TestConn> {
            pause(&self.create_delay_ms).await;
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(FtpError::ConnectionRefused {
                    host: "test".to_string(),
                    port: 21,
                    reply_code: crate::types::ReplyCode::SERVICE_NOT_AVAILABLE,
                });
            }
            let serial = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TestConn {
                serial,
                broken: false,
            })
        }

        async fn destroy(&self, _object: TestConn) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }

        async fn validate(&self, _object: &mut TestConn) -> bool {
            pause(&self.validate_delay_ms).await;
            if self.reject_all.load(Ordering::SeqCst) {
                return false;
            }
            self.reject_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
        }

        fn is_broken(&self, object: &TestConn) -> bool {
            object.broken
        }
    }

    async fn pause(delay_ms: &AtomicU64) {
        let delay = delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    async fn wait_for_destroyed(pool: &Pool<TestFactory>, expected: usize) {
        for _ in 0..100 {
            if pool.factory().destroyed() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(pool.factory().destroyed(), expected);
    }

    fn pool(config: PoolConfig) -> Pool<TestFactory> {
        Pool::new(TestFactory::default(), config).unwrap()
    }

    fn assert_within_capacity(pool: &Pool<TestFactory>) {
        let stats = pool.stats();
        assert!(stats.active + stats.idle <= pool.config().max_total);
    }

    #[tokio::test]
    async fn borrow_reuses_returned_object() {
        let pool = pool(PoolConfig::default());

        let first = pool.borrow().await.unwrap();
        let serial = first.serial;
        assert_eq!(first.borrow_count(), 1);
        pool.release(Some(first)).await;

        let second = pool.borrow().await.unwrap();
        assert_eq!(second.serial, serial);
        assert_eq!(second.borrow_count(), 2);
        assert_eq!(pool.factory().created(), 1);

        let stats = pool.stats();
        assert_eq!(stats.borrowed, 2);
        assert_eq!(stats.returned, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.idle, 0);
    }

    #[tokio::test]
    async fn release_none_is_a_noop() {
        let pool = pool(PoolConfig::default());
        let before = pool.stats();
        pool.release(None).await;
        pool.release(None).await;
        assert_eq!(pool.stats(), before);
    }

    #[tokio::test]
    async fn borrow_times_out_without_leaking_capacity() {
        let pool = pool(
            PoolConfig::default()
                .with_max_total(2)
                .with_max_wait(Duration::from_millis(50)),
        );

        let a = pool.borrow().await.unwrap();
        let _b = pool.borrow().await.unwrap();

        let err = pool.borrow().await.unwrap_err();
        assert!(matches!(err, FtpError::PoolExhausted { max_total: 2, .. }));
        assert_eq!(pool.num_active(), 2);
        assert_within_capacity(&pool);

        a.release().await;
        let c = pool.borrow().await.unwrap();
        assert_eq!(c.serial, 1);
        assert_eq!(pool.factory().created(), 2);
    }

    #[tokio::test]
    async fn invalid_idle_object_is_replaced() {
        let pool = pool(PoolConfig::default());
        let first = pool.borrow().await.unwrap();
        pool.release(Some(first)).await;

        pool.factory().reject_next.store(1, Ordering::SeqCst);
        let second = pool.borrow().await.unwrap();
        assert_eq!(second.serial, 2);

        let stats = pool.stats();
        assert_eq!(stats.validation_failures, 1);
        assert_eq!(stats.destroyed, 1);
        assert_eq!(pool.factory().destroyed(), 1);
    }

    #[tokio::test]
    async fn fresh_validation_failures_exhaust_the_pool() {
        let pool = pool(PoolConfig::default().with_max_total(3));
        pool.factory().reject_all.store(true, Ordering::SeqCst);

        let err = pool.borrow().await.unwrap_err();
        assert!(matches!(err, FtpError::PoolExhausted { max_total: 3, .. }));
        assert_eq!(pool.factory().created(), 3);
        assert_eq!(pool.factory().destroyed(), 3);
        assert_eq!(pool.num_active(), 0);
        assert_eq!(pool.num_idle(), 0);

        pool.factory().reject_all.store(false, Ordering::SeqCst);
        let conn = pool.borrow().await.unwrap();
        assert_eq!(conn.serial, 4);
    }

    #[tokio::test]
    async fn create_failure_propagates_and_frees_capacity() {
        let pool = pool(
            PoolConfig::default()
                .with_max_total(1)
                .with_max_wait(Duration::from_millis(50)),
        );
        pool.factory().fail_create.store(true, Ordering::SeqCst);

        let err = pool.borrow().await.unwrap_err();
        assert!(matches!(err, FtpError::ConnectionRefused { .. }));
        assert_eq!(pool.num_idle(), 0);

        pool.factory().fail_create.store(false, Ordering::SeqCst);
        assert!(pool.borrow().await.is_ok());
    }

    #[tokio::test]
    async fn max_idle_caps_idle_queue() {
        let pool = pool(PoolConfig::default().with_max_total(3).with_max_idle(1));

        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        let c = pool.borrow().await.unwrap();
        for conn in [a, b, c] {
            conn.release().await;
        }

        assert_eq!(pool.num_idle(), 1);
        assert_eq!(pool.factory().destroyed(), 2);
        assert_within_capacity(&pool);
    }

    #[tokio::test]
    async fn broken_object_is_destroyed_on_return() {
        let pool = pool(PoolConfig::default());
        let mut conn = pool.borrow().await.unwrap();
        conn.broken = true;
        conn.release().await;

        assert_eq!(pool.num_idle(), 0);
        assert_eq!(pool.factory().destroyed(), 1);
    }

    #[tokio::test]
    async fn test_on_return_discards_invalid_object() {
        let pool = pool(
            PoolConfig::default()
                .with_test_on_borrow(false)
                .with_test_on_return(true),
        );
        let conn = pool.borrow().await.unwrap();
        pool.factory().reject_next.store(1, Ordering::SeqCst);
        conn.release().await;

        assert_eq!(pool.num_idle(), 0);
        assert_eq!(pool.stats().validation_failures, 1);
    }

    #[tokio::test]
    async fn lifo_hands_out_most_recent_return() {
        let pool = pool(PoolConfig::default());
        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        let (first, second) = (a.serial, b.serial);
        a.release().await;
        b.release().await;

        assert_eq!(pool.borrow().await.unwrap().serial, second);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn dropped_guard_returns_to_pool() {
        let pool = pool(PoolConfig::default());
        {
            let _conn = pool.borrow().await.unwrap();
        }
        for _ in 0..50 {
            if pool.num_idle() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(pool.num_idle(), 1);
        assert_eq!(pool.num_active(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_borrowers_never_exceed_max_total() {
        let pool = pool(PoolConfig::default().with_max_total(2));
        let in_use = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (go, gate) = tokio::sync::watch::channel(false);

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let in_use = in_use.clone();
            let peak = peak.clone();
            let mut gate = gate.clone();
            tasks.push(tokio::spawn(async move {
                let conn = pool.borrow().await.unwrap();
                let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                gate.wait_for(|open| *open).await.unwrap();
                in_use.fetch_sub(1, Ordering::SeqCst);
                conn.release().await;
            }));
        }

        // two borrowers hold sessions, the other four wait for capacity
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(in_use.load(Ordering::SeqCst), 2);
        assert_eq!(pool.num_active(), 2);
        assert_eq!(pool.stats().borrowed, 2);
        assert_eq!(tasks.iter().filter(|task| !task.is_finished()).count(), 6);

        go.send(true).unwrap();
        for task in futures::future::join_all(tasks).await {
            task.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.factory().created(), 2);
        assert_eq!(pool.stats().borrowed, 6);
        assert_eq!(pool.num_active(), 0);
        assert_within_capacity(&pool);
    }

    #[tokio::test]
    async fn cancelled_borrow_destroys_object_under_validation() {
        let pool = pool(PoolConfig::default().with_max_total(1));
        pool.borrow().await.unwrap().release().await;
        assert_eq!(pool.num_idle(), 1);

        pool.factory().validate_delay_ms.store(200, Ordering::SeqCst);
        let attempt = tokio::time::timeout(Duration::from_millis(20), pool.borrow()).await;
        assert!(attempt.is_err());

        wait_for_destroyed(&pool, 1).await;
        let stats = pool.stats();
        assert_eq!(stats.destroyed, 1);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.active, 0);

        // capacity came back with the teardown
        pool.factory().validate_delay_ms.store(0, Ordering::SeqCst);
        let conn = pool.borrow().await.unwrap();
        assert_eq!(conn.serial, 2);
        assert_within_capacity(&pool);
    }

    #[tokio::test]
    async fn cancelled_borrow_destroys_freshly_created_object() {
        let pool = pool(PoolConfig::default());
        pool.factory().validate_delay_ms.store(200, Ordering::SeqCst);

        let attempt = tokio::time::timeout(Duration::from_millis(20), pool.borrow()).await;
        assert!(attempt.is_err());
        assert_eq!(pool.factory().created(), 1);
        wait_for_destroyed(&pool, 1).await;
        assert_eq!(pool.num_idle(), 0);
    }

    #[tokio::test]
    async fn cancelled_release_still_destroys_or_idles() {
        let pool = pool(
            PoolConfig::default()
                .with_test_on_borrow(false)
                .with_test_on_return(true),
        );
        let conn = pool.borrow().await.unwrap();

        pool.factory().validate_delay_ms.store(200, Ordering::SeqCst);
        let attempt = tokio::time::timeout(Duration::from_millis(20), conn.release()).await;
        assert!(attempt.is_err());

        wait_for_destroyed(&pool, 1).await;
        assert_eq!(pool.num_active(), 0);
        assert_eq!(pool.num_idle(), 0);
    }

    #[tokio::test]
    async fn shutdown_during_create_fails_the_borrow() {
        let pool = pool(PoolConfig::default());
        pool.factory().create_delay_ms.store(50, Ordering::SeqCst);

        let borrower = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.borrow().await.map(|conn| conn.serial) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.shutdown().await;

        assert!(matches!(borrower.await.unwrap(), Err(FtpError::PoolClosed)));
        assert_eq!(pool.factory().created(), 1);
        assert_eq!(pool.factory().destroyed(), 1);
        assert_eq!(pool.num_active(), 0);
    }

    #[tokio::test]
    async fn blocked_borrow_resumes_after_release() {
        let pool = pool(PoolConfig::default().with_max_total(1));
        let held = pool.borrow().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.borrow().await.map(|conn| conn.serial) })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        held.release().await;
        let serial = waiter.await.unwrap().unwrap();
        assert_eq!(serial, 1);
    }

    #[tokio::test]
    async fn evict_destroys_invalid_idle_objects() {
        let pool = pool(PoolConfig::default());
        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        a.release().await;
        b.release().await;
        assert_eq!(pool.num_idle(), 2);

        pool.factory().reject_all.store(true, Ordering::SeqCst);
        pool.evict().await;

        assert_eq!(pool.num_idle(), 0);
        assert_eq!(pool.factory().destroyed(), 2);
    }

    #[tokio::test]
    async fn evict_destroys_expired_idle_objects() {
        let pool = pool(PoolConfig {
            min_evictable_idle_time: Some(10),
            test_while_idle: false,
            ..Default::default()
        });
        let conn = pool.borrow().await.unwrap();
        conn.release().await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.evict().await;
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(pool.stats().validation_failures, 0);
    }

    #[tokio::test]
    async fn prepare_fills_min_idle() {
        let pool = pool(PoolConfig::default().with_max_total(3).with_min_idle(2));
        assert_eq!(pool.prepare().await.unwrap(), 2);
        assert_eq!(pool.num_idle(), 2);
        assert_eq!(pool.prepare().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn evictor_keeps_min_idle_within_max_total() {
        let pool = pool(
            PoolConfig::default()
                .with_max_total(2)
                .with_min_idle(1)
                .with_eviction_interval(Duration::from_millis(10)),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        let idle = pool.num_idle();
        assert!((1..=2).contains(&idle), "idle = {idle}");

        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        a.release().await;
        b.release().await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        let idle = pool.num_idle();
        assert!((1..=2).contains(&idle), "idle = {idle}");
        assert_eq!(pool.num_active(), 0);
        assert_within_capacity(&pool);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_destroys_idle_and_returned_objects() {
        let pool = pool(PoolConfig::default());
        let idle = pool.borrow().await.unwrap();
        let busy = pool.borrow().await.unwrap();
        idle.release().await;

        pool.shutdown().await;
        assert!(pool.is_closed());
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(pool.factory().destroyed(), 1);

        busy.release().await;
        assert_eq!(pool.factory().destroyed(), 2);
        assert_eq!(pool.num_idle(), 0);

        assert!(matches!(pool.borrow().await, Err(FtpError::PoolClosed)));
    }

    #[tokio::test]
    async fn shutdown_wakes_blocked_borrowers() {
        let pool = pool(PoolConfig::default().with_max_total(1));
        let held = pool.borrow().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.borrow().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.shutdown().await;

        assert!(matches!(waiter.await.unwrap(), Err(FtpError::PoolClosed)));
        held.release().await;
    }

    #[tokio::test]
    async fn accounting_holds_across_mixed_sequences() {
        let pool = pool(
            PoolConfig::default()
                .with_max_total(3)
                .with_max_idle(2)
                .with_max_wait(Duration::from_millis(5)),
        );
        let mut held = Vec::new();
        for step in 0..40 {
            if step % 3 == 2 {
                pool.release(held.pop()).await;
            } else if let Ok(conn) = pool.borrow().await {
                held.push(conn);
            }
            if step % 7 == 0 {
                pool.factory().reject_next.store(1, Ordering::SeqCst);
            }
            assert_within_capacity(&pool);
        }
        for conn in held {
            conn.release().await;
            assert_within_capacity(&pool);
        }
        assert_eq!(pool.num_active(), 0);
    }

    #[test]
    fn eviction_requires_runtime() {
        let result = Pool::new(
            TestFactory::default(),
            PoolConfig::default().with_eviction_interval(Duration::from_secs(1)),
        );
        assert!(matches!(result, Err(FtpError::Config(_))));
    }
}
