//! Column-keyed observer pool.

use std::{
    borrow::Cow,
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use dashmap::DashMap;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tracing::{debug, debug_span, error, info, warn};

use crate::{
    column::Column,
    env::Environment,
    error::Error,
    factory::ObserverFactories,
    metrics::{column_kv, pool_kv, Checkout, Metrics, PoolState, POOL_METRICS},
    observer::Observer,
};

/// Stack of idle observers for one column.
type FreeList = Mutex<Vec<Box<dyn Observer>>>;

/// Pool of lazily constructed observers, keyed by column.
///
/// Checkout pops an idle instance for the column, or constructs a new one if none is idle. There
/// is no upper bound on the number of instances, and checkout never waits for another caller to
/// return one.
///
/// Instances that are checked out when the pool shuts down are not closed. If they are never
/// returned, they are never closed either.
pub struct ObserverPool {
    /// Observer configuration registries.
    env: Arc<Environment>,
    /// Observer constructors.
    factories: Arc<ObserverFactories>,
    /// Free lists. Only inserted into, never removed from.
    table: DashMap<Column, Arc<FreeList>>,
    /// Set once by [`Self::shutdown`].
    closed: AtomicBool,
    /// Pool label.
    label: KeyValue,
    /// Linked metrics storage.
    metrics: Arc<Metrics>,
}

impl ObserverPool {
    /// Create empty pool.
    pub fn new(env: Arc<Environment>, factories: Arc<ObserverFactories>) -> Self {
        Self {
            env,
            factories,
            table: DashMap::new(),
            closed: AtomicBool::new(false),
            label: pool_kv(None),
            metrics: POOL_METRICS.clone(),
        }
    }

    /// Set pool label used in metrics.
    #[must_use]
    pub fn with_label<L: Into<Cow<'static, str>>>(mut self, label: L) -> Self {
        self.label = pool_kv(Some(label.into()));
        self
    }

    /// Shared environment.
    #[must_use]
    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    /// Get free list for a column, creating it if needed.
    fn list_for(&self, column: &Column) -> Arc<FreeList> {
        if let Some(list) = self.table.get(column) {
            return list.clone();
        }
        self.table.entry(column.clone()).or_default().clone()
    }

    /// Check out an observer for a column.
    ///
    /// Returns `Ok(None)` if no observer is configured for the column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolClosed`] after shutdown, or any error from
    /// [`ObserverFactories::instantiate`] when a new observer had to be constructed.
    pub fn acquire(&self, column: &Column) -> Result<Option<PooledObserver>, Error> {
        let _span = debug_span!("observer_acquire", %column).entered();
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }
        let (popped, idle) = self.pop_idle(column);
        if let Some(observer) = popped {
            debug!("reusing idle observer");
            self.metrics.record_idle(&self.label, column, idle);
            self.metrics.record_checkout(&self.label, column, Checkout::Hit);
            return Ok(Some(self.checkout(column, observer)));
        }
        let Some(resolved) = self.env.resolve(column) else {
            self.metrics.record_checkout(&self.label, column, Checkout::NoObserver);
            return Ok(None);
        };
        let started = Instant::now();
        let observer = self.factories.instantiate(column, resolved, &self.env)?;
        self.metrics.init_time.record(
            started.elapsed().as_secs_f64(),
            &[self.label.clone(), column_kv(column)],
        );
        self.metrics.record_checkout(&self.label, column, Checkout::Created);
        Ok(Some(self.checkout(column, observer)))
    }

    /// Pop an idle observer, along with the number of observers left idle after the pop.
    fn pop_idle(&self, column: &Column) -> (Option<Box<dyn Observer>>, usize) {
        let list = self.list_for(column);
        let mut guard = list.lock();
        let popped = guard.pop();
        (popped, guard.len())
    }

    fn checkout(&self, column: &Column, observer: Box<dyn Observer>) -> PooledObserver {
        PooledObserver {
            metrics: self.metrics.clone(),
            label: [self.label.clone(), column_kv(column)],
            time: Instant::now(),
            observer,
        }
    }

    /// Return checked out observer to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolClosed`] after shutdown. In that case the observer is closed right
    /// away.
    pub fn release(&self, observer: PooledObserver) -> Result<(), Error> {
        self.release_instance(observer.into_inner())
    }

    /// Return an observer to the pool.
    ///
    /// The observer is stored under the column it reports itself, and must have come from this
    /// pool. Returning the same observer twice, or an observer obtained elsewhere, is not detected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolClosed`] after shutdown. In that case the observer is closed right
    /// away.
    pub fn release_instance(&self, observer: Box<dyn Observer>) -> Result<(), Error> {
        let column = observer.observed_column().column;
        let list = self.list_for(&column);
        let mut guard = list.lock();
        // Checked under the list lock, so shutdown either drains this observer or we bail out.
        if self.is_closed() {
            drop(guard);
            warn!(%column, "observer returned to closed pool");
            self.close_observer(&column, observer);
            return Err(Error::PoolClosed);
        }
        guard.push(observer);
        let idle = guard.len();
        drop(guard);
        self.metrics.record_idle(&self.label, &column, idle);
        Ok(())
    }

    /// Close all idle observers and refuse further checkouts.
    ///
    /// Failures to close individual observers are logged. Calling this more than once does
    /// nothing.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _span = debug_span!("observer_pool_shutdown").entered();
        let lists: Vec<(Column, Arc<FreeList>)> = self
            .table
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let (mut closed, mut failed) = (0_usize, 0_usize);
        for (column, list) in lists {
            let drained = std::mem::take(&mut *list.lock());
            for observer in drained {
                if self.close_observer(&column, observer) {
                    closed += 1;
                } else {
                    failed += 1;
                }
            }
            self.metrics.record_idle(&self.label, &column, 0);
        }
        info!(closed, failed, "observer pool shut down");
    }

    /// Close a single observer, logging failures. Returns `true` on success.
    fn close_observer(&self, column: &Column, mut observer: Box<dyn Observer>) -> bool {
        match observer.close() {
            Ok(()) => true,
            Err(source) => {
                let err = Error::Cleanup {
                    column: column.clone(),
                    source,
                };
                error!(%column, error = %err, "failed to close observer");
                self.metrics
                    .close_failures
                    .add(1, &[self.label.clone(), column_kv(column)]);
                false
            }
        }
    }

    /// Check if the pool was shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of idle observers for a column.
    #[must_use]
    pub fn idle_count(&self, column: &Column) -> usize {
        let mut idle = 0;
        if let Some(list) = self.table.get(column) {
            idle = list.lock().len();
        }
        idle
    }

    /// Get current pool counts.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.table
            .iter()
            .fold(PoolState::default(), |mut state, entry| {
                state.columns += 1;
                state.idle += entry.value().lock().len();
                state
            })
    }
}

impl fmt::Debug for ObserverPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverPool")
            .field("label", &self.label.value.as_str())
            .field("closed", &self.is_closed())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for ObserverPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Observer checked out from a pool.
///
/// Give it back with [`ObserverPool::release`]. Dropping it instead discards the observer without
/// closing it.
pub struct PooledObserver {
    /// Linked metrics storage.
    metrics: Arc<Metrics>,
    /// Premade labels used to record metrics.
    label: [KeyValue; 2],
    /// Checkout time.
    time: Instant,
    /// Original observer.
    observer: Box<dyn Observer>,
}

impl PooledObserver {
    /// Detach observer from pool bookkeeping.
    #[must_use]
    pub fn into_inner(self) -> Box<dyn Observer> {
        // Record time spent outside the pool.
        self.metrics
            .use_time
            .record(self.time.elapsed().as_secs_f64(), &self.label);
        self.observer
    }
}

impl Deref for PooledObserver {
    type Target = dyn Observer;

    fn deref(&self) -> &Self::Target {
        self.observer.as_ref()
    }
}

impl DerefMut for PooledObserver {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.observer.as_mut()
    }
}

impl fmt::Debug for PooledObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledObserver")
            .field("column", &self.observer.observed_column().column)
            .field("since", &self.time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Barrier,
        },
        thread,
    };

    use super::*;
    use crate::{
        column::ObservedColumn,
        config::ObserverConfig,
        observer::{BoxError, ObserverContext},
    };

    /// Shared counters for test observers.
    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        closed: AtomicUsize,
    }

    /// Observer bound to a column given by `column` parameter.
    struct TestObserver {
        counters: Arc<Counters>,
        column: Column,
        fail_close: bool,
    }

    impl Observer for TestObserver {
        fn init(&mut self, ctx: &ObserverContext) -> Result<(), BoxError> {
            let spec = ctx.parameter("column").ok_or("missing column parameter")?;
            let (family, qualifier) = spec.split_once(':').ok_or("bad column parameter")?;
            self.column = Column::new(family, qualifier);
            self.fail_close = ctx.parameter("fail_close").is_some();
            Ok(())
        }

        fn observed_column(&self) -> ObservedColumn {
            ObservedColumn::strong(self.column.clone())
        }

        fn close(&mut self) -> Result<(), BoxError> {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err("close failed".into());
            }
            Ok(())
        }
    }

    fn col(q: &str) -> Column {
        Column::new("data", q)
    }

    fn observer_config(column: &Column) -> ObserverConfig {
        ObserverConfig::new("test").with_param("column", column.to_string())
    }

    fn pool_with(env: Environment) -> (ObserverPool, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let mut factories = ObserverFactories::new();
        let ctr = counters.clone();
        factories.register("test", move || {
            ctr.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(TestObserver {
                counters: ctr.clone(),
                column: Column::new("", ""),
                fail_close: false,
            }))
        });
        let pool = ObserverPool::new(Arc::new(env), Arc::new(factories)).with_label("test");
        (pool, counters)
    }

    fn pool() -> (ObserverPool, Arc<Counters>) {
        pool_with(
            Environment::new()
                .with_observer(col("a"), observer_config(&col("a")))
                .with_weak_observer(col("b"), observer_config(&col("b")))
                .with_observer(
                    col("bad"),
                    ObserverConfig::new("test").with_param("column", "data:other"),
                )
                .with_observer(
                    col("faulty"),
                    observer_config(&col("faulty")).with_param("fail_close", "yes"),
                ),
        )
    }

    fn addr(observer: &PooledObserver) -> *const () {
        &**observer as *const dyn Observer as *const ()
    }

    /// Unconfigured columns never produce an observer, nor an error.
    #[test]
    fn acquire_unconfigured() {
        let (pool, counters) = pool();
        for _ in 0..3 {
            assert!(pool.acquire(&col("nothing")).unwrap().is_none());
        }
        assert_eq!(counters.created.load(Ordering::SeqCst), 0);
        assert_eq!(pool.idle_count(&col("nothing")), 0);
    }

    /// Returned observer is handed out again, without constructing a new one.
    #[test]
    fn acquire_release_reuse() {
        let (pool, counters) = pool();
        let first = pool.acquire(&col("a")).unwrap().unwrap();
        let first_addr = addr(&first);
        assert_eq!(first.observed_column().column, col("a"));
        pool.release(first).unwrap();
        assert_eq!(pool.idle_count(&col("a")), 1);
        let second = pool.acquire(&col("a")).unwrap().unwrap();
        assert_eq!(addr(&second), first_addr);
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(&col("a")), 0);
        pool.release(second).unwrap();
    }

    /// Fallback registry is used when primary has no entry.
    #[test]
    fn acquire_weak() {
        let (pool, counters) = pool();
        let obs = pool.acquire(&col("b")).unwrap().unwrap();
        assert_eq!(obs.observed_column().column, col("b"));
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    }

    /// Observers checked out together are distinct instances.
    #[test]
    fn acquire_without_idle_constructs() {
        let (pool, counters) = pool();
        let one = pool.acquire(&col("a")).unwrap().unwrap();
        let two = pool.acquire(&col("a")).unwrap().unwrap();
        assert_ne!(addr(&one), addr(&two));
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
        pool.release(one).unwrap();
        pool.release(two).unwrap();
        assert_eq!(pool.idle_count(&col("a")), 2);
        assert_eq!(pool.state(), PoolState { columns: 1, idle: 2 });
    }

    /// Column mismatch is an error and leaves nothing in any free list.
    #[test]
    fn acquire_mismatch() {
        let (pool, counters) = pool();
        match pool.acquire(&col("bad")) {
            Err(Error::Consistency {
                requested, reported, ..
            }) => {
                assert_eq!(requested, col("bad"));
                assert_eq!(reported, col("other"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.state().idle, 0);
        pool.shutdown();
        assert_eq!(counters.closed.load(Ordering::SeqCst), 0);
    }

    /// Unknown observer type is a configuration error.
    #[test]
    fn acquire_unknown_type() {
        let (pool, _) = pool_with(
            Environment::new().with_observer(col("x"), ObserverConfig::new("missing")),
        );
        assert!(matches!(
            pool.acquire(&col("x")),
            Err(Error::Configuration(_))
        ));
    }

    /// Initialization failure is surfaced, nothing gets pooled.
    #[test]
    fn acquire_init_failure() {
        let (pool, _) =
            pool_with(Environment::new().with_observer(col("x"), ObserverConfig::new("test")));
        assert!(matches!(
            pool.acquire(&col("x")),
            Err(Error::Initialization { .. })
        ));
        assert_eq!(pool.state().idle, 0);
    }

    /// Concurrent checkouts from an empty free list never share an instance.
    #[test]
    fn concurrent_acquire_distinct() {
        const THREADS: usize = 16;
        let (pool, counters) = pool();
        let pool = Arc::new(pool);
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let pool = pool.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    pool.acquire(&col("a")).unwrap().unwrap()
                })
            })
            .collect();
        let observers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let addrs: HashSet<_> = observers.iter().map(addr).collect();
        assert_eq!(addrs.len(), THREADS);
        assert_eq!(counters.created.load(Ordering::SeqCst), THREADS);
        for obs in observers {
            pool.release(obs).unwrap();
        }
        assert_eq!(pool.idle_count(&col("a")), THREADS);
    }

    /// Concurrent reuse cycles never hand one instance to two callers at once.
    #[test]
    fn concurrent_reuse_exclusive() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 200;
        let (pool, counters) = pool();
        let pool = Arc::new(pool);
        let in_use = Arc::new(Mutex::new(HashSet::new()));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let pool = pool.clone();
                let in_use = in_use.clone();
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        let obs = pool.acquire(&col("a")).unwrap().unwrap();
                        let key = addr(&obs) as usize;
                        assert!(in_use.lock().insert(key), "instance handed out twice");
                        thread::yield_now();
                        assert!(in_use.lock().remove(&key));
                        pool.release(obs).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let created = counters.created.load(Ordering::SeqCst);
        assert!((1..=THREADS).contains(&created));
        assert_eq!(pool.idle_count(&col("a")), created);
    }

    /// Shutdown closes idle observers once, skips checked out ones, tolerates failures.
    #[test]
    fn shutdown_closes_idle() {
        let (pool, counters) = pool();
        let idle: Vec<_> = (0..3)
            .map(|_| pool.acquire(&col("a")).unwrap().unwrap())
            .collect();
        let faulty = pool.acquire(&col("faulty")).unwrap().unwrap();
        let busy = pool.acquire(&col("a")).unwrap().unwrap();
        for obs in idle {
            pool.release(obs).unwrap();
        }
        pool.release(faulty).unwrap();
        pool.shutdown();
        assert!(pool.is_closed());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 4);
        assert_eq!(pool.state().idle, 0);
        // Second shutdown does nothing.
        pool.shutdown();
        assert_eq!(counters.closed.load(Ordering::SeqCst), 4);
        drop(busy);
        drop(pool);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 4);
    }

    /// Closed pool refuses checkouts and closes returned observers.
    #[test]
    fn use_after_shutdown() {
        let (pool, counters) = pool();
        let busy = pool.acquire(&col("a")).unwrap().unwrap();
        pool.shutdown();
        assert!(matches!(pool.acquire(&col("a")), Err(Error::PoolClosed)));
        assert!(matches!(
            pool.acquire(&col("nothing")),
            Err(Error::PoolClosed)
        ));
        assert!(matches!(pool.release(busy), Err(Error::PoolClosed)));
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.state().idle, 0);
    }

    /// Observers released while shutdown runs are closed exactly once, by either side.
    #[test]
    fn release_racing_shutdown() {
        const THREADS: usize = 8;
        for _ in 0..50 {
            let (pool, counters) = pool();
            let pool = Arc::new(pool);
            let barrier = Arc::new(Barrier::new(THREADS + 1));
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let pool = pool.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        loop {
                            let obs = match pool.acquire(&col("a")) {
                                Ok(obs) => obs.unwrap(),
                                Err(Error::PoolClosed) => break,
                                Err(err) => panic!("unexpected error: {err}"),
                            };
                            thread::yield_now();
                            if matches!(pool.release(obs), Err(Error::PoolClosed)) {
                                break;
                            }
                        }
                    })
                })
                .collect();
            barrier.wait();
            thread::yield_now();
            pool.shutdown();
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(
                counters.created.load(Ordering::SeqCst),
                counters.closed.load(Ordering::SeqCst)
            );
            assert_eq!(pool.state().idle, 0);
        }
    }

    /// Idle count reported on reuse reflects the free list after the pop.
    #[test]
    fn pop_idle_remaining() {
        let (pool, _) = pool();
        let observers: Vec<_> = (0..3)
            .map(|_| pool.acquire(&col("a")).unwrap().unwrap())
            .collect();
        for obs in observers {
            pool.release(obs).unwrap();
        }
        for expected in (0..3).rev() {
            let (popped, idle) = pool.pop_idle(&col("a"));
            assert!(popped.is_some());
            assert_eq!(idle, expected);
            assert_eq!(pool.idle_count(&col("a")), expected);
        }
        let (popped, idle) = pool.pop_idle(&col("a"));
        assert!(popped.is_none());
        assert_eq!(idle, 0);
    }

    /// Dropping the pool shuts it down.
    #[test]
    fn drop_shuts_down() {
        let (pool, counters) = pool();
        let obs = pool.acquire(&col("b")).unwrap().unwrap();
        pool.release(obs).unwrap();
        drop(pool);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    /// Observer is returned to the free list of the column it reports.
    #[test]
    fn release_uses_reported_column() {
        let (pool, _) = pool();
        let obs = pool.acquire(&col("b")).unwrap().unwrap();
        pool.release_instance(obs.into_inner()).unwrap();
        assert_eq!(pool.idle_count(&col("b")), 1);
        assert_eq!(pool.idle_count(&col("a")), 0);
    }
}
