use std::{
    borrow::Cow,
    sync::{Arc, LazyLock},
};

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram},
    Key, KeyValue, StringValue, Value,
};

use crate::column::Column;

/// Central metrics singleton for observer pool metrics.
pub(crate) static POOL_METRICS: LazyLock<Arc<Metrics>> = LazyLock::new(|| Arc::new(Metrics::new()));

const KEY_POOL_NAME: Key = Key::from_static_str("observer.pool.name");
const KEY_COLUMN: Key = Key::from_static_str("observer.column");
const KEY_RESULT: Key = Key::from_static_str("observer.pool.checkout.result");

/// Outcome of a successful checkout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Checkout {
    /// Idle instance reused.
    Hit,
    /// New instance constructed.
    Created,
    /// No observer configured for the column.
    NoObserver,
}

impl Checkout {
    fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Created => "created",
            Self::NoObserver => "none",
        }
    }
}

/// Storage for observer pool metrics.
pub(crate) struct Metrics {
    /// Number of checkouts by outcome.
    pub(crate) checkouts: Counter<u64>,
    /// Time spent constructing and initializing new observers.
    pub(crate) init_time: Histogram<f64>,
    /// Time between checking out an observer and returning it to the pool.
    pub(crate) use_time: Histogram<f64>,
    /// Number of idle observers per column.
    pub(crate) idle: Gauge<u64>,
    /// Number of observers which failed to close.
    pub(crate) close_failures: Counter<u64>,
}

impl Metrics {
    /// Create new storage for pool metrics.
    ///
    /// You probably don't need this, as all pools use a central metrics singleton for storage.
    pub(crate) fn new() -> Self {
        let meter = global::meter("observer-pool");
        // observer.pool.name, observer.column, observer.pool.checkout.result
        let checkouts = meter
            .u64_counter("observer.pool.checkouts")
            .with_description("Number of observer checkouts by outcome.")
            .build();
        // observer.pool.name, observer.column
        let init_time = meter
            .f64_histogram("observer.pool.init_time")
            .with_unit("s")
            .with_description("Time spent constructing and initializing new observers.")
            .build();
        // observer.pool.name, observer.column
        let use_time = meter
            .f64_histogram("observer.pool.use_time")
            .with_unit("s")
            .with_description(
                "The time between checking out an observer and returning it to the pool.",
            )
            .build();
        // observer.pool.name, observer.column
        let idle = meter
            .u64_gauge("observer.pool.idle")
            .with_description("Number of idle observers waiting for reuse.")
            .build();
        // observer.pool.name, observer.column
        let close_failures = meter
            .u64_counter("observer.pool.close_failures")
            .with_description("Number of observers which failed to close on shutdown.")
            .build();
        Metrics {
            checkouts,
            init_time,
            use_time,
            idle,
            close_failures,
        }
    }

    pub(crate) fn record_checkout(&self, label: &KeyValue, column: &Column, result: Checkout) {
        let attrs = [
            label.clone(),
            column_kv(column),
            KeyValue::new(KEY_RESULT, Value::String(StringValue::from(result.as_str()))),
        ];
        self.checkouts.add(1, &attrs);
    }

    pub(crate) fn record_idle(&self, label: &KeyValue, column: &Column, idle: usize) {
        self.idle.record(idle as u64, &[label.clone(), column_kv(column)]);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

pub(crate) fn pool_kv(name: Option<Cow<'static, str>>) -> KeyValue {
    match name {
        Some(n) => KeyValue::new(KEY_POOL_NAME, n),
        None => KeyValue::new(KEY_POOL_NAME, "default"),
    }
}

pub(crate) fn column_kv(column: &Column) -> KeyValue {
    KeyValue::new(KEY_COLUMN, column.to_string())
}

/// Snapshot of observer pool contents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolState {
    /// Number of columns a free list was created for.
    pub columns: usize,
    /// Total number of idle observers across all columns.
    pub idle: usize,
}
