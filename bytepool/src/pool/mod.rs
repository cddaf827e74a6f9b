//! Self-tuning pool of [Buffer]s.
//!
//! # Size Classes
//!
//! Buffers are kept in power-of-two size classes: bucket `i` holds buffers whose capacity is
//! in `[2^i, 2^(i+1))` (exactly `2^i` for buffers the pool allocated itself and that have not
//! grown). With `max_capacity_hint = 1024` the pool has 11 buckets (`2^0` through `2^10`) and an
//! initial ceiling of 1023 bytes.
//!
//! # Sizing
//!
//! The pool tracks a time-decayed average of how many bytes callers wrote into each buffer
//! before releasing it. [Pool::acquire] hands out a buffer from the smallest size class that
//! fits that average, so callers usually receive a buffer that will not need to grow. When no
//! estimate exists yet (or it falls outside the range the pool caches), a fresh buffer is
//! allocated and the pool is bypassed.
//!
//! # Retention
//!
//! [Pool::release] only retains buffers whose capacity is within `[1, max_capacity]` (and, with
//! [Admission::Bounded], not far below the typical usage) once the estimate reaches one byte.
//! Everything else is dropped. With a
//! non-zero [Config::maintenance_interval], a background thread periodically drains all buckets
//! and moves the ceiling to track the observed usage.
//!
//! # Thread Safety
//!
//! [Pool] is `Send + Sync` and cheap to clone (clones share the same buckets). Each bucket has
//! its own lock, so callers only contend with others using the same size class. The usage
//! estimate and the ceiling are each guarded by their own lock and may be slightly stale when
//! read; this only delays tuning.

use crate::Buffer;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
    },
    time::Duration,
};
use tracing::{debug, trace, warn};
use zeroize::Zeroize;

mod estimator;
use estimator::Estimator;
pub use estimator::Usage;
mod maintenance;
use maintenance::Maintenance;

/// Locks `mutex`, recovering the guard if another thread panicked while holding it.
///
/// Every structure guarded in this module is updated in a single step, so a poisoned lock never
/// exposes a partially-applied change.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns `ceil(log2(v))` for `v > 0`.
const fn log2_ceil(v: usize) -> u32 {
    if v.is_power_of_two() {
        v.ilog2()
    } else {
        v.ilog2() + 1
    }
}

/// Returns the size of class `index`, or `None` if it is not representable.
const fn class_size(index: u32) -> Option<usize> {
    1usize.checked_shl(index)
}

/// Default for [Config::max_capacity_hint].
const DEFAULT_MAX_CAPACITY_HINT: NonZeroUsize = match NonZeroUsize::new(64 * 1024) {
    Some(hint) => hint,
    None => unreachable!(),
};

/// Rule deciding whether a released buffer is retained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Admission {
    /// Retain buffers with capacity in `[1, max_capacity]`.
    #[default]
    UpperBound,
    /// Like [Admission::UpperBound], but also reject buffers whose capacity is below
    /// `mean - deviation_margin * stddev` of the observed usage.
    Bounded,
}

/// Configuration for a [Pool].
#[derive(Clone, Debug)]
pub struct Config {
    /// How often to drain the pool and recompute the ceiling. Zero disables maintenance.
    pub maintenance_interval: Duration,
    /// Half-life of the usage estimate.
    pub estimator_window: Duration,
    /// Largest capacity worth caching, rounded up to the next power of two to size the buckets.
    pub max_capacity_hint: NonZeroUsize,
    /// Capacity of buffers allocated when the pool is bypassed.
    pub min_capacity: usize,
    /// Number of standard deviations around the mean usage used for the ceiling (and the floor
    /// of [Admission::Bounded]).
    pub deviation_margin: f64,
    /// Rule deciding which released buffers are retained.
    pub admission: Admission,
    /// Whether to zero a buffer's entire region before retaining it.
    pub zero_on_release: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            maintenance_interval: Duration::ZERO,
            estimator_window: Duration::from_secs(1),
            max_capacity_hint: DEFAULT_MAX_CAPACITY_HINT,
            min_capacity: crate::INLINE_CAPACITY,
            deviation_margin: 1.5,
            admission: Admission::UpperBound,
            zero_on_release: false,
        }
    }
}

impl Config {
    /// Validates the configuration, panicking on invalid values.
    ///
    /// # Panics
    ///
    /// - `deviation_margin` is negative or not finite
    pub fn validate(&self) {
        assert!(
            self.deviation_margin.is_finite() && self.deviation_margin >= 0.0,
            "deviation_margin must be finite and non-negative"
        );
    }

    /// Returns `ceil(log2(max_capacity_hint))`, the index of the largest size class.
    fn largest_class(&self) -> u32 {
        log2_ceil(self.max_capacity_hint.get())
    }
}

/// Label for pool metrics, identifying the size class.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SizeClassLabel {
    size_class: u64,
}

impl SizeClassLabel {
    fn new(index: usize) -> Self {
        Self {
            size_class: 1u64.checked_shl(index as u32).unwrap_or(u64::MAX),
        }
    }
}

/// Metrics for the pool.
struct Metrics {
    /// Acquires served from a bucket.
    hits: Family<SizeClassLabel, Counter>,
    /// Acquires that found their bucket empty.
    misses: Family<SizeClassLabel, Counter>,
    /// Acquires that bypassed the pool.
    bypassed: Counter,
    /// Releases retained in a bucket.
    retained: Family<SizeClassLabel, Counter>,
    /// Releases dropped by the admission policy.
    discarded: Counter,
    /// Completed drains.
    drains: Counter,
    /// Current ceiling.
    max_capacity: Gauge,
    /// Current mean usage (in bytes).
    usage_mean: Gauge,
}

impl Metrics {
    fn new(registry: &mut Registry) -> Self {
        let metrics = Self {
            hits: Family::default(),
            misses: Family::default(),
            bypassed: Counter::default(),
            retained: Family::default(),
            discarded: Counter::default(),
            drains: Counter::default(),
            max_capacity: Gauge::default(),
            usage_mean: Gauge::default(),
        };

        registry.register(
            "bytepool_acquire_hits",
            "Number of acquires served from a size class",
            metrics.hits.clone(),
        );
        registry.register(
            "bytepool_acquire_misses",
            "Number of acquires that allocated because their size class was empty",
            metrics.misses.clone(),
        );
        registry.register(
            "bytepool_acquire_bypass",
            "Number of acquires that allocated because the usage estimate was out of range",
            metrics.bypassed.clone(),
        );
        registry.register(
            "bytepool_release_retained",
            "Number of released buffers retained in a size class",
            metrics.retained.clone(),
        );
        registry.register(
            "bytepool_release_discarded",
            "Number of released buffers dropped by the admission policy",
            metrics.discarded.clone(),
        );
        registry.register(
            "bytepool_drains",
            "Number of times the pool was drained",
            metrics.drains.clone(),
        );
        registry.register(
            "bytepool_max_capacity",
            "Largest capacity currently retained by the pool",
            metrics.max_capacity.clone(),
        );
        registry.register(
            "bytepool_usage_mean",
            "Smoothed number of bytes written before release",
            metrics.usage_mean.clone(),
        );

        metrics
    }
}

/// Free list for one size class.
#[derive(Default)]
struct Bucket {
    free: Mutex<Vec<Buffer>>,
}

impl Bucket {
    /// Pops the most recently released buffer.
    fn pop(&self) -> Option<Buffer> {
        lock(&self.free).pop()
    }

    fn push(&self, buffer: Buffer) {
        lock(&self.free).push(buffer);
    }

    fn len(&self) -> usize {
        lock(&self.free).len()
    }

    /// Replaces the free list with an empty one reserving half the previous capacity and returns
    /// the old list (so its buffers are dropped outside of the lock).
    fn take(&self) -> Vec<Buffer> {
        let mut free = lock(&self.free);
        let reserve = free.capacity() / 2;
        std::mem::replace(&mut *free, Vec::with_capacity(reserve))
    }
}

/// Internal state of the pool.
pub(crate) struct Inner {
    config: Config,
    buckets: Vec<Bucket>,
    max_capacity: RwLock<usize>,
    estimator: Mutex<Estimator>,
    maintenance: Mutex<Option<Maintenance>>,
    closed: AtomicBool,
    metrics: Metrics,
}

impl Inner {
    fn max_capacity(&self) -> usize {
        *self
            .max_capacity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_max_capacity(&self, value: usize) {
        *self
            .max_capacity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = value;
        self.metrics
            .max_capacity
            .set(i64::try_from(value).unwrap_or(i64::MAX));
    }

    fn usage(&self) -> Usage {
        lock(&self.estimator).usage()
    }

    fn drain(&self) {
        let mut drained = 0;
        for bucket in &self.buckets {
            drained += bucket.take().len();
        }
        self.metrics.drains.inc();
        debug!(drained, "drained pool");
    }

    /// Drains the pool and moves the ceiling to the size class containing
    /// `mean + deviation_margin * stddev`.
    ///
    /// The ceiling is rounded up to a power of two so that buffers handed out for the current
    /// estimate remain admissible when released. Without any samples the ceiling is left as is.
    pub(crate) fn maintain(&self) {
        self.drain();

        let usage = self.usage();
        if usage.samples == 0 {
            trace!("no usage samples, keeping max capacity");
            return;
        }
        let upper = usage.upper(self.config.deviation_margin);
        if !upper.is_finite() {
            warn!(upper, "ignoring non-finite max capacity");
            return;
        }
        let ceiling = (upper.max(0.0).ceil() as usize)
            .checked_next_power_of_two()
            .unwrap_or(usize::MAX);
        self.set_max_capacity(ceiling);
        debug!(
            mean = usage.mean,
            stddev = usage.stddev,
            max_capacity = ceiling,
            "updated max capacity"
        );
    }
}

/// A self-tuning pool of reusable [Buffer]s.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("buckets", &self.inner.buckets.len())
            .field("max_capacity", &self.inner.max_capacity())
            .finish()
    }
}

impl Pool {
    /// Creates a new pool with the given configuration, registering its metrics in `registry`.
    ///
    /// If [Config::maintenance_interval] is non-zero, a background thread is started that drains
    /// the pool and recomputes the ceiling on every tick (until [Pool::close] is called or the
    /// last clone of the pool is dropped).
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn new(config: Config, registry: &mut Registry) -> Self {
        config.validate();

        let largest = config.largest_class();
        let max_capacity = class_size(largest).map_or(usize::MAX, |size| size - 1);
        let buckets = (0..=largest).map(|_| Bucket::default()).collect();
        let metrics = Metrics::new(registry);
        metrics
            .max_capacity
            .set(i64::try_from(max_capacity).unwrap_or(i64::MAX));

        let interval = config.maintenance_interval;
        let inner = Arc::new(Inner {
            estimator: Mutex::new(Estimator::new(config.estimator_window)),
            config,
            buckets,
            max_capacity: RwLock::new(max_capacity),
            maintenance: Mutex::new(None),
            closed: AtomicBool::new(false),
            metrics,
        });
        if !interval.is_zero() {
            *lock(&inner.maintenance) = Maintenance::start(interval, Arc::downgrade(&inner));
        }
        debug!(
            buckets = inner.buckets.len(),
            max_capacity,
            ?interval,
            "created pool"
        );

        Self { inner }
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the number of size classes.
    pub fn buckets(&self) -> usize {
        self.inner.buckets.len()
    }

    /// Returns the largest capacity the pool currently retains.
    pub fn max_capacity(&self) -> usize {
        self.inner.max_capacity()
    }

    /// Overrides the largest capacity the pool retains.
    ///
    /// The maintenance thread (if running) replaces this value on its next tick.
    pub fn update_max_capacity(&self, value: usize) {
        self.inner.set_max_capacity(value);
    }

    /// Returns a snapshot of the usage estimate.
    pub fn usage(&self) -> Usage {
        self.inner.usage()
    }

    /// Allocates a buffer outside of the pool, falling back to an empty buffer (which grows on
    /// first write) if the allocation fails.
    fn allocate(capacity: usize) -> Buffer {
        Buffer::try_with_capacity(capacity).unwrap_or_else(|err| {
            warn!(?err, capacity, "falling back to empty buffer");
            Buffer::new()
        })
    }

    /// Returns a buffer sized for the current usage estimate.
    ///
    /// The buffer comes from the size class fitting the mean usage if one is available (the
    /// most recently released one), and is freshly allocated otherwise. If the estimate is below
    /// one byte or above the ceiling, the pool is bypassed and a buffer with capacity
    /// `max(estimate, min_capacity)` is allocated.
    pub fn acquire(&self) -> Buffer {
        let mean = self.inner.usage().mean;
        let size = if mean.is_finite() && mean > 0.0 {
            mean as usize
        } else {
            0
        };

        let max_capacity = self.inner.max_capacity();
        if size < 1 || size > max_capacity {
            self.inner.metrics.bypassed.inc();
            trace!(size, max_capacity, "bypassing pool");
            return Self::allocate(size.max(self.inner.config.min_capacity));
        }

        let index = log2_ceil(size);
        let capacity = class_size(index).unwrap_or(size);
        let Some(bucket) = self.inner.buckets.get(index as usize) else {
            // The ceiling was raised past the largest size class
            self.inner.metrics.bypassed.inc();
            trace!(size, index, "bypassing pool beyond largest size class");
            return Self::allocate(capacity);
        };
        let label = SizeClassLabel::new(index as usize);
        if let Some(buffer) = bucket.pop() {
            self.inner.metrics.hits.get_or_create(&label).inc();
            return buffer;
        }
        self.inner.metrics.misses.get_or_create(&label).inc();
        Self::allocate(capacity)
    }

    /// Returns a buffer to the pool.
    ///
    /// If the buffer is admitted, the number of bytes written into it (read or not) updates the
    /// usage estimate, its cursors are reset (so the next caller can write its full capacity),
    /// and it is pushed onto the size class `floor(log2(capacity))`. Otherwise, it is dropped.
    ///
    /// While the estimate stays below one byte, [Pool::acquire] never reads from the buckets, so
    /// the buffer is dropped after updating the estimate.
    pub fn release(&self, mut buffer: Buffer) {
        let capacity = buffer.capacity();
        let max_capacity = self.inner.max_capacity();
        if capacity < 1 || capacity > max_capacity {
            self.inner.metrics.discarded.inc();
            trace!(capacity, max_capacity, "discarding buffer outside of size bounds");
            return;
        }
        if self.inner.config.admission == Admission::Bounded {
            let lower = self.inner.usage().lower(self.inner.config.deviation_margin);
            if (capacity as f64) < lower {
                self.inner.metrics.discarded.inc();
                trace!(capacity, lower, "discarding buffer below usage bound");
                return;
            }
        }
        let index = capacity.ilog2() as usize;
        let Some(bucket) = self.inner.buckets.get(index) else {
            self.inner.metrics.discarded.inc();
            trace!(capacity, "discarding buffer beyond largest size class");
            return;
        };

        let usage = {
            let mut estimator = lock(&self.inner.estimator);
            estimator.update(buffer.position() as f64);
            estimator.usage()
        };
        self.inner.metrics.usage_mean.set(usage.mean as i64);
        if usage.mean < 1.0 {
            self.inner.metrics.discarded.inc();
            trace!(capacity, mean = usage.mean, "discarding buffer without usage");
            return;
        }

        if self.inner.config.zero_on_release {
            buffer.zeroize();
        } else {
            buffer.reset();
        }
        bucket.push(buffer);
        self.inner
            .metrics
            .retained
            .get_or_create(&SizeClassLabel::new(index))
            .inc();
    }

    /// Drops every buffer currently retained by the pool.
    ///
    /// Buckets are drained one at a time, so buffers released concurrently may survive.
    /// Buffers held by callers are unaffected.
    pub fn drain(&self) {
        self.inner.drain();
    }

    /// Drains the pool and stops the maintenance thread (if running).
    ///
    /// The pool remains usable afterwards, but the ceiling is no longer adjusted. Calling
    /// `close` more than once has no effect.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.drain();
        let maintenance = lock(&self.inner.maintenance).take();
        if let Some(maintenance) = maintenance {
            maintenance.stop();
        }
        debug!("closed pool");
    }

    /// Returns the number of buffers retained across all size classes.
    ///
    /// Buckets are counted one at a time, so the total is not an atomic snapshot.
    pub fn entries(&self) -> usize {
        self.inner.buckets.iter().map(Bucket::len).sum()
    }
}
