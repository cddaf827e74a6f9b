//! Background thread that periodically drains a pool and recomputes its ceiling.

use super::{lock, Inner};
use std::{
    sync::{Arc, Condvar, Mutex, PoisonError, Weak},
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, warn};

/// Stop flag shared with the maintenance thread.
struct Signal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

/// Handle to a running maintenance thread.
///
/// Dropping the handle asks the thread to stop but does not wait for it (the last reference
/// to a pool may be dropped by the maintenance thread itself). Use [Maintenance::stop] to wait.
pub(crate) struct Maintenance {
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl Maintenance {
    /// Spawns a thread that calls [Inner::maintain] every `interval` until stopped or until
    /// the pool is dropped.
    ///
    /// Returns `None` if the thread could not be spawned.
    pub(crate) fn start(interval: Duration, pool: Weak<Inner>) -> Option<Self> {
        let signal = Arc::new(Signal {
            stopped: Mutex::new(false),
            cv: Condvar::new(),
        });
        let thread_signal = signal.clone();
        let handle = thread::Builder::new()
            .name("bytepool-maintenance".into())
            .spawn(move || run(interval, &thread_signal, pool));
        match handle {
            Ok(handle) => Some(Self {
                signal,
                handle: Some(handle),
            }),
            Err(err) => {
                warn!(?err, "failed to spawn maintenance thread");
                None
            }
        }
    }

    /// Stops the thread and waits for any in-flight tick to complete.
    pub(crate) fn stop(mut self) {
        self.signal();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.join().is_err() {
            warn!("maintenance thread panicked");
        }
    }

    fn signal(&self) {
        *lock(&self.signal.stopped) = true;
        self.signal.cv.notify_one();
    }
}

impl Drop for Maintenance {
    fn drop(&mut self) {
        self.signal();
    }
}

fn run(interval: Duration, signal: &Signal, pool: Weak<Inner>) {
    debug!(?interval, "maintenance started");
    let mut stopped = lock(&signal.stopped);
    loop {
        // Waits out the interval unless stopped first (tolerating spurious wake-ups)
        let (guard, _) = signal
            .cv
            .wait_timeout_while(stopped, interval, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        if *guard {
            break;
        }

        // The stop flag must not be held while ticking
        drop(guard);
        let Some(pool) = pool.upgrade() else {
            break;
        };
        pool.maintain();
        drop(pool);
        stopped = lock(&signal.stopped);
    }
    debug!("maintenance stopped");
}
