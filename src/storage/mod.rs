pub mod aggregate;

use std::collections::BTreeMap;
use std::mem;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::normalize::{Metric, SampleBatch};

use self::aggregate::Statistics;

/// Start of a window in whole seconds since the Unix epoch.
pub type WindowKey = u64;

/// Per-metric statistics for one window.
pub type WindowEntry = BTreeMap<Metric, Statistics>;

/// Windows keyed by start time, oldest first.
pub type Windows = BTreeMap<WindowKey, WindowEntry>;

/// Thread-safe store of in-flight aggregation windows.
///
/// The collect cadence folds sample batches into the current window while
/// the flush cadence concurrently removes completed ones. A single mutex
/// guards the whole map and is held for the full update or extraction, so
/// the two never interleave.
pub struct WindowStore {
    window_secs: u64,
    windows: Mutex<Windows>,
}

impl WindowStore {
    /// Creates an empty store bucketing by `window` (whole seconds, at least 1).
    pub fn new(window: Duration) -> Self {
        Self {
            window_secs: window.as_secs().max(1),
            windows: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the key of the window that is current at `now`.
    pub fn window_key(&self, now: SystemTime) -> WindowKey {
        window_key(now, self.window_secs)
    }

    /// Folds every value of `batch` into the window current at `now`.
    ///
    /// Returns the number of values recorded. Metrics without values do not
    /// create accumulators, and a batch without any value leaves the store
    /// untouched.
    pub fn aggregate(&self, batch: &SampleBatch, now: SystemTime) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let key = self.window_key(now);
        let mut windows = self.windows.lock();
        let entry = windows.entry(key).or_default();

        let mut recorded = 0;
        for (metric, values) in batch.iter() {
            if values.is_empty() {
                continue;
            }
            entry.entry(metric).or_default().record_all(values);
            recorded += values.len();
        }

        recorded
    }

    /// Removes and returns every window whose key is `<= cutoff`.
    ///
    /// Windows newer than the cutoff are left in place.
    pub fn extract(&self, cutoff: WindowKey) -> Windows {
        let mut windows = self.windows.lock();

        if cutoff == WindowKey::MAX {
            return mem::take(&mut *windows);
        }

        let retained = windows.split_off(&(cutoff + 1));
        mem::replace(&mut *windows, retained)
    }

    /// Number of windows currently held.
    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.lock().is_empty()
    }

    /// Returns a copy of the current store contents.
    pub fn snapshot(&self) -> Windows {
        self.windows.lock().clone()
    }
}

/// Floors `now` to a multiple of `window_secs`.
pub fn window_key(now: SystemTime, window_secs: u64) -> WindowKey {
    let window_secs = window_secs.max(1);
    (unix_seconds(now) / window_secs) * window_secs
}

/// Cutoff for a flush at `now`: every window starting at least one send
/// interval ago is complete.
pub fn flush_cutoff(now: SystemTime, send_frequency: Duration) -> WindowKey {
    unix_seconds(now).saturating_sub(send_frequency.as_secs())
}

/// Whole seconds since the Unix epoch, clamped to zero before it.
pub fn unix_seconds(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
