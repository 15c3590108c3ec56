//! Bounded sample history for charting.
//!
//! [`RingBuffer`] is the fixed-capacity store: `push` overwrites the slot at
//! the write pointer and advances it modulo the capacity, so once full the
//! oldest sample is always the one replaced. [`TraceBuffer`] layers the
//! update-mode gating, x synthesis and historical merge on top of it.

mod buffer;

pub use buffer::{
    HistoricalDataProvider, HistorySample, TraceBuffer, TraceConfig, TracePoint, UpdateMode,
    XSource,
};

#[cfg(test)]
pub use buffer::MockHistoricalDataProvider;

use std::cmp::Ordering;

/// Fixed-capacity circular store with FIFO eviction
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// Next slot to write
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` samples (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    /// Write at the current pointer and advance it, returning the evicted sample
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = self.slots[self.head].replace(value);
        self.head = (self.head + 1) % self.slots.len();
        if evicted.is_none() {
            self.len += 1;
        }
        evicted
    }

    /// True iff the next push would overwrite a live sample
    pub fn is_full(&self) -> bool {
        self.slots[self.head].is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.head = 0;
        self.len = 0;
    }

    /// Live samples, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter()).filter_map(Option::as_ref)
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy of all live samples in insertion order
    pub fn snapshot(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    /// Copy of all live samples sorted ascending by a numeric `key`.
    ///
    /// The sort is stable, so samples with equal keys keep insertion order.
    /// NaN keys sort last.
    pub fn snapshot_sorted_by<F>(&self, mut key: F) -> Vec<T>
    where
        F: FnMut(&T) -> f64,
    {
        let mut samples = self.snapshot();
        samples.sort_by(|a, b| total_order(key(a), key(b)));
        samples
    }
}

/// Total order on f64 with every NaN after every number
pub(crate) fn total_order(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => a.total_cmp(&b),
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
    }
}
