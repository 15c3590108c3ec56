//! Trace buffer: update-mode gating over a [`RingBuffer`] of points.

use super::{total_order, RingBuffer};
use crate::types::PvValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which input changes commit a new point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Either x or y changed
    #[default]
    XOrY,
    /// Both x and y changed since the last commit
    XAndY,
    /// x changed (y is sampled)
    X,
    /// y changed (x is sampled)
    Y,
}

/// Where the x coordinate of a point comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XSource {
    /// Value of the x PV, taken literally
    Pv,
    /// Timestamp of the y sample (seconds since the Unix epoch)
    SampleTime,
    /// Wall-clock time of the commit (seconds since the Unix epoch)
    WallClock,
    /// `previous x + 1`, starting at 0
    #[default]
    Sequence,
}

impl XSource {
    /// Whether x is synthesized instead of read from a PV
    pub fn is_synthesized(&self) -> bool {
        !matches!(self, XSource::Pv)
    }
}

/// Trace buffer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub capacity: usize,
    pub mode: UpdateMode,
    pub x_source: XSource,
    /// Sort snapshots by x (needed when x is not chronological)
    pub sort_by_x: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            capacity: crate::config::DEFAULT_TRACE_CAPACITY,
            mode: UpdateMode::default(),
            x_source: XSource::default(),
            sort_by_x: false,
        }
    }
}

impl TraceConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }
}

/// One chart point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TracePoint {
    pub x: f64,
    pub y: f64,
}

impl TracePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Sample supplied by a historical data provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistorySample {
    /// `None` means "position in the history"
    pub x: Option<f64>,
    pub y: f64,
}

/// Source of pre-existing samples for chronological traces
#[cfg_attr(test, mockall::automock)]
pub trait HistoricalDataProvider: Send {
    fn get_samples(&self) -> Vec<HistorySample>;

    fn disconnect(&mut self);
}

/// Live trace fed from PV updates
pub struct TraceBuffer {
    config: TraceConfig,
    ring: RingBuffer<TracePoint>,
    x: Option<f64>,
    y: Option<f64>,
    x_dirty: bool,
    y_dirty: bool,
    sample_time: Option<DateTime<Utc>>,
    last_x: Option<f64>,
    /// Whole-array replacement, set when the y PV carries an array
    array_y: Option<Vec<f64>>,
    array_x: Option<Vec<f64>>,
    history: Option<Box<dyn HistoricalDataProvider>>,
}

impl std::fmt::Debug for TraceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceBuffer")
            .field("config", &self.config)
            .field("len", &self.ring.len())
            .field("has_history", &self.history.is_some())
            .finish()
    }
}

impl TraceBuffer {
    pub fn new(config: TraceConfig) -> Self {
        Self {
            ring: RingBuffer::new(config.capacity),
            config,
            x: None,
            y: None,
            x_dirty: false,
            y_dirty: false,
            sample_time: None,
            last_x: None,
            array_y: None,
            array_x: None,
            history: None,
        }
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn len(&self) -> usize {
        match &self.array_y {
            Some(values) => values.len(),
            None => self.ring.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    fn capped(&self, values: &[f64]) -> Vec<f64> {
        values.iter().take(self.ring.capacity()).copied().collect()
    }

    /// Feed a new value of the x PV. Returns true if a point was committed.
    pub fn update_x(&mut self, value: &PvValue) -> bool {
        self.stage_x(value);
        self.commit()
    }

    /// Feed a new value of the y PV. Returns true if a point was committed
    /// (or the array contents were replaced).
    pub fn update_y(&mut self, value: &PvValue, time: DateTime<Utc>) -> bool {
        let replaced = self.stage_y(value, time);
        self.commit() || replaced
    }

    /// Record a new x value without committing a point
    pub fn stage_x(&mut self, value: &PvValue) {
        if let PvValue::Array(values) = value {
            self.array_x = Some(self.capped(values));
            return;
        }
        self.array_x = None;
        self.x = Some(value.to_number());
        self.x_dirty = true;
    }

    /// Record a new y value without committing a point.
    ///
    /// Arrays replace the trace contents at once; returns true in that case.
    /// A scalar drops any previous array contents.
    pub fn stage_y(&mut self, value: &PvValue, time: DateTime<Utc>) -> bool {
        if let PvValue::Array(values) = value {
            self.array_y = Some(self.capped(values));
            return true;
        }
        self.array_x = None;
        self.array_y = None;
        self.y = Some(value.to_number());
        self.y_dirty = true;
        self.sample_time = Some(time);
        false
    }

    fn gate_open(&self) -> bool {
        if self.config.x_source.is_synthesized() {
            return self.y_dirty;
        }
        match self.config.mode {
            UpdateMode::XOrY => self.x_dirty || self.y_dirty,
            UpdateMode::XAndY => self.x_dirty && self.y_dirty,
            UpdateMode::X => self.x_dirty,
            UpdateMode::Y => self.y_dirty,
        }
    }

    fn next_x(&self) -> Option<f64> {
        match self.config.x_source {
            XSource::Pv => self.x,
            XSource::SampleTime => self.sample_time.map(epoch_secs),
            XSource::WallClock => Some(epoch_secs(Utc::now())),
            XSource::Sequence => Some(self.last_x.map_or(0.0, |x| x + 1.0)),
        }
    }

    /// Commit one point from the staged values if the update mode allows it
    pub fn commit(&mut self) -> bool {
        if !self.gate_open() {
            return false;
        }
        let (Some(x), Some(y)) = (self.next_x(), self.y) else {
            return false;
        };
        self.ring.push(TracePoint::new(x, y));
        self.last_x = Some(x);
        self.x_dirty = false;
        self.y_dirty = false;
        true
    }

    /// Live points in insertion order, without history
    pub fn points(&self) -> Vec<TracePoint> {
        if let Some(ys) = &self.array_y {
            return ys
                .iter()
                .enumerate()
                .map(|(i, y)| {
                    let x = self
                        .array_x
                        .as_ref()
                        .and_then(|xs| xs.get(i).copied())
                        .unwrap_or(i as f64);
                    TracePoint::new(x, *y)
                })
                .collect();
        }
        self.ring.snapshot()
    }

    /// History followed by live points, sorted by x when configured
    pub fn snapshot(&self) -> Vec<TracePoint> {
        let mut points: Vec<TracePoint> = self
            .history
            .as_ref()
            .map(|h| {
                h.get_samples()
                    .into_iter()
                    .enumerate()
                    .map(|(i, s)| TracePoint::new(s.x.unwrap_or(i as f64), s.y))
                    .collect()
            })
            .unwrap_or_default();

        if self.config.sort_by_x && self.array_y.is_none() && points.is_empty() {
            return self.ring.snapshot_sorted_by(|p| p.x);
        }

        points.extend(self.points());
        if self.config.sort_by_x {
            points.sort_by(|a, b| total_order(a.x, b.x));
        }
        points
    }

    /// Attach a history source, disconnecting any previous one
    pub fn attach_history(&mut self, provider: Box<dyn HistoricalDataProvider>) {
        self.detach_history();
        self.history = Some(provider);
    }

    pub fn detach_history(&mut self) {
        if let Some(mut provider) = self.history.take() {
            provider.disconnect();
        }
    }

    pub fn has_history(&self) -> bool {
        self.history.is_some()
    }

    /// Drop all live points and pending state; history stays attached
    pub fn clear(&mut self) {
        self.ring.clear();
        self.x = None;
        self.y = None;
        self.x_dirty = false;
        self.y_dirty = false;
        self.sample_time = None;
        self.last_x = None;
        self.array_x = None;
        self.array_y = None;
    }
}

impl Drop for TraceBuffer {
    fn drop(&mut self) {
        self.detach_history();
    }
}

fn epoch_secs(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}
