//! Process variables.
//!
//! A [`Pv`] is a named, typed data cell. PVs live in the engine registry and
//! are addressed by [`PvId`], a newtype over `u32` that is a direct index into
//! the registry vector. Consumers only ever hold ids or shared references;
//! every mutation goes through the engine write path.

mod name;

pub use name::{PvName, SimFunction};

use crate::types::{Limits, PvValue, Sample, Severity};
use chrono::{DateTime, Utc};
use std::fmt;

/// Index into the engine's PV registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PvId(pub u32);

impl PvId {
    pub const INVALID: PvId = PvId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for PvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "PvId(INVALID)")
        } else {
            write!(f, "PvId({})", self.0)
        }
    }
}

impl fmt::Display for PvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a PV gets its values
#[derive(Debug, Clone, PartialEq)]
pub enum PvKind {
    /// User-settable scratch value, with the initializer it was declared with
    Local { initializer: Option<String> },
    /// Driven by a sample generator (`sim://`, `sys://` or a custom generator)
    Simulated,
    /// Backed by a compiled formula
    Formula,
}

/// One named data point
#[derive(Debug, Clone)]
pub struct Pv {
    name: String,
    kind: PvKind,
    /// Current value (`None` until the first sample)
    pub(crate) value: Option<PvValue>,
    /// Time of the last update
    pub(crate) time: Option<DateTime<Utc>>,
    pub(crate) severity: Severity,
    pub(crate) writable: bool,
    pub(crate) disconnected: bool,
    pub(crate) limits: Limits,
    pub(crate) precision: Option<u32>,
}

impl Pv {
    pub(crate) fn new(name: impl Into<String>, kind: PvKind) -> Self {
        let writable = matches!(kind, PvKind::Local { .. });
        Self {
            name: name.into(),
            kind,
            value: None,
            time: None,
            severity: Severity::Undefined,
            writable,
            disconnected: true,
            limits: Limits::default(),
            precision: None,
        }
    }

    /// Record the initializer of a local PV first declared without one
    pub(crate) fn set_initializer(&mut self, initializer: String) {
        if let PvKind::Local { initializer: slot } = &mut self.kind {
            *slot = Some(initializer);
        }
    }

    /// Apply a sample, returning true if the visible value changed
    pub(crate) fn apply(&mut self, sample: Sample) -> bool {
        let changed = self.value.as_ref() != Some(&sample.value) || self.severity != sample.severity;
        self.value = Some(sample.value);
        self.time = Some(sample.time);
        self.severity = sample.severity;
        self.disconnected = false;
        changed
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &PvKind {
        &self.kind
    }

    pub fn value(&self) -> Option<&PvValue> {
        self.value.as_ref()
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn precision(&self) -> Option<u32> {
        self.precision
    }

    /// Numeric view of the current value (NaN when there is none)
    pub fn number(&self) -> f64 {
        self.value.as_ref().map(PvValue::to_number).unwrap_or(f64::NAN)
    }

    /// Text view of the current value using the PV precision
    pub fn formatted(&self) -> String {
        self.value
            .as_ref()
            .map(|v| v.format(self.precision))
            .unwrap_or_default()
    }

    /// Snapshot handed to scripts and rules
    pub fn snapshot(&self) -> PvSnapshot {
        PvSnapshot {
            name: self.name.clone(),
            value: self.value.clone(),
            severity: self.severity,
            precision: self.precision,
            time: self.time,
        }
    }
}

/// Read-only copy of a PV's state at the moment a unit runs
#[derive(Debug, Clone, PartialEq)]
pub struct PvSnapshot {
    pub name: String,
    pub value: Option<PvValue>,
    pub severity: Severity,
    pub precision: Option<u32>,
    pub time: Option<DateTime<Utc>>,
}

impl PvSnapshot {
    pub fn number(&self) -> f64 {
        self.value.as_ref().map(PvValue::to_number).unwrap_or(f64::NAN)
    }

    pub fn integer(&self) -> i64 {
        self.value.as_ref().map(PvValue::to_integer).unwrap_or(0)
    }

    pub fn text(&self) -> String {
        self.value
            .as_ref()
            .map(|v| v.format(self.precision))
            .unwrap_or_default()
    }
}
