//! Core data types for the PV engine
//!
//! This module contains the value model shared by PVs, generators, formulas,
//! rules, scripts and traces.
//!
//! # Main Types
//!
//! - [`PvValue`] - Dynamically-typed PV value (number, string, boolean, numeric array)
//! - [`Severity`] - Alarm severity of a PV
//! - [`Limits`] - Display/alarm/warning limit sextuplet
//! - [`Sample`] - An immutable value + timestamp + severity triple
//!
//! # Conversions
//!
//! [`PvValue::to_number`] and [`PvValue::format`] are the two conversion
//! helpers every consumer goes through: numeric accessors, trace buffers and
//! rule predicates use the former, string accessors and the clock the latter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The value held by a PV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PvValue {
    /// Boolean value
    Bool(bool),
    /// Floating point number (integers are represented as whole numbers)
    Number(f64),
    /// Text value
    Text(String),
    /// Numeric waveform
    Array(Vec<f64>),
}

impl PvValue {
    /// Numeric view of the value.
    ///
    /// Booleans map to 0/1, text is parsed (NaN when it is not a number) and
    /// arrays yield their first element.
    pub fn to_number(&self) -> f64 {
        match self {
            PvValue::Number(n) => *n,
            PvValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            PvValue::Text(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
            PvValue::Array(values) => values.first().copied().unwrap_or(f64::NAN),
        }
    }

    /// Integer view of the value (truncated towards zero, 0 for NaN)
    pub fn to_integer(&self) -> i64 {
        let n = self.to_number();
        if n.is_nan() {
            0
        } else {
            n.trunc() as i64
        }
    }

    /// Truthiness used by boolean widget properties
    pub fn to_bool(&self) -> bool {
        match self {
            PvValue::Bool(b) => *b,
            PvValue::Text(s) => !s.is_empty() && s != "false" && s != "0",
            other => {
                let n = other.to_number();
                !n.is_nan() && n != 0.0
            }
        }
    }

    /// Render the value as text, honoring an optional decimal precision
    pub fn format(&self, precision: Option<u32>) -> String {
        match self {
            PvValue::Number(n) => format_number(*n, precision),
            PvValue::Bool(b) => b.to_string(),
            PvValue::Text(s) => s.clone(),
            PvValue::Array(values) => {
                let parts: Vec<String> = values
                    .iter()
                    .map(|v| format_number(*v, precision))
                    .collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }

    /// Parse a literal as written in PV initializers and rule outputs.
    ///
    /// Accepts numbers, `true`/`false`, quoted strings (single or double
    /// quotes) and bracketed numeric arrays. Anything else is kept as text.
    pub fn parse_literal(literal: &str) -> PvValue {
        let trimmed = literal.trim();
        if let Ok(n) = trimmed.parse::<f64>() {
            return PvValue::Number(n);
        }
        match trimmed {
            "true" => return PvValue::Bool(true),
            "false" => return PvValue::Bool(false),
            _ => {}
        }
        if let Some(inner) = strip_quotes(trimmed) {
            return PvValue::Text(inner.to_string());
        }
        if let Some(inner) = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            let parsed: std::result::Result<Vec<f64>, _> = inner
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse::<f64>)
                .collect();
            if let Ok(values) = parsed {
                return PvValue::Array(values);
            }
        }
        PvValue::Text(trimmed.to_string())
    }

    /// Returns true if this is a numeric array
    pub fn is_array(&self) -> bool {
        matches!(self, PvValue::Array(_))
    }
}

fn strip_quotes(s: &str) -> Option<&str> {
    if s.len() < 2 {
        return None;
    }
    let first = s.chars().next()?;
    if (first == '"' || first == '\'') && s.ends_with(first) {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

fn format_number(n: f64, precision: Option<u32>) -> String {
    match precision {
        Some(p) => format!("{:.*}", p as usize, n),
        None => n.to_string(),
    }
}

impl Default for PvValue {
    fn default() -> Self {
        PvValue::Number(0.0)
    }
}

impl std::fmt::Display for PvValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format(None))
    }
}

impl From<f64> for PvValue {
    fn from(n: f64) -> Self {
        PvValue::Number(n)
    }
}

impl From<i64> for PvValue {
    fn from(n: i64) -> Self {
        PvValue::Number(n as f64)
    }
}

impl From<i32> for PvValue {
    fn from(n: i32) -> Self {
        PvValue::Number(n as f64)
    }
}

impl From<bool> for PvValue {
    fn from(b: bool) -> Self {
        PvValue::Bool(b)
    }
}

impl From<&str> for PvValue {
    fn from(s: &str) -> Self {
        PvValue::Text(s.to_string())
    }
}

impl From<String> for PvValue {
    fn from(s: String) -> Self {
        PvValue::Text(s)
    }
}

impl From<Vec<f64>> for PvValue {
    fn from(values: Vec<f64>) -> Self {
        PvValue::Array(values)
    }
}

/// Alarm severity of a PV
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Severity {
    /// No alarm
    None,
    /// Minor alarm (warning)
    Minor,
    /// Major alarm
    Major,
    /// Value is invalid
    Invalid,
    /// No value received yet
    #[default]
    Undefined,
}

impl Severity {
    /// Numeric code exposed to rules (`pvSevN`) and scripts
    pub fn code(&self) -> i64 {
        match self {
            Severity::None => 0,
            Severity::Minor => 1,
            Severity::Major => 2,
            Severity::Invalid => 3,
            Severity::Undefined => 4,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::None => write!(f, "NONE"),
            Severity::Minor => write!(f, "MINOR"),
            Severity::Major => write!(f, "MAJOR"),
            Severity::Invalid => write!(f, "INVALID"),
            Severity::Undefined => write!(f, "UNDEFINED"),
        }
    }
}

/// Display, alarm and warning limits of a PV
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Limits {
    pub lower_display: Option<f64>,
    pub lower_alarm: Option<f64>,
    pub lower_warning: Option<f64>,
    pub upper_warning: Option<f64>,
    pub upper_alarm: Option<f64>,
    pub upper_display: Option<f64>,
}

impl Limits {
    /// Display-only limits spanning `[min, max]`
    pub fn display(min: f64, max: f64) -> Self {
        Self {
            lower_display: Some(min),
            upper_display: Some(max),
            ..Default::default()
        }
    }
}

/// A single value update applied to exactly one PV
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub value: PvValue,
    pub time: DateTime<Utc>,
    pub severity: Severity,
}

impl Sample {
    /// Create a sample with no alarm
    pub fn new(value: impl Into<PvValue>, time: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            time,
            severity: Severity::None,
        }
    }

    /// Set the alarm severity
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}
