//! Error handling for the PV engine
//!
//! This module defines the crate error type, a Result alias, and the
//! per-invocation [`UnitError`] record used for isolated runtime failures.

use thiserror::Error;

/// Main error type for PV engine operations
#[derive(Error, Debug)]
pub enum PvError {
    /// The PV name does not match any supported scheme
    #[error("Unsupported PV: {0}")]
    UnsupportedPv(String),

    /// Write or lookup of a PV that was never created
    #[error("Unknown PV: {0}")]
    UnknownPv(String),

    /// Write to a PV that exists but does not accept writes
    #[error("PV is not writable: {0}")]
    NotWritable(String),

    /// Formula compilation or evaluation errors
    #[error("Formula error: {0}")]
    Formula(String),

    /// Rule declaration or evaluation errors
    #[error("Rule error: {0}")]
    Rule(String),

    /// Rule target property is not defined on the widget
    #[error("Widget '{widget}' has no property '{property}'")]
    MissingProperty { widget: String, property: String },

    /// Errors related to script compilation or execution
    #[error("Script error: {0}")]
    Script(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PvError>,
    },
}

impl PvError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PvError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        PvError::Script(err.to_string())
    }
}

/// Result type alias for PV engine operations
pub type Result<T> = std::result::Result<T, PvError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, Box<rhai::EvalAltResult>> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PvError::from_rhai_error(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| PvError::from_rhai_error(e).with_context(f()))
    }
}

/// A runtime failure of one reactive unit during a tick.
///
/// Failures are isolated per invocation: the engine records them and keeps
/// running the remaining units of the same tick.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitError {
    /// Display label of the failing unit (formula source, rule or script name)
    pub unit: String,
    /// Rendered error message
    pub message: String,
}

impl UnitError {
    pub fn new(unit: impl Into<String>, err: &PvError) -> Self {
        Self {
            unit: unit.into(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for UnitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.unit, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PvError::UnsupportedPv("ca://foo".to_string());
        assert_eq!(err.to_string(), "Unsupported PV: ca://foo");
    }

    #[test]
    fn test_error_with_context() {
        let err = PvError::Formula("unexpected ')'".to_string());
        let with_ctx = err.with_context("Failed to create =1+)");
        assert!(with_ctx.to_string().contains("Failed to create"));
        assert!(with_ctx.to_string().contains("unexpected"));
    }

    #[test]
    fn test_missing_property_error() {
        let err = PvError::MissingProperty {
            widget: "gauge".to_string(),
            property: "fill_color".to_string(),
        };
        assert!(err.to_string().contains("gauge"));
        assert!(err.to_string().contains("fill_color"));
    }

    #[test]
    fn test_unit_error_display() {
        let err = UnitError::new("script 'alarm'", &PvError::Script("boom".into()));
        assert_eq!(err.to_string(), "script 'alarm': Script error: boom");
    }
}
