//! Configuration module for the PV engine
//!
//! This module handles:
//! - Engine configuration (script limits, trace defaults, generator settings)
//! - Display documents describing widgets, rules, scripts and traces
//!
//! # Config Location
//!
//! [`EngineConfig::load_or_default`] reads `engine.toml` from the
//! platform-appropriate config directory under `pvengine-rs`:
//!
//! - **Linux**: `~/.config/pvengine-rs/`
//! - **macOS**: `~/Library/Application Support/pvengine-rs/`
//! - **Windows**: `%APPDATA%\pvengine-rs\`
//!
//! # Formats
//!
//! Files ending in `.json` are parsed as JSON, everything else as TOML.
//!
//! # Example
//!
//! ```ignore
//! use pvengine_rs::config::EngineConfig;
//!
//! let config = EngineConfig::load("engine.toml")?;
//! let engine = PvEngine::new(config);
//! ```

pub mod display;

pub use display::{DisplayDocument, LoadedDisplay, PropertyDecl, RunSettings, TraceDecl, WidgetDecl};

use crate::error::{PvError, Result};
use crate::generators::DEFAULT_CLOCK_FORMAT;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "pvengine-rs";

/// Engine config filename
pub const ENGINE_CONFIG_FILE: &str = "engine.toml";

/// Default number of samples kept per trace
pub const DEFAULT_TRACE_CAPACITY: usize = 1000;

/// Get the application config directory path
pub fn app_config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the engine config file
pub fn engine_config_path() -> Option<PathBuf> {
    app_config_dir().map(|p| p.join(ENGINE_CONFIG_FILE))
}

/// Parse a TOML or JSON document, chosen by file extension
pub(crate) fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PvError::Config(format!("Failed to read {:?}: {}", path, e)))?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content)
            .map_err(|e| PvError::Config(format!("Failed to parse {:?}: {}", path, e)))
    } else {
        toml::from_str(&content)
            .map_err(|e| PvError::Config(format!("Failed to parse {:?}: {}", path, e)))
    }
}

// ==================== Script Limits ====================

/// Safety limits applied to every Rhai engine (formulas, rules, scripts).
///
/// `max_operations` bounds a single invocation, so a runaway display script
/// terminates with an error instead of stalling the tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            max_call_levels: 32,
            max_expr_depth: 64,
            max_string_size: 10_000,
            max_array_size: 10_000,
        }
    }
}

// ==================== Engine Config ====================

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Limits for formula, rule and script evaluation
    pub script_limits: ScriptLimits,

    /// Capacity of traces that do not specify one
    pub default_trace_capacity: usize,

    /// Seed for noise generators (None = seeded from the system clock)
    pub rng_seed: Option<u64>,

    /// `strftime` format of `sys://time`
    pub clock_format: String,

    /// Update interval of `sys://time` in seconds
    pub clock_interval_secs: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            script_limits: ScriptLimits::default(),
            default_trace_capacity: DEFAULT_TRACE_CAPACITY,
            rng_seed: None,
            clock_format: DEFAULT_CLOCK_FORMAT.to_string(),
            clock_interval_secs: 1.0,
        }
    }
}

impl EngineConfig {
    /// Load an engine config file (TOML or JSON)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_document(path.as_ref())
    }

    /// Load from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = engine_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load engine config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PvError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| PvError::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| PvError::Config(format!("Failed to write config {:?}: {}", path, e)))
    }

    /// Set a fixed seed for noise generators
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}

// ==================== Tests ====================
