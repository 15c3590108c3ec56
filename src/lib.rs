//! # PvEngine-RS: Reactive Process-Variable Engine
//!
//! The data engine behind live, data-bound technical displays. Widgets bind
//! to named process variables (PVs); the engine keeps PV values, derived
//! formulas, conditional rules and display scripts consistent as values
//! change over time, re-evaluating only what a change actually reaches.
//!
//! ## Architecture
//!
//! - **PV registry**: named data cells created on first reference, mutated only
//!   through the engine write path
//! - **Trigger graph**: PV to the formulas, rules and scripts it drives
//! - **Generators**: time-driven sources behind `sim://` and `sys://` PVs
//! - **Formulas / rules / scripts**: Rhai-backed reactive units
//! - **Traces**: fixed-capacity ring buffers feeding charts
//!
//! Evaluation is single-threaded and tick-driven: an external loop calls
//! [`PvEngine::step`] once per frame with the elapsed clock time.
//!
//! ## Configuration
//!
//! Engine settings are read from `engine.toml` in the platform config
//! directory under `pvengine-rs` (see [`config`]).
//!
//! ## Example
//!
//! ```ignore
//! use pvengine_rs::{
//!     rules::RuleDeclaration,
//!     scripting::PvInput,
//!     widget::{shared, PropertyKind, PropertyMapWidget},
//!     EngineConfig, PvEngine,
//! };
//! use std::time::Duration;
//!
//! let mut engine = PvEngine::new(EngineConfig::default());
//! let lamp = shared(PropertyMapWidget::new("lamp").with_property("on", PropertyKind::Boolean, false));
//!
//! engine.add_rule(
//!     &lamp,
//!     RuleDeclaration::new("high", "on")
//!         .with_input(PvInput::trigger("sim://sine(0,10,20,0.1)"))
//!         .with_output("pv0 > 5", "true"),
//! )?;
//!
//! for frame in 0..60u64 {
//!     engine.step(Duration::from_millis(frame * 16));
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod formula;
pub mod generators;
pub mod pv;
pub mod rules;
pub mod scripting;
pub mod trace;
pub mod types;
pub mod widget;

// Re-export commonly used types
pub use config::{DisplayDocument, EngineConfig};
pub use engine::{PvEngine, TraceSpec, UnitRef};
pub use error::{PvError, Result, UnitError};
pub use pv::{Pv, PvId, PvName};
pub use trace::{RingBuffer, TraceBuffer, TraceConfig};
pub use types::{PvValue, Sample, Severity};
