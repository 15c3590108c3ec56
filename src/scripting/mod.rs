//! Display scripts.
//!
//! A script binds a widget, an ordered list of input PVs and a body of user
//! logic. Only inputs flagged `trigger = true` re-run the script when they
//! change; the others are readable but passive.
//!
//! Execution goes through the [`ScriptRuntime`] capability so the engine is
//! independent of the sandbox. The bundled [`RhaiScriptRuntime`] runs bodies
//! with Rhai and exposes these host functions:
//!
//! - `pv_count()`, `pv_name(i)` - bound PV metadata
//! - `pv_double(i)`, `pv_long(i)`, `pv_string(i)`, `pv_severity(i)`, `pv_value(i)` - typed PV reads
//! - `write_pv(i, value)` - write a bound PV (applied by the engine)
//! - `widget_get(name)`, `widget_set(name, value)` - bound widget properties
//! - `console(msg)` / `print(msg)` - console output
//! - `alert(msg)` - message dialog
//! - `color(r, g, b)`, `font(family, size)`, `font(family, size, style)` - value constructors
//!
//! ## Example
//!
//! ```rhai
//! // Blink the LED while the tank level is above its alarm limit
//! let level = pv_double(0);
//! widget_set("on", level > 90.0);
//! if level > 95.0 {
//!     alert("Tank " + pv_name(0) + " overflowing");
//! }
//! ```

mod convert;
mod engine;

pub use convert::{dynamic_to_pv, pv_to_dynamic};
pub use engine::{configure_engine, expression_engine, RhaiScriptRuntime};

use crate::error::{PvError, Result};
use crate::pv::PvSnapshot;
use crate::types::PvValue;
use crate::widget::SharedWidget;
use rhai::{Engine, AST};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One input PV of a rule or script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvInput {
    /// PV name, created through the engine on registration
    pub name: String,
    /// Whether a change of this PV re-runs the unit
    #[serde(default = "default_trigger")]
    pub trigger: bool,
}

fn default_trigger() -> bool {
    true
}

impl PvInput {
    pub fn trigger(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trigger: true,
        }
    }

    pub fn passive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trigger: false,
        }
    }
}

/// A script attached to a widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDeclaration {
    /// Label used in logs and errors
    pub name: String,
    /// Script body
    pub body: String,
    #[serde(default)]
    pub inputs: Vec<PvInput>,
}

impl ScriptDeclaration {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            inputs: Vec::new(),
        }
    }

    pub fn with_input(mut self, input: PvInput) -> Self {
        self.inputs.push(input);
        self
    }
}

/// Kind of host output produced by a script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMessageKind {
    Console,
    Dialog,
}

/// Console line or dialog emitted by a script
#[derive(Debug, Clone, PartialEq)]
pub struct HostMessage {
    pub source: String,
    pub kind: HostMessageKind,
    pub text: String,
}

/// Everything a script body can see during one invocation.
///
/// The runtime fills `pv_writes` and `messages`; the engine applies and
/// forwards them after the invocation returns.
pub struct ScriptContext {
    /// Script label
    pub script: String,
    pub widget: SharedWidget,
    /// Bound PVs in declaration order
    pub pvs: Vec<PvSnapshot>,
    /// `(input index, value)` writes requested by the body
    pub pv_writes: Vec<(usize, PvValue)>,
    pub messages: Vec<HostMessage>,
}

impl ScriptContext {
    pub fn new(script: impl Into<String>, widget: SharedWidget, pvs: Vec<PvSnapshot>) -> Self {
        Self {
            script: script.into(),
            widget,
            pvs,
            pv_writes: Vec::new(),
            messages: Vec::new(),
        }
    }
}

impl std::fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptContext")
            .field("script", &self.script)
            .field("pvs", &self.pvs)
            .field("pv_writes", &self.pv_writes)
            .finish()
    }
}

/// Pluggable script execution capability
pub trait ScriptRuntime: Send {
    /// Check a body for syntax errors without running it
    fn validate(&self, body: &str) -> Result<()>;

    /// Run a body synchronously against `ctx`
    fn run(&self, body: &str, ctx: &mut ScriptContext) -> Result<()>;
}

/// A compiled script body
#[derive(Clone)]
pub struct CompiledScript {
    ast: AST,
    source: String,
}

impl CompiledScript {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &AST {
        &self.ast
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("source", &self.source)
            .finish()
    }
}

/// Cache for compiled scripts to avoid recompilation
#[derive(Default)]
pub struct ScriptCache {
    /// Map from script source to compiled script
    cache: HashMap<String, CompiledScript>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// Get a cached script or compile and cache it
    pub fn get_or_compile(&mut self, engine: &Engine, source: &str) -> Result<CompiledScript> {
        if let Some(script) = self.cache.get(source) {
            return Ok(script.clone());
        }

        let ast = engine
            .compile(source)
            .map_err(|e| PvError::Script(format!("Compilation error: {}", e)))?;

        let script = CompiledScript {
            ast,
            source: source.to_string(),
        };

        self.cache.insert(source.to_string(), script.clone());
        Ok(script)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
