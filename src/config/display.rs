//! Display documents.
//!
//! A display document describes everything the runner binary needs to build a
//! display against a [`PvEngine`]: widgets with typed properties, the rules and
//! scripts attached to them, extra PVs to create up front, traces, and how long
//! to run.
//!
//! ```toml
//! pvs = ["sim://ramp(0,10,1,1)"]
//!
//! [run]
//! ticks = 20
//! tick_ms = 500
//!
//! [[widgets]]
//! name = "tank"
//!
//! [widgets.properties.level]
//! kind = "number"
//! default = 0
//!
//! [[widgets.rules]]
//! name = "level"
//! property = "level"
//! output_expression = true
//! outputs = [{ expression = "true", output_value = "pv0 * 10" }]
//! inputs = [{ name = "sim://ramp(0,10,1,1)" }]
//! ```

use super::read_document;
use crate::engine::{PvEngine, TraceId, TraceSpec};
use crate::error::{Result, ResultExt};
use crate::rules::RuleDeclaration;
use crate::scripting::ScriptDeclaration;
use crate::trace::{TraceConfig, UpdateMode, XSource};
use crate::types::PvValue;
use crate::widget::{shared, PropertyKind, PropertyMapWidget, SharedWidget};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// A widget property with its kind and default value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDecl {
    #[serde(default)]
    pub kind: PropertyKind,
    pub default: PvValue,
}

/// A widget and the reactive units bound to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetDecl {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDecl>,
    #[serde(default)]
    pub rules: Vec<RuleDeclaration>,
    #[serde(default)]
    pub scripts: Vec<ScriptDeclaration>,
}

/// A trace fed by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceDecl {
    pub name: String,
    pub y_pv: String,
    #[serde(default)]
    pub x_pv: Option<String>,
    /// Falls back to the engine's default trace capacity
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub mode: UpdateMode,
    #[serde(default)]
    pub x_source: XSource,
    #[serde(default)]
    pub sort_by_x: bool,
}

/// How the runner drives the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Number of ticks to run
    pub ticks: u32,
    /// Clock advance per tick in milliseconds
    pub tick_ms: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            ticks: 10,
            tick_ms: 1000,
        }
    }
}

impl RunSettings {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// A display as loaded from disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayDocument {
    pub pvs: Vec<String>,
    pub widgets: Vec<WidgetDecl>,
    pub traces: Vec<TraceDecl>,
    pub run: RunSettings,
}

/// Handles to everything a document registered
pub struct LoadedDisplay {
    pub widgets: Vec<(String, SharedWidget)>,
    pub traces: Vec<(String, TraceId)>,
}

impl DisplayDocument {
    /// Load a display document (TOML or JSON)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_document(path.as_ref())
    }

    /// Register PVs, widgets, rules, scripts and traces with `engine`.
    ///
    /// Stops at the first declaration the engine rejects; whatever was
    /// registered before it stays registered until the engine is reset.
    pub fn instantiate(&self, engine: &mut PvEngine) -> Result<LoadedDisplay> {
        for name in &self.pvs {
            engine.create_pv(name)?;
        }

        let mut widgets = Vec::with_capacity(self.widgets.len());
        for decl in &self.widgets {
            let mut widget = PropertyMapWidget::new(decl.name.as_str());
            for (property, prop) in &decl.properties {
                widget.define(property.as_str(), prop.kind, prop.default.clone());
            }
            let widget = shared(widget);

            for rule in &decl.rules {
                engine
                    .add_rule(&widget, rule.clone())
                    .with_context(|| format!("widget '{}'", decl.name))?;
            }
            for script in &decl.scripts {
                engine
                    .add_script(&widget, script.clone())
                    .with_context(|| format!("widget '{}'", decl.name))?;
            }
            widgets.push((decl.name.clone(), widget));
        }

        let default_capacity = engine.config().default_trace_capacity;
        let mut traces = Vec::with_capacity(self.traces.len());
        for decl in &self.traces {
            let config = TraceConfig {
                capacity: decl.capacity.unwrap_or(default_capacity),
                mode: decl.mode,
                x_source: decl.x_source,
                sort_by_x: decl.sort_by_x,
            };
            let spec = TraceSpec {
                y_pv: decl.y_pv.clone(),
                x_pv: decl.x_pv.clone(),
                config,
            };
            let id = engine
                .create_trace(spec)
                .with_context(|| format!("trace '{}'", decl.name))?;
            traces.push((decl.name.clone(), id));
        }

        tracing::info!(
            "Instantiated display: {} widget(s), {} PV(s), {} trace(s)",
            widgets.len(),
            engine.pv_count(),
            traces.len()
        );
        Ok(LoadedDisplay { widgets, traces })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::PvError;

    const TANK: &str = r#"
pvs = ["loc://setpoint(4)"]

[run]
ticks = 3
tick_ms = 250

[[widgets]]
name = "tank"

[widgets.properties.level]
kind = "number"
default = 0

[widgets.properties.label]
default = "idle"

[[widgets.rules]]
name = "level"
property = "level"
output_expression = true
outputs = [{ expression = "true", output_value = "pv0 * 10" }]
inputs = [{ name = "loc://setpoint" }]

[[widgets.scripts]]
name = "label"
body = 'widget_set("label", "at " + pv_string(0));'
inputs = [{ name = "loc://setpoint" }]

[[traces]]
name = "setpoint"
y_pv = "loc://setpoint"
capacity = 8
"#;

    fn engine() -> PvEngine {
        PvEngine::new(EngineConfig::default().with_seed(3))
    }

    #[test]
    fn test_parse_toml_document() {
        let doc: DisplayDocument = toml::from_str(TANK).unwrap();
        assert_eq!(doc.run.ticks, 3);
        assert_eq!(doc.run.tick_period(), Duration::from_millis(250));
        assert_eq!(doc.widgets.len(), 1);

        let tank = &doc.widgets[0];
        assert_eq!(tank.properties["level"].kind, PropertyKind::Number);
        assert_eq!(tank.properties["label"].kind, PropertyKind::String);
        assert_eq!(tank.properties["label"].default, PvValue::Text("idle".into()));
        assert!(tank.rules[0].output_expression);
        assert!(tank.scripts[0].inputs[0].trigger);
        assert_eq!(doc.traces[0].mode, UpdateMode::XOrY);
    }

    #[test]
    fn test_instantiate_and_run() {
        let doc: DisplayDocument = toml::from_str(TANK).unwrap();
        let mut engine = engine();
        let loaded = doc.instantiate(&mut engine).unwrap();
        assert_eq!(engine.rule_count(), 1);
        assert_eq!(engine.script_count(), 1);
        assert_eq!(loaded.traces.len(), 1);

        engine.step(Duration::ZERO);
        let (_, tank) = &loaded.widgets[0];
        let tank = tank.read().unwrap();
        assert_eq!(tank.get_property("level"), Some(PvValue::Number(40.0)));
        assert_eq!(tank.get_property("label"), Some(PvValue::Text("at 4".into())));
    }

    #[test]
    fn test_load_json_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("display.json");
        std::fs::write(
            &path,
            r#"{ "pvs": ["sim://noise"], "traces": [{ "name": "n", "y_pv": "sim://noise" }] }"#,
        )
        .unwrap();

        let doc = DisplayDocument::load(&path).unwrap();
        assert_eq!(doc.run, RunSettings::default());
        assert_eq!(doc.traces[0].capacity, None);

        let mut engine = engine();
        let loaded = doc.instantiate(&mut engine).unwrap();
        let id = loaded.traces[0].1;
        assert_eq!(
            engine.trace(id).unwrap().capacity(),
            engine.config().default_trace_capacity
        );
    }

    #[test]
    fn test_bad_rule_reports_widget() {
        let doc: DisplayDocument = toml::from_str(
            r#"
[[widgets]]
name = "lamp"

[[widgets.rules]]
name = "blink"
property = "blink"
inputs = [{ name = "loc://x" }]
"#,
        )
        .unwrap();
        let err = doc.instantiate(&mut engine()).err().unwrap();
        assert!(matches!(err, PvError::WithContext { .. }));
        assert!(err.to_string().contains("lamp"));
    }
}
