//! Rhai implementation of the script runtime.
//!
//! [`configure_engine`] installs the safety limits and the shared math
//! library used by formulas, rules and scripts alike. [`RhaiScriptRuntime`]
//! adds the host functions that expose the bound widget and PVs of the
//! running script.

use super::convert::{dynamic_to_pv, pv_to_dynamic};
use super::{HostMessage, HostMessageKind, ScriptCache, ScriptContext, ScriptRuntime};
use crate::config::ScriptLimits;
use crate::error::{PvError, Result};
use crate::pv::PvSnapshot;
use crate::types::PvValue;
use crate::widget::SharedWidget;
use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use std::sync::{Arc, RwLock};

/// Configure a Rhai engine with safety limits and the built-in math library
pub fn configure_engine(engine: &mut Engine, limits: &ScriptLimits) {
    // Set safety limits
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_operations(limits.max_operations);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_array_size);

    // ===== Mathematical Functions =====

    engine.register_fn("abs", |x: f64| x.abs());
    engine.register_fn("sqrt", |x: f64| x.sqrt());
    engine.register_fn("pow", |x: f64, y: f64| x.powf(y));
    engine.register_fn("exp", |x: f64| x.exp());
    engine.register_fn("ln", |x: f64| x.ln());
    engine.register_fn("log", |x: f64| x.ln()); // Alias for natural log
    engine.register_fn("log10", |x: f64| x.log10());
    engine.register_fn("sin", |x: f64| x.sin());
    engine.register_fn("cos", |x: f64| x.cos());
    engine.register_fn("tan", |x: f64| x.tan());
    engine.register_fn("asin", |x: f64| x.asin());
    engine.register_fn("acos", |x: f64| x.acos());
    engine.register_fn("atan", |x: f64| x.atan());
    engine.register_fn("atan2", |y: f64, x: f64| y.atan2(x));

    // Rounding functions
    engine.register_fn("floor", |x: f64| x.floor());
    engine.register_fn("ceil", |x: f64| x.ceil());
    engine.register_fn("round", |x: f64| x.round());
    engine.register_fn("trunc", |x: f64| x.trunc());

    // Clamping and limiting
    engine.register_fn("clamp", |x: f64, min: f64, max: f64| x.clamp(min, max));
    engine.register_fn("min", |a: f64, b: f64| a.min(b));
    engine.register_fn("max", |a: f64, b: f64| a.max(b));
    engine.register_fn("deadband", |value: f64, center: f64, width: f64| -> f64 {
        if (value - center).abs() < width / 2.0 {
            center
        } else {
            value
        }
    });

    // Status word helpers
    engine.register_fn("bit_and", |a: i64, b: i64| a & b);
    engine.register_fn("bit_or", |a: i64, b: i64| a | b);
    engine.register_fn("bit_test", |a: i64, bit: i64| {
        (0..64).contains(&bit) && (a >> bit) & 1 == 1
    });

    // Type conversions
    engine.register_fn("to_int", |x: f64| x as i64);
    engine.register_fn("to_float", |x: i64| x as f64);

    // Constants
    engine.register_fn("pi", || std::f64::consts::PI);
    engine.register_fn("e", || std::f64::consts::E);

    // Utility functions
    engine.register_fn("is_nan", |x: f64| x.is_nan());
    engine.register_fn("is_finite", |x: f64| x.is_finite());
    engine.register_fn("lerp", |a: f64, b: f64, t: f64| a + (b - a) * t);
    engine.register_fn(
        "map_range",
        |x: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64| {
            (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
        },
    );
}

/// Build a configured engine for formula and rule expressions
pub fn expression_engine(limits: &ScriptLimits) -> Engine {
    let mut engine = Engine::new();
    configure_engine(&mut engine, limits);
    engine
}

/// State of the script currently running, read by the host functions
#[derive(Default)]
struct ActiveRun {
    script: String,
    widget: Option<SharedWidget>,
    pvs: Vec<PvSnapshot>,
    pv_writes: Vec<(usize, PvValue)>,
    messages: Vec<HostMessage>,
}

impl ActiveRun {
    fn pv(&self, index: i64) -> std::result::Result<&PvSnapshot, Box<EvalAltResult>> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.pvs.get(i))
            .ok_or_else(|| {
                format!(
                    "PV index {} out of range ({} PVs bound)",
                    index,
                    self.pvs.len()
                )
                .into()
            })
    }

    fn widget(&self) -> std::result::Result<SharedWidget, Box<EvalAltResult>> {
        self.widget
            .clone()
            .ok_or_else(|| "No widget bound to script".into())
    }

    fn push_message(&mut self, kind: HostMessageKind, text: String) {
        self.messages.push(HostMessage {
            source: self.script.clone(),
            kind,
            text,
        });
    }
}

/// Thread-safe shared run state
type SharedRun = Arc<RwLock<ActiveRun>>;

fn read_run(
    run: &SharedRun,
) -> std::result::Result<std::sync::RwLockReadGuard<'_, ActiveRun>, Box<EvalAltResult>> {
    run.read()
        .map_err(|e| format!("Failed to acquire script context lock: {}", e).into())
}

fn write_run(
    run: &SharedRun,
) -> std::result::Result<std::sync::RwLockWriteGuard<'_, ActiveRun>, Box<EvalAltResult>> {
    run.write()
        .map_err(|e| format!("Failed to acquire script context lock: {}", e).into())
}

/// Script runtime backed by Rhai
pub struct RhaiScriptRuntime {
    /// The Rhai engine instance
    engine: Engine,
    /// Cache of compiled script bodies
    cache: RwLock<ScriptCache>,
    /// Shared state of the invocation in progress
    active: SharedRun,
}

impl RhaiScriptRuntime {
    pub fn new(limits: &ScriptLimits) -> Self {
        let active: SharedRun = Arc::new(RwLock::new(ActiveRun::default()));
        let mut engine = Engine::new();
        configure_engine(&mut engine, limits);
        Self::register_host_functions(&mut engine, active.clone());

        Self {
            engine,
            cache: RwLock::new(ScriptCache::new()),
            active,
        }
    }

    fn register_host_functions(engine: &mut Engine, active: SharedRun) {
        // ===== Bound PVs =====
        {
            let run = active.clone();
            engine.register_fn("pv_count", move || -> i64 {
                run.read().map(|r| r.pvs.len() as i64).unwrap_or(0)
            });
        }
        {
            let run = active.clone();
            engine.register_fn(
                "pv_name",
                move |i: i64| -> std::result::Result<String, Box<EvalAltResult>> {
                    Ok(read_run(&run)?.pv(i)?.name.clone())
                },
            );
        }
        {
            let run = active.clone();
            engine.register_fn(
                "pv_double",
                move |i: i64| -> std::result::Result<f64, Box<EvalAltResult>> {
                    Ok(read_run(&run)?.pv(i)?.number())
                },
            );
        }
        {
            let run = active.clone();
            engine.register_fn(
                "pv_long",
                move |i: i64| -> std::result::Result<i64, Box<EvalAltResult>> {
                    Ok(read_run(&run)?.pv(i)?.integer())
                },
            );
        }
        {
            let run = active.clone();
            engine.register_fn(
                "pv_string",
                move |i: i64| -> std::result::Result<String, Box<EvalAltResult>> {
                    Ok(read_run(&run)?.pv(i)?.text())
                },
            );
        }
        {
            let run = active.clone();
            engine.register_fn(
                "pv_severity",
                move |i: i64| -> std::result::Result<i64, Box<EvalAltResult>> {
                    Ok(read_run(&run)?.pv(i)?.severity.code())
                },
            );
        }
        {
            let run = active.clone();
            engine.register_fn(
                "pv_value",
                move |i: i64| -> std::result::Result<Dynamic, Box<EvalAltResult>> {
                    let guard = read_run(&run)?;
                    Ok(guard
                        .pv(i)?
                        .value
                        .as_ref()
                        .map(pv_to_dynamic)
                        .unwrap_or(Dynamic::UNIT))
                },
            );
        }
        {
            let run = active.clone();
            engine.register_fn(
                "write_pv",
                move |i: i64, value: Dynamic| -> std::result::Result<(), Box<EvalAltResult>> {
                    let mut guard = write_run(&run)?;
                    guard.pv(i)?;
                    let value = dynamic_to_pv(value)
                        .ok_or_else(|| format!("Cannot write () to PV index {}", i))?;
                    guard.pv_writes.push((i as usize, value));
                    Ok(())
                },
            );
        }

        // ===== Bound widget =====
        {
            let run = active.clone();
            engine.register_fn(
                "widget_get",
                move |property: &str| -> std::result::Result<Dynamic, Box<EvalAltResult>> {
                    let widget = read_run(&run)?.widget()?;
                    let widget = widget
                        .read()
                        .map_err(|e| format!("Failed to acquire widget lock: {}", e))?;
                    Ok(widget
                        .get_property(property)
                        .map(|v| pv_to_dynamic(&v))
                        .unwrap_or(Dynamic::UNIT))
                },
            );
        }
        {
            let run = active.clone();
            engine.register_fn(
                "widget_set",
                move |property: &str, value: Dynamic| -> std::result::Result<(), Box<EvalAltResult>> {
                    let widget = read_run(&run)?.widget()?;
                    let value = dynamic_to_pv(value)
                        .ok_or_else(|| format!("Cannot assign () to property '{}'", property))?;
                    let mut widget = widget
                        .write()
                        .map_err(|e| format!("Failed to acquire widget lock: {}", e))?;
                    widget
                        .set_property_value(property, value)
                        .map_err(|e| e.to_string().into())
                },
            );
        }

        // ===== Host output =====
        {
            let run = active.clone();
            engine.on_print(move |text| {
                if let Ok(mut guard) = run.write() {
                    guard.push_message(HostMessageKind::Console, text.to_string());
                }
            });
        }
        {
            let run = active.clone();
            engine.register_fn("console", move |text: &str| {
                if let Ok(mut guard) = run.write() {
                    guard.push_message(HostMessageKind::Console, text.to_string());
                }
            });
        }
        {
            let run = active;
            engine.register_fn("alert", move |text: &str| {
                if let Ok(mut guard) = run.write() {
                    guard.push_message(HostMessageKind::Dialog, text.to_string());
                }
            });
        }

        // ===== Value constructors =====
        engine.register_fn("color", |r: i64, g: i64, b: i64| -> String {
            let c = |v: i64| v.clamp(0, 255);
            format!("#{:02x}{:02x}{:02x}", c(r), c(g), c(b))
        });
        engine.register_fn("font", |family: &str, size: i64| -> String {
            format!("{} {}", family, size)
        });
        engine.register_fn("font", |family: &str, size: i64, style: &str| -> String {
            format!("{} {} {}", family, style, size)
        });
    }

    fn compile(&self, body: &str) -> Result<super::CompiledScript> {
        let mut cache = self
            .cache
            .write()
            .map_err(|e| PvError::Script(format!("Failed to acquire cache lock: {}", e)))?;
        cache.get_or_compile(&self.engine, body)
    }
}

impl ScriptRuntime for RhaiScriptRuntime {
    fn validate(&self, body: &str) -> Result<()> {
        self.compile(body).map(|_| ())
    }

    fn run(&self, body: &str, ctx: &mut ScriptContext) -> Result<()> {
        let script = self.compile(body)?;

        {
            let mut run = self
                .active
                .write()
                .map_err(|e| PvError::Script(format!("Failed to acquire context lock: {}", e)))?;
            *run = ActiveRun {
                script: ctx.script.clone(),
                widget: Some(ctx.widget.clone()),
                pvs: std::mem::take(&mut ctx.pvs),
                pv_writes: Vec::new(),
                messages: Vec::new(),
            };
        }

        let mut scope = Scope::new();
        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, script.ast());

        let finished = {
            let mut run = self
                .active
                .write()
                .map_err(|e| PvError::Script(format!("Failed to acquire context lock: {}", e)))?;
            std::mem::take(&mut *run)
        };
        ctx.pvs = finished.pvs;
        ctx.pv_writes.extend(finished.pv_writes);
        ctx.messages.extend(finished.messages);

        result.map(|_| ()).map_err(PvError::from_rhai_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;
    use crate::widget::{shared, PropertyKind, PropertyMapWidget};

    fn snapshot(name: &str, value: PvValue) -> PvSnapshot {
        PvSnapshot {
            name: name.to_string(),
            value: Some(value),
            severity: Severity::Minor,
            precision: None,
            time: None,
        }
    }

    fn context() -> ScriptContext {
        let widget = shared(
            PropertyMapWidget::new("led")
                .with_property("on", PropertyKind::Boolean, false)
                .with_property("text", PropertyKind::String, ""),
        );
        ScriptContext::new(
            "blink",
            widget,
            vec![
                snapshot("loc://level", PvValue::Number(92.5)),
                snapshot("loc://label", PvValue::Text("Tank".into())),
            ],
        )
    }

    #[test]
    fn test_math_functions() {
        let engine = expression_engine(&ScriptLimits::default());
        let result: f64 = engine.eval("clamp(15.0, 0.0, 10.0) + abs(-1.0)").unwrap();
        assert!((result - 11.0).abs() < 1e-9);
        let bit: bool = engine.eval("bit_test(5, 2)").unwrap();
        assert!(bit);
    }

    #[test]
    fn test_typed_pv_reads_and_widget_write() {
        let runtime = RhaiScriptRuntime::new(&ScriptLimits::default());
        let mut ctx = context();
        runtime
            .run(
                r#"
                let level = pv_double(0);
                widget_set("on", level > 90.0);
                widget_set("text", pv_string(1) + " " + pv_long(0) + " " + pv_severity(0));
                "#,
                &mut ctx,
            )
            .unwrap();

        let widget = ctx.widget.read().unwrap();
        assert_eq!(widget.get_property("on"), Some(PvValue::Bool(true)));
        assert_eq!(
            widget.get_property("text"),
            Some(PvValue::Text("Tank 92 1".into()))
        );
        assert_eq!(ctx.pvs.len(), 2);
    }

    #[test]
    fn test_pv_writes_and_messages_collected() {
        let runtime = RhaiScriptRuntime::new(&ScriptLimits::default());
        let mut ctx = context();
        runtime
            .run(
                r#"
                write_pv(0, 1.5);
                print("hello");
                console("world");
                alert("overflow");
                "#,
                &mut ctx,
            )
            .unwrap();

        assert_eq!(ctx.pv_writes, vec![(0, PvValue::Number(1.5))]);
        let kinds: Vec<_> = ctx.messages.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![
                HostMessageKind::Console,
                HostMessageKind::Console,
                HostMessageKind::Dialog
            ]
        );
        assert!(ctx.messages.iter().all(|m| m.source == "blink"));
    }

    #[test]
    fn test_out_of_range_index_fails() {
        let runtime = RhaiScriptRuntime::new(&ScriptLimits::default());
        let mut ctx = context();
        let err = runtime.run("pv_double(7)", &mut ctx).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_runaway_script_is_stopped() {
        let limits = ScriptLimits {
            max_operations: 1_000,
            ..ScriptLimits::default()
        };
        let runtime = RhaiScriptRuntime::new(&limits);
        let mut ctx = context();
        assert!(runtime.run("loop { }", &mut ctx).is_err());
        // state is restored for the next invocation
        assert_eq!(ctx.pvs.len(), 2);
    }

    #[test]
    fn test_validate_reports_syntax_errors() {
        let runtime = RhaiScriptRuntime::new(&ScriptLimits::default());
        assert!(runtime.validate("let x = 1;").is_ok());
        assert!(matches!(
            runtime.validate("let x = ;"),
            Err(PvError::Script(_))
        ));
    }

    #[test]
    fn test_value_constructors() {
        let runtime = RhaiScriptRuntime::new(&ScriptLimits::default());
        let mut ctx = context();
        runtime
            .run(r#"widget_set("text", color(255, 0, 300) + "/" + font("Sans", 12));"#, &mut ctx)
            .unwrap();
        let widget = ctx.widget.read().unwrap();
        assert_eq!(
            widget.get_property("text"),
            Some(PvValue::Text("#ff00ff/Sans 12".into()))
        );
    }
}
