//! The PV engine.
//!
//! [`PvEngine`] owns the PV registry, the trigger graph and the per-tick
//! evaluation loop. All state for the current display lives in one
//! [`EngineState`] that [`PvEngine::reset`] replaces wholesale.
//!
//! # Tick
//!
//! [`PvEngine::step`] runs, in order:
//!
//! 1. take the PVs changed since the previous tick (`set_value`, script writes)
//! 2. advance every generator, in registration order
//! 3. propagate changed PVs through dependent formulas
//! 4. feed traces bound to changed PVs
//! 5. run triggered rules in registration order, then triggered scripts
//!
//! PV writes made by scripts are applied immediately but only trigger their
//! dependents on the next tick.

mod id;
mod state;
mod trigger;

pub use id::{FormulaId, RuleId, ScriptId, TraceId};
pub use state::EngineState;
pub use trigger::{TriggerGraph, UnitRef};

use crate::config::EngineConfig;
use crate::error::{PvError, Result, ResultExt, UnitError};
use crate::formula::{DataSourceValue, FormulaCompiler, RhaiFormulaCompiler};
use crate::generators::{self, ClockGenerator, ConstantGenerator, SampleGenerator};
use crate::pv::{Pv, PvId, PvKind, PvName, PvSnapshot, SimFunction};
use crate::rules::{CompiledRule, RuleDeclaration};
use crate::scripting::{
    expression_engine, HostMessage, HostMessageKind, PvInput, RhaiScriptRuntime, ScriptContext,
    ScriptDeclaration, ScriptRuntime,
};
use crate::trace::{TraceBuffer, TraceConfig, XSource};
use crate::types::{PvValue, Sample, Severity};
use crate::widget::SharedWidget;
use chrono::Utc;
use rhai::Engine;
use state::{FormulaUnit, GeneratorSlot, RuleUnit, ScriptUnit, TraceUnit};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Trace bound to engine PVs
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSpec {
    pub y_pv: String,
    /// Required when `config.x_source` is [`XSource::Pv`]
    pub x_pv: Option<String>,
    pub config: TraceConfig,
}

impl TraceSpec {
    pub fn new(y_pv: impl Into<String>, config: TraceConfig) -> Self {
        Self {
            y_pv: y_pv.into(),
            x_pv: None,
            config,
        }
    }

    pub fn with_x(mut self, x_pv: impl Into<String>) -> Self {
        self.x_pv = Some(x_pv.into());
        self
    }
}

/// Reactive data engine for one display at a time
pub struct PvEngine {
    config: EngineConfig,
    compiler: Box<dyn FormulaCompiler>,
    runtime: Box<dyn ScriptRuntime>,
    /// Evaluates rule conditions and outputs
    expressions: Arc<Engine>,
    state: EngineState,
    seed: u64,
    errors: Vec<UnitError>,
    messages: Vec<HostMessage>,
}

impl PvEngine {
    /// Engine with the bundled Rhai formula compiler and script runtime
    pub fn new(config: EngineConfig) -> Self {
        let compiler = Box::new(RhaiFormulaCompiler::new(&config.script_limits));
        let runtime = Box::new(RhaiScriptRuntime::new(&config.script_limits));
        Self::with_runtime(config, compiler, runtime)
    }

    pub fn with_runtime(
        config: EngineConfig,
        compiler: Box<dyn FormulaCompiler>,
        runtime: Box<dyn ScriptRuntime>,
    ) -> Self {
        let seed = config
            .rng_seed
            .unwrap_or_else(|| Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64);
        Self {
            expressions: Arc::new(expression_engine(&config.script_limits)),
            config,
            compiler,
            runtime,
            state: EngineState::new(Utc::now()),
            seed,
            errors: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    // ==================== PV registry ====================

    /// Look up or create the PV for `name`.
    ///
    /// Creation is idempotent: every spelling that resolves to the same
    /// registry key (`loc://x` and `loc://x(5)`) returns the same id. On
    /// error nothing created along the way (formula parameters included) is
    /// kept.
    pub fn create_pv(&mut self, name: &str) -> Result<PvId> {
        self.transaction(|engine| engine.resolve_pv(name))
    }

    /// Run a construction, rolling the registry back if it fails
    fn transaction<T>(&mut self, build: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let checkpoint = self.state.checkpoint();
        let errors = self.errors.len();
        let result = build(self);
        if result.is_err() {
            self.state.rollback(checkpoint);
            self.errors.truncate(errors);
        }
        result
    }

    fn resolve_pv(&mut self, name: &str) -> Result<PvId> {
        // custom generators live outside the name grammar
        if let Some(&id) = self.state.by_name.get(name.trim()) {
            return Ok(id);
        }
        let parsed = PvName::parse(name)?;
        let key = parsed.canonical();

        if let Some(&id) = self.state.by_name.get(&key) {
            if let PvName::Local {
                initializer: Some(initializer),
                ..
            } = &parsed
            {
                self.redeclare_local(id, initializer);
            }
            return Ok(id);
        }

        match parsed {
            PvName::Local { initializer, .. } => Ok(self.create_local(key, initializer)),
            PvName::Simulated { function, args } => {
                let generator: Box<dyn SampleGenerator> = match SimFunction::from_name(&function) {
                    Some(f) => generators::from_sim(f, &function, args.as_deref(), self.next_seed()),
                    None => {
                        tracing::warn!(
                            "Unknown simulation function '{}', {} will never update",
                            function,
                            key
                        );
                        Box::new(ConstantGenerator::empty())
                    }
                };
                Ok(self.attach_generator(key, generator))
            }
            PvName::Clock => {
                let generator = Box::new(ClockGenerator::new(
                    self.config.clock_format.clone(),
                    self.config.clock_interval_secs,
                ));
                Ok(self.attach_generator(key, generator))
            }
            PvName::Formula { expression } => self.create_formula(key, &expression),
        }
    }

    fn create_local(&mut self, key: String, initializer: Option<String>) -> PvId {
        let id = self.state.insert_pv(Pv::new(
            key.as_str(),
            PvKind::Local {
                initializer: initializer.clone(),
            },
        ));
        if let Some(initializer) = initializer {
            let now = self.state.now();
            self.state
                .apply(id, Sample::new(PvValue::parse_literal(&initializer), now));
            self.state.mark_pending(id);
        }
        tracing::debug!("Created local PV {}", key);
        id
    }

    fn redeclare_local(&mut self, id: PvId, initializer: &str) {
        let now = self.state.now();
        let Some(pv) = self.state.pvs.get_mut(id.index()) else {
            return;
        };
        let existing = match pv.kind() {
            PvKind::Local { initializer } => initializer.clone(),
            _ => return,
        };
        match existing {
            Some(existing) if existing != initializer => {
                tracing::warn!(
                    "Local PV {} re-declared with initializer '{}', keeping '{}'",
                    pv.name(),
                    initializer,
                    existing
                );
            }
            Some(_) => {}
            None => {
                pv.set_initializer(initializer.to_string());
                let applied = pv.value().is_none()
                    && pv.apply(Sample::new(PvValue::parse_literal(initializer), now));
                if applied {
                    self.state.mark_pending(id);
                }
            }
        }
    }

    fn next_seed(&self) -> u64 {
        self.seed
            .wrapping_add((self.state.generators.len() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    fn attach_generator(&mut self, key: String, generator: Box<dyn SampleGenerator>) -> PvId {
        let mut pv = Pv::new(key.as_str(), PvKind::Simulated);
        if let Some(limits) = generator.limits() {
            pv.limits = limits;
        }
        let id = self.state.insert_pv(pv);
        self.state.generators.push(GeneratorSlot { pv: id, generator });
        tracing::debug!("Created simulated PV {}", key);
        id
    }

    /// Back a new PV called `name` with a custom generator
    pub fn register_generator(
        &mut self,
        name: &str,
        generator: Box<dyn SampleGenerator>,
    ) -> Result<PvId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PvError::UnsupportedPv(name.to_string()));
        }
        if self.state.by_name.contains_key(name) {
            return Err(PvError::Config(format!("PV {} already exists", name)));
        }
        Ok(self.attach_generator(name.to_string(), generator))
    }

    fn create_formula(&mut self, key: String, expression: &str) -> Result<PvId> {
        let formula = self
            .compiler
            .compile(expression)
            .with_context(|| format!("formula {}", key))?;

        // validate every parameter name before creating anything
        for name in formula.parameters() {
            self.check_name(name).with_context(|| format!("formula {}", key))?;
        }
        let names = formula.parameters().to_vec();
        let parameters = names
            .iter()
            .map(|name| self.resolve_pv(name))
            .collect::<Result<Vec<_>>>()?;

        let pv = self.state.insert_pv(Pv::new(key.as_str(), PvKind::Formula));
        let id = self.state.add_formula(FormulaUnit {
            pv,
            parameters,
            formula,
        });
        tracing::debug!("Created formula PV {} ({} parameters)", key, names.len());

        if self.evaluate_formula(id) {
            self.state.mark_pending(pv);
        }
        Ok(pv)
    }

    /// Feed current parameter values into a formula and write its result.
    ///
    /// Returns true if the formula PV changed. Failures set the PV severity to
    /// INVALID and are recorded as unit errors.
    fn evaluate_formula(&mut self, id: FormulaId) -> bool {
        let now = self.state.now();
        let state = &mut self.state;
        let Some(unit) = state.formulas.get_mut(id.index()) else {
            return false;
        };

        let names = unit.formula.parameters().to_vec();
        for (name, pid) in names.iter().zip(&unit.parameters) {
            if let Some(pv) = state.pvs.get(pid.index()) {
                unit.formula.update_data_source(name, data_source(pv));
            }
        }
        if !unit.formula.is_ready() {
            return false;
        }

        let pv_id = unit.pv;
        let severity = unit.formula.severity();
        match unit.formula.execute() {
            Ok(value) => state.apply(pv_id, Sample::new(value, now).with_severity(severity)),
            Err(err) => {
                let Some(pv) = state.pvs.get_mut(pv_id.index()) else {
                    return false;
                };
                record_error(&mut self.errors, pv.name(), &err);
                let changed = pv.severity != Severity::Invalid;
                pv.severity = Severity::Invalid;
                changed
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<PvId> {
        if let Some(&id) = self.state.by_name.get(name) {
            return Some(id);
        }
        PvName::parse(name)
            .ok()
            .and_then(|parsed| self.state.by_name.get(&parsed.canonical()).copied())
    }

    pub fn pv(&self, id: PvId) -> Option<&Pv> {
        self.state.pv(id)
    }

    pub fn pv_by_name(&self, name: &str) -> Option<&Pv> {
        self.find(name).and_then(|id| self.state.pv(id))
    }

    /// Current value, `None` for unknown PVs or PVs without a value yet
    pub fn get_value(&self, name: &str) -> Option<&PvValue> {
        self.pv_by_name(name).and_then(Pv::value)
    }

    /// Write a value through the engine write path.
    ///
    /// The change is propagated by the next [`step`](Self::step).
    pub fn set_value(&mut self, name: &str, value: impl Into<PvValue>) -> Result<()> {
        let id = self
            .find(name)
            .ok_or_else(|| PvError::UnknownPv(name.to_string()))?;
        self.write_pv(id, value.into())
    }

    fn write_pv(&mut self, id: PvId, value: PvValue) -> Result<()> {
        let now = self.state.now();
        let pv = self
            .state
            .pvs
            .get_mut(id.index())
            .ok_or_else(|| PvError::UnknownPv(id.to_string()))?;
        if !pv.is_writable() {
            return Err(PvError::NotWritable(pv.name().to_string()));
        }
        let changed = pv.apply(Sample::new(value, now));
        self.state.changed = true;
        if changed {
            self.state.pending.insert(id);
        }
        Ok(())
    }

    // ==================== Rules, scripts, traces ====================

    /// Accept names of registered PVs and anything the name grammar can create
    fn check_name(&self, name: &str) -> Result<()> {
        if self.state.by_name.contains_key(name.trim()) {
            return Ok(());
        }
        PvName::parse(name).map(|_| ())
    }

    fn create_inputs(&mut self, inputs: &[PvInput]) -> Result<Vec<PvId>> {
        for input in inputs {
            self.check_name(&input.name)?;
        }
        self.transaction(|engine| {
            inputs
                .iter()
                .map(|input| engine.resolve_pv(&input.name))
                .collect()
        })
    }

    /// Compile and register a rule driving a property of `widget`.
    ///
    /// Nothing is registered when compilation fails.
    pub fn add_rule(&mut self, widget: &SharedWidget, decl: RuleDeclaration) -> Result<RuleId> {
        let rule = {
            let guard = widget
                .read()
                .map_err(|e| PvError::Rule(format!("Failed to acquire widget lock: {}", e)))?;
            CompiledRule::compile(&decl, &*guard, self.expressions.clone())?
        };
        let inputs = self.create_inputs(&decl.inputs)?;
        let triggers = trigger_ids(&decl.inputs, &inputs);

        let id = self.state.add_rule(
            RuleUnit {
                rule,
                widget: widget.clone(),
                inputs,
            },
            &triggers,
        );
        tracing::debug!(
            "Registered rule '{}' on property '{}' ({} triggers)",
            decl.name,
            decl.property,
            triggers.len()
        );
        Ok(id)
    }

    /// Validate and register a script bound to `widget`
    pub fn add_script(&mut self, widget: &SharedWidget, decl: ScriptDeclaration) -> Result<ScriptId> {
        self.runtime
            .validate(&decl.body)
            .with_context(|| format!("script '{}'", decl.name))?;
        let inputs = self.create_inputs(&decl.inputs)?;
        let triggers = trigger_ids(&decl.inputs, &inputs);

        let id = self.state.add_script(
            ScriptUnit {
                name: decl.name.clone(),
                body: decl.body,
                widget: widget.clone(),
                inputs,
            },
            &triggers,
        );
        tracing::debug!(
            "Registered script '{}' ({} triggers)",
            decl.name,
            triggers.len()
        );
        Ok(id)
    }

    /// Create a trace fed by the engine on every tick its PVs change
    pub fn create_trace(&mut self, spec: TraceSpec) -> Result<TraceId> {
        if spec.config.x_source == XSource::Pv && spec.x_pv.is_none() {
            return Err(PvError::Config(format!(
                "trace of {} takes x from a PV but names none",
                spec.y_pv
            )));
        }
        self.check_name(&spec.y_pv)?;
        if let Some(x) = &spec.x_pv {
            self.check_name(x)?;
        }

        let (y, x) = self.transaction(|engine| {
            let y = engine.resolve_pv(&spec.y_pv)?;
            let x = match &spec.x_pv {
                Some(name) => Some(engine.resolve_pv(name)?),
                None => None,
            };
            Ok((y, x))
        })?;
        Ok(self.state.add_trace(TraceUnit {
            y,
            x,
            buffer: TraceBuffer::new(spec.config),
        }))
    }

    pub fn trace(&self, id: TraceId) -> Option<&TraceBuffer> {
        self.state.traces.get(id.index()).map(|t| &t.buffer)
    }

    pub fn trace_mut(&mut self, id: TraceId) -> Option<&mut TraceBuffer> {
        self.state.traces.get_mut(id.index()).map(|t| &mut t.buffer)
    }

    // ==================== Evaluation ====================

    /// Advance the engine to `clock` (time since the display started).
    ///
    /// Returns true if anything changed since the previous step.
    pub fn step(&mut self, clock: Duration) -> bool {
        self.state.clock = clock;
        let now = self.state.now();
        let mut changed = std::mem::take(&mut self.state.changed);
        let mut dirty = std::mem::take(&mut self.state.pending);

        for slot in &mut self.state.generators {
            if let Some(sample) = slot.generator.step(clock, now) {
                if let Some(pv) = self.state.pvs.get_mut(slot.pv.index()) {
                    if pv.apply(sample) {
                        dirty.insert(slot.pv);
                        changed = true;
                    }
                }
            }
        }

        self.propagate_formulas(&mut dirty);
        self.feed_traces(&dirty);

        let mut units = std::mem::take(&mut self.state.fresh_units);
        for pv in &dirty {
            units.extend(
                self.state
                    .triggers
                    .dependents(*pv)
                    .iter()
                    .filter(|u| !matches!(u, UnitRef::Formula(_))),
            );
        }

        tracing::trace!(
            "Tick at {:?}: {} changed PV(s), {} unit(s) to run",
            clock,
            dirty.len(),
            units.len()
        );

        // UnitRef orders rules before scripts, then by registration
        for unit in &units {
            match *unit {
                UnitRef::Rule(id) => self.run_rule(id),
                UnitRef::Script(id) => self.run_script(id),
                UnitRef::Formula(_) => {}
            }
        }

        changed || !units.is_empty()
    }

    fn propagate_formulas(&mut self, dirty: &mut BTreeSet<PvId>) {
        let mut queue: VecDeque<PvId> = dirty.iter().copied().collect();
        // formulas only reference PVs created before them, so this terminates
        while let Some(pv) = queue.pop_front() {
            let formulas: Vec<FormulaId> = self
                .state
                .triggers
                .dependents(pv)
                .iter()
                .filter_map(|unit| match unit {
                    UnitRef::Formula(id) => Some(*id),
                    _ => None,
                })
                .collect();
            for id in formulas {
                if self.evaluate_formula(id) {
                    let out = self.state.formulas[id.index()].pv;
                    dirty.insert(out);
                    queue.push_back(out);
                }
            }
        }
    }

    fn feed_traces(&mut self, dirty: &BTreeSet<PvId>) {
        let now = self.state.now();
        let pvs = &self.state.pvs;
        for unit in &mut self.state.traces {
            // both coordinates are staged first so a tick commits at most one point
            if let Some(x) = unit.x.filter(|x| dirty.contains(x)) {
                if let Some(value) = pvs.get(x.index()).and_then(Pv::value) {
                    unit.buffer.stage_x(value);
                }
            }
            if dirty.contains(&unit.y) {
                if let Some(pv) = pvs.get(unit.y.index()) {
                    if let Some(value) = pv.value() {
                        unit.buffer.stage_y(value, pv.time().unwrap_or(now));
                    }
                }
            }
            unit.buffer.commit();
        }
    }

    fn snapshots(&self, inputs: &[PvId]) -> Vec<PvSnapshot> {
        inputs
            .iter()
            .filter_map(|id| self.state.pv(*id))
            .map(Pv::snapshot)
            .collect()
    }

    fn run_rule(&mut self, id: RuleId) {
        let Some(unit) = self.state.rules.get(id.index()) else {
            return;
        };
        let pvs = self.snapshots(&unit.inputs);
        if let Err(err) = unit.rule.execute(&pvs, &unit.widget) {
            record_error(&mut self.errors, &format!("rule '{}'", unit.rule.name()), &err);
        }
    }

    fn run_script(&mut self, id: ScriptId) {
        let Some(unit) = self.state.scripts.get(id.index()) else {
            return;
        };
        let label = format!("script '{}'", unit.name);
        let inputs = unit.inputs.clone();
        let mut ctx = ScriptContext::new(unit.name.clone(), unit.widget.clone(), self.snapshots(&inputs));

        if let Err(err) = self.runtime.run(&unit.body, &mut ctx) {
            record_error(&mut self.errors, &label, &err);
        }

        for (index, value) in ctx.pv_writes {
            let result = match inputs.get(index) {
                Some(&pv) => self.write_pv(pv, value),
                None => Err(PvError::Script(format!("no input PV at index {}", index))),
            };
            if let Err(err) = result {
                record_error(&mut self.errors, &label, &err);
            }
        }

        for message in ctx.messages {
            match message.kind {
                HostMessageKind::Console => {
                    tracing::info!(target: "pvengine::console", "[{}] {}", message.source, message.text)
                }
                HostMessageKind::Dialog => {
                    tracing::warn!(target: "pvengine::dialog", "[{}] {}", message.source, message.text)
                }
            }
            self.messages.push(message);
        }
    }

    /// Drop every PV, generator, unit and trace of the current display
    pub fn reset(&mut self) {
        let dropped = self.state.pvs.len();
        self.state = EngineState::new(Utc::now());
        self.errors.clear();
        self.messages.clear();
        tracing::debug!("Engine reset, dropped {} PV(s)", dropped);
    }

    // ==================== Inspection ====================

    /// Units that re-run when `name` changes
    pub fn dependents(&self, name: &str) -> Vec<UnitRef> {
        self.find(name)
            .map(|id| self.state.triggers.dependents(id).to_vec())
            .unwrap_or_default()
    }

    pub fn pv_count(&self) -> usize {
        self.state.pvs.len()
    }

    pub fn formula_count(&self) -> usize {
        self.state.formulas.len()
    }

    pub fn rule_count(&self) -> usize {
        self.state.rules.len()
    }

    pub fn script_count(&self) -> usize {
        self.state.scripts.len()
    }

    pub fn trace_count(&self) -> usize {
        self.state.traces.len()
    }

    /// Drain unit failures recorded since the last call
    pub fn take_errors(&mut self) -> Vec<UnitError> {
        std::mem::take(&mut self.errors)
    }

    /// Drain script console lines and dialogs recorded since the last call
    pub fn take_host_messages(&mut self) -> Vec<HostMessage> {
        std::mem::take(&mut self.messages)
    }
}

impl Default for PvEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn data_source(pv: &Pv) -> DataSourceValue {
    match pv.value() {
        Some(value) => DataSourceValue::connected(value.clone(), pv.severity()),
        None => DataSourceValue::default(),
    }
}

fn trigger_ids(inputs: &[PvInput], ids: &[PvId]) -> Vec<PvId> {
    inputs
        .iter()
        .zip(ids)
        .filter(|(input, _)| input.trigger)
        .map(|(_, id)| *id)
        .collect()
}

fn record_error(errors: &mut Vec<UnitError>, unit: &str, err: &PvError) {
    tracing::error!("{} failed: {}", unit, err);
    errors.push(UnitError::new(unit, err));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widget::{shared, PropertyKind, PropertyMapWidget, Widget};

    fn engine() -> PvEngine {
        PvEngine::new(EngineConfig::default().with_seed(1))
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn number(engine: &PvEngine, name: &str) -> Option<f64> {
        engine.get_value(name).map(PvValue::to_number)
    }

    #[test]
    fn test_create_is_idempotent() {
        let mut engine = engine();
        let a = engine.create_pv("loc://x(5)").unwrap();
        let b = engine.create_pv("loc://x").unwrap();
        let c = engine.create_pv("  loc://x(5) ").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(engine.pv_count(), 1);
    }

    #[test]
    fn test_unsupported_names_fail() {
        let mut engine = engine();
        for name in ["pva://x", "", "loc://", "sim://", "sys://date", "="] {
            assert!(
                matches!(engine.create_pv(name), Err(PvError::UnsupportedPv(_))),
                "{} should be unsupported",
                name
            );
        }
        assert_eq!(engine.pv_count(), 0);
    }

    #[test]
    fn test_local_initializer_is_eager() {
        let mut engine = engine();
        engine.create_pv("loc://x(5)").unwrap();
        assert_eq!(engine.get_value("loc://x"), Some(&PvValue::Number(5.0)));
        let pv = engine.pv_by_name("loc://x").unwrap();
        assert_eq!(pv.severity(), Severity::None);
        assert!(pv.is_writable());
    }

    #[test]
    fn test_redeclared_initializer_keeps_first() {
        let mut engine = engine();
        engine.create_pv("loc://x(5)").unwrap();
        engine.create_pv("loc://x(7)").unwrap();
        assert_eq!(number(&engine, "loc://x"), Some(5.0));

        engine.create_pv("loc://y").unwrap();
        assert_eq!(engine.get_value("loc://y"), None);
        engine.create_pv("loc://y(\"hi\")").unwrap();
        assert_eq!(engine.get_value("loc://y"), Some(&PvValue::Text("hi".into())));
    }

    #[test]
    fn test_write_gating() {
        let mut engine = engine();
        engine.create_pv("loc://x").unwrap();
        engine.create_pv("sim://noise").unwrap();

        engine.set_value("loc://x", 3.0).unwrap();
        assert_eq!(number(&engine, "loc://x"), Some(3.0));

        assert!(matches!(
            engine.set_value("sim://noise", 1.0),
            Err(PvError::NotWritable(_))
        ));
        assert!(matches!(
            engine.set_value("loc://missing", 1.0),
            Err(PvError::UnknownPv(_))
        ));
        assert_eq!(engine.get_value("loc://missing"), None);
    }

    #[test]
    fn test_step_reports_changes() {
        let mut engine = engine();
        engine.create_pv("loc://x").unwrap();
        assert!(!engine.step(secs(0)));
        engine.set_value("loc://x", 1.0).unwrap();
        assert!(engine.step(secs(1)));
        assert!(!engine.step(secs(2)));
    }

    #[test]
    fn test_ramp_honors_interval() {
        let mut engine = engine();
        engine.create_pv("sim://ramp(0,10,2,1)").unwrap();
        let mut seen = Vec::new();
        for ms in [0u64, 300, 600, 1000, 1500, 2000] {
            if engine.step(Duration::from_millis(ms)) {
                seen.push(number(&engine, "sim://ramp(0,10,2,1)").unwrap());
            }
        }
        assert_eq!(seen, vec![0.0, 2.0, 4.0]);
    }

    #[test]
    fn test_unknown_sim_function_never_updates() {
        let mut engine = engine();
        let id = engine.create_pv("sim://square(1,2)").unwrap();
        assert!(!engine.step(secs(0)));
        assert!(!engine.step(secs(10)));
        assert!(engine.pv(id).unwrap().value().is_none());
    }

    #[test]
    fn test_sine_advertises_limits() {
        let mut engine = engine();
        engine.create_pv("sim://sine(0,100,10,1)").unwrap();
        let limits = *engine.pv_by_name("sim://sine(0,100,10,1)").unwrap().limits();
        assert_eq!(limits.upper_alarm, Some(90.0));
        assert_eq!(limits.upper_warning, Some(80.0));
    }

    #[test]
    fn test_formula_eager_and_propagated() {
        let mut engine = engine();
        engine.create_pv("=2*'loc://x(3)'").unwrap();
        assert_eq!(number(&engine, "=2*'loc://x(3)'"), Some(6.0));

        engine.set_value("loc://x", 5.0).unwrap();
        // propagation waits for the next tick
        assert_eq!(number(&engine, "=2*'loc://x(3)'"), Some(6.0));
        engine.step(secs(0));
        assert_eq!(number(&engine, "=2*'loc://x(3)'"), Some(10.0));
    }

    #[test]
    fn test_nested_formulas() {
        let mut engine = engine();
        engine.create_pv("='=1+1' * 10").unwrap();
        assert_eq!(number(&engine, "=1+1"), Some(2.0));
        assert_eq!(number(&engine, "='=1+1' * 10"), Some(20.0));
        assert_eq!(engine.formula_count(), 2);
    }

    #[test]
    fn test_formula_shared_by_source() {
        let mut engine = engine();
        let a = engine.create_pv("='loc://x(1)' + 1").unwrap();
        let b = engine.create_pv("='loc://x(1)' + 1").unwrap();
        assert_eq!(a, b);
        assert_eq!(engine.formula_count(), 1);
        assert_eq!(engine.dependents("loc://x").len(), 1);
    }

    #[test]
    fn test_malformed_formula_registers_nothing() {
        let mut engine = engine();
        assert!(matches!(
            engine.create_pv("=1 + * 'loc://x'"),
            Err(PvError::WithContext { .. })
        ));
        assert_eq!(engine.pv_count(), 0);
        assert_eq!(engine.formula_count(), 0);
    }

    #[test]
    fn test_formula_failure_marks_invalid() {
        let mut engine = engine();
        engine.create_pv("='loc://s(1)' * 2").unwrap();
        engine.set_value("loc://s", "text").unwrap();
        engine.step(secs(0));
        let pv = engine.pv_by_name("='loc://s(1)' * 2").unwrap();
        assert_eq!(pv.severity(), Severity::Invalid);
        let errors = engine.take_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].unit.starts_with('='));
    }

    #[test]
    fn test_rule_then_script_in_one_tick() {
        let mut engine = engine();
        let widget = shared(
            PropertyMapWidget::new("led")
                .with_property("on", PropertyKind::Boolean, false)
                .with_property("seen", PropertyKind::Boolean, false),
        );
        engine
            .add_script(
                &widget,
                ScriptDeclaration::new("copy", r#"widget_set("seen", widget_get("on"));"#)
                    .with_input(PvInput::trigger("loc://p(0)")),
            )
            .unwrap();
        engine
            .add_rule(
                &widget,
                RuleDeclaration::new("on", "on")
                    .with_input(PvInput::trigger("loc://p(0)"))
                    .with_output("pv0 > 0", "true"),
            )
            .unwrap();
        engine.step(secs(0));

        engine.set_value("loc://p", 1.0).unwrap();
        engine.step(secs(1));
        let w = widget.read().unwrap();
        assert_eq!(w.get_property("on"), Some(PvValue::Bool(true)));
        assert_eq!(w.get_property("seen"), Some(PvValue::Bool(true)));
    }

    #[test]
    fn test_missing_rule_property_registers_nothing() {
        let mut engine = engine();
        let widget = shared(PropertyMapWidget::new("led"));
        let err = engine
            .add_rule(
                &widget,
                RuleDeclaration::new("r", "blink").with_input(PvInput::trigger("loc://p")),
            )
            .unwrap_err();
        assert!(matches!(err, PvError::MissingProperty { .. }));
        assert_eq!(engine.rule_count(), 0);
        assert_eq!(engine.pv_count(), 0);
    }

    #[test]
    fn test_passive_inputs_do_not_trigger() {
        let mut engine = engine();
        let widget = shared(PropertyMapWidget::new("w"));
        engine
            .add_script(
                &widget,
                ScriptDeclaration::new("s", "console(\"ran\");")
                    .with_input(PvInput::trigger("loc://t"))
                    .with_input(PvInput::passive("loc://p")),
            )
            .unwrap();
        assert_eq!(engine.dependents("loc://t"), vec![UnitRef::Script(ScriptId(0))]);
        assert!(engine.dependents("loc://p").is_empty());

        engine.step(secs(0));
        engine.take_host_messages();
        engine.set_value("loc://p", 1.0).unwrap();
        engine.step(secs(1));
        assert!(engine.take_host_messages().is_empty());
    }

    #[test]
    fn test_script_errors_are_isolated() {
        let mut engine = engine();
        let widget = shared(PropertyMapWidget::new("w").with_property("n", PropertyKind::Number, 0.0));
        engine
            .add_script(
                &widget,
                ScriptDeclaration::new("broken", "pv_double(5);")
                    .with_input(PvInput::trigger("loc://p(1)")),
            )
            .unwrap();
        engine
            .add_script(
                &widget,
                ScriptDeclaration::new("ok", r#"widget_set("n", pv_double(0) * 2.0);"#)
                    .with_input(PvInput::trigger("loc://p(1)")),
            )
            .unwrap();
        engine.step(secs(0));

        let errors = engine.take_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].unit, "script 'broken'");
        assert_eq!(widget.read().unwrap().get_property("n"), Some(PvValue::Number(2.0)));
    }

    #[test]
    fn test_script_writes_trigger_next_tick() {
        let mut engine = engine();
        let widget = shared(PropertyMapWidget::new("w").with_property("n", PropertyKind::Number, 0.0));
        engine
            .add_script(
                &widget,
                ScriptDeclaration::new("show", r#"widget_set("n", pv_double(0));"#)
                    .with_input(PvInput::trigger("loc://b")),
            )
            .unwrap();
        engine
            .add_script(
                &widget,
                ScriptDeclaration::new("forward", "write_pv(1, pv_double(0) + 1.0);")
                    .with_input(PvInput::trigger("loc://a(0)"))
                    .with_input(PvInput::passive("loc://b")),
            )
            .unwrap();
        engine.step(secs(0));

        engine.set_value("loc://a", 1.0).unwrap();
        assert!(engine.step(secs(1)));
        assert_eq!(number(&engine, "loc://b"), Some(2.0));
        // "show" ran first and still saw the previous write
        assert_eq!(widget.read().unwrap().get_property("n"), Some(PvValue::Number(1.0)));
        assert_ne!(widget.read().unwrap().get_property("n"), Some(PvValue::Number(2.0)));

        assert!(engine.step(secs(2)));
        assert_eq!(widget.read().unwrap().get_property("n"), Some(PvValue::Number(2.0)));
    }

    #[test]
    fn test_traces_are_fed() {
        let mut engine = engine();
        let trace = engine
            .create_trace(TraceSpec::new("sim://ramp(0,10,1,1)", TraceConfig::with_capacity(3)))
            .unwrap();
        for s in 0..5 {
            engine.step(secs(s));
        }
        let ys: Vec<f64> = engine.trace(trace).unwrap().points().iter().map(|p| p.y).collect();
        assert_eq!(ys, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_trace_needs_x_pv() {
        let mut engine = engine();
        let config = TraceConfig {
            x_source: XSource::Pv,
            ..TraceConfig::default()
        };
        assert!(matches!(
            engine.create_trace(TraceSpec::new("loc://y", config)),
            Err(PvError::Config(_))
        ));
    }

    #[test]
    fn test_custom_generator() {
        let mut engine = engine();
        engine
            .register_generator("dev://pump", Box::new(ConstantGenerator::new("RUNNING")))
            .unwrap();
        assert!(engine
            .register_generator("dev://pump", Box::new(ConstantGenerator::empty()))
            .is_err());
        assert!(engine.step(secs(0)));
        assert_eq!(engine.get_value("dev://pump"), Some(&PvValue::Text("RUNNING".into())));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut engine = engine();
        let widget = shared(PropertyMapWidget::new("w"));
        engine.create_pv("='loc://x(1)' + 1").unwrap();
        engine
            .add_script(&widget, ScriptDeclaration::new("s", "1").with_input(PvInput::trigger("loc://x")))
            .unwrap();
        engine.reset();
        assert_eq!(engine.pv_count(), 0);
        assert_eq!(engine.formula_count(), 0);
        assert_eq!(engine.script_count(), 0);
        assert!(engine.dependents("loc://x").is_empty());
        assert!(!engine.step(secs(0)));
    }

    #[test]
    fn test_widget_trait_object_name() {
        let widget = shared(PropertyMapWidget::new("gauge"));
        assert_eq!(widget.read().unwrap().name(), "gauge");
    }
}
