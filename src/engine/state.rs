//! Everything the engine knows about the current display.
//!
//! The whole struct is replaced on reset, so no registry outlives the display
//! it was built for.

use super::id::{FormulaId, RuleId, ScriptId, TraceId};
use super::trigger::{TriggerGraph, UnitRef};
use crate::formula::CompiledFormula;
use crate::generators::SampleGenerator;
use crate::pv::{Pv, PvId};
use crate::rules::CompiledRule;
use crate::trace::TraceBuffer;
use crate::types::Sample;
use crate::widget::SharedWidget;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

pub(crate) struct GeneratorSlot {
    pub pv: PvId,
    pub generator: Box<dyn SampleGenerator>,
}

pub(crate) struct FormulaUnit {
    pub pv: PvId,
    pub parameters: Vec<PvId>,
    pub formula: Box<dyn CompiledFormula>,
}

pub(crate) struct RuleUnit {
    pub rule: CompiledRule,
    pub widget: SharedWidget,
    pub inputs: Vec<PvId>,
}

pub(crate) struct ScriptUnit {
    pub name: String,
    pub body: String,
    pub widget: SharedWidget,
    pub inputs: Vec<PvId>,
}

pub(crate) struct TraceUnit {
    pub y: PvId,
    pub x: Option<PvId>,
    pub buffer: TraceBuffer,
}

/// Registry sizes recorded before a construction that may fail
#[derive(Debug, Clone, Copy)]
pub(crate) struct Checkpoint {
    pvs: usize,
    generators: usize,
    formulas: usize,
    changed: bool,
}

/// PV registry, reactive units and the trigger graph of one display
pub struct EngineState {
    pub(crate) pvs: Vec<Pv>,
    pub(crate) by_name: HashMap<String, PvId>,
    pub(crate) generators: Vec<GeneratorSlot>,
    pub(crate) formulas: Vec<FormulaUnit>,
    pub(crate) rules: Vec<RuleUnit>,
    pub(crate) scripts: Vec<ScriptUnit>,
    pub(crate) traces: Vec<TraceUnit>,
    pub(crate) triggers: TriggerGraph,
    /// PVs changed since the last step, outside of generator advance
    pub(crate) pending: BTreeSet<PvId>,
    /// Units registered since the last step, run once on the next step
    pub(crate) fresh_units: BTreeSet<UnitRef>,
    pub(crate) changed: bool,
    /// Wall-clock time that corresponds to clock time zero
    pub(crate) epoch: DateTime<Utc>,
    pub(crate) clock: std::time::Duration,
}

impl EngineState {
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self {
            pvs: Vec::new(),
            by_name: HashMap::new(),
            generators: Vec::new(),
            formulas: Vec::new(),
            rules: Vec::new(),
            scripts: Vec::new(),
            traces: Vec::new(),
            triggers: TriggerGraph::new(),
            pending: BTreeSet::new(),
            fresh_units: BTreeSet::new(),
            changed: false,
            epoch,
            clock: std::time::Duration::ZERO,
        }
    }

    /// Wall-clock time of the current clock position
    pub fn now(&self) -> DateTime<Utc> {
        let offset = chrono::Duration::from_std(self.clock).unwrap_or_else(|_| chrono::Duration::zero());
        self.epoch + offset
    }

    /// Names of every registered PV, in creation order
    pub fn pv_names(&self) -> impl Iterator<Item = &str> {
        self.pvs.iter().map(Pv::name)
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pvs: self.pvs.len(),
            generators: self.generators.len(),
            formulas: self.formulas.len(),
            changed: self.changed,
        }
    }

    /// Drop every PV, generator and formula created after `checkpoint`
    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        let Checkpoint {
            pvs,
            generators,
            formulas,
            changed,
        } = checkpoint;
        self.pvs.truncate(pvs);
        self.by_name.retain(|_, id| id.index() < pvs);
        self.generators.truncate(generators);
        self.formulas.truncate(formulas);
        self.triggers.retain(|pv, unit| {
            pv.index() < pvs && !matches!(unit, UnitRef::Formula(id) if id.index() >= formulas)
        });
        self.pending.retain(|id| id.index() < pvs);
        self.changed = changed;
    }

    pub(crate) fn insert_pv(&mut self, pv: Pv) -> PvId {
        let id = PvId(self.pvs.len() as u32);
        self.by_name.insert(pv.name().to_string(), id);
        self.pvs.push(pv);
        id
    }

    pub(crate) fn pv(&self, id: PvId) -> Option<&Pv> {
        self.pvs.get(id.index())
    }

    /// Apply a sample through the write path, returning true if it changed the PV
    pub(crate) fn apply(&mut self, id: PvId, sample: Sample) -> bool {
        match self.pvs.get_mut(id.index()) {
            Some(pv) => pv.apply(sample),
            None => false,
        }
    }

    /// Record an out-of-tick change to be propagated by the next step
    pub(crate) fn mark_pending(&mut self, id: PvId) {
        self.pending.insert(id);
        self.changed = true;
    }

    pub(crate) fn add_formula(&mut self, unit: FormulaUnit) -> FormulaId {
        let id = FormulaId::from_index(self.formulas.len());
        for &param in &unit.parameters {
            self.triggers.add(param, UnitRef::Formula(id));
        }
        self.formulas.push(unit);
        id
    }

    pub(crate) fn add_rule(&mut self, unit: RuleUnit, triggers: &[PvId]) -> RuleId {
        let id = RuleId::from_index(self.rules.len());
        for &pv in triggers {
            self.triggers.add(pv, UnitRef::Rule(id));
        }
        self.rules.push(unit);
        self.fresh_units.insert(UnitRef::Rule(id));
        id
    }

    pub(crate) fn add_script(&mut self, unit: ScriptUnit, triggers: &[PvId]) -> ScriptId {
        let id = ScriptId::from_index(self.scripts.len());
        for &pv in triggers {
            self.triggers.add(pv, UnitRef::Script(id));
        }
        self.scripts.push(unit);
        self.fresh_units.insert(UnitRef::Script(id));
        id
    }

    pub(crate) fn add_trace(&mut self, unit: TraceUnit) -> TraceId {
        let id = TraceId::from_index(self.traces.len());
        self.traces.push(unit);
        id
    }
}
