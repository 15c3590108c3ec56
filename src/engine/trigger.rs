//! Trigger graph: PV to the reactive units that re-run when it changes.

use super::id::{FormulaId, RuleId, ScriptId};
use crate::pv::PvId;
use std::collections::HashMap;

/// A reactive unit registered with the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnitRef {
    Formula(FormulaId),
    Rule(RuleId),
    Script(ScriptId),
}

/// Dependency edges for one display.
///
/// Edges are only removed when a failed registration is rolled back.
/// An edge `pv -> unit` exists iff `pv` was declared as a trigger input of
/// `unit` when the unit was registered. Edges are deduplicated and kept in
/// insertion order.
#[derive(Debug, Default)]
pub struct TriggerGraph {
    edges: HashMap<PvId, Vec<UnitRef>>,
}

impl TriggerGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge, returning false if it already existed
    pub fn add(&mut self, pv: PvId, unit: UnitRef) -> bool {
        let units = self.edges.entry(pv).or_default();
        if units.contains(&unit) {
            return false;
        }
        units.push(unit);
        true
    }

    /// Keep only the edges for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(PvId, UnitRef) -> bool) {
        self.edges.retain(|&pv, units| {
            units.retain(|&unit| keep(pv, unit));
            !units.is_empty()
        });
    }

    pub fn dependents(&self, pv: PvId) -> &[UnitRef] {
        self.edges.get(&pv).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of edges
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }
}
