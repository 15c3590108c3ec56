//! Formula PVs.
//!
//! A formula PV (`=expr`) is computed from other PVs. The engine only depends
//! on the [`FormulaCompiler`] / [`CompiledFormula`] contract: a compiled
//! formula reports its parameter PV names, receives parameter updates through
//! [`CompiledFormula::update_data_source`] and yields a value from
//! [`CompiledFormula::execute`].
//!
//! The bundled [`RhaiFormulaCompiler`] accepts Rhai expressions where PV
//! references are written in single quotes:
//!
//! ```text
//! =2 * 'loc://x' + 1
//! =max('sim://noise', 'sim://ramp(0,10,1,1)')
//! ="Level: " + 'loc://level'
//! ```

mod compiler;

pub use compiler::{rewrite_references, RhaiFormulaCompiler};

use crate::error::Result;
use crate::types::{PvValue, Severity};

/// Connection state of a formula parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionStatus {
    #[default]
    Disconnected,
    Connected,
}

/// Latest state of one formula parameter
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataSourceValue {
    pub value: Option<PvValue>,
    pub severity: Severity,
    pub status: AcquisitionStatus,
}

impl DataSourceValue {
    pub fn connected(value: PvValue, severity: Severity) -> Self {
        Self {
            value: Some(value),
            severity,
            status: AcquisitionStatus::Connected,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == AcquisitionStatus::Connected && self.value.is_some()
    }
}

/// Turns formula source text into an evaluable unit
pub trait FormulaCompiler: Send {
    /// Compile `source` (without the leading `=`); malformed syntax is an error
    fn compile(&self, source: &str) -> Result<Box<dyn CompiledFormula>>;
}

/// An evaluable formula
pub trait CompiledFormula: Send {
    /// Names of the PVs the formula reads, in first-reference order
    fn parameters(&self) -> &[String];

    fn update_data_source(&mut self, name: &str, data: DataSourceValue);

    /// Whether every parameter has a connected value
    fn is_ready(&self) -> bool;

    /// Highest severity among the current parameter values
    fn severity(&self) -> Severity;

    fn execute(&mut self) -> Result<PvValue>;
}
