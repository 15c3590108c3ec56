//! Declarative widget rules.
//!
//! A rule drives one widget property from an ordered list of
//! `(condition, output)` pairs evaluated like an if/else-if chain: the first
//! condition that holds selects the output, and when none holds the property
//! is reset to its default.
//!
//! Conditions and expression outputs reference input PVs through positional
//! accessors, one per input index:
//!
//! | Accessor | Value                                  |
//! |----------|----------------------------------------|
//! | `pvN`    | numeric value (NaN when missing)       |
//! | `pvIntN` | integer value (truncated)              |
//! | `pvStrN` | formatted text                         |
//! | `pvSevN` | severity code (0 = NONE .. 4 = UNDEFINED) |
//!
//! Only the accessor kinds that appear somewhere in the rule are bound.

mod program;

pub use program::CompiledRule;

use crate::scripting::PvInput;
use serde::{Deserialize, Serialize};

/// One `(condition, output)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutput {
    /// Boolean condition
    pub expression: String,
    /// Literal value, or an expression when the rule sets `output_expression`
    pub output_value: String,
}

impl RuleOutput {
    pub fn new(expression: impl Into<String>, output_value: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            output_value: output_value.into(),
        }
    }
}

/// A rule attached to a widget property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDeclaration {
    pub name: String,
    /// Target widget property
    pub property: String,
    #[serde(default)]
    pub outputs: Vec<RuleOutput>,
    /// Treat every `output_value` as an expression
    #[serde(default)]
    pub output_expression: bool,
    #[serde(default)]
    pub inputs: Vec<PvInput>,
}

impl RuleDeclaration {
    pub fn new(name: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            property: property.into(),
            outputs: Vec::new(),
            output_expression: false,
            inputs: Vec::new(),
        }
    }

    pub fn with_output(mut self, expression: impl Into<String>, output_value: impl Into<String>) -> Self {
        self.outputs.push(RuleOutput::new(expression, output_value));
        self
    }

    pub fn with_input(mut self, input: PvInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output_expression(mut self, enabled: bool) -> Self {
        self.output_expression = enabled;
        self
    }
}

/// Typed accessor kinds referenced by a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Accessors {
    pub numeric: bool,
    pub integer: bool,
    pub text: bool,
    pub severity: bool,
    /// Highest input index referenced by any accessor
    pub max_index: Option<usize>,
}

impl Accessors {
    /// Scan source text for `pvN`, `pvIntN`, `pvStrN` and `pvSevN` identifiers
    pub fn scan(&mut self, source: &str) {
        let mut rest = source;
        while let Some(start) = rest.find(|c: char| c.is_ascii_alphabetic() || c == '_') {
            let tail = &rest[start..];
            let len = tail
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(tail.len());
            self.record(&tail[..len]);
            rest = &tail[len..];
        }
    }

    fn record(&mut self, ident: &str) {
        let Some(rest) = ident.strip_prefix("pv") else {
            return;
        };
        let (slot, digits) = if let Some(d) = rest.strip_prefix("Int") {
            (&mut self.integer, d)
        } else if let Some(d) = rest.strip_prefix("Str") {
            (&mut self.text, d)
        } else if let Some(d) = rest.strip_prefix("Sev") {
            (&mut self.severity, d)
        } else {
            (&mut self.numeric, rest)
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return;
        }
        let Ok(index) = digits.parse::<usize>() else {
            return;
        };
        *slot = true;
        self.max_index = Some(self.max_index.map_or(index, |m| m.max(index)));
    }

    pub fn any(&self) -> bool {
        self.numeric || self.integer || self.text || self.severity
    }
}
