//! PV naming grammar.
//!
//! Recognized forms, bit-exact:
//!
//! - `loc://<id>` or `loc://<id>(<initializer>)` - local PV
//! - `sim://<fn>(<args>)` or `sim://<fn>` - simulated PV
//! - `sys://time` - formatted clock
//! - `=<expr>` - formula PV
//!
//! Anything else is rejected as an unsupported PV.

use crate::error::{PvError, Result};

const LOCAL_PREFIX: &str = "loc://";
const SIM_PREFIX: &str = "sim://";
const SYS_PREFIX: &str = "sys://";
const FORMULA_PREFIX: char = '=';

/// Parsed PV name
#[derive(Debug, Clone, PartialEq)]
pub enum PvName {
    /// `loc://id(initializer)`
    Local {
        id: String,
        initializer: Option<String>,
    },
    /// `sim://fn(args)`
    Simulated {
        function: String,
        args: Option<Vec<String>>,
    },
    /// `sys://time`
    Clock,
    /// `=expr`
    Formula { expression: String },
}

/// Simulation functions understood by the generator factory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFunction {
    Noise,
    GaussianNoise,
    Ramp,
    Sine,
}

impl SimFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "noise" => Some(SimFunction::Noise),
            "gaussianNoise" => Some(SimFunction::GaussianNoise),
            "ramp" => Some(SimFunction::Ramp),
            "sine" => Some(SimFunction::Sine),
            _ => None,
        }
    }
}

impl PvName {
    /// Parse a PV name as supplied by a widget, formula, rule or script
    pub fn parse(raw: &str) -> Result<Self> {
        let name = raw.trim();

        if let Some(expression) = name.strip_prefix(FORMULA_PREFIX) {
            if expression.trim().is_empty() {
                return Err(PvError::UnsupportedPv(raw.to_string()));
            }
            return Ok(PvName::Formula {
                expression: expression.to_string(),
            });
        }

        if let Some(rest) = name.strip_prefix(LOCAL_PREFIX) {
            let (id, initializer) = split_call(rest).ok_or_else(|| PvError::UnsupportedPv(raw.to_string()))?;
            if id.is_empty() {
                return Err(PvError::UnsupportedPv(raw.to_string()));
            }
            return Ok(PvName::Local {
                id: id.to_string(),
                initializer: initializer.map(|s| s.to_string()),
            });
        }

        if let Some(rest) = name.strip_prefix(SIM_PREFIX) {
            let (function, args) = split_call(rest).ok_or_else(|| PvError::UnsupportedPv(raw.to_string()))?;
            if function.is_empty() {
                return Err(PvError::UnsupportedPv(raw.to_string()));
            }
            return Ok(PvName::Simulated {
                function: function.to_string(),
                args: args.map(split_args),
            });
        }

        if let Some(rest) = name.strip_prefix(SYS_PREFIX) {
            if rest == "time" {
                return Ok(PvName::Clock);
            }
        }

        Err(PvError::UnsupportedPv(raw.to_string()))
    }

    /// Registry key for this PV.
    ///
    /// Local PVs are keyed without their initializer so that `loc://x(5)` and
    /// `loc://x` address the same cell.
    pub fn canonical(&self) -> String {
        match self {
            PvName::Local { id, .. } => format!("{}{}", LOCAL_PREFIX, id),
            PvName::Simulated { function, args } => match args {
                Some(args) => format!("{}{}({})", SIM_PREFIX, function, args.join(",")),
                None => format!("{}{}", SIM_PREFIX, function),
            },
            PvName::Clock => format!("{}time", SYS_PREFIX),
            PvName::Formula { expression } => format!("{}{}", FORMULA_PREFIX, expression),
        }
    }
}

/// Split `name(args)` into its name and the raw text between the outer parens
fn split_call(s: &str) -> Option<(&str, Option<&str>)> {
    match s.find('(') {
        Some(open) => {
            let inner = s[open + 1..].strip_suffix(')')?;
            Some((s[..open].trim(), Some(inner)))
        }
        None => {
            if s.contains(')') {
                None
            } else {
                Some((s.trim(), None))
            }
        }
    }
}

fn split_args(s: &str) -> Vec<String> {
    if s.trim().is_empty() {
        return Vec::new();
    }
    s.split(',').map(|a| a.trim().to_string()).collect()
}
