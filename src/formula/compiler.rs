//! Rhai-backed formula compiler.

use super::{CompiledFormula, DataSourceValue, FormulaCompiler};
use crate::config::ScriptLimits;
use crate::error::{PvError, Result};
use crate::scripting::{dynamic_to_pv, expression_engine, pv_to_dynamic};
use crate::types::{PvValue, Severity};
use rhai::{Dynamic, Engine, Scope, AST};
use std::sync::Arc;

const REFERENCE_PREFIX: &str = "pvref";

/// Replace single-quoted PV references with scope identifiers.
///
/// Returns the rewritten expression and the referenced PV names; the same
/// name maps to the same identifier (`pvref<index>`). Double-quoted string
/// literals are copied through untouched.
pub fn rewrite_references(source: &str) -> Result<(String, Vec<String>)> {
    let mut out = String::with_capacity(source.len());
    let mut names: Vec<String> = Vec::new();
    let mut chars = source.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '\'' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed {
                    return Err(PvError::Formula(format!(
                        "Unterminated PV reference in '{}'",
                        source
                    )));
                }
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(PvError::Formula(format!(
                        "Empty PV reference in '{}'",
                        source
                    )));
                }
                let index = match names.iter().position(|n| *n == name) {
                    Some(i) => i,
                    None => {
                        names.push(name);
                        names.len() - 1
                    }
                };
                out.push_str(REFERENCE_PREFIX);
                out.push_str(&index.to_string());
            }
            '"' => {
                out.push(c);
                let mut escaped = false;
                for n in chars.by_ref() {
                    out.push(n);
                    if escaped {
                        escaped = false;
                    } else if n == '\\' {
                        escaped = true;
                    } else if n == '"' {
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }

    Ok((out, names))
}

/// Compiles formulas as Rhai expressions
pub struct RhaiFormulaCompiler {
    engine: Arc<Engine>,
}

impl RhaiFormulaCompiler {
    pub fn new(limits: &ScriptLimits) -> Self {
        Self {
            engine: Arc::new(expression_engine(limits)),
        }
    }
}

impl FormulaCompiler for RhaiFormulaCompiler {
    fn compile(&self, source: &str) -> Result<Box<dyn CompiledFormula>> {
        let (expression, parameters) = rewrite_references(source)?;
        let ast = self
            .engine
            .compile_expression(&expression)
            .map_err(|e| PvError::Formula(format!("'{}': {}", source, e)))?;

        tracing::debug!(
            "Compiled formula '{}' with {} parameter(s)",
            source,
            parameters.len()
        );

        let inputs = vec![DataSourceValue::default(); parameters.len()];
        Ok(Box::new(RhaiFormula {
            source: source.to_string(),
            parameters,
            inputs,
            ast,
            engine: self.engine.clone(),
        }))
    }
}

struct RhaiFormula {
    source: String,
    parameters: Vec<String>,
    inputs: Vec<DataSourceValue>,
    ast: AST,
    engine: Arc<Engine>,
}

impl CompiledFormula for RhaiFormula {
    fn parameters(&self) -> &[String] {
        &self.parameters
    }

    fn update_data_source(&mut self, name: &str, data: DataSourceValue) {
        if let Some(index) = self.parameters.iter().position(|p| p == name) {
            self.inputs[index] = data;
        }
    }

    fn is_ready(&self) -> bool {
        self.inputs.iter().all(DataSourceValue::is_ready)
    }

    fn severity(&self) -> Severity {
        self.inputs
            .iter()
            .map(|i| i.severity)
            .max()
            .unwrap_or(Severity::None)
    }

    fn execute(&mut self) -> Result<PvValue> {
        let mut scope = Scope::new();
        for (index, (name, input)) in self.parameters.iter().zip(&self.inputs).enumerate() {
            let value = input.value.as_ref().ok_or_else(|| {
                PvError::Formula(format!("'{}': parameter {} has no value", self.source, name))
            })?;
            scope.push_dynamic(format!("{}{}", REFERENCE_PREFIX, index), pv_to_dynamic(value));
        }

        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &self.ast)
            .map_err(|e| PvError::Formula(format!("'{}': {}", self.source, e)))?;

        dynamic_to_pv(result)
            .ok_or_else(|| PvError::Formula(format!("'{}' produced no value", self.source)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> RhaiFormulaCompiler {
        RhaiFormulaCompiler::new(&ScriptLimits::default())
    }

    #[test]
    fn test_rewrite_dedupes_references() {
        let (expr, names) = rewrite_references("'loc://a' + 'loc://b' * 'loc://a'").unwrap();
        assert_eq!(expr, "pvref0 + pvref1 * pvref0");
        assert_eq!(names, vec!["loc://a", "loc://b"]);
    }

    #[test]
    fn test_rewrite_skips_string_literals() {
        let (expr, names) = rewrite_references(r#""it's \"x\"" + 'loc://a'"#).unwrap();
        assert_eq!(expr, r#""it's \"x\"" + pvref0"#);
        assert_eq!(names, vec!["loc://a"]);
    }

    #[test]
    fn test_rewrite_rejects_bad_references() {
        assert!(matches!(
            rewrite_references("1 + 'loc://a"),
            Err(PvError::Formula(_))
        ));
        assert!(matches!(rewrite_references("1 + ''"), Err(PvError::Formula(_))));
    }

    #[test]
    fn test_execute_with_parameters() {
        let mut formula = compiler().compile("2 * 'loc://x' + 1").unwrap();
        assert_eq!(formula.parameters(), ["loc://x".to_string()]);
        assert!(!formula.is_ready());
        assert!(formula.execute().is_err());

        formula.update_data_source(
            "loc://x",
            DataSourceValue::connected(PvValue::Number(3.0), Severity::Minor),
        );
        assert!(formula.is_ready());
        assert_eq!(formula.severity(), Severity::Minor);
        assert_eq!(formula.execute().unwrap(), PvValue::Number(7.0));
    }

    #[test]
    fn test_constant_formula() {
        let mut formula = compiler().compile("pi() > 3.0").unwrap();
        assert!(formula.parameters().is_empty());
        assert!(formula.is_ready());
        assert_eq!(formula.severity(), Severity::None);
        assert_eq!(formula.execute().unwrap(), PvValue::Bool(true));
    }

    #[test]
    fn test_malformed_expression_fails() {
        assert!(matches!(
            compiler().compile("1 + * 2"),
            Err(PvError::Formula(_))
        ));
        // statements are not expressions
        assert!(compiler().compile("let x = 1").is_err());
    }
}
