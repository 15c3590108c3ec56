//! Compiled rule program: an ordered list of predicate/action branches plus a
//! default action, interpreted directly against the bound PVs.

use super::{Accessors, RuleDeclaration};
use crate::error::{PvError, Result, ResultExt};
use crate::pv::PvSnapshot;
use crate::scripting::dynamic_to_pv;
use crate::types::PvValue;
use crate::widget::{PropertyKind, SharedWidget, Widget};
use rhai::{Dynamic, Engine, Scope, AST};
use std::sync::Arc;

enum RuleAction {
    Literal(PvValue),
    Expression(AST),
}

struct RuleBranch {
    predicate: AST,
    action: RuleAction,
}

/// Executable form of a [`RuleDeclaration`]
pub struct CompiledRule {
    name: String,
    property: String,
    kind: PropertyKind,
    accessors: Accessors,
    input_count: usize,
    branches: Vec<RuleBranch>,
    engine: Arc<Engine>,
}

impl std::fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRule")
            .field("name", &self.name)
            .field("property", &self.property)
            .field("kind", &self.kind)
            .field("accessors", &self.accessors)
            .field("branches", &self.branches.len())
            .finish()
    }
}

impl CompiledRule {
    /// Compile a declaration against the widget it targets.
    ///
    /// Fails if the target property does not exist, if an accessor refers to
    /// an input index the rule does not declare, or if any condition or output
    /// expression does not parse.
    pub fn compile(decl: &RuleDeclaration, widget: &dyn Widget, engine: Arc<Engine>) -> Result<Self> {
        let kind = widget
            .property_kind(&decl.property)
            .ok_or_else(|| PvError::MissingProperty {
                widget: widget.name().to_string(),
                property: decl.property.clone(),
            })?;

        let mut accessors = Accessors::default();
        for output in &decl.outputs {
            accessors.scan(&output.expression);
            if decl.output_expression {
                accessors.scan(&output.output_value);
            }
        }
        if let Some(max) = accessors.max_index {
            if max >= decl.inputs.len() {
                return Err(PvError::Rule(format!(
                    "'{}' references input {} but declares {} input(s)",
                    decl.name,
                    max,
                    decl.inputs.len()
                )));
            }
        }

        let compile = |source: &str| -> Result<AST> {
            engine
                .compile_expression(source)
                .map_err(|e| PvError::Rule(format!("'{}': cannot parse '{}': {}", decl.name, source, e)))
        };

        let mut branches = Vec::with_capacity(decl.outputs.len());
        for output in &decl.outputs {
            let predicate = compile(&output.expression)?;
            let action = if decl.output_expression {
                RuleAction::Expression(compile(&output.output_value)?)
            } else if kind.quotes_literals() {
                RuleAction::Literal(PvValue::Text(output.output_value.clone()))
            } else {
                RuleAction::Literal(PvValue::parse_literal(&output.output_value))
            };
            branches.push(RuleBranch { predicate, action });
        }

        Ok(Self {
            name: decl.name.clone(),
            property: decl.property.clone(),
            kind,
            accessors,
            input_count: decl.inputs.len(),
            branches,
            engine,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn property_kind(&self) -> PropertyKind {
        self.kind
    }

    pub fn accessors(&self) -> Accessors {
        self.accessors
    }

    fn bind(&self, pvs: &[PvSnapshot]) -> Scope<'static> {
        let mut scope = Scope::new();
        for (index, pv) in pvs.iter().take(self.input_count).enumerate() {
            if self.accessors.numeric {
                scope.push(format!("pv{}", index), pv.number());
            }
            if self.accessors.integer {
                scope.push(format!("pvInt{}", index), pv.integer());
            }
            if self.accessors.text {
                scope.push(format!("pvStr{}", index), pv.text());
            }
            if self.accessors.severity {
                scope.push(format!("pvSev{}", index), pv.severity.code());
            }
        }
        scope
    }

    /// Select the output for the given input values.
    ///
    /// Returns `None` when no condition holds, meaning the property should be
    /// reset to its default.
    pub fn evaluate(&self, pvs: &[PvSnapshot]) -> Result<Option<PvValue>> {
        let mut scope = self.bind(pvs);
        for branch in &self.branches {
            let hit = self
                .engine
                .eval_ast_with_scope::<Dynamic>(&mut scope, &branch.predicate)
                .with_context(|| format!("rule '{}'", self.name))?;
            let hit = dynamic_to_pv(hit).map(|v| v.to_bool()).unwrap_or(false);
            if !hit {
                continue;
            }
            let value = match &branch.action {
                RuleAction::Literal(value) => value.clone(),
                RuleAction::Expression(ast) => {
                    let result = self
                        .engine
                        .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
                        .with_context(|| format!("rule '{}'", self.name))?;
                    dynamic_to_pv(result).ok_or_else(|| {
                        PvError::Rule(format!("'{}': output expression produced no value", self.name))
                    })?
                }
            };
            return Ok(Some(value));
        }
        Ok(None)
    }

    /// Evaluate and write the selected value (or the default) to the widget
    pub fn execute(&self, pvs: &[PvSnapshot], widget: &SharedWidget) -> Result<()> {
        let selected = self.evaluate(pvs)?;
        let mut widget = widget
            .write()
            .map_err(|e| PvError::Rule(format!("Failed to acquire widget lock: {}", e)))?;
        let value = match selected {
            Some(value) => value,
            None => widget
                .default_value(&self.property)
                .ok_or_else(|| PvError::MissingProperty {
                    widget: widget.name().to_string(),
                    property: self.property.clone(),
                })?,
        };
        widget.set_property_value(&self.property, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScriptLimits;
    use crate::scripting::{expression_engine, PvInput};
    use crate::types::Severity;
    use crate::widget::{shared, PropertyMapWidget};

    fn engine() -> Arc<Engine> {
        Arc::new(expression_engine(&ScriptLimits::default()))
    }

    fn widget() -> PropertyMapWidget {
        PropertyMapWidget::new("gauge")
            .with_property("background", PropertyKind::Color, "#00ff00")
            .with_property("label", PropertyKind::String, "ok")
            .with_property("width", PropertyKind::Number, 10.0)
    }

    fn pv(value: f64, severity: Severity) -> PvSnapshot {
        PvSnapshot {
            name: "loc://level".into(),
            value: Some(PvValue::Number(value)),
            severity,
            precision: None,
            time: None,
        }
    }

    fn level_rule(property: &str) -> RuleDeclaration {
        RuleDeclaration::new("level", property)
            .with_input(PvInput::trigger("loc://level"))
            .with_output("pv0 > 90", "high")
            .with_output("pv0 > 50", "mid")
    }

    #[test]
    fn test_first_match_wins() {
        let rule = CompiledRule::compile(&level_rule("label"), &widget(), engine()).unwrap();
        assert_eq!(
            rule.evaluate(&[pv(95.0, Severity::None)]).unwrap(),
            Some(PvValue::Text("high".into()))
        );
        assert_eq!(
            rule.evaluate(&[pv(60.0, Severity::None)]).unwrap(),
            Some(PvValue::Text("mid".into()))
        );
        assert_eq!(rule.evaluate(&[pv(10.0, Severity::None)]).unwrap(), None);
    }

    #[test]
    fn test_default_branch_resets_property() {
        let w = shared(widget());
        let decl = RuleDeclaration::new("width", "width")
            .with_input(PvInput::trigger("loc://level"))
            .with_output("pv0 > 50", "42");
        let rule = CompiledRule::compile(&decl, &widget(), engine()).unwrap();

        rule.execute(&[pv(60.0, Severity::None)], &w).unwrap();
        assert_eq!(w.read().unwrap().get_property("width"), Some(PvValue::Number(42.0)));

        rule.execute(&[pv(10.0, Severity::None)], &w).unwrap();
        assert_eq!(w.read().unwrap().get_property("width"), Some(PvValue::Number(10.0)));
    }

    #[test]
    fn test_non_string_literals_are_parsed() {
        let decl = RuleDeclaration::new("quoted", "label")
            .with_input(PvInput::trigger("loc://level"))
            .with_output("true", "42");
        let rule = CompiledRule::compile(&decl, &widget(), engine()).unwrap();
        assert_eq!(
            rule.evaluate(&[pv(0.0, Severity::None)]).unwrap(),
            Some(PvValue::Text("42".into()))
        );

        let decl = RuleDeclaration::new("unquoted", "width")
            .with_input(PvInput::trigger("loc://level"))
            .with_output("true", "42");
        let rule = CompiledRule::compile(&decl, &widget(), engine()).unwrap();
        assert_eq!(
            rule.evaluate(&[pv(0.0, Severity::None)]).unwrap(),
            Some(PvValue::Number(42.0))
        );
    }

    #[test]
    fn test_output_expression_and_typed_accessors() {
        let decl = RuleDeclaration::new("expr", "label")
            .with_input(PvInput::trigger("loc://level"))
            .with_output("pvSev0 >= 2", r#""ALARM " + pvStr0"#)
            .with_output("true", "pvStr0 + \"/\" + pvInt0")
            .output_expression(true);
        let rule = CompiledRule::compile(&decl, &widget(), engine()).unwrap();
        let accessors = rule.accessors();
        assert!(accessors.severity && accessors.text && accessors.integer);
        assert!(!accessors.numeric);

        assert_eq!(
            rule.evaluate(&[pv(12.5, Severity::Major)]).unwrap(),
            Some(PvValue::Text("ALARM 12.5".into()))
        );
        assert_eq!(
            rule.evaluate(&[pv(12.5, Severity::None)]).unwrap(),
            Some(PvValue::Text("12.5/12".into()))
        );
    }

    #[test]
    fn test_missing_property_fails() {
        let err = CompiledRule::compile(&level_rule("blink"), &widget(), engine()).unwrap_err();
        assert!(matches!(err, PvError::MissingProperty { .. }));
    }

    #[test]
    fn test_out_of_range_accessor_fails() {
        let decl = RuleDeclaration::new("bad", "label")
            .with_input(PvInput::trigger("loc://level"))
            .with_output("pv1 > 0", "x");
        assert!(matches!(
            CompiledRule::compile(&decl, &widget(), engine()),
            Err(PvError::Rule(_))
        ));
    }

    #[test]
    fn test_malformed_condition_fails() {
        let decl = RuleDeclaration::new("bad", "label")
            .with_input(PvInput::trigger("loc://level"))
            .with_output("pv0 >", "x");
        assert!(CompiledRule::compile(&decl, &widget(), engine()).is_err());
    }

    #[test]
    fn test_missing_value_reads_as_nan() {
        let rule = CompiledRule::compile(&level_rule("label"), &widget(), engine()).unwrap();
        let empty = PvSnapshot {
            name: "loc://level".into(),
            value: None,
            severity: Severity::Undefined,
            precision: None,
            time: None,
        };
        assert_eq!(rule.evaluate(&[empty]).unwrap(), None);
    }
}
