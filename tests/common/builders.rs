//! Test data builders for widgets and reactive units

use pvengine_rs::rules::RuleDeclaration;
use pvengine_rs::scripting::{PvInput, ScriptDeclaration};
use pvengine_rs::widget::{shared, PropertyKind, PropertyMapWidget, SharedWidget, Widget};
use pvengine_rs::PvValue;

/// Builder for in-memory widgets
pub struct WidgetBuilder {
    widget: PropertyMapWidget,
}

impl WidgetBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            widget: PropertyMapWidget::new(name),
        }
    }

    pub fn number(mut self, property: &str, default: f64) -> Self {
        self.widget.define(property, PropertyKind::Number, default);
        self
    }

    pub fn boolean(mut self, property: &str, default: bool) -> Self {
        self.widget.define(property, PropertyKind::Boolean, default);
        self
    }

    pub fn text(mut self, property: &str, default: &str) -> Self {
        self.widget.define(property, PropertyKind::String, default);
        self
    }

    pub fn color(mut self, property: &str, default: &str) -> Self {
        self.widget.define(property, PropertyKind::Color, default);
        self
    }

    pub fn build(self) -> SharedWidget {
        shared(self.widget)
    }
}

/// Current value of a widget property
pub fn property(widget: &SharedWidget, name: &str) -> Option<PvValue> {
    widget
        .read()
        .expect("widget lock poisoned")
        .get_property(name)
}

/// Script triggered by every PV in `pvs`
pub fn script(name: &str, body: &str, pvs: &[&str]) -> ScriptDeclaration {
    pvs.iter().fold(ScriptDeclaration::new(name, body), |decl, pv| {
        decl.with_input(PvInput::trigger(*pv))
    })
}

/// Rule triggered by every PV in `pvs`
pub fn rule(name: &str, property: &str, pvs: &[&str]) -> RuleDeclaration {
    pvs.iter().fold(RuleDeclaration::new(name, property), |decl, pv| {
        decl.with_input(PvInput::trigger(*pv))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widget_builder() {
        let widget = WidgetBuilder::new("gauge").number("value", 1.5).build();
        assert_eq!(property(&widget, "value"), Some(PvValue::Number(1.5)));
        assert_eq!(property(&widget, "missing"), None);
    }
}
