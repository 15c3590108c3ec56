//! Widget/property model contract.
//!
//! Widgets are owned by the display layer. The engine only needs to read and
//! write named properties, know each property's kind (rules quote string
//! outputs), and reset a property to its default.
//!
//! [`PropertyMapWidget`] is a plain in-memory implementation used by the
//! runner binary and the tests.

use crate::error::{PvError, Result};
use crate::types::PvValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Kind of a widget property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    #[default]
    String,
    Number,
    Integer,
    Boolean,
    Color,
    Font,
}

impl PropertyKind {
    /// Whether literal rule outputs targeting this kind are taken verbatim as text
    pub fn quotes_literals(&self) -> bool {
        matches!(self, PropertyKind::String)
    }
}

/// Property access required by rules and scripts
pub trait Widget: Send + Sync {
    /// Widget name, used in log messages and errors
    fn name(&self) -> &str;

    fn property_kind(&self, property: &str) -> Option<PropertyKind>;

    fn get_property(&self, property: &str) -> Option<PvValue>;

    fn default_value(&self, property: &str) -> Option<PvValue>;

    fn set_property_value(&mut self, property: &str, value: PvValue) -> Result<()>;
}

/// Widget handle shared between the display and the engine
pub type SharedWidget = Arc<RwLock<dyn Widget>>;

/// Wrap a widget into a [`SharedWidget`]
pub fn shared<W: Widget + 'static>(widget: W) -> SharedWidget {
    Arc::new(RwLock::new(widget))
}

#[derive(Debug, Clone)]
struct Property {
    kind: PropertyKind,
    default: PvValue,
    value: PvValue,
}

/// Widget backed by a sorted map of typed properties
#[derive(Debug, Clone, Default)]
pub struct PropertyMapWidget {
    name: String,
    properties: BTreeMap<String, Property>,
}

impl PropertyMapWidget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Declare a property with its kind and default value
    pub fn with_property(
        mut self,
        property: impl Into<String>,
        kind: PropertyKind,
        default: impl Into<PvValue>,
    ) -> Self {
        self.define(property, kind, default);
        self
    }

    pub fn define(&mut self, property: impl Into<String>, kind: PropertyKind, default: impl Into<PvValue>) {
        let default = default.into();
        self.properties.insert(
            property.into(),
            Property {
                kind,
                value: default.clone(),
                default,
            },
        );
    }

    /// Iterate over `(name, current value)` pairs
    pub fn values(&self) -> impl Iterator<Item = (&str, &PvValue)> {
        self.properties.iter().map(|(k, p)| (k.as_str(), &p.value))
    }
}

impl Widget for PropertyMapWidget {
    fn name(&self) -> &str {
        &self.name
    }

    fn property_kind(&self, property: &str) -> Option<PropertyKind> {
        self.properties.get(property).map(|p| p.kind)
    }

    fn get_property(&self, property: &str) -> Option<PvValue> {
        self.properties.get(property).map(|p| p.value.clone())
    }

    fn default_value(&self, property: &str) -> Option<PvValue> {
        self.properties.get(property).map(|p| p.default.clone())
    }

    fn set_property_value(&mut self, property: &str, value: PvValue) -> Result<()> {
        let name = self.name.clone();
        let slot = self
            .properties
            .get_mut(property)
            .ok_or_else(|| PvError::MissingProperty {
                widget: name,
                property: property.to_string(),
            })?;
        slot.value = value;
        Ok(())
    }
}
