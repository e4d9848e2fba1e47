//! Template document graph: nodes own named slots, slots list child nodes.
//!
//! The graph is expected to be acyclic and rooted at [`TemplateDocument::root`].
//! Dangling references are tolerated; consumers treat them as absent.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::expression::Expression;
use super::theme::StyleMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub String);

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for SlotId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Map<String, Value>>,
    #[serde(default)]
    pub slots: Vec<SlotId>,
}

impl Node {
    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.props.as_ref().and_then(|props| props.get(key))
    }

    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.prop(key).and_then(Value::as_str)
    }

    pub fn prop_u64(&self, key: &str) -> Option<u64> {
        self.prop(key).and_then(Value::as_u64)
    }

    pub fn prop_f64(&self, key: &str) -> Option<f64> {
        self.prop(key).and_then(Value::as_f64)
    }

    pub fn prop_bool(&self, key: &str) -> bool {
        self.prop(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn prop_expression(&self, key: &str) -> Option<Expression> {
        self.prop(key).and_then(Expression::from_prop)
    }

    /// Inline `props.styles`, if any.
    pub fn inline_styles(&self) -> StyleMap {
        match self.prop("styles") {
            Some(Value::Object(styles)) => styles
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            _ => StyleMap::new(),
        }
    }

    /// Name of the block-style preset the node opts into.
    pub fn style_preset(&self) -> Option<&str> {
        self.prop_str("stylePreset")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: SlotId,
    pub node_id: NodeId,
    pub name: String,
    #[serde(default)]
    pub children: Vec<NodeId>,
}

/// Where a document's theme comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThemeRef {
    /// Defer to the template and tenant defaults.
    #[default]
    Inherit,
    /// Use a specific theme.
    #[serde(alias = "override")]
    Explicit { id: String },
    /// No explicit theme on the document; defaults still apply.
    None,
}

impl ThemeRef {
    pub fn explicit_id(&self) -> Option<&str> {
        match self {
            ThemeRef::Explicit { id } => Some(id.as_str()),
            ThemeRef::Inherit | ThemeRef::None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageFormat {
    #[default]
    A4,
    Letter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// Page margins in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            top: 20.0,
            right: 20.0,
            bottom: 20.0,
            left: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSettings {
    pub format: PageFormat,
    pub orientation: Orientation,
    pub margins: Margins,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDocument {
    #[serde(default = "default_model_version")]
    pub model_version: u32,
    pub root: NodeId,
    #[serde(default)]
    pub nodes: HashMap<NodeId, Node>,
    #[serde(default)]
    pub slots: HashMap<SlotId, Slot>,
    #[serde(default)]
    pub theme_ref: ThemeRef,
    #[serde(default)]
    pub document_styles: StyleMap,
    #[serde(default)]
    pub page_settings: PageSettings,
}

fn default_model_version() -> u32 {
    1
}

impl TemplateDocument {
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn slot(&self, id: &SlotId) -> Option<&Slot> {
        self.slots.get(id)
    }

    /// The slot named `name` among those owned by `node`.
    pub fn named_slot(&self, node: &Node, name: &str) -> Option<&Slot> {
        node.slots
            .iter()
            .filter_map(|id| self.slot(id))
            .find(|slot| slot.name == name)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_wire_shape() {
        let document: TemplateDocument = serde_json::from_value(json!({
            "modelVersion": 1,
            "root": "root",
            "nodes": {
                "root": {"id": "root", "type": "container", "slots": ["root-children"]},
                "hello": {"id": "hello", "type": "text", "props": {"content": "Hi {{name}}"}}
            },
            "slots": {
                "root-children": {
                    "id": "root-children",
                    "nodeId": "root",
                    "name": "children",
                    "children": ["hello"]
                }
            },
            "themeRef": {"type": "override", "id": "corporate"}
        }))
        .expect("document should parse");

        assert_eq!(document.root, NodeId::from("root"));
        assert_eq!(document.theme_ref.explicit_id(), Some("corporate"));
        let root = document.node(&document.root).unwrap();
        let slot = document.named_slot(root, "children").unwrap();
        assert_eq!(slot.children, vec![NodeId::from("hello")]);
        assert_eq!(document.page_settings.format, PageFormat::A4);
    }

    #[test]
    fn theme_ref_defaults_to_inherit() {
        let document: TemplateDocument =
            serde_json::from_value(json!({"root": "r"})).expect("minimal document parses");
        assert_eq!(document.theme_ref, ThemeRef::Inherit);
        assert!(document.nodes.is_empty());

        let none: ThemeRef = serde_json::from_value(json!({"type": "none"})).unwrap();
        assert_eq!(none.explicit_id(), None);
    }
}
