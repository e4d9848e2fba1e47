//! Themes: reusable document styles plus named block-style presets.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Style properties keyed by name (`fontSize`, `color`, `marginTop`, ...).
pub type StyleMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStylePreset {
    #[serde(default)]
    pub styles: StyleMap,
    /// Node types the preset may be applied to; `None` means any type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applicable_to: Option<Vec<String>>,
}

impl BlockStylePreset {
    pub fn applies_to(&self, node_type: &str) -> bool {
        match &self.applicable_to {
            Some(types) => types.iter().any(|candidate| candidate == node_type),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub document_styles: StyleMap,
    #[serde(default)]
    pub block_style_presets: HashMap<String, BlockStylePreset>,
}

/// Effective styles for one render: merged document styles plus the preset table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedStyles {
    pub theme_id: Option<String>,
    pub document_styles: StyleMap,
    pub block_style_presets: HashMap<String, BlockStylePreset>,
}

impl ResolvedStyles {
    /// Preset styles for `name`, provided the preset accepts `node_type`.
    pub fn preset_for(&self, name: &str, node_type: &str) -> Option<&StyleMap> {
        self.block_style_presets
            .get(name)
            .filter(|preset| preset.applies_to(node_type))
            .map(|preset| &preset.styles)
    }
}
