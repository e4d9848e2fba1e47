//! Theme cascade: explicit document theme, then template default, then tenant default.

use std::sync::Arc;

use tracing::debug;

use crate::application::repos::{RepoError, TemplateSnapshot, ThemesRepo};
use crate::domain::theme::{ResolvedStyles, StyleMap, Theme};

#[derive(Clone)]
pub struct ThemeResolver {
    themes: Arc<dyn ThemesRepo>,
}

impl ThemeResolver {
    pub fn new(themes: Arc<dyn ThemesRepo>) -> Self {
        Self { themes }
    }

    /// The first theme of the cascade that exists for `tenant_id`.
    ///
    /// A referenced id with no stored theme falls through to the next source.
    pub async fn resolve_theme(
        &self,
        tenant_id: &str,
        snapshot: &TemplateSnapshot,
    ) -> Result<Option<Theme>, RepoError> {
        let candidates = [
            ("document", snapshot.document.theme_ref.explicit_id()),
            ("template", snapshot.template_default_theme.as_deref()),
            ("tenant", snapshot.tenant_default_theme.as_deref()),
        ];

        for (source, theme_id) in candidates {
            let Some(theme_id) = theme_id else {
                continue;
            };
            match self.themes.find_theme(tenant_id, theme_id).await? {
                Some(theme) => {
                    debug!(
                        target = "application::theme",
                        tenant = tenant_id,
                        theme_id,
                        source,
                        "resolved theme"
                    );
                    return Ok(Some(theme));
                }
                None => debug!(
                    target = "application::theme",
                    tenant = tenant_id,
                    theme_id,
                    source,
                    "referenced theme not found; trying next source"
                ),
            }
        }
        Ok(None)
    }

    /// Resolve the theme and merge it with the document's own styles.
    pub async fn resolve_styles(
        &self,
        tenant_id: &str,
        snapshot: &TemplateSnapshot,
    ) -> Result<ResolvedStyles, RepoError> {
        let theme = self.resolve_theme(tenant_id, snapshot).await?;
        Ok(merge_styles(theme, &snapshot.document.document_styles))
    }
}

/// Theme document styles are defaults that `template_styles` override key by key.
/// Presets pass through untouched.
pub fn merge_styles(theme: Option<Theme>, template_styles: &StyleMap) -> ResolvedStyles {
    let Some(theme) = theme else {
        return ResolvedStyles {
            theme_id: None,
            document_styles: template_styles.clone(),
            block_style_presets: Default::default(),
        };
    };

    let mut document_styles = theme.document_styles;
    document_styles.extend(
        template_styles
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );

    ResolvedStyles {
        theme_id: Some(theme.id),
        document_styles,
        block_style_presets: theme.block_style_presets,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::domain::document::{NodeId, TemplateDocument, ThemeRef};
    use crate::domain::theme::BlockStylePreset;
    use crate::infra::memory::InMemoryRepositories;

    const TENANT: &str = "acme";

    fn theme(id: &str) -> Theme {
        Theme {
            id: id.to_string(),
            name: None,
            document_styles: StyleMap::from([
                ("fontSize".to_string(), json!(11)),
                ("color".to_string(), json!("#333")),
            ]),
            block_style_presets: HashMap::from([(
                "callout".to_string(),
                BlockStylePreset {
                    styles: StyleMap::from([("fontWeight".to_string(), json!("bold"))]),
                    applicable_to: Some(vec!["text".to_string()]),
                },
            )]),
        }
    }

    fn snapshot_with(
        theme_ref: ThemeRef,
        template_default: Option<&str>,
        tenant_default: Option<&str>,
    ) -> TemplateSnapshot {
        TemplateSnapshot {
            document: TemplateDocument {
                model_version: 1,
                root: NodeId::from("root"),
                nodes: HashMap::new(),
                slots: HashMap::new(),
                theme_ref,
                document_styles: StyleMap::from([("color".to_string(), json!("#000"))]),
                page_settings: Default::default(),
            },
            template_default_theme: template_default.map(str::to_string),
            tenant_default_theme: tenant_default.map(str::to_string),
        }
    }

    fn resolver() -> ThemeResolver {
        let repos = InMemoryRepositories::new();
        for id in ["t1", "t2", "t3"] {
            repos.insert_theme(TENANT, theme(id));
        }
        ThemeResolver::new(Arc::new(repos))
    }

    #[tokio::test]
    async fn explicit_theme_wins() {
        let snapshot = snapshot_with(
            ThemeRef::Explicit { id: "t1".into() },
            Some("t2"),
            Some("t3"),
        );
        let theme = resolver().resolve_theme(TENANT, &snapshot).await.unwrap();
        assert_eq!(theme.map(|theme| theme.id), Some("t1".to_string()));
    }

    #[tokio::test]
    async fn none_without_template_default_uses_tenant_default() {
        let snapshot = snapshot_with(ThemeRef::None, None, Some("t3"));
        let theme = resolver().resolve_theme(TENANT, &snapshot).await.unwrap();
        assert_eq!(theme.map(|theme| theme.id), Some("t3".to_string()));
    }

    #[tokio::test]
    async fn missing_themes_fall_through() {
        let snapshot = snapshot_with(
            ThemeRef::Explicit {
                id: "deleted".into(),
            },
            Some("t2"),
            None,
        );
        let theme = resolver().resolve_theme(TENANT, &snapshot).await.unwrap();
        assert_eq!(theme.map(|theme| theme.id), Some("t2".to_string()));

        let nothing = snapshot_with(ThemeRef::Inherit, None, None);
        assert!(resolver().resolve_theme(TENANT, &nothing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn template_styles_override_theme_styles() {
        let snapshot = snapshot_with(ThemeRef::Inherit, Some("t2"), None);
        let styles = resolver().resolve_styles(TENANT, &snapshot).await.unwrap();

        assert_eq!(styles.theme_id.as_deref(), Some("t2"));
        assert_eq!(styles.document_styles.get("color"), Some(&json!("#000")));
        assert_eq!(styles.document_styles.get("fontSize"), Some(&json!(11)));
        assert!(styles.preset_for("callout", "text").is_some());
        assert!(styles.preset_for("callout", "table").is_none());
    }

    #[test]
    fn without_theme_only_template_styles_apply() {
        let template = StyleMap::from([("color".to_string(), json!("#000"))]);
        let styles = merge_styles(None, &template);
        assert_eq!(styles.document_styles, template);
        assert!(styles.block_style_presets.is_empty());
    }

    #[tokio::test]
    async fn store_failures_propagate() {
        let repos = Arc::new(InMemoryRepositories::new());
        repos.set_offline(true);
        let resolver = ThemeResolver::new(repos);
        let snapshot = snapshot_with(ThemeRef::Inherit, Some("t2"), None);
        let err = resolver.resolve_theme(TENANT, &snapshot).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
