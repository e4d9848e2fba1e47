use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::types::Json;

use crate::{
    application::repos::{RepoError, TemplateCatalog, TemplateSnapshot, ThemesRepo},
    domain::{
        document::TemplateDocument,
        entities::VersionSelector,
        theme::{BlockStylePreset, StyleMap, Theme},
    },
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct TemplateRow {
    content: Json<TemplateDocument>,
    template_default_theme: Option<String>,
    tenant_default_theme: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ThemeRow {
    id: String,
    name: Option<String>,
    document_styles: Json<StyleMap>,
    block_style_presets: Json<HashMap<String, BlockStylePreset>>,
}

impl From<TemplateRow> for TemplateSnapshot {
    fn from(row: TemplateRow) -> Self {
        Self {
            document: row.content.0,
            template_default_theme: row.template_default_theme,
            tenant_default_theme: row.tenant_default_theme,
        }
    }
}

impl From<ThemeRow> for Theme {
    fn from(row: ThemeRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            document_styles: row.document_styles.0,
            block_style_presets: row.block_style_presets.0,
        }
    }
}

#[async_trait]
impl TemplateCatalog for PostgresRepositories {
    async fn load_template(
        &self,
        tenant_id: &str,
        template_id: &str,
        variant_id: &str,
        target: &VersionSelector,
    ) -> Result<Option<TemplateSnapshot>, RepoError> {
        let query = match target {
            VersionSelector::Version(version) => sqlx::query_as::<_, TemplateRow>(
                r#"
                SELECT tv.content,
                       t.default_theme_id AS template_default_theme,
                       tn.default_theme_id AS tenant_default_theme
                  FROM template_versions tv
                  JOIN templates t ON t.tenant_id = tv.tenant_id AND t.id = tv.template_id
                  JOIN tenants tn ON tn.id = tv.tenant_id
                 WHERE tv.tenant_id = $1
                   AND tv.template_id = $2
                   AND tv.variant_id = $3
                   AND tv.version = $4
                "#,
            )
            .bind(tenant_id)
            .bind(template_id)
            .bind(variant_id)
            .bind(*version),
            VersionSelector::Environment(environment) => sqlx::query_as::<_, TemplateRow>(
                r#"
                SELECT tv.content,
                       t.default_theme_id AS template_default_theme,
                       tn.default_theme_id AS tenant_default_theme
                  FROM environment_activations ea
                  JOIN template_versions tv
                    ON tv.tenant_id = ea.tenant_id
                   AND tv.template_id = ea.template_id
                   AND tv.variant_id = ea.variant_id
                   AND tv.version = ea.version
                  JOIN templates t ON t.tenant_id = tv.tenant_id AND t.id = tv.template_id
                  JOIN tenants tn ON tn.id = tv.tenant_id
                 WHERE ea.tenant_id = $1
                   AND ea.template_id = $2
                   AND ea.variant_id = $3
                   AND ea.environment_id = $4
                "#,
            )
            .bind(tenant_id)
            .bind(template_id)
            .bind(variant_id)
            .bind(environment.as_str()),
        };

        let row = query
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(TemplateSnapshot::from))
    }
}

#[async_trait]
impl ThemesRepo for PostgresRepositories {
    async fn find_theme(
        &self,
        tenant_id: &str,
        theme_id: &str,
    ) -> Result<Option<Theme>, RepoError> {
        let row = sqlx::query_as::<_, ThemeRow>(
            r#"
            SELECT id, name, document_styles, block_style_presets
              FROM themes
             WHERE tenant_id = $1
               AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(theme_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Theme::from))
    }
}
