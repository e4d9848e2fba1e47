use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    application::repos::{DocumentsRepo, RepoError},
    domain::entities::NewGeneratedDocument,
};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl DocumentsRepo for PostgresRepositories {
    async fn store_document(&self, document: NewGeneratedDocument) -> Result<Uuid, RepoError> {
        let id = Uuid::new_v4();
        let size_bytes = document.size_bytes();

        sqlx::query(
            r#"
            INSERT INTO generated_documents
                (id, tenant_id, job_id, filename, content_type, size_bytes, content, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(&document.tenant_id)
        .bind(document.job_id)
        .bind(&document.filename)
        .bind(&document.content_type)
        .bind(size_bytes)
        .bind(&document.bytes)
        .bind(document.expires_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(id)
    }
}
