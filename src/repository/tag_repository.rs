use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    domain::{AnnouncementId, Tag, TagId},
    error::Result,
    repository::TagRegistry,
};

/// The tag registry: find-or-create by name and reference-counted removal.
pub struct SqliteTagRepository {
    pool: SqlitePool,
}

impl SqliteTagRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TagRegistry for SqliteTagRepository {
    /// Returns the tag row for every name, creating the missing ones.
    ///
    /// Creation is an `INSERT .. ON CONFLICT DO NOTHING` against the unique
    /// name column followed by a read, so two writers introducing the same
    /// name both end up with the single row that won.
    async fn resolve(&self, conn: &mut SqliteConnection, names: &[&str]) -> Result<Vec<Tag>> {
        let mut tags = Vec::with_capacity(names.len());

        for name in names.iter().copied() {
            sqlx::query("INSERT INTO tags (name) VALUES (?) ON CONFLICT (name) DO NOTHING")
                .bind(name)
                .execute(&mut *conn)
                .await?;

            let tag = sqlx::query_as::<_, Tag>("SELECT id, name FROM tags WHERE name = ?")
                .bind(name)
                .fetch_one(&mut *conn)
                .await?;

            tags.push(tag);
        }

        Ok(tags)
    }

    /// Number of announcements other than `excluding` that link to `tag`.
    async fn count_references(
        &self,
        conn: &mut SqliteConnection,
        tag: TagId,
        excluding: AnnouncementId,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) as count
            FROM announcement_tags
            WHERE tag_id = ? AND announcement_id != ?
            "#,
        )
        .bind(tag)
        .bind(excluding)
        .fetch_one(&mut *conn)
        .await?;

        Ok(row.0)
    }

    /// Deletes `tag` if no announcement besides `excluding` still references it.
    /// Returns whether the tag was removed.
    async fn collect(
        &self,
        conn: &mut SqliteConnection,
        tag: TagId,
        excluding: AnnouncementId,
    ) -> Result<bool> {
        if self.count_references(conn, tag, excluding).await? > 0 {
            return Ok(false);
        }

        let result = sqlx::query("DELETE FROM tags WHERE id = ?")
            .bind(tag)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All registered tags, ordered by name.
    async fn list(&self) -> Result<Vec<Tag>> {
        let tags = sqlx::query_as::<_, Tag>("SELECT id, name FROM tags ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(tags)
    }
}
