use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{pool::PoolConnection, FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool, Transaction};

use crate::{
    domain::{Announcement, AnnouncementId, AnnouncementRequest, TagId},
    error::Result,
    repository::AnnouncementStore,
};

const ANNOUNCEMENT_COLUMNS: &str =
    "a.id, a.author, a.title, a.content, a.created_at, a.archived_at, a.level";

#[derive(FromRow)]
struct AnnouncementRow {
    id: i64,
    author: Option<String>,
    title: String,
    content: Option<String>,
    created_at: NaiveDateTime,
    archived_at: Option<NaiveDateTime>,
    level: i32,
}

#[derive(FromRow)]
struct AttachmentRow {
    announcement_id: i64,
    url: String,
}

#[derive(FromRow)]
struct TagLinkRow {
    announcement_id: i64,
    tag_id: i64,
}

/// Row-level access to announcements, their attachments and their tag links.
///
/// Every query runs on a caller-supplied connection so the service can
/// compose several of them into one transaction.
pub struct SqliteAnnouncementRepository {
    pool: SqlitePool,
}

impl SqliteAnnouncementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_announcement(
        row: AnnouncementRow,
        attachments: Vec<String>,
        tags: Vec<TagId>,
    ) -> Announcement {
        Announcement {
            id: row.id,
            author: row.author,
            title: row.title,
            content: row.content,
            attachments,
            tags,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            archived_at: row.archived_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            level: row.level,
        }
    }

    /// Loads attachments and tag ids for a batch of rows, preserving row order.
    async fn hydrate(
        conn: &mut SqliteConnection,
        rows: Vec<AnnouncementRow>,
    ) -> Result<Vec<Announcement>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut attachments_query = QueryBuilder::<Sqlite>::new(
            "SELECT announcement_id, url FROM attachments WHERE announcement_id IN (",
        );
        let mut ids = attachments_query.separated(", ");
        for row in &rows {
            ids.push_bind(row.id);
        }
        ids.push_unseparated(") ORDER BY id ASC");

        let attachment_rows = attachments_query
            .build_query_as::<AttachmentRow>()
            .fetch_all(&mut *conn)
            .await?;

        let mut tags_query = QueryBuilder::<Sqlite>::new(
            "SELECT announcement_id, tag_id FROM announcement_tags WHERE announcement_id IN (",
        );
        let mut ids = tags_query.separated(", ");
        for row in &rows {
            ids.push_bind(row.id);
        }
        ids.push_unseparated(") ORDER BY tag_id ASC");

        let tag_rows = tags_query
            .build_query_as::<TagLinkRow>()
            .fetch_all(&mut *conn)
            .await?;

        let mut attachments: HashMap<i64, Vec<String>> = HashMap::new();
        for row in attachment_rows {
            attachments.entry(row.announcement_id).or_default().push(row.url);
        }

        let mut tags: HashMap<i64, Vec<TagId>> = HashMap::new();
        for row in tag_rows {
            tags.entry(row.announcement_id).or_default().push(row.tag_id);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let id = row.id;
                Self::row_to_announcement(
                    row,
                    attachments.remove(&id).unwrap_or_default(),
                    tags.remove(&id).unwrap_or_default(),
                )
            })
            .collect())
    }

    async fn hydrate_one(
        conn: &mut SqliteConnection,
        row: Option<AnnouncementRow>,
    ) -> Result<Option<Announcement>> {
        match row {
            Some(r) => Ok(Self::hydrate(conn, vec![r]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AnnouncementStore for SqliteAnnouncementRepository {
    async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    /// Inserts the scalar row and returns the id the store assigned.
    async fn insert(
        &self,
        conn: &mut SqliteConnection,
        request: &AnnouncementRequest,
        created_at: DateTime<Utc>,
    ) -> Result<AnnouncementId> {
        let result = sqlx::query(
            r#"
            INSERT INTO announcements (author, title, content, created_at, archived_at, level)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.author)
        .bind(&request.title)
        .bind(&request.content)
        .bind(created_at.naive_utc())
        .bind(request.archived_at.map(|dt| dt.naive_utc()))
        .bind(request.level)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Overwrites every mutable scalar field. Returns false if no row has this id.
    async fn replace(
        &self,
        conn: &mut SqliteConnection,
        id: AnnouncementId,
        request: &AnnouncementRequest,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE announcements
            SET author = ?, title = ?, content = ?, archived_at = ?, level = ?
            WHERE id = ?
            "#,
        )
        .bind(&request.author)
        .bind(&request.title)
        .bind(&request.content)
        .bind(request.archived_at.map(|dt| dt.naive_utc()))
        .bind(request.level)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_archived_at(
        &self,
        conn: &mut SqliteConnection,
        id: AnnouncementId,
        archived_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE announcements SET archived_at = ? WHERE id = ?")
            .bind(archived_at.map(|dt| dt.naive_utc()))
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_attachments(
        &self,
        conn: &mut SqliteConnection,
        id: AnnouncementId,
        urls: &[String],
    ) -> Result<()> {
        for url in urls {
            sqlx::query("INSERT INTO attachments (announcement_id, url) VALUES (?, ?)")
                .bind(id)
                .bind(url)
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }

    async fn delete_attachments(&self, conn: &mut SqliteConnection, id: AnnouncementId) -> Result<()> {
        sqlx::query("DELETE FROM attachments WHERE announcement_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn tag_ids(&self, conn: &mut SqliteConnection, id: AnnouncementId) -> Result<Vec<TagId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT tag_id FROM announcement_tags WHERE announcement_id = ? ORDER BY tag_id ASC",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(ids)
    }

    async fn attach_tags(
        &self,
        conn: &mut SqliteConnection,
        id: AnnouncementId,
        tags: &[TagId],
    ) -> Result<()> {
        for tag in tags {
            sqlx::query(
                r#"
                INSERT INTO announcement_tags (announcement_id, tag_id)
                VALUES (?, ?)
                ON CONFLICT (announcement_id, tag_id) DO NOTHING
                "#,
            )
            .bind(id)
            .bind(tag)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    async fn detach_tags(
        &self,
        conn: &mut SqliteConnection,
        id: AnnouncementId,
        tags: &[TagId],
    ) -> Result<()> {
        for tag in tags {
            sqlx::query("DELETE FROM announcement_tags WHERE announcement_id = ? AND tag_id = ?")
                .bind(id)
                .bind(tag)
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }

    /// Removes every tag link of the announcement and returns the tags it had.
    async fn detach_all_tags(
        &self,
        conn: &mut SqliteConnection,
        id: AnnouncementId,
    ) -> Result<Vec<TagId>> {
        let mut tags = sqlx::query_scalar::<_, i64>(
            "DELETE FROM announcement_tags WHERE announcement_id = ? RETURNING tag_id",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

        tags.sort_unstable();
        Ok(tags)
    }

    /// Deletes the row; attachments and tag links go with it.
    async fn delete(&self, conn: &mut SqliteConnection, id: AnnouncementId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM announcements WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(
        &self,
        conn: &mut SqliteConnection,
        id: AnnouncementId,
    ) -> Result<Option<Announcement>> {
        let row = sqlx::query_as::<_, AnnouncementRow>(&format!(
            "SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements a WHERE a.id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Self::hydrate_one(conn, row).await
    }

    /// The announcement with the highest id in the store.
    async fn find_latest(&self, conn: &mut SqliteConnection) -> Result<Option<Announcement>> {
        let row = sqlx::query_as::<_, AnnouncementRow>(&format!(
            "SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements a ORDER BY a.id DESC LIMIT 1"
        ))
        .fetch_optional(&mut *conn)
        .await?;

        Self::hydrate_one(conn, row).await
    }

    /// The highest-id announcement referencing `tag`.
    async fn find_latest_for_tag(
        &self,
        conn: &mut SqliteConnection,
        tag: TagId,
    ) -> Result<Option<Announcement>> {
        let row = sqlx::query_as::<_, AnnouncementRow>(&format!(
            r#"
            SELECT {ANNOUNCEMENT_COLUMNS}
            FROM announcements a
            JOIN announcement_tags t ON t.announcement_id = a.id
            WHERE t.tag_id = ?
            ORDER BY a.id DESC
            LIMIT 1
            "#
        ))
        .bind(tag)
        .fetch_optional(&mut *conn)
        .await?;

        Self::hydrate_one(conn, row).await
    }

    /// For every tag in use, the id of the highest-id announcement referencing it.
    async fn latest_id_per_tag(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Vec<(TagId, AnnouncementId)>> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT tag_id, MAX(announcement_id)
            FROM announcement_tags
            GROUP BY tag_id
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows)
    }

    /// Newest-first page. With a non-empty `tags`, only announcements linked
    /// to at least one of them are returned, each at most once.
    async fn paged(
        &self,
        conn: &mut SqliteConnection,
        offset: i64,
        limit: i64,
        tags: Option<&[TagId]>,
    ) -> Result<Vec<Announcement>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT DISTINCT ");
        query.push(ANNOUNCEMENT_COLUMNS).push(" FROM announcements a");

        if let Some(tags) = tags.filter(|tags| !tags.is_empty()) {
            query.push(" JOIN announcement_tags t ON t.announcement_id = a.id WHERE t.tag_id IN (");
            let mut ids = query.separated(", ");
            for tag in tags {
                ids.push_bind(*tag);
            }
            ids.push_unseparated(")");
        }

        query
            .push(" ORDER BY a.id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = query
            .build_query_as::<AnnouncementRow>()
            .fetch_all(&mut *conn)
            .await?;

        Self::hydrate(conn, rows).await
    }

    async fn count(&self, conn: &mut SqliteConnection) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM announcements")
            .fetch_one(&mut *conn)
            .await?;

        Ok(row.0)
    }
}
