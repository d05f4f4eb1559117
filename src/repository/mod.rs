use async_trait::async_trait;
use sqlx::{pool::PoolConnection, Sqlite, SqliteConnection, Transaction};

use crate::domain::*;
use crate::error::Result;

pub mod announcement_repository;
pub mod tag_repository;

pub use announcement_repository::SqliteAnnouncementRepository;
pub use tag_repository::SqliteTagRepository;

/// Announcement rows with their attachments and tag links.
///
/// Everything except `begin`/`acquire` runs on a caller-supplied connection,
/// so a service can compose several calls into one transaction.
#[async_trait]
pub trait AnnouncementStore: Send + Sync {
    async fn begin(&self) -> Result<Transaction<'static, Sqlite>>;
    async fn acquire(&self) -> Result<PoolConnection<Sqlite>>;

    async fn insert(
        &self,
        conn: &mut SqliteConnection,
        request: &AnnouncementRequest,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<AnnouncementId>;
    async fn replace(
        &self,
        conn: &mut SqliteConnection,
        id: AnnouncementId,
        request: &AnnouncementRequest,
    ) -> Result<bool>;
    async fn set_archived_at(
        &self,
        conn: &mut SqliteConnection,
        id: AnnouncementId,
        archived_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<bool>;
    async fn delete(&self, conn: &mut SqliteConnection, id: AnnouncementId) -> Result<bool>;

    async fn insert_attachments(
        &self,
        conn: &mut SqliteConnection,
        id: AnnouncementId,
        urls: &[String],
    ) -> Result<()>;
    async fn delete_attachments(&self, conn: &mut SqliteConnection, id: AnnouncementId) -> Result<()>;

    async fn tag_ids(&self, conn: &mut SqliteConnection, id: AnnouncementId) -> Result<Vec<TagId>>;
    async fn attach_tags(
        &self,
        conn: &mut SqliteConnection,
        id: AnnouncementId,
        tags: &[TagId],
    ) -> Result<()>;
    async fn detach_tags(
        &self,
        conn: &mut SqliteConnection,
        id: AnnouncementId,
        tags: &[TagId],
    ) -> Result<()>;
    async fn detach_all_tags(
        &self,
        conn: &mut SqliteConnection,
        id: AnnouncementId,
    ) -> Result<Vec<TagId>>;

    async fn find_by_id(
        &self,
        conn: &mut SqliteConnection,
        id: AnnouncementId,
    ) -> Result<Option<Announcement>>;
    async fn find_latest(&self, conn: &mut SqliteConnection) -> Result<Option<Announcement>>;
    async fn find_latest_for_tag(
        &self,
        conn: &mut SqliteConnection,
        tag: TagId,
    ) -> Result<Option<Announcement>>;
    async fn latest_id_per_tag(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Vec<(TagId, AnnouncementId)>>;
    async fn paged(
        &self,
        conn: &mut SqliteConnection,
        offset: i64,
        limit: i64,
        tags: Option<&[TagId]>,
    ) -> Result<Vec<Announcement>>;
    async fn count(&self, conn: &mut SqliteConnection) -> Result<i64>;
}

/// Tag rows: find-or-create by name and reference-counted removal.
#[async_trait]
pub trait TagRegistry: Send + Sync {
    async fn resolve(&self, conn: &mut SqliteConnection, names: &[&str]) -> Result<Vec<Tag>>;
    async fn count_references(
        &self,
        conn: &mut SqliteConnection,
        tag: TagId,
        excluding: AnnouncementId,
    ) -> Result<i64>;
    async fn collect(
        &self,
        conn: &mut SqliteConnection,
        tag: TagId,
        excluding: AnnouncementId,
    ) -> Result<bool>;
    async fn list(&self) -> Result<Vec<Tag>>;
}
