use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use validator::Validate;

use crate::{
    config::AnnouncementConfig,
    domain::{Announcement, AnnouncementId, AnnouncementRequest, LatestAnnouncementId, Tag, TagId},
    error::{AppError, Result},
    repository::{AnnouncementStore, SqliteAnnouncementRepository, SqliteTagRepository, TagRegistry},
    service::recency_index::{RecencyIndex, Recomputed},
};

/// Public operations on announcements.
///
/// Every mutation runs in one store transaction and only touches the
/// recency index after that transaction has committed. Mutations are
/// serialized by a write gate, which is held until the index has been
/// patched, so the index sees commits in commit order. `latest*` lookups
/// read the index only.
///
/// Mutations run on a spawned task that owns the service state, so the
/// commit and the index patch that follows it finish together even when
/// the caller stops waiting.
pub struct AnnouncementService {
    state: Arc<ServiceState>,
}

impl AnnouncementService {
    /// Builds the service over the SQLite repositories, scanning the store
    /// once to seed the recency index.
    pub async fn load(pool: SqlitePool, config: &AnnouncementConfig) -> Result<Self> {
        Self::with_repositories(
            Arc::new(SqliteAnnouncementRepository::new(pool.clone())),
            Arc::new(SqliteTagRepository::new(pool)),
            config,
        )
        .await
    }

    pub async fn with_repositories(
        announcements: Arc<dyn AnnouncementStore>,
        tags: Arc<dyn TagRegistry>,
        config: &AnnouncementConfig,
    ) -> Result<Self> {
        let state = ServiceState::load(announcements, tags, config).await?;
        Ok(Self {
            state: Arc::new(state),
        })
    }

    /// Runs a mutation to completion on its own task. Dropping the returned
    /// future does not cancel the mutation.
    async fn detached<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Arc<ServiceState>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(op(Arc::clone(&self.state)))
            .await
            .map_err(|e| AppError::Internal(format!("Mutation task failed: {}", e)))?
    }

    pub fn latest(&self) -> Option<Announcement> {
        self.state.latest()
    }

    pub fn latest_id(&self) -> Option<LatestAnnouncementId> {
        self.state.latest_id()
    }

    /// Newest announcement of each tag, deduplicated, newest first.
    pub fn latest_for_tags(&self, tags: &[TagId]) -> Vec<Announcement> {
        self.state.latest_for_tags(tags)
    }

    pub fn latest_ids_for_tags(&self, tags: &[TagId]) -> Vec<LatestAnnouncementId> {
        self.state.latest_ids_for_tags(tags)
    }

    pub async fn get(&self, id: AnnouncementId) -> Result<Option<Announcement>> {
        self.state.get(id).await
    }

    /// A newest-first page read straight from the store. A non-empty `tags`
    /// keeps announcements carrying any of them.
    pub async fn paged(
        &self,
        offset: i64,
        count: i64,
        tags: Option<&[TagId]>,
    ) -> Result<Vec<Announcement>> {
        self.state.paged(offset, count, tags).await
    }

    pub async fn tags(&self) -> Result<Vec<Tag>> {
        self.state.tags.list().await
    }

    pub async fn create(&self, request: AnnouncementRequest) -> Result<Announcement> {
        request.validate()?;
        self.detached(move |state| async move { state.create(request).await })
            .await
    }

    /// Replaces every mutable field of `id`. Unknown ids are a no-op and
    /// yield `None`.
    pub async fn update(
        &self,
        id: AnnouncementId,
        request: AnnouncementRequest,
    ) -> Result<Option<Announcement>> {
        request.validate()?;
        self.detached(move |state| async move { state.update(id, request).await })
            .await
    }

    /// Deletes `id` with its attachments and tag links. Returns whether a row
    /// existed; deleting an unknown id succeeds without touching anything.
    pub async fn delete(&self, id: AnnouncementId) -> Result<bool> {
        self.detached(move |state| async move { state.delete(id).await })
            .await
    }

    /// Marks `id` archived at `archived_at`, or now.
    pub async fn archive(
        &self,
        id: AnnouncementId,
        archived_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Announcement>> {
        let archived_at = archived_at.unwrap_or_else(Utc::now);
        self.detached(move |state| async move { state.set_archived_at(id, Some(archived_at)).await })
            .await
    }

    pub async fn unarchive(&self, id: AnnouncementId) -> Result<Option<Announcement>> {
        self.detached(move |state| async move { state.set_archived_at(id, None).await })
            .await
    }
}

struct ServiceState {
    announcements: Arc<dyn AnnouncementStore>,
    tags: Arc<dyn TagRegistry>,
    index: RwLock<RecencyIndex>,
    write_gate: Mutex<()>,
    max_page_size: i64,
}

impl ServiceState {
    async fn load(
        announcements: Arc<dyn AnnouncementStore>,
        tags: Arc<dyn TagRegistry>,
        config: &AnnouncementConfig,
    ) -> Result<Self> {
        let mut tx = announcements.begin().await?;

        let latest = announcements.find_latest(&mut *tx).await?.map(Arc::new);

        let mut loaded: HashMap<AnnouncementId, Arc<Announcement>> = HashMap::new();
        if let Some(latest) = &latest {
            loaded.insert(latest.id, Arc::clone(latest));
        }

        let mut by_tag = HashMap::new();
        for (tag, id) in announcements.latest_id_per_tag(&mut *tx).await? {
            let announcement = match loaded.get(&id) {
                Some(announcement) => Arc::clone(announcement),
                None => {
                    let Some(announcement) = announcements.find_by_id(&mut *tx, id).await? else {
                        continue;
                    };
                    let announcement = Arc::new(announcement);
                    loaded.insert(id, Arc::clone(&announcement));
                    announcement
                }
            };
            by_tag.insert(tag, announcement);
        }

        let total = announcements.count(&mut *tx).await?;
        tx.commit().await?;

        let index = RecencyIndex::new(latest, by_tag);
        tracing::info!(
            "Recency index loaded: {} announcements, latest {:?}, {} tags",
            total,
            index.latest().map(|a| a.id),
            index.tracked_tags()
        );

        Ok(Self {
            announcements,
            tags,
            index: RwLock::new(index),
            write_gate: Mutex::new(()),
            max_page_size: config.max_page_size,
        })
    }

    fn read_index(&self) -> RwLockReadGuard<'_, RecencyIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, RecencyIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn latest(&self) -> Option<Announcement> {
        self.read_index().latest().map(|a| Announcement::clone(a))
    }

    fn latest_id(&self) -> Option<LatestAnnouncementId> {
        self.read_index()
            .latest()
            .map(|a| LatestAnnouncementId { id: a.id })
    }

    fn latest_for_tags(&self, tags: &[TagId]) -> Vec<Announcement> {
        self.read_index()
            .latest_for_tags(tags)
            .into_iter()
            .map(|a| Announcement::clone(a))
            .collect()
    }

    fn latest_ids_for_tags(&self, tags: &[TagId]) -> Vec<LatestAnnouncementId> {
        self.read_index()
            .latest_for_tags(tags)
            .into_iter()
            .map(|a| LatestAnnouncementId { id: a.id })
            .collect()
    }

    async fn get(&self, id: AnnouncementId) -> Result<Option<Announcement>> {
        let mut conn = self.announcements.acquire().await?;
        self.announcements.find_by_id(&mut conn, id).await
    }

    async fn paged(
        &self,
        offset: i64,
        count: i64,
        tags: Option<&[TagId]>,
    ) -> Result<Vec<Announcement>> {
        let count = count.clamp(0, self.max_page_size);
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.announcements.acquire().await?;
        self.announcements
            .paged(&mut conn, offset.max(0), count, tags)
            .await
    }

    async fn create(&self, request: AnnouncementRequest) -> Result<Announcement> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.announcements.begin().await?;

        let id = self
            .announcements
            .insert(&mut *tx, &request, Utc::now())
            .await?;
        self.announcements
            .insert_attachments(&mut *tx, id, &request.attachments)
            .await?;

        let tag_ids: Vec<TagId> = self
            .tags
            .resolve(&mut *tx, &request.tag_names())
            .await?
            .into_iter()
            .map(|tag| tag.id)
            .collect();
        self.announcements.attach_tags(&mut *tx, id, &tag_ids).await?;

        let announcement = self
            .announcements
            .find_by_id(&mut *tx, id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created announcement".to_string()))?;

        tx.commit().await?;

        let announcement = Arc::new(announcement);
        self.write_index().on_create(Arc::clone(&announcement));

        tracing::info!("Created announcement {} with tags {:?}", id, tag_ids);
        Ok(Arc::unwrap_or_clone(announcement))
    }

    async fn update(
        &self,
        id: AnnouncementId,
        request: AnnouncementRequest,
    ) -> Result<Option<Announcement>> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.announcements.begin().await?;

        if !self.announcements.replace(&mut *tx, id, &request).await? {
            tracing::debug!("Update of unknown announcement {} ignored", id);
            return Ok(None);
        }

        self.announcements.delete_attachments(&mut *tx, id).await?;
        self.announcements
            .insert_attachments(&mut *tx, id, &request.attachments)
            .await?;

        let old_tags = self.announcements.tag_ids(&mut *tx, id).await?;
        let new_tags: Vec<TagId> = self
            .tags
            .resolve(&mut *tx, &request.tag_names())
            .await?
            .into_iter()
            .map(|tag| tag.id)
            .collect();

        let removed: Vec<TagId> = old_tags
            .iter()
            .copied()
            .filter(|tag| !new_tags.contains(tag))
            .collect();
        let added: Vec<TagId> = new_tags
            .iter()
            .copied()
            .filter(|tag| !old_tags.contains(tag))
            .collect();

        self.announcements.detach_tags(&mut *tx, id, &removed).await?;
        self.announcements.attach_tags(&mut *tx, id, &added).await?;

        // Counted against the association rows as they are now.
        let collected = self.collect_tags(&mut *tx, id, &removed).await?;

        let stale = {
            let index = self.read_index();
            index
                .stale_tags(id, &removed)
                .into_iter()
                .filter(|tag| !collected.contains(tag))
                .collect::<Vec<_>>()
        };
        let recomputed = self.recompute(&mut *tx, false, &stale).await?;

        let announcement = self
            .announcements
            .find_by_id(&mut *tx, id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve updated announcement".to_string()))?;

        tx.commit().await?;

        let announcement = Arc::new(announcement);
        self.write_index()
            .on_update(Arc::clone(&announcement), &removed, &collected, recomputed);

        tracing::info!(
            "Updated announcement {}: +{:?} -{:?}, collected {:?}",
            id,
            added,
            removed,
            collected
        );
        Ok(Some(Arc::unwrap_or_clone(announcement)))
    }

    async fn delete(&self, id: AnnouncementId) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.announcements.begin().await?;

        let tags = self.announcements.detach_all_tags(&mut *tx, id).await?;
        if !self.announcements.delete(&mut *tx, id).await? {
            tracing::debug!("Delete of unknown announcement {} ignored", id);
            return Ok(false);
        }

        let collected = self.collect_tags(&mut *tx, id, &tags).await?;

        let (holds_latest, stale) = {
            let index = self.read_index();
            let stale = index
                .stale_tags(id, &tags)
                .into_iter()
                .filter(|tag| !collected.contains(tag))
                .collect::<Vec<_>>();
            (index.holds_latest(id), stale)
        };
        let recomputed = self.recompute(&mut *tx, holds_latest, &stale).await?;

        tx.commit().await?;

        self.write_index().on_delete(id, &tags, &collected, recomputed);

        tracing::info!("Deleted announcement {}, collected tags {:?}", id, collected);
        Ok(true)
    }

    async fn set_archived_at(
        &self,
        id: AnnouncementId,
        archived_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Announcement>> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.announcements.begin().await?;

        if !self
            .announcements
            .set_archived_at(&mut *tx, id, archived_at)
            .await?
        {
            return Ok(None);
        }

        let announcement = self
            .announcements
            .find_by_id(&mut *tx, id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve archived announcement".to_string()))?;

        tx.commit().await?;

        let announcement = Arc::new(announcement);
        self.write_index().on_archive_change(Arc::clone(&announcement));

        tracing::debug!("Announcement {} archived_at set to {:?}", id, archived_at);
        Ok(Some(Arc::unwrap_or_clone(announcement)))
    }

    async fn collect_tags(
        &self,
        conn: &mut SqliteConnection,
        id: AnnouncementId,
        tags: &[TagId],
    ) -> Result<HashSet<TagId>> {
        let mut collected = HashSet::new();
        for tag in tags {
            if self.tags.collect(conn, *tag, id).await? {
                collected.insert(*tag);
            }
        }
        Ok(collected)
    }

    /// Queries replacements for invalidated index slots. Runs inside the
    /// mutating transaction so it sees that transaction's writes.
    async fn recompute(
        &self,
        conn: &mut SqliteConnection,
        latest: bool,
        tags: &[TagId],
    ) -> Result<Recomputed> {
        let mut recomputed = Recomputed::default();

        if latest {
            recomputed.latest = self.announcements.find_latest(conn).await?.map(Arc::new);
        }

        for tag in tags {
            let shared = recomputed
                .latest
                .as_ref()
                .filter(|latest| latest.tags.contains(tag))
                .cloned();

            let replacement = match shared {
                Some(latest) => Some(latest),
                None => self
                    .announcements
                    .find_latest_for_tag(conn, *tag)
                    .await?
                    .map(Arc::new),
            };

            if let Some(replacement) = replacement {
                tracing::debug!("Tag {} now led by announcement {}", tag, replacement.id);
                recomputed.by_tag.insert(*tag, replacement);
            }
        }

        Ok(recomputed)
    }
}
