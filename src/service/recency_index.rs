//! In-memory index of the newest announcement overall and per tag.
//!
//! Ids come from a counter that never goes backwards, so the newest row is
//! always the one with the largest id. The index is built once from the
//! store and then patched by every committed mutation; it is never rebuilt
//! wholesale. Slots a mutation invalidates are refilled from replacements the
//! caller queried inside the same transaction (see [`Recomputed`]).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::domain::{Announcement, AnnouncementId, TagId};

/// Replacement rows for the slots a delete or update invalidated.
///
/// A stale tag slot with no entry in `by_tag` has no remaining
/// announcement and is dropped from the index.
#[derive(Debug, Default)]
pub struct Recomputed {
    pub latest: Option<Arc<Announcement>>,
    pub by_tag: HashMap<TagId, Arc<Announcement>>,
}

#[derive(Debug, Default)]
pub struct RecencyIndex {
    latest: Option<Arc<Announcement>>,
    by_tag: HashMap<TagId, Arc<Announcement>>,
}

impl RecencyIndex {
    pub fn new(
        latest: Option<Arc<Announcement>>,
        by_tag: HashMap<TagId, Arc<Announcement>>,
    ) -> Self {
        Self { latest, by_tag }
    }

    pub fn latest(&self) -> Option<&Arc<Announcement>> {
        self.latest.as_ref()
    }

    pub fn latest_for_tag(&self, tag: TagId) -> Option<&Arc<Announcement>> {
        self.by_tag.get(&tag)
    }

    /// Newest announcement of each requested tag, deduplicated by id and
    /// ordered newest first.
    pub fn latest_for_tags(&self, tags: &[TagId]) -> Vec<&Arc<Announcement>> {
        let mut seen = HashSet::new();
        let mut found: Vec<_> = tags
            .iter()
            .filter_map(|tag| self.by_tag.get(tag))
            .filter(|announcement| seen.insert(announcement.id))
            .collect();

        found.sort_by(|a, b| b.id.cmp(&a.id));
        found
    }

    pub fn tracked_tags(&self) -> usize {
        self.by_tag.len()
    }

    /// Whether `id` is the cached newest announcement overall.
    pub fn holds_latest(&self, id: AnnouncementId) -> bool {
        self.latest.as_ref().is_some_and(|latest| latest.id == id)
    }

    /// The subset of `tags` whose cached entry is announcement `id`.
    pub fn stale_tags(&self, id: AnnouncementId, tags: &[TagId]) -> Vec<TagId> {
        tags.iter()
            .copied()
            .filter(|tag| self.by_tag.get(tag).is_some_and(|cached| cached.id == id))
            .collect()
    }

    /// A freshly inserted announcement outranks everything already indexed.
    pub fn on_create(&mut self, announcement: Arc<Announcement>) {
        for tag in &announcement.tags {
            self.by_tag.insert(*tag, Arc::clone(&announcement));
        }
        self.latest = Some(announcement);
    }

    /// Applies an in-place update. `removed` are the tags the announcement
    /// lost, `collected` those of them that no longer exist at all.
    pub fn on_update(
        &mut self,
        announcement: Arc<Announcement>,
        removed: &[TagId],
        collected: &HashSet<TagId>,
        mut recomputed: Recomputed,
    ) {
        let id = announcement.id;

        if self.holds_latest(id) {
            self.latest = Some(Arc::clone(&announcement));
        }

        for tag in removed {
            if collected.contains(tag) {
                self.by_tag.remove(tag);
                continue;
            }
            if self.by_tag.get(tag).is_some_and(|cached| cached.id == id) {
                match recomputed.by_tag.remove(tag) {
                    Some(replacement) => self.by_tag.insert(*tag, replacement),
                    None => self.by_tag.remove(tag),
                };
            }
        }

        for tag in &announcement.tags {
            let replace = match self.by_tag.get(tag) {
                Some(cached) => cached.id <= id,
                None => true,
            };
            if replace {
                self.by_tag.insert(*tag, Arc::clone(&announcement));
            }
        }
    }

    /// Archive state does not affect ranking; only the cached copies change.
    pub fn on_archive_change(&mut self, announcement: Arc<Announcement>) {
        let id = announcement.id;

        for cached in self.by_tag.values_mut() {
            if cached.id == id {
                *cached = Arc::clone(&announcement);
            }
        }

        if self.holds_latest(id) {
            self.latest = Some(announcement);
        }
    }

    /// Removes a deleted announcement. `tags` are the tags it referenced.
    pub fn on_delete(
        &mut self,
        id: AnnouncementId,
        tags: &[TagId],
        collected: &HashSet<TagId>,
        mut recomputed: Recomputed,
    ) {
        if self.holds_latest(id) {
            self.latest = recomputed.latest.take();
        }

        for tag in tags {
            if collected.contains(tag) {
                self.by_tag.remove(tag);
                continue;
            }
            if self.by_tag.get(tag).is_some_and(|cached| cached.id == id) {
                match recomputed.by_tag.remove(tag) {
                    Some(replacement) => self.by_tag.insert(*tag, replacement),
                    None => self.by_tag.remove(tag),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn announcement(id: AnnouncementId, tags: &[TagId]) -> Arc<Announcement> {
        Arc::new(Announcement {
            id,
            author: None,
            title: format!("title{id}"),
            content: None,
            attachments: Vec::new(),
            tags: tags.to_vec(),
            created_at: Utc::now(),
            archived_at: None,
            level: 0,
        })
    }

    fn ids(found: Vec<&Arc<Announcement>>) -> Vec<AnnouncementId> {
        found.into_iter().map(|a| a.id).collect()
    }

    /// ids 1 {a,b}, 2 {a,c}, 3 {a,d} with a=10, b=11, c=12, d=13.
    fn populated() -> RecencyIndex {
        let mut index = RecencyIndex::default();
        index.on_create(announcement(1, &[10, 11]));
        index.on_create(announcement(2, &[10, 12]));
        index.on_create(announcement(3, &[10, 13]));
        index
    }

    #[test]
    fn test_create_takes_every_slot() {
        let index = populated();

        assert_eq!(index.latest().map(|a| a.id), Some(3));
        assert_eq!(index.latest_for_tag(10).map(|a| a.id), Some(3));
        assert_eq!(index.latest_for_tag(11).map(|a| a.id), Some(1));
        assert_eq!(index.latest_for_tag(12).map(|a| a.id), Some(2));
        assert_eq!(index.tracked_tags(), 4);
    }

    #[test]
    fn test_multi_tag_lookup_is_a_union() {
        let index = populated();

        assert_eq!(ids(index.latest_for_tags(&[11, 12])), vec![2, 1]);
        assert_eq!(ids(index.latest_for_tags(&[10, 13])), vec![3]);
        assert_eq!(ids(index.latest_for_tags(&[99])), Vec::<AnnouncementId>::new());
        assert!(index.latest_for_tags(&[]).is_empty());
    }

    #[test]
    fn test_stale_tags_only_reports_slots_held_by_id() {
        let index = populated();

        assert_eq!(index.stale_tags(3, &[10, 13]), vec![10, 13]);
        assert_eq!(index.stale_tags(2, &[10, 12]), vec![12]);
        assert!(index.holds_latest(3));
        assert!(!index.holds_latest(2));
    }

    #[test]
    fn test_delete_applies_recomputed_slots() {
        let mut index = populated();
        let collected = HashSet::from([13]);
        let recomputed = Recomputed {
            latest: Some(announcement(2, &[10, 12])),
            by_tag: HashMap::from([(10, announcement(2, &[10, 12]))]),
        };

        index.on_delete(3, &[10, 13], &collected, recomputed);

        assert_eq!(index.latest().map(|a| a.id), Some(2));
        assert_eq!(index.latest_for_tag(10).map(|a| a.id), Some(2));
        assert!(index.latest_for_tag(13).is_none());
        assert_eq!(index.latest_for_tag(11).map(|a| a.id), Some(1));
    }

    #[test]
    fn test_delete_of_unindexed_row_keeps_entries() {
        let mut index = populated();

        index.on_delete(1, &[10, 11], &HashSet::from([11]), Recomputed::default());

        assert_eq!(index.latest().map(|a| a.id), Some(3));
        assert_eq!(index.latest_for_tag(10).map(|a| a.id), Some(3));
        assert!(index.latest_for_tag(11).is_none());
    }

    #[test]
    fn test_delete_last_row_empties_latest() {
        let mut index = RecencyIndex::default();
        index.on_create(announcement(1, &[]));

        index.on_delete(1, &[], &HashSet::new(), Recomputed::default());

        assert!(index.latest().is_none());
    }

    #[test]
    fn test_update_removing_tag_falls_back_to_next_newest() {
        let mut index = populated();
        let refreshed = announcement(3, &[13]);
        let recomputed = Recomputed {
            latest: None,
            by_tag: HashMap::from([(10, announcement(2, &[10, 12]))]),
        };

        index.on_update(refreshed, &[10], &HashSet::new(), recomputed);

        assert_eq!(index.latest_for_tag(10).map(|a| a.id), Some(2));
        assert_eq!(index.latest_for_tag(13).map(|a| a.id), Some(3));
        assert_eq!(index.latest().map(|a| a.tags.clone()), Some(vec![13]));
    }

    #[test]
    fn test_update_adding_tag_respects_newer_entry() {
        let mut index = populated();

        // id 1 joins tag d (held by id 3) and a new tag e.
        index.on_update(
            announcement(1, &[10, 11, 13, 14]),
            &[],
            &HashSet::new(),
            Recomputed::default(),
        );

        assert_eq!(index.latest_for_tag(13).map(|a| a.id), Some(3));
        assert_eq!(index.latest_for_tag(14).map(|a| a.id), Some(1));
        assert_eq!(index.latest_for_tag(11).map(|a| a.tags.len()), Some(4));
    }

    #[test]
    fn test_update_drops_collected_tags() {
        let mut index = populated();

        index.on_update(
            announcement(1, &[10]),
            &[11],
            &HashSet::from([11]),
            Recomputed::default(),
        );

        assert!(index.latest_for_tag(11).is_none());
        assert_eq!(index.latest_for_tag(10).map(|a| a.id), Some(3));
    }

    #[test]
    fn test_archive_refreshes_cached_copies() {
        let mut index = populated();
        let mut archived = (*announcement(3, &[10, 13])).clone();
        archived.archived_at = Some(Utc::now());

        index.on_archive_change(Arc::new(archived));

        assert!(index.latest().and_then(|a| a.archived_at).is_some());
        assert!(index.latest_for_tag(10).and_then(|a| a.archived_at).is_some());
        assert!(index.latest_for_tag(13).and_then(|a| a.archived_at).is_some());
        assert!(index.latest_for_tag(11).and_then(|a| a.archived_at).is_none());
    }
}
