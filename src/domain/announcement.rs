use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::TagId;

pub type AnnouncementId = i64;

/// An announcement as stored, with its attachments and tag ids resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: AnnouncementId,
    pub author: Option<String>,
    pub title: String,
    pub content: Option<String>,
    pub attachments: Vec<String>,
    pub tags: Vec<TagId>,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub level: i32,
}

/// Payload for creating or replacing an announcement. Tags are given by name
/// and resolved against the registry.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct AnnouncementRequest {
    #[validate(length(max = 32))]
    pub author: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub title: String,
    pub content: Option<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_attachments"))]
    pub attachments: Vec<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_tag_names"))]
    pub tags: Vec<String>,
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub level: i32,
}

impl AnnouncementRequest {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attachments<I, S>(mut self, attachments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attachments = attachments.into_iter().map(Into::into).collect();
        self
    }

    /// Tag names with duplicates collapsed, in a stable order.
    pub fn tag_names(&self) -> Vec<&str> {
        let names: BTreeSet<&str> = self.tags.iter().map(String::as_str).collect();
        names.into_iter().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestAnnouncementId {
    pub id: AnnouncementId,
}

fn validate_attachments(urls: &[String]) -> Result<(), ValidationError> {
    if urls.iter().any(|url| url.is_empty() || url.chars().count() > 256) {
        return Err(ValidationError::new("attachment_url_length"));
    }
    Ok(())
}

fn validate_tag_names(names: &[String]) -> Result<(), ValidationError> {
    if names
        .iter()
        .any(|name| name.trim().is_empty() || name.chars().count() > 32)
    {
        return Err(ValidationError::new("tag_name_length"));
    }
    Ok(())
}
