use axum::{
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::{Announcement, AnnouncementId, AnnouncementRequest, Tag, TagId},
    error::{AppError, Result},
};

/// Upper bound on repeated `tag` parameters; each becomes a bound SQL parameter.
pub const MAX_TAG_FILTERS: usize = 64;

/// Listing parameters. `tag` may repeat, which `axum::extract::Query`
/// cannot express, so the raw query string is parsed here.
#[derive(Debug, Default, PartialEq)]
pub struct ListAnnouncementsQuery {
    pub offset: Option<i64>,
    pub count: Option<i64>,
    pub tags: Vec<TagId>,
}

impl ListAnnouncementsQuery {
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let mut query = Self::default();
        let Some(raw) = raw else {
            return Ok(query);
        };

        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw)
            .map_err(|e| AppError::BadRequest(format!("Invalid query string: {}", e)))?;

        for (key, value) in pairs {
            match key.as_str() {
                "offset" => query.offset = Some(parse_number(&key, &value)?),
                "count" => query.count = Some(parse_number(&key, &value)?),
                "tag" => {
                    if query.tags.len() == MAX_TAG_FILTERS {
                        return Err(AppError::BadRequest(format!(
                            "At most {} tag filters are allowed",
                            MAX_TAG_FILTERS
                        )));
                    }
                    query.tags.push(parse_number(&key, &value)?);
                }
                _ => {}
            }
        }

        Ok(query)
    }
}

fn parse_number(key: &str, value: &str) -> Result<i64> {
    value
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Query parameter '{}' must be an integer", key)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ArchiveRequest {
    pub archived_at: Option<DateTime<Utc>>,
}

pub async fn list(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Json<Vec<Announcement>>> {
    let params = ListAnnouncementsQuery::parse(raw.as_deref())?;
    let count = params
        .count
        .unwrap_or(state.settings.announcements.default_page_size);
    let tags = (!params.tags.is_empty()).then_some(params.tags.as_slice());

    let announcements = state
        .service_context
        .announcement_service
        .paged(params.offset.unwrap_or(0), count, tags)
        .await?;

    Ok(Json(announcements))
}

pub async fn latest(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Response> {
    let params = ListAnnouncementsQuery::parse(raw.as_deref())?;
    let service = &state.service_context.announcement_service;

    if params.tags.is_empty() {
        let announcement = service
            .latest()
            .ok_or(AppError::NotFound("No announcement exists".to_string()))?;
        return Ok(Json(announcement).into_response());
    }

    let announcements = service.latest_for_tags(&params.tags);
    if announcements.is_empty() {
        return Err(AppError::NotFound("No announcement exists".to_string()));
    }
    Ok(Json(announcements).into_response())
}

pub async fn latest_id(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Response> {
    let params = ListAnnouncementsQuery::parse(raw.as_deref())?;
    let service = &state.service_context.announcement_service;

    if params.tags.is_empty() {
        let id = service
            .latest_id()
            .ok_or(AppError::NotFound("No announcement exists".to_string()))?;
        return Ok(Json(id).into_response());
    }

    let ids = service.latest_ids_for_tags(&params.tags);
    if ids.is_empty() {
        return Err(AppError::NotFound("No announcement exists".to_string()));
    }
    Ok(Json(ids).into_response())
}

pub async fn tags(State(state): State<AppState>) -> Result<Json<Vec<Tag>>> {
    let tags = state.service_context.announcement_service.tags().await?;

    Ok(Json(tags))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<AnnouncementId>,
) -> Result<Json<Announcement>> {
    let announcement = state
        .service_context
        .announcement_service
        .get(id)
        .await?
        .ok_or(AppError::NotFound("Announcement not found".to_string()))?;

    Ok(Json(announcement))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<AnnouncementRequest>,
) -> Result<(StatusCode, Json<Announcement>)> {
    let announcement = state
        .service_context
        .announcement_service
        .create(request)
        .await?;

    tracing::debug!(
        "Announcement {} created with token issued at {}",
        announcement.id,
        user.claims.iat
    );

    Ok((StatusCode::CREATED, Json(announcement)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<AnnouncementId>,
    Json(request): Json<AnnouncementRequest>,
) -> Result<StatusCode> {
    state
        .service_context
        .announcement_service
        .update(id, request)
        .await?;

    Ok(StatusCode::OK)
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<AnnouncementId>,
    Extension(user): Extension<CurrentUser>,
) -> Result<StatusCode> {
    let existed = state.service_context.announcement_service.delete(id).await?;

    if existed {
        tracing::debug!(
            "Announcement {} deleted with token issued at {}",
            id,
            user.claims.iat
        );
    }

    Ok(StatusCode::OK)
}

pub async fn archive(
    State(state): State<AppState>,
    Path(id): Path<AnnouncementId>,
    request: Option<Json<ArchiveRequest>>,
) -> Result<StatusCode> {
    let archived_at = request.and_then(|Json(request)| request.archived_at);

    state
        .service_context
        .announcement_service
        .archive(id, archived_at)
        .await?;

    Ok(StatusCode::OK)
}

pub async fn unarchive(
    State(state): State<AppState>,
    Path(id): Path<AnnouncementId>,
) -> Result<StatusCode> {
    state
        .service_context
        .announcement_service
        .unarchive(id)
        .await?;

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parsing_collects_repeated_tags() {
        let query = ListAnnouncementsQuery::parse(Some("offset=5&tag=1&count=10&tag=3")).unwrap();
        assert_eq!(
            query,
            ListAnnouncementsQuery {
                offset: Some(5),
                count: Some(10),
                tags: vec![1, 3],
            }
        );
    }

    #[test]
    fn test_query_parsing_defaults_and_errors() {
        assert_eq!(
            ListAnnouncementsQuery::parse(None).unwrap(),
            ListAnnouncementsQuery::default()
        );
        assert_eq!(
            ListAnnouncementsQuery::parse(Some("unknown=x")).unwrap(),
            ListAnnouncementsQuery::default()
        );
        assert!(matches!(
            ListAnnouncementsQuery::parse(Some("tag=abc")),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_query_parsing_caps_tag_filters() {
        let tags = |n: usize| {
            (0..n)
                .map(|i| format!("tag={}", i))
                .collect::<Vec<_>>()
                .join("&")
        };

        let query = ListAnnouncementsQuery::parse(Some(&tags(MAX_TAG_FILTERS))).unwrap();
        assert_eq!(query.tags.len(), MAX_TAG_FILTERS);

        assert!(matches!(
            ListAnnouncementsQuery::parse(Some(&tags(MAX_TAG_FILTERS + 1))),
            Err(AppError::BadRequest(_))
        ));
    }
}
