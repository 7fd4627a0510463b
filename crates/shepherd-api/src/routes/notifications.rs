//! `GET /api/v1/notifications`, `/api/v1/notifications/unread-count`,
//! `PATCH /api/v1/notifications/{id}/read`,
//! `POST /api/v1/notifications/mark-all-read` (spec §4.9, §6). Every handler
//! scopes to the caller's own inbox — a notification's `recipient_id` is
//! never taken from the request body.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use shepherd_core::domain::Notification;
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::pagination::PageParams;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    id: Uuid,
    notification_type: String,
    title: String,
    body: String,
    metadata: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
    read: bool,
}

impl From<Notification> for NotificationResponse {
    fn from(notification: Notification) -> Self {
        Self {
            id: notification.id,
            notification_type: notification.notification_type,
            title: notification.title,
            body: notification.body,
            metadata: notification.metadata,
            created_at: notification.created_at,
            read: notification.is_read(),
        }
    }
}

pub async fn list(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Query(page): Query<PageParams>,
) -> Result<Json<Vec<NotificationResponse>>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(shepherd_store::error::Error::from)?;
    let notifications =
        shepherd_store::notifications::list_for_recipient(&mut conn, &caller.subject, page.page(), page.per_page())
            .await?;
    Ok(Json(notifications.into_iter().map(NotificationResponse::from).collect()))
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    unread_count: i64,
}

pub async fn unread_count(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(shepherd_store::error::Error::from)?;
    let unread_count = shepherd_store::notifications::unread_count(&mut conn, &caller.subject).await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(shepherd_store::error::Error::from)?;
    shepherd_store::notifications::mark_read(&mut conn, &caller.subject, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct MarkAllReadResponse {
    marked: u64,
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> Result<Json<MarkAllReadResponse>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(shepherd_store::error::Error::from)?;
    let marked = shepherd_store::notifications::mark_all_read(&mut conn, &caller.subject).await?;
    Ok(Json(MarkAllReadResponse { marked }))
}
