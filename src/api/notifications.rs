use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::db::models::Notification;
use crate::error::AppError;
use crate::notifications::NotificationEvent;
use crate::validation::validate_pagination;
use crate::AppState;

pub async fn trigger(
    event: web::Json<NotificationEvent>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let event = event.into_inner();
    info!("Received {} event for user {}", event.event_type, event.recipient_id);

    let outcome = state.orchestrator.trigger(event).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize)]
pub struct InboxPage {
    pub items: Vec<Notification>,
    pub page: u32,
    pub limit: u32,
    pub unread_count: i64,
}

pub async fn list(
    path: web::Path<Uuid>,
    query: web::Query<ListQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let pagination = validate_pagination(query.page, query.limit)?;

    let items = state
        .store
        .list_notifications(
            user_id,
            pagination.limit as i64,
            pagination.offset as i64,
            query.unread_only,
        )
        .await?;
    let unread_count = state.store.count_unread(user_id).await?;

    Ok(HttpResponse::Ok().json(InboxPage {
        items,
        page: pagination.page,
        limit: pagination.limit,
        unread_count,
    }))
}

pub async fn mark_read(
    path: web::Path<(Uuid, Uuid)>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let (user_id, notification_id) = path.into_inner();

    if !state.store.mark_read(user_id, notification_id, Utc::now()).await? {
        return Err(AppError::NotFound(format!("notification {}", notification_id)));
    }
    Ok(HttpResponse::NoContent().finish())
}

pub async fn mark_all_read(
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let updated = state.store.mark_all_read(user_id, Utc::now()).await?;
    info!("Marked {} notifications read for user {}", updated, user_id);

    Ok(HttpResponse::Ok().json(serde_json::json!({ "updated": updated })))
}
