use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::db::models::NotificationPreferences;
use crate::error::AppError;
use crate::notifications::{NotificationCategory, QuietHours};
use crate::AppState;

/// Full replacement of a user's preferences.
#[derive(Debug, Deserialize)]
pub struct PreferencesRequest {
    pub push_enabled: bool,
    #[serde(default)]
    pub disabled_categories: Vec<NotificationCategory>,
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
}

pub async fn get(
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let prefs = state.orchestrator.preferences(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(prefs))
}

pub async fn update(
    path: web::Path<Uuid>,
    req: web::Json<PreferencesRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let req = req.into_inner();

    if let Some(quiet) = &req.quiet_hours {
        quiet.validate()?;
    }

    let mut disabled_categories = Vec::with_capacity(req.disabled_categories.len());
    for category in req.disabled_categories {
        if !disabled_categories.contains(&category) {
            disabled_categories.push(category);
        }
    }

    let prefs = state
        .store
        .upsert_preferences(&NotificationPreferences {
            user_id,
            push_enabled: req.push_enabled,
            disabled_categories,
            quiet_hours: req.quiet_hours,
            updated_at: Utc::now(),
        })
        .await?;
    info!("Updated notification preferences for user {}", user_id);

    Ok(HttpResponse::Ok().json(prefs))
}
