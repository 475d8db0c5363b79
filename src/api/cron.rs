use actix_web::{http::header, web, HttpRequest, HttpResponse};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::AppError;
use crate::notifications::maintenance;
use crate::AppState;

/// Checks `Authorization: Bearer <cron.secret>`. Both sides are hashed
/// before comparing so the comparison length never depends on the input.
fn authorize(req: &HttpRequest, state: &AppState) -> Result<(), AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("No authorization token provided".into()))?;

    let expected = Sha256::digest(state.config.cron.secret.as_bytes());
    let provided = Sha256::digest(token.as_bytes());
    if state.config.cron.secret.is_empty() || expected != provided {
        warn!("Rejected cron request with invalid token");
        return Err(AppError::Unauthorized("Invalid cron token".into()));
    }
    Ok(())
}

pub async fn process_queue(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    authorize(&req, &state)?;
    let summary = state.queue.process_queue(Utc::now()).await?;
    Ok(HttpResponse::Ok().json(summary))
}

pub async fn process_groups(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    authorize(&req, &state)?;
    let summary = state.groups.process_due_groups(Utc::now()).await?;
    Ok(HttpResponse::Ok().json(summary))
}

pub async fn purge(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    authorize(&req, &state)?;
    let summary =
        maintenance::purge(state.store.as_ref(), &state.config.retention, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(summary))
}

pub async fn stats(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    authorize(&req, &state)?;
    let stats = state.queue.stats().await?;
    Ok(HttpResponse::Ok().json(stats))
}
