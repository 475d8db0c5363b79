use actix_web::{http::header, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::db::models::PushSubscription;
use crate::error::AppError;
use crate::notifications::push::validate_endpoint;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Shape of the browser's `PushSubscription.toJSON()`.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

pub async fn subscribe(
    http: HttpRequest,
    path: web::Path<Uuid>,
    req: web::Json<SubscribeRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let req = req.into_inner();

    validate_endpoint(&req.endpoint)?;
    if req.keys.p256dh.is_empty() || req.keys.auth.is_empty() {
        return Err(AppError::ValidationError("subscription keys are required".to_string()));
    }

    let user_agent = http
        .headers()
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.chars().take(255).collect::<String>());

    let subscription = state
        .store
        .upsert_subscription(&PushSubscription::new(
            user_id,
            req.endpoint,
            req.keys.p256dh,
            req.keys.auth,
            user_agent,
        ))
        .await?;
    info!("Registered push subscription {} for user {}", subscription.id, user_id);

    Ok(HttpResponse::Created().json(subscription))
}

pub async fn unsubscribe(
    path: web::Path<Uuid>,
    req: web::Json<UnsubscribeRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();

    if !state.store.delete_subscription(user_id, &req.endpoint).await? {
        return Err(AppError::NotFound("push subscription".to_string()));
    }
    info!("Removed push subscription for user {}", user_id);

    Ok(HttpResponse::NoContent().finish())
}
