use axum::{
    Extension, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, put},
};
use chrono::Utc;
use slambook_types::api::UnreadCount;
use slambook_types::models::Notification;

use crate::error::{ApiError, ApiResult};
use crate::extract::{done, ok};
use crate::middleware::Principal;
use crate::policy::{Action, Resource, authorize};
use crate::state::{AppState, db_call};

pub async fn list(state: &AppState, principal: &Principal, unread_only: bool) -> ApiResult<Vec<Notification>> {
    let user_id = principal.user_id.clone();
    db_call(state, move |db| db.notifications_for(&user_id, unread_only)).await
}

pub async fn unread_count(state: &AppState, principal: &Principal) -> ApiResult<UnreadCount> {
    let user_id = principal.user_id.clone();
    let count = db_call(state, move |db| db.unread_count(&user_id)).await?;
    Ok(UnreadCount { count })
}

async fn load_own(state: &AppState, principal: &Principal, id: String, action: Action) -> ApiResult<Notification> {
    let notification = db_call(state, move |db| db.get_notification(&id))
        .await?
        .ok_or_else(|| ApiError::not_found("Notification"))?;
    authorize(principal, action, Resource::Notification(&notification))?;
    Ok(notification)
}

pub async fn mark_read(state: &AppState, principal: &Principal, id: String) -> ApiResult<()> {
    let notification = load_own(state, principal, id, Action::Update).await?;
    db_call(state, move |db| db.mark_notification_read(&notification.id, Utc::now())).await?;
    Ok(())
}

/// Returns how many notifications changed.
pub async fn mark_all_read(state: &AppState, principal: &Principal) -> ApiResult<u64> {
    let user_id = principal.user_id.clone();
    db_call(state, move |db| db.mark_all_notifications_read(&user_id, Utc::now())).await
}

pub async fn delete_notification(state: &AppState, principal: &Principal, id: String) -> ApiResult<()> {
    let notification = load_own(state, principal, id, Action::Delete).await?;
    db_call(state, move |db| db.delete_notification(&notification.id)).await?;
    Ok(())
}

// -- Handlers --

async fn handle_list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Notifications retrieved", list(&state, &principal, false).await?))
}

async fn handle_unread(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Unread notifications retrieved", list(&state, &principal, true).await?))
}

async fn handle_unread_count(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Unread count retrieved", unread_count(&state, &principal).await?))
}

async fn handle_mark_read(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    mark_read(&state, &principal, id).await?;
    Ok(done("Notification marked as read"))
}

async fn handle_mark_all_read(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    mark_all_read(&state, &principal).await?;
    Ok(done("All notifications marked as read"))
}

async fn handle_delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    delete_notification(&state, &principal, id).await?;
    Ok(done("Notification deleted"))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handle_list))
        .route("/unread", get(handle_unread))
        .route("/unread-count", get(handle_unread_count))
        .route("/read-all", put(handle_mark_all_read))
        .route("/{id}/read", put(handle_mark_read))
        .route("/{id}", delete(handle_delete))
}
