use axum::{
    Extension, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, post},
};
use slambook_types::api::{CollegeScopeQuery, DeleteFileQuery, FileUploadResponse};
use tracing::info;

use crate::colleges;
use crate::entries;
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiQuery, FileUpload, created, done};
use crate::middleware::Principal;
use crate::state::{AppState, db_call};
use crate::storage::{UploadKind, owner_of, relative_path};
use crate::users;

fn upload_response(url: Option<String>, kind: &str) -> ApiResult<FileUploadResponse> {
    let url = url.ok_or_else(|| ApiError::Internal(anyhow::anyhow!("upload produced no url")))?;
    Ok(FileUploadResponse {
        url,
        kind: kind.to_string(),
    })
}

/// Whether the caller may remove the file at `url`. Files are named after
/// the user (or college, for logos) that uploaded them.
pub async fn may_delete(state: &AppState, principal: &Principal, url: &str) -> ApiResult<bool> {
    relative_path(url)?;
    if principal.is_super_admin() {
        return Ok(true);
    }
    let owner = owner_of(url)?.to_string();
    if owner == principal.user_id {
        return Ok(true);
    }
    if !principal.is_college_admin() {
        return Ok(false);
    }
    let Some(college_id) = principal.college_id.clone() else {
        return Ok(false);
    };
    if owner == college_id {
        return Ok(true);
    }
    let owner_user = db_call(state, move |db| db.get_user(&owner)).await?;
    Ok(owner_user.is_some_and(|u| u.college_id.as_deref() == Some(college_id.as_str())))
}

pub async fn delete_file(state: &AppState, principal: &Principal, url: &str) -> ApiResult<()> {
    if !may_delete(state, principal, url).await? {
        return Err(ApiError::Forbidden("You cannot delete this file".into()));
    }
    state.files.delete(url).await?;
    info!("File {} deleted by {}", url, principal.user_id);
    Ok(())
}

// -- Handlers --

async fn handle_profile_picture(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    FileUpload(upload): FileUpload,
) -> ApiResult<impl IntoResponse> {
    let view = users::set_profile_picture(&state, &principal, upload).await?;
    let body = upload_response(view.profile.profile_picture, "profile_picture")?;
    Ok(created("File uploaded successfully", body))
}

/// Stores media for use in an entry later on.
async fn handle_slambook_media(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(media): Path<String>,
    FileUpload(upload): FileUpload,
) -> ApiResult<impl IntoResponse> {
    let kind = UploadKind::for_attachment(entries::attachment_kind(&media)?);
    let stored = state.files.store(kind, &principal.user_id, upload).await?;
    let body = upload_response(Some(stored.url), kind.label())?;
    Ok(created("File uploaded successfully", body))
}

async fn handle_college_logo(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiQuery(scope): ApiQuery<CollegeScopeQuery>,
    FileUpload(upload): FileUpload,
) -> ApiResult<impl IntoResponse> {
    let college = colleges::set_logo(&state, &principal, scope, upload).await?;
    let body = upload_response(college.logo, UploadKind::CollegeLogo.label())?;
    Ok(created("File uploaded successfully", body))
}

async fn handle_delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiQuery(query): ApiQuery<DeleteFileQuery>,
) -> ApiResult<impl IntoResponse> {
    delete_file(&state, &principal, &query.file_url).await?;
    Ok(done("File deleted successfully"))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", delete(handle_delete))
        .route("/profile-picture", post(handle_profile_picture))
        .route("/slambook/{media}", post(handle_slambook_media))
        .route("/college/logo", post(handle_college_logo))
}
