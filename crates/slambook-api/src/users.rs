use axum::{
    Extension, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
};
use chrono::Utc;
use slambook_db::{Database, MemberSearch};
use slambook_types::api::{
    CollegeScopeQuery, SearchQuery, SlamBookSettingsRequest, UpdateProfileRequest, UserResponse,
};
use slambook_types::models::{College, User};
use tracing::{info, warn};

use crate::colleges::resolve_college;
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiQuery, FileUpload, ValidJson, ok};
use crate::middleware::Principal;
use crate::policy::{Action, Resource, authorize};
use crate::state::{AppState, db_call};
use crate::storage::{Upload, UploadKind};

/// Public view of a user, with their college's code and name filled in.
pub fn user_view(db: &Database, user: &User) -> anyhow::Result<UserResponse> {
    let mut view = UserResponse::from(user);
    let college = match &user.college_id {
        Some(college_id) => db.get_college(college_id)?,
        None => None,
    };
    if let Some(college) = college {
        view.college_code = Some(college.college_code);
        view.college_name = Some(college.name);
    }
    Ok(view)
}

pub fn member_view(college: &College, user: &User) -> UserResponse {
    let mut view = UserResponse::from(user);
    view.college_code = Some(college.college_code.clone());
    view.college_name = Some(college.name.clone());
    view
}

pub fn member_views(college: &College, users: &[User]) -> Vec<UserResponse> {
    users.iter().map(|user| member_view(college, user)).collect()
}

pub async fn load_self(state: &AppState, principal: &Principal) -> ApiResult<User> {
    let id = principal.user_id.clone();
    db_call(state, move |db| db.get_user(&id))
        .await?
        .ok_or_else(|| ApiError::not_found("User"))
}

/// Write the user back and return the refreshed view.
async fn save(state: &AppState, mut user: User) -> ApiResult<UserResponse> {
    user.updated_at = Utc::now();
    db_call(state, move |db| {
        if !db.update_user(&user)? {
            anyhow::bail!("user {} vanished during update", user.id);
        }
        user_view(db, &user)
    })
    .await
}

pub async fn get_me(state: &AppState, principal: &Principal) -> ApiResult<UserResponse> {
    let user = load_self(state, principal).await?;
    db_call(state, move |db| user_view(db, &user)).await
}

pub async fn update_profile(
    state: &AppState,
    principal: &Principal,
    req: UpdateProfileRequest,
) -> ApiResult<UserResponse> {
    let mut user = load_self(state, principal).await?;
    let profile = &mut user.profile;
    if let Some(first) = req.first_name {
        profile.first_name = first.trim().to_string();
    }
    if let Some(last) = req.last_name {
        profile.last_name = last.trim().to_string();
    }
    if req.nickname.is_some() {
        profile.nickname = req.nickname;
    }
    if req.course.is_some() {
        profile.course = req.course;
    }
    if req.batch.is_some() {
        profile.batch = req.batch;
    }
    if req.roll_number.is_some() {
        profile.roll_number = req.roll_number;
    }
    if req.bio.is_some() {
        profile.bio = req.bio;
    }
    if let Some(interests) = req.interests {
        profile.interests = interests;
    }
    if let Some(links) = req.social_links {
        profile.social_links = links;
    }
    save(state, user).await
}

pub async fn update_slambook_settings(
    state: &AppState,
    principal: &Principal,
    req: SlamBookSettingsRequest,
) -> ApiResult<UserResponse> {
    let mut user = load_self(state, principal).await?;
    let settings = &mut user.slambook_settings;
    if let Some(is_public) = req.is_public {
        settings.is_public = is_public;
    }
    if let Some(allow) = req.allow_anonymous {
        settings.allow_anonymous = allow;
    }
    if let Some(ids) = req.custom_question_ids {
        settings.custom_question_ids = ids;
    }
    if req.theme.is_some() {
        settings.theme = req.theme;
    }
    save(state, user).await
}

/// Stores the new picture, then drops the previous file best-effort.
pub async fn set_profile_picture(
    state: &AppState,
    principal: &Principal,
    upload: Upload,
) -> ApiResult<UserResponse> {
    let mut user = load_self(state, principal).await?;
    let stored = state
        .files
        .store(UploadKind::ProfilePicture, &user.id, upload)
        .await?;

    let previous = user.profile.profile_picture.replace(stored.url.clone());
    let view = match save(state, user).await {
        Ok(view) => view,
        Err(e) => {
            if let Err(cleanup) = state.files.delete(&stored.url).await {
                warn!("Failed to remove orphaned upload {}: {}", stored.url, cleanup);
            }
            return Err(e);
        }
    };

    if let Some(old) = previous {
        if let Err(e) = state.files.delete(&old).await {
            warn!("Failed to delete old profile picture {}: {}", old, e);
        }
    }
    Ok(view)
}

pub async fn remove_profile_picture(state: &AppState, principal: &Principal) -> ApiResult<UserResponse> {
    let mut user = load_self(state, principal).await?;
    if let Some(old) = user.profile.profile_picture.take() {
        if let Err(e) = state.files.delete(&old).await {
            warn!("Failed to delete profile picture {}: {}", old, e);
        }
    }
    save(state, user).await
}

pub async fn get_user(state: &AppState, principal: &Principal, id: String) -> ApiResult<UserResponse> {
    let user = db_call(state, move |db| db.get_user(&id))
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;
    authorize(principal, Action::Read, Resource::Member(&user))?;
    db_call(state, move |db| user_view(db, &user)).await
}

/// Active, approved members of the caller's college.
pub async fn search(
    state: &AppState,
    principal: &Principal,
    query: SearchQuery,
    scope: CollegeScopeQuery,
) -> ApiResult<Vec<UserResponse>> {
    let college_id = resolve_college(principal, scope.college_id)?;
    authorize(principal, Action::Read, Resource::College(&college_id))?;

    let search = MemberSearch {
        text: query.query,
        batch: query.batch.filter(|b| !b.trim().is_empty()),
        course: query.course.filter(|c| !c.trim().is_empty()),
    };
    db_call(state, move |db| {
        let college = db
            .get_college(&college_id)?
            .ok_or_else(|| anyhow::anyhow!("college {} missing", college_id))?;
        let users = db.search_members(&college_id, &search)?;
        Ok(member_views(&college, &users))
    })
    .await
}

// -- Handlers --

async fn handle_get_me(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Profile retrieved", get_me(&state, &principal).await?))
}

async fn handle_update_me(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ValidJson(req): ValidJson<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    let view = update_profile(&state, &principal, req).await?;
    info!("User {} updated their profile", principal.user_id);
    Ok(ok("Profile updated successfully", view))
}

async fn handle_upload_picture(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    FileUpload(upload): FileUpload,
) -> ApiResult<impl IntoResponse> {
    let view = set_profile_picture(&state, &principal, upload).await?;
    Ok(ok("Profile picture uploaded successfully", view))
}

async fn handle_delete_picture(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    let view = remove_profile_picture(&state, &principal).await?;
    Ok(ok("Profile picture deleted successfully", view))
}

async fn handle_settings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ValidJson(req): ValidJson<SlamBookSettingsRequest>,
) -> ApiResult<impl IntoResponse> {
    let view = update_slambook_settings(&state, &principal, req).await?;
    Ok(ok("Slam book settings updated successfully", view))
}

async fn handle_search(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiQuery(query): ApiQuery<SearchQuery>,
    ApiQuery(scope): ApiQuery<CollegeScopeQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Users retrieved", search(&state, &principal, query, scope).await?))
}

async fn handle_get_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("User retrieved", get_user(&state, &principal, id).await?))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(handle_get_me).put(handle_update_me))
        .route(
            "/me/profile-picture",
            post(handle_upload_picture).delete(handle_delete_picture),
        )
        .route("/me/slambook-settings", put(handle_settings))
        .route("/search", get(handle_search))
        .route("/{id}", get(handle_get_user))
}
