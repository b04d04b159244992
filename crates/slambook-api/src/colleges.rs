use axum::{
    Extension, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, put},
};
use chrono::Utc;
use slambook_db::is_unique_violation;
use slambook_types::api::{
    CollegeResponse, CollegeScopeQuery, CollegeSettingsRequest, CreateCollegeRequest,
    RejectJoinRequest, SystemAnalytics, UpdateCollegeRequest, UserResponse,
};
use slambook_types::models::{
    College, JoinRequest, JoinStatus, Profile, Role, SlamBookSettings, Subscription,
    SubscriptionStatus, User,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{hash_password, normalize_code, normalize_email};
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiQuery, ValidJson, created, done, ok};
use crate::middleware::Principal;
use crate::notify;
use crate::policy::{Action, Resource, authorize};
use crate::state::{AppState, db_call};
use crate::storage::{Upload, UploadKind};
use crate::users::{member_view, member_views};

const CODE_ATTEMPTS: usize = 8;

pub fn require_super_admin(principal: &Principal) -> ApiResult<()> {
    if principal.is_super_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Super admin access required".into()))
    }
}

/// The college a college-scoped call works on. Super admins have no college
/// of their own and must name one.
pub fn resolve_college(principal: &Principal, requested: Option<String>) -> ApiResult<String> {
    let requested = requested.filter(|id| !id.trim().is_empty());
    if principal.is_super_admin() {
        return requested.ok_or_else(|| {
            ApiError::BadRequest("collegeId query parameter is required for super admin".into())
        });
    }
    requested
        .or_else(|| principal.college_id.clone())
        .ok_or_else(|| ApiError::Forbidden("You are not a member of any college".into()))
}

/// Up to four letters or digits of the name followed by four random hex digits.
pub fn generate_college_code(name: &str) -> String {
    let prefix: String = name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(4)
        .collect::<String>()
        .to_ascii_uppercase();
    format!("{}{:04X}", prefix, rand::random::<u16>())
}

async fn load_college(state: &AppState, id: String) -> ApiResult<College> {
    db_call(state, move |db| db.get_college(&id))
        .await?
        .ok_or_else(|| ApiError::not_found("College"))
}

async fn describe(state: &AppState, college: College) -> ApiResult<CollegeResponse> {
    db_call(state, move |db| {
        let stats = db.college_stats(&college.id)?;
        Ok(CollegeResponse::new(&college, Some(stats)))
    })
    .await
}

// -- Tenant directory (super admin) --

/// Creates the college together with an approved COLLEGE_ADMIN that signs in
/// with the college email and the configured default password.
pub async fn create_college(
    state: &AppState,
    principal: &Principal,
    req: CreateCollegeRequest,
) -> ApiResult<CollegeResponse> {
    require_super_admin(principal)?;

    let now = Utc::now();
    let email = normalize_email(&req.email);
    let mut college = College {
        id: Uuid::new_v4().to_string(),
        college_code: String::new(),
        name: req.name.trim().to_string(),
        email: email.clone(),
        phone: req.phone.trim().to_string(),
        address: req.address,
        logo: None,
        subscription: Subscription {
            plan: req.subscription_plan,
            status: SubscriptionStatus::Active,
            expiry: req.subscription_expiry,
            max_users: req
                .max_users
                .or_else(|| req.subscription_plan.default_max_users()),
        },
        settings: Default::default(),
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    let admin = User {
        id: Uuid::new_v4().to_string(),
        college_id: Some(college.id.clone()),
        email,
        password_hash: hash_password(&state.config.default_admin_password)?,
        role: Role::CollegeAdmin,
        profile: Profile {
            first_name: "Admin".into(),
            last_name: college.name.clone(),
            ..Profile::default()
        },
        slambook_settings: SlamBookSettings::default(),
        join_request: JoinRequest::pre_approved(now),
        email_verified: true,
        is_active: true,
        created_at: now,
        updated_at: now,
        last_login_at: None,
    };

    // A random suffix can collide; retry with a fresh one.
    for _ in 0..CODE_ATTEMPTS {
        college.college_code = generate_college_code(&college.name);
        let (attempt, record) = (college.clone(), admin.clone());
        let inserted = db_call(state, move |db| {
            match db.create_college_with_admin(&attempt, &record) {
                Ok(()) => Ok(true),
                Err(e) if is_unique_violation(&e) => {
                    if db.college_code_exists(&attempt.college_code)? {
                        Ok(false)
                    } else {
                        Err(e)
                    }
                }
                Err(e) => Err(e),
            }
        })
        .await?;
        if inserted {
            info!("College created: {} with code {}", college.name, college.college_code);
            return describe(state, college).await;
        }
    }
    Err(ApiError::Conflict("Could not allocate a unique college code".into()))
}

pub async fn list_colleges(state: &AppState, principal: &Principal) -> ApiResult<Vec<CollegeResponse>> {
    require_super_admin(principal)?;
    db_call(state, |db| {
        let mut views = Vec::new();
        for college in db.list_colleges()? {
            let stats = db.college_stats(&college.id)?;
            views.push(CollegeResponse::new(&college, Some(stats)));
        }
        Ok(views)
    })
    .await
}

pub async fn get_college(state: &AppState, principal: &Principal, id: String) -> ApiResult<CollegeResponse> {
    require_super_admin(principal)?;
    let college = load_college(state, id).await?;
    describe(state, college).await
}

pub async fn get_college_by_code(
    state: &AppState,
    principal: &Principal,
    code: String,
) -> ApiResult<CollegeResponse> {
    require_super_admin(principal)?;
    let code = normalize_code(&code);
    let college = db_call(state, move |db| db.get_college_by_code(&code))
        .await?
        .ok_or_else(|| ApiError::not_found("College"))?;
    describe(state, college).await
}

pub async fn update_college(
    state: &AppState,
    principal: &Principal,
    id: String,
    req: UpdateCollegeRequest,
) -> ApiResult<CollegeResponse> {
    require_super_admin(principal)?;
    let mut college = load_college(state, id).await?;
    if let Some(name) = req.name {
        college.name = name.trim().to_string();
    }
    if let Some(email) = req.email {
        college.email = normalize_email(&email);
    }
    if let Some(phone) = req.phone {
        college.phone = phone.trim().to_string();
    }
    if let Some(address) = req.address {
        college.address = address;
    }
    if req.logo.is_some() {
        college.logo = req.logo;
    }
    college.updated_at = Utc::now();
    save(state, college).await
}

/// Soft delete: the college stays on record but stops accepting logins.
pub async fn deactivate_college(state: &AppState, principal: &Principal, id: String) -> ApiResult<()> {
    require_super_admin(principal)?;
    let mut college = load_college(state, id).await?;
    college.is_active = false;
    college.updated_at = Utc::now();
    let code = college.college_code.clone();
    save(state, college).await?;
    info!("College {} deactivated", code);
    Ok(())
}

pub async fn analytics(state: &AppState, principal: &Principal) -> ApiResult<SystemAnalytics> {
    require_super_admin(principal)?;
    let totals = db_call(state, |db| db.system_totals()).await?;
    Ok(SystemAnalytics {
        total_colleges: totals.colleges,
        active_colleges: totals.active_colleges,
        total_users: totals.users,
        total_entries: totals.entries,
        reported_entries: totals.reported_entries,
    })
}

async fn save(state: &AppState, college: College) -> ApiResult<CollegeResponse> {
    let stored = college.clone();
    let found = db_call(state, move |db| db.update_college(&stored)).await?;
    if !found {
        return Err(ApiError::not_found("College"));
    }
    describe(state, college).await
}

// -- College self-administration --

async fn admin_scope(
    state: &AppState,
    principal: &Principal,
    scope: CollegeScopeQuery,
) -> ApiResult<College> {
    let college_id = resolve_college(principal, scope.college_id)?;
    authorize(principal, Action::Administer, Resource::College(&college_id))?;
    load_college(state, college_id).await
}

pub async fn join_requests(
    state: &AppState,
    principal: &Principal,
    scope: CollegeScopeQuery,
) -> ApiResult<Vec<UserResponse>> {
    let college = admin_scope(state, principal, scope).await?;
    db_call(state, move |db| {
        let pending = db.users_by_join_status(&college.id, JoinStatus::Pending)?;
        Ok(member_views(&college, &pending))
    })
    .await
}

async fn load_applicant(
    state: &AppState,
    principal: &Principal,
    college: &College,
    user_id: String,
) -> ApiResult<User> {
    let user = db_call(state, move |db| db.get_user(&user_id))
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;
    authorize(principal, Action::Administer, Resource::Member(&user))?;
    if user.college_id.as_deref() != Some(college.id.as_str()) {
        return Err(ApiError::Forbidden("User does not belong to this college".into()));
    }
    Ok(user)
}

/// PENDING -> APPROVED. The member is told and can log in from now on.
pub async fn approve_join(
    state: &AppState,
    principal: &Principal,
    scope: CollegeScopeQuery,
    user_id: String,
) -> ApiResult<UserResponse> {
    let college = admin_scope(state, principal, scope).await?;
    let mut user = load_applicant(state, principal, &college, user_id).await?;

    let now = Utc::now();
    user.join_request
        .approve(&principal.user_id, now)
        .map_err(|e| ApiError::Conflict(e.to_string()))?;
    user.updated_at = now;

    let user = decide(state, user).await?;
    info!("Join request of {} approved by {}", user.id, principal.user_id);
    notify::emit(state, vec![notify::join_approved(&user)]).await;
    Ok(member_view(&college, &user))
}

/// PENDING -> REJECTED. Terminal: the member cannot re-apply with this account.
pub async fn reject_join(
    state: &AppState,
    principal: &Principal,
    scope: CollegeScopeQuery,
    user_id: String,
    req: RejectJoinRequest,
) -> ApiResult<UserResponse> {
    let college = admin_scope(state, principal, scope).await?;
    let mut user = load_applicant(state, principal, &college, user_id).await?;

    let reason = req.reason.filter(|r| !r.trim().is_empty());
    user.join_request
        .reject(reason.clone())
        .map_err(|e| ApiError::Conflict(e.to_string()))?;
    user.updated_at = Utc::now();

    let user = decide(state, user).await?;
    info!("Join request of {} rejected by {}", user.id, principal.user_id);
    notify::emit(state, vec![notify::join_rejected(&user, reason.as_deref())]).await;
    Ok(member_view(&college, &user))
}

/// Persist a join decision, losing cleanly to a concurrent one.
async fn decide(state: &AppState, user: User) -> ApiResult<User> {
    let record = user.clone();
    let applied = db_call(state, move |db| db.update_join_request(&record, JoinStatus::Pending)).await?;
    if applied {
        Ok(user)
    } else {
        Err(ApiError::Conflict("Join request is not pending".into()))
    }
}

pub async fn list_members(
    state: &AppState,
    principal: &Principal,
    scope: CollegeScopeQuery,
) -> ApiResult<Vec<UserResponse>> {
    let college = admin_scope(state, principal, scope).await?;
    db_call(state, move |db| {
        let members = db.college_members(&college.id)?;
        Ok(member_views(&college, &members))
    })
    .await
}

pub async fn update_settings(
    state: &AppState,
    principal: &Principal,
    scope: CollegeScopeQuery,
    req: CollegeSettingsRequest,
) -> ApiResult<CollegeResponse> {
    let mut college = admin_scope(state, principal, scope).await?;
    let settings = &mut college.settings;
    if let Some(v) = req.require_approval {
        settings.require_approval = v;
    }
    if let Some(v) = req.allow_public_profiles {
        settings.allow_public_profiles = v;
    }
    if let Some(v) = req.allow_anonymous_entries {
        settings.allow_anonymous_entries = v;
    }
    if let Some(features) = req.enabled_features {
        settings.enabled_features = features;
    }
    college.updated_at = Utc::now();
    save(state, college).await
}

/// Any member may read their own college's details.
pub async fn college_info(
    state: &AppState,
    principal: &Principal,
    scope: CollegeScopeQuery,
) -> ApiResult<CollegeResponse> {
    let college_id = resolve_college(principal, scope.college_id)?;
    authorize(principal, Action::Read, Resource::College(&college_id))?;
    let college = load_college(state, college_id).await?;
    describe(state, college).await
}

/// Store a logo and point the college at it; the previous logo is dropped.
pub async fn set_logo(
    state: &AppState,
    principal: &Principal,
    scope: CollegeScopeQuery,
    upload: Upload,
) -> ApiResult<CollegeResponse> {
    let college = admin_scope(state, principal, scope).await?;
    let stored = state
        .files
        .store(UploadKind::CollegeLogo, &college.id, upload)
        .await?;

    let (id, url, now) = (college.id.clone(), stored.url.clone(), Utc::now());
    if let Err(e) = db_call(state, move |db| db.set_college_logo(&id, &url, now)).await {
        if let Err(cleanup) = state.files.delete(&stored.url).await {
            warn!("Failed to remove orphaned logo {}: {}", stored.url, cleanup);
        }
        return Err(e);
    }
    if let Some(old) = &college.logo {
        if let Err(e) = state.files.delete(old).await {
            warn!("Failed to delete old logo {}: {}", old, e);
        }
    }

    let college = load_college(state, college.id).await?;
    describe(state, college).await
}

// -- Handlers --

async fn handle_create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ValidJson(req): ValidJson<CreateCollegeRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(created("College created successfully", create_college(&state, &principal, req).await?))
}

async fn handle_list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Colleges retrieved", list_colleges(&state, &principal).await?))
}

async fn handle_get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("College retrieved", get_college(&state, &principal, id).await?))
}

async fn handle_get_by_code(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(code): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("College retrieved", get_college_by_code(&state, &principal, code).await?))
}

async fn handle_update(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<UpdateCollegeRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("College updated successfully", update_college(&state, &principal, id, req).await?))
}

async fn handle_delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    deactivate_college(&state, &principal, id).await?;
    Ok(done("College deactivated successfully"))
}

async fn handle_analytics(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Analytics retrieved", analytics(&state, &principal).await?))
}

async fn handle_join_requests(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiQuery(scope): ApiQuery<CollegeScopeQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Join requests retrieved", join_requests(&state, &principal, scope).await?))
}

async fn handle_approve(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiQuery(scope): ApiQuery<CollegeScopeQuery>,
    Path(user_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let view = approve_join(&state, &principal, scope, user_id).await?;
    Ok(ok("Join request approved", view))
}

async fn handle_reject(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiQuery(scope): ApiQuery<CollegeScopeQuery>,
    Path(user_id): Path<String>,
    ValidJson(req): ValidJson<RejectJoinRequest>,
) -> ApiResult<impl IntoResponse> {
    let view = reject_join(&state, &principal, scope, user_id, req).await?;
    Ok(ok("Join request rejected", view))
}

async fn handle_members(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiQuery(scope): ApiQuery<CollegeScopeQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Users retrieved", list_members(&state, &principal, scope).await?))
}

async fn handle_settings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiQuery(scope): ApiQuery<CollegeScopeQuery>,
    ValidJson(req): ValidJson<CollegeSettingsRequest>,
) -> ApiResult<impl IntoResponse> {
    let view = update_settings(&state, &principal, scope, req).await?;
    Ok(ok("Settings updated successfully", view))
}

async fn handle_info(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiQuery(scope): ApiQuery<CollegeScopeQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("College info retrieved", college_info(&state, &principal, scope).await?))
}

/// `/admin/*`
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/colleges", get(handle_list).post(handle_create))
        .route(
            "/colleges/{id}",
            get(handle_get).put(handle_update).delete(handle_delete),
        )
        .route("/colleges/code/{code}", get(handle_get_by_code))
        .route("/analytics", get(handle_analytics))
}

/// `/college/*`
pub fn college_routes() -> Router<AppState> {
    Router::new()
        .route("/join-requests", get(handle_join_requests))
        .route("/join-requests/{user_id}/approve", put(handle_approve))
        .route("/join-requests/{user_id}/reject", put(handle_reject))
        .route("/users", get(handle_members))
        .route("/settings", put(handle_settings))
        .route("/info", get(handle_info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_uses_alphanumeric_prefix_and_hex_suffix() {
        let code = generate_college_code("St. Xavier's College");
        assert_eq!(code.len(), 8);
        assert!(code.starts_with("STXA"));
        assert!(code[4..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));

        assert_eq!(generate_college_code("IIT").len(), 7);
    }

    #[test]
    fn super_admin_must_name_a_college() {
        let root = Principal {
            user_id: "root".into(),
            role: Role::SuperAdmin,
            college_id: None,
        };
        assert!(matches!(resolve_college(&root, None), Err(ApiError::BadRequest(_))));
        assert_eq!(resolve_college(&root, Some("c9".into())).unwrap(), "c9");

        let admin = Principal {
            user_id: "a".into(),
            role: Role::CollegeAdmin,
            college_id: Some("c1".into()),
        };
        assert_eq!(resolve_college(&admin, None).unwrap(), "c1");
    }
}
