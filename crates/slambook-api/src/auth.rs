use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use slambook_db::is_unique_violation;
use slambook_types::api::{
    ApiResponse, AuthResponse, ForgotPasswordRequest, LoginRequest, RefreshTokenRequest,
    RegisterRequest, UserResponse, VerifyEmailQuery,
};
use slambook_types::models::{JoinRequest, Profile, Role, SlamBookSettings, User};
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiQuery, ValidJson, created, done, ok};
use crate::notify;
use crate::state::{AppState, db_call};
use crate::token::TokenType;
use crate::users::user_view;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

fn with_tokens(state: &AppState, user: &User, view: UserResponse) -> ApiResult<AuthResponse> {
    let pair = state.tokens.issue_pair(user)?;
    Ok(AuthResponse {
        access_token: Some(pair.access_token),
        refresh_token: Some(pair.refresh_token),
        token_type: Some("Bearer".to_string()),
        expires_in: Some(pair.expires_in),
        user: view,
    })
}

/// Without a college code only super admins can sign in.
pub async fn login(state: &AppState, req: LoginRequest) -> ApiResult<AuthResponse> {
    let email = normalize_email(&req.email);
    let code = req
        .college_code
        .as_deref()
        .map(normalize_code)
        .filter(|c| !c.is_empty());

    let user = match code {
        None => db_call(state, move |db| db.get_user_by_email(&email, None))
            .await?
            .filter(|u| u.role == Role::SuperAdmin),
        Some(code) => {
            let college = db_call(state, move |db| db.get_college_by_code(&code))
                .await?
                .ok_or_else(|| ApiError::not_found("College"))?;
            if !college.is_active {
                return Err(ApiError::Unauthorized("College is not active".into()));
            }
            db_call(state, move |db| db.get_user_by_email(&email, Some(&college.id))).await?
        }
    };

    let mut user = user.ok_or_else(|| ApiError::Unauthorized(INVALID_CREDENTIALS.into()))?;
    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.into()));
    }
    if !user.is_active {
        return Err(ApiError::Unauthorized("Account is deactivated".into()));
    }
    if !user.join_request.is_approved() {
        return Err(ApiError::Unauthorized("Account not approved yet".into()));
    }

    let now = Utc::now();
    user.last_login_at = Some(now);
    let snapshot = user.clone();
    let view = db_call(state, move |db| {
        db.record_login(&snapshot.id, now)?;
        user_view(db, &snapshot)
    })
    .await?;

    info!("User {} logged in", user.id);
    with_tokens(state, &user, view)
}

/// New members start PENDING unless the college skips approval, in which
/// case they get tokens straight away.
pub async fn register(state: &AppState, req: RegisterRequest) -> ApiResult<AuthResponse> {
    let code = normalize_code(&req.college_code);
    let college = db_call(state, move |db| db.get_college_by_code(&code))
        .await?
        .ok_or_else(|| ApiError::not_found("College"))?;
    if !college.is_active {
        return Err(ApiError::BadRequest("College is not active".into()));
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        college_id: Some(college.id.clone()),
        email: normalize_email(&req.email),
        password_hash: hash_password(&req.password)?,
        role: Role::Student,
        profile: Profile {
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            course: req.course,
            batch: req.batch,
            roll_number: req.roll_number,
            ..Profile::default()
        },
        slambook_settings: SlamBookSettings::default(),
        join_request: JoinRequest::for_registration(college.settings.require_approval, now),
        email_verified: false,
        is_active: true,
        created_at: now,
        updated_at: now,
        last_login_at: None,
    };

    let max_users = college.subscription.max_users;
    let record = user.clone();
    let (view, admins) = db_call(state, move |db| {
        let college_id = record.college_id.as_deref().unwrap_or_default();
        let seated = db.count_seated_members(college_id)?;
        if max_users.is_some_and(|max| seated >= u64::from(max)) {
            return Ok(Err(ApiError::BadRequest(
                "College has reached its maximum user limit".into(),
            )));
        }
        if db.get_user_by_email(&record.email, Some(college_id))?.is_some() {
            return Ok(Err(duplicate_email()));
        }
        if let Err(e) = db.insert_user(&record) {
            if is_unique_violation(&e) {
                return Ok(Err(duplicate_email()));
            }
            return Err(e);
        }
        let admins = if record.join_request.is_approved() {
            Vec::new()
        } else {
            db.college_admins(college_id)?
        };
        Ok(Ok((user_view(db, &record)?, admins)))
    })
    .await??;

    info!("Registered user {} in college {}", user.id, college.college_code);

    if user.join_request.is_approved() {
        return with_tokens(state, &user, view);
    }

    let notices = admins
        .iter()
        .map(|admin| notify::new_join_request(admin, &user))
        .collect();
    notify::emit(state, notices).await;

    Ok(AuthResponse {
        access_token: None,
        refresh_token: None,
        token_type: None,
        expires_in: None,
        user: view,
    })
}

fn duplicate_email() -> ApiError {
    ApiError::BadRequest("Email already registered in this college".into())
}

pub async fn refresh(state: &AppState, req: RefreshTokenRequest) -> ApiResult<AuthResponse> {
    let claims = state
        .tokens
        .decode(&req.refresh_token)
        .map_err(|_| ApiError::Unauthorized("Invalid refresh token".into()))?;
    if claims.token_type != TokenType::Refresh {
        return Err(ApiError::Unauthorized("Invalid token type".into()));
    }

    let user_id = claims.sub;
    let (user, view) = db_call(state, move |db| match db.get_user(&user_id)? {
        Some(user) => {
            let view = user_view(db, &user)?;
            Ok(Some((user, view)))
        }
        None => Ok(None),
    })
    .await?
    .ok_or_else(|| ApiError::not_found("User"))?;

    if !user.is_active {
        return Err(ApiError::Unauthorized("Account is deactivated".into()));
    }
    with_tokens(state, &user, view)
}

// -- Handlers --

async fn handle_login(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = login(&state, req).await?;
    Ok(ok("Login successful", response))
}

async fn handle_register(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = register(&state, req).await?;
    let message = if response.access_token.is_some() {
        "Registration successful"
    } else {
        "Registration successful. Awaiting admin approval."
    };
    Ok(created(message, response))
}

async fn handle_refresh(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RefreshTokenRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = refresh(&state, req).await?;
    Ok(ok("Token refreshed", response))
}

async fn handle_verify_email(ApiQuery(query): ApiQuery<VerifyEmailQuery>) -> impl IntoResponse {
    info!("Email verification requested ({} char token)", query.token.len());
    done("Email verified successfully")
}

async fn handle_forgot_password(ValidJson(req): ValidJson<ForgotPasswordRequest>) -> Json<ApiResponse<()>> {
    info!("Password reset requested for {}", normalize_email(&req.email));
    done("Password reset link sent to your email")
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(handle_login))
        .route("/register", post(handle_register))
        .route("/refresh", post(handle_refresh))
        .route("/verify-email", get(handle_verify_email))
        .route("/forgot-password", post(handle_forgot_password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies_only_the_original() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-phc-string"));
    }

    #[test]
    fn emails_and_codes_are_normalized() {
        assert_eq!(normalize_email("  Asha@X.EDU "), "asha@x.edu");
        assert_eq!(normalize_code(" abcd1f2e "), "ABCD1F2E");
    }
}
