use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use slambook_types::models::Role;

use crate::error::ApiError;
use crate::state::AppState;
use crate::token::TokenType;

/// The authenticated caller, resolved from an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
    /// `None` only for SUPER_ADMIN.
    pub college_id: Option<String>,
}

impl Principal {
    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }

    pub fn is_college_admin(&self) -> bool {
        self.role == Role::CollegeAdmin
    }

    pub fn belongs_to(&self, college_id: &str) -> bool {
        self.college_id.as_deref() == Some(college_id)
    }
}

/// Extract and validate the access token from the Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let unauthorized = || ApiError::Unauthorized("Authentication required".into());

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(unauthorized)?;

    let claims = state
        .tokens
        .decode(token)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))?;

    if claims.token_type != TokenType::Access {
        return Err(ApiError::Unauthorized("Invalid token type".into()));
    }
    let role = claims.role.ok_or_else(unauthorized)?;

    req.extensions_mut().insert(Principal {
        user_id: claims.sub,
        role,
        college_id: claims.college_id,
    });
    Ok(next.run(req).await)
}
