use axum::{Json, Router, extract::DefaultBodyLimit, middleware, routing::get};
use slambook_types::api::ApiResponse;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::extract::done;
use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{auth, colleges, entries, files, notifications, templates, users};

pub const API_PREFIX: &str = "/api/v1";

async fn health() -> Json<ApiResponse<()>> {
    done("ok")
}

async fn unknown_route() -> ApiError {
    ApiError::not_found("Resource")
}

/// The full HTTP surface: public auth routes, the authenticated API under
/// `/api/v1`, read-only uploads and a health check.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .nest("/admin", colleges::admin_routes())
        .nest("/college", colleges::college_routes())
        .nest("/users", users::routes())
        .nest("/slambook", entries::routes())
        .nest("/templates", templates::routes())
        .nest("/notifications", notifications::routes())
        .nest("/files", files::routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let api = Router::new().nest("/auth", auth::routes()).merge(protected);

    // Multipart framing adds overhead on top of the file itself.
    let body_limit = state.config.max_file_size.saturating_mul(2);
    let uploads = ServeDir::new(&state.config.upload_dir);

    Router::new()
        .nest(API_PREFIX, api)
        .route("/health", get(health))
        .nest_service("/uploads", uploads)
        .fallback(unknown_route)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
