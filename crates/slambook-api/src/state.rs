use std::sync::Arc;

use slambook_db::Database;
use tracing::error;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::storage::{DiskStorage, FileStore};
use crate::token::TokenService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub config: Config,
    pub tokens: TokenService,
    pub files: Arc<dyn FileStore>,
}

impl AppStateInner {
    pub fn new(db: Database, config: Config) -> AppState {
        let files = Arc::new(DiskStorage::new(config.upload_dir.clone(), config.max_file_size));
        Self::with_files(db, config, files)
    }

    pub fn with_files(db: Database, config: Config, files: Arc<dyn FileStore>) -> AppState {
        let tokens = TokenService::new(
            &config.jwt_secret,
            config.access_token_ttl_secs,
            config.refresh_token_ttl_secs,
        );
        Arc::new(Self {
            db,
            config,
            tokens,
            files,
        })
    }
}

/// Run blocking SQLite work off the async runtime.
pub async fn db_call<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })?
        .map_err(ApiError::Internal)
}
