use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::{info, warn};

pub const PLACEHOLDER_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub upload_dir: PathBuf,
    pub max_file_size: usize,
    pub super_admin_email: String,
    pub super_admin_password: String,
    /// Password given to the admin account provisioned with each new college.
    pub default_admin_password: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            host: try_load("SLAMBOOK_HOST", "0.0.0.0")?,
            port: try_load("SLAMBOOK_PORT", "8080")?,
            db_path: try_load("SLAMBOOK_DB_PATH", "slambook.db")?,
            jwt_secret: try_load("SLAMBOOK_JWT_SECRET", PLACEHOLDER_JWT_SECRET)?,
            access_token_ttl_secs: try_load("SLAMBOOK_ACCESS_TOKEN_TTL_SECS", "900")?,
            refresh_token_ttl_secs: try_load("SLAMBOOK_REFRESH_TOKEN_TTL_SECS", "604800")?,
            upload_dir: try_load("SLAMBOOK_UPLOAD_DIR", "./uploads")?,
            max_file_size: try_load("SLAMBOOK_MAX_FILE_SIZE", "5242880")?,
            super_admin_email: try_load("SLAMBOOK_SUPER_ADMIN_EMAIL", "admin@slambook.com")?,
            super_admin_password: try_load("SLAMBOOK_SUPER_ADMIN_PASSWORD", "Admin@123")?,
            default_admin_password: try_load("SLAMBOOK_DEFAULT_ADMIN_PASSWORD", "Admin@123")?,
        };

        if config.jwt_secret == PLACEHOLDER_JWT_SECRET {
            warn!("SLAMBOOK_JWT_SECRET is not set; tokens are signed with a placeholder secret");
        }
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            db_path: PathBuf::from("slambook.db"),
            jwt_secret: PLACEHOLDER_JWT_SECRET.into(),
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 604_800,
            upload_dir: PathBuf::from("./uploads"),
            max_file_size: 5 * 1024 * 1024,
            super_admin_email: "admin@slambook.com".into(),
            super_admin_password: "Admin@123".into(),
            default_admin_password: "Admin@123".into(),
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default");
        default.to_string()
    });
    raw.parse()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("invalid value for {key}"))
}
