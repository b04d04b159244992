use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use slambook_types::models::AttachmentKind;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::error::ApiError;

pub const URL_PREFIX: &str = "/uploads/";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File is empty")]
    Empty,

    #[error("Invalid file type. Allowed types: {0}")]
    InvalidType(String),

    #[error("File size exceeds maximum allowed size of {0} bytes")]
    TooLarge(usize),

    #[error("Invalid file URL")]
    InvalidUrl,

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(e) => ApiError::Internal(e.into()),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

/// What an upload is for. Decides the folder and the accepted content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    ProfilePicture,
    EntryImage,
    EntryVideo,
    EntryAudio,
    CollegeLogo,
}

const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/gif", "image/webp"];
const VIDEO_TYPES: &[&str] = &["video/mp4", "video/webm", "video/ogg"];
const AUDIO_TYPES: &[&str] = &["audio/mpeg", "audio/mp3", "audio/wav", "audio/ogg"];

impl UploadKind {
    pub fn for_attachment(kind: AttachmentKind) -> Self {
        match kind {
            AttachmentKind::Image => Self::EntryImage,
            AttachmentKind::Video => Self::EntryVideo,
            AttachmentKind::Audio => Self::EntryAudio,
        }
    }

    pub fn folder(&self) -> &'static str {
        match self {
            Self::ProfilePicture => "profiles",
            Self::EntryImage => "slambook/images",
            Self::EntryVideo => "slambook/videos",
            Self::EntryAudio => "slambook/audio",
            Self::CollegeLogo => "colleges/logos",
        }
    }

    pub fn allowed_types(&self) -> &'static [&'static str] {
        match self {
            Self::ProfilePicture | Self::EntryImage | Self::CollegeLogo => IMAGE_TYPES,
            Self::EntryVideo => VIDEO_TYPES,
            Self::EntryAudio => AUDIO_TYPES,
        }
    }

    /// Short label returned to clients.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ProfilePicture | Self::EntryImage | Self::CollegeLogo => "image",
            Self::EntryVideo => "video",
            Self::EntryAudio => "audio",
        }
    }
}

/// An uploaded file as received from a multipart form.
#[derive(Debug, Clone)]
pub struct Upload {
    pub content_type: Option<String>,
    pub original_name: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub url: String,
    pub filename: String,
    pub size: u64,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn store(&self, kind: UploadKind, owner_id: &str, upload: Upload) -> Result<StoredFile, StorageError>;

    /// Deleting a file that is already gone succeeds.
    async fn delete(&self, url: &str) -> Result<(), StorageError>;
}

/// Type and size gate shared by every store.
pub fn check_upload(kind: UploadKind, upload: &Upload, max_size: usize) -> Result<(), StorageError> {
    if upload.bytes.is_empty() {
        return Err(StorageError::Empty);
    }
    let content_type = upload
        .content_type
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !kind.allowed_types().contains(&content_type.as_str()) {
        return Err(StorageError::InvalidType(kind.allowed_types().join(", ")));
    }
    if upload.bytes.len() > max_size {
        return Err(StorageError::TooLarge(max_size));
    }
    Ok(())
}

/// Splits `/uploads/<folder>/<file>` into its relative path, refusing
/// anything that could step outside the upload root.
pub fn relative_path(url: &str) -> Result<&str, StorageError> {
    let rel = url.strip_prefix(URL_PREFIX).ok_or(StorageError::InvalidUrl)?;
    let bad = rel.is_empty()
        || rel.contains('\\')
        || rel.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad { Err(StorageError::InvalidUrl) } else { Ok(rel) }
}

/// The id a stored file name starts with: `{owner}_{timestamp}_{random}.ext`.
pub fn owner_of(url: &str) -> Result<&str, StorageError> {
    let rel = relative_path(url)?;
    let name = rel.rsplit('/').next().unwrap_or(rel);
    name.split_once('_')
        .map(|(owner, _)| owner)
        .filter(|owner| !owner.is_empty())
        .ok_or(StorageError::InvalidUrl)
}

fn extension(upload: &Upload) -> String {
    let from_name = upload
        .original_name
        .as_deref()
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase);
    if let Some(ext) = from_name {
        return format!(".{ext}");
    }
    let ext = match upload.content_type.as_deref().unwrap_or_default() {
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "video/mp4" => ".mp4",
        "video/webm" => ".webm",
        "video/ogg" => ".ogv",
        "audio/mpeg" | "audio/mp3" => ".mp3",
        "audio/wav" => ".wav",
        "audio/ogg" => ".ogg",
        _ => "",
    };
    ext.to_string()
}

/// Stores uploads as flat files under `{dir}/{folder}/`.
pub struct DiskStorage {
    dir: PathBuf,
    max_size: usize,
}

impl DiskStorage {
    pub fn new(dir: PathBuf, max_size: usize) -> Self {
        Self { dir, max_size }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl FileStore for DiskStorage {
    async fn store(&self, kind: UploadKind, owner_id: &str, upload: Upload) -> Result<StoredFile, StorageError> {
        check_upload(kind, &upload, self.max_size)?;

        let folder = self.dir.join(kind.folder());
        fs::create_dir_all(&folder).await?;

        let filename = format!(
            "{}_{}_{:08x}{}",
            owner_id,
            Utc::now().format("%Y%m%d_%H%M%S"),
            rand::random::<u32>(),
            extension(&upload)
        );
        fs::write(folder.join(&filename), &upload.bytes).await?;
        info!("Stored {} ({} bytes)", filename, upload.bytes.len());

        Ok(StoredFile {
            url: format!("{}{}/{}", URL_PREFIX, kind.folder(), filename),
            filename,
            size: upload.bytes.len() as u64,
        })
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        let path = self.dir.join(relative_path(url)?);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted file {}", url);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("File {} already gone", url);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
