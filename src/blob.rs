//! Storage for uploaded timetable documents (PDFs, images, spreadsheets).

use crate::timetable::{Owner, OwnerKind};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const BUCKET: &str = "timetables";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob path: {path}")]
    InvalidPath { path: String },

    #[error("blob already exists: {path}")]
    Exists { path: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

pub trait BlobStore {
    fn upload(&self, path: &str, bytes: &[u8], upsert: bool) -> Result<BlobInfo, BlobError>;

    fn public_url(&self, path: &str) -> String;

    /// Missing blobs are not an error.
    fn remove(&self, path: &str) -> Result<(), BlobError>;
}

/// Blob store rooted in a workspace directory.
pub struct FsBlobStore {
    root: PathBuf,
    public_base: String,
}

impl FsBlobStore {
    pub fn new(workspace: &Path, public_base: impl Into<String>) -> Self {
        FsBlobStore {
            root: workspace.join("blobs").join(BUCKET),
            public_base: public_base.into(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, BlobError> {
        let rel = Path::new(path);
        let clean = !path.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(BlobError::InvalidPath {
                path: path.to_string(),
            });
        }
        Ok(self.root.join(rel))
    }
}

impl BlobStore for FsBlobStore {
    fn upload(&self, path: &str, bytes: &[u8], upsert: bool) -> Result<BlobInfo, BlobError> {
        let target = self.resolve(path)?;
        if !upsert && target.exists() {
            return Err(BlobError::Exists {
                path: path.to_string(),
            });
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, bytes)?;

        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let sha256 = format!("{:x}", hasher.finalize());
        debug!(path, size = bytes.len(), "stored blob");
        Ok(BlobInfo {
            path: path.to_string(),
            size: bytes.len() as u64,
            sha256,
        })
    }

    fn public_url(&self, path: &str) -> String {
        if self.public_base.is_empty() {
            format!("file://{}", self.root.join(path).to_string_lossy())
        } else {
            format!(
                "{}/{}/{}",
                self.public_base.trim_end_matches('/'),
                BUCKET,
                path
            )
        }
    }

    fn remove(&self, path: &str) -> Result<(), BlobError> {
        let target = self.resolve(path)?;
        match std::fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Where an owner's uploaded document goes. Class documents live under the
/// class id; faculty documents share one folder keyed by faculty id.
pub fn upload_path(owner: &Owner, file_name: &str, now_millis: i64) -> String {
    match owner.kind {
        OwnerKind::Class => format!("{}/{}-{}", sanitize(&owner.id), now_millis, sanitize(file_name)),
        OwnerKind::Faculty => {
            let ext = Path::new(file_name)
                .extension()
                .and_then(|e| e.to_str())
                .map(sanitize)
                .unwrap_or_else(|| "bin".to_string());
            format!("faculty_timetables/{}_{}.{}", sanitize(&owner.id), now_millis, ext)
        }
    }
}

/// Recovers the blob path from a url produced by [`BlobStore::public_url`].
/// The last bucket segment wins, so a workspace path may itself contain it.
pub fn path_from_public_url(url: &str) -> Option<String> {
    let marker = format!("/{}/", BUCKET);
    url.rfind(&marker)
        .map(|i| url[i + marker.len()..].to_string())
        .filter(|p| !p.is_empty())
}
