use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cloudtree_core::TreePath;
use rand::Rng;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::paths::{PathError, storage_path_for};

const FILES_DIR: &str = "files";
const STAGING_DIR: &str = "staging";

#[derive(Debug, Error)]
pub enum PhysicalError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("staged entry {0} is missing")]
    MissingStash(String),
}

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> PhysicalError + '_ {
    move |source| PhysicalError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Handle to a node moved aside by [`PhysicalStore::stash`]. It can be put
/// back with `restore` or dropped for good with `purge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashToken(String);

impl StashToken {
    fn generate() -> Self {
        let nonce: u64 = rand::thread_rng().r#gen();
        let stamp = time::OffsetDateTime::now_utc().unix_timestamp();
        Self(format!("{stamp}-{nonce:016x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StashToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Byte store addressed by tree paths. Every mutation is a single
/// filesystem step so the gateway can compensate it.
#[async_trait]
pub trait PhysicalStore: Send + Sync {
    async fn create_dir(&self, path: &TreePath) -> Result<(), PhysicalError>;
    async fn write_file(&self, path: &TreePath, bytes: &[u8]) -> Result<(), PhysicalError>;
    async fn copy_file(&self, from: &TreePath, to: &TreePath) -> Result<(), PhysicalError>;
    async fn read_file(&self, path: &TreePath) -> Result<Vec<u8>, PhysicalError>;
    async fn rename(&self, from: &TreePath, to: &TreePath) -> Result<(), PhysicalError>;
    /// Absent targets are not an error.
    async fn remove_file(&self, path: &TreePath) -> Result<(), PhysicalError>;
    /// Absent targets are not an error.
    async fn remove_dir_all(&self, path: &TreePath) -> Result<(), PhysicalError>;
    async fn stash(&self, path: &TreePath) -> Result<StashToken, PhysicalError>;
    async fn restore(&self, token: &StashToken, path: &TreePath) -> Result<(), PhysicalError>;
    async fn purge(&self, token: &StashToken) -> Result<(), PhysicalError>;
    async fn exists(&self, path: &TreePath) -> Result<bool, PhysicalError>;
}

/// Local disk layout: `<root>/files` mirrors the tree, `<root>/staging`
/// holds partial writes and stashed nodes.
#[derive(Debug, Clone)]
pub struct LocalDiskStore {
    files_root: PathBuf,
    staging_root: PathBuf,
}

impl LocalDiskStore {
    pub async fn open(root: &Path) -> Result<Self, PhysicalError> {
        let files_root = root.join(FILES_DIR);
        let staging_root = root.join(STAGING_DIR);
        tokio::fs::create_dir_all(&files_root)
            .await
            .map_err(io_at(&files_root))?;
        tokio::fs::create_dir_all(&staging_root)
            .await
            .map_err(io_at(&staging_root))?;
        Ok(Self {
            files_root,
            staging_root,
        })
    }

    pub fn files_root(&self) -> &Path {
        &self.files_root
    }

    pub fn disk_path(&self, path: &TreePath) -> Result<PathBuf, PhysicalError> {
        Ok(storage_path_for(&self.files_root, path)?)
    }

    fn staging_path(&self, token: &StashToken) -> PathBuf {
        self.staging_root.join(token.as_str())
    }

    fn partial_path(&self) -> PathBuf {
        self.staging_root
            .join(format!("{}.partial", StashToken::generate()))
    }
}

#[async_trait]
impl PhysicalStore for LocalDiskStore {
    async fn create_dir(&self, path: &TreePath) -> Result<(), PhysicalError> {
        let target = self.disk_path(path)?;
        tokio::fs::create_dir(&target).await.map_err(io_at(&target))
    }

    async fn write_file(&self, path: &TreePath, bytes: &[u8]) -> Result<(), PhysicalError> {
        let target = self.disk_path(path)?;
        let partial = self.partial_path();
        let written = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(io_at(&partial)(err));
        }
        if let Err(err) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(io_at(&target)(err));
        }
        Ok(())
    }

    async fn copy_file(&self, from: &TreePath, to: &TreePath) -> Result<(), PhysicalError> {
        let source = self.disk_path(from)?;
        let target = self.disk_path(to)?;
        let partial = self.partial_path();
        if let Err(err) = tokio::fs::copy(&source, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(io_at(&source)(err));
        }
        if let Err(err) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(io_at(&target)(err));
        }
        Ok(())
    }

    async fn read_file(&self, path: &TreePath) -> Result<Vec<u8>, PhysicalError> {
        let source = self.disk_path(path)?;
        tokio::fs::read(&source).await.map_err(io_at(&source))
    }

    async fn rename(&self, from: &TreePath, to: &TreePath) -> Result<(), PhysicalError> {
        let source = self.disk_path(from)?;
        let target = self.disk_path(to)?;
        tokio::fs::rename(&source, &target)
            .await
            .map_err(io_at(&source))
    }

    async fn remove_file(&self, path: &TreePath) -> Result<(), PhysicalError> {
        let target = self.disk_path(path)?;
        match tokio::fs::remove_file(&target).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(io_at(&target)(err)),
            _ => Ok(()),
        }
    }

    async fn remove_dir_all(&self, path: &TreePath) -> Result<(), PhysicalError> {
        let target = self.disk_path(path)?;
        match tokio::fs::remove_dir_all(&target).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(io_at(&target)(err)),
            _ => Ok(()),
        }
    }

    async fn stash(&self, path: &TreePath) -> Result<StashToken, PhysicalError> {
        let source = self.disk_path(path)?;
        let token = StashToken::generate();
        tokio::fs::rename(&source, self.staging_path(&token))
            .await
            .map_err(io_at(&source))?;
        Ok(token)
    }

    async fn restore(&self, token: &StashToken, path: &TreePath) -> Result<(), PhysicalError> {
        let staged = self.staging_path(token);
        if !tokio::fs::try_exists(&staged).await.map_err(io_at(&staged))? {
            return Err(PhysicalError::MissingStash(token.to_string()));
        }
        let target = self.disk_path(path)?;
        tokio::fs::rename(&staged, &target)
            .await
            .map_err(io_at(&target))
    }

    async fn purge(&self, token: &StashToken) -> Result<(), PhysicalError> {
        let staged = self.staging_path(token);
        let metadata = match tokio::fs::symlink_metadata(&staged).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(io_at(&staged)(err)),
        };
        let removed = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&staged).await
        } else {
            tokio::fs::remove_file(&staged).await
        };
        removed.map_err(io_at(&staged))
    }

    async fn exists(&self, path: &TreePath) -> Result<bool, PhysicalError> {
        let target = self.disk_path(path)?;
        tokio::fs::try_exists(&target).await.map_err(io_at(&target))
    }
}
