//! Consistency gateway: every mutating command writes the physical store
//! first, then the metadata store, and only then the in-memory tree. A
//! failure after a side effect unwinds the recorded compensations.

mod directories;
mod files;
mod queries;
mod saga;
mod tags;

use std::sync::Arc;

use cloudtree_core::{
    CODE_DIRECTORY_COPY_ROLLBACK_FAILED, CloudDirectory, CloudFile, ErrorKind, NodeKind, NodeRef,
    PolicySet, TreeError, TreePath,
};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::storage::{MetadataError, MetadataStore, PhysicalError, PhysicalStore};

pub use files::{Download, FileCopy, UploadSource};
pub use queries::{DirectoryListing, DriftReport, SearchReport, SizeReport};
pub use tags::TagChange;

use saga::Saga;

pub(crate) const COPY_DIRECTORY: &str = "copy directory";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("physical store: {0}")]
    Physical(#[from] PhysicalError),
    #[error("metadata store: {0}")]
    Metadata(#[from] MetadataError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("{operation} failed ({cause}); rollback incomplete: {}", .failures.join("; "))]
    RollbackFailed {
        operation: &'static str,
        cause: String,
        failures: Vec<String>,
    },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Tree(err) => err.kind(),
            GatewayError::Physical(_) | GatewayError::Metadata(_) => ErrorKind::UnexpectedError,
            GatewayError::Cancelled => ErrorKind::Cancelled,
            GatewayError::RollbackFailed { .. } => ErrorKind::RollbackFailed,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::RollbackFailed { operation, .. } if *operation == COPY_DIRECTORY => {
                CODE_DIRECTORY_COPY_ROLLBACK_FAILED
            }
            other => other.kind().code(),
        }
    }
}

/// Per-command cancellation signal and human-readable trace.
#[derive(Debug, Default)]
pub struct CommandContext {
    cancel: CancellationToken,
    log: Vec<String>,
}

impl CommandContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            log: Vec::new(),
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn trace(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn into_log(self) -> Vec<String> {
        self.log
    }

    fn ensure_active(&self) -> Result<(), GatewayError> {
        if self.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        Ok(())
    }
}

/// Where a renamed or moved node was and where it is now. Equal paths mean
/// the command changed nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub from: TreePath,
    pub to: TreePath,
}

impl Relocation {
    fn unchanged(path: TreePath) -> Self {
        Self {
            from: path.clone(),
            to: path,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

pub struct ConsistencyGateway {
    tree: RwLock<CloudDirectory>,
    physical: Arc<dyn PhysicalStore>,
    metadata: Arc<dyn MetadataStore>,
    policies: PolicySet,
}

impl ConsistencyGateway {
    /// Loads the tree from the metadata store.
    pub async fn open(
        physical: Arc<dyn PhysicalStore>,
        metadata: Arc<dyn MetadataStore>,
        policies: PolicySet,
    ) -> Result<Self, GatewayError> {
        let tree = metadata.load_tree().await?;
        let (directories, files) = tree.count_descendants();
        info!(directories, files, "tree loaded");
        Ok(Self {
            tree: RwLock::new(tree),
            physical,
            metadata,
            policies,
        })
    }

    pub fn policies(&self) -> PolicySet {
        self.policies
    }

    fn saga(&self, operation: &'static str) -> Saga {
        Saga::new(
            operation,
            Arc::clone(&self.physical),
            Arc::clone(&self.metadata),
        )
    }

    /// Canonical path of an existing directory.
    pub async fn resolve_directory(&self, path: &TreePath) -> Result<TreePath, GatewayError> {
        let tree = self.tree.read().await;
        Ok(locate_directory(&tree, path)?.0)
    }

    /// Canonical reference to an existing node; a directory wins over a
    /// same-named file.
    pub async fn resolve_node(&self, path: &TreePath) -> Result<NodeRef, GatewayError> {
        let tree = self.tree.read().await;
        resolve_node(&tree, path)
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

fn locate_directory<'t>(
    tree: &'t CloudDirectory,
    path: &TreePath,
) -> Result<(TreePath, &'t CloudDirectory), GatewayError> {
    let canonical = tree
        .canonical_directory_path(path)
        .ok_or_else(|| TreeError::not_found(format!("directory {path} does not exist")))?;
    let node = tree
        .find_directory(&canonical)
        .ok_or_else(|| TreeError::not_found(format!("directory {path} does not exist")))?;
    Ok((canonical, node))
}

fn locate_file<'t>(
    tree: &'t CloudDirectory,
    path: &TreePath,
) -> Result<(TreePath, &'t CloudFile), GatewayError> {
    let canonical = tree
        .canonical_file_path(path)
        .ok_or_else(|| TreeError::not_found(format!("file {path} does not exist")))?;
    let node = tree
        .find_file(&canonical)
        .ok_or_else(|| TreeError::not_found(format!("file {path} does not exist")))?;
    Ok((canonical, node))
}

fn directory_mut<'t>(
    tree: &'t mut CloudDirectory,
    path: &TreePath,
) -> Result<&'t mut CloudDirectory, GatewayError> {
    tree.find_directory_mut(path)
        .ok_or_else(|| TreeError::not_found(format!("directory {path} does not exist")).into())
}

fn resolve_node(tree: &CloudDirectory, path: &TreePath) -> Result<NodeRef, GatewayError> {
    if let Some(canonical) = tree.canonical_directory_path(path) {
        return Ok(NodeRef {
            path: canonical,
            kind: NodeKind::Directory,
        });
    }
    if let Some(canonical) = tree.canonical_file_path(path) {
        return Ok(NodeRef {
            path: canonical,
            kind: NodeKind::File,
        });
    }
    Err(TreeError::not_found(format!("{path} does not exist")).into())
}

fn split(path: &TreePath) -> Result<(TreePath, String), GatewayError> {
    match (path.parent(), path.name()) {
        (Some(parent), Some(name)) => Ok((parent, name.to_string())),
        _ => Err(TreeError::validation("the root directory cannot be used here").into()),
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
