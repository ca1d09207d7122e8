//! Request/response state machine for clients that hold their own session.
//! Each request brings the session state along; the engine applies one
//! command, maintains undo/redo history and the clipboard, and returns the
//! new state with a sorted listing of the current directory.

use std::path::PathBuf;
use std::sync::Arc;

use cloudtree_core::{
    ClipboardItem, DirectoryDeletePolicy, DirectoryEntry, FileKind, HistoryEntry, NodeKind,
    SessionState, SortDirection, SortKey, SortState, TreeError, TreePath, sort_entries, tag_map,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gateway::{CommandContext, ConsistencyGateway, GatewayError, Relocation, UploadSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all_fields = "camelCase")]
pub enum SessionCommand {
    Refresh,
    ChangeDirectory {
        path: String,
    },
    CreateDirectory {
        name: String,
    },
    RenameDirectory {
        path: String,
        new_name: String,
    },
    MoveDirectory {
        path: String,
        target: String,
    },
    DeleteDirectory {
        path: String,
    },
    /// Exactly one of `content` and `source_path` must be given.
    UploadFile {
        name: String,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        source_path: Option<PathBuf>,
        kind: FileKind,
    },
    RenameFile {
        path: String,
        new_name: String,
    },
    MoveFile {
        path: String,
        target: String,
    },
    DeleteFile {
        path: String,
    },
    Copy {
        path: String,
    },
    Paste,
    AssignTag {
        path: String,
        tag: String,
    },
    RemoveTag {
        path: String,
        tag: String,
    },
    Sort {
        key: SortKey,
        direction: SortDirection,
    },
    Undo,
    Redo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    #[serde(default)]
    pub state: SessionState,
    pub command: SessionCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub state: SessionState,
    pub success: bool,
    pub message: String,
    pub error_code: Option<String>,
    pub log: Vec<String>,
    pub entries: Vec<DirectoryEntry>,
}

impl SessionResponse {
    /// A request that could not be decoded; nothing was executed.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            state: SessionState::default(),
            success: false,
            message: message.into(),
            error_code: Some(cloudtree_core::CODE_VALIDATION_FAILED.to_string()),
            log: Vec::new(),
            entries: Vec::new(),
        }
    }
}

fn absolute(raw: &str) -> Result<TreePath, GatewayError> {
    Ok(TreePath::parse(raw)?)
}

fn parent_and_name(raw: &str) -> Result<(TreePath, String), GatewayError> {
    let path = absolute(raw)?;
    match (path.parent(), path.name()) {
        (Some(parent), Some(name)) => Ok((parent, name.to_string())),
        _ => Err(TreeError::validation(format!("history entry refers to the root: {raw}")).into()),
    }
}

fn parent_of(raw: &str) -> Result<TreePath, GatewayError> {
    Ok(parent_and_name(raw)?.0)
}

fn name_of(raw: &str) -> Result<String, GatewayError> {
    Ok(parent_and_name(raw)?.1)
}

pub struct SessionEngine {
    gateway: Arc<ConsistencyGateway>,
    shutdown: CancellationToken,
}

impl SessionEngine {
    pub fn new(gateway: Arc<ConsistencyGateway>) -> Self {
        Self::with_shutdown(gateway, CancellationToken::new())
    }

    pub fn with_shutdown(gateway: Arc<ConsistencyGateway>, shutdown: CancellationToken) -> Self {
        Self { gateway, shutdown }
    }

    pub async fn handle(&self, request: SessionRequest) -> SessionResponse {
        let SessionRequest { state, command } = request;
        let mut next = state.clone();
        let mut ctx = CommandContext::new(self.shutdown.child_token());
        let outcome = self.apply(&mut next, command, &mut ctx).await;
        let log = ctx.into_log();
        match outcome {
            Ok(message) => {
                self.refresh_tags(&mut next).await;
                let entries = self.listing(&mut next).await;
                SessionResponse {
                    state: next,
                    success: true,
                    message,
                    error_code: None,
                    log,
                    entries,
                }
            }
            Err(err) => {
                warn!(code = err.code(), %err, "session command failed");
                let mut view = state.clone();
                let entries = self.listing(&mut view).await;
                SessionResponse {
                    state,
                    success: false,
                    message: err.to_string(),
                    error_code: Some(err.code().to_string()),
                    log,
                    entries,
                }
            }
        }
    }

    async fn refresh_tags(&self, state: &mut SessionState) {
        match self.gateway.list_tags(None).await {
            Ok(tags) => state.node_tags = tag_map(&tags),
            Err(err) => warn!(%err, "tag refresh failed, keeping previous tags"),
        }
    }

    /// Sorted entries of the current directory. When it no longer exists
    /// the nearest surviving ancestor becomes current.
    async fn listing(&self, state: &mut SessionState) -> Vec<DirectoryEntry> {
        let mut dir = state.current_directory();
        loop {
            match self.gateway.list_directory(&dir).await {
                Ok(listing) => {
                    state.set_current_directory(&listing.path);
                    let mut entries = listing.entries;
                    sort_entries(&mut entries, state.current_sort_state.as_ref());
                    return entries;
                }
                Err(_) => match dir.parent() {
                    Some(parent) => dir = parent,
                    None => return Vec::new(),
                },
            }
        }
    }

    async fn apply(
        &self,
        state: &mut SessionState,
        command: SessionCommand,
        ctx: &mut CommandContext,
    ) -> Result<String, GatewayError> {
        let current = state.current_directory();
        let resolve = |raw: &str| TreePath::resolve(&current, raw);
        debug!(current = %current, ?command, "session command");

        match command {
            SessionCommand::Refresh => Ok("Refreshed".to_string()),
            SessionCommand::ChangeDirectory { path } => {
                let target = self.gateway.resolve_directory(&resolve(&path)).await?;
                state.set_current_directory(&target);
                Ok(format!("Current directory: {target}"))
            }
            SessionCommand::CreateDirectory { name } => {
                let created = self.gateway.create_directory(&current, &name, ctx).await?;
                state.record(HistoryEntry::CreateDirectory {
                    path: created.to_string(),
                });
                Ok(format!("Directory {created} created"))
            }
            SessionCommand::RenameDirectory { path, new_name } => {
                let renamed = self
                    .gateway
                    .rename_directory(&resolve(&path), &new_name, ctx)
                    .await?;
                Ok(self.relocated(state, renamed, |from, to| HistoryEntry::RenameDirectory {
                    from,
                    to,
                }))
            }
            SessionCommand::MoveDirectory { path, target } => {
                let moved = self
                    .gateway
                    .move_directory(&resolve(&path), &resolve(&target), ctx)
                    .await?;
                Ok(self.relocated(state, moved, |from, to| HistoryEntry::MoveDirectory {
                    from,
                    to,
                }))
            }
            SessionCommand::DeleteDirectory { path } => {
                let deleted = self.gateway.delete_directory(&resolve(&path), ctx).await?;
                state.forget_paths_under(&deleted);
                state.invalidate_redo();
                Ok(format!("Directory {deleted} deleted"))
            }
            SessionCommand::UploadFile {
                name,
                content,
                source_path,
                kind,
            } => {
                let source = match (content, source_path) {
                    (Some(content), None) => UploadSource::Bytes(content.into_bytes()),
                    (None, Some(path)) => UploadSource::LocalPath(path),
                    _ => {
                        return Err(TreeError::validation(
                            "upload needs exactly one of content or sourcePath",
                        )
                        .into());
                    }
                };
                let uploaded = self
                    .gateway
                    .upload_file(&current, &name, source, kind, ctx)
                    .await?;
                state.invalidate_redo();
                Ok(format!("File {uploaded} uploaded"))
            }
            SessionCommand::RenameFile { path, new_name } => {
                let renamed = self
                    .gateway
                    .rename_file(&resolve(&path), &new_name, ctx)
                    .await?;
                Ok(self.relocated(state, renamed, |from, to| HistoryEntry::RenameFile {
                    from,
                    to,
                }))
            }
            SessionCommand::MoveFile { path, target } => {
                let moved = self
                    .gateway
                    .move_file(&resolve(&path), &resolve(&target), ctx)
                    .await?;
                Ok(self.relocated(state, moved, |from, to| HistoryEntry::MoveFile { from, to }))
            }
            SessionCommand::DeleteFile { path } => {
                let deleted = self.gateway.delete_file(&resolve(&path), ctx).await?;
                state.forget_paths_under(&deleted);
                state.invalidate_redo();
                Ok(format!("File {deleted} deleted"))
            }
            SessionCommand::Copy { path } => {
                let node = self.gateway.resolve_node(&resolve(&path)).await?;
                state.clipboard_item = Some(ClipboardItem {
                    path: node.path.to_string(),
                    is_directory: node.kind == NodeKind::Directory,
                });
                Ok(format!("Copied {} to clipboard", node.path))
            }
            SessionCommand::Paste => {
                let item = state
                    .clipboard_item
                    .clone()
                    .ok_or_else(|| TreeError::validation("clipboard is empty"))?;
                let source = absolute(&item.path)?;
                let entry = if item.is_directory {
                    let created = self.gateway.copy_directory(&source, &current, ctx).await?;
                    HistoryEntry::CopyDirectory {
                        source: source.to_string(),
                        created: created.to_string(),
                    }
                } else {
                    let copy = self.gateway.copy_file(&source, &current, ctx).await?;
                    if copy.replaced {
                        // An overwrite has no inverse.
                        state.clipboard_item = None;
                        state.invalidate_redo();
                        return Ok(format!("Pasted {} over the existing file", copy.path));
                    }
                    HistoryEntry::CopyFile {
                        source: source.to_string(),
                        created: copy.path.to_string(),
                    }
                };
                state.clipboard_item = None;
                let message = format!("Pasted: {}", entry.describe());
                state.record(entry);
                Ok(message)
            }
            SessionCommand::AssignTag { path, tag } => {
                let change = self.gateway.assign_tag(&resolve(&path), &tag, ctx).await?;
                if !change.changed {
                    return Ok(format!("{} already tagged {}", change.node.path, change.tag));
                }
                state.record(HistoryEntry::AssignTag {
                    path: change.node.path.to_string(),
                    tag: change.tag,
                });
                Ok(format!("Tagged {} as {}", change.node.path, change.tag))
            }
            SessionCommand::RemoveTag { path, tag } => {
                let change = self.gateway.remove_tag(&resolve(&path), &tag, ctx).await?;
                if !change.changed {
                    return Ok(format!("{} was not tagged {}", change.node.path, change.tag));
                }
                state.record(HistoryEntry::RemoveTag {
                    path: change.node.path.to_string(),
                    tag: change.tag,
                });
                Ok(format!("Removed tag {} from {}", change.tag, change.node.path))
            }
            SessionCommand::Sort { key, direction } => {
                let next = Some(SortState { key, direction });
                if next == state.current_sort_state {
                    return Ok("Sort unchanged".to_string());
                }
                state.record(HistoryEntry::ChangeSort {
                    previous: state.current_sort_state,
                    next,
                });
                state.current_sort_state = next;
                Ok(format!("Sorted by {key:?} {direction:?}"))
            }
            SessionCommand::Undo => {
                let entry = state
                    .undo_stack
                    .pop()
                    .ok_or_else(|| TreeError::validation("nothing to undo"))?;
                let entry = self.undo(state, entry, ctx).await?;
                let message = format!("Undid {}", entry.describe());
                state.push_redo(entry);
                Ok(message)
            }
            SessionCommand::Redo => {
                let entry = state
                    .redo_stack
                    .pop()
                    .ok_or_else(|| TreeError::validation("nothing to redo"))?;
                let description = entry.describe();
                match self.redo(state, entry, ctx).await? {
                    Some(entry) => {
                        state.push_undo(entry);
                        Ok(format!("Redid {description}"))
                    }
                    None => {
                        state.invalidate_redo();
                        Ok(format!("Redid {description}; it replaced a file and cannot be undone"))
                    }
                }
            }
        }
    }

    fn relocated(
        &self,
        state: &mut SessionState,
        relocation: Relocation,
        entry: impl FnOnce(String, String) -> HistoryEntry,
    ) -> String {
        if relocation.is_noop() {
            return format!("{} unchanged", relocation.from);
        }
        state.rebase_paths(&relocation.from, &relocation.to);
        state.record(entry(relocation.from.to_string(), relocation.to.to_string()));
        format!("{} -> {}", relocation.from, relocation.to)
    }

    /// Runs the inverse of `entry`; the returned entry goes onto the redo
    /// stack.
    async fn undo(
        &self,
        state: &mut SessionState,
        entry: HistoryEntry,
        ctx: &mut CommandContext,
    ) -> Result<HistoryEntry, GatewayError> {
        let gateway = &self.gateway;
        match &entry {
            HistoryEntry::CreateDirectory { path } => {
                let deleted = gateway.delete_directory(&absolute(path)?, ctx).await?;
                state.forget_paths_under(&deleted);
            }
            HistoryEntry::RenameDirectory { from, to } => {
                let back = gateway
                    .rename_directory(&absolute(to)?, &name_of(from)?, ctx)
                    .await?;
                state.rebase_paths(&back.from, &back.to);
            }
            HistoryEntry::MoveDirectory { from, to } => {
                let back = gateway
                    .move_directory(&absolute(to)?, &parent_of(from)?, ctx)
                    .await?;
                state.rebase_paths(&back.from, &back.to);
            }
            HistoryEntry::CopyDirectory { created, .. } => {
                let deleted = gateway
                    .delete_directory_with_policy(
                        &absolute(created)?,
                        DirectoryDeletePolicy::RecursiveDelete,
                        ctx,
                    )
                    .await?;
                state.forget_paths_under(&deleted);
            }
            HistoryEntry::RenameFile { from, to } => {
                let back = gateway.rename_file(&absolute(to)?, &name_of(from)?, ctx).await?;
                state.rebase_paths(&back.from, &back.to);
            }
            HistoryEntry::MoveFile { from, to } => {
                let back = gateway.move_file(&absolute(to)?, &parent_of(from)?, ctx).await?;
                state.rebase_paths(&back.from, &back.to);
            }
            HistoryEntry::CopyFile { created, .. } => {
                let deleted = gateway.delete_file(&absolute(created)?, ctx).await?;
                state.forget_paths_under(&deleted);
            }
            HistoryEntry::AssignTag { path, tag } => {
                gateway.remove_tag(&absolute(path)?, tag.name(), ctx).await?;
            }
            HistoryEntry::RemoveTag { path, tag } => {
                gateway.assign_tag(&absolute(path)?, tag.name(), ctx).await?;
            }
            HistoryEntry::ChangeSort { previous, .. } => {
                state.current_sort_state = *previous;
            }
        }
        Ok(entry)
    }

    /// Runs `entry` forward again. Copies may land on a different name than
    /// the first time, so the returned entry records what was created. `None`
    /// when the step overwrote a file and so has no inverse.
    async fn redo(
        &self,
        state: &mut SessionState,
        entry: HistoryEntry,
        ctx: &mut CommandContext,
    ) -> Result<Option<HistoryEntry>, GatewayError> {
        let gateway = &self.gateway;
        let entry = match entry {
            HistoryEntry::CreateDirectory { path } => {
                let (parent, name) = parent_and_name(&path)?;
                let created = gateway.create_directory(&parent, &name, ctx).await?;
                HistoryEntry::CreateDirectory {
                    path: created.to_string(),
                }
            }
            HistoryEntry::RenameDirectory { from, to } => {
                let again = gateway
                    .rename_directory(&absolute(&from)?, &name_of(&to)?, ctx)
                    .await?;
                state.rebase_paths(&again.from, &again.to);
                HistoryEntry::RenameDirectory { from, to }
            }
            HistoryEntry::MoveDirectory { from, to } => {
                let again = gateway
                    .move_directory(&absolute(&from)?, &parent_of(&to)?, ctx)
                    .await?;
                state.rebase_paths(&again.from, &again.to);
                HistoryEntry::MoveDirectory { from, to }
            }
            HistoryEntry::CopyDirectory { source, created } => {
                let created = gateway
                    .copy_directory(&absolute(&source)?, &parent_of(&created)?, ctx)
                    .await?;
                HistoryEntry::CopyDirectory {
                    source,
                    created: created.to_string(),
                }
            }
            HistoryEntry::RenameFile { from, to } => {
                let again = gateway
                    .rename_file(&absolute(&from)?, &name_of(&to)?, ctx)
                    .await?;
                state.rebase_paths(&again.from, &again.to);
                HistoryEntry::RenameFile { from, to }
            }
            HistoryEntry::MoveFile { from, to } => {
                let again = gateway
                    .move_file(&absolute(&from)?, &parent_of(&to)?, ctx)
                    .await?;
                state.rebase_paths(&again.from, &again.to);
                HistoryEntry::MoveFile { from, to }
            }
            HistoryEntry::CopyFile { source, created } => {
                let copy = gateway
                    .copy_file(&absolute(&source)?, &parent_of(&created)?, ctx)
                    .await?;
                if copy.replaced {
                    return Ok(None);
                }
                HistoryEntry::CopyFile {
                    source,
                    created: copy.path.to_string(),
                }
            }
            HistoryEntry::AssignTag { path, tag } => {
                gateway.assign_tag(&absolute(&path)?, tag.name(), ctx).await?;
                HistoryEntry::AssignTag { path, tag }
            }
            HistoryEntry::RemoveTag { path, tag } => {
                gateway.remove_tag(&absolute(&path)?, tag.name(), ctx).await?;
                HistoryEntry::RemoveTag { path, tag }
            }
            HistoryEntry::ChangeSort { previous, next } => {
                state.current_sort_state = next;
                HistoryEntry::ChangeSort { previous, next }
            }
        };
        Ok(Some(entry))
    }
}
