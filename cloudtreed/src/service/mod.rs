//! Caller-facing façade over the gateway. Every command takes plain string
//! paths and answers with a [`CommandResult`]; errors never escape as `Err`.

use std::sync::Arc;

use cloudtree_core::{
    DirectoryEntry, ExportTarget, FileKind, NodeKind, Tag, TreePath, format_bytes,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ExportSettings;
use crate::gateway::{
    CommandContext, ConsistencyGateway, Download, GatewayError, Relocation, TagChange,
    UploadSource,
};
use crate::storage::PhysicalError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T> {
    pub success: bool,
    pub message: String,
    pub error_code: Option<String>,
    pub payload: Option<T>,
    pub log: Vec<String>,
}

impl<T> CommandResult<T> {
    fn succeeded(message: String, payload: T, log: Vec<String>) -> Self {
        Self {
            success: true,
            message,
            error_code: None,
            payload: Some(payload),
            log,
        }
    }

    fn failed(err: &GatewayError, log: Vec<String>) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            error_code: Some(err.code().to_string()),
            payload: None,
            log,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Moved {
    pub from: String,
    pub to: String,
    pub changed: bool,
}

impl From<Relocation> for Moved {
    fn from(relocation: Relocation) -> Self {
        Self {
            changed: !relocation.is_noop(),
            from: relocation.from.to_string(),
            to: relocation.to.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDownload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl From<Download> for FileDownload {
    fn from(download: Download) -> Self {
        Self {
            file_name: download.file_name,
            content_type: download.content_type.to_string(),
            bytes: download.bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeSummary {
    pub path: String,
    pub bytes: u64,
    pub formatted: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedNode {
    pub path: String,
    pub kind: NodeKind,
    pub tag: Tag,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagUpdate {
    pub path: String,
    pub kind: NodeKind,
    pub tag: Tag,
    pub changed: bool,
}

impl From<TagChange> for TagUpdate {
    fn from(change: TagChange) -> Self {
        Self {
            path: change.node.path.to_string(),
            kind: change.node.kind,
            tag: change.tag,
            changed: change.changed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftSummary {
    pub checked: usize,
    pub missing: Vec<String>,
    pub metadata_matches: bool,
}

fn parse(raw: &str) -> Result<TreePath, GatewayError> {
    Ok(TreePath::parse(raw)?)
}

fn finish<T, U>(
    operation: &'static str,
    outcome: Result<T, GatewayError>,
    log: Vec<String>,
    present: impl FnOnce(T) -> (String, U),
) -> CommandResult<U> {
    match outcome {
        Ok(value) => {
            let (message, payload) = present(value);
            CommandResult::succeeded(message, payload, log)
        }
        Err(err) => failure(operation, err, log),
    }
}

fn failure<U>(operation: &'static str, err: GatewayError, log: Vec<String>) -> CommandResult<U> {
    warn!(operation, code = err.code(), %err, "command failed");
    CommandResult::failed(&err, log)
}

pub struct CommandService {
    gateway: Arc<ConsistencyGateway>,
    export: ExportSettings,
    shutdown: CancellationToken,
}

impl CommandService {
    pub fn new(gateway: Arc<ConsistencyGateway>, export: ExportSettings) -> Self {
        Self {
            gateway,
            export,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn gateway(&self) -> &Arc<ConsistencyGateway> {
        &self.gateway
    }

    /// Cancelling this token cancels every command in flight.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn context(&self) -> CommandContext {
        CommandContext::new(self.shutdown.child_token())
    }

    pub async fn create_directory(&self, parent: &str, name: &str) -> CommandResult<String> {
        let mut ctx = self.context();
        let outcome = async {
            let parent = parse(parent)?;
            self.gateway.create_directory(&parent, name, &mut ctx).await
        }
        .await;
        finish("create directory", outcome, ctx.into_log(), |path| {
            (format!("Directory {path} created"), path.to_string())
        })
    }

    pub async fn move_directory(&self, source: &str, target_parent: &str) -> CommandResult<Moved> {
        let mut ctx = self.context();
        let outcome = async {
            let source = parse(source)?;
            let target = parse(target_parent)?;
            self.gateway.move_directory(&source, &target, &mut ctx).await
        }
        .await;
        finish("move directory", outcome, ctx.into_log(), |moved| {
            (format!("Directory moved to {}", moved.to), moved.into())
        })
    }

    pub async fn rename_directory(&self, path: &str, new_name: &str) -> CommandResult<Moved> {
        let mut ctx = self.context();
        let outcome = async {
            let path = parse(path)?;
            self.gateway.rename_directory(&path, new_name, &mut ctx).await
        }
        .await;
        finish("rename directory", outcome, ctx.into_log(), |renamed| {
            (format!("Directory renamed to {}", renamed.to), renamed.into())
        })
    }

    pub async fn delete_directory(&self, path: &str) -> CommandResult<String> {
        let mut ctx = self.context();
        let outcome = async {
            let path = parse(path)?;
            self.gateway.delete_directory(&path, &mut ctx).await
        }
        .await;
        finish("delete directory", outcome, ctx.into_log(), |path| {
            (format!("Directory {path} deleted"), path.to_string())
        })
    }

    pub async fn copy_directory(&self, source: &str, target_parent: &str) -> CommandResult<String> {
        let mut ctx = self.context();
        let outcome = async {
            let source = parse(source)?;
            let target = parse(target_parent)?;
            self.gateway.copy_directory(&source, &target, &mut ctx).await
        }
        .await;
        finish("copy directory", outcome, ctx.into_log(), |path| {
            (format!("Directory copied to {path}"), path.to_string())
        })
    }

    pub async fn upload_file(
        &self,
        directory: &str,
        name: &str,
        source: UploadSource,
        kind: FileKind,
    ) -> CommandResult<String> {
        let mut ctx = self.context();
        let outcome = async {
            let directory = parse(directory)?;
            self.gateway
                .upload_file(&directory, name, source, kind, &mut ctx)
                .await
        }
        .await;
        finish("upload file", outcome, ctx.into_log(), |path| {
            (format!("File {path} uploaded"), path.to_string())
        })
    }

    pub async fn move_file(&self, source: &str, target_directory: &str) -> CommandResult<Moved> {
        let mut ctx = self.context();
        let outcome = async {
            let source = parse(source)?;
            let target = parse(target_directory)?;
            self.gateway.move_file(&source, &target, &mut ctx).await
        }
        .await;
        finish("move file", outcome, ctx.into_log(), |moved| {
            (format!("File moved to {}", moved.to), moved.into())
        })
    }

    pub async fn rename_file(&self, path: &str, new_name: &str) -> CommandResult<Moved> {
        let mut ctx = self.context();
        let outcome = async {
            let path = parse(path)?;
            self.gateway.rename_file(&path, new_name, &mut ctx).await
        }
        .await;
        finish("rename file", outcome, ctx.into_log(), |renamed| {
            (format!("File renamed to {}", renamed.to), renamed.into())
        })
    }

    pub async fn delete_file(&self, path: &str) -> CommandResult<String> {
        let mut ctx = self.context();
        let outcome = async {
            let path = parse(path)?;
            self.gateway.delete_file(&path, &mut ctx).await
        }
        .await;
        finish("delete file", outcome, ctx.into_log(), |path| {
            (format!("File {path} deleted"), path.to_string())
        })
    }

    pub async fn copy_file(&self, source: &str, target_directory: &str) -> CommandResult<String> {
        let mut ctx = self.context();
        let outcome = async {
            let source = parse(source)?;
            let target = parse(target_directory)?;
            self.gateway.copy_file(&source, &target, &mut ctx).await
        }
        .await;
        finish("copy file", outcome, ctx.into_log(), |copy| {
            let message = if copy.replaced {
                format!("File copied to {}, replacing the existing file", copy.path)
            } else {
                format!("File copied to {}", copy.path)
            };
            (message, copy.path.to_string())
        })
    }

    pub async fn download_file(&self, path: &str) -> CommandResult<FileDownload> {
        let outcome = async {
            let path = parse(path)?;
            self.gateway.download_file(&path).await
        }
        .await;
        finish("download file", outcome, Vec::new(), |download| {
            (
                format!(
                    "Downloaded {} ({})",
                    download.file_name,
                    format_bytes(download.bytes.len() as u64)
                ),
                download.into(),
            )
        })
    }

    pub async fn tree(&self) -> CommandResult<Vec<String>> {
        let lines = self.gateway.tree_lines().await;
        CommandResult::succeeded(format!("{} node(s)", lines.len()), lines, Vec::new())
    }

    pub async fn total_size(&self, path: &str) -> CommandResult<SizeSummary> {
        let outcome = async {
            let path = parse(path)?;
            self.gateway.total_size(&path).await
        }
        .await;
        match outcome {
            Ok(report) => CommandResult::succeeded(
                format!("Total size of {}: {}", report.path, report.formatted),
                SizeSummary {
                    path: report.path.to_string(),
                    bytes: report.bytes,
                    formatted: report.formatted,
                },
                report.trace,
            ),
            Err(err) => failure("total size", err, Vec::new()),
        }
    }

    pub async fn search_by_extension(
        &self,
        extension: &str,
        scope: &str,
    ) -> CommandResult<Vec<String>> {
        let outcome = async {
            let scope = parse(scope)?;
            self.gateway.search_by_extension(extension, &scope).await
        }
        .await;
        match outcome {
            Ok(report) => CommandResult::succeeded(
                format!("{} match(es)", report.matches.len()),
                report.matches.iter().map(ToString::to_string).collect(),
                report.trace,
            ),
            Err(err) => failure("search by extension", err, Vec::new()),
        }
    }

    /// Renders the tree as XML and, for the `File` target, also writes it to
    /// the configured path.
    pub async fn export_xml(&self) -> CommandResult<String> {
        let xml = self.gateway.export_xml().await;
        let mut log = Vec::new();
        let outcome = match (self.export.target, &self.export.path) {
            (ExportTarget::File, Some(path)) => {
                let written = async {
                    if let Some(parent) = path.parent()
                        && !parent.as_os_str().is_empty()
                    {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(path, xml.as_bytes()).await
                }
                .await;
                match written {
                    Ok(()) => {
                        log.push(format!("Exported XML to {}", path.display()));
                        info!(path = %path.display(), bytes = xml.len(), "tree exported");
                        Ok(format!("Exported XML to {}", path.display()))
                    }
                    Err(source) => Err(GatewayError::Physical(PhysicalError::Io {
                        path: path.clone(),
                        source,
                    })),
                }
            }
            _ => Ok("Exported XML".to_string()),
        };
        finish("export xml", outcome, log, |message| (message, xml))
    }

    pub async fn assign_tag(&self, path: &str, tag: &str) -> CommandResult<TagUpdate> {
        let mut ctx = self.context();
        let outcome = async {
            let path = parse(path)?;
            self.gateway.assign_tag(&path, tag, &mut ctx).await
        }
        .await;
        finish("assign tag", outcome, ctx.into_log(), |change| {
            let message = if change.changed {
                format!("Tag {} assigned to {}", change.tag, change.node.path)
            } else {
                format!("{} already has tag {}", change.node.path, change.tag)
            };
            (message, change.into())
        })
    }

    pub async fn remove_tag(&self, path: &str, tag: &str) -> CommandResult<TagUpdate> {
        let mut ctx = self.context();
        let outcome = async {
            let path = parse(path)?;
            self.gateway.remove_tag(&path, tag, &mut ctx).await
        }
        .await;
        finish("remove tag", outcome, ctx.into_log(), |change| {
            let message = if change.changed {
                format!("Tag {} removed from {}", change.tag, change.node.path)
            } else {
                format!("{} does not have tag {}", change.node.path, change.tag)
            };
            (message, change.into())
        })
    }

    pub async fn list_tags(&self, scope: Option<&str>) -> CommandResult<Vec<TaggedNode>> {
        let outcome = async {
            let scope = scope.map(parse).transpose()?;
            self.gateway.list_tags(scope.as_ref()).await
        }
        .await;
        finish("list tags", outcome, Vec::new(), |tags| {
            let nodes: Vec<TaggedNode> = tags
                .into_iter()
                .map(|entry| TaggedNode {
                    path: entry.node.path.to_string(),
                    kind: entry.node.kind,
                    tag: entry.tag,
                    color: entry.tag.color(),
                })
                .collect();
            (format!("{} tag assignment(s)", nodes.len()), nodes)
        })
    }

    pub async fn find_tagged_paths(
        &self,
        tag: &str,
        scope: Option<&str>,
    ) -> CommandResult<Vec<String>> {
        let outcome = async {
            let scope = scope.map(parse).transpose()?;
            self.gateway.find_tagged_paths(tag, scope.as_ref()).await
        }
        .await;
        finish("find tagged paths", outcome, Vec::new(), |paths| {
            let paths: Vec<String> = paths.iter().map(ToString::to_string).collect();
            (format!("{} tagged node(s)", paths.len()), paths)
        })
    }

    pub async fn list_directory(&self, path: &str) -> CommandResult<Vec<DirectoryEntry>> {
        let outcome = async {
            let path = parse(path)?;
            self.gateway.list_directory(&path).await
        }
        .await;
        finish("list directory", outcome, Vec::new(), |listing| {
            (
                format!("{} entr(ies) in {}", listing.entries.len(), listing.path),
                listing.entries,
            )
        })
    }

    pub async fn verify(&self) -> CommandResult<DriftSummary> {
        let outcome = self.gateway.verify().await;
        finish("verify", outcome, Vec::new(), |report| {
            let message = if report.is_clean() {
                format!("{} node(s) checked, stores agree", report.checked)
            } else {
                format!(
                    "{} node(s) checked, {} missing on disk, metadata {}",
                    report.checked,
                    report.missing.len(),
                    if report.metadata_matches { "matches" } else { "differs" }
                )
            };
            (
                message,
                DriftSummary {
                    checked: report.checked,
                    missing: report.missing,
                    metadata_matches: report.metadata_matches,
                },
            )
        })
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
