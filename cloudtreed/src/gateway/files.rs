use std::path::PathBuf;

use cloudtree_core::{
    CloudDirectory, CloudFile, FileConflictPolicy, FileKind, FileType, TreeError, TreePath,
    format_bytes, names_equal, next_available_name, validate_name,
};
use tracing::info;

use super::saga::Compensation;
use super::{
    CommandContext, ConsistencyGateway, GatewayError, Relocation, directory_mut, locate_directory,
    locate_file, now, split,
};

/// Upload payload: bytes carried by the request or a file on the local disk.
#[derive(Debug, Clone)]
pub enum UploadSource {
    Bytes(Vec<u8>),
    LocalPath(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub file_name: String,
}

/// Where a copied file landed. `replaced` is set when the Overwrite policy
/// removed an existing file of the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCopy {
    pub path: TreePath,
    pub replaced: bool,
}

/// Final name of an incoming file and the existing file it replaces, if any.
struct Placement {
    name: String,
    replaces: Option<String>,
}

fn place_file(
    dir: &CloudDirectory,
    dir_path: &TreePath,
    name: &str,
    policy: FileConflictPolicy,
) -> Result<Placement, GatewayError> {
    let Some(existing) = dir.file(name) else {
        return Ok(Placement {
            name: name.to_string(),
            replaces: None,
        });
    };
    match policy {
        FileConflictPolicy::Reject => Err(TreeError::NameConflict(format!(
            "file '{name}' already exists in {dir_path}"
        ))
        .into()),
        FileConflictPolicy::Overwrite => Ok(Placement {
            name: name.to_string(),
            replaces: Some(existing.name().to_string()),
        }),
        FileConflictPolicy::Rename => Ok(Placement {
            name: next_available_name(name, |candidate| dir.file(candidate).is_some()),
            replaces: None,
        }),
    }
}

fn content_type_for(file: &CloudFile) -> &'static str {
    let by_extension = file.extension().map(str::to_ascii_lowercase);
    match by_extension.as_deref() {
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("doc") => "application/msword",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("svg") => "image/svg+xml",
        Some("txt" | "log") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        _ => match file.file_type() {
            FileType::Text => "text/plain",
            FileType::Word | FileType::Image => "application/octet-stream",
        },
    }
}

impl ConsistencyGateway {
    async fn read_upload(&self, source: UploadSource) -> Result<Vec<u8>, GatewayError> {
        let limit = self.policies.max_upload_bytes;
        let too_large = |size: u64| {
            TreeError::validation(format!(
                "upload of {} exceeds the {} limit",
                format_bytes(size),
                format_bytes(limit)
            ))
        };
        let bytes = match source {
            UploadSource::Bytes(bytes) => bytes,
            UploadSource::LocalPath(path) => {
                let metadata = tokio::fs::metadata(&path).await.map_err(|err| {
                    TreeError::validation(format!(
                        "upload source {} is not readable: {err}",
                        path.display()
                    ))
                })?;
                if !metadata.is_file() {
                    return Err(TreeError::validation(format!(
                        "upload source {} is not a file",
                        path.display()
                    ))
                    .into());
                }
                if metadata.len() > limit {
                    return Err(too_large(metadata.len()).into());
                }
                tokio::fs::read(&path).await.map_err(|err| {
                    TreeError::validation(format!(
                        "upload source {} is not readable: {err}",
                        path.display()
                    ))
                })?
            }
        };
        if bytes.len() as u64 > limit {
            return Err(too_large(bytes.len() as u64).into());
        }
        Ok(bytes)
    }

    pub async fn upload_file(
        &self,
        directory: &TreePath,
        name: &str,
        source: UploadSource,
        kind: FileKind,
        ctx: &mut CommandContext,
    ) -> Result<TreePath, GatewayError> {
        let name = validate_name(name)?;
        kind.validate()?;
        let bytes = self.read_upload(source).await?;

        let mut tree = self.tree.write().await;
        let (dir_path, dir) = locate_directory(&tree, directory)?;
        let placement = place_file(dir, &dir_path, &name, self.policies.file_conflict)?;
        let file = CloudFile::new(&placement.name, bytes.len() as u64, now(), kind)?;
        let path = dir_path.join(file.name());
        ctx.ensure_active()?;

        let mut saga = self.saga("upload file");
        if let Some(existing) = &placement.replaces {
            let existing_path = dir_path.join(existing);
            let token = saga.run(ctx, self.physical.stash(&existing_path)).await?;
            saga.stashed(token, existing_path);
            saga.checkpoint(ctx).await?;
        }
        saga.run(ctx, self.physical.write_file(&path, &bytes)).await?;
        saga.record(Compensation::RemoveFile(path.clone()));
        saga.checkpoint(ctx).await?;
        if placement.replaces.is_some() {
            saga.run(ctx, self.metadata.replace_file(&dir_path, &file))
                .await?;
        } else {
            saga.run(ctx, self.metadata.insert_file(&dir_path, &file))
                .await?;
        }

        let size = file.size();
        let dir = directory_mut(&mut tree, &dir_path)?;
        if let Some(existing) = &placement.replaces {
            dir.remove_file(existing);
        }
        dir.add_file(file)?;
        saga.commit(ctx).await;
        match &placement.replaces {
            Some(existing) => ctx.trace(format!(
                "Overwrote {} with {path} ({})",
                dir_path.join(existing),
                format_bytes(size)
            )),
            None => ctx.trace(format!("Uploaded {path} ({})", format_bytes(size))),
        }
        info!(%path, size, "file uploaded");
        Ok(path)
    }

    pub async fn download_file(&self, path: &TreePath) -> Result<Download, GatewayError> {
        let tree = self.tree.read().await;
        let (path, file) = locate_file(&tree, path)?;
        let bytes = self.physical.read_file(&path).await?;
        Ok(Download {
            bytes,
            content_type: content_type_for(file),
            file_name: file.name().to_string(),
        })
    }

    pub async fn rename_file(
        &self,
        path: &TreePath,
        new_name: &str,
        ctx: &mut CommandContext,
    ) -> Result<Relocation, GatewayError> {
        let mut tree = self.tree.write().await;
        let (from, _) = locate_file(&tree, path)?;
        let new_name = validate_name(new_name)?;
        let (parent, old_name) = split(&from)?;
        if old_name == new_name {
            return Ok(Relocation::unchanged(from));
        }
        let (_, parent_node) = locate_directory(&tree, &parent)?;
        if let Some(existing) = parent_node.file(&new_name)
            && !names_equal(existing.name(), &old_name)
        {
            return Err(TreeError::NameConflict(format!(
                "file '{new_name}' already exists in {parent}"
            ))
            .into());
        }
        let to = parent.join(&new_name);
        ctx.ensure_active()?;

        let mut saga = self.saga("rename file");
        saga.run(ctx, self.physical.rename(&from, &to)).await?;
        saga.record(Compensation::MoveBack {
            from: to.clone(),
            to: from.clone(),
        });
        saga.checkpoint(ctx).await?;
        saga.run(ctx, self.metadata.relocate_file(&from, &parent, &new_name))
            .await?;

        directory_mut(&mut tree, &parent)?.rename_file(&old_name, &new_name)?;
        saga.commit(ctx).await;
        ctx.trace(format!("Renamed file {from} -> {to}"));
        info!(%from, %to, "file renamed");
        Ok(Relocation { from, to })
    }

    pub async fn move_file(
        &self,
        source: &TreePath,
        target_directory: &TreePath,
        ctx: &mut CommandContext,
    ) -> Result<Relocation, GatewayError> {
        let mut tree = self.tree.write().await;
        let (from, _) = locate_file(&tree, source)?;
        let (target, target_node) = locate_directory(&tree, target_directory)?;
        let (parent, name) = split(&from)?;
        if target.same_as(&parent) {
            ctx.trace(format!("File {from} is already in {target}"));
            return Ok(Relocation::unchanged(from));
        }
        if target_node.file(&name).is_some() {
            return Err(TreeError::NameConflict(format!(
                "file '{name}' already exists in {target}"
            ))
            .into());
        }
        let to = target.join(&name);
        ctx.ensure_active()?;

        let mut saga = self.saga("move file");
        saga.run(ctx, self.physical.rename(&from, &to)).await?;
        saga.record(Compensation::MoveBack {
            from: to.clone(),
            to: from.clone(),
        });
        saga.checkpoint(ctx).await?;
        saga.run(ctx, self.metadata.relocate_file(&from, &target, &name))
            .await?;

        let file = directory_mut(&mut tree, &parent)?
            .remove_file(&name)
            .ok_or_else(|| TreeError::not_found(format!("file {from} does not exist")))?;
        directory_mut(&mut tree, &target)?.add_file(file)?;
        saga.commit(ctx).await;
        ctx.trace(format!("Moved file {from} -> {to}"));
        info!(%from, %to, "file moved");
        Ok(Relocation { from, to })
    }

    pub async fn delete_file(
        &self,
        path: &TreePath,
        ctx: &mut CommandContext,
    ) -> Result<TreePath, GatewayError> {
        let mut tree = self.tree.write().await;
        let (path, _) = locate_file(&tree, path)?;
        let (parent, name) = split(&path)?;
        ctx.ensure_active()?;

        let mut saga = self.saga("delete file");
        let token = saga.run(ctx, self.physical.stash(&path)).await?;
        saga.stashed(token, path.clone());
        saga.checkpoint(ctx).await?;
        saga.run(ctx, self.metadata.delete_file(&path)).await?;

        directory_mut(&mut tree, &parent)?.remove_file(&name);
        saga.commit(ctx).await;
        ctx.trace(format!("Deleted file {path}"));
        info!(%path, "file deleted");
        Ok(path)
    }

    pub async fn copy_file(
        &self,
        source: &TreePath,
        target_directory: &TreePath,
        ctx: &mut CommandContext,
    ) -> Result<FileCopy, GatewayError> {
        let mut tree = self.tree.write().await;
        let (from, file) = locate_file(&tree, source)?;
        let (target, target_node) = locate_directory(&tree, target_directory)?;
        let (parent, _) = split(&from)?;
        let placement = place_file(target_node, &target, file.name(), self.policies.file_conflict)?;
        if placement.replaces.is_some() && target.same_as(&parent) {
            return Err(TreeError::validation(format!("cannot overwrite {from} with itself")).into());
        }
        let copy = file.duplicate(&placement.name, now())?;
        let path = target.join(copy.name());
        ctx.ensure_active()?;

        let mut saga = self.saga("copy file");
        if let Some(existing) = &placement.replaces {
            let existing_path = target.join(existing);
            let token = saga.run(ctx, self.physical.stash(&existing_path)).await?;
            saga.stashed(token, existing_path);
            saga.checkpoint(ctx).await?;
        }
        saga.run(ctx, self.physical.copy_file(&from, &path)).await?;
        saga.record(Compensation::RemoveFile(path.clone()));
        saga.checkpoint(ctx).await?;
        if placement.replaces.is_some() {
            saga.run(ctx, self.metadata.replace_file(&target, &copy)).await?;
        } else {
            saga.run(ctx, self.metadata.insert_file(&target, &copy)).await?;
        }

        let dir = directory_mut(&mut tree, &target)?;
        if let Some(existing) = &placement.replaces {
            dir.remove_file(existing);
        }
        dir.add_file(copy)?;
        saga.commit(ctx).await;
        let replaced = placement.replaces.is_some();
        ctx.trace(format!("Copied file {from} -> {path}"));
        info!(%from, to = %path, replaced, "file copied");
        Ok(FileCopy { path, replaced })
    }
}
