use cloudtree_core::{
    CloudDirectory, CloudFile, DirectoryDeletePolicy, FileConflictPolicy, TreeError, TreePath,
    TreeVisit, names_equal, next_available_name, validate_name,
};
use time::{Duration, OffsetDateTime};
use tracing::info;

use super::saga::Compensation;
use super::{
    COPY_DIRECTORY, CommandContext, ConsistencyGateway, GatewayError, Relocation, directory_mut,
    locate_directory, now, split,
};

/// One node of a directory copy, in pre-order.
enum CopyStep {
    Directory {
        source: TreePath,
        parent: TreePath,
        name: String,
        created: OffsetDateTime,
    },
    File {
        source: TreePath,
        parent: TreePath,
        file: CloudFile,
    },
}

fn copy_plan(
    node: &CloudDirectory,
    from: &TreePath,
    dest: &TreePath,
    base: OffsetDateTime,
) -> Result<Vec<CopyStep>, GatewayError> {
    let mut visits = Vec::new();
    node.walk(from, &mut |visit| visits.push(visit));

    let mut plan = Vec::with_capacity(visits.len());
    for (index, visit) in visits.into_iter().enumerate() {
        let created = base + Duration::nanoseconds(index as i64);
        let target = visit
            .path()
            .rebase(from, dest)
            .ok_or_else(|| TreeError::validation(format!("{} is outside {from}", visit.path())))?;
        let (parent, name) = split(&target)?;
        plan.push(match visit {
            TreeVisit::Directory { path, .. } => CopyStep::Directory {
                source: path,
                parent,
                name,
                created,
            },
            TreeVisit::File { path, node } => CopyStep::File {
                source: path,
                parent,
                file: node.duplicate(&name, created)?,
            },
        });
    }
    Ok(plan)
}

impl ConsistencyGateway {
    pub async fn create_directory(
        &self,
        parent: &TreePath,
        name: &str,
        ctx: &mut CommandContext,
    ) -> Result<TreePath, GatewayError> {
        let mut tree = self.tree.write().await;
        let (parent, parent_node) = locate_directory(&tree, parent)?;
        let name = validate_name(name)?;
        if parent_node.directory(&name).is_some() {
            return Err(TreeError::NameConflict(format!(
                "directory '{name}' already exists in {parent}"
            ))
            .into());
        }
        let path = parent.join(&name);
        let created = now();
        ctx.ensure_active()?;

        let mut saga = self.saga("create directory");
        saga.run(ctx, self.physical.create_dir(&path)).await?;
        saga.record(Compensation::RemoveDirectory(path.clone()));
        saga.checkpoint(ctx).await?;
        saga.run(ctx, self.metadata.insert_directory(&parent, &name, created))
            .await?;

        directory_mut(&mut tree, &parent)?.add_directory(&name, created)?;
        saga.commit(ctx).await;
        ctx.trace(format!("Created directory {path}"));
        info!(%path, "directory created");
        Ok(path)
    }

    /// Deletes under the configured delete policy.
    pub async fn delete_directory(
        &self,
        path: &TreePath,
        ctx: &mut CommandContext,
    ) -> Result<TreePath, GatewayError> {
        self.delete_directory_with_policy(path, self.policies.directory_delete, ctx)
            .await
    }

    pub async fn delete_directory_with_policy(
        &self,
        path: &TreePath,
        policy: DirectoryDeletePolicy,
        ctx: &mut CommandContext,
    ) -> Result<TreePath, GatewayError> {
        let mut tree = self.tree.write().await;
        let (path, node) = locate_directory(&tree, path)?;
        if path.is_root() {
            return Err(TreeError::validation("the root directory cannot be deleted").into());
        }
        let (directories, files) = node.count_descendants();
        if !node.is_empty() && policy == DirectoryDeletePolicy::ForbidNonEmpty {
            return Err(TreeError::PolicyViolation(format!(
                "directory {path} is not empty ({directories} directories, {files} files)"
            ))
            .into());
        }
        let (parent, name) = split(&path)?;
        ctx.ensure_active()?;

        let mut saga = self.saga("delete directory");
        let token = saga.run(ctx, self.physical.stash(&path)).await?;
        saga.stashed(token, path.clone());
        saga.checkpoint(ctx).await?;
        saga.run(ctx, self.metadata.delete_directory(&path)).await?;

        directory_mut(&mut tree, &parent)?.remove_directory(&name);
        saga.commit(ctx).await;
        ctx.trace(format!(
            "Deleted directory {path} ({directories} directories, {files} files)"
        ));
        info!(%path, directories, files, "directory deleted");
        Ok(path)
    }

    pub async fn rename_directory(
        &self,
        path: &TreePath,
        new_name: &str,
        ctx: &mut CommandContext,
    ) -> Result<Relocation, GatewayError> {
        let mut tree = self.tree.write().await;
        let (from, _) = locate_directory(&tree, path)?;
        if from.is_root() {
            return Err(TreeError::validation("the root directory cannot be renamed").into());
        }
        let new_name = validate_name(new_name)?;
        let (parent, old_name) = split(&from)?;
        if old_name == new_name {
            return Ok(Relocation::unchanged(from));
        }
        let (_, parent_node) = locate_directory(&tree, &parent)?;
        if let Some(existing) = parent_node.directory(&new_name)
            && !names_equal(existing.name(), &old_name)
        {
            return Err(TreeError::NameConflict(format!(
                "directory '{new_name}' already exists in {parent}"
            ))
            .into());
        }
        let to = parent.join(&new_name);
        ctx.ensure_active()?;

        let mut saga = self.saga("rename directory");
        saga.run(ctx, self.physical.rename(&from, &to)).await?;
        saga.record(Compensation::MoveBack {
            from: to.clone(),
            to: from.clone(),
        });
        saga.checkpoint(ctx).await?;
        saga.run(ctx, self.metadata.relocate_directory(&from, &parent, &new_name))
            .await?;

        directory_mut(&mut tree, &parent)?.rename_directory(&old_name, &new_name)?;
        saga.commit(ctx).await;
        ctx.trace(format!("Renamed directory {from} -> {to}"));
        info!(%from, %to, "directory renamed");
        Ok(Relocation { from, to })
    }

    pub async fn move_directory(
        &self,
        source: &TreePath,
        target_parent: &TreePath,
        ctx: &mut CommandContext,
    ) -> Result<Relocation, GatewayError> {
        let mut tree = self.tree.write().await;
        let (from, _) = locate_directory(&tree, source)?;
        if from.is_root() {
            return Err(TreeError::validation("the root directory cannot be moved").into());
        }
        let (target, target_node) = locate_directory(&tree, target_parent)?;
        if target.is_same_or_descendant_of(&from) {
            return Err(TreeError::validation(format!(
                "cannot move {from} into itself or its descendant {target}"
            ))
            .into());
        }
        let (parent, name) = split(&from)?;
        if target.same_as(&parent) {
            ctx.trace(format!("Directory {from} is already in {target}"));
            return Ok(Relocation::unchanged(from));
        }
        if target_node.directory(&name).is_some() {
            return Err(TreeError::NameConflict(format!(
                "directory '{name}' already exists in {target}"
            ))
            .into());
        }
        let to = target.join(&name);
        ctx.ensure_active()?;

        let mut saga = self.saga("move directory");
        saga.run(ctx, self.physical.rename(&from, &to)).await?;
        saga.record(Compensation::MoveBack {
            from: to.clone(),
            to: from.clone(),
        });
        saga.checkpoint(ctx).await?;
        saga.run(ctx, self.metadata.relocate_directory(&from, &target, &name))
            .await?;

        let node = directory_mut(&mut tree, &parent)?
            .detach_directory(&name)
            .ok_or_else(|| TreeError::not_found(format!("directory {from} does not exist")))?;
        directory_mut(&mut tree, &target)?
            .attach_directory(node)
            .map_err(|rejected| rejected.error)?;
        saga.commit(ctx).await;
        ctx.trace(format!("Moved directory {from} -> {to}"));
        info!(%from, %to, "directory moved");
        Ok(Relocation { from, to })
    }

    /// Copies a subtree node by node. A name clash at the target follows the
    /// conflict policy: `Rename` picks `name(n)`, anything else conflicts.
    pub async fn copy_directory(
        &self,
        source: &TreePath,
        target_parent: &TreePath,
        ctx: &mut CommandContext,
    ) -> Result<TreePath, GatewayError> {
        let mut tree = self.tree.write().await;
        let (from, node) = locate_directory(&tree, source)?;
        let (target, target_node) = locate_directory(&tree, target_parent)?;
        if target.is_same_or_descendant_of(&from) {
            return Err(TreeError::validation(format!(
                "cannot copy {from} into itself or its descendant {target}"
            ))
            .into());
        }
        let mut name = node.name().to_string();
        if target_node.directory(&name).is_some() {
            if self.policies.file_conflict != FileConflictPolicy::Rename {
                return Err(TreeError::NameConflict(format!(
                    "directory '{name}' already exists in {target}"
                ))
                .into());
            }
            name = next_available_name(&name, |candidate| {
                target_node.directory(candidate).is_some()
            });
        }
        let dest = target.join(&name);
        let plan = copy_plan(node, &from, &dest, now())?;
        ctx.ensure_active()?;

        let mut saga = self.saga(COPY_DIRECTORY);
        for step in &plan {
            match step {
                CopyStep::Directory {
                    source,
                    parent,
                    name,
                    created,
                } => {
                    let path = parent.join(name);
                    saga.run(ctx, self.physical.create_dir(&path)).await?;
                    saga.record(Compensation::RemoveDirectory(path.clone()));
                    saga.checkpoint(ctx).await?;
                    saga.run(ctx, self.metadata.insert_directory(parent, name, *created))
                        .await?;
                    saga.record(Compensation::DeleteDirectoryRow(path.clone()));
                    ctx.trace(format!("Copied directory: {source} -> {path}"));
                }
                CopyStep::File {
                    source,
                    parent,
                    file,
                } => {
                    let path = parent.join(file.name());
                    saga.run(ctx, self.physical.copy_file(source, &path)).await?;
                    saga.record(Compensation::RemoveFile(path.clone()));
                    saga.checkpoint(ctx).await?;
                    saga.run(ctx, self.metadata.insert_file(parent, file)).await?;
                    saga.record(Compensation::DeleteFileRow(path.clone()));
                    ctx.trace(format!("Copied file: {source} -> {path}"));
                }
            }
        }

        for step in plan {
            match step {
                CopyStep::Directory {
                    parent,
                    name,
                    created,
                    ..
                } => {
                    directory_mut(&mut tree, &parent)?.add_directory(&name, created)?;
                }
                CopyStep::File { parent, file, .. } => {
                    directory_mut(&mut tree, &parent)?.add_file(file)?;
                }
            }
        }
        saga.commit(ctx).await;
        info!(%from, to = %dest, "directory copied");
        Ok(dest)
    }
}
