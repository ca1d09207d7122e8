use std::future::Future;
use std::sync::Arc;

use cloudtree_core::TreePath;
use tracing::{error, warn};

use super::{CommandContext, GatewayError};
use crate::storage::{MetadataStore, PhysicalStore, StashToken};

/// Inverse of one completed step.
#[derive(Debug)]
pub(super) enum Compensation {
    RemoveFile(TreePath),
    RemoveDirectory(TreePath),
    MoveBack { from: TreePath, to: TreePath },
    Restore { token: StashToken, path: TreePath },
    DeleteDirectoryRow(TreePath),
    DeleteFileRow(TreePath),
}

impl Compensation {
    fn describe(&self) -> String {
        match self {
            Compensation::RemoveFile(path) => format!("remove file {path}"),
            Compensation::RemoveDirectory(path) => format!("remove directory {path}"),
            Compensation::MoveBack { from, to } => format!("move {from} back to {to}"),
            Compensation::Restore { token, path } => format!("restore {path} from staging {token}"),
            Compensation::DeleteDirectoryRow(path) => format!("delete directory row {path}"),
            Compensation::DeleteFileRow(path) => format!("delete file row {path}"),
        }
    }
}

/// Compensation log for one command. Steps are undone newest first.
pub(super) struct Saga {
    operation: &'static str,
    physical: Arc<dyn PhysicalStore>,
    metadata: Arc<dyn MetadataStore>,
    steps: Vec<Compensation>,
    stashed: Vec<StashToken>,
}

impl Saga {
    pub(super) fn new(
        operation: &'static str,
        physical: Arc<dyn PhysicalStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            operation,
            physical,
            metadata,
            steps: Vec::new(),
            stashed: Vec::new(),
        }
    }

    pub(super) fn record(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    /// A node moved into staging: restored on abort, purged on commit.
    pub(super) fn stashed(&mut self, token: StashToken, path: TreePath) {
        self.stashed.push(token.clone());
        self.steps.push(Compensation::Restore { token, path });
    }

    /// Awaits one forward step, unwinding everything recorded so far when it
    /// fails.
    pub(super) async fn run<T, E>(
        &mut self,
        ctx: &mut CommandContext,
        step: impl Future<Output = Result<T, E>>,
    ) -> Result<T, GatewayError>
    where
        E: Into<GatewayError>,
    {
        match step.await {
            Ok(value) => Ok(value),
            Err(err) => Err(self.abort(err.into(), ctx).await),
        }
    }

    pub(super) async fn checkpoint(&mut self, ctx: &mut CommandContext) -> Result<(), GatewayError> {
        if ctx.is_cancelled() {
            return Err(self.abort(GatewayError::Cancelled, ctx).await);
        }
        Ok(())
    }

    pub(super) async fn abort(
        &mut self,
        cause: GatewayError,
        ctx: &mut CommandContext,
    ) -> GatewayError {
        let mut failures = Vec::new();
        while let Some(step) = self.steps.pop() {
            let description = step.describe();
            match self.compensate(step).await {
                Ok(()) => ctx.trace(format!("Rolled back: {description}")),
                Err(err) => {
                    error!(operation = self.operation, step = %description, %err, "compensation failed");
                    ctx.trace(format!("Rollback step failed: {description}: {err}"));
                    failures.push(format!("{description}: {err}"));
                }
            }
        }
        self.stashed.clear();
        if failures.is_empty() {
            warn!(operation = self.operation, %cause, "rolled back");
            return cause;
        }
        error!(
            operation = self.operation,
            %cause,
            failures = failures.len(),
            "stores diverged, operator attention required"
        );
        GatewayError::RollbackFailed {
            operation: self.operation,
            cause: cause.to_string(),
            failures,
        }
    }

    async fn compensate(&self, step: Compensation) -> Result<(), GatewayError> {
        match step {
            Compensation::RemoveFile(path) => self.physical.remove_file(&path).await?,
            Compensation::RemoveDirectory(path) => self.physical.remove_dir_all(&path).await?,
            Compensation::MoveBack { from, to } => self.physical.rename(&from, &to).await?,
            Compensation::Restore { token, path } => self.physical.restore(&token, &path).await?,
            Compensation::DeleteDirectoryRow(path) => self.metadata.delete_directory(&path).await?,
            Compensation::DeleteFileRow(path) => self.metadata.delete_file(&path).await?,
        }
        Ok(())
    }

    /// Both stores agree: drop staged copies. Purge failures are logged only.
    pub(super) async fn commit(self, ctx: &mut CommandContext) {
        for token in &self.stashed {
            if let Err(err) = self.physical.purge(token).await {
                warn!(operation = self.operation, %token, %err, "staging cleanup failed");
                ctx.trace(format!("Cleanup of staged entry {token} skipped: {err}"));
            }
        }
    }
}
