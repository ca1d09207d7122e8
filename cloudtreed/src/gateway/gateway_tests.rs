use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use async_trait::async_trait;
use cloudtree_core::{
    CODE_DIRECTORY_COPY_ROLLBACK_FAILED, CODE_ROLLBACK_FAILED, DirectoryDeletePolicy, FileConflictPolicy,
    FileKind, NodeTag, Tag,
};
use tempfile::TempDir;

use super::*;
use crate::storage::{LocalDiskStore, SqliteMetadataStore, StashToken};

/// Fails an operation once its allowance of successful calls is used up,
/// and can cancel a token when an operation runs.
#[derive(Default)]
struct Faults {
    allowances: Mutex<HashMap<&'static str, usize>>,
    cancel_on: Mutex<Option<(&'static str, CancellationToken)>>,
}

impl Faults {
    fn fail(&self, op: &'static str, successes: usize) {
        self.allowances.lock().unwrap().insert(op, successes);
    }

    fn cancel_after(&self, op: &'static str, token: CancellationToken) {
        *self.cancel_on.lock().unwrap() = Some((op, token));
    }

    fn should_fail(&self, op: &'static str) -> bool {
        let mut allowances = self.allowances.lock().unwrap();
        match allowances.get_mut(op) {
            Some(0) => true,
            Some(left) => {
                *left -= 1;
                false
            }
            None => false,
        }
    }

    fn after(&self, op: &'static str) {
        if let Some((target, token)) = self.cancel_on.lock().unwrap().as_ref()
            && *target == op
        {
            token.cancel();
        }
    }
}

fn io_failure(op: &str) -> PhysicalError {
    PhysicalError::Io {
        path: op.into(),
        source: io::Error::other("injected failure"),
    }
}

fn sql_failure() -> MetadataError {
    MetadataError::Sqlx(sqlx::Error::Protocol("injected failure".into()))
}

struct FaultyPhysical {
    inner: LocalDiskStore,
    faults: Arc<Faults>,
}

macro_rules! physical_step {
    ($self:ident, $op:literal, $call:expr) => {{
        if $self.faults.should_fail($op) {
            return Err(io_failure($op));
        }
        let result = $call.await;
        $self.faults.after($op);
        result
    }};
}

#[async_trait]
impl PhysicalStore for FaultyPhysical {
    async fn create_dir(&self, path: &TreePath) -> Result<(), PhysicalError> {
        physical_step!(self, "create_dir", self.inner.create_dir(path))
    }
    async fn write_file(&self, path: &TreePath, bytes: &[u8]) -> Result<(), PhysicalError> {
        physical_step!(self, "write_file", self.inner.write_file(path, bytes))
    }
    async fn copy_file(&self, from: &TreePath, to: &TreePath) -> Result<(), PhysicalError> {
        physical_step!(self, "copy_file", self.inner.copy_file(from, to))
    }
    async fn read_file(&self, path: &TreePath) -> Result<Vec<u8>, PhysicalError> {
        physical_step!(self, "read_file", self.inner.read_file(path))
    }
    async fn rename(&self, from: &TreePath, to: &TreePath) -> Result<(), PhysicalError> {
        physical_step!(self, "rename", self.inner.rename(from, to))
    }
    async fn remove_file(&self, path: &TreePath) -> Result<(), PhysicalError> {
        physical_step!(self, "remove_file", self.inner.remove_file(path))
    }
    async fn remove_dir_all(&self, path: &TreePath) -> Result<(), PhysicalError> {
        physical_step!(self, "remove_dir_all", self.inner.remove_dir_all(path))
    }
    async fn stash(&self, path: &TreePath) -> Result<StashToken, PhysicalError> {
        physical_step!(self, "stash", self.inner.stash(path))
    }
    async fn restore(&self, token: &StashToken, path: &TreePath) -> Result<(), PhysicalError> {
        physical_step!(self, "restore", self.inner.restore(token, path))
    }
    async fn purge(&self, token: &StashToken) -> Result<(), PhysicalError> {
        physical_step!(self, "purge", self.inner.purge(token))
    }
    async fn exists(&self, path: &TreePath) -> Result<bool, PhysicalError> {
        self.inner.exists(path).await
    }
}

struct FaultyMetadata {
    inner: SqliteMetadataStore,
    faults: Arc<Faults>,
}

macro_rules! metadata_step {
    ($self:ident, $op:literal, $call:expr) => {{
        if $self.faults.should_fail($op) {
            return Err(sql_failure());
        }
        $call.await
    }};
}

#[async_trait]
impl MetadataStore for FaultyMetadata {
    async fn load_tree(&self) -> Result<CloudDirectory, MetadataError> {
        self.inner.load_tree().await
    }
    async fn insert_directory(
        &self,
        parent: &TreePath,
        name: &str,
        created_time: OffsetDateTime,
    ) -> Result<(), MetadataError> {
        metadata_step!(
            self,
            "insert_directory",
            self.inner.insert_directory(parent, name, created_time)
        )
    }
    async fn insert_file(&self, directory: &TreePath, file: &CloudFile) -> Result<(), MetadataError> {
        metadata_step!(self, "insert_file", self.inner.insert_file(directory, file))
    }
    async fn replace_file(&self, directory: &TreePath, file: &CloudFile) -> Result<(), MetadataError> {
        metadata_step!(self, "replace_file", self.inner.replace_file(directory, file))
    }
    async fn relocate_directory(
        &self,
        from: &TreePath,
        parent: &TreePath,
        name: &str,
    ) -> Result<(), MetadataError> {
        metadata_step!(
            self,
            "relocate_directory",
            self.inner.relocate_directory(from, parent, name)
        )
    }
    async fn relocate_file(
        &self,
        from: &TreePath,
        parent: &TreePath,
        name: &str,
    ) -> Result<(), MetadataError> {
        metadata_step!(self, "relocate_file", self.inner.relocate_file(from, parent, name))
    }
    async fn delete_directory(&self, path: &TreePath) -> Result<(), MetadataError> {
        metadata_step!(self, "delete_directory", self.inner.delete_directory(path))
    }
    async fn delete_file(&self, path: &TreePath) -> Result<(), MetadataError> {
        metadata_step!(self, "delete_file", self.inner.delete_file(path))
    }
    async fn assign_tag(&self, node: &NodeRef, tag: Tag) -> Result<bool, MetadataError> {
        metadata_step!(self, "assign_tag", self.inner.assign_tag(node, tag))
    }
    async fn remove_tag(&self, node: &NodeRef, tag: Tag) -> Result<bool, MetadataError> {
        metadata_step!(self, "remove_tag", self.inner.remove_tag(node, tag))
    }
    async fn list_tags(&self) -> Result<Vec<NodeTag>, MetadataError> {
        self.inner.list_tags().await
    }
}

struct Harness {
    dir: TempDir,
    disk: LocalDiskStore,
    stored: SqliteMetadataStore,
    faults: Arc<Faults>,
    gateway: ConsistencyGateway,
}

impl Harness {
    async fn new(policies: PolicySet) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let disk = LocalDiskStore::open(dir.path()).await.unwrap();
        let metadata = SqliteMetadataStore::in_memory().await.unwrap();
        let stored = SqliteMetadataStore::from_pool(metadata.pool().clone());
        let faults = Arc::new(Faults::default());
        let gateway = ConsistencyGateway::open(
            Arc::new(FaultyPhysical {
                inner: disk.clone(),
                faults: Arc::clone(&faults),
            }),
            Arc::new(FaultyMetadata {
                inner: metadata,
                faults: Arc::clone(&faults),
            }),
            policies,
        )
        .await
        .unwrap();
        Self {
            dir,
            disk,
            stored,
            faults,
            gateway,
        }
    }

    async fn with_defaults() -> Self {
        Self::new(PolicySet::default()).await
    }

    async fn on_disk(&self, raw: &str) -> bool {
        self.disk.exists(&path(raw)).await.unwrap()
    }

    async fn stored_lines(&self) -> Vec<String> {
        self.stored.load_tree().await.unwrap().render_lines()
    }

    fn staging_is_empty(&self) -> bool {
        std::fs::read_dir(self.dir.path().join("staging"))
            .unwrap()
            .next()
            .is_none()
    }

    async fn mkdir(&self, parent: &str, name: &str) {
        self.gateway
            .create_directory(&path(parent), name, &mut CommandContext::default())
            .await
            .unwrap();
    }

    async fn upload(&self, dir: &str, name: &str, body: &str) -> Result<TreePath, GatewayError> {
        self.gateway
            .upload_file(
                &path(dir),
                name,
                UploadSource::Bytes(body.as_bytes().to_vec()),
                text(),
                &mut CommandContext::default(),
            )
            .await
    }
}

fn path(raw: &str) -> TreePath {
    TreePath::parse(raw).unwrap()
}

fn text() -> FileKind {
    FileKind::Text {
        encoding: "UTF-8".into(),
    }
}

#[tokio::test]
async fn commands_reach_both_stores() {
    let h = Harness::with_defaults().await;
    h.mkdir("/", "docs").await;
    let uploaded = h.upload("/docs", "a.txt", "hello").await.unwrap();
    assert_eq!(uploaded, path("/docs/a.txt"));

    assert!(h.on_disk("/docs/a.txt").await);
    assert_eq!(h.stored_lines().await, h.gateway.tree_lines().await);
    let report = h.gateway.verify().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.checked, 3);

    let download = h.gateway.download_file(&path("/DOCS/A.TXT")).await.unwrap();
    assert_eq!(download.bytes, b"hello");
    assert_eq!(download.content_type, "text/plain");
    assert_eq!(download.file_name, "a.txt");
}

#[tokio::test]
async fn upload_rolls_back_when_metadata_insert_fails() {
    let h = Harness::with_defaults().await;
    h.faults.fail("insert_file", 0);
    let mut ctx = CommandContext::default();
    let err = h
        .gateway
        .upload_file(
            &TreePath::root(),
            "a.txt",
            UploadSource::Bytes(b"data".to_vec()),
            text(),
            &mut ctx,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnexpectedError);
    assert!(!h.on_disk("/a.txt").await);
    assert!(h.gateway.tree_lines().await == vec!["root/"]);
    assert!(ctx.log().iter().any(|line| line == "Rolled back: remove file /a.txt"));
}

#[tokio::test]
async fn failed_compensation_surfaces_rollback_failed() {
    let h = Harness::with_defaults().await;
    h.faults.fail("insert_file", 0);
    h.faults.fail("remove_file", 0);
    let err = h.upload("/", "a.txt", "data").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RollbackFailed);
    assert_eq!(err.code(), CODE_ROLLBACK_FAILED);
    match &err {
        GatewayError::RollbackFailed {
            operation,
            failures,
            ..
        } => {
            assert_eq!(*operation, "upload file");
            assert_eq!(failures.len(), 1);
        }
        other => panic!("unexpected error {other:?}"),
    }
    // The orphan stays on disk until an operator cleans it up.
    let report = h.gateway.verify().await.unwrap();
    assert!(report.missing.is_empty());
    assert!(h.on_disk("/a.txt").await);
}

async fn copy_fixture() -> Harness {
    let h = Harness::with_defaults().await;
    h.mkdir("/", "src").await;
    h.upload("/src", "a.txt", "a").await.unwrap();
    h.mkdir("/src", "sub").await;
    h.upload("/src/sub", "b.txt", "bb").await.unwrap();
    h.mkdir("/", "dst").await;
    h
}

#[tokio::test]
async fn directory_copy_replicates_subtree_in_order() {
    let h = copy_fixture().await;
    let mut ctx = CommandContext::default();
    let created = h
        .gateway
        .copy_directory(&path("/src"), &path("/dst"), &mut ctx)
        .await
        .unwrap();

    assert_eq!(created, path("/dst/src"));
    assert!(h.on_disk("/dst/src/sub/b.txt").await);
    assert_eq!(h.stored_lines().await, h.gateway.tree_lines().await);
    assert_eq!(
        ctx.log(),
        [
            "Copied directory: /src -> /dst/src",
            "Copied file: /src/a.txt -> /dst/src/a.txt",
            "Copied directory: /src/sub -> /dst/src/sub",
            "Copied file: /src/sub/b.txt -> /dst/src/sub/b.txt",
        ]
    );
}

#[tokio::test]
async fn directory_copy_unwinds_both_stores() {
    let h = copy_fixture().await;
    let before = h.gateway.tree_lines().await;
    h.faults.fail("insert_file", 1);

    let err = h
        .gateway
        .copy_directory(&path("/src"), &path("/dst"), &mut CommandContext::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnexpectedError);
    assert!(!h.on_disk("/dst/src").await);
    assert_eq!(h.gateway.tree_lines().await, before);
    assert_eq!(h.stored_lines().await, before);
}

#[tokio::test]
async fn directory_copy_cleanup_failure_has_its_own_code() {
    let h = copy_fixture().await;
    h.faults.fail("insert_file", 1);
    h.faults.fail("remove_dir_all", 0);

    let err = h
        .gateway
        .copy_directory(&path("/src"), &path("/dst"), &mut CommandContext::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RollbackFailed);
    assert_eq!(err.code(), CODE_DIRECTORY_COPY_ROLLBACK_FAILED);
}

#[tokio::test]
async fn cancellation_after_physical_write_rolls_back() {
    let h = Harness::with_defaults().await;
    let token = CancellationToken::new();
    h.faults.cancel_after("write_file", token.clone());
    let mut ctx = CommandContext::new(token);

    let err = h
        .gateway
        .upload_file(
            &TreePath::root(),
            "late.txt",
            UploadSource::Bytes(b"late".to_vec()),
            text(),
            &mut ctx,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Cancelled));
    assert_eq!(err.code(), "OPERATION_CANCELLED");
    assert!(!h.on_disk("/late.txt").await);
    assert_eq!(h.stored_lines().await, vec!["root/"]);
}

#[tokio::test]
async fn cancelled_before_start_touches_nothing() {
    let h = Harness::with_defaults().await;
    let token = CancellationToken::new();
    token.cancel();
    let err = h
        .gateway
        .create_directory(&TreePath::root(), "never", &mut CommandContext::new(token))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Cancelled));
    assert!(!h.on_disk("/never").await);
}

#[tokio::test]
async fn directories_cannot_enter_their_own_subtree() {
    let h = Harness::with_defaults().await;
    h.mkdir("/", "a").await;
    h.mkdir("/a", "b").await;
    let mut ctx = CommandContext::default();

    let moved = h
        .gateway
        .move_directory(&path("/a"), &path("/A/B"), &mut ctx)
        .await
        .unwrap_err();
    assert_eq!(moved.kind(), ErrorKind::ValidationFailed);

    let copied = h
        .gateway
        .copy_directory(&path("/a"), &path("/a"), &mut ctx)
        .await
        .unwrap_err();
    assert_eq!(copied.kind(), ErrorKind::ValidationFailed);
    assert_eq!(h.gateway.tree_lines().await, vec!["root/", "  a/", "    b/"]);
}

#[tokio::test]
async fn moved_directory_keeps_its_contents() {
    let h = Harness::with_defaults().await;
    h.mkdir("/", "a").await;
    h.upload("/a", "x.txt", "x").await.unwrap();
    h.mkdir("/", "b").await;

    let relocation = h
        .gateway
        .move_directory(&path("/a"), &path("/b"), &mut CommandContext::default())
        .await
        .unwrap();
    assert_eq!(relocation.to, path("/b/a"));
    assert!(h.on_disk("/b/a/x.txt").await);
    assert!(!h.on_disk("/a").await);
    assert_eq!(h.stored_lines().await, h.gateway.tree_lines().await);

    let again = h
        .gateway
        .move_directory(&path("/b/a"), &path("/b"), &mut CommandContext::default())
        .await
        .unwrap();
    assert!(again.is_noop());
}

#[tokio::test]
async fn failed_metadata_rename_moves_bytes_back() {
    let h = Harness::with_defaults().await;
    h.mkdir("/", "old").await;
    h.faults.fail("relocate_directory", 0);
    let err = h
        .gateway
        .rename_directory(&path("/old"), "new", &mut CommandContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnexpectedError);
    assert!(h.on_disk("/old").await);
    assert!(!h.on_disk("/new").await);
}

#[tokio::test]
async fn case_only_rename_is_allowed() {
    let h = Harness::with_defaults().await;
    h.mkdir("/", "docs").await;
    let relocation = h
        .gateway
        .rename_directory(&path("/docs"), "Docs", &mut CommandContext::default())
        .await
        .unwrap();
    assert_eq!(relocation.to.to_string(), "/Docs");
    assert_eq!(h.stored_lines().await, vec!["root/", "  Docs/"]);
}

#[tokio::test]
async fn delete_follows_the_directory_policy() {
    let h = Harness::with_defaults().await;
    h.mkdir("/", "full").await;
    h.upload("/full", "a.txt", "a").await.unwrap();

    let err = h
        .gateway
        .delete_directory(&path("/full"), &mut CommandContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyViolation);
    assert!(h.on_disk("/full/a.txt").await);

    h.gateway
        .delete_directory_with_policy(
            &path("/full"),
            DirectoryDeletePolicy::RecursiveDelete,
            &mut CommandContext::default(),
        )
        .await
        .unwrap();
    assert!(!h.on_disk("/full").await);
    assert_eq!(h.stored_lines().await, vec!["root/"]);
    assert!(h.staging_is_empty());
}

#[tokio::test]
async fn failed_delete_restores_the_stash() {
    let h = Harness::with_defaults().await;
    h.upload("/", "keep.txt", "keep").await.unwrap();
    h.faults.fail("delete_file", 0);
    let err = h
        .gateway
        .delete_file(&path("/keep.txt"), &mut CommandContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnexpectedError);
    assert!(h.on_disk("/keep.txt").await);
    assert!(h.staging_is_empty());
    assert_eq!(h.gateway.tree_lines().await.len(), 2);
}

#[tokio::test]
async fn root_cannot_be_deleted() {
    let h = Harness::with_defaults().await;
    let err = h
        .gateway
        .delete_directory(&TreePath::root(), &mut CommandContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
}

#[tokio::test]
async fn rename_policy_picks_the_next_free_name() {
    let h = Harness::new(PolicySet {
        file_conflict: FileConflictPolicy::Rename,
        ..PolicySet::default()
    })
    .await;
    let names = [
        h.upload("/", "report.txt", "1").await.unwrap(),
        h.upload("/", "report.txt", "2").await.unwrap(),
        h.upload("/", "Report.txt", "3").await.unwrap(),
    ];
    assert_eq!(
        names.map(|p| p.to_string()),
        ["/report.txt", "/report(1).txt", "/Report(2).txt"]
    );
}

#[tokio::test]
async fn reject_policy_reports_name_conflict() {
    let h = Harness::with_defaults().await;
    h.upload("/", "a.txt", "1").await.unwrap();
    let err = h.upload("/", "A.TXT", "2").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NameConflict);
}

#[tokio::test]
async fn overwrite_policy_replaces_content_and_purges_stash() {
    let h = Harness::new(PolicySet {
        file_conflict: FileConflictPolicy::Overwrite,
        ..PolicySet::default()
    })
    .await;
    h.upload("/", "a.txt", "old").await.unwrap();
    h.upload("/", "a.txt", "newer").await.unwrap();

    let download = h.gateway.download_file(&path("/a.txt")).await.unwrap();
    assert_eq!(download.bytes, b"newer");
    assert_eq!(h.stored_lines().await, vec!["root/", "  a.txt (Text, 5 B)"]);
    assert!(h.staging_is_empty());

    let err = h
        .gateway
        .copy_file(&path("/a.txt"), &TreePath::root(), &mut CommandContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
}

#[tokio::test]
async fn copy_reports_whether_it_replaced_a_file() {
    let h = Harness::new(PolicySet {
        file_conflict: FileConflictPolicy::Overwrite,
        ..PolicySet::default()
    })
    .await;
    h.mkdir("/", "d").await;
    h.upload("/", "a.txt", "fresh").await.unwrap();

    let first = h
        .gateway
        .copy_file(&path("/a.txt"), &path("/d"), &mut CommandContext::default())
        .await
        .unwrap();
    assert_eq!(first.path, path("/d/a.txt"));
    assert!(!first.replaced);

    h.upload("/d", "a.txt", "stale").await.unwrap();
    let second = h
        .gateway
        .copy_file(&path("/a.txt"), &path("/d"), &mut CommandContext::default())
        .await
        .unwrap();
    assert!(second.replaced);
    let download = h.gateway.download_file(&path("/d/a.txt")).await.unwrap();
    assert_eq!(download.bytes, b"fresh");
    assert!(h.staging_is_empty());
}

#[tokio::test]
async fn oversized_upload_is_rejected_before_any_write() {
    let h = Harness::new(PolicySet {
        max_upload_bytes: 4,
        ..PolicySet::default()
    })
    .await;
    let err = h.upload("/", "big.txt", "12345").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    assert!(!h.on_disk("/big.txt").await);
}

#[tokio::test]
async fn upload_from_local_path() {
    let h = Harness::with_defaults().await;
    let source = h.dir.path().join("outside.txt");
    std::fs::write(&source, "from disk").unwrap();
    h.gateway
        .upload_file(
            &TreePath::root(),
            "copied.txt",
            UploadSource::LocalPath(source),
            text(),
            &mut CommandContext::default(),
        )
        .await
        .unwrap();
    let download = h.gateway.download_file(&path("/copied.txt")).await.unwrap();
    assert_eq!(download.bytes, b"from disk");
}

#[tokio::test]
async fn file_move_and_rename_keep_stores_aligned() {
    let h = Harness::with_defaults().await;
    h.mkdir("/", "in").await;
    h.upload("/", "a.txt", "a").await.unwrap();
    let mut ctx = CommandContext::default();
    h.gateway
        .move_file(&path("/a.txt"), &path("/in"), &mut ctx)
        .await
        .unwrap();
    h.gateway
        .rename_file(&path("/in/a.txt"), "b.txt", &mut ctx)
        .await
        .unwrap();
    assert!(h.on_disk("/in/b.txt").await);
    assert_eq!(h.stored_lines().await, h.gateway.tree_lines().await);
    assert_eq!(
        ctx.log(),
        ["Moved file /a.txt -> /in/a.txt", "Renamed file /in/a.txt -> /in/b.txt"]
    );
}

#[tokio::test]
async fn tags_are_exclusive_per_node() {
    let h = Harness::with_defaults().await;
    h.mkdir("/", "docs").await;
    h.upload("/docs", "a.txt", "a").await.unwrap();
    let mut ctx = CommandContext::default();

    let first = h
        .gateway
        .assign_tag(&path("/docs/a.txt"), "work", &mut ctx)
        .await
        .unwrap();
    assert!(first.changed);
    assert_eq!(first.tag, Tag::Work);
    let second = h
        .gateway
        .assign_tag(&path("/DOCS/A.txt"), "Work", &mut ctx)
        .await
        .unwrap();
    assert!(!second.changed);
    h.gateway
        .assign_tag(&path("/docs"), "Important", &mut ctx)
        .await
        .unwrap();

    let listed = h.gateway.list_tags(None).await.unwrap();
    let paths: Vec<String> = listed.iter().map(|t| t.node.path.to_string()).collect();
    assert_eq!(paths, ["/docs", "/docs/a.txt"]);
    assert_eq!(
        h.gateway.find_tagged_paths("work", None).await.unwrap(),
        vec![path("/docs/a.txt")]
    );

    let unknown = h
        .gateway
        .assign_tag(&path("/docs"), "Urgent", &mut ctx)
        .await
        .unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::ValidationFailed);
    let missing = h
        .gateway
        .assign_tag(&path("/nowhere"), "Work", &mut ctx)
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::ResourceNotFound);

    let removed = h
        .gateway
        .remove_tag(&path("/docs"), "Personal", &mut ctx)
        .await
        .unwrap();
    assert!(!removed.changed);
}

#[tokio::test]
async fn size_search_and_export_reports() {
    let h = Harness::with_defaults().await;
    h.mkdir("/", "docs").await;
    h.upload("/docs", "a.txt", "12345").await.unwrap();
    h.upload("/", "b.TXT", "1").await.unwrap();
    h.upload("/", "c.md", "1").await.unwrap();

    let size = h.gateway.total_size(&TreePath::root()).await.unwrap();
    assert_eq!(size.bytes, 7);
    assert_eq!(size.formatted, "7 B");
    assert_eq!(size.trace[0], "Visiting directory: /");
    assert_eq!(size.trace[1], "Visiting directory: /docs");
    assert_eq!(size.trace[2], "Visiting file: /docs/a.txt (Text)");
    let again = h.gateway.total_size(&TreePath::root()).await.unwrap();
    assert_eq!(again.bytes, size.bytes);

    let single = h.gateway.total_size(&path("/docs/a.txt")).await.unwrap();
    assert_eq!(single.bytes, 5);

    let search = h
        .gateway
        .search_by_extension(".txt", &TreePath::root())
        .await
        .unwrap();
    assert_eq!(search.matches, vec![path("/docs/a.txt"), path("/b.TXT")]);
    let empty = h
        .gateway
        .search_by_extension(" . ", &TreePath::root())
        .await
        .unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::ValidationFailed);

    let xml = h.gateway.export_xml().await;
    assert!(xml.starts_with("<?xml"));
    assert!(xml.contains("<directory name=\"docs\""));
    assert!(xml.contains(
        "name=\"a.txt\" size=\"5\""
    ));
    assert!(xml.contains("detail=\"Encoding: UTF-8\" encoding=\"UTF-8\"/>"));
}

#[tokio::test]
async fn listing_returns_children_in_creation_order() {
    let h = Harness::with_defaults().await;
    h.upload("/", "z.txt", "z").await.unwrap();
    h.mkdir("/", "a").await;
    let listing = h.gateway.list_directory(&TreePath::root()).await.unwrap();
    let names: Vec<&str> = listing.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["z.txt", "a"]);
}
