use std::sync::Arc;

use cloudtree_core::{
    CODE_RESOURCE_NOT_FOUND, CODE_VALIDATION_FAILED, DirectoryEntry, FileConflictPolicy, FileKind,
    HistoryEntry, PolicySet, SessionState, SortDirection, SortKey, TreePath,
};
use cloudtreed::app::serve;
use cloudtreed::gateway::{CommandContext, ConsistencyGateway, UploadSource};
use cloudtreed::session::{SessionCommand, SessionEngine, SessionRequest, SessionResponse};
use cloudtreed::storage::{LocalDiskStore, SqliteMetadataStore};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    gateway: Arc<ConsistencyGateway>,
    engine: SessionEngine,
    state: SessionState,
}

impl Fixture {
    async fn new() -> Self {
        Self::with_policies(PolicySet::default()).await
    }

    async fn with_policies(policies: PolicySet) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let physical = LocalDiskStore::open(dir.path()).await.unwrap();
        let metadata = SqliteMetadataStore::in_memory().await.unwrap();
        let gateway = ConsistencyGateway::open(Arc::new(physical), Arc::new(metadata), policies)
            .await
            .unwrap();
        let gateway = Arc::new(gateway);
        Self {
            _dir: dir,
            engine: SessionEngine::new(Arc::clone(&gateway)),
            gateway,
            state: SessionState::default(),
        }
    }

    /// Sends a command with the current state and keeps the returned state.
    async fn send(&mut self, command: SessionCommand) -> SessionResponse {
        let response = self
            .engine
            .handle(SessionRequest {
                state: self.state.clone(),
                command,
            })
            .await;
        self.state = response.state.clone();
        response
    }

    async fn ok(&mut self, command: SessionCommand) -> SessionResponse {
        let response = self.send(command).await;
        assert!(response.success, "{}", response.message);
        response
    }

    async fn names(&mut self) -> Vec<String> {
        self.ok(SessionCommand::Refresh)
            .await
            .entries
            .into_iter()
            .map(|entry| entry.name)
            .collect()
    }

    /// Listing of any directory, read straight from the gateway so the
    /// session state is left alone.
    async fn entries(&self, dir: &str) -> Vec<DirectoryEntry> {
        self.gateway
            .list_directory(&TreePath::parse(dir).unwrap())
            .await
            .unwrap()
            .entries
    }

    async fn entry(&self, dir: &str, name: &str) -> DirectoryEntry {
        self.entries(dir)
            .await
            .into_iter()
            .find(|entry| entry.name == name)
            .unwrap_or_else(|| panic!("{name} missing from {dir}"))
    }

    async fn content(&self, file: &str) -> String {
        let download = self
            .gateway
            .download_file(&TreePath::parse(file).unwrap())
            .await
            .unwrap();
        String::from_utf8(download.bytes).unwrap()
    }

    /// A write made outside this session, as another client would.
    async fn upload_elsewhere(&self, dir: &str, name: &str, body: &str) {
        self.gateway
            .upload_file(
                &TreePath::parse(dir).unwrap(),
                name,
                UploadSource::Bytes(body.as_bytes().to_vec()),
                text(),
                &mut CommandContext::default(),
            )
            .await
            .unwrap();
    }
}

fn text() -> FileKind {
    FileKind::Text {
        encoding: "UTF-8".into(),
    }
}

fn names_of(entries: &[DirectoryEntry]) -> Vec<&str> {
    entries.iter().map(|entry| entry.name.as_str()).collect()
}

fn mkdir(name: &str) -> SessionCommand {
    SessionCommand::CreateDirectory { name: name.into() }
}

fn cd(path: &str) -> SessionCommand {
    SessionCommand::ChangeDirectory { path: path.into() }
}

fn upload(name: &str, body: &str) -> SessionCommand {
    SessionCommand::UploadFile {
        name: name.into(),
        content: Some(body.into()),
        source_path: None,
        kind: text(),
    }
}

#[tokio::test]
async fn undo_and_redo_round_trip_a_rename() {
    let mut f = Fixture::new().await;
    f.ok(mkdir("docs")).await;
    f.ok(SessionCommand::RenameDirectory {
        path: "docs".into(),
        new_name: "papers".into(),
    })
    .await;
    assert_eq!(f.names().await, ["papers"]);

    f.ok(SessionCommand::Undo).await;
    assert_eq!(f.names().await, ["docs"]);
    assert_eq!(f.state.redo_stack.len(), 1);

    f.ok(SessionCommand::Redo).await;
    assert_eq!(f.names().await, ["papers"]);

    f.ok(SessionCommand::Undo).await;
    f.ok(SessionCommand::Undo).await;
    assert!(f.names().await.is_empty());
    assert!(f.state.undo_stack.is_empty());

    f.ok(SessionCommand::Redo).await;
    assert_eq!(f.names().await, ["docs"]);
}

#[tokio::test]
async fn relative_navigation_and_parent_hops() {
    let mut f = Fixture::new().await;
    f.ok(mkdir("a")).await;
    f.ok(cd("A")).await;
    f.ok(mkdir("b")).await;
    assert_eq!(f.state.current_directory_path, "/a");

    f.ok(cd("b")).await;
    assert_eq!(f.state.current_directory_path, "/a/b");
    f.ok(cd("../..")).await;
    assert_eq!(f.state.current_directory_path, "/");

    let missing = f.send(cd("/nowhere")).await;
    assert_eq!(missing.error_code.as_deref(), Some(CODE_RESOURCE_NOT_FOUND));
}

#[tokio::test]
async fn failed_command_returns_the_request_state() {
    let mut f = Fixture::new().await;
    f.ok(mkdir("keep")).await;
    let before = f.state.clone();

    let response = f
        .send(SessionCommand::DeleteFile {
            path: "/ghost.txt".into(),
        })
        .await;
    assert!(!response.success);
    assert_eq!(response.state, before);
    assert_eq!(response.entries.len(), 1);
}

#[tokio::test]
async fn paste_copies_and_undo_removes_the_copy() {
    let mut f = Fixture::new().await;
    f.ok(mkdir("src")).await;
    f.ok(mkdir("dst")).await;
    f.ok(cd("src")).await;
    f.ok(upload("a.txt", "aaa")).await;
    f.ok(cd("/")).await;

    f.ok(SessionCommand::Copy { path: "src".into() }).await;
    assert!(f.state.clipboard_item.as_ref().is_some_and(|item| item.is_directory));
    f.ok(cd("dst")).await;
    f.ok(SessionCommand::Paste).await;
    assert!(f.state.clipboard_item.is_none());
    assert_eq!(f.names().await, ["src"]);
    assert_eq!(
        f.state.undo_stack.last(),
        Some(&HistoryEntry::CopyDirectory {
            source: "/src".into(),
            created: "/dst/src".into(),
        })
    );

    // The copy is not empty, yet undo removes it whatever the delete policy.
    f.ok(SessionCommand::Undo).await;
    assert!(f.names().await.is_empty());

    f.ok(SessionCommand::Redo).await;
    assert_eq!(f.names().await, ["src"]);
}

#[tokio::test]
async fn paste_with_empty_clipboard_is_rejected() {
    let mut f = Fixture::new().await;
    let response = f.send(SessionCommand::Paste).await;
    assert_eq!(response.error_code.as_deref(), Some(CODE_VALIDATION_FAILED));
}

#[tokio::test]
async fn tag_history_only_records_changes() {
    let mut f = Fixture::new().await;
    f.ok(mkdir("docs")).await;
    let assign = || SessionCommand::AssignTag {
        path: "docs".into(),
        tag: "work".into(),
    };

    f.ok(assign()).await;
    assert_eq!(f.state.node_tags.get("/docs"), Some(&vec!["Work".to_string()]));
    let depth = f.state.undo_stack.len();
    f.ok(assign()).await;
    assert_eq!(f.state.undo_stack.len(), depth);

    f.ok(SessionCommand::Undo).await;
    assert!(f.state.node_tags.is_empty());
}

#[tokio::test]
async fn sort_changes_are_undoable() {
    let mut f = Fixture::new().await;
    f.ok(upload("b.txt", "bb")).await;
    f.ok(upload("a.txt", "a")).await;
    f.ok(mkdir("z")).await;
    assert_eq!(f.names().await, ["z", "b.txt", "a.txt"]);

    let by_name = || SessionCommand::Sort {
        key: SortKey::Name,
        direction: SortDirection::Ascending,
    };
    f.ok(by_name()).await;
    assert_eq!(f.names().await, ["z", "a.txt", "b.txt"]);
    let depth = f.state.undo_stack.len();
    f.ok(by_name()).await;
    assert_eq!(f.state.undo_stack.len(), depth);

    f.ok(SessionCommand::Undo).await;
    assert!(f.state.current_sort_state.is_none());
}

#[tokio::test]
async fn renaming_the_current_directory_follows_it() {
    let mut f = Fixture::new().await;
    f.ok(mkdir("a")).await;
    f.ok(cd("a")).await;
    f.ok(mkdir("inner")).await;
    f.ok(SessionCommand::RenameDirectory {
        path: "/a".into(),
        new_name: "b".into(),
    })
    .await;
    assert_eq!(f.state.current_directory_path, "/b");

    f.ok(SessionCommand::DeleteDirectory {
        path: "inner".into(),
    })
    .await;
    f.ok(SessionCommand::DeleteDirectory { path: "/b".into() }).await;
    assert_eq!(f.state.current_directory_path, "/");
}

#[tokio::test]
async fn uploads_clear_redo_and_need_one_source() {
    let mut f = Fixture::new().await;
    f.ok(mkdir("a")).await;
    f.ok(SessionCommand::Undo).await;
    assert_eq!(f.state.redo_stack.len(), 1);

    f.ok(upload("n.txt", "note")).await;
    assert!(f.state.redo_stack.is_empty());

    let neither = f
        .send(SessionCommand::UploadFile {
            name: "x.txt".into(),
            content: None,
            source_path: None,
            kind: FileKind::Text {
                encoding: "UTF-8".into(),
            },
        })
        .await;
    assert_eq!(neither.error_code.as_deref(), Some(CODE_VALIDATION_FAILED));
}

#[tokio::test]
async fn stdio_protocol_answers_each_line() {
    let f = Fixture::new().await;
    let input = concat!(
        r#"{"command":{"command":"CreateDirectory","name":"docs"}}"#,
        "\n\n",
        "not json\n",
    );
    let mut output = Vec::new();
    serve(&f.engine, input.as_bytes(), &mut output).await.unwrap();

    let lines: Vec<SessionResponse> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].success);
    assert_eq!(lines[0].entries[0].name, "docs");
    assert!(!lines[1].success);
    assert_eq!(lines[1].error_code.as_deref(), Some(CODE_VALIDATION_FAILED));
}

#[tokio::test]
async fn directory_move_round_trip_keeps_identity() {
    let mut f = Fixture::new().await;
    f.ok(mkdir("a")).await;
    f.ok(mkdir("b")).await;
    f.ok(cd("a")).await;
    f.ok(mkdir("child")).await;
    f.ok(upload("f.txt", "body")).await;
    f.ok(cd("/")).await;
    let before = f.entry("/", "a").await;

    f.ok(SessionCommand::MoveDirectory {
        path: "a".into(),
        target: "b".into(),
    })
    .await;
    assert_eq!(names_of(&f.entries("/").await), ["b"]);
    assert_eq!(f.entry("/b", "a").await.created_time, before.created_time);

    f.ok(SessionCommand::Undo).await;
    let restored = f.entry("/", "a").await;
    assert_eq!(restored.created_time, before.created_time);
    assert_eq!(restored.size, before.size);
    assert_eq!(names_of(&f.entries("/a").await), ["child", "f.txt"]);
    assert!(f.entries("/b").await.is_empty());
    assert_eq!(f.content("/a/f.txt").await, "body");

    f.ok(SessionCommand::Redo).await;
    assert_eq!(f.entry("/b", "a").await.created_time, before.created_time);
    assert_eq!(names_of(&f.entries("/b/a").await), ["child", "f.txt"]);
    assert_eq!(f.state.redo_stack.len(), 0);
}

#[tokio::test]
async fn file_rename_and_move_round_trip() {
    let mut f = Fixture::new().await;
    f.ok(upload("r.txt", "payload")).await;
    f.ok(mkdir("d")).await;
    let before = f.entry("/", "r.txt").await;

    f.ok(SessionCommand::RenameFile {
        path: "r.txt".into(),
        new_name: "s.txt".into(),
    })
    .await;
    f.ok(SessionCommand::MoveFile {
        path: "s.txt".into(),
        target: "d".into(),
    })
    .await;
    assert_eq!(names_of(&f.entries("/d").await), ["s.txt"]);

    f.ok(SessionCommand::Undo).await;
    assert!(f.entries("/d").await.is_empty());
    assert_eq!(f.entry("/", "s.txt").await.created_time, before.created_time);

    f.ok(SessionCommand::Undo).await;
    let restored = f.entry("/", "r.txt").await;
    assert_eq!(restored.created_time, before.created_time);
    assert_eq!(f.content("/r.txt").await, "payload");

    f.ok(SessionCommand::Redo).await;
    f.ok(SessionCommand::Redo).await;
    assert_eq!(names_of(&f.entries("/").await), ["d"]);
    assert_eq!(f.content("/d/s.txt").await, "payload");
    assert_eq!(f.entry("/d", "s.txt").await.created_time, before.created_time);
}

#[tokio::test]
async fn file_paste_round_trip() {
    let mut f = Fixture::new().await;
    f.ok(upload("a.txt", "aaa")).await;
    f.ok(mkdir("d")).await;
    f.ok(SessionCommand::Copy {
        path: "a.txt".into(),
    })
    .await;
    f.ok(cd("d")).await;
    f.ok(SessionCommand::Paste).await;
    assert_eq!(f.content("/d/a.txt").await, "aaa");

    f.ok(SessionCommand::Undo).await;
    assert!(f.entries("/d").await.is_empty());
    assert_eq!(f.content("/a.txt").await, "aaa");

    f.ok(SessionCommand::Redo).await;
    assert_eq!(f.content("/d/a.txt").await, "aaa");
    assert_eq!(
        f.state.undo_stack.last(),
        Some(&HistoryEntry::CopyFile {
            source: "/a.txt".into(),
            created: "/d/a.txt".into(),
        })
    );
}

#[tokio::test]
async fn overwriting_paste_is_not_undoable() {
    let mut f = Fixture::with_policies(PolicySet {
        file_conflict: FileConflictPolicy::Overwrite,
        ..PolicySet::default()
    })
    .await;
    f.ok(mkdir("a")).await;
    f.ok(mkdir("b")).await;
    f.ok(cd("/a")).await;
    f.ok(upload("x.txt", "NEW")).await;
    f.ok(cd("/b")).await;
    f.ok(upload("x.txt", "OLD-CONTENT")).await;

    f.ok(SessionCommand::Copy {
        path: "/a/x.txt".into(),
    })
    .await;
    let history = f.state.undo_stack.clone();
    f.ok(SessionCommand::Paste).await;
    assert_eq!(f.content("/b/x.txt").await, "NEW");
    assert_eq!(f.state.undo_stack, history);
    assert!(f.state.redo_stack.is_empty());
    assert!(f.state.clipboard_item.is_none());

    // The newest entry is the creation of /b, which is no longer empty.
    let undo = f.send(SessionCommand::Undo).await;
    assert!(!undo.success);
    assert_eq!(f.content("/b/x.txt").await, "NEW");
}

#[tokio::test]
async fn redo_that_overwrites_leaves_no_undo_entry() {
    let mut f = Fixture::with_policies(PolicySet {
        file_conflict: FileConflictPolicy::Overwrite,
        ..PolicySet::default()
    })
    .await;
    f.ok(upload("x.txt", "mine")).await;
    f.ok(mkdir("d")).await;
    f.ok(SessionCommand::Copy {
        path: "x.txt".into(),
    })
    .await;
    f.ok(cd("d")).await;
    f.ok(SessionCommand::Paste).await;
    f.ok(SessionCommand::Undo).await;
    let history = f.state.undo_stack.clone();

    f.upload_elsewhere("/d", "x.txt", "theirs").await;
    f.ok(SessionCommand::Redo).await;
    assert_eq!(f.content("/d/x.txt").await, "mine");
    assert_eq!(f.state.undo_stack, history);
    assert!(f.state.redo_stack.is_empty());
}

#[tokio::test]
async fn failed_undo_keeps_both_stacks() {
    let mut f = Fixture::new().await;
    f.ok(mkdir("a")).await;
    f.ok(SessionCommand::RenameDirectory {
        path: "a".into(),
        new_name: "b".into(),
    })
    .await;
    f.ok(SessionCommand::Undo).await;
    f.ok(SessionCommand::Redo).await;
    f.ok(SessionCommand::Undo).await;
    let before = f.state.clone();
    assert_eq!(before.undo_stack.len(), 1);
    assert_eq!(before.redo_stack.len(), 1);

    // Another client removes the directory the next undo would delete.
    f.gateway
        .delete_directory(
            &TreePath::parse("/a").unwrap(),
            &mut CommandContext::default(),
        )
        .await
        .unwrap();
    let response = f.send(SessionCommand::Undo).await;
    assert!(!response.success);
    assert_eq!(response.error_code.as_deref(), Some(CODE_RESOURCE_NOT_FOUND));
    assert_eq!(f.state, before);

    let response = f.send(SessionCommand::Redo).await;
    assert!(!response.success);
    assert_eq!(f.state, before);
}
