mod error;
mod listing;
mod paths;
mod policy;
mod session;
mod tags;
mod tree;

pub use error::{
    CODE_DIRECTORY_COPY_ROLLBACK_FAILED, CODE_NAME_CONFLICT, CODE_OPERATION_CANCELLED,
    CODE_POLICY_VIOLATION, CODE_RESOURCE_NOT_FOUND, CODE_ROLLBACK_FAILED,
    CODE_UNEXPECTED_ERROR, CODE_VALIDATION_FAILED, ErrorKind, TreeError,
};
pub use listing::{DirectoryEntry, list_entries, sort_entries};
pub use paths::{TreePath, names_equal, validate_name};
pub use policy::{
    DirectoryDeletePolicy, ExportTarget, FileConflictPolicy, LogLevel, PolicyError, PolicySet,
    SiblingOrder, StorageProvider, TraversalMode, next_available_name,
};
pub use session::{
    ClipboardItem, HISTORY_LIMIT, HistoryEntry, SessionState, SortDirection, SortKey, SortState,
};
pub use tags::{NodeKind, NodeRef, NodeTag, Tag, tag_map};
pub use tree::{
    AttachRejected, Child, CloudDirectory, CloudFile, FileKind, FileType, ROOT_NAME, TreeVisit,
    extension_of, format_bytes,
};
