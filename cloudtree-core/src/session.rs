//! Client-held session state. The server never stores it: every request
//! carries the state in and every response carries the updated state out.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::paths::TreePath;
use crate::tags::Tag;

/// Oldest history entries are dropped past this depth.
pub const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    Name,
    Size,
    CreatedTime,
    Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortState {
    pub key: SortKey,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardItem {
    pub path: String,
    pub is_directory: bool,
}

/// A reversible action. Each variant keeps just enough to run itself
/// forward again or to build its inverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum HistoryEntry {
    CreateDirectory {
        path: String,
    },
    RenameDirectory {
        from: String,
        to: String,
    },
    MoveDirectory {
        from: String,
        to: String,
    },
    CopyDirectory {
        source: String,
        created: String,
    },
    RenameFile {
        from: String,
        to: String,
    },
    MoveFile {
        from: String,
        to: String,
    },
    CopyFile {
        source: String,
        created: String,
    },
    AssignTag {
        path: String,
        tag: Tag,
    },
    RemoveTag {
        path: String,
        tag: Tag,
    },
    ChangeSort {
        previous: Option<SortState>,
        next: Option<SortState>,
    },
}

impl HistoryEntry {
    pub fn describe(&self) -> String {
        match self {
            HistoryEntry::CreateDirectory { path } => format!("create directory {path}"),
            HistoryEntry::RenameDirectory { from, to } => {
                format!("rename directory {from} -> {to}")
            }
            HistoryEntry::MoveDirectory { from, to } => format!("move directory {from} -> {to}"),
            HistoryEntry::CopyDirectory { source, created } => {
                format!("copy directory {source} -> {created}")
            }
            HistoryEntry::RenameFile { from, to } => format!("rename file {from} -> {to}"),
            HistoryEntry::MoveFile { from, to } => format!("move file {from} -> {to}"),
            HistoryEntry::CopyFile { source, created } => {
                format!("copy file {source} -> {created}")
            }
            HistoryEntry::AssignTag { path, tag } => format!("assign tag {tag} to {path}"),
            HistoryEntry::RemoveTag { path, tag } => format!("remove tag {tag} from {path}"),
            HistoryEntry::ChangeSort { next, .. } => match next {
                Some(sort) => format!("sort by {:?} {:?}", sort.key, sort.direction),
                None => "clear sort".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionState {
    pub current_directory_path: String,
    pub clipboard_item: Option<ClipboardItem>,
    pub current_sort_state: Option<SortState>,
    pub node_tags: BTreeMap<String, Vec<String>>,
    pub undo_stack: Vec<HistoryEntry>,
    pub redo_stack: Vec<HistoryEntry>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            current_directory_path: "/".to_string(),
            clipboard_item: None,
            current_sort_state: None,
            node_tags: BTreeMap::new(),
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        }
    }
}

impl SessionState {
    pub fn current_directory(&self) -> TreePath {
        TreePath::resolve(&TreePath::root(), &self.current_directory_path)
    }

    pub fn set_current_directory(&mut self, path: &TreePath) {
        self.current_directory_path = path.to_string();
    }

    /// Pushes a fresh action: the redo branch no longer applies.
    pub fn record(&mut self, entry: HistoryEntry) {
        push_bounded(&mut self.undo_stack, entry);
        self.redo_stack.clear();
    }

    pub fn push_undo(&mut self, entry: HistoryEntry) {
        push_bounded(&mut self.undo_stack, entry);
    }

    pub fn push_redo(&mut self, entry: HistoryEntry) {
        push_bounded(&mut self.redo_stack, entry);
    }

    /// A mutation that cannot be undone still invalidates redo.
    pub fn invalidate_redo(&mut self) {
        self.redo_stack.clear();
    }

    /// Follows a rename or move of `from` to `to` for the current directory
    /// and the clipboard.
    pub fn rebase_paths(&mut self, from: &TreePath, to: &TreePath) {
        if let Some(moved) = self.current_directory().rebase(from, to) {
            self.set_current_directory(&moved);
        }
        if let Some(item) = self.clipboard_item.as_mut()
            && let Some(moved) = TreePath::resolve(&TreePath::root(), &item.path).rebase(from, to)
        {
            item.path = moved.to_string();
        }
    }

    /// Drops references into a removed subtree: the current directory falls
    /// back to the removed node's parent, the clipboard is emptied.
    pub fn forget_paths_under(&mut self, removed: &TreePath) {
        if self.current_directory().is_same_or_descendant_of(removed) {
            let parent = removed.parent().unwrap_or_default();
            self.set_current_directory(&parent);
        }
        let clipboard_inside = self.clipboard_item.as_ref().is_some_and(|item| {
            TreePath::resolve(&TreePath::root(), &item.path).is_same_or_descendant_of(removed)
        });
        if clipboard_inside {
            self.clipboard_item = None;
        }
    }
}

fn push_bounded(stack: &mut Vec<HistoryEntry>, entry: HistoryEntry) {
    stack.push(entry);
    if stack.len() > HISTORY_LIMIT {
        let overflow = stack.len() - HISTORY_LIMIT;
        stack.drain(..overflow);
    }
}
