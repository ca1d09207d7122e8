use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::paths::TreePath;
use crate::session::{SortDirection, SortKey, SortState};
use crate::tree::{Child, CloudDirectory, FileType};

/// One row of a directory listing as shown to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    /// Subtree total for directories.
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_time: OffsetDateTime,
    pub file_type: Option<FileType>,
    pub detail: Option<String>,
}

/// Immediate children of `dir` (located at `path`) in creation order.
pub fn list_entries(dir: &CloudDirectory, path: &TreePath) -> Vec<DirectoryEntry> {
    dir.children()
        .into_iter()
        .map(|child| match child {
            Child::Directory(node) => {
                let child_path = path.join(node.name());
                DirectoryEntry {
                    name: node.name().to_string(),
                    size: node.calculate_total_bytes(&child_path, None),
                    path: child_path.to_string(),
                    is_directory: true,
                    created_time: node.created_time(),
                    file_type: None,
                    detail: None,
                }
            }
            Child::File(node) => DirectoryEntry {
                name: node.name().to_string(),
                path: path.join(node.name()).to_string(),
                is_directory: false,
                size: node.size(),
                created_time: node.created_time(),
                file_type: Some(node.file_type()),
                detail: Some(node.detail_text()),
            },
        })
        .collect()
}

/// Directories always come first; within each group the sort key applies.
/// Without a sort state the creation order is kept.
pub fn sort_entries(entries: &mut [DirectoryEntry], sort: Option<&SortState>) {
    entries.sort_by(|left, right| {
        let group = right.is_directory.cmp(&left.is_directory);
        if group != Ordering::Equal {
            return group;
        }
        let Some(sort) = sort else {
            return Ordering::Equal;
        };
        let ordering = match sort.key {
            SortKey::Name => compare_names(left, right),
            SortKey::Size => left.size.cmp(&right.size),
            SortKey::CreatedTime => left.created_time.cmp(&right.created_time),
            SortKey::Type => type_label(left)
                .cmp(type_label(right))
                .then_with(|| compare_names(left, right)),
        };
        match sort.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
}

fn compare_names(left: &DirectoryEntry, right: &DirectoryEntry) -> Ordering {
    left.name.to_lowercase().cmp(&right.name.to_lowercase())
}

fn type_label(entry: &DirectoryEntry) -> &'static str {
    entry.file_type.map(FileType::as_str).unwrap_or("Directory")
}
