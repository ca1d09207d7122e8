use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TreeError;
use crate::paths::TreePath;

/// The closed set of labels a node can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tag {
    Important,
    Work,
    Personal,
}

impl Tag {
    pub const ALL: [Tag; 3] = [Tag::Important, Tag::Work, Tag::Personal];

    pub fn name(self) -> &'static str {
        match self {
            Tag::Important => "Important",
            Tag::Work => "Work",
            Tag::Personal => "Personal",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Tag::Important => "#E53935",
            Tag::Work => "#1E88E5",
            Tag::Personal => "#43A047",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tag {
    type Err = TreeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Tag::ALL
            .into_iter()
            .find(|tag| tag.name().eq_ignore_ascii_case(value))
            .ok_or_else(|| TreeError::validation(format!("unknown tag '{value}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Directory,
    File,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Directory => "directory",
            NodeKind::File => "file",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "directory" => Some(NodeKind::Directory),
            "file" => Some(NodeKind::File),
            _ => None,
        }
    }
}

/// A directory XOR a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub path: TreePath,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTag {
    pub node: NodeRef,
    pub tag: Tag,
}

/// Display view: node path to its tag names, tags in set order.
pub fn tag_map(tags: &[NodeTag]) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<Tag>> = BTreeMap::new();
    for entry in tags {
        let slot = grouped.entry(entry.node.path.to_string()).or_default();
        if !slot.contains(&entry.tag) {
            slot.push(entry.tag);
        }
    }
    grouped
        .into_iter()
        .map(|(path, mut tags)| {
            tags.sort();
            (path, tags.into_iter().map(|tag| tag.name().to_string()).collect())
        })
        .collect()
}
