use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::TreeError;
use crate::paths::{TreePath, names_equal, validate_name};

pub const ROOT_NAME: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    Word,
    Image,
    Text,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Word => "Word",
            FileType::Image => "Image",
            FileType::Text => "Text",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = TreeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "word" => Ok(FileType::Word),
            "image" => Ok(FileType::Image),
            "text" => Ok(FileType::Text),
            other => Err(TreeError::validation(format!("unknown file type '{other}'"))),
        }
    }
}

/// Type-specific payload of a file. Exactly one shape is valid per type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FileKind {
    Word {
        #[serde(rename = "pageCount")]
        page_count: u32,
    },
    Image {
        width: u32,
        height: u32,
    },
    Text {
        encoding: String,
    },
}

impl FileKind {
    pub fn file_type(&self) -> FileType {
        match self {
            FileKind::Word { .. } => FileType::Word,
            FileKind::Image { .. } => FileType::Image,
            FileKind::Text { .. } => FileType::Text,
        }
    }

    pub fn validate(&self) -> Result<(), TreeError> {
        match self {
            FileKind::Word { page_count } if *page_count == 0 => {
                Err(TreeError::validation("word file must have at least one page"))
            }
            FileKind::Image { width, height } if *width == 0 || *height == 0 => Err(
                TreeError::validation("image width and height must be positive"),
            ),
            FileKind::Text { encoding } if encoding.trim().is_empty() => {
                Err(TreeError::validation("text file encoding must not be empty"))
            }
            _ => Ok(()),
        }
    }

    pub fn detail_text(&self) -> String {
        match self {
            FileKind::Word { page_count } => format!("Pages: {page_count}"),
            FileKind::Image { width, height } => format!("Resolution: {width}x{height}"),
            FileKind::Text { encoding } => format!("Encoding: {encoding}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudFile {
    name: String,
    size: u64,
    created_time: OffsetDateTime,
    kind: FileKind,
}

impl CloudFile {
    pub fn new(
        name: &str,
        size: u64,
        created_time: OffsetDateTime,
        kind: FileKind,
    ) -> Result<Self, TreeError> {
        let name = validate_name(name)?;
        kind.validate()?;
        Ok(Self {
            name,
            size,
            created_time,
            kind,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn created_time(&self) -> OffsetDateTime {
        self.created_time
    }

    pub fn kind(&self) -> &FileKind {
        &self.kind
    }

    pub fn file_type(&self) -> FileType {
        self.kind.file_type()
    }

    pub fn detail_text(&self) -> String {
        self.kind.detail_text()
    }

    pub fn extension(&self) -> Option<&str> {
        extension_of(&self.name)
    }

    pub fn rename(&mut self, new_name: &str) -> Result<(), TreeError> {
        self.name = validate_name(new_name)?;
        Ok(())
    }

    /// Same file under a new name and creation time, used for copies.
    pub fn duplicate(&self, name: &str, created_time: OffsetDateTime) -> Result<Self, TreeError> {
        Self::new(name, self.size, created_time, self.kind.clone())
    }
}

pub fn extension_of(name: &str) -> Option<&str> {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
        _ => None,
    }
}

/// A node handed back by [`CloudDirectory::attach_directory`] when the
/// destination already holds a same-named directory.
#[derive(Debug)]
pub struct AttachRejected {
    pub error: TreeError,
    pub node: CloudDirectory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudDirectory {
    name: String,
    created_time: OffsetDateTime,
    directories: Vec<CloudDirectory>,
    files: Vec<CloudFile>,
}

/// Child reference in merged creation order.
#[derive(Debug, Clone, Copy)]
pub enum Child<'a> {
    Directory(&'a CloudDirectory),
    File(&'a CloudFile),
}

/// One step of a depth-first pre-order walk.
#[derive(Debug, Clone)]
pub enum TreeVisit<'a> {
    Directory {
        path: TreePath,
        node: &'a CloudDirectory,
    },
    File {
        path: TreePath,
        node: &'a CloudFile,
    },
}

impl TreeVisit<'_> {
    pub fn path(&self) -> &TreePath {
        match self {
            TreeVisit::Directory { path, .. } | TreeVisit::File { path, .. } => path,
        }
    }

    pub fn trace_line(&self) -> String {
        match self {
            TreeVisit::Directory { path, .. } => format!("Visiting directory: {path}"),
            TreeVisit::File { path, node } => {
                format!("Visiting file: {path} ({})", node.file_type())
            }
        }
    }
}

impl CloudDirectory {
    pub fn new(name: &str, created_time: OffsetDateTime) -> Result<Self, TreeError> {
        Ok(Self {
            name: validate_name(name)?,
            created_time,
            directories: Vec::new(),
            files: Vec::new(),
        })
    }

    pub fn root(created_time: OffsetDateTime) -> Self {
        Self {
            name: ROOT_NAME.to_string(),
            created_time,
            directories: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_time(&self) -> OffsetDateTime {
        self.created_time
    }

    pub fn directories(&self) -> &[CloudDirectory] {
        &self.directories
    }

    pub fn files(&self) -> &[CloudFile] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.files.is_empty()
    }

    pub fn rename(&mut self, new_name: &str) -> Result<(), TreeError> {
        self.name = validate_name(new_name)?;
        Ok(())
    }

    pub fn directory(&self, name: &str) -> Option<&CloudDirectory> {
        self.directory_index(name).map(|index| &self.directories[index])
    }

    pub fn directory_mut(&mut self, name: &str) -> Option<&mut CloudDirectory> {
        self.directory_index(name)
            .map(move |index| &mut self.directories[index])
    }

    pub fn file(&self, name: &str) -> Option<&CloudFile> {
        self.file_index(name).map(|index| &self.files[index])
    }

    fn directory_index(&self, name: &str) -> Option<usize> {
        self.directories
            .iter()
            .position(|dir| names_equal(&dir.name, name.trim()))
    }

    fn file_index(&self, name: &str) -> Option<usize> {
        self.files
            .iter()
            .position(|file| names_equal(&file.name, name.trim()))
    }

    pub fn add_directory(
        &mut self,
        name: &str,
        created_time: OffsetDateTime,
    ) -> Result<&mut CloudDirectory, TreeError> {
        let node = CloudDirectory::new(name, created_time)?;
        self.attach_directory(node).map_err(|rejected| rejected.error)
    }

    /// Inserts an existing node, keeping its identity, children and
    /// creation time. Siblings stay ordered by creation time.
    pub fn attach_directory(
        &mut self,
        node: CloudDirectory,
    ) -> Result<&mut CloudDirectory, Box<AttachRejected>> {
        if self.directory_index(&node.name).is_some() {
            return Err(Box::new(AttachRejected {
                error: TreeError::NameConflict(format!(
                    "directory '{}' already exists in '{}'",
                    node.name, self.name
                )),
                node,
            }));
        }
        let index = self
            .directories
            .iter()
            .position(|dir| dir.created_time > node.created_time)
            .unwrap_or(self.directories.len());
        self.directories.insert(index, node);
        Ok(&mut self.directories[index])
    }

    pub fn detach_directory(&mut self, name: &str) -> Option<CloudDirectory> {
        self.directory_index(name)
            .map(|index| self.directories.remove(index))
    }

    pub fn remove_directory(&mut self, name: &str) -> Option<CloudDirectory> {
        self.detach_directory(name)
    }

    pub fn add_file(&mut self, file: CloudFile) -> Result<&CloudFile, TreeError> {
        if self.file_index(&file.name).is_some() {
            return Err(TreeError::NameConflict(format!(
                "file '{}' already exists in '{}'",
                file.name, self.name
            )));
        }
        let index = self
            .files
            .iter()
            .position(|existing| existing.created_time > file.created_time)
            .unwrap_or(self.files.len());
        self.files.insert(index, file);
        Ok(&self.files[index])
    }

    pub fn remove_file(&mut self, name: &str) -> Option<CloudFile> {
        self.file_index(name).map(|index| self.files.remove(index))
    }

    pub fn rename_directory(&mut self, name: &str, new_name: &str) -> Result<(), TreeError> {
        let new_name = validate_name(new_name)?;
        let index = self
            .directory_index(name)
            .ok_or_else(|| TreeError::not_found(format!("directory '{name}'")))?;
        if let Some(other) = self.directory_index(&new_name)
            && other != index
        {
            return Err(TreeError::NameConflict(format!(
                "directory '{new_name}' already exists in '{}'",
                self.name
            )));
        }
        self.directories[index].name = new_name;
        Ok(())
    }

    pub fn rename_file(&mut self, name: &str, new_name: &str) -> Result<(), TreeError> {
        let new_name = validate_name(new_name)?;
        let index = self
            .file_index(name)
            .ok_or_else(|| TreeError::not_found(format!("file '{name}'")))?;
        if let Some(other) = self.file_index(&new_name)
            && other != index
        {
            return Err(TreeError::NameConflict(format!(
                "file '{new_name}' already exists in '{}'",
                self.name
            )));
        }
        self.files[index].name = new_name;
        Ok(())
    }

    /// Directories and files merged by creation time; a directory wins a tie.
    pub fn children(&self) -> Vec<Child<'_>> {
        let mut out = Vec::with_capacity(self.directories.len() + self.files.len());
        let mut dirs = self.directories.iter().peekable();
        let mut files = self.files.iter().peekable();
        loop {
            let take_file = match (dirs.peek(), files.peek()) {
                (Some(dir), Some(file)) => file.created_time < dir.created_time,
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (None, None) => break,
            };
            if take_file {
                out.extend(files.next().map(Child::File));
            } else {
                out.extend(dirs.next().map(Child::Directory));
            }
        }
        out
    }

    /// Depth-first pre-order walk, children in creation order. `base` is the
    /// path of `self`.
    pub fn walk<'a>(&'a self, base: &TreePath, visitor: &mut dyn FnMut(TreeVisit<'a>)) {
        visitor(TreeVisit::Directory {
            path: base.clone(),
            node: self,
        });
        for child in self.children() {
            match child {
                Child::Directory(dir) => dir.walk(&base.join(&dir.name), visitor),
                Child::File(file) => visitor(TreeVisit::File {
                    path: base.join(&file.name),
                    node: file,
                }),
            }
        }
    }

    pub fn calculate_total_bytes(&self, base: &TreePath, trace: Option<&mut Vec<String>>) -> u64 {
        let mut total = 0u64;
        let mut trace = trace;
        self.walk(base, &mut |visit| {
            if let TreeVisit::File { node, .. } = &visit {
                total = total.saturating_add(node.size);
            }
            if let Some(lines) = trace.as_deref_mut() {
                lines.push(visit.trace_line());
            }
        });
        total
    }

    /// Number of descendant directories and files (excluding `self`).
    pub fn count_descendants(&self) -> (usize, usize) {
        let mut directories = 0usize;
        let mut files = 0usize;
        self.walk(&TreePath::root(), &mut |visit| match visit {
            TreeVisit::Directory { .. } => directories += 1,
            TreeVisit::File { .. } => files += 1,
        });
        (directories.saturating_sub(1), files)
    }

    pub fn find_directory(&self, path: &TreePath) -> Option<&CloudDirectory> {
        let mut current = self;
        for segment in path.segments() {
            current = current.directory(segment)?;
        }
        Some(current)
    }

    pub fn find_directory_mut(&mut self, path: &TreePath) -> Option<&mut CloudDirectory> {
        let mut current = self;
        for segment in path.segments() {
            current = current.directory_mut(segment)?;
        }
        Some(current)
    }

    /// Path rebuilt from the stored names, so its casing matches the tree.
    pub fn canonical_directory_path(&self, path: &TreePath) -> Option<TreePath> {
        let mut current = self;
        let mut canonical = TreePath::root();
        for segment in path.segments() {
            current = current.directory(segment)?;
            canonical = canonical.join(&current.name);
        }
        Some(canonical)
    }

    pub fn find_file(&self, path: &TreePath) -> Option<&CloudFile> {
        let name = path.name()?;
        self.find_directory(&path.parent()?)?.file(name)
    }

    pub fn canonical_file_path(&self, path: &TreePath) -> Option<TreePath> {
        let name = path.name()?;
        let parent = self.canonical_directory_path(&path.parent()?)?;
        let file = self.find_directory(&parent)?.file(name)?;
        Some(parent.join(&file.name))
    }

    /// Indented line-per-node rendering in traversal order.
    pub fn render_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.walk(&TreePath::root(), &mut |visit| match visit {
            TreeVisit::Directory { path, node } => {
                let indent = "  ".repeat(path.depth());
                lines.push(format!("{indent}{}/", node.name));
            }
            TreeVisit::File { path, node } => {
                let indent = "  ".repeat(path.depth());
                lines.push(format!(
                    "{indent}{} ({}, {})",
                    node.name,
                    node.file_type(),
                    format_bytes(node.size)
                ));
            }
        });
        lines
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

#[cfg(test)]
#[path = "tree_tests.rs"]
mod tests;
