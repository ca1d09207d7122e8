use std::fmt;

use crate::error::TreeError;

/// Slash-delimited location of a node, root is `/`.
///
/// Segments keep the casing they were given; comparisons that decide
/// identity go through [`names_equal`] so lookups stay case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses an absolute (`/docs/a`) or storage-relative (`docs/a`) path.
    pub fn parse(raw: &str) -> Result<Self, TreeError> {
        let mut segments = Vec::new();
        for part in raw.split(['/', '\\']) {
            let part = part.trim();
            if part.is_empty() || part == "." {
                continue;
            }
            if part == ".." {
                return Err(TreeError::validation(format!(
                    "path '{raw}' must not contain '..'"
                )));
            }
            segments.push(part.to_string());
        }
        Ok(Self { segments })
    }

    /// Resolves `raw` against `base`: absolute input replaces the base,
    /// relative input is appended segment by segment and `..` climbs
    /// towards the root (never past it).
    pub fn resolve(base: &TreePath, raw: &str) -> Self {
        let trimmed = raw.trim();
        let mut segments = if trimmed.starts_with('/') {
            Vec::new()
        } else {
            base.segments.clone()
        };
        for part in trimmed.split(['/', '\\']) {
            let part = part.trim();
            match part {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other.to_string()),
            }
        }
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<TreePath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn join(&self, name: &str) -> TreePath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// Storage-relative form used by both backing stores (`docs/a.txt`,
    /// empty for the root).
    pub fn relative(&self) -> String {
        self.segments.join("/")
    }

    pub fn same_as(&self, other: &TreePath) -> bool {
        self.segments.len() == other.segments.len() && self.starts_with(other)
    }

    pub fn is_same_or_descendant_of(&self, ancestor: &TreePath) -> bool {
        self.segments.len() >= ancestor.segments.len() && self.starts_with(ancestor)
    }

    /// Moves `self` from under `from` to under `to`, `None` when `self` is
    /// outside `from`.
    pub fn rebase(&self, from: &TreePath, to: &TreePath) -> Option<TreePath> {
        if !self.is_same_or_descendant_of(from) {
            return None;
        }
        let mut segments = to.segments.clone();
        segments.extend(self.segments[from.segments.len()..].iter().cloned());
        Some(Self { segments })
    }

    fn starts_with(&self, prefix: &TreePath) -> bool {
        self.segments
            .iter()
            .zip(prefix.segments.iter())
            .all(|(left, right)| names_equal(left, right))
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

pub fn names_equal(left: &str, right: &str) -> bool {
    left == right || left.to_lowercase() == right.to_lowercase()
}

/// Trims and checks a node name; the returned value is what gets stored.
pub fn validate_name(raw: &str) -> Result<String, TreeError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(TreeError::validation("name must not be empty"));
    }
    if name == "." || name == ".." {
        return Err(TreeError::validation(format!("'{name}' is not a valid name")));
    }
    if name.contains(['/', '\\']) {
        return Err(TreeError::validation(format!(
            "name '{name}' must not contain path separators"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(TreeError::validation(format!(
            "name {name:?} must not contain control characters"
        )));
    }
    Ok(name.to_string())
}
