use std::path::{Path, PathBuf};

use cloudtree_core::TreePath;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("path segment '{0}' cannot be mapped onto disk")]
    UnsupportedSegment(String),
}

/// Maps a tree path under `root`. The tree root maps to `root` itself.
pub fn storage_path_for(root: &Path, path: &TreePath) -> Result<PathBuf, PathError> {
    let mut out = root.to_path_buf();
    for segment in path.segments() {
        if segment.is_empty()
            || segment == "."
            || segment == ".."
            || segment.contains(['/', '\\'])
        {
            return Err(PathError::UnsupportedSegment(segment.clone()));
        }
        out.push(segment);
    }
    Ok(out)
}
