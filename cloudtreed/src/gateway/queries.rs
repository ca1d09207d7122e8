use cloudtree_core::{
    Child, CloudDirectory, CloudFile, DirectoryEntry, FileKind, TreeError, TreePath, TreeVisit,
    format_bytes, list_entries,
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use super::{ConsistencyGateway, GatewayError, locate_directory, locate_file};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeReport {
    pub path: TreePath,
    pub bytes: u64,
    pub formatted: String,
    pub trace: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReport {
    pub matches: Vec<TreePath>,
    pub trace: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryListing {
    pub path: TreePath,
    pub entries: Vec<DirectoryEntry>,
}

/// Result of comparing the in-memory tree against both stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub checked: usize,
    /// Nodes known to the tree but absent on disk.
    pub missing: Vec<String>,
    /// Whether a fresh load of the metadata store renders the same tree.
    pub metadata_matches: bool,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.metadata_matches
    }
}

fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push_str(&format!("&#{};", u32::from(c))),
            // Not representable in XML 1.0.
            other if u32::from(other) < 0x20 => {}
            other => out.push(other),
        }
    }
    out
}

fn write_file_element(out: &mut String, file: &CloudFile, depth: usize) {
    let indent = "  ".repeat(depth);
    let shape = match file.kind() {
        FileKind::Word { page_count } => format!(" pageCount=\"{page_count}\""),
        FileKind::Image { width, height } => format!(" width=\"{width}\" height=\"{height}\""),
        FileKind::Text { encoding } => format!(" encoding=\"{}\"", escape_xml(encoding)),
    };
    out.push_str(&format!(
        "{indent}<file name=\"{}\" size=\"{}\" createdTime=\"{}\" type=\"{}\" detail=\"{}\"{shape}/>\n",
        escape_xml(file.name()),
        file.size(),
        rfc3339(file.created_time()),
        file.file_type(),
        escape_xml(&file.detail_text()),
    ));
}

fn write_directory_element(out: &mut String, dir: &CloudDirectory, depth: usize) {
    let indent = "  ".repeat(depth);
    let open = format!(
        "{indent}<directory name=\"{}\" createdTime=\"{}\"",
        escape_xml(dir.name()),
        rfc3339(dir.created_time())
    );
    let children = dir.children();
    if children.is_empty() {
        out.push_str(&open);
        out.push_str("/>\n");
        return;
    }
    out.push_str(&open);
    out.push_str(">\n");
    for child in children {
        match child {
            Child::Directory(node) => write_directory_element(out, node, depth + 1),
            Child::File(node) => write_file_element(out, node, depth + 1),
        }
    }
    out.push_str(&format!("{indent}</directory>\n"));
}

/// The whole tree as an XML document, nodes in traversal order.
pub(crate) fn render_xml(tree: &CloudDirectory) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    write_directory_element(&mut out, tree, 0);
    out
}

impl ConsistencyGateway {
    pub async fn tree_lines(&self) -> Vec<String> {
        self.tree.read().await.render_lines()
    }

    /// Aggregate size of a directory subtree, or of a single file.
    pub async fn total_size(&self, path: &TreePath) -> Result<SizeReport, GatewayError> {
        let tree = self.tree.read().await;
        let mut trace = Vec::new();
        let (path, bytes) = match locate_directory(&tree, path) {
            Ok((path, node)) => {
                let bytes = node.calculate_total_bytes(&path, Some(&mut trace));
                (path, bytes)
            }
            Err(GatewayError::Tree(TreeError::NotFound(_))) => {
                let (path, file) = locate_file(&tree, path)
                    .map_err(|_| TreeError::not_found(format!("{path} does not exist")))?;
                trace.push(format!("Visiting file: {path} ({})", file.file_type()));
                (path, file.size())
            }
            Err(err) => return Err(err),
        };
        let formatted = format_bytes(bytes);
        trace.push(format!("Total size of {path}: {formatted}"));
        debug!(%path, bytes, "size calculated");
        Ok(SizeReport {
            path,
            bytes,
            formatted,
            trace,
        })
    }

    /// Files under `scope` whose extension matches, compared without case.
    /// A leading dot on `extension` is ignored.
    pub async fn search_by_extension(
        &self,
        extension: &str,
        scope: &TreePath,
    ) -> Result<SearchReport, GatewayError> {
        let wanted = extension.trim().trim_start_matches('.');
        if wanted.is_empty() {
            return Err(TreeError::validation("extension must not be empty").into());
        }
        let tree = self.tree.read().await;
        let (base, node) = locate_directory(&tree, scope)?;
        let mut matches = Vec::new();
        let mut trace = Vec::new();
        node.walk(&base, &mut |visit| {
            trace.push(visit.trace_line());
            if let TreeVisit::File { path, node } = visit
                && node
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
            {
                trace.push(format!("Match: {path}"));
                matches.push(path);
            }
        });
        trace.push(format!(
            "Found {} file(s) with extension .{wanted} under {base}",
            matches.len()
        ));
        debug!(scope = %base, extension = wanted, found = matches.len(), "search finished");
        Ok(SearchReport { matches, trace })
    }

    pub async fn export_xml(&self) -> String {
        let tree = self.tree.read().await;
        render_xml(&tree)
    }

    /// Immediate children of a directory in creation order.
    pub async fn list_directory(&self, path: &TreePath) -> Result<DirectoryListing, GatewayError> {
        let tree = self.tree.read().await;
        let (path, node) = locate_directory(&tree, path)?;
        let entries = list_entries(node, &path);
        Ok(DirectoryListing { path, entries })
    }

    /// Checks every node of the tree against the physical store and reloads
    /// the metadata store for comparison. Read-only.
    pub async fn verify(&self) -> Result<DriftReport, GatewayError> {
        let tree = self.tree.read().await;
        let mut paths = Vec::new();
        tree.walk(&TreePath::root(), &mut |visit| paths.push(visit.path().clone()));

        let mut missing = Vec::new();
        for path in &paths {
            if !self.physical.exists(path).await? {
                missing.push(path.to_string());
            }
        }
        let stored = self.metadata.load_tree().await?;
        let metadata_matches = stored.render_lines() == tree.render_lines();
        if !missing.is_empty() || !metadata_matches {
            warn!(
                missing = missing.len(),
                metadata_matches, "drift between the stores"
            );
        }
        Ok(DriftReport {
            checked: paths.len(),
            missing,
            metadata_matches,
        })
    }
}
