use cloudtree_core::{NodeKind, NodeRef, NodeTag, Tag, TreePath, TreeVisit};
use tracing::{debug, info};

use super::{CommandContext, ConsistencyGateway, GatewayError, locate_directory, resolve_node};

/// Outcome of a tag command. `changed` is false when the node already had
/// (or already lacked) the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagChange {
    pub node: NodeRef,
    pub tag: Tag,
    pub changed: bool,
}

impl ConsistencyGateway {
    pub async fn assign_tag(
        &self,
        path: &TreePath,
        tag: &str,
        ctx: &mut CommandContext,
    ) -> Result<TagChange, GatewayError> {
        let tag: Tag = tag.parse()?;
        let tree = self.tree.write().await;
        let node = resolve_node(&tree, path)?;
        ctx.ensure_active()?;
        let changed = self.metadata.assign_tag(&node, tag).await?;
        if changed {
            ctx.trace(format!("Tagged {} {} as {}", node.kind.as_str(), node.path, tag));
            info!(path = %node.path, %tag, "tag assigned");
        } else {
            ctx.trace(format!("{} already tagged {}", node.path, tag));
        }
        Ok(TagChange { node, tag, changed })
    }

    pub async fn remove_tag(
        &self,
        path: &TreePath,
        tag: &str,
        ctx: &mut CommandContext,
    ) -> Result<TagChange, GatewayError> {
        let tag: Tag = tag.parse()?;
        let tree = self.tree.write().await;
        let node = resolve_node(&tree, path)?;
        ctx.ensure_active()?;
        let changed = self.metadata.remove_tag(&node, tag).await?;
        if changed {
            ctx.trace(format!("Removed tag {} from {}", tag, node.path));
            info!(path = %node.path, %tag, "tag removed");
        } else {
            ctx.trace(format!("{} was not tagged {}", node.path, tag));
        }
        Ok(TagChange { node, tag, changed })
    }

    /// Tag assignments within `scope` (whole tree when `None`), in traversal
    /// order with tags in set order per node.
    pub async fn list_tags(&self, scope: Option<&TreePath>) -> Result<Vec<NodeTag>, GatewayError> {
        let tree = self.tree.read().await;
        let (base, node) = locate_directory(&tree, scope.unwrap_or(&TreePath::root()))?;
        let mut assigned = self.metadata.list_tags().await?;
        assigned.retain(|entry| entry.node.path.is_same_or_descendant_of(&base));
        assigned.sort_by_key(|entry| entry.tag);

        let mut ordered = Vec::with_capacity(assigned.len());
        node.walk(&base, &mut |visit| {
            let kind = match visit {
                TreeVisit::Directory { .. } => NodeKind::Directory,
                TreeVisit::File { .. } => NodeKind::File,
            };
            let path = visit.path();
            ordered.extend(
                assigned
                    .iter()
                    .filter(|entry| entry.node.kind == kind && entry.node.path.same_as(path))
                    .map(|entry| NodeTag {
                        node: NodeRef {
                            path: path.clone(),
                            kind,
                        },
                        tag: entry.tag,
                    }),
            );
        });
        debug!(scope = %base, count = ordered.len(), "tags listed");
        Ok(ordered)
    }

    pub async fn find_tagged_paths(
        &self,
        tag: &str,
        scope: Option<&TreePath>,
    ) -> Result<Vec<TreePath>, GatewayError> {
        let tag: Tag = tag.parse()?;
        Ok(self
            .list_tags(scope)
            .await?
            .into_iter()
            .filter(|entry| entry.tag == tag)
            .map(|entry| entry.node.path)
            .collect())
    }
}
