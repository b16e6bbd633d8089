//! Pending-change log shared by the store implementations.

use crate::content::Node;
use crate::types::is_same_or_descendant;

#[derive(Debug, Clone)]
pub(crate) enum StagedOp {
    Put { path: String, node: Node },
    Remove { path: String },
}

/// Ordered log of staged operations.
#[derive(Debug, Default)]
pub(crate) struct Staging {
    ops: Vec<StagedOp>,
}

impl Staging {
    pub fn push(&mut self, op: StagedOp) {
        self.ops.push(op);
    }

    pub fn take(&mut self) -> Vec<StagedOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Resolve `path` against the log, falling back to committed state.
    ///
    /// The latest operation touching `path` wins. A staged put below `path`
    /// implies `path` exists, as a folder if nothing else is known about it.
    pub fn resolve<F>(&self, path: &str, committed: F) -> Option<Node>
    where
        F: FnOnce(&str) -> Option<Node>,
    {
        let mut implied = false;
        for op in self.ops.iter().rev() {
            match op {
                StagedOp::Put { path: p, node } if p == path => return Some(node.clone()),
                StagedOp::Put { path: p, .. } if p != path && is_same_or_descendant(p, path) => {
                    implied = true;
                }
                StagedOp::Remove { path: p } if is_same_or_descendant(path, p) => {
                    return implied.then(Node::folder);
                }
                _ => {}
            }
        }
        committed(path).or_else(|| implied.then(Node::folder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(path: &str, node: Node) -> StagedOp {
        StagedOp::Put {
            path: path.to_string(),
            node,
        }
    }

    #[test]
    fn test_latest_put_wins() {
        let mut staging = Staging::default();
        staging.push(put("/a", Node::file(b"1".to_vec())));
        staging.push(put("/a", Node::file(b"2".to_vec())));
        let node = staging.resolve("/a", |_| None).expect("node should resolve");
        assert_eq!(node.data.as_deref(), Some(b"2".as_slice()));
    }

    #[test]
    fn test_remove_hides_committed_subtree() {
        let mut staging = Staging::default();
        staging.push(StagedOp::Remove {
            path: "/a".to_string(),
        });
        assert!(staging.resolve("/a/b", |_| Some(Node::folder())).is_none());
    }

    #[test]
    fn test_put_below_removed_node_implies_folder() {
        let mut staging = Staging::default();
        staging.push(StagedOp::Remove {
            path: "/a".to_string(),
        });
        staging.push(put("/a/b", Node::folder()));
        let node = staging
            .resolve("/a", |_| Some(Node::structured(Default::default())))
            .expect("parent should be implied");
        assert_eq!(node.kind, crate::content::NodeKind::Folder);
    }

    #[test]
    fn test_explicit_parent_survives_child_put() {
        let mut staging = Staging::default();
        staging.push(put("/a", Node::folder().with_property("title", "A")));
        staging.push(put("/a/b", Node::folder()));
        let node = staging.resolve("/a", |_| None).expect("node should resolve");
        assert_eq!(node.property("title"), Some(&serde_json::json!("A")));
    }
}
