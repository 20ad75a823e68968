//! Transactional view over the node graph
//!
//! The [`Linker`] trait is the surface change replay works against;
//! the real store behind it is the embedder's business. All removes
//! and `mkdir` are idempotent by contract, and `atomic` guarantees
//! all-or-nothing effect of the closure it runs.

use crate::error::{Error, Result};
use crate::vcs::nodes::{DirectoryNode, FileNode, GhostNode, Node, NodeKind};
use std::collections::BTreeMap;

/// Mutable, transactional access to the node graph.
pub trait Linker {
    /// Look up the node at `path`, if any.
    fn lookup(&self, path: &str) -> Result<Option<Node>>;

    /// Stage a file node into the graph, creating parent directories.
    /// The file's content is assumed to be present in the backend
    /// under its content hash.
    fn stage_file(&mut self, file: &FileNode) -> Result<Node>;

    /// Ensure a directory exists. Idempotent.
    fn mkdir(&mut self, path: &str, create_parents: bool) -> Result<Node>;

    /// Remove the node at `path`, leaving a ghost in its place when
    /// `force_ghost` is set. Removing a ghost is a no-op. Returns the
    /// parent path and the node now sitting at `path`.
    fn remove(&mut self, path: &str, recursive: bool, force_ghost: bool)
        -> Result<(String, Node)>;

    /// Move the node at `path` to `new_path`, leaving a ghost behind.
    fn mv(&mut self, path: &str, new_path: &str) -> Result<()>;

    /// Run `f` as an isolated unit against the graph: either all of
    /// its effects land, or none do.
    fn atomic<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
        Self: Sized;
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// In-memory node graph. Atomicity is a copy-on-write snapshot of the
/// whole map, restored when the closure fails.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryLinker {
    nodes: BTreeMap<String, Node>,
}

impl MemoryLinker {
    /// Create a graph holding only the root directory.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node::Directory(DirectoryNode::new("/")),
        );
        MemoryLinker { nodes }
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All paths in the graph, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    fn child_paths(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .map(|(path, _)| path.clone())
            .collect()
    }
}

impl Default for MemoryLinker {
    fn default() -> Self {
        Self::new()
    }
}

impl Linker for MemoryLinker {
    fn lookup(&self, path: &str) -> Result<Option<Node>> {
        Ok(self.nodes.get(path).cloned())
    }

    fn stage_file(&mut self, file: &FileNode) -> Result<Node> {
        self.mkdir(&parent_of(&file.path), true)?;

        let node = Node::File(file.clone());
        self.nodes.insert(file.path.clone(), node.clone());
        Ok(node)
    }

    fn mkdir(&mut self, path: &str, create_parents: bool) -> Result<Node> {
        match self.nodes.get(path) {
            Some(node @ Node::Directory(_)) => return Ok(node.clone()),
            Some(Node::Ghost(_)) | None => {}
            Some(other) => {
                return Err(Error::BadNode(format!(
                    "cannot mkdir over {:?} at {}",
                    other.kind(),
                    path
                )))
            }
        }

        let parent = parent_of(path);
        if parent != path {
            if create_parents {
                self.mkdir(&parent, true)?;
            } else if !matches!(self.nodes.get(&parent), Some(Node::Directory(_))) {
                return Err(Error::NotFound(format!("no parent directory for {}", path)));
            }
        }

        let node = Node::Directory(DirectoryNode::new(path));
        self.nodes.insert(path.to_string(), node.clone());
        Ok(node)
    }

    fn remove(
        &mut self,
        path: &str,
        recursive: bool,
        force_ghost: bool,
    ) -> Result<(String, Node)> {
        let node = self
            .nodes
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("cannot remove {}", path)))?;

        // Removing a tombstone again is a no-op.
        if node.is_ghost() {
            return Ok((parent_of(path), node));
        }

        if node.kind() == NodeKind::Directory {
            let children = self.child_paths(path);
            if !children.is_empty() && !recursive {
                return Err(Error::Precondition(format!(
                    "directory not empty: {}",
                    path
                )));
            }
            for child in children {
                self.nodes.remove(&child);
            }
        }

        let replacement = if force_ghost {
            let ghost = Node::Ghost(GhostNode::new(path, node));
            self.nodes.insert(path.to_string(), ghost.clone());
            ghost
        } else {
            self.nodes.remove(path);
            node
        };

        Ok((parent_of(path), replacement))
    }

    fn mv(&mut self, path: &str, new_path: &str) -> Result<()> {
        let node = self
            .nodes
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("cannot move {}", path)))?;

        if node.is_ghost() {
            return Err(Error::BadNode(format!("cannot move a ghost: {}", path)));
        }

        self.mkdir(&parent_of(new_path), true)?;

        let mut moved = node.clone();
        moved.set_path(new_path);
        self.nodes.insert(new_path.to_string(), moved);
        self.nodes
            .insert(path.to_string(), Node::Ghost(GhostNode::new(path, node)));
        Ok(())
    }

    fn atomic<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let snapshot = self.nodes.clone();
        match f(self) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.nodes = snapshot;
                Err(err)
            }
        }
    }
}
