//! Node model: the closed set of entries a file tree graph can hold
//!
//! Files and directories are the live entries. A ghost is a tombstone
//! left behind by a remove or move; it wraps the node it replaced so
//! history can still resolve the old identity. Commits pin immutable
//! snapshots and only bracket changes, they never sit in the tree.

use crate::store::backend::ContentHash;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Discriminant of a [`Node`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Directory,
    Ghost,
    Commit,
}

/// A regular file entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    /// Path relative to the tree root
    pub path: String,

    /// Content address of the (encrypted) file data
    pub content_hash: ContentHash,

    /// Plaintext size in bytes
    pub size: u64,

    /// Modification timestamp
    pub mtime: SystemTime,
}

impl FileNode {
    /// Create a file node stamped with the current time.
    pub fn new(path: &str, content_hash: ContentHash, size: u64) -> Self {
        FileNode {
            path: path.to_string(),
            content_hash,
            size,
            mtime: SystemTime::now(),
        }
    }
}

/// A directory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub path: String,
}

impl DirectoryNode {
    pub fn new(path: &str) -> Self {
        DirectoryNode {
            path: path.to_string(),
        }
    }
}

/// Tombstone for a removed or moved node. Keeps the node it replaced,
/// which still carries its old path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostNode {
    /// Where the tombstone sits now
    pub path: String,

    /// The node this ghost replaced
    pub old: Box<Node>,
}

impl GhostNode {
    pub fn new(path: &str, old: Node) -> Self {
        GhostNode {
            path: path.to_string(),
            old: Box::new(old),
        }
    }
}

/// An immutable snapshot of the tree, identified by hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitNode {
    pub hash: String,
}

impl CommitNode {
    pub fn new(hash: &str) -> Self {
        CommitNode {
            hash: hash.to_string(),
        }
    }
}

/// An entry in the file tree graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    File(FileNode),
    Directory(DirectoryNode),
    Ghost(GhostNode),
    Commit(CommitNode),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::File(_) => NodeKind::File,
            Node::Directory(_) => NodeKind::Directory,
            Node::Ghost(_) => NodeKind::Ghost,
            Node::Commit(_) => NodeKind::Commit,
        }
    }

    /// The node's path in the tree. Commits live outside the tree and
    /// have none.
    pub fn path(&self) -> &str {
        match self {
            Node::File(f) => &f.path,
            Node::Directory(d) => &d.path,
            Node::Ghost(g) => &g.path,
            Node::Commit(_) => "",
        }
    }

    pub(crate) fn set_path(&mut self, path: &str) {
        match self {
            Node::File(f) => f.path = path.to_string(),
            Node::Directory(d) => d.path = path.to_string(),
            Node::Ghost(g) => g.path = path.to_string(),
            Node::Commit(_) => {}
        }
    }

    pub fn is_ghost(&self) -> bool {
        matches!(self, Node::Ghost(_))
    }

    /// This node, or the node it was before it became a ghost.
    pub fn unghosted(&self) -> &Node {
        match self {
            Node::Ghost(g) => &g.old,
            other => other,
        }
    }
}
