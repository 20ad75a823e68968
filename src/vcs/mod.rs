//! Version control: the node model, the transactional graph view,
//! and the change algebra used to replay remote history locally.

pub mod change;
pub mod linker;
pub mod nodes;
pub mod patch;

pub use change::{Change, ChangeMask};
pub use linker::{Linker, MemoryLinker};
pub use nodes::{CommitNode, DirectoryNode, FileNode, GhostNode, Node, NodeKind};
pub use patch::Patch;
