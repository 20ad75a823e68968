//! Per-node change records
//!
//! A change captures how one node evolved between two commits. Changes
//! can be replayed onto another graph, combined into one equivalent
//! change, and shipped over the wire. Combining is lossy by design:
//! metadata may be dropped, content never.

use crate::error::{Error, Result};
use crate::vcs::linker::Linker;
use crate::vcs::nodes::{CommitNode, Node, NodeKind};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Mask of state change events on a node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChangeMask: u8 {
        /// The node was initially added.
        const ADD = 1 << 0;
        /// The node's content was modified.
        const MODIFY = 1 << 1;
        /// The node was moved. Move and modify can happen together.
        const MOVE = 1 << 2;
        /// The node was removed.
        const REMOVE = 1 << 3;
    }
}

impl ChangeMask {
    /// Two changes are compatible when combining them cannot lose
    /// content: at least one of them must carry neither an add nor a
    /// modify. A pure rename or remove commutes with anything.
    pub fn is_compatible(self, other: ChangeMask) -> bool {
        let content = ChangeMask::ADD | ChangeMask::MODIFY;
        !self.intersects(content) || !other.intersects(content)
    }
}

impl fmt::Display for ChangeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(ChangeMask::ADD) {
            parts.push("added");
        }
        if self.contains(ChangeMask::MODIFY) {
            parts.push("modified");
        }
        if self.contains(ChangeMask::MOVE) {
            parts.push("moved");
        }
        if self.contains(ChangeMask::REMOVE) {
            parts.push("removed");
        }

        if parts.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", parts.join("|"))
        }
    }
}

mod mask_serde {
    use super::ChangeMask;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(mask: &ChangeMask, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(mask.bits())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ChangeMask, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = u8::deserialize(deserializer)?;
        ChangeMask::from_bits(bits)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid change mask: {:#x}", bits)))
    }
}

/// A single change of a node between two commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// What happened between `next` and `head`.
    #[serde(with = "mask_serde")]
    pub mask: ChangeMask,

    /// The commit that was HEAD when this change happened.
    pub head: CommitNode,

    /// The commit before `head`.
    pub next: CommitNode,

    /// The node with its attributes at `head`.
    pub curr: Node,

    /// Where the node was moved to, when this change is the source
    /// side of a move. Empty otherwise.
    pub moved_to: String,

    /// Where `curr` sat before a move. Empty on changes without one.
    pub was_previously_at: String,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}:{}", self.curr.path(), self.mask)?;
        if !self.was_previously_at.is_empty() {
            write!(f, " (was {})", self.was_previously_at)?;
        }
        if !self.moved_to.is_empty() {
            write!(f, " (now {})", self.moved_to)?;
        }
        write!(f, ">")
    }
}

impl Change {
    /// Apply this change onto `linker` by redoing the same operations:
    /// add or modify, move, remove. Commits are not replayed. Runs as
    /// one atomic unit and is safe to repeat against the same state.
    pub fn replay<L: Linker>(&self, linker: &mut L) -> Result<()> {
        linker.atomic(|lkr| {
            if self.mask.intersects(ChangeMask::ADD | ChangeMask::MODIFY) {
                // A ghost is unpacked first: it is staged as if it had
                // never died, and the REMOVE bit then buries it again.
                let curr = self.curr.unghosted();

                // A node of a conflicting type has to go first.
                if let Some(old) = lkr.lookup(curr.path())? {
                    if old.kind() != curr.kind() {
                        lkr.remove(curr.path(), false, true)?;
                    }
                }

                match curr {
                    Node::File(file) => {
                        lkr.stage_file(file)?;
                    }
                    Node::Directory(dir) => {
                        lkr.mkdir(&dir.path, true)?;
                    }
                    other => {
                        return Err(Error::BadNode(format!(
                            "replay: cannot stage {:?}",
                            other.kind()
                        )))
                    }
                }
            }

            if self.mask.contains(ChangeMask::MOVE) {
                if !self.was_previously_at.is_empty() {
                    if let Some(old) = lkr.lookup(&self.was_previously_at)? {
                        if old.kind() != NodeKind::Ghost {
                            lkr.remove(&self.was_previously_at, true, true)?;
                        }
                    }
                }

                if !self.moved_to.is_empty() && lkr.lookup(self.curr.path())?.is_some() {
                    lkr.mv(self.curr.path(), &self.moved_to)?;
                }
            }

            // A ghost source may also have a live counterpart at the
            // old place; clear that too.
            if self.mask.contains(ChangeMask::MOVE) && self.curr.kind() != NodeKind::Ghost {
                if let Some(old) = lkr.lookup(&self.was_previously_at)? {
                    if old.kind() != NodeKind::Ghost {
                        lkr.remove(&self.was_previously_at, true, true)?;
                    }
                }
            }

            // Only remove when we are handed a ghost; otherwise the
            // node might have been removed and added again.
            if self.mask.contains(ChangeMask::REMOVE) && self.curr.kind() == NodeKind::Ghost {
                let curr = lkr
                    .lookup(self.curr.path())?
                    .ok_or_else(|| Error::NotFound(format!("replay: {}", self.curr.path())))?;
                if curr.kind() != NodeKind::Ghost {
                    lkr.remove(self.curr.path(), true, true)?;
                }
            }

            Ok(())
        })
    }

    /// Serialize for transfer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a change received from a peer.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Compress a chronological list of changes (newest first) into
    /// one change that recreates the same end state. Lossy: it keeps
    /// the newest node attributes and merges the masks.
    pub fn combine(changes: &[Change]) -> Option<Change> {
        let newest = changes.first()?;
        let oldest = changes.last()?;

        let mut combined = Change {
            mask: ChangeMask::empty(),
            head: newest.head.clone(),
            next: newest.next.clone(),
            curr: newest.curr.clone(),
            moved_to: String::new(),
            was_previously_at: String::new(),
        };

        let path_changed = newest.curr.path() != oldest.curr.path();
        let is_ghost = newest.curr.kind() == NodeKind::Ghost;

        for change in changes {
            combined.mask |= change.mask;
        }

        if combined.mask.contains(ChangeMask::MOVE) {
            for change in changes.iter().rev() {
                if !change.moved_to.is_empty() {
                    combined.moved_to = change.moved_to.clone();
                    break;
                }
            }
            for change in changes.iter().rev() {
                if !change.was_previously_at.is_empty() {
                    combined.was_previously_at = change.was_previously_at.clone();
                    break;
                }
            }
        }

        // A move that ends where it started is no move, unless it is a
        // ghost: those still need to convey where they came from.
        if !path_changed && !is_ghost {
            combined.mask -= ChangeMask::MOVE;
        }

        // A remove in the middle of the chain was undone by whatever
        // came after it.
        if !newest.mask.contains(ChangeMask::REMOVE) && !is_ghost {
            combined.mask -= ChangeMask::REMOVE;
        }

        Some(combined)
    }
}
