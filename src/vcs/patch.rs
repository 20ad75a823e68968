//! Patches: the unit of replication between peers
//!
//! A patch is an ordered list of per-node changes, usually one
//! combined change per node. Peers serialize a patch, ship it over
//! the authenticated transport and replay it onto their own graph.

use crate::error::{Error, Result};
use crate::vcs::change::Change;
use crate::vcs::linker::Linker;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// An ordered list of changes to apply to a remote graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub changes: Vec<Change>,
}

impl Patch {
    pub fn new(changes: Vec<Change>) -> Self {
        Patch { changes }
    }

    /// Number of changes carried.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Replay every change in order onto `linker`.
    pub fn apply<L: Linker>(&self, linker: &mut L) -> Result<()> {
        debug!(changes = self.changes.len(), "applying patch");
        for change in &self.changes {
            change.replay(linker)?;
        }
        Ok(())
    }

    /// Serialize for transfer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a patch received from a peer.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::Serialization(e.to_string()))
    }
}
