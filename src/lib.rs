//! vaultsync - core data plane of a distributed, content-addressed,
//! encrypted file synchronization system.
//!
//! Peers keep independent versioned snapshots of a file tree and
//! reconcile them over an authenticated encrypted channel. This crate
//! provides the three subsystems everything else hangs off:
//! a seekable block-framed AEAD codec, a copy-on-write overlay over
//! read-only streams, and the per-node change algebra used to replay
//! remote history onto the local node graph.

pub mod compress;
pub mod config;
pub mod crypto;
pub mod error;
pub mod net;
pub mod store;
pub mod vcs;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, EncryptionConfig};
    pub use crate::crypto::stream::{StreamDecrypter, StreamEncrypter};
    pub use crate::error::{Error, Result};
    pub use crate::store::overlay::Layer;
    pub use crate::vcs::change::{Change, ChangeMask};
}
