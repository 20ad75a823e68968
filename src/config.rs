//! Configuration management for vaultsync

use crate::compress::Algo;
use crate::crypto::{CipherKind, NonceMode};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default name a peer advertises during the transport handshake
pub const DEFAULT_PEER_NAME: &str = "vaultsync";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Stream codec configuration
    pub encryption: EncryptionConfig,

    /// Authenticated transport configuration
    pub transport: TransportConfig,
}

/// Stream codec configuration
///
/// Writer and reader must agree on both fields; the ciphertext itself
/// carries no cipher marker (and no header at all in derived mode).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// AEAD cipher for block encryption
    pub cipher: CipherKind,

    /// Nonce derivation scheme
    pub nonce_mode: NonceMode,
}

/// Authenticated transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Name advertised to the remote during the handshake.
    /// Display only; identity comes from the public key check.
    pub name: String,

    /// Compression applied to message bodies before encryption
    pub compression: Algo,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            name: DEFAULT_PEER_NAME.to_string(),
            compression: Algo::Snappy,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
