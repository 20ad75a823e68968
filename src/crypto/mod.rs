//! Cryptographic building blocks: the streaming AEAD codec and the
//! session key derivation used by the authenticated transport.

pub mod kdf;
pub mod stream;

/// AEAD key size in bytes (both supported ciphers take 256-bit keys)
pub const KEY_SIZE: usize = 32;

/// AEAD nonce size in bytes
pub const NONCE_SIZE: usize = ring::aead::NONCE_LEN;

/// AEAD authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

use serde::{Deserialize, Serialize};

/// AEAD cipher used by the stream codec.
///
/// The choice is an out-of-band agreement between writer and reader;
/// the ciphertext carries no cipher marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherKind {
    #[default]
    ChaCha20Poly1305,
    Aes256Gcm,
}

impl CipherKind {
    pub(crate) fn algorithm(self) -> &'static ring::aead::Algorithm {
        match self {
            CipherKind::ChaCha20Poly1305 => &ring::aead::CHACHA20_POLY1305,
            CipherKind::Aes256Gcm => &ring::aead::AES_256_GCM,
        }
    }
}

/// How the codec picks per-block nonces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NonceMode {
    /// Last bytes of a running SHA-1 over the cumulative plaintext.
    /// Identical plaintext under an identical key yields identical
    /// ciphertext, so the encrypted form deduplicates in the backend.
    /// Kept for bit-compatibility with existing stores.
    #[default]
    Derived,

    /// Random 4-byte stream prefix plus a big-endian block counter,
    /// persisted in a versioned stream header. Safer, but the random
    /// prefix forfeits ciphertext deduplication.
    Counter,
}
