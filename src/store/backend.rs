//! Content-addressed blob storage
//!
//! Blobs are addressed by the BLAKE3 hash of their stored (encrypted)
//! bytes. Combined with the deterministic codec this means identical
//! plaintext under the same key lands on the same address, so peers
//! deduplicate without ever seeing each other's plaintext.

use crate::config::EncryptionConfig;
use crate::crypto::stream::{StreamDecrypter, StreamEncrypter};
use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{Cursor, Read};

/// Content-based blob identifier (BLAKE3 hash, hex)
pub type ContentHash = String;

/// A content-addressed blob store.
pub trait Backend {
    /// Store a blob, returning its content hash.
    fn put(&self, data: &[u8]) -> Result<ContentHash>;

    /// Fetch a blob by content hash.
    fn get(&self, hash: &str) -> Result<Vec<u8>>;

    /// Check whether a blob is present.
    fn has(&self, hash: &str) -> bool;
}

/// In-memory backend, mostly useful for tests and as the reference
/// for what a real store has to guarantee.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: RwLock<HashMap<ContentHash, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl Backend for MemoryBackend {
    fn put(&self, data: &[u8]) -> Result<ContentHash> {
        let hash = blake3::hash(data).to_hex().to_string();
        self.blobs.write().insert(hash.clone(), data.to_vec());
        Ok(hash)
    }

    fn get(&self, hash: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .get(hash)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no blob for hash {}", hash)))
    }

    fn has(&self, hash: &str) -> bool {
        self.blobs.read().contains_key(hash)
    }
}

/// Encrypt `src` through the stream codec and store the ciphertext,
/// returning its content address.
pub fn put_stream<R: Read, B: Backend>(
    src: &mut R,
    key: &[u8; KEY_SIZE],
    config: &EncryptionConfig,
    backend: &B,
) -> Result<ContentHash> {
    let mut ciphertext = Vec::new();
    let mut encrypter = StreamEncrypter::new(&mut ciphertext, key, config)?;
    std::io::copy(src, &mut encrypter)?;
    encrypter.finish()?;
    drop(encrypter);

    backend.put(&ciphertext)
}

/// Fetch a blob by content address and decrypt it back to plaintext.
pub fn get_stream<B: Backend>(
    hash: &str,
    key: &[u8; KEY_SIZE],
    config: &EncryptionConfig,
    backend: &B,
) -> Result<Vec<u8>> {
    let ciphertext = backend.get(hash)?;
    let mut decrypter = StreamDecrypter::new(Cursor::new(ciphertext), key, config)?;

    let mut plaintext = Vec::new();
    decrypter.read_to_end(&mut plaintext)?;
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::overlay::Layer;
    use std::io::{Seek, SeekFrom, Write};

    fn test_key() -> [u8; KEY_SIZE] {
        [0x42u8; KEY_SIZE]
    }

    #[test]
    fn test_put_get_roundtrip() {
        let backend = MemoryBackend::new();

        let hash = backend.put(b"some blob").unwrap();
        assert!(backend.has(&hash));
        assert_eq!(backend.get(&hash).unwrap(), b"some blob");
    }

    #[test]
    fn test_get_unknown_hash_fails() {
        let backend = MemoryBackend::new();
        assert!(!backend.has("missing"));
        assert!(matches!(
            backend.get("missing"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_identical_blobs_deduplicate() {
        let backend = MemoryBackend::new();

        let h1 = backend.put(b"same bytes").unwrap();
        let h2 = backend.put(b"same bytes").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn test_stream_roundtrip_through_backend() {
        let backend = MemoryBackend::new();
        let config = EncryptionConfig::default();
        let plaintext = b"file contents worth keeping".to_vec();

        let hash =
            put_stream(&mut Cursor::new(&plaintext), &test_key(), &config, &backend).unwrap();
        let restored = get_stream(&hash, &test_key(), &config, &backend).unwrap();
        assert_eq!(restored, plaintext);
    }

    #[test]
    fn test_encrypted_form_deduplicates() {
        // Deterministic encryption: the same plaintext under the same
        // key maps to the same content address.
        let backend = MemoryBackend::new();
        let config = EncryptionConfig::default();
        let plaintext = vec![0x11u8; 50_000];

        let h1 =
            put_stream(&mut Cursor::new(&plaintext), &test_key(), &config, &backend).unwrap();
        let h2 =
            put_stream(&mut Cursor::new(&plaintext), &test_key(), &config, &backend).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn test_overlay_flush_pipeline() {
        // The full write path: mutate a read-only base through the
        // overlay, then flush the merged view into the backend.
        let backend = MemoryBackend::new();
        let config = EncryptionConfig::default();

        let base = Cursor::new(b"00000000001111111111".to_vec());
        let mut layer = Layer::new(base);
        layer.seek(SeekFrom::Start(5)).unwrap();
        layer.write_all(b"XXXXX").unwrap();
        layer.seek(SeekFrom::Start(0)).unwrap();

        let hash = put_stream(&mut layer, &test_key(), &config, &backend).unwrap();
        let restored = get_stream(&hash, &test_key(), &config, &backend).unwrap();
        assert_eq!(restored, b"00000XXXXX1111111111");
    }
}
