//! Session key derivation using Argon2id
//!
//! The transport feeds the XOR of both handshake nonces through this
//! KDF twice (different salt halves) to obtain the symmetric key and
//! IV for the post-handshake stream cipher. The input is already high
//! entropy, so the cost parameters are fixed and deliberately light.

use crate::error::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroizing;

/// Argon2 memory cost in KiB for session keys
const SESSION_MEMORY_KIB: u32 = 4096;

/// Argon2 iteration count for session keys
const SESSION_ITERATIONS: u32 = 3;

/// Argon2 lane count for session keys
const SESSION_PARALLELISM: u32 = 1;

/// Derive `len` bytes of key material from `source` and `salt`.
///
/// Deterministic: the same `(source, salt, len)` always yields the
/// same output, which is what lets both peers arrive at the same
/// session key independently.
pub fn derive_session_key(source: &[u8], salt: &[u8], len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let params = Params::new(
        SESSION_MEMORY_KIB,
        SESSION_ITERATIONS,
        SESSION_PARALLELISM,
        Some(len),
    )
    .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = Zeroizing::new(vec![0u8; len]);
    argon2
        .hash_password_into(source, salt, &mut out)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let source = [0x5au8; 62];

        let key1 = derive_session_key(&source, &source[..31], 32).unwrap();
        let key2 = derive_session_key(&source, &source[..31], 32).unwrap();

        assert_eq!(key1, key2);
        assert_eq!(key1.len(), 32);
    }

    #[test]
    fn test_different_salts_different_keys() {
        let source = [0x5au8; 62];

        let key = derive_session_key(&source, &source[..31], 32).unwrap();
        let iv = derive_session_key(&source, &source[31..], 32).unwrap();

        assert_ne!(key, iv);
    }

    #[test]
    fn test_requested_length_is_respected() {
        let source = [0x11u8; 62];

        let iv = derive_session_key(&source, &source[31..], 16).unwrap();
        assert_eq!(iv.len(), 16);
    }

    #[test]
    fn test_different_sources_different_keys() {
        let salt = [0x01u8; 31];

        let key1 = derive_session_key(b"source one, long enough", &salt, 32).unwrap();
        let key2 = derive_session_key(b"source two, long enough", &salt, 32).unwrap();

        assert_ne!(key1, key2);
    }
}
