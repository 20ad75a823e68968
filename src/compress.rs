//! Snappy compression for transport message bodies
//!
//! Every payload carries a one-byte algorithm tag so peers can skip
//! compression for data that is already dense.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Compression algorithm identifier, serialized as the first byte
/// of every packed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algo {
    /// Payload is stored verbatim
    None,
    /// Raw (unframed) Snappy
    #[default]
    Snappy,
}

impl Algo {
    fn tag(self) -> u8 {
        match self {
            Algo::None => 0,
            Algo::Snappy => 1,
        }
    }
}

/// Compress `data` with the given algorithm, prepending the tag byte.
pub fn pack(data: &[u8], algo: Algo) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() + 1);
    out.push(algo.tag());

    match algo {
        Algo::None => out.extend_from_slice(data),
        Algo::Snappy => {
            let compressed = snap::raw::Encoder::new()
                .compress_vec(data)
                .map_err(|e| Error::Compression(format!("snappy compression failed: {}", e)))?;
            out.extend_from_slice(&compressed);
        }
    }

    Ok(out)
}

/// Reverse of [`pack`]: read the tag byte and decompress the rest.
pub fn unpack(data: &[u8]) -> Result<Vec<u8>> {
    let (tag, body) = data
        .split_first()
        .ok_or_else(|| Error::Compression("empty packed payload".to_string()))?;

    match tag {
        0 => Ok(body.to_vec()),
        1 => snap::raw::Decoder::new()
            .decompress_vec(body)
            .map_err(|e| Error::Compression(format!("snappy decompression failed: {}", e))),
        other => Err(Error::Compression(format!(
            "unknown compression algorithm id: {}",
            other
        ))),
    }
}
