//! Block-framed streaming AEAD codec with seekable decryption
//!
//! Plaintext is cut into 4 MiB blocks; each block becomes one frame
//! `[size: u32 BE | nonce: 12 | ciphertext+tag: size]` where `size` is
//! the plaintext length plus the 16-byte tag. Frames have a fixed
//! stride on disk, so a plaintext offset maps straight to a frame
//! offset and decryption can seek without scanning.
//!
//! In the default [`NonceMode::Derived`] the nonce is the tail of a
//! running SHA-1 over the cumulative plaintext. This makes encryption
//! fully deterministic: identical plaintext under an identical key
//! yields identical ciphertext, which is what lets the backend
//! deduplicate the encrypted form. It is also a known cryptographic
//! weakness (SHA-1, plaintext-derived nonces, nonce reuse on an empty
//! tail block) that is kept deliberately for compatibility with
//! existing stores. New stores can opt into [`NonceMode::Counter`],
//! which trades deduplication for unique nonces.

use crate::config::EncryptionConfig;
use crate::crypto::{NonceMode, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey};
use ring::digest::{Context, SHA1_FOR_LEGACY_USE_ONLY};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use tracing::debug;

/// Plaintext block size: the unit of encryption
pub const BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Size prefix bytes at the start of every frame
const FRAME_PREFIX_SIZE: usize = 4;

/// Stream header magic for the counter nonce mode
const COUNTER_MAGIC: &[u8; 4] = b"VSC1";

/// Stream header bytes in counter mode (magic + random nonce prefix)
const COUNTER_HEADER_SIZE: usize = 8;

/// On-disk stride of a full frame
const FRAME_STRIDE: u64 = (FRAME_PREFIX_SIZE + NONCE_SIZE + BLOCK_SIZE + TAG_SIZE) as u64;

fn new_sealing_key(key: &[u8; KEY_SIZE], config: &EncryptionConfig) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(config.cipher.algorithm(), key)
        .map_err(|_| Error::Crypto("invalid AEAD key material".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

fn block_nonce(
    mode: NonceMode,
    hasher: &Context,
    prefix: &[u8; 4],
    block_index: u64,
) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    match mode {
        NonceMode::Derived => {
            let digest = hasher.clone().finish();
            let bytes = digest.as_ref();
            nonce.copy_from_slice(&bytes[bytes.len() - NONCE_SIZE..]);
        }
        NonceMode::Counter => {
            nonce[..4].copy_from_slice(prefix);
            nonce[4..].copy_from_slice(&block_index.to_be_bytes());
        }
    }
    nonce
}

/// Encrypting writer: buffers plaintext and emits one sealed frame per
/// full block.
///
/// [`StreamEncrypter::finish`] must be called to seal the tail block;
/// dropping the encrypter without it silently leaks the buffered tail.
pub struct StreamEncrypter<W: Write> {
    inner: W,
    key: LessSafeKey,
    mode: NonceMode,
    hasher: Context,
    prefix: [u8; 4],
    block_index: u64,
    buf: Vec<u8>,
    header_written: bool,
    finished: bool,
}

impl<W: Write> StreamEncrypter<W> {
    /// Create a new encrypter in front of `inner`.
    /// No I/O is performed on creation.
    pub fn new(inner: W, key: &[u8; KEY_SIZE], config: &EncryptionConfig) -> Result<Self> {
        let mut prefix = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut prefix);

        Ok(StreamEncrypter {
            inner,
            key: new_sealing_key(key, config)?,
            mode: config.nonce_mode,
            hasher: Context::new(&SHA1_FOR_LEGACY_USE_ONLY),
            prefix,
            block_index: 0,
            buf: Vec::with_capacity(BLOCK_SIZE),
            header_written: false,
            finished: false,
        })
    }

    /// Seal the remaining buffered bytes as the final (short) frame and
    /// flush the inner writer. Idempotent; writes the tail exactly once.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }

        let tail = self.buf.len();
        self.flush_block(tail)?;
        self.inner.flush()?;
        self.finished = true;
        Ok(())
    }

    /// Consume the encrypter, returning the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }

    fn write_header_if_needed(&mut self) -> io::Result<()> {
        if self.mode == NonceMode::Counter && !self.header_written {
            self.inner.write_all(COUNTER_MAGIC)?;
            self.inner.write_all(&self.prefix)?;
            self.header_written = true;
        }
        Ok(())
    }

    fn flush_block(&mut self, len: usize) -> io::Result<()> {
        self.write_header_if_needed()?;

        if self.mode == NonceMode::Derived {
            self.hasher.update(&self.buf[..len]);
        }
        let nonce = block_nonce(self.mode, &self.hasher, &self.prefix, self.block_index);

        let mut sealed = self.buf[..len].to_vec();
        self.key
            .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut sealed)
            .map_err(|_| io::Error::from(Error::Crypto("AEAD seal failed".to_string())))?;

        self.inner.write_all(&(sealed.len() as u32).to_be_bytes())?;
        self.inner.write_all(&nonce)?;
        self.inner.write_all(&sealed)?;

        self.buf.drain(..len);
        self.block_index += 1;
        Ok(())
    }
}

impl<W: Write> Write for StreamEncrypter<W> {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::new(
                ErrorKind::Other,
                "write on a finished encrypter",
            ));
        }

        self.buf.extend_from_slice(p);
        while self.buf.len() >= BLOCK_SIZE {
            self.flush_block(BLOCK_SIZE)?;
        }
        Ok(p.len())
    }

    /// Flushes the inner writer only. A partial block is never sealed
    /// early; that would change the frame layout.
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypting reader with seek support.
///
/// Always decrypts whole blocks; bytes that do not fit the destination
/// are kept in a backlog for the next read.
pub struct StreamDecrypter<R: Read + Seek> {
    inner: R,
    key: LessSafeKey,
    mode: NonceMode,
    hasher: Context,
    prefix: [u8; 4],
    block_index: u64,
    backlog: Vec<u8>,
    backlog_pos: usize,
    position: u64,
    header_read: bool,
}

impl<R: Read + Seek> StreamDecrypter<R> {
    /// Create a new decrypter over `inner`, which must be positioned
    /// at the start of the ciphertext. No I/O is performed on creation.
    pub fn new(inner: R, key: &[u8; KEY_SIZE], config: &EncryptionConfig) -> Result<Self> {
        Ok(StreamDecrypter {
            inner,
            key: new_sealing_key(key, config)?,
            mode: config.nonce_mode,
            hasher: Context::new(&SHA1_FOR_LEGACY_USE_ONLY),
            prefix: [0u8; 4],
            block_index: 0,
            backlog: Vec::new(),
            backlog_pos: 0,
            position: 0,
            header_read: false,
        })
    }

    /// Consume the decrypter, returning the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn data_offset(&self) -> u64 {
        match self.mode {
            NonceMode::Derived => 0,
            NonceMode::Counter => COUNTER_HEADER_SIZE as u64,
        }
    }

    fn ensure_header(&mut self) -> io::Result<()> {
        if self.mode != NonceMode::Counter || self.header_read {
            return Ok(());
        }

        self.inner.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; COUNTER_HEADER_SIZE];
        self.inner
            .read_exact(&mut header)
            .map_err(|_| io::Error::from(Error::Framing("missing stream header".to_string())))?;
        if &header[..4] != COUNTER_MAGIC {
            return Err(Error::Framing("bad stream header magic".to_string()).into());
        }
        self.prefix.copy_from_slice(&header[4..]);
        self.header_read = true;
        Ok(())
    }

    fn serve_backlog(&mut self, dest: &mut [u8]) -> usize {
        let n = dest.len().min(self.backlog.len() - self.backlog_pos);
        dest[..n].copy_from_slice(&self.backlog[self.backlog_pos..self.backlog_pos + n]);
        self.backlog_pos += n;
        if self.backlog_pos == self.backlog.len() {
            self.backlog.clear();
            self.backlog_pos = 0;
        }
        self.position += n as u64;
        n
    }

    /// Read the 4-byte size prefix. `Ok(None)` is a clean end of
    /// stream; EOF anywhere inside the prefix is a framing error.
    fn read_frame_size(&mut self) -> io::Result<Option<usize>> {
        let mut size_buf = [0u8; FRAME_PREFIX_SIZE];
        let mut filled = 0;
        while filled < size_buf.len() {
            match self.inner.read(&mut size_buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(Error::Framing(
                        "unexpected EOF inside frame size prefix".to_string(),
                    )
                    .into())
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Some(u32::from_be_bytes(size_buf) as usize))
    }

    fn read_block(&mut self) -> io::Result<Option<Vec<u8>>> {
        self.ensure_header()?;

        let size = match self.read_frame_size()? {
            Some(size) => size,
            None => return Ok(None),
        };
        if size > BLOCK_SIZE + TAG_SIZE {
            return Err(Error::Framing(format!(
                "pack size exceeded expectations: {} > {}",
                size,
                BLOCK_SIZE + TAG_SIZE
            ))
            .into());
        }

        let mut nonce = [0u8; NONCE_SIZE];
        self.inner
            .read_exact(&mut nonce)
            .map_err(|_| io::Error::from(Error::Framing("unexpected EOF in nonce".to_string())))?;

        let mut sealed = vec![0u8; size];
        self.inner.read_exact(&mut sealed).map_err(|_| {
            io::Error::from(Error::Framing("unexpected EOF in sealed block".to_string()))
        })?;

        let plain = self
            .key
            .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut sealed)
            .map_err(|_| {
                io::Error::from(Error::Auth(
                    "failed to open encrypted block (wrong key or corrupted data)".to_string(),
                ))
            })?;

        // Parity with the encoder; only authoritative for sequential
        // reads from the start.
        if self.mode == NonceMode::Derived {
            self.hasher.update(plain);
        }
        self.block_index += 1;

        Ok(Some(plain.to_vec()))
    }
}

impl<R: Read + Seek> Read for StreamDecrypter<R> {
    fn read(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        if self.backlog_pos < self.backlog.len() {
            return Ok(self.serve_backlog(dest));
        }

        let plain = match self.read_block()? {
            Some(plain) => plain,
            None => return Ok(0),
        };

        let n = dest.len().min(plain.len());
        dest[..n].copy_from_slice(&plain[..n]);
        if n < plain.len() {
            debug!(cached = plain.len() - n, "block overflow kept for next read");
            self.backlog = plain[n..].to_vec();
            self.backlog_pos = 0;
        }
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for StreamDecrypter<R> {
    /// Seek to a plaintext offset. The underlying stream is moved to
    /// the containing frame and the in-block remainder is decrypted
    /// and discarded.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i64::try_from(offset)
                .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "seek offset overflow"))?,
            SeekFrom::Current(delta) => self.position as i64 + delta,
            SeekFrom::End(_) => {
                return Err(Error::Precondition(
                    "there is no definite end, can't use SEEK_END".to_string(),
                )
                .into())
            }
        };
        if target < 0 {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        if target as u64 == self.position {
            return Ok(self.position);
        }

        self.ensure_header()?;

        let block = target as u64 / BLOCK_SIZE as u64;
        let within = target as u64 % BLOCK_SIZE as u64;

        self.inner
            .seek(SeekFrom::Start(self.data_offset() + block * FRAME_STRIDE))?;
        self.backlog.clear();
        self.backlog_pos = 0;
        self.block_index = block;
        self.position = block * BLOCK_SIZE as u64;

        let mut remaining = within as usize;
        let mut scratch = [0u8; 8192];
        while remaining > 0 {
            let want = remaining.min(scratch.len());
            let n = self.read(&mut scratch[..want])?;
            if n == 0 {
                break;
            }
            remaining -= n;
        }

        Ok(self.position)
    }
}
