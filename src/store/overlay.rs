//! Copy-on-write overlay over a read-only seekable stream
//!
//! Writes are cached in an interval index instead of touching the
//! base; reads deliver a zipped view of the base stream with the
//! cached writes layered on top. The overlay can also truncate or
//! extend the stream without materializing it.

use crate::error::Error;
use crate::store::interval::{IntervalIndex, Modification};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};

/// Writable view over a read-only base stream.
///
/// Single-owner; no internal locking.
pub struct Layer<R> {
    base: R,
    index: IntervalIndex,
    pos: i64,

    /// Truncation limit; a value < 0 disables truncation.
    limit: i64,
}

impl<R> Layer<R> {
    /// Create a new in-memory overlay. No I/O is performed on creation.
    pub fn new(base: R) -> Self {
        Layer {
            base,
            index: IntervalIndex::new(),
            pos: 0,
            limit: -1,
        }
    }

    /// Cut off the stream at `size` bytes; reads past the limit
    /// return EOF. A value < 0 disables truncation.
    pub fn truncate(&mut self, size: i64) {
        self.limit = size;
    }

    /// The current truncation limit, or a number < 0 if truncation
    /// is disabled.
    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Minimum size this layer will have. The base stream might be
    /// larger, so the caller needs to check that too.
    pub fn min_size(&self) -> i64 {
        if self.limit < 0 || self.index.max() < self.limit {
            self.index.max()
        } else {
            self.limit
        }
    }

    /// Consume the layer and hand back the base stream, closing it
    /// on drop if the caller discards it.
    pub fn into_inner(self) -> R {
        self.base
    }
}

impl<R> Write for Layer<R> {
    /// Record the buffer in the overlay. If the stream was truncated
    /// before and this write extends past the limit, the limit is
    /// raised again.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.index
            .add(Modification::new(self.pos, buf.to_vec()))
            .map_err(io::Error::from)?;

        self.pos += buf.len() as i64;
        if self.limit >= 0 && self.pos > self.limit {
            self.limit = self.pos;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<R: Read + Seek> Read for Layer<R> {
    /// Read from the base stream and overlay the relevant write
    /// chunks on the way, possibly extending past the base's end.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut want = buf.len();
        if self.limit >= 0 {
            let until_limit = self.limit - self.pos;
            if until_limit <= 0 {
                return Ok(0);
            }
            want = want.min(until_limit as usize);
        }
        let buf = &mut buf[..want];

        // Fill from the base until full or EOF; a mid-stream short
        // read must not leave a gap in front of an overlay chunk.
        let mut base_n = 0;
        while base_n < buf.len() {
            match self.base.read(&mut buf[base_n..]) {
                Ok(0) => break,
                Ok(n) => base_n += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        // Base ended but extending writes remain: zero the tail so the
        // overlay pass works over defined bytes.
        if base_n < buf.len() && self.pos + (base_n as i64) < self.index.max() {
            for b in &mut buf[base_n..] {
                *b = 0;
            }
        }

        let mut n = base_n;
        for chunk in self.index.overlays(self.pos, self.pos + buf.len() as i64) {
            // Overlapping area in absolute offsets, then relative.
            let (lo, hi) = chunk.range();
            let a = lo.max(self.pos);
            let b = hi.min(self.pos + buf.len() as i64);
            if b <= a {
                continue;
            }

            let overlap = (b - a) as usize;
            let chunk_lo = (a - lo) as usize;
            let buf_lo = (a - self.pos) as usize;
            buf[buf_lo..buf_lo + overlap]
                .copy_from_slice(&chunk.data()[chunk_lo..chunk_lo + overlap]);

            // Write chunks may reach past the base stream.
            if buf_lo + overlap > n {
                n = buf_lo + overlap;
            }
        }

        self.pos += n as i64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for Layer<R> {
    /// Remember the new position and delegate the seek down.
    ///
    /// If the stream was truncated before, seeking past the limit
    /// extends the truncation again instead of pinning reads to EOF;
    /// truncating to zero and then writing relies on this.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => i64::try_from(offset)
                .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "seek offset overflow"))?,
            SeekFrom::Current(delta) => self.pos + delta,
            SeekFrom::End(_) => {
                return Err(Error::Precondition(
                    "SEEK_END is not supported by the overlay".to_string(),
                )
                .into())
            }
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }

        if self.limit >= 0 && self.limit < new_pos {
            self.limit = new_pos;
        }
        self.pos = new_pos;

        self.base.seek(pos)?;
        Ok(new_pos as u64)
    }
}
