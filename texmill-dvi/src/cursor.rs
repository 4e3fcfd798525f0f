//! Primitive big-endian readers over an exhaustible byte source.
//!
//! DVI, TFM and VF files all encode integers as 1–4 big-endian bytes,
//! signed or unsigned. [`ByteSource`] supplies the single-byte primitive
//! and derives the multi-byte readers from it, so the same decoding code
//! runs over an in-memory slice ([`SliceCursor`]) or a blocking pipe
//! ([`StreamSource`]).

use std::io::Read;

use crate::error::{DviError, DviResult};

/// A strictly-forward, exhaustible byte source.
///
/// Exhaustion is reported as [`DviError::TruncatedStream`]; for a pipe
/// that means end-of-stream, for a slice that the cursor walked off the
/// end. Callers that treat exhaustion as a normal terminator (virtual
/// font packets) match on that variant explicitly.
pub trait ByteSource {
    /// Consume and return the next byte.
    fn next_byte(&mut self) -> DviResult<u8>;

    /// Read an `n`-byte big-endian unsigned integer, `n` in `1..=4`.
    fn read_unsigned(&mut self, n: u8) -> DviResult<u32> {
        debug_assert!((1..=4).contains(&n), "operand width {n} out of range");
        let mut total: u32 = 0;
        for _ in 0..n {
            total = (total << 8) | u32::from(self.next_byte()?);
        }
        Ok(total)
    }

    /// Read an `n`-byte big-endian two's-complement signed integer.
    fn read_signed(&mut self, n: u8) -> DviResult<i32> {
        let mut total = i64::from(self.read_unsigned(n)?);
        let half = 1i64 << (8 * i64::from(n) - 1);
        if total >= half {
            total -= half * 2;
        }
        Ok(total as i32)
    }

    /// Read `n` raw bytes.
    fn read_bytes(&mut self, n: usize) -> DviResult<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.next_byte()?);
        }
        Ok(out)
    }

    /// Read `n` bytes as a Latin-1 string (DVI font names and comments
    /// are plain byte strings).
    fn read_string(&mut self, n: usize) -> DviResult<String> {
        let mut out = String::with_capacity(n);
        for _ in 0..n {
            out.push(char::from(self.next_byte()?));
        }
        Ok(out)
    }

    /// Consume and discard `n` bytes.
    fn skip(&mut self, n: usize) -> DviResult<()> {
        for _ in 0..n {
            self.next_byte()?;
        }
        Ok(())
    }
}

/// Cursor over an in-memory byte slice.
#[derive(Debug)]
pub struct SliceCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SliceCursor<'a> {
    /// Create a cursor at the start of `bytes`.
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Whether every byte has been consumed.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

impl ByteSource for SliceCursor<'_> {
    fn next_byte(&mut self) -> DviResult<u8> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(DviError::TruncatedStream)?;
        self.pos += 1;
        Ok(byte)
    }
}

/// Byte source over a blocking reader (a named pipe in practice).
///
/// Wrap the reader in a `BufReader` before handing it in — the DVI
/// decoder consumes one byte at a time.
#[derive(Debug)]
pub struct StreamSource<R: Read> {
    inner: R,
}

impl<R: Read> StreamSource<R> {
    /// Wrap a reader.
    pub const fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> ByteSource for StreamSource<R> {
    fn next_byte(&mut self) -> DviResult<u8> {
        let mut buf = [0u8; 1];
        match self.inner.read_exact(&mut buf) {
            Ok(()) => Ok(buf[0]),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(DviError::TruncatedStream)
            }
            Err(e) => Err(DviError::Io(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode `v` as `n` big-endian two's-complement bytes.
    fn encode_signed(v: i64, n: u8) -> Vec<u8> {
        let bits = u64::from_le_bytes((v as u64).to_le_bytes());
        (0..n).rev().map(|i| (bits >> (8 * i)) as u8).collect()
    }

    #[test]
    fn unsigned_accumulates_big_endian() {
        let mut c = SliceCursor::new(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(c.read_unsigned(4).expect("read"), 0x0102_0304);
        assert!(c.is_exhausted(), "all four bytes consumed");
    }

    #[test]
    fn signed_round_trips_every_width() {
        for n in 1..=4u8 {
            let max = (1i64 << (8 * i64::from(n) - 1)) - 1;
            let min = -max - 1;
            for v in [min, -1, 0, 1, max, max / 2, min / 2] {
                let bytes = encode_signed(v, n);
                let mut c = SliceCursor::new(&bytes);
                let got = c.read_signed(n).expect("decode");
                assert_eq!(i64::from(got), v, "width {n}, value {v}");
            }
        }
    }

    #[test]
    fn unsigned_round_trips_boundaries() {
        for n in 1..=4u8 {
            let max = if n == 4 {
                u32::MAX
            } else {
                (1u32 << (8 * u32::from(n))) - 1
            };
            for v in [0u32, 1, max, max / 2] {
                let bytes: Vec<u8> = (0..n).rev().map(|i| (v >> (8 * i)) as u8).collect();
                let mut c = SliceCursor::new(&bytes);
                assert_eq!(c.read_unsigned(n).expect("decode"), v, "width {n}");
            }
        }
    }

    #[test]
    fn truncation_mid_read_is_an_error() {
        let mut c = SliceCursor::new(&[0xFF, 0xFF]);
        assert_eq!(c.read_unsigned(4), Err(DviError::TruncatedStream));
    }

    #[test]
    fn stream_source_reports_eof_as_truncated() {
        let data: &[u8] = &[7];
        let mut s = StreamSource::new(data);
        assert_eq!(s.next_byte().expect("first byte"), 7);
        assert_eq!(s.next_byte(), Err(DviError::TruncatedStream));
    }

    #[test]
    fn read_string_is_latin1() {
        let mut c = SliceCursor::new(&[b'c', b'm', b'r', 0xE9]);
        assert_eq!(c.read_string(4).expect("read"), "cmr\u{e9}");
    }

    #[test]
    fn skip_consumes_exactly() {
        let mut c = SliceCursor::new(&[1, 2, 3, 4]);
        c.skip(3).expect("skip");
        assert_eq!(c.next_byte().expect("last"), 4);
        assert_eq!(c.skip(1), Err(DviError::TruncatedStream));
    }
}
