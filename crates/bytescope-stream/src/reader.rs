//! Positioned stream reader
//!
//! A [`Stream`] is a read-only cursor over a borrowed buffer.
//! Reads are atomic: they either return a value and advance the cursor, or
//! fail with [`Error::OutOfBounds`] and leave the cursor untouched.

use crate::encoding;
use crate::{Error, Result};

/// Byte order for multi-byte numeric reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    /// Parse `le`/`be`
    pub fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "le" => Some(Self::Little),
            "be" => Some(Self::Big),
            _ => None,
        }
    }

    /// `le` or `be`
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Little => "le",
            Self::Big => "be",
        }
    }
}

/// Saved cursor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pos: usize,
    bits: u64,
    bits_left: u32,
}

/// Positioned cursor over a byte buffer
#[derive(Debug, Clone)]
pub struct Stream<'a> {
    data: &'a [u8],
    /// Offset of `data[0]` in absolute coordinates
    origin: usize,
    /// Index into `data`
    pos: usize,
    /// Pending bits, right-aligned
    bits: u64,
    bits_left: u32,
}

impl<'a> Stream<'a> {
    /// Create a stream over the whole buffer
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_origin(data, 0)
    }

    /// Create a stream whose absolute offsets start at `origin`
    pub fn with_origin(data: &'a [u8], origin: usize) -> Self {
        Self {
            data,
            origin,
            pos: 0,
            bits: 0,
            bits_left: 0,
        }
    }

    /// Cursor position relative to this stream's start
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Cursor position in absolute coordinates
    pub fn abs_pos(&self) -> usize {
        self.origin + self.pos
    }

    /// Absolute offset of this stream's first byte
    pub fn abs_start(&self) -> usize {
        self.origin
    }

    /// Total stream size
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True when no bytes and no pending bits remain
    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len() && self.bits_left == 0
    }

    /// Move the cursor to `pos` relative to this stream's start
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.size() {
            return Err(Error::Seek {
                pos,
                size: self.size(),
            });
        }
        self.align_to_byte();
        self.pos = pos;
        Ok(())
    }

    /// Save the cursor state
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            bits: self.bits,
            bits_left: self.bits_left,
        }
    }

    /// Restore a saved cursor state
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.pos;
        self.bits = checkpoint.bits;
        self.bits_left = checkpoint.bits_left;
    }

    /// Discard any partially consumed byte
    pub fn align_to_byte(&mut self) {
        self.bits = 0;
        self.bits_left = 0;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::out_of_bounds(self.abs_pos(), n, self.remaining()));
        }
        self.align_to_byte();
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    /// Read an unsigned integer of `width` bytes (1, 2, 4 or 8)
    pub fn read_uint(&mut self, width: usize, endian: Endian) -> Result<u64> {
        debug_assert!(matches!(width, 1 | 2 | 4 | 8));
        let bytes = self.take(width)?;
        let value = match endian {
            Endian::Little => bytes
                .iter()
                .rev()
                .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
            Endian::Big => bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
        };
        Ok(value)
    }

    /// Read a two's-complement signed integer of `width` bytes
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    pub fn read_sint(&mut self, width: usize, endian: Endian) -> Result<i64> {
        let raw = self.read_uint(width, endian)?;
        let shift = 64 - (width as u32) * 8;
        Ok(((raw << shift) as i64) >> shift)
    }

    /// Read an IEEE 754 single-precision float
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_f4(&mut self, endian: Endian) -> Result<f32> {
        let raw = self.read_uint(4, endian)?;
        Ok(f32::from_bits(raw as u32))
    }

    /// Read an IEEE 754 double-precision float
    pub fn read_f8(&mut self, endian: Endian) -> Result<f64> {
        let raw = self.read_uint(8, endian)?;
        Ok(f64::from_bits(raw))
    }

    /// Read `n` bits, most significant bit first
    ///
    /// Whole bytes are pulled from the buffer as needed; unread low bits of
    /// the last byte stay pending for the next bit read.
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_bits(&mut self, n: u32) -> Result<u64> {
        if n == 0 || n > 64 {
            return Err(Error::InvalidBitCount(n));
        }

        let needed_bits = n.saturating_sub(self.bits_left);
        let needed_bytes = needed_bits.div_ceil(8) as usize;
        if needed_bytes > self.remaining() {
            return Err(Error::out_of_bounds(
                self.abs_pos(),
                needed_bytes,
                self.remaining(),
            ));
        }

        let mut acc = u128::from(self.bits);
        let mut acc_bits = self.bits_left;
        for byte in &self.data[self.pos..self.pos + needed_bytes] {
            acc = (acc << 8) | u128::from(*byte);
            acc_bits += 8;
        }
        self.pos += needed_bytes;

        let rest = acc_bits - n;
        let value = (acc >> rest) & ((1u128 << n) - 1);
        let rest_mask = (1u128 << rest) - 1;
        self.bits = (acc & rest_mask) as u64;
        self.bits_left = rest;

        Ok(value as u64)
    }

    /// Read exactly `n` bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Read everything up to the end of the stream
    pub fn read_bytes_full(&mut self) -> &'a [u8] {
        self.align_to_byte();
        let bytes = &self.data[self.pos..];
        self.pos = self.data.len();
        bytes
    }

    /// Read up to the first `term` byte or the end of the stream
    ///
    /// `include` keeps the terminator in the result; `consume` moves the
    /// cursor past it.
    pub fn read_bytes_term(&mut self, term: u8, include: bool, consume: bool) -> &'a [u8] {
        self.align_to_byte();
        let window = &self.data[self.pos..];
        match window.iter().position(|b| *b == term) {
            Some(idx) => {
                let taken = if include { &window[..=idx] } else { &window[..idx] };
                self.pos += if consume { idx + 1 } else { idx };
                taken
            }
            None => {
                self.pos = self.data.len();
                window
            }
        }
    }

    /// Read a terminator-delimited string
    pub fn read_strz(&mut self, label: &str, term: u8, include: bool, consume: bool) -> String {
        let bytes = self.read_bytes_term(term, include, consume);
        encoding::decode(bytes, label)
    }
}
