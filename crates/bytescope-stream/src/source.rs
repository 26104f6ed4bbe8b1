//! Random-access byte sources

use crate::{Error, Result};
use std::borrow::Cow;
use std::sync::Arc;

/// A random-access byte sequence with a known total length
///
/// Implementations may be backed by memory or by a paged loader; callers only
/// rely on slice semantics.
pub trait ByteSource: Send + Sync {
    /// Total length in bytes
    fn len(&self) -> usize;

    /// Bytes in `[start, end)`
    fn slice(&self, start: usize, end: usize) -> Result<Cow<'_, [u8]>>;

    /// Whether the source holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn checked_range(start: usize, end: usize, len: usize) -> Result<()> {
    if start > end || end > len {
        return Err(Error::Slice { start, end, len });
    }
    Ok(())
}

impl ByteSource for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn slice(&self, start: usize, end: usize) -> Result<Cow<'_, [u8]>> {
        checked_range(start, end, <[u8]>::len(self))?;
        Ok(Cow::Borrowed(&self[start..end]))
    }
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn slice(&self, start: usize, end: usize) -> Result<Cow<'_, [u8]>> {
        self.as_slice().slice(start, end)
    }
}

impl ByteSource for Arc<[u8]> {
    fn len(&self) -> usize {
        self.as_ref().len()
    }

    fn slice(&self, start: usize, end: usize) -> Result<Cow<'_, [u8]>> {
        self.as_ref().slice(start, end)
    }
}
