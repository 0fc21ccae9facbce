//! Bounds-checked access to raw file bytes.
//!
//! Every structure read in the crate goes through a [`ByteSource`]: an
//! immutable view over the complete file content where each read is checked
//! against the buffer length. A read never returns fewer bytes than requested
//! and never succeeds past the end.

use thiserror::Error;

/// A read that would exceed the underlying buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("read of {len} bytes at offset {offset:#x} exceeds buffer of {available} bytes")]
pub struct BoundsError {
    pub offset: usize,
    pub len: usize,
    pub available: usize,
}

/// Immutable, bounds-checked view over a file's raw bytes.
///
/// The buffer is never mutated after construction, so concurrent read access
/// is always safe.
#[derive(Debug, Clone)]
pub struct ByteSource {
    data: Vec<u8>,
}

impl ByteSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The complete underlying buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Read exactly `len` bytes at `offset`.
    pub fn read(&self, offset: usize, len: usize) -> Result<&[u8], BoundsError> {
        let end = offset.checked_add(len).ok_or(BoundsError {
            offset,
            len,
            available: self.data.len(),
        })?;
        self.data.get(offset..end).ok_or(BoundsError {
            offset,
            len,
            available: self.data.len(),
        })
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8, BoundsError> {
        Ok(self.read(offset, 1)?[0])
    }

    pub fn read_u16_le(&self, offset: usize) -> Result<u16, BoundsError> {
        let b = self.read(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&self, offset: usize) -> Result<u32, BoundsError> {
        let b = self.read(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_le(&self, offset: usize) -> Result<u64, BoundsError> {
        let b = self.read(offset, 8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read a NUL-terminated ASCII string at `offset`, scanning at most
    /// `max_len` bytes. Lossy on non-UTF-8 input.
    pub fn read_cstring(&self, offset: usize, max_len: usize) -> Result<String, BoundsError> {
        if offset >= self.data.len() {
            return Err(BoundsError {
                offset,
                len: 1,
                available: self.data.len(),
            });
        }
        let end = offset.saturating_add(max_len).min(self.data.len());
        let slice = &self.data[offset..end];
        let len = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
        Ok(String::from_utf8_lossy(&slice[..len]).into_owned())
    }

    /// Read a NUL-terminated UTF-16LE string at `offset`, scanning at most
    /// `max_chars` code units.
    pub fn read_utf16le(&self, offset: usize, max_chars: usize) -> Result<String, BoundsError> {
        if offset >= self.data.len() {
            return Err(BoundsError {
                offset,
                len: 2,
                available: self.data.len(),
            });
        }
        let end = offset.saturating_add(max_chars * 2).min(self.data.len());
        let slice = &self.data[offset..end];
        let mut words = Vec::new();
        for chunk in slice.chunks_exact(2) {
            let word = u16::from_le_bytes([chunk[0], chunk[1]]);
            if word == 0 {
                break;
            }
            words.push(word);
        }
        Ok(String::from_utf16_lossy(&words))
    }

    /// Read a length-prefixed UTF-16LE string (`u16` count, then that many
    /// code units), the encoding resource directories use for names.
    pub fn read_utf16le_prefixed(&self, offset: usize) -> Result<String, BoundsError> {
        let count = self.read_u16_le(offset)? as usize;
        let slice = self.read(offset + 2, count * 2)?;
        let words: Vec<u16> = slice
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&words))
    }

    /// True when `[offset, offset + len)` lies entirely within the buffer.
    pub fn contains(&self, offset: usize, len: usize) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.data.len())
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}
