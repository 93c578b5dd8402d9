#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A single disk extent: a byte range to be freed/trimmed on a device.
///
/// No ordering or overlap invariant is attached to extents at this layer;
/// the consuming subsystem decides what constitutes a legal request. This
/// type only guarantees that the fields round-trip intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Extent {
    /// Byte offset of the first freed byte.
    pub start: u64,
    /// Number of bytes to free.
    pub length: u64,
}

impl Extent {
    #[must_use]
    pub fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    /// Exclusive end offset, or `None` if `start + length` overflows.
    #[must_use]
    pub fn end(self) -> Option<u64> {
        self.start.checked_add(self.length)
    }

    /// An extent of zero length frees nothing but is structurally valid.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.length == 0
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.start, self.length)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn write_le_u64(data: &mut [u8], offset: usize, value: u64) -> Result<(), ParseError> {
    // Same bounds discipline as the readers, on the mutable side.
    ensure_slice(data, offset, 8)?;
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Narrow a `u64` to `usize` with an explicit error path.
///
/// On 64-bit platforms this is infallible; on 32-bit it can fail.
/// The `field` label is included in the error for diagnostics.
pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_end_and_empty() {
        let ext = Extent::new(4096, 8192);
        assert_eq!(ext.end(), Some(12288));
        assert!(!ext.is_empty());

        assert!(Extent::new(0, 0).is_empty());
        assert_eq!(Extent::new(u64::MAX, 1).end(), None);
        assert_eq!(Extent::new(u64::MAX - 1, 1).end(), Some(u64::MAX));
    }

    #[test]
    fn extent_display() {
        assert_eq!(Extent::new(512, 1024).to_string(), "512+1024");
    }

    #[test]
    fn read_write_round_trip() {
        let mut buf = [0_u8; 16];
        write_le_u64(&mut buf, 0, 0x1122_3344_5566_7788).expect("write");
        write_le_u64(&mut buf, 8, u64::MAX).expect("write");
        assert_eq!(read_le_u64(&buf, 0).expect("read"), 0x1122_3344_5566_7788);
        assert_eq!(read_le_u64(&buf, 8).expect("read"), u64::MAX);
    }

    #[test]
    fn read_past_end_fails() {
        let buf = [0_u8; 8];
        assert_eq!(
            read_le_u64(&buf, 1),
            Err(ParseError::InsufficientData {
                needed: 8,
                offset: 1,
                actual: 7,
            })
        );
    }

    #[test]
    fn write_past_end_fails() {
        let mut buf = [0_u8; 8];
        assert!(write_le_u64(&mut buf, 4, 1).is_err());
        // A failed write must not touch the buffer.
        assert_eq!(buf, [0_u8; 8]);
    }

    #[test]
    fn ensure_slice_offset_overflow() {
        let buf = [0_u8; 4];
        assert_eq!(
            ensure_slice(&buf, usize::MAX, 2),
            Err(ParseError::InvalidField {
                field: "offset",
                reason: "overflow",
            })
        );
    }

    #[test]
    fn u64_narrowing() {
        assert_eq!(u64_to_usize(42, "test"), Ok(42));
        #[cfg(target_pointer_width = "64")]
        assert!(u64_to_usize(u64::MAX, "test").is_ok());
    }
}
