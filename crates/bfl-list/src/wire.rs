//! Wire layouts for free-list source images.
//!
//! Two physical layouts share a 24-byte header prefix, little-endian:
//!
//! | offset | field |
//! |-------:|-------|
//! | 0 | `num_extents: u64` |
//! | 8 | `callback: u64` |
//! | 16 | `callback_arg: u64` |
//!
//! **Flat**: the extent array (`{start: u64, length: u64}` per entry)
//! follows the header in the same contiguous image.
//!
//! **Indirect**: the header is a fixed 32 bytes — the prefix plus
//! `extents_addr: u64` at offset 24 — and the array lives elsewhere in the
//! source address space, reached by a second boundary-crossing copy.
//!
//! The count field comes first so it can be read alone before anything
//! else about the image is believed. A zero callback word means no
//! completion is attached.

use bfl_types::{read_le_u64, write_le_u64, Extent, ParseError};

use crate::Completion;

/// Size of one encoded extent.
pub const EXTENT_WIRE_SIZE: usize = 16;
/// Header size of a flat image; the array starts here.
pub const FLAT_HEADER_SIZE: usize = 24;
/// Fixed size of an indirect header.
pub const INDIRECT_HEADER_SIZE: usize = 32;

pub const COUNT_OFFSET: usize = 0;
pub const CALLBACK_OFFSET: usize = 8;
pub const CALLBACK_ARG_OFFSET: usize = 16;
pub const EXTENTS_ADDR_OFFSET: usize = 24;

/// Total bytes of a flat image holding `count` extents, or `None` on
/// overflow.
#[must_use]
pub fn flat_list_size(count: u64) -> Option<u64> {
    count
        .checked_mul(EXTENT_WIRE_SIZE as u64)
        .and_then(|array| array.checked_add(FLAT_HEADER_SIZE as u64))
}

/// Bytes of an extent array holding `count` extents, or `None` on
/// overflow.
#[must_use]
pub fn extent_array_size(count: u64) -> Option<u64> {
    count.checked_mul(EXTENT_WIRE_SIZE as u64)
}

/// The 24-byte header prefix common to both layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub num_extents: u64,
    pub callback: u64,
    pub callback_arg: u64,
}

impl WireHeader {
    /// Completion token pair, if one is attached (non-zero callback word).
    #[must_use]
    pub fn completion(&self) -> Option<Completion> {
        if self.callback == 0 {
            return None;
        }
        Some(Completion {
            callback: self.callback,
            arg: self.callback_arg,
        })
    }
}

pub fn parse_header(bytes: &[u8]) -> Result<WireHeader, ParseError> {
    Ok(WireHeader {
        num_extents: read_le_u64(bytes, COUNT_OFFSET)?,
        callback: read_le_u64(bytes, CALLBACK_OFFSET)?,
        callback_arg: read_le_u64(bytes, CALLBACK_ARG_OFFSET)?,
    })
}

/// Source address of the extent array in an indirect header.
pub fn parse_extents_addr(bytes: &[u8]) -> Result<u64, ParseError> {
    read_le_u64(bytes, EXTENTS_ADDR_OFFSET)
}

/// Decode the extent at `index` from an encoded extent array.
pub fn extent_at(bytes: &[u8], index: usize) -> Result<Extent, ParseError> {
    let offset = index
        .checked_mul(EXTENT_WIRE_SIZE)
        .ok_or(ParseError::InvalidField {
            field: "extent_index",
            reason: "overflow",
        })?;
    Ok(Extent {
        start: read_le_u64(bytes, offset)?,
        length: read_le_u64(bytes, offset + 8)?,
    })
}

/// Re-stamp the count field of an owned copy with the validated value.
pub fn store_num_extents(bytes: &mut [u8], count: u64) -> Result<(), ParseError> {
    write_le_u64(bytes, COUNT_OFFSET, count)
}

/// Zero the callback words of an owned copy.
pub fn scrub_completion(bytes: &mut [u8]) -> Result<(), ParseError> {
    write_le_u64(bytes, CALLBACK_OFFSET, 0)?;
    write_le_u64(bytes, CALLBACK_ARG_OFFSET, 0)
}

fn push_header(out: &mut Vec<u8>, num_extents: u64, completion: Option<Completion>) {
    let completion = completion.unwrap_or(Completion {
        callback: 0,
        arg: 0,
    });
    out.extend_from_slice(&num_extents.to_le_bytes());
    out.extend_from_slice(&completion.callback.to_le_bytes());
    out.extend_from_slice(&completion.arg.to_le_bytes());
}

/// Encode a flat image: header plus trailing extent array.
#[must_use]
pub fn encode_flat(extents: &[Extent], completion: Option<Completion>) -> Vec<u8> {
    let mut out = Vec::with_capacity(FLAT_HEADER_SIZE + extents.len() * EXTENT_WIRE_SIZE);
    push_header(&mut out, extents.len() as u64, completion);
    for extent in extents {
        out.extend_from_slice(&extent.start.to_le_bytes());
        out.extend_from_slice(&extent.length.to_le_bytes());
    }
    out
}

/// Encode a fixed-size indirect header referring to an array at
/// `extents_addr`.
#[must_use]
pub fn encode_indirect_header(
    num_extents: u64,
    completion: Option<Completion>,
    extents_addr: u64,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(INDIRECT_HEADER_SIZE);
    push_header(&mut out, num_extents, completion);
    out.extend_from_slice(&extents_addr.to_le_bytes());
    out
}

/// Encode a bare extent array for the indirect layout.
#[must_use]
pub fn encode_extent_array(extents: &[Extent]) -> Vec<u8> {
    let mut out = Vec::with_capacity(extents.len() * EXTENT_WIRE_SIZE);
    for extent in extents {
        out.extend_from_slice(&extent.start.to_le_bytes());
        out.extend_from_slice(&extent.length.to_le_bytes());
    }
    out
}
