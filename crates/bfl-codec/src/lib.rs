#![forbid(unsafe_code)]
//! Length-prefixed compression framing.
//!
//! A frame is a 4-byte big-endian payload length followed by the
//! zstd-compressed payload. [`compress_frame`] writes a frame into a
//! caller-sized destination, or reports [`CompressOutcome::Stored`] when
//! the payload should be kept in raw form instead (compression failed or
//! the destination cannot hold the frame) — the caller falls back to the
//! uncompressed bytes, nothing has been committed. [`decompress_frame`]
//! refuses any prefix that claims more bytes than the source actually
//! carries before touching the payload.

use thiserror::Error;

/// Bytes of the big-endian length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame too short: {len} bytes, need at least {FRAME_HEADER_SIZE}")]
    FrameTooShort { len: usize },

    /// The prefix claims more payload than the source carries.
    #[error("frame length {payload} exceeds remaining source {remaining}")]
    LengthExceedsSource { payload: usize, remaining: usize },

    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
}

/// What [`compress_frame`] did with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressOutcome {
    /// A complete frame of this many bytes (prefix included) was written.
    Compressed(usize),
    /// Nothing was written; the caller keeps the raw payload.
    Stored,
}

impl CompressOutcome {
    #[must_use]
    pub fn is_stored(&self) -> bool {
        matches!(self, CompressOutcome::Stored)
    }
}

/// Compress `src` into a framed `dst` at the given zstd `level`
/// (0 selects zstd's default).
///
/// Returns [`CompressOutcome::Stored`] — without writing anything usable —
/// when `src` is empty, `dst` cannot hold a prefix plus payload, or the
/// compressor fails; the destination contents are unspecified in that
/// case.
#[must_use]
pub fn compress_frame(src: &[u8], dst: &mut [u8], level: i32) -> CompressOutcome {
    if src.is_empty() || dst.len() <= FRAME_HEADER_SIZE {
        return CompressOutcome::Stored;
    }

    let Ok(mut compressor) = zstd::bulk::Compressor::new(level) else {
        return CompressOutcome::Stored;
    };
    let (prefix, payload) = dst.split_at_mut(FRAME_HEADER_SIZE);
    let written = match compressor.compress_to_buffer(src, payload) {
        Ok(written) => written,
        Err(_) => return CompressOutcome::Stored,
    };
    let Ok(prefix_value) = u32::try_from(written) else {
        return CompressOutcome::Stored;
    };

    prefix.copy_from_slice(&prefix_value.to_be_bytes());
    CompressOutcome::Compressed(FRAME_HEADER_SIZE + written)
}

/// Decompress a frame from `src` into `dst`, returning the decompressed
/// byte count.
///
/// # Errors
///
/// [`CodecError::FrameTooShort`] when `src` cannot hold a prefix;
/// [`CodecError::LengthExceedsSource`] when the prefix claims more payload
/// than `src` carries; [`CodecError::Decompress`] when the payload is not
/// valid zstd data or does not fit `dst`.
pub fn decompress_frame(src: &[u8], dst: &mut [u8]) -> Result<usize, CodecError> {
    if src.len() < FRAME_HEADER_SIZE {
        return Err(CodecError::FrameTooShort { len: src.len() });
    }

    let payload_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    let remaining = src.len() - FRAME_HEADER_SIZE;
    if payload_len > remaining {
        return Err(CodecError::LengthExceedsSource {
            payload: payload_len,
            remaining,
        });
    }

    let payload = &src[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + payload_len];
    zstd::bulk::Decompressor::new()
        .map_err(CodecError::Decompress)?
        .decompress_to_buffer(payload, dst)
        .map_err(CodecError::Decompress)
}
