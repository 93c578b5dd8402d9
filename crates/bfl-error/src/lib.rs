#![forbid(unsafe_code)]
//! Error types for blkfree.
//!
//! # Error Taxonomy
//!
//! Free-list acquisition can fail four ways, and callers are not expected to
//! recover differently per kind — the variants exist for diagnostics and for
//! the errno mapping at ioctl-style boundaries:
//!
//! | Variant | Meaning | errno |
//! |---------|---------|-------|
//! | `InputTooLarge` | requested extent count exceeds the configured ceiling | `EINVAL` |
//! | `SizeOverflow` | size arithmetic would exceed the representable range | `EOVERFLOW` |
//! | `AllocFailed` | the allocator refused the request | `ENOMEM` |
//! | `BoundaryFault` | the source range was not safely readable | `EFAULT` |
//! | `Format` | a wire image is structurally malformed | `EINVAL` |
//! | `Io` | ambient I/O from external sources | raw errno / `EIO` |
//!
//! Every failure path guarantees zero net allocation: no partially built
//! object is ever observable, so none of these variants carry a cleanup
//! obligation for the caller.
//!
//! `bfl-types::ParseError` is intentionally independent of this crate (no
//! cyclic deps); `bfl-list` converts it to [`BflError::Format`] at its
//! boundary. Release has no error outcomes at all — releasing an object not
//! produced by acquire is a precondition violation, not a runtime error.

use thiserror::Error;

/// Unified error type for all blkfree operations.
#[derive(Debug, Error)]
pub enum BflError {
    /// Operating system I/O error (wraps `std::io::Error`).
    ///
    /// Not raised by the core copy-in path itself; exists for external
    /// `BoundarySource` implementations and CLI surfaces that do real I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The source's extent count exceeds the configured ceiling.
    ///
    /// Checked before any size multiplication or allocation, so a hostile
    /// count can never be used to size a request.
    #[error("extent count {count} exceeds limit {max}")]
    InputTooLarge { count: u64, max: u64 },

    /// Checked size arithmetic overflowed before allocation.
    #[error("size overflow computing {what}")]
    SizeOverflow { what: &'static str },

    /// The allocator refused a request of `size` bytes.
    #[error("allocation of {size} bytes failed")]
    AllocFailed { size: usize },

    /// A boundary-crossing copy faulted: `len` bytes at source address
    /// `src` were not readable.
    #[error("boundary fault reading {len} bytes at source address {src:#x}")]
    BoundaryFault { src: u64, len: usize },

    /// A wire image is structurally malformed.
    ///
    /// Carries the string form of a `bfl-types::ParseError`; the conversion
    /// happens at the `bfl-list` crate boundary.
    #[error("invalid wire image: {0}")]
    Format(String),
}

impl BflError {
    /// Convert this error into a POSIX errno for ioctl-style boundaries.
    ///
    /// The mapping is exhaustive — adding a variant without an arm here is a
    /// compile error.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::InputTooLarge { .. } | Self::Format(_) => libc::EINVAL,
            Self::SizeOverflow { .. } => libc::EOVERFLOW,
            Self::AllocFailed { .. } => libc::ENOMEM,
            Self::BoundaryFault { .. } => libc::EFAULT,
        }
    }
}

/// Result alias using `BflError`.
pub type Result<T> = std::result::Result<T, BflError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_covers_all_variants() {
        let cases: Vec<(BflError, libc::c_int)> = vec![
            (BflError::Io(std::io::Error::other("test")), libc::EIO),
            (
                BflError::InputTooLarge {
                    count: 2_000_000,
                    max: 1_048_576,
                },
                libc::EINVAL,
            ),
            (
                BflError::SizeOverflow {
                    what: "flat list size",
                },
                libc::EOVERFLOW,
            ),
            (BflError::AllocFailed { size: 4096 }, libc::ENOMEM),
            (
                BflError::BoundaryFault {
                    src: 0xdead_0000,
                    len: 64,
                },
                libc::EFAULT,
            ),
            (BflError::Format("truncated header".into()), libc::EINVAL),
        ];

        for (error, expected_errno) in &cases {
            assert_eq!(
                error.to_errno(),
                *expected_errno,
                "wrong errno for {error:?}",
            );
        }
    }

    #[test]
    fn io_error_preserves_raw_os_error() {
        let raw = std::io::Error::from_raw_os_error(libc::EACCES);
        let err = BflError::Io(raw);
        assert_eq!(err.to_errno(), libc::EACCES);
    }

    #[test]
    fn display_formatting() {
        let err = BflError::InputTooLarge {
            count: 9,
            max: 4,
        };
        assert_eq!(err.to_string(), "extent count 9 exceeds limit 4");

        let fault = BflError::BoundaryFault {
            src: 0x1000,
            len: 24,
        };
        assert_eq!(
            fault.to_string(),
            "boundary fault reading 24 bytes at source address 0x1000"
        );

        let overflow = BflError::SizeOverflow {
            what: "extent array size",
        };
        assert_eq!(
            overflow.to_string(),
            "size overflow computing extent array size"
        );
    }
}
