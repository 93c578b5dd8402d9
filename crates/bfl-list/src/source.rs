//! Boundary-crossing copy sources.
//!
//! The copy-in path never dereferences a source address directly; every
//! read goes through [`BoundarySource::copy_from_boundary`], which either
//! fills the destination completely or fails with a fault. Partial copies
//! are not observable.

use bfl_error::{BflError, Result};

use crate::Trust;

/// A source of bytes reachable only through a checked copy.
///
/// Implementations must treat `src` as an address in the source's own
/// space and fail with [`BflError::BoundaryFault`] for any range that is
/// not fully readable. The trust classification is forwarded so that
/// implementations bridging privilege domains can select the appropriate
/// copy primitive; same-address-space sources may ignore it.
pub trait BoundarySource: Sync {
    fn copy_from_boundary(&self, src: u64, dst: &mut [u8], trust: Trust) -> Result<()>;
}

/// In-memory source image with a base address.
///
/// Addresses map to `bytes[addr - base..]`; anything outside the image
/// faults. This is the test and tooling stand-in for caller-managed
/// memory, and the model for what a real copy primitive must check.
#[derive(Debug, Clone, Copy)]
pub struct SliceSource<'a> {
    base: u64,
    bytes: &'a [u8],
}

impl<'a> SliceSource<'a> {
    /// Image mapped at address zero.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { base: 0, bytes }
    }

    /// Image mapped at `base`.
    #[must_use]
    pub fn with_base(base: u64, bytes: &'a [u8]) -> Self {
        Self { base, bytes }
    }

    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }
}

impl BoundarySource for SliceSource<'_> {
    fn copy_from_boundary(&self, src: u64, dst: &mut [u8], _trust: Trust) -> Result<()> {
        let len = dst.len();
        let fault = move || BflError::BoundaryFault { src, len };

        let offset = src.checked_sub(self.base).ok_or_else(fault)?;
        let offset = usize::try_from(offset).map_err(|_| fault())?;
        let end = offset.checked_add(dst.len()).ok_or_else(fault)?;
        let Some(window) = self.bytes.get(offset..end) else {
            return Err(fault());
        };
        dst.copy_from_slice(window);
        Ok(())
    }
}
