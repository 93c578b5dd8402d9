#![forbid(unsafe_code)]
//! Validated copy-in and teardown of block-free extent lists.
//!
//! A free list describes disk extents a caller wants freed/trimmed: a
//! header plus a count-prefixed array of `{start, length}` pairs. The
//! source of that description may be another privilege domain, so nothing
//! about it is believed until it has been copied into owned memory and
//! validated.
//!
//! [`acquire`] copies an external representation into an owned
//! [`FreeList`]; [`FreeList::release`] returns exactly the regions acquire
//! allocated. Ownership is linear: one owner, one release, no sharing.
//!
//! ## Trust
//!
//! The caller states the trust classification explicitly — it is never
//! inferred from ambient context. For [`Trust::Untrusted`] sources the
//! completion callback words are scrubbed from the owned copy regardless
//! of what was copied, and the count field is read alone, validated, and
//! only then used to size anything.
//!
//! ## Layouts
//!
//! Two source layouts hide behind the same contract ([`wire`] documents
//! the bytes): a flat image owning header and array in one contiguous
//! allocation, and an indirect one where a fixed-size header names the
//! array's address and the array is copied into its own allocation. The
//! resulting [`FreeList`] carries the distinction as a tagged storage
//! variant so release frees precisely what acquire chose to allocate.

pub mod alloc;
pub mod source;
pub mod wire;

use bfl_error::{BflError, Result};
use bfl_types::{Extent, ParseError};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

pub use alloc::{AllocMode, AllocStats, HeapAllocator, Region, RegionAllocator};
pub use source::{BoundarySource, SliceSource};

/// Default ceiling on `num_extents`.
///
/// A policy value, not a correctness requirement: it exists solely to cap
/// the worst-case allocation a source can demand. Override it per call via
/// [`AcquireOptions::max_extents`].
pub const DEFAULT_MAX_EXTENTS: u64 = 1 << 20;

/// Trust classification of a free-list source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trust {
    /// Same privilege domain; the completion words are honored.
    Trusted,
    /// Crosses a privilege boundary; the completion words are scrubbed.
    Untrusted,
}

/// Physical layout of the source representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLayout {
    /// Header and extent array in one contiguous image.
    Flat,
    /// Fixed-size header naming the extent array's source address.
    Indirect,
}

/// Opaque completion token pair carried by trusted free lists.
///
/// The words are meaningful only to the trusted caller and its consumer;
/// this layer moves them intact or scrubs them, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub callback: u64,
    pub arg: u64,
}

/// Per-call policy for [`acquire`].
#[derive(Debug, Clone, Copy)]
pub struct AcquireOptions {
    pub layout: SourceLayout,
    pub trust: Trust,
    pub mode: AllocMode,
    /// Ceiling on `num_extents`, checked before any size arithmetic.
    pub max_extents: u64,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            layout: SourceLayout::Flat,
            trust: Trust::Untrusted,
            mode: AllocMode::Blocking,
            max_extents: DEFAULT_MAX_EXTENTS,
        }
    }
}

impl AcquireOptions {
    #[must_use]
    pub fn untrusted(layout: SourceLayout) -> Self {
        Self {
            layout,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn trusted(layout: SourceLayout) -> Self {
        Self {
            layout,
            trust: Trust::Trusted,
            ..Self::default()
        }
    }
}

/// Owned storage of an acquired list, tagged by layout.
#[derive(Debug)]
enum ListStorage {
    Flat(Region),
    Indirect { header: Region, extents: Region },
}

/// A validated, owned free list.
///
/// Produced only by [`acquire`]; destroyed exactly once by
/// [`FreeList::release`]. The extent bytes live in the owned region(s) and
/// are decoded on access.
#[derive(Debug)]
pub struct FreeList {
    count: u64,
    completion: Option<Completion>,
    storage: ListStorage,
}

impl FreeList {
    /// Number of extents; source of truth for the array length.
    #[must_use]
    pub fn extent_count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Completion tokens, present only for trusted acquisitions that
    /// carried a non-zero callback word.
    #[must_use]
    pub fn completion(&self) -> Option<Completion> {
        self.completion
    }

    /// Layout the source used, and therefore what release will free.
    #[must_use]
    pub fn layout(&self) -> SourceLayout {
        match self.storage {
            ListStorage::Flat(_) => SourceLayout::Flat,
            ListStorage::Indirect { .. } => SourceLayout::Indirect,
        }
    }

    fn extent_bytes(&self) -> &[u8] {
        match &self.storage {
            ListStorage::Flat(region) => &region.as_slice()[wire::FLAT_HEADER_SIZE..],
            ListStorage::Indirect { extents, .. } => extents.as_slice(),
        }
    }

    /// Decode the extent at `index`, or `None` past the end.
    #[must_use]
    pub fn extent(&self, index: u64) -> Option<Extent> {
        if index >= self.count {
            return None;
        }
        let index = usize::try_from(index).ok()?;
        wire::extent_at(self.extent_bytes(), index).ok()
    }

    /// Iterate the extents in order.
    pub fn extents(&self) -> impl Iterator<Item = Extent> + '_ {
        (0..self.count).filter_map(move |index| self.extent(index))
    }

    /// Free every region this list owns.
    ///
    /// Infallible; the sizes handed back to the allocator are recomputed
    /// from the extent count, matching what acquire requested.
    pub fn release(self, alloc: &dyn RegionAllocator) {
        trace!(count = self.count, layout = ?self.layout(), "releasing free list");
        match self.storage {
            ListStorage::Flat(region) => {
                alloc.deallocate(region, released_size(wire::flat_list_size(self.count)));
            }
            ListStorage::Indirect { header, extents } => {
                alloc.deallocate(extents, released_size(wire::extent_array_size(self.count)));
                alloc.deallocate(header, wire::INDIRECT_HEADER_SIZE);
            }
        }
    }
}

// Acquire proved this size computable when it allocated the region.
fn released_size(total: Option<u64>) -> usize {
    total
        .and_then(|total| usize::try_from(total).ok())
        .expect("region size validated at acquire")
}

fn wire_error(err: ParseError) -> BflError {
    BflError::Format(err.to_string())
}

/// Copy a free list from `source` into owned, validated memory.
///
/// On success the returned [`FreeList`] is fully populated and exclusively
/// owned by the caller, which must hand it to [`FreeList::release`]
/// exactly once. On failure nothing is returned and no allocation
/// survives: every interim region is handed back to `alloc` before the
/// error propagates.
///
/// # Errors
///
/// [`BflError::InputTooLarge`] if the source's extent count exceeds
/// `options.max_extents`; [`BflError::SizeOverflow`] if size arithmetic
/// would wrap; [`BflError::AllocFailed`] if the allocator refuses;
/// [`BflError::BoundaryFault`] if any boundary-crossing copy fails.
pub fn acquire(
    source: &dyn BoundarySource,
    addr: u64,
    options: &AcquireOptions,
    alloc: &dyn RegionAllocator,
) -> Result<FreeList> {
    let list = match options.layout {
        SourceLayout::Flat => acquire_flat(source, addr, options, alloc),
        SourceLayout::Indirect => acquire_indirect(source, addr, options, alloc),
    }?;
    debug!(
        count = list.count,
        layout = ?options.layout,
        trust = ?options.trust,
        "acquired free list"
    );
    Ok(list)
}

/// Read the count field alone — exactly 8 bytes, before anything else
/// about the source is believed.
fn read_count(source: &dyn BoundarySource, addr: u64, trust: Trust) -> Result<u64> {
    let mut buf = [0_u8; 8];
    // The count is the first header field, so it sits at `addr` itself.
    source.copy_from_boundary(addr, &mut buf, trust)?;
    Ok(u64::from_le_bytes(buf))
}

fn validate_count(count: u64, options: &AcquireOptions) -> Result<()> {
    if count > options.max_extents {
        return Err(BflError::InputTooLarge {
            count,
            max: options.max_extents,
        });
    }
    Ok(())
}

fn acquire_flat(
    source: &dyn BoundarySource,
    addr: u64,
    options: &AcquireOptions,
    alloc: &dyn RegionAllocator,
) -> Result<FreeList> {
    let count = read_count(source, addr, options.trust)?;
    validate_count(count, options)?;

    let total = wire::flat_list_size(count).ok_or(BflError::SizeOverflow {
        what: "flat list size",
    })?;
    let size = usize::try_from(total).map_err(|_| BflError::SizeOverflow {
        what: "flat list size",
    })?;

    let mut region = alloc.allocate(size, options.mode)?;
    if let Err(fault) = source.copy_from_boundary(addr, region.as_mut_slice(), options.trust) {
        alloc.deallocate(region, size);
        return Err(fault);
    }

    let completion = match seal_header(region.as_mut_slice(), count, options.trust) {
        Ok(completion) => completion,
        Err(err) => {
            alloc.deallocate(region, size);
            return Err(wire_error(err));
        }
    };

    Ok(FreeList {
        count,
        completion,
        storage: ListStorage::Flat(region),
    })
}

fn acquire_indirect(
    source: &dyn BoundarySource,
    addr: u64,
    options: &AcquireOptions,
    alloc: &dyn RegionAllocator,
) -> Result<FreeList> {
    let count = read_count(source, addr, options.trust)?;
    validate_count(count, options)?;

    // The array size gets its own overflow check, independent of the
    // fixed header size.
    let array_total = wire::extent_array_size(count).ok_or(BflError::SizeOverflow {
        what: "extent array size",
    })?;
    let array_size = usize::try_from(array_total).map_err(|_| BflError::SizeOverflow {
        what: "extent array size",
    })?;

    let mut header = alloc.allocate(wire::INDIRECT_HEADER_SIZE, options.mode)?;
    if let Err(fault) = source.copy_from_boundary(addr, header.as_mut_slice(), options.trust) {
        alloc.deallocate(header, wire::INDIRECT_HEADER_SIZE);
        return Err(fault);
    }

    // The array address came across the boundary too; it is only ever
    // dereferenced through the copy primitive below.
    let extents_addr = match wire::parse_extents_addr(header.as_slice()) {
        Ok(addr) => addr,
        Err(err) => {
            alloc.deallocate(header, wire::INDIRECT_HEADER_SIZE);
            return Err(wire_error(err));
        }
    };

    let mut extents = match alloc.allocate(array_size, options.mode) {
        Ok(region) => region,
        Err(err) => {
            alloc.deallocate(header, wire::INDIRECT_HEADER_SIZE);
            return Err(err);
        }
    };
    if let Err(fault) =
        source.copy_from_boundary(extents_addr, extents.as_mut_slice(), options.trust)
    {
        alloc.deallocate(extents, array_size);
        alloc.deallocate(header, wire::INDIRECT_HEADER_SIZE);
        return Err(fault);
    }

    let completion = match seal_header(header.as_mut_slice(), count, options.trust) {
        Ok(completion) => completion,
        Err(err) => {
            alloc.deallocate(extents, array_size);
            alloc.deallocate(header, wire::INDIRECT_HEADER_SIZE);
            return Err(wire_error(err));
        }
    };

    Ok(FreeList {
        count,
        completion,
        storage: ListStorage::Indirect { header, extents },
    })
}

/// Finalize an owned header copy: re-stamp the validated count (the source
/// may have changed between the two reads; the validated value is what
/// sized the allocation) and apply the trust rule to the completion words.
fn seal_header(
    bytes: &mut [u8],
    count: u64,
    trust: Trust,
) -> std::result::Result<Option<Completion>, ParseError> {
    wire::store_num_extents(bytes, count)?;
    match trust {
        Trust::Untrusted => {
            wire::scrub_completion(bytes)?;
            Ok(None)
        }
        Trust::Trusted => Ok(wire::parse_header(bytes)?.completion()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn flat_image(extents: &[Extent], completion: Option<Completion>) -> Vec<u8> {
        wire::encode_flat(extents, completion)
    }

    /// One buffer holding an indirect header at `base` and the array
    /// right behind it.
    fn indirect_image(
        extents: &[Extent],
        completion: Option<Completion>,
        base: u64,
    ) -> Vec<u8> {
        let array_addr = base + wire::INDIRECT_HEADER_SIZE as u64;
        let mut image =
            wire::encode_indirect_header(extents.len() as u64, completion, array_addr);
        image.extend_from_slice(&wire::encode_extent_array(extents));
        image
    }

    #[test]
    fn flat_untrusted_acquire_scrubs_completion() {
        let extents = [Extent::new(4096, 65536), Extent::new(1 << 20, 4096)];
        let image = flat_image(
            &extents,
            Some(Completion {
                callback: 0xdead_beef,
                arg: 42,
            }),
        );
        let source = SliceSource::new(&image);
        let alloc = HeapAllocator::new();

        let list = acquire(
            &source,
            0,
            &AcquireOptions::untrusted(SourceLayout::Flat),
            &alloc,
        )
        .expect("acquire");

        assert_eq!(list.extent_count(), 2);
        assert_eq!(list.completion(), None);
        assert_eq!(list.extent(0), Some(extents[0]));
        assert_eq!(list.extent(1), Some(extents[1]));
        assert_eq!(list.extent(2), None);
        assert_eq!(list.layout(), SourceLayout::Flat);

        list.release(&alloc);
        assert_eq!(alloc.stats().live_regions, 0);
    }

    #[test]
    fn flat_trusted_acquire_round_trips_completion() {
        let completion = Completion {
            callback: 0x00ca_11ab,
            arg: 0x0a46,
        };
        let image = flat_image(&[Extent::new(0, 512)], Some(completion));
        let source = SliceSource::new(&image);
        let alloc = HeapAllocator::new();

        let list = acquire(
            &source,
            0,
            &AcquireOptions::trusted(SourceLayout::Flat),
            &alloc,
        )
        .expect("acquire");
        assert_eq!(list.completion(), Some(completion));
        list.release(&alloc);
    }

    #[test]
    fn indirect_acquire_reaches_the_array() {
        let extents = [
            Extent::new(512, 512),
            Extent::new(8192, 16384),
            Extent::new(1 << 30, 1 << 16),
        ];
        let base = 0x10_0000;
        let image = indirect_image(&extents, None, base);
        let source = SliceSource::with_base(base, &image);
        let alloc = HeapAllocator::new();

        let list = acquire(
            &source,
            base,
            &AcquireOptions::untrusted(SourceLayout::Indirect),
            &alloc,
        )
        .expect("acquire");

        assert_eq!(list.extent_count(), 3);
        assert_eq!(list.layout(), SourceLayout::Indirect);
        let collected: Vec<Extent> = list.extents().collect();
        assert_eq!(collected, extents);
        // Header and array are separate allocations.
        assert_eq!(alloc.stats().live_regions, 2);

        list.release(&alloc);
        assert_eq!(alloc.stats().live_regions, 0);
        assert_eq!(alloc.stats().live_bytes, 0);
    }

    #[test]
    fn trust_is_explicit_not_inferred() {
        // The same bytes acquired under each classification differ only
        // in the completion words.
        let completion = Completion {
            callback: 0xbad0_cafe,
            arg: 1,
        };
        let image = flat_image(&[Extent::new(0, 4096)], Some(completion));
        let alloc = HeapAllocator::new();

        let trusted = acquire(
            &SliceSource::new(&image),
            0,
            &AcquireOptions::trusted(SourceLayout::Flat),
            &alloc,
        )
        .expect("trusted acquire");
        let untrusted = acquire(
            &SliceSource::new(&image),
            0,
            &AcquireOptions::untrusted(SourceLayout::Flat),
            &alloc,
        )
        .expect("untrusted acquire");

        assert_eq!(trusted.completion(), Some(completion));
        assert_eq!(untrusted.completion(), None);
        assert_eq!(
            trusted.extents().collect::<Vec<_>>(),
            untrusted.extents().collect::<Vec<_>>()
        );

        trusted.release(&alloc);
        untrusted.release(&alloc);
        assert_eq!(alloc.stats().live_bytes, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Flat and indirect images of the same logical list are
        /// observably equivalent, and neither leaks.
        #[test]
        fn layouts_agree_and_balance(
            raw in proptest::collection::vec((any::<u64>(), any::<u64>()), 0..48),
            callback in any::<u64>(),
            arg in any::<u64>(),
        ) {
            let extents: Vec<Extent> =
                raw.iter().map(|&(start, length)| Extent::new(start, length)).collect();
            let completion = (callback != 0).then_some(Completion { callback, arg });

            let alloc = HeapAllocator::new();

            let flat = flat_image(&extents, completion);
            let flat_list = acquire(
                &SliceSource::new(&flat),
                0,
                &AcquireOptions::trusted(SourceLayout::Flat),
                &alloc,
            )
            .expect("flat acquire");

            let base = 0x8000;
            let image = indirect_image(&extents, completion, base);
            let indirect_list = acquire(
                &SliceSource::with_base(base, &image),
                base,
                &AcquireOptions::trusted(SourceLayout::Indirect),
                &alloc,
            )
            .expect("indirect acquire");

            prop_assert_eq!(flat_list.extent_count(), indirect_list.extent_count());
            prop_assert_eq!(flat_list.completion(), indirect_list.completion());
            prop_assert_eq!(flat_list.completion(), completion);
            prop_assert_eq!(
                flat_list.extents().collect::<Vec<_>>(),
                indirect_list.extents().collect::<Vec<_>>()
            );
            prop_assert_eq!(flat_list.extents().collect::<Vec<_>>(), extents);

            flat_list.release(&alloc);
            indirect_list.release(&alloc);
            let stats = alloc.stats();
            prop_assert_eq!(stats.live_regions, 0);
            prop_assert_eq!(stats.live_bytes, 0);
        }
    }
}
