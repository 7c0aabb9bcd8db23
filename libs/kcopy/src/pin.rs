// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::vec::Vec;
use core::{fmt, mem};

use crate::{Access, AddressSpace, Error, Frame, Region, Result, ensure};

/// The maximum number of pages one side of a segment may span in address space `A`.
///
/// The [`PagePin`]s of both the source and the destination of a segment have to fit into one page
/// worth of storage, so each side gets half of it.
pub const fn max_pages<A: AddressSpace>() -> usize {
    let handle = mem::size_of::<PagePin<A::Frame>>();
    let handle = if handle == 0 { 1 } else { handle };

    A::PAGE_SIZE / handle / 2
}

/// Ownership of one pinned page for the duration of a single segment's copy.
pub struct PagePin<F: Frame> {
    frame: F,
    access: Access,
    written: bool,
}

impl<F: Frame> PagePin<F> {
    fn new(frame: F, access: Access) -> Self {
        Self {
            frame,
            access,
            written: false,
        }
    }

    pub fn frame(&self) -> &F {
        &self.frame
    }

    pub fn access(&self) -> Access {
        self.access
    }

    /// Records that bytes were copied into this page.
    ///
    /// # Panics
    ///
    /// Panics (in debug builds) if the page was not pinned for writing.
    pub fn mark_written(&mut self) {
        debug_assert!(
            self.access.is_write(),
            "attempted to write to a page pinned for reading"
        );
        self.written = true;
    }
}

impl<F: Frame> Drop for PagePin<F> {
    /// Releases the pin, marking the page dirty first if it was written.
    fn drop(&mut self) {
        if self.access.is_write() && self.written {
            self.frame.mark_dirty();
        }
    }
}

impl<F: Frame> fmt::Debug for PagePin<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagePin")
            .field("access", &self.access)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

/// Per-request storage for pin handles.
///
/// The storage is allocated once when the pool is created and reused by every segment of the
/// request, both halves are bounded by the pool's page limit.
pub struct PinPool<F: Frame> {
    destination: Vec<PagePin<F>>,
    source: Vec<PagePin<F>>,
    max_pages: usize,
}

impl<F: Frame> PinPool<F> {
    pub fn new(max_pages: usize) -> Self {
        Self {
            destination: Vec::with_capacity(max_pages),
            source: Vec::with_capacity(max_pages),
            max_pages,
        }
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Splits the pool into its destination and source halves.
    pub fn split(&mut self) -> (PinSlot<'_, F>, PinSlot<'_, F>) {
        debug_assert!(self.destination.is_empty() && self.source.is_empty());

        (
            PinSlot {
                pages: &mut self.destination,
                max_pages: self.max_pages,
            },
            PinSlot {
                pages: &mut self.source,
                max_pages: self.max_pages,
            },
        )
    }
}

impl<F: Frame> fmt::Debug for PinPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinPool")
            .field("max_pages", &self.max_pages)
            .field("destination", &self.destination.len())
            .field("source", &self.source.len())
            .finish()
    }
}

/// One half of a [`PinPool`], filled by [`pin`].
pub struct PinSlot<'pool, F: Frame> {
    pages: &'pool mut Vec<PagePin<F>>,
    max_pages: usize,
}

impl<F: Frame> PinSlot<'_, F> {
    pub fn max_pages(&self) -> usize {
        self.max_pages
    }
}

/// The pinned pages backing one side of a segment.
///
/// Dropping a `PinSet` releases all of its pins, see [`PinSet::unpin`].
pub struct PinSet<'pool, F: Frame> {
    pages: &'pool mut Vec<PagePin<F>>,
    first_page_offset: usize,
    page_size: usize,
}

impl<F: Frame> PinSet<'_, F> {
    /// Byte offset of the region's start within the first pinned page.
    pub fn first_page_offset(&self) -> usize {
        self.first_page_offset
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn pages(&self) -> &[PagePin<F>] {
        self.pages
    }

    pub(crate) fn pages_mut(&mut self) -> &mut [PagePin<F>] {
        self.pages
    }

    /// Releases every pin in this set, marking written destination pages dirty.
    ///
    /// Only pages that were actually pinned are part of the set, so this is also correct for a set
    /// that was abandoned half-way through pinning.
    pub fn unpin(self) {
        drop(self);
    }
}

impl<F: Frame> Drop for PinSet<'_, F> {
    fn drop(&mut self) {
        log::trace!("releasing {} pinned pages", self.pages.len());
        // dropping the `PagePin`s releases them, the allocation stays around for the next segment
        self.pages.clear();
    }
}

impl<F: Frame> fmt::Debug for PinSet<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinSet")
            .field("pages", &self.pages)
            .field("first_page_offset", &self.first_page_offset)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// Pins every page backing `region` for the given `access`, storing the pins in `slot`.
///
/// The page table lock of the region's address space is held in shared mode while pinning and
/// released before this function returns.
///
/// # Errors
///
/// - [`Error::InvalidRegion`] if the region is empty.
/// - [`Error::ResourceLimitExceeded`] if the region spans more pages than `slot` can hold. Nothing
///   is pinned in this case.
/// - [`Error::PinFailed`] if any page could not be pinned. Pages pinned up to that point are
///   released again.
pub fn pin<'pool, A: AddressSpace>(
    region: &Region<'_, A>,
    access: Access,
    slot: PinSlot<'pool, A::Frame>,
) -> Result<PinSet<'pool, A::Frame>> {
    let layout = region.resolve()?;

    ensure!(
        layout.page_count <= slot.max_pages,
        Error::ResourceLimitExceeded {
            pages: layout.page_count,
            max: slot.max_pages,
        }
    );

    let aspace = region.address_space();
    let start = region.base().align_down(A::PAGE_SIZE);

    let set = PinSet {
        pages: slot.pages,
        first_page_offset: layout.first_page_offset,
        page_size: A::PAGE_SIZE,
    };
    debug_assert!(set.is_empty());

    // declared after `set` so the lock is released before any pins are
    let table = aspace.page_table().read();

    for i in 0..layout.page_count {
        let page = start.add(i * A::PAGE_SIZE);

        match aspace.pin_page(&table, page, access) {
            Ok(frame) => set.pages.push(PagePin::new(frame, access)),
            Err(reason) => {
                log::warn!(
                    "failed to pin {access:?} page {page} ({reason}), pinned {i} of {} pages",
                    layout.page_count
                );

                return Err(Error::PinFailed {
                    address: page,
                    pinned: i,
                    requested: layout.page_count,
                    reason,
                });
            }
        }
    }

    drop(table);

    log::trace!(
        "pinned {} {access:?} pages starting at {start} (offset {:#x})",
        set.len(),
        set.first_page_offset
    );

    Ok(set)
}
