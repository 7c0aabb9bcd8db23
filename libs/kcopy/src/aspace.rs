// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::ptr::NonNull;

use lock_api::{RawRwLock, RwLock};

use crate::VirtualAddress;

/// The kind of access a page is pinned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Source pages: only read from.
    Read,
    /// Destination pages: written to and marked dirty afterwards.
    Write,
}

impl Access {
    #[inline]
    pub const fn is_write(self) -> bool {
        matches!(self, Access::Write)
    }
}

/// Why the memory manager refused to pin a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PinError {
    /// No mapping covers the address.
    NotMapped,
    /// The mapping does not permit the requested [`Access`].
    AccessDenied,
    /// Faulting in the page failed because no physical memory was available.
    OutOfMemory,
}

impl fmt::Display for PinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinError::NotMapped => f.write_str("address not mapped"),
            PinError::AccessDenied => f.write_str("access denied"),
            PinError::OutOfMemory => f.write_str("out of memory"),
        }
    }
}

impl core::error::Error for PinError {}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MapError;

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to map physical page")
    }
}

impl core::error::Error for MapError {}

/// A temporary kernel mapping of one pinned page, unmapped when dropped.
pub trait PageMapping {
    /// Returns a pointer to the start of the mapped page.
    ///
    /// The pointer is valid for reads of `PAGE_SIZE` bytes for as long as the mapping is alive, and
    /// for writes too if the mapping was created with [`Access::Write`].
    fn as_ptr(&self) -> NonNull<u8>;
}

/// A pinned physical page.
///
/// Holding a `Frame` keeps the page resident: the memory manager may neither reclaim nor relocate
/// it. Dropping the `Frame` releases the pin.
pub trait Frame {
    type Mapping<'a>: PageMapping
    where
        Self: 'a;

    /// Temporarily maps the page into the kernel so its bytes can be accessed.
    ///
    /// # Errors
    ///
    /// Returns `Err(MapError)` when no temporary mapping could be established.
    fn map(&self, access: Access) -> Result<Self::Mapping<'_>, MapError>;

    /// Marks the page as modified so the memory manager writes it back instead of discarding it.
    fn mark_dirty(&self);
}

/// An address space whose pages can be pinned by the engine.
///
/// # Safety
///
/// Implementors must guarantee that:
///
/// 1. A [`Frame`] returned by [`pin_page`][AddressSpace::pin_page] refers to the physical page
///    backing the requested virtual page at the time of the call and stays valid until dropped.
/// 2. Mappings returned by [`Frame::map`] are valid for `PAGE_SIZE` bytes as described
///    in [`PageMapping::as_ptr`].
pub unsafe trait AddressSpace {
    /// The size of one page in bytes, must be a power of two.
    const PAGE_SIZE: usize;

    type Frame: Frame;
    type RawRwLock: RawRwLock;
    type PageTable;

    /// The page table of this address space, guarded by its lock.
    ///
    /// The engine only ever takes this lock in shared mode and only while pinning.
    fn page_table(&self) -> &RwLock<Self::RawRwLock, Self::PageTable>;

    /// Pins the page starting at the page-aligned address `page`, faulting it in if it is not
    /// backed yet.
    ///
    /// `table` is the page table of this address space, the caller holds its lock in shared mode.
    ///
    /// # Errors
    ///
    /// Returns a [`PinError`] describing why the page could not be pinned.
    fn pin_page(
        &self,
        table: &Self::PageTable,
        page: VirtualAddress,
        access: Access,
    ) -> Result<Self::Frame, PinError>;
}
