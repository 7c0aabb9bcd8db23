// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use crate::{AddressSpace, Error, Result, VirtualAddress, ensure};

/// The page geometry of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    /// Number of pages touched by the region.
    pub page_count: usize,
    /// Byte offset of the region's start within its first page.
    pub first_page_offset: usize,
}

/// Computes the page geometry of `len` bytes starting at `base`.
///
/// # Errors
///
/// Returns [`Error::InvalidRegion`] if `len` is zero or the region wraps around the end of the
/// address space.
///
/// # Panics
///
/// Panics if `page_size` is not a power of two.
pub fn resolve(base: VirtualAddress, len: usize, page_size: usize) -> Result<RegionLayout> {
    ensure!(len > 0, Error::InvalidRegion);
    ensure!(base.checked_add(len).is_some(), Error::InvalidRegion);

    let first_page_offset = base.page_offset(page_size);
    let page_count = (first_page_offset + len).div_ceil(page_size);

    Ok(RegionLayout {
        page_count,
        first_page_offset,
    })
}

/// A byte range in some address space, named by its virtual base address and length.
pub struct Region<'a, A> {
    address_space: &'a A,
    base: VirtualAddress,
    len: usize,
}

impl<A> Clone for Region<'_, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for Region<'_, A> {}

impl<A> fmt::Debug for Region<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl<'a, A> Region<'a, A> {
    pub const fn new(address_space: &'a A, base: VirtualAddress, len: usize) -> Self {
        Self {
            address_space,
            base,
            len,
        }
    }

    pub const fn address_space(&self) -> &'a A {
        self.address_space
    }

    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the region covering only the first `len` bytes of `self`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRegion`] if `len` exceeds the length of `self`.
    pub fn prefix(&self, len: usize) -> Result<Self> {
        ensure!(len <= self.len, Error::InvalidRegion);

        Ok(Self {
            address_space: self.address_space,
            base: self.base,
            len,
        })
    }
}

impl<A: AddressSpace> Region<'_, A> {
    /// Computes the page geometry of this region.
    ///
    /// # Errors
    ///
    /// See [`resolve`].
    pub fn resolve(&self) -> Result<RegionLayout> {
        resolve(self.base, self.len, A::PAGE_SIZE)
    }
}
