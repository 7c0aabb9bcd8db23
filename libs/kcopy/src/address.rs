// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

/// An address in some (not necessarily the current) virtual address space.
///
/// The engine never dereferences a `VirtualAddress` itself, it is only ever handed to the
/// [`AddressSpace`][crate::AddressSpace] it belongs to.
#[repr(transparent)]
#[derive(Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(usize);

impl VirtualAddress {
    pub const MAX: Self = Self(usize::MAX);

    #[must_use]
    pub const fn new(n: usize) -> Self {
        Self(n)
    }

    #[inline]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Adds an unsigned offset to this address, panicking if overflow occurred.
    #[must_use]
    #[inline]
    pub const fn add(self, offset: usize) -> Self {
        Self(self.0 + offset)
    }

    /// Adds an unsigned offset to this address, returning `None` if overflow occurred.
    #[must_use]
    #[inline]
    pub const fn checked_add(self, offset: usize) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    /// Calculates the distance between two addresses in bytes, _where it’s known that `self`
    /// is equal to or greater than `origin`_.
    ///
    /// # Panics
    ///
    /// Panics if `self` is less than `origin`.
    #[must_use]
    #[inline]
    pub const fn offset_from_unsigned(self, origin: Self) -> usize {
        let (a, b) = self.0.overflowing_sub(origin.0);
        if b {
            panic!("attempt to subtract with overflow")
        } else {
            a
        }
    }

    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    #[must_use]
    #[inline]
    pub const fn is_aligned_to(&self, align: usize) -> bool {
        assert!(
            align.is_power_of_two(),
            "is_aligned_to: align is not a power-of-two"
        );

        self.0 & (align - 1) == 0
    }

    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    #[must_use]
    #[inline]
    pub const fn align_down(self, align: usize) -> Self {
        assert!(
            align.is_power_of_two(),
            "align_down: align is not a power-of-two"
        );

        let aligned = Self(self.0 & 0usize.wrapping_sub(align));
        debug_assert!(aligned.is_aligned_to(align));
        debug_assert!(aligned.0 <= self.0);
        aligned
    }

    /// Returns the byte offset of this address within its page.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is not a power of two.
    #[must_use]
    #[inline]
    pub const fn page_offset(self, page_size: usize) -> usize {
        assert!(
            page_size.is_power_of_two(),
            "page_offset: page_size is not a power-of-two"
        );

        self.0 & (page_size - 1)
    }

    /// Returns the number of the page this address falls into.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is not a power of two.
    #[must_use]
    #[inline]
    pub const fn page_number(self, page_size: usize) -> usize {
        assert!(
            page_size.is_power_of_two(),
            "page_number: page_size is not a power-of-two"
        );

        self.0 / page_size
    }
}

impl From<usize> for VirtualAddress {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:#018x}", self.0)) // 18 digits to account for the leading 0x
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VirtualAddress")
            .field(&format_args!("{:#018x}", self.0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_arithmetic() {
        let addr = VirtualAddress::new(4096 + 10);

        assert_eq!(addr.page_offset(4096), 10);
        assert_eq!(addr.page_number(4096), 1);
        assert_eq!(addr.align_down(4096), VirtualAddress::new(4096));
        assert!(addr.align_down(4096).is_aligned_to(4096));
    }

    #[test]
    fn checked_add_overflows() {
        assert_eq!(VirtualAddress::MAX.checked_add(1), None);
        assert_eq!(
            VirtualAddress::new(10).checked_add(5),
            Some(VirtualAddress::new(15))
        );
    }

    proptest::proptest! {
        #[test]
        fn offset_plus_aligned_is_identity(addr: usize) {
            let addr = VirtualAddress::new(addr);
            let aligned = addr.align_down(4096);

            proptest::prop_assert_eq!(aligned.add(addr.page_offset(4096)), addr);
            proptest::prop_assert_eq!(addr.offset_from_unsigned(aligned), addr.page_offset(4096));
        }
    }
}
