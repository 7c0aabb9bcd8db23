// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cmp;

use crate::{AddressSpace, kconfig, max_pages};

/// Runtime limits of a [`Transfer`][crate::Transfer].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    max_pages: Option<usize>,
    max_segments: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub const fn new() -> Self {
        Self {
            max_pages: None,
            max_segments: kconfig::MAX_SEGMENTS,
        }
    }

    /// Lowers the number of pages one side of a segment may span.
    ///
    /// Values above [`max_pages`] of the address space are clamped, the pin storage budget can
    /// only be narrowed.
    #[must_use]
    pub const fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Sets the maximum number of segments accepted by the control surface.
    #[must_use]
    pub const fn with_max_segments(mut self, max_segments: u32) -> Self {
        self.max_segments = max_segments;
        self
    }

    pub const fn max_segments(&self) -> u32 {
        self.max_segments
    }

    /// The page budget per segment side in effect for address spaces of type `A`.
    pub fn max_pages<A: AddressSpace>(&self) -> usize {
        match self.max_pages {
            Some(limit) => cmp::min(limit, max_pages::<A>()),
            None => max_pages::<A>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulate::EmulatedAddressSpace;

    #[test]
    fn defaults() {
        let config = Config::default();

        assert_eq!(config.max_segments(), kconfig::MAX_SEGMENTS);
        assert_eq!(
            config.max_pages::<EmulatedAddressSpace>(),
            max_pages::<EmulatedAddressSpace>()
        );
    }

    #[test]
    fn page_budget_can_only_shrink() {
        let limit = max_pages::<EmulatedAddressSpace>();

        let config = Config::new().with_max_pages(4);
        assert_eq!(config.max_pages::<EmulatedAddressSpace>(), 4);

        let config = Config::new().with_max_pages(limit * 2);
        assert_eq!(config.max_pages::<EmulatedAddressSpace>(), limit);
    }
}
