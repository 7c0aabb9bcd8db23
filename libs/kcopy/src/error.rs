// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt::{Display, Formatter};

use crate::{PinError, VirtualAddress};

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Linux-compatible error numbers, returned negated by the control surface.
pub mod errno {
    pub const EINTR: i32 = 4;
    pub const EIO: i32 = 5;
    pub const ENOMEM: i32 = 12;
    pub const EFAULT: i32 = 14;
    pub const EINVAL: i32 = 22;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The region is empty or extends past the end of the address space.
    InvalidRegion,
    /// The region spans more pages than a single pin set may hold.
    ResourceLimitExceeded { pages: usize, max: usize },
    /// Only `pinned` out of `requested` pages could be pinned; `address` is the first page that failed.
    PinFailed {
        address: VirtualAddress,
        pinned: usize,
        requested: usize,
        reason: PinError,
    },
    /// Mapping a pinned page for the byte copy failed.
    CopyFault,
    /// The transfer was cancelled before the segment started.
    Cancelled,
}

impl Error {
    /// The negative status code reported for this error by the control surface.
    pub const fn errno(&self) -> i32 {
        match self {
            Error::InvalidRegion => -errno::EINVAL,
            Error::ResourceLimitExceeded { .. } => -errno::ENOMEM,
            Error::PinFailed { .. } => -errno::EFAULT,
            Error::CopyFault => -errno::EIO,
            Error::Cancelled => -errno::EINTR,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidRegion => write!(f, "region is empty or not addressable"),
            Error::ResourceLimitExceeded { pages, max } => write!(
                f,
                "region spans {pages} pages which is more than the maximum of {max}"
            ),
            Error::PinFailed {
                address,
                pinned,
                requested,
                reason,
            } => write!(
                f,
                "failed to pin page at {address} ({reason}), pinned {pinned} of {requested} pages"
            ),
            Error::CopyFault => write!(f, "failed to map pinned page for copying"),
            Error::Cancelled => write!(f, "transfer was cancelled"),
        }
    }
}

impl core::error::Error for Error {}

/// The first failing segment of a transfer request.
///
/// Segments before `index` completed and their effects persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentError {
    pub index: usize,
    pub error: Error,
}

impl SegmentError {
    pub const fn errno(&self) -> i32 {
        self.error.errno()
    }
}

impl Display for SegmentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "segment {} failed: {}", self.index, self.error)
    }
}

impl core::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[macro_export]
macro_rules! ensure {
    ($cond:expr, $error:expr) => {
        if !$cond {
            return Err($error);
        }
    };
}
