// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![cfg_attr(not(any(test, feature = "emulate")), no_std)]

//! Copies bytes between two virtual memory regions that may live in unrelated address spaces.
//!
//! Neither region needs to be page aligned, and the two regions do not need to share the same
//! offset within their first page. A transfer pins the physical pages backing both sides, copies
//! them one page-bounded [`Chunk`] at a time through short-lived kernel mappings and then releases
//! every pin again, regardless of whether the copy succeeded.
//!
//! ## Pin lifetime
//!
//! Pins are only ever held for the duration of a single [`Segment`]. Both the pin handles
//! ([`PagePin`]) and the page mappings handed out by [`Frame::map`] release their resource on drop,
//! so every early return inside the engine unwinds all resources acquired for the current segment.
//! Segments that completed before a failing one are **not** rolled back, see [`Transfer::execute`].

extern crate alloc;

mod address;
mod aspace;
pub mod config;
mod copy;
pub mod dispatch;
#[cfg(any(test, feature = "emulate"))]
pub mod emulate;
mod error;
pub mod kconfig;
mod pin;
mod region;
mod transfer;

pub use address::VirtualAddress;
pub use aspace::{Access, AddressSpace, Frame, MapError, PageMapping, PinError};
pub use config::Config;
pub use copy::{Chunk, Chunks, chunks, copy};
pub use error::{Error, Result, SegmentError, errno};
pub use pin::{PagePin, PinPool, PinSet, PinSlot, max_pages, pin};
pub use region::{Region, RegionLayout, resolve};
pub use transfer::{CancelToken, Segment, Transfer, TransferStats, execute};
