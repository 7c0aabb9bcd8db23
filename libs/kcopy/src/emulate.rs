// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! An in-process memory manager the engine can run against in hosted tests.
//!
//! The emulation supports modeling the following properties:
//!
//! - any number of independent address spaces sharing one pool of physical frames
//! - lazily backed mappings that are faulted in on first pin or access
//! - read-only mappings, unmapped holes and physical memory exhaustion
//! - per-frame pin counts and dirty flags, so tests can check that every pin is released
//! - injected failures of the temporary kernel mappings used for copying

mod address_space;
mod frame;
mod machine;

pub use address_space::{EmulateError, EmulatedAddressSpace, PageFlags, PageTable};
pub use frame::{FrameInfo, FrameMapping, PinnedFrame};
pub use machine::Machine;
