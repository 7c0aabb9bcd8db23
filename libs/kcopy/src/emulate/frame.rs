// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::UnsafeCell;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use static_assertions::assert_impl_all;

use crate::emulate::Machine;
use crate::kconfig::PAGE_SIZE;
use crate::{Access, Frame, MapError, PageMapping};

/// Soft limit on the number of pins a single frame may carry.
const MAX_PINS: usize = isize::MAX as usize;

/// One emulated physical page.
///
/// Frames are shared between the page table that maps them and every [`PinnedFrame`] pinning
/// them, the memory is freed once the last of those is gone.
pub struct FrameInfo {
    data: Box<[UnsafeCell<u8>]>,
    pins: AtomicUsize,
    dirty: AtomicBool,
    machine: Machine,
}

// Safety: the bytes are only ever accessed through raw pointers, never through references. Racing
// accesses to the same bytes are the caller's problem, just like with real memory.
unsafe impl Sync for FrameInfo {}

assert_impl_all!(FrameInfo: Send, Sync);

impl FrameInfo {
    pub(super) fn new(machine: Machine) -> Self {
        Self {
            data: std::iter::repeat_with(|| UnsafeCell::new(0))
                .take(PAGE_SIZE)
                .collect(),
            pins: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
            machine,
        }
    }

    /// Number of pins currently held on this frame.
    pub fn pins(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn as_non_null(&self) -> NonNull<u8> {
        NonNull::from(&*self.data).cast()
    }

    /// Copies `buf.len()` bytes starting at `offset` out of the frame.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds of the frame.
    pub(super) fn read(&self, offset: usize, buf: &mut [u8]) {
        assert!(offset + buf.len() <= PAGE_SIZE);

        // Safety: bounds checked above, the source lives inside `UnsafeCell`s
        unsafe {
            self.as_non_null()
                .add(offset)
                .as_ptr()
                .copy_to_nonoverlapping(buf.as_mut_ptr(), buf.len());
        }
    }

    /// Copies `bytes` into the frame starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds of the frame.
    pub(super) fn write(&self, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= PAGE_SIZE);

        // Safety: bounds checked above, the destination lives inside `UnsafeCell`s
        unsafe {
            self.as_non_null()
                .add(offset)
                .as_ptr()
                .copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
        }
    }
}

impl Drop for FrameInfo {
    fn drop(&mut self) {
        debug_assert_eq!(self.pins(), 0, "freed a pinned frame");
        self.machine.frame_freed();
    }
}

impl fmt::Debug for FrameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameInfo")
            .field("addr", &self.as_non_null())
            .field("pins", &self.pins())
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

/// A pin on an emulated frame, the [`Frame`] handed out by
/// [`EmulatedAddressSpace`][super::EmulatedAddressSpace].
///
/// The frame stays allocated while pinned, even if its page is unmapped in the meantime.
pub struct PinnedFrame {
    info: Arc<FrameInfo>,
}

assert_impl_all!(PinnedFrame: Send, Sync);

impl PinnedFrame {
    pub(super) fn pin(info: Arc<FrameInfo>) -> Self {
        let prev = info.pins.fetch_add(1, Ordering::Relaxed);
        assert!(prev < MAX_PINS, "pin count overflow");
        info.machine.pin_acquired();

        Self { info }
    }

    pub fn info(&self) -> &FrameInfo {
        &self.info
    }
}

impl Drop for PinnedFrame {
    fn drop(&mut self) {
        self.info.pins.fetch_sub(1, Ordering::Release);
        self.info.machine.pin_released();
    }
}

impl fmt::Debug for PinnedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PinnedFrame").field(&self.info).finish()
    }
}

impl Frame for PinnedFrame {
    type Mapping<'a> = FrameMapping<'a>;

    fn map(&self, access: Access) -> Result<Self::Mapping<'_>, MapError> {
        self.info.machine.map_frame(&self.info, access)
    }

    fn mark_dirty(&self) {
        self.info.dirty.store(true, Ordering::Release);
    }
}

/// A temporary mapping of a [`PinnedFrame`].
#[derive(Debug)]
pub struct FrameMapping<'a> {
    frame: &'a FrameInfo,
}

impl<'a> FrameMapping<'a> {
    pub(super) fn new(frame: &'a FrameInfo) -> Self {
        Self { frame }
    }
}

impl PageMapping for FrameMapping<'_> {
    fn as_ptr(&self) -> NonNull<u8> {
        self.frame.as_non_null()
    }
}

impl Drop for FrameMapping<'_> {
    fn drop(&mut self) {
        self.frame.machine.unmap_frame();
    }
}
