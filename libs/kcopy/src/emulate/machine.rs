// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::emulate::frame::{FrameInfo, FrameMapping};
use crate::{Access, MapError, PinError, kconfig};

/// The physical side of the emulation: hands out frames and keeps count of pins and mappings.
///
/// Cloning a `Machine` yields another handle to the same machine.
pub struct Machine(Arc<MachineInner>);

struct MachineInner {
    frame_limit: AtomicUsize,
    frames: AtomicUsize,
    pinned: AtomicUsize,
    mappings: AtomicUsize,
    fail_next_map: AtomicBool,
}

impl Clone for Machine {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("frame_limit", &self.0.frame_limit.load(Ordering::Relaxed))
            .field("frames", &self.frames_allocated())
            .field("pinned", &self.pinned_frames())
            .field("mappings", &self.active_mappings())
            .field("fail_next_map", &self.0.fail_next_map.load(Ordering::Relaxed))
            .finish()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self::with_frame_limit(kconfig::EMULATED_FRAME_LIMIT)
    }

    /// Creates a machine that can back at most `limit` pages at any one time.
    pub fn with_frame_limit(limit: usize) -> Self {
        Self(Arc::new(MachineInner {
            frame_limit: AtomicUsize::new(limit),
            frames: AtomicUsize::new(0),
            pinned: AtomicUsize::new(0),
            mappings: AtomicUsize::new(0),
            fail_next_map: AtomicBool::new(false),
        }))
    }

    pub fn set_frame_limit(&self, limit: usize) {
        self.0.frame_limit.store(limit, Ordering::Release);
    }

    /// Number of frames currently backing some page.
    pub fn frames_allocated(&self) -> usize {
        self.0.frames.load(Ordering::Acquire)
    }

    /// Number of pins currently held across all frames.
    pub fn pinned_frames(&self) -> usize {
        self.0.pinned.load(Ordering::Acquire)
    }

    /// Number of temporary kernel mappings currently alive.
    pub fn active_mappings(&self) -> usize {
        self.0.mappings.load(Ordering::Acquire)
    }

    /// Makes the next [`Frame::map`][crate::Frame::map] call on any frame of this machine fail.
    pub fn fail_next_map(&self) {
        self.0.fail_next_map.store(true, Ordering::Release);
    }

    pub(super) fn allocate_frame(&self) -> Result<Arc<FrameInfo>, PinError> {
        let limit = self.0.frame_limit.load(Ordering::Acquire);

        self.0
            .frames
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .map_err(|n| {
                log::debug!("frame allocation failed: {n} of {limit} frames in use");
                PinError::OutOfMemory
            })?;

        Ok(Arc::new(FrameInfo::new(self.clone())))
    }

    pub(super) fn frame_freed(&self) {
        self.0.frames.fetch_sub(1, Ordering::AcqRel);
    }

    pub(super) fn pin_acquired(&self) {
        self.0.pinned.fetch_add(1, Ordering::AcqRel);
    }

    pub(super) fn pin_released(&self) {
        self.0.pinned.fetch_sub(1, Ordering::AcqRel);
    }

    pub(super) fn map_frame<'a>(
        &self,
        frame: &'a FrameInfo,
        access: Access,
    ) -> Result<FrameMapping<'a>, MapError> {
        if self.0.fail_next_map.swap(false, Ordering::AcqRel) {
            log::debug!("injected {access:?} mapping failure");
            return Err(MapError);
        }

        self.0.mappings.fetch_add(1, Ordering::AcqRel);
        Ok(FrameMapping::new(frame))
    }

    pub(super) fn unmap_frame(&self) {
        self.0.mappings.fetch_sub(1, Ordering::AcqRel);
    }
}
