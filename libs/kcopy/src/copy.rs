// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::{cmp, ptr};

use crate::{Access, Error, Frame, PageMapping, PinSet, Result, ensure};

/// A byte range that can be copied in one step without crossing a page boundary on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Index of the source page within the source [`PinSet`].
    pub src_page: usize,
    pub src_offset: usize,
    /// Index of the destination page within the destination [`PinSet`].
    pub dst_page: usize,
    pub dst_offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    page: usize,
    offset: usize,
}

impl Cursor {
    fn advance(&mut self, len: usize, page_size: usize) {
        self.offset += len;
        debug_assert!(self.offset <= page_size);

        if self.offset == page_size {
            self.page += 1;
            self.offset = 0;
        }
    }
}

/// Iterator over the [`Chunk`]s a copy of `len` bytes decomposes into.
#[derive(Debug, Clone)]
pub struct Chunks {
    dst: Cursor,
    src: Cursor,
    remaining: usize,
    page_size: usize,
}

/// Plans the copy of `len` bytes from a source starting `src_offset` bytes into its first page to
/// a destination starting `dst_offset` bytes into its first page.
///
/// # Panics
///
/// Panics if either offset is not smaller than `page_size`.
pub fn chunks(dst_offset: usize, src_offset: usize, len: usize, page_size: usize) -> Chunks {
    assert!(dst_offset < page_size && src_offset < page_size);

    Chunks {
        dst: Cursor {
            page: 0,
            offset: dst_offset,
        },
        src: Cursor {
            page: 0,
            offset: src_offset,
        },
        remaining: len,
        page_size,
    }
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let len = cmp::min(
            self.remaining,
            cmp::min(
                self.page_size - self.dst.offset,
                self.page_size - self.src.offset,
            ),
        );

        let chunk = Chunk {
            src_page: self.src.page,
            src_offset: self.src.offset,
            dst_page: self.dst.page,
            dst_offset: self.dst.offset,
            len,
        };

        self.dst.advance(len, self.page_size);
        self.src.advance(len, self.page_size);
        self.remaining -= len;

        Some(chunk)
    }
}

/// Copies `len` bytes from the pinned pages of `src` into the pinned pages of `dst`, starting at
/// each set's first page offset. Returns the number of chunks the copy was split into.
///
/// Every destination page that receives bytes is marked as written, so it is marked dirty once
/// `dst` is released.
///
/// # Errors
///
/// Returns [`Error::CopyFault`] if a page could not be mapped or the sets are too small to hold
/// `len` bytes. Chunks copied before the fault stay copied.
pub fn copy<F: Frame>(dst: &mut PinSet<'_, F>, src: &PinSet<'_, F>, len: usize) -> Result<usize> {
    let page_size = dst.page_size();
    ensure!(src.page_size() == page_size, Error::CopyFault);

    let mut count = 0;
    for chunk in chunks(
        dst.first_page_offset(),
        src.first_page_offset(),
        len,
        page_size,
    ) {
        let Some(src_pin) = src.pages().get(chunk.src_page) else {
            log::error!("chunk {chunk:?} is outside of the pinned source pages");
            return Err(Error::CopyFault);
        };
        let Some(dst_pin) = dst.pages_mut().get_mut(chunk.dst_page) else {
            log::error!("chunk {chunk:?} is outside of the pinned destination pages");
            return Err(Error::CopyFault);
        };

        log::trace!(
            "copying chunk: src={}:{:#x}, dst={}:{:#x}, len={:#x}",
            chunk.src_page,
            chunk.src_offset,
            chunk.dst_page,
            chunk.dst_offset,
            chunk.len
        );

        {
            let dst_map = dst_pin.frame().map(Access::Write).map_err(|err| {
                log::error!("failed to map destination page {}: {err}", chunk.dst_page);
                Error::CopyFault
            })?;
            let src_map = src_pin.frame().map(Access::Read).map_err(|err| {
                log::error!("failed to map source page {}: {err}", chunk.src_page);
                Error::CopyFault
            })?;

            // Safety: the planner never produces chunks that cross a page boundary, so both ranges
            // lie within their page, and the `PageMapping` contract makes the mapping valid for
            // reads (source) and writes (destination) of a full page. Source and destination may
            // be the same physical page, so this uses an overlapping copy.
            unsafe {
                ptr::copy(
                    src_map.as_ptr().as_ptr().add(chunk.src_offset),
                    dst_map.as_ptr().as_ptr().add(chunk.dst_offset),
                    chunk.len,
                );
            }
        }

        dst_pin.mark_written();
        count += 1;
    }

    Ok(count)
}
