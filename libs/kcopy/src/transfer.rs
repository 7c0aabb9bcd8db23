// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::{
    Access, AddressSpace, Config, Error, PinPool, Region, Result, SegmentError, copy, ensure, pin,
};

/// One `(destination, source, length)` triple of a scatter/gather transfer request.
///
/// Only the first `len` bytes of each region are touched, `len` must not exceed either region.
pub struct Segment<'a, A> {
    pub destination: Region<'a, A>,
    pub source: Region<'a, A>,
    pub len: usize,
}

impl<'a, A> Segment<'a, A> {
    pub const fn new(destination: Region<'a, A>, source: Region<'a, A>, len: usize) -> Self {
        Self {
            destination,
            source,
            len,
        }
    }
}

impl<A> fmt::Debug for Segment<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("destination", &self.destination)
            .field("source", &self.source)
            .field("len", &self.len)
            .finish()
    }
}

/// What a successful transfer did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    pub segments: usize,
    pub chunks: usize,
    pub bytes: usize,
}

/// Requests that a running transfer stops before its next segment.
#[derive(Debug, Default)]
pub struct CancelToken(AtomicBool);

impl CancelToken {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Executes transfer requests segment by segment.
#[derive(Debug, Default)]
pub struct Transfer<'c> {
    config: Config,
    cancel: Option<&'c CancelToken>,
}

impl<'c> Transfer<'c> {
    pub const fn new(config: Config) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Checks `token` before every segment.
    ///
    /// Cancellation is only observed between segments, a segment that already started always
    /// runs to completion or failure.
    #[must_use]
    pub const fn with_cancel_token<'t>(self, token: &'t CancelToken) -> Transfer<'t> {
        Transfer {
            config: self.config,
            cancel: Some(token),
        }
    }

    /// Copies every segment of `segments` in order.
    ///
    /// Each segment pins its destination (for writing) and source (for reading), copies
    /// `segment.len` bytes and releases all pins before the next segment starts. Pin storage is
    /// allocated once for the whole request and freed before returning.
    ///
    /// The request is **not** a transaction: when a segment fails, the segments before it are left
    /// as they are and the ones after it are never started.
    ///
    /// # Errors
    ///
    /// Returns the index of the first segment that failed together with the reason. An empty
    /// request is reported as [`Error::InvalidRegion`] at index 0.
    pub fn execute<A: AddressSpace>(
        &self,
        segments: &[Segment<'_, A>],
    ) -> Result<TransferStats, SegmentError> {
        if segments.is_empty() {
            return Err(SegmentError {
                index: 0,
                error: Error::InvalidRegion,
            });
        }

        let mut pool = PinPool::new(self.config.max_pages::<A>());
        let mut stats = TransferStats::default();

        for (index, segment) in segments.iter().enumerate() {
            if self.cancel.is_some_and(CancelToken::is_cancelled) {
                log::debug!("transfer cancelled before segment {index}");
                return Err(SegmentError {
                    index,
                    error: Error::Cancelled,
                });
            }

            log::debug!("segment {index}: {segment:?}");

            match run_segment(&mut pool, segment) {
                Ok(chunks) => {
                    stats.segments += 1;
                    stats.chunks += chunks;
                    stats.bytes += segment.len;
                }
                Err(error) => {
                    log::warn!("segment {index} failed: {error}");
                    return Err(SegmentError { index, error });
                }
            }
        }

        Ok(stats)
    }
}

/// Executes `segments` with the default [`Config`], see [`Transfer::execute`].
///
/// # Errors
///
/// Returns the index of the first segment that failed together with the reason.
pub fn execute<A: AddressSpace>(
    segments: &[Segment<'_, A>],
) -> Result<TransferStats, SegmentError> {
    Transfer::new(Config::default()).execute(segments)
}

fn run_segment<A: AddressSpace>(
    pool: &mut PinPool<A::Frame>,
    segment: &Segment<'_, A>,
) -> Result<usize> {
    ensure!(segment.len > 0, Error::InvalidRegion);

    let destination = segment.destination.prefix(segment.len)?;
    let source = segment.source.prefix(segment.len)?;

    // check both sides up front, so an over-budget source doesn't pin the destination first
    for region in [&destination, &source] {
        let layout = region.resolve()?;
        ensure!(
            layout.page_count <= pool.max_pages(),
            Error::ResourceLimitExceeded {
                pages: layout.page_count,
                max: pool.max_pages(),
            }
        );
    }

    let (dst_slot, src_slot) = pool.split();

    let mut dst = pin(&destination, Access::Write, dst_slot)?;
    // on failure `dst` is dropped here, releasing its pins
    let src = pin(&source, Access::Read, src_slot)?;

    let chunks = copy(&mut dst, &src, segment.len)?;

    dst.unpin();
    src.unpin();

    Ok(chunks)
}
