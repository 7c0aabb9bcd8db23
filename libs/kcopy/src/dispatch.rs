// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The `SEND` command interface.
//!
//! Callers hand the device a request of `count` [`IoVec`]s, all addresses of which live in the
//! caller's own address space. The device runs them through a [`Transfer`] and answers with `0`
//! on success or a negative errno describing the first failing segment.

use alloc::vec::Vec;
use core::mem;

use crate::error::errno;
use crate::{AddressSpace, Config, Region, Segment, Transfer, TransferStats, VirtualAddress};

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

#[expect(
    clippy::cast_possible_truncation,
    reason = "ioctl argument sizes always fit in 14 bits"
)]
const fn iowr(ty: u32, nr: u32, size: usize) -> u32 {
    ((IOC_READ | IOC_WRITE) << IOC_DIRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
        | (ty << IOC_TYPESHIFT)
        | (nr << IOC_NRSHIFT)
}

pub const IOCTL_BASE: u32 = 1;
pub const IOCTL_CMD_SEND: u32 = 1;

/// Command number of `SEND`, encoded like Linux' `_IOWR(IOCTL_BASE, IOCTL_CMD_SEND, struct req *)`.
pub const SEND: u32 = iowr(
    IOCTL_BASE,
    IOCTL_CMD_SEND,
    mem::size_of::<*const SendRequest<'static>>(),
);

/// One segment of a `SEND` request, as laid out by the caller.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVec {
    pub dst: VirtualAddress,
    pub src: VirtualAddress,
    pub len: usize,
}

/// A `SEND` request: `count` segments read from `iovs`.
#[derive(Debug, Clone, Copy)]
pub struct SendRequest<'a> {
    pub count: u32,
    pub iovs: &'a [IoVec],
}

impl<'a> SendRequest<'a> {
    pub fn new(iovs: &'a [IoVec]) -> Self {
        Self {
            count: u32::try_from(iovs.len()).unwrap_or(u32::MAX),
            iovs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Send,
}

impl TryFrom<u32> for Command {
    type Error = u32;

    fn try_from(cmd: u32) -> Result<Self, Self::Error> {
        match cmd {
            SEND => Ok(Command::Send),
            _ => Err(cmd),
        }
    }
}

/// The answer to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// `0` on success, a negative errno otherwise.
    pub code: i32,
    /// Index of the segment that failed, if the failure was caused by one.
    pub failed_segment: Option<usize>,
    pub stats: TransferStats,
}

impl Status {
    const fn invalid() -> Self {
        Self {
            code: -errno::EINVAL,
            failed_segment: None,
            stats: TransferStats {
                segments: 0,
                chunks: 0,
                bytes: 0,
            },
        }
    }

    pub const fn is_ok(&self) -> bool {
        self.code == 0
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> Self {
        status.code
    }
}

/// The command front end of the transfer engine.
#[derive(Debug, Default)]
pub struct Device {
    config: Config,
}

impl Device {
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Handles the command `cmd` issued by a caller running in `aspace`.
    pub fn ioctl<A: AddressSpace>(&self, aspace: &A, cmd: u32, req: SendRequest<'_>) -> Status {
        match Command::try_from(cmd) {
            Ok(Command::Send) => self.send(aspace, req),
            Err(cmd) => {
                log::error!("invalid ioctl: {cmd:#x}");
                Status::invalid()
            }
        }
    }

    /// Validates the shape of `req` and executes it against the caller's address space.
    pub fn send<A: AddressSpace>(&self, aspace: &A, req: SendRequest<'_>) -> Status {
        if req.count == 0 || req.count > self.config.max_segments() {
            log::error!(
                "invalid segment count {} (max {})",
                req.count,
                self.config.max_segments()
            );
            return Status::invalid();
        }

        let Some(iovs) = usize::try_from(req.count)
            .ok()
            .and_then(|count| req.iovs.get(..count))
        else {
            log::error!(
                "request claims {} segments but only carries {}",
                req.count,
                req.iovs.len()
            );
            return Status::invalid();
        };

        let segments: Vec<_> = iovs
            .iter()
            .map(|iov| {
                Segment::new(
                    Region::new(aspace, iov.dst, iov.len),
                    Region::new(aspace, iov.src, iov.len),
                    iov.len,
                )
            })
            .collect();

        match Transfer::new(self.config).execute(&segments) {
            Ok(stats) => Status {
                code: 0,
                failed_segment: None,
                stats,
            },
            Err(err) => {
                log::error!("SEND failed: {err}");
                Status {
                    code: err.errno(),
                    failed_segment: Some(err.index),
                    stats: TransferStats {
                        segments: err.index,
                        ..TransferStats::default()
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulate::{EmulatedAddressSpace, Machine, PageFlags};
    use crate::kconfig::PAGE_SIZE;

    #[test]
    fn send_command_number() {
        // _IOWR(1, 1, void *) on a 64-bit target
        #[cfg(target_pointer_width = "64")]
        assert_eq!(SEND, 0xc008_0101);
        assert_eq!(Command::try_from(SEND), Ok(Command::Send));
        assert_eq!(Command::try_from(0x1234), Err(0x1234));
    }

    #[test]
    fn unknown_command_is_invalid() {
        let machine = Machine::new();
        let aspace = EmulatedAddressSpace::new(&machine);

        let status = Device::default().ioctl(&aspace, 0xdead, SendRequest::new(&[]));
        assert_eq!(i32::from(status), -errno::EINVAL);
        assert_eq!(status.failed_segment, None);
    }

    #[test]
    fn segment_count_is_bounded() {
        let machine = Machine::new();
        let aspace = EmulatedAddressSpace::new(&machine);
        let device = Device::new(Config::new().with_max_segments(2));

        let iov = IoVec {
            dst: VirtualAddress::new(0x1000),
            src: VirtualAddress::new(0x2000),
            len: 1,
        };

        assert_eq!(
            device.ioctl(&aspace, SEND, SendRequest::new(&[])).code,
            -errno::EINVAL
        );
        assert_eq!(
            device
                .ioctl(&aspace, SEND, SendRequest::new(&[iov, iov, iov]))
                .code,
            -errno::EINVAL
        );
        assert_eq!(
            device
                .ioctl(
                    &aspace,
                    SEND,
                    SendRequest {
                        count: 2,
                        iovs: &[iov]
                    }
                )
                .code,
            -errno::EINVAL
        );
    }

    #[test_log::test]
    fn send_copies_within_caller_address_space() {
        let machine = Machine::new();
        let aspace = EmulatedAddressSpace::new(&machine);
        let buf = VirtualAddress::new(0x10_0000);
        aspace
            .map(buf, 8 * PAGE_SIZE, PageFlags::READ | PageFlags::WRITE)
            .unwrap();

        let src: Vec<u8> = (0..4 * PAGE_SIZE).map(|i| u8::try_from(i % 251).unwrap()).collect();
        aspace.write_bytes(buf, &src).unwrap();

        let dst = buf.add(4 * PAGE_SIZE + 20);
        let iov = IoVec {
            dst,
            src: buf,
            len: 4 * PAGE_SIZE - 20,
        };

        let status = Device::default().ioctl(&aspace, SEND, SendRequest::new(&[iov]));
        assert!(status.is_ok(), "{status:?}");
        assert_eq!(
            aspace.read_bytes(dst, 4 * PAGE_SIZE - 20).unwrap(),
            src[..4 * PAGE_SIZE - 20]
        );
    }

    #[test]
    fn failing_segment_reports_index_and_errno() {
        let machine = Machine::new();
        let aspace = EmulatedAddressSpace::new(&machine);
        let buf = VirtualAddress::new(0x10_0000);
        aspace
            .map(buf, 2 * PAGE_SIZE, PageFlags::READ | PageFlags::WRITE)
            .unwrap();

        let ok = IoVec {
            dst: buf,
            src: buf.add(PAGE_SIZE),
            len: 64,
        };
        let unmapped = IoVec {
            dst: buf,
            src: VirtualAddress::new(0x9000_0000),
            len: 64,
        };

        let status = Device::default().ioctl(&aspace, SEND, SendRequest::new(&[ok, unmapped, ok]));
        assert_eq!(status.code, -errno::EFAULT);
        assert_eq!(status.failed_segment, Some(1));
        assert_eq!(status.stats.segments, 1);
    }
}
