// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::{cmp, fmt};

use lock_api::RwLock;

use crate::emulate::frame::{FrameInfo, PinnedFrame};
use crate::emulate::Machine;
use crate::kconfig::PAGE_SIZE;
use crate::{Access, AddressSpace, PinError, VirtualAddress};

bitflags::bitflags! {
    /// Permissions of an emulated mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

impl PageFlags {
    fn allows(self, access: Access) -> bool {
        match access {
            Access::Read => self.contains(PageFlags::READ),
            Access::Write => self.contains(PageFlags::WRITE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulateError {
    /// The address is not page aligned.
    Misaligned(VirtualAddress),
    /// The page at the address is already mapped.
    AlreadyMapped(VirtualAddress),
    /// No mapping covers the address.
    NotMapped(VirtualAddress),
    /// The machine ran out of frames.
    OutOfMemory,
}

impl fmt::Display for EmulateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulateError::Misaligned(addr) => write!(f, "address {addr} is not page aligned"),
            EmulateError::AlreadyMapped(addr) => write!(f, "page {addr} is already mapped"),
            EmulateError::NotMapped(addr) => write!(f, "address {addr} is not mapped"),
            EmulateError::OutOfMemory => f.write_str("out of memory"),
        }
    }
}

impl core::error::Error for EmulateError {}

struct Entry {
    flags: PageFlags,
    frame: OnceLock<Arc<FrameInfo>>,
}

/// The page table of an [`EmulatedAddressSpace`], keyed by virtual page number.
///
/// Pages are backed lazily: an entry only receives a frame on first pin or access.
pub struct PageTable {
    entries: BTreeMap<usize, Entry>,
}

impl PageTable {
    fn entry(&self, addr: VirtualAddress) -> Option<&Entry> {
        self.entries.get(&addr.page_number(PAGE_SIZE))
    }

    /// Returns the frame backing `entry`, allocating one from `machine` if it has none yet.
    fn fault_in<'a>(
        machine: &Machine,
        entry: &'a Entry,
    ) -> Result<&'a Arc<FrameInfo>, PinError> {
        if let Some(frame) = entry.frame.get() {
            return Ok(frame);
        }

        let frame = machine.allocate_frame()?;
        // losing the race to another faulting thread just frees our frame again
        let _ = entry.frame.set(frame);

        entry.frame.get().ok_or(PinError::OutOfMemory)
    }

    /// Number of mapped pages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of mapped pages that are backed by a frame.
    pub fn resident(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.frame.get().is_some())
            .count()
    }
}

impl fmt::Debug for PageTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTable")
            .field("mapped", &self.len())
            .field("resident", &self.resident())
            .finish_non_exhaustive()
    }
}

/// An emulated user address space backed by frames of a [`Machine`].
pub struct EmulatedAddressSpace {
    machine: Machine,
    table: RwLock<parking_lot::RawRwLock, PageTable>,
}

impl fmt::Debug for EmulatedAddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatedAddressSpace")
            .field("machine", &self.machine)
            .field("table", &self.table)
            .finish()
    }
}

impl EmulatedAddressSpace {
    pub fn new(machine: &Machine) -> Self {
        Self {
            machine: machine.clone(),
            table: RwLock::new(PageTable {
                entries: BTreeMap::new(),
            }),
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Maps `len` bytes (rounded up to whole pages) starting at the page aligned `start`.
    ///
    /// The pages are not backed by frames until they are first pinned or accessed.
    ///
    /// # Errors
    ///
    /// Returns an error if `start` is misaligned or any page of the range is already mapped, in
    /// which case nothing is mapped.
    pub fn map(
        &self,
        start: VirtualAddress,
        len: usize,
        flags: PageFlags,
    ) -> Result<(), EmulateError> {
        if !start.is_aligned_to(PAGE_SIZE) {
            return Err(EmulateError::Misaligned(start));
        }

        let mut table = self.table.write();
        let first = start.page_number(PAGE_SIZE);
        let pages = first..first + len.div_ceil(PAGE_SIZE);

        if let Some((&vpn, _)) = table.entries.range(pages.clone()).next() {
            return Err(EmulateError::AlreadyMapped(VirtualAddress::new(
                vpn * PAGE_SIZE,
            )));
        }

        for vpn in pages {
            table.entries.insert(
                vpn,
                Entry {
                    flags,
                    frame: OnceLock::new(),
                },
            );
        }

        log::trace!("mapped {start}..{} {flags:?}", start.add(len));
        Ok(())
    }

    /// Like [`map`][Self::map], but backs every page right away.
    ///
    /// # Errors
    ///
    /// Returns an error if mapping fails or the machine runs out of frames.
    pub fn map_populated(
        &self,
        start: VirtualAddress,
        len: usize,
        flags: PageFlags,
    ) -> Result<(), EmulateError> {
        self.map(start, len, flags)?;

        let table = self.table.read();
        let first = start.page_number(PAGE_SIZE);
        for (_, entry) in table.entries.range(first..first + len.div_ceil(PAGE_SIZE)) {
            PageTable::fault_in(&self.machine, entry).map_err(|_| EmulateError::OutOfMemory)?;
        }

        Ok(())
    }

    /// Removes every mapping in `len` bytes starting at the page aligned `start`.
    ///
    /// Frames that are still pinned stay allocated until their last pin is released.
    ///
    /// # Errors
    ///
    /// Returns an error if `start` is misaligned.
    pub fn unmap(&self, start: VirtualAddress, len: usize) -> Result<(), EmulateError> {
        if !start.is_aligned_to(PAGE_SIZE) {
            return Err(EmulateError::Misaligned(start));
        }

        let mut table = self.table.write();
        let first = start.page_number(PAGE_SIZE);
        for vpn in first..first + len.div_ceil(PAGE_SIZE) {
            table.entries.remove(&vpn);
        }

        Ok(())
    }

    /// Writes `bytes` at `addr`, faulting pages in as needed.
    ///
    /// Page permissions are ignored, this is how tests set up source buffers in read-only mappings.
    ///
    /// # Errors
    ///
    /// Returns an error if part of the range is not mapped or the machine runs out of frames.
    pub fn write_bytes(&self, addr: VirtualAddress, bytes: &[u8]) -> Result<(), EmulateError> {
        let table = self.table.read();

        let mut written = 0;
        while written < bytes.len() {
            let at = addr.add(written);
            let entry = table.entry(at).ok_or(EmulateError::NotMapped(at))?;
            let frame = PageTable::fault_in(&self.machine, entry)
                .map_err(|_| EmulateError::OutOfMemory)?;

            let offset = at.page_offset(PAGE_SIZE);
            let n = cmp::min(PAGE_SIZE - offset, bytes.len() - written);
            frame.write(offset, &bytes[written..written + n]);
            written += n;
        }

        Ok(())
    }

    /// Fills `len` bytes at `addr` with `value`.
    ///
    /// # Errors
    ///
    /// See [`write_bytes`][Self::write_bytes].
    pub fn fill(&self, addr: VirtualAddress, value: u8, len: usize) -> Result<(), EmulateError> {
        self.write_bytes(addr, &vec![value; len])
    }

    /// Reads `len` bytes at `addr`. Pages that were never backed read as zeros.
    ///
    /// # Errors
    ///
    /// Returns an error if part of the range is not mapped.
    pub fn read_bytes(&self, addr: VirtualAddress, len: usize) -> Result<Vec<u8>, EmulateError> {
        let table = self.table.read();
        let mut buf = vec![0; len];

        let mut read = 0;
        while read < len {
            let at = addr.add(read);
            let entry = table.entry(at).ok_or(EmulateError::NotMapped(at))?;

            let offset = at.page_offset(PAGE_SIZE);
            let n = cmp::min(PAGE_SIZE - offset, len - read);
            if let Some(frame) = entry.frame.get() {
                frame.read(offset, &mut buf[read..read + n]);
            }
            read += n;
        }

        Ok(buf)
    }

    /// Total number of pins held on frames currently mapped in this address space.
    pub fn pinned_pages(&self) -> usize {
        self.table
            .read()
            .entries
            .values()
            .filter_map(|entry| entry.frame.get())
            .map(|frame| frame.pins())
            .sum()
    }

    /// Whether the page containing `addr` is dirty, `None` if it is unmapped or not backed.
    pub fn is_dirty(&self, addr: VirtualAddress) -> Option<bool> {
        let table = self.table.read();
        let frame = table.entry(addr)?.frame.get()?;
        Some(frame.is_dirty())
    }

    /// Whether the page containing `addr` is backed by a frame.
    pub fn is_resident(&self, addr: VirtualAddress) -> bool {
        self.table
            .read()
            .entry(addr)
            .is_some_and(|entry| entry.frame.get().is_some())
    }
}

// Safety: frames handed out by `pin_page` are the ones backing the page table entry and are kept
// alive by their `Arc` until the pin is dropped, mappings point at the frame's full `PAGE_SIZE`
// buffer.
unsafe impl AddressSpace for EmulatedAddressSpace {
    const PAGE_SIZE: usize = PAGE_SIZE;

    type Frame = PinnedFrame;
    type RawRwLock = parking_lot::RawRwLock;
    type PageTable = PageTable;

    fn page_table(&self) -> &RwLock<Self::RawRwLock, Self::PageTable> {
        &self.table
    }

    fn pin_page(
        &self,
        table: &PageTable,
        page: VirtualAddress,
        access: Access,
    ) -> Result<PinnedFrame, PinError> {
        debug_assert!(page.is_aligned_to(PAGE_SIZE));

        let entry = table.entry(page).ok_or(PinError::NotMapped)?;
        if !entry.flags.allows(access) {
            return Err(PinError::AccessDenied);
        }

        let frame = PageTable::fault_in(&self.machine, entry)?;
        Ok(PinnedFrame::pin(Arc::clone(frame)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: VirtualAddress = VirtualAddress::new(0x10_0000);

    #[test]
    fn map_is_lazy() {
        let machine = Machine::new();
        let aspace = EmulatedAddressSpace::new(&machine);

        aspace.map(BASE, 3 * PAGE_SIZE, PageFlags::READ).unwrap();
        assert_eq!(machine.frames_allocated(), 0);
        assert!(!aspace.is_resident(BASE));
        assert_eq!(aspace.is_dirty(BASE), None);

        // unbacked pages read as zeros and stay unbacked
        assert_eq!(aspace.read_bytes(BASE, 16).unwrap(), vec![0; 16]);
        assert_eq!(machine.frames_allocated(), 0);
    }

    #[test]
    fn map_rejects_overlap_and_misalignment() {
        let machine = Machine::new();
        let aspace = EmulatedAddressSpace::new(&machine);

        aspace.map(BASE, PAGE_SIZE, PageFlags::READ).unwrap();
        assert_eq!(
            aspace.map(BASE.add(1), PAGE_SIZE, PageFlags::READ),
            Err(EmulateError::Misaligned(BASE.add(1)))
        );
        assert_eq!(
            aspace.map(
                VirtualAddress::new(BASE.get() - PAGE_SIZE),
                2 * PAGE_SIZE,
                PageFlags::READ
            ),
            Err(EmulateError::AlreadyMapped(BASE))
        );
        // the failed map left nothing behind
        assert_eq!(aspace.page_table().read().len(), 1);
    }

    #[test]
    fn bytes_cross_page_boundaries() {
        let machine = Machine::new();
        let aspace = EmulatedAddressSpace::new(&machine);
        aspace.map(BASE, 2 * PAGE_SIZE, PageFlags::READ).unwrap();

        let at = BASE.add(PAGE_SIZE - 3);
        aspace.write_bytes(at, b"abcdef").unwrap();

        assert_eq!(aspace.read_bytes(at, 6).unwrap(), b"abcdef");
        assert_eq!(machine.frames_allocated(), 2);

        assert_eq!(
            aspace.write_bytes(BASE.add(2 * PAGE_SIZE - 1), b"xy"),
            Err(EmulateError::NotMapped(BASE.add(2 * PAGE_SIZE)))
        );
    }

    #[test]
    fn pin_page_checks_permissions() {
        let machine = Machine::new();
        let aspace = EmulatedAddressSpace::new(&machine);
        aspace.map(BASE, PAGE_SIZE, PageFlags::READ).unwrap();

        let table = aspace.page_table().read();
        assert_eq!(
            aspace
                .pin_page(&table, BASE, Access::Write)
                .map(|_| ())
                .unwrap_err(),
            PinError::AccessDenied
        );
        assert_eq!(
            aspace
                .pin_page(&table, BASE.add(PAGE_SIZE), Access::Read)
                .map(|_| ())
                .unwrap_err(),
            PinError::NotMapped
        );

        let frame = aspace.pin_page(&table, BASE, Access::Read).unwrap();
        drop(table);

        assert_eq!(aspace.pinned_pages(), 1);
        drop(frame);
        assert_eq!(aspace.pinned_pages(), 0);
    }

    #[test]
    fn fault_in_respects_frame_limit() {
        let machine = Machine::with_frame_limit(1);
        let aspace = EmulatedAddressSpace::new(&machine);
        aspace
            .map(BASE, 2 * PAGE_SIZE, PageFlags::READ | PageFlags::WRITE)
            .unwrap();

        let table = aspace.page_table().read();
        let _first = aspace.pin_page(&table, BASE, Access::Write).unwrap();
        assert_eq!(
            aspace
                .pin_page(&table, BASE.add(PAGE_SIZE), Access::Write)
                .map(|_| ())
                .unwrap_err(),
            PinError::OutOfMemory
        );
    }

    #[test]
    fn pinned_frame_outlives_unmap() {
        let machine = Machine::new();
        let aspace = EmulatedAddressSpace::new(&machine);
        aspace.map_populated(BASE, PAGE_SIZE, PageFlags::READ).unwrap();
        assert_eq!(machine.frames_allocated(), 1);

        let table = aspace.page_table().read();
        let frame = aspace.pin_page(&table, BASE, Access::Read).unwrap();
        drop(table);

        aspace.unmap(BASE, PAGE_SIZE).unwrap();
        assert_eq!(machine.frames_allocated(), 1);
        assert_eq!(frame.info().pins(), 1);

        drop(frame);
        assert_eq!(machine.frames_allocated(), 0);
    }
}
