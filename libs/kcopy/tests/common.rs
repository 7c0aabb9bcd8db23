#![allow(unused, reason = "not used by all tests")]

use kcopy::{AddressSpace, VirtualAddress};
use kcopy::emulate::{EmulatedAddressSpace, Machine, PageFlags};

pub const PAGE: usize = kcopy::kconfig::PAGE_SIZE;

/// Base of the scratch buffer every [`Fixture`] maps.
pub const BUF: VirtualAddress = VirtualAddress::new(0x40_0000);

/// Pages of the scratch buffer.
pub const BUF_PAGES: usize = 16;

/// Value the scratch buffer is filled with before each test so stray writes show up.
pub const GUARD: u8 = 0xa5;

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i % 251).unwrap() ^ seed)
        .collect()
}

/// A machine with one address space whose scratch buffer is mapped read/write and filled with
/// [`GUARD`].
pub struct Fixture {
    pub machine: Machine,
    pub aspace: EmulatedAddressSpace,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_machine(Machine::new())
    }

    pub fn with_machine(machine: Machine) -> Self {
        let aspace = EmulatedAddressSpace::new(&machine);
        aspace
            .map(BUF, BUF_PAGES * PAGE, PageFlags::READ | PageFlags::WRITE)
            .unwrap();
        aspace.fill(BUF, GUARD, BUF_PAGES * PAGE).unwrap();

        Self { machine, aspace }
    }

    pub fn buf(&self) -> Vec<u8> {
        self.aspace.read_bytes(BUF, BUF_PAGES * PAGE).unwrap()
    }

    /// Asserts that no pins or temporary mappings are left behind.
    pub fn assert_released(&self) {
        assert_eq!(self.machine.pinned_frames(), 0, "pins leaked");
        assert_eq!(self.machine.active_mappings(), 0, "mappings leaked");
        assert!(
            self.aspace.page_table().try_write().is_some(),
            "page table lock still held"
        );
    }
}
