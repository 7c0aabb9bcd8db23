mod common;

use std::collections::BTreeSet;

use kcopy::{Region, Segment, execute};
use proptest::prelude::*;

use crate::common::{BUF, Fixture, PAGE, pattern};

/// The scratch buffer is split into a source half and a destination half.
const HALF: usize = 8 * PAGE;

/// Number of chunks a copy has to be split into: one more than the number of distinct page
/// boundaries either side crosses.
fn expected_chunks(dst_offset: usize, src_offset: usize, len: usize) -> usize {
    let boundaries = |offset: usize| {
        let first = PAGE - offset % PAGE;
        (0..)
            .map(move |i| first + i * PAGE)
            .take_while(move |&at| at < len)
    };

    let cuts: BTreeSet<usize> = boundaries(dst_offset)
        .chain(boundaries(src_offset))
        .collect();

    cuts.len() + 1
}

proptest! {
    #[test]
    fn copy_is_exact_and_bounded(
        src_offset in 0..2 * PAGE,
        dst_offset in 0..2 * PAGE,
        len in 1..4 * PAGE,
        seed in any::<u8>(),
    ) {
        let fx = Fixture::new();

        let data = pattern(len, seed);
        let src = BUF.add(src_offset);
        let dst = BUF.add(HALF + dst_offset);
        fx.aspace.write_bytes(src, &data).unwrap();

        let mut expected = fx.buf();
        expected[HALF + dst_offset..HALF + dst_offset + len].copy_from_slice(&data);

        let stats = execute(&[Segment::new(
            Region::new(&fx.aspace, dst, len),
            Region::new(&fx.aspace, src, len),
            len,
        )])
        .unwrap();

        prop_assert_eq!(stats.bytes, len);
        prop_assert_eq!(stats.chunks, expected_chunks(dst_offset, src_offset, len));
        prop_assert!(fx.buf() == expected);
        prop_assert_eq!(fx.machine.pinned_frames(), 0);
        prop_assert_eq!(fx.machine.active_mappings(), 0);
    }

    #[test]
    fn only_segment_len_bytes_are_copied(
        region_len in 1..3 * PAGE,
        len in 1..3 * PAGE,
    ) {
        prop_assume!(len <= region_len);

        let fx = Fixture::new();
        let data = pattern(region_len, 0x5a);
        fx.aspace.write_bytes(BUF, &data).unwrap();

        let mut expected = fx.buf();
        expected[HALF..HALF + len].copy_from_slice(&data[..len]);

        // both regions are larger than the segment, only the first `len` bytes are touched
        execute(&[Segment::new(
            Region::new(&fx.aspace, BUF.add(HALF), region_len),
            Region::new(&fx.aspace, BUF, region_len),
            len,
        )])
        .unwrap();

        prop_assert!(fx.buf() == expected);
    }
}

#[test]
fn expected_chunks_model() {
    assert_eq!(expected_chunks(0, 0, PAGE), 1);
    assert_eq!(expected_chunks(0, 0, PAGE + 1), 2);
    assert_eq!(expected_chunks(10, 0, 2 * PAGE - 20), 3);
    assert_eq!(expected_chunks(PAGE + 10, 0, 2 * PAGE - 20), 3);
    assert_eq!(expected_chunks(PAGE - 1, PAGE - 1, 2), 2);
}
