//! # Guest Memory Tests
//!
//! Address translation bounds and page-granular dirty tracking.

use difftest_core::common::constants::PAGE_SIZE;
use difftest_core::memory::MemRange;
use difftest_core::{DifftestError, GuestAddr, GuestMemory};
use pretty_assertions::assert_eq;
use rstest::rstest;

const BASE: u64 = 0x8000_0000;

fn memory(pages: usize) -> GuestMemory {
    GuestMemory::new(GuestAddr(BASE), pages * PAGE_SIZE).unwrap()
}

#[test]
fn test_translate_is_offset_from_base() {
    let mem = memory(4);
    assert_eq!(mem.translate(GuestAddr(BASE + 0x10), 8).unwrap(), 0x10..0x18);
    assert_eq!(mem.window(), MemRange::new(GuestAddr(BASE), 4 * PAGE_SIZE));
}

#[rstest]
#[case::below_base(BASE - 1, 1)]
#[case::past_end(BASE + 4 * PAGE_SIZE as u64, 1)]
#[case::straddles_end(BASE + 4 * PAGE_SIZE as u64 - 2, 4)]
#[case::huge_length(BASE, usize::MAX)]
fn test_out_of_range_is_contract_violation(#[case] addr: u64, #[case] len: usize) {
    let mem = memory(4);
    let err = mem.translate(GuestAddr(addr), len).unwrap_err();
    assert!(err.is_contract_violation());
    assert!(matches!(err, DifftestError::OutOfRange { op: "translate", .. }));
    assert!(!mem.contains(GuestAddr(addr), len));
}

#[test]
fn test_write_then_read_back() {
    let mut mem = memory(2);
    mem.write(GuestAddr(BASE + 0x20), &[1, 2, 3, 4]).unwrap();
    let mut out = [0u8; 4];
    mem.read(GuestAddr(BASE + 0x20), &mut out).unwrap();
    assert_eq!(out, [1, 2, 3, 4]);
    assert_eq!(mem.guest_to_host(GuestAddr(BASE + 0x21), 2).unwrap(), &[2, 3]);
}

#[test]
fn test_failed_write_leaves_no_dirty_pages() {
    let mut mem = memory(2);
    assert!(mem.write(GuestAddr(BASE + 2 * PAGE_SIZE as u64 - 1), &[0; 2]).is_err());
    assert_eq!(mem.dirty_pages(), 0);
}

#[test]
fn test_dirty_pages_coalesce_into_ranges() {
    let mut mem = memory(8);
    mem.write(GuestAddr(BASE + 0x10), &[1]).unwrap();
    mem.write(GuestAddr(BASE + PAGE_SIZE as u64 + 5), &[1]).unwrap();
    mem.write(GuestAddr(BASE + 5 * PAGE_SIZE as u64), &[1]).unwrap();
    let _ = mem.guest_to_host_mut(GuestAddr(BASE + 7 * PAGE_SIZE as u64), 1).unwrap();

    assert_eq!(mem.dirty_pages(), 4);
    assert_eq!(
        mem.take_dirty(),
        vec![
            MemRange::new(GuestAddr(BASE), 2 * PAGE_SIZE),
            MemRange::new(GuestAddr(BASE + 5 * PAGE_SIZE as u64), PAGE_SIZE),
            MemRange::new(GuestAddr(BASE + 7 * PAGE_SIZE as u64), PAGE_SIZE),
        ]
    );
    assert!(mem.take_dirty().is_empty());
}

#[test]
fn test_partial_last_page_is_clipped() {
    let mut mem = GuestMemory::new(GuestAddr(BASE), PAGE_SIZE + 16).unwrap();
    mem.write(GuestAddr(BASE + PAGE_SIZE as u64 + 8), &[0xaa; 8]).unwrap();
    assert_eq!(
        mem.take_dirty(),
        vec![MemRange::new(GuestAddr(BASE + PAGE_SIZE as u64), 16)]
    );
}

#[test]
fn test_window_that_wraps_is_rejected() {
    let err = GuestMemory::new(GuestAddr(u64::MAX - 0xff), 0x1000).unwrap_err();
    assert!(matches!(err, DifftestError::Config(_)));
}
