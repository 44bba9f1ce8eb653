//! # Property Tests
//!
//! Synchronization and comparison laws checked over random states and addresses.

use difftest_core::compare::mismatches;
use difftest_core::{ArchState, Direction, GuestAddr, GuestMemory, MismatchKind, RefBackend, compare};
use proptest::prelude::*;

use crate::common::toy::{TOY_BASE, TOY_MEM, ToyIsa, ToyReference};

fn started_reference() -> ToyReference {
    let mut reference = ToyReference::default();
    reference.init(1234).unwrap();
    reference
}

fn toy_state() -> impl Strategy<Value = ArchState<ToyIsa>> {
    (any::<[u32; 2]>(), any::<u32>())
        .prop_map(|(regs, pc)| ArchState::from_parts(regs.to_vec(), pc).unwrap())
}

proptest! {
    #[test]
    fn prop_regcpy_to_ref_then_back_is_identity(state in toy_state()) {
        let mut reference = started_reference();
        let mut pushed = state.clone();
        reference.regcpy(&mut pushed, Direction::ToRef).unwrap();
        let mut pulled = ArchState::new();
        reference.regcpy(&mut pulled, Direction::ToDut).unwrap();
        prop_assert_eq!(pulled, state);
    }

    #[test]
    fn prop_memcpy_round_trips_inside_window(
        offset in 0..(TOY_MEM as u64 - 256),
        data in prop::collection::vec(any::<u8>(), 1..256),
    ) {
        let mut reference = started_reference();
        let addr = GuestAddr(TOY_BASE + offset);
        let mut outbound = data.clone();
        reference.memcpy(addr, &mut outbound, Direction::ToRef).unwrap();
        let mut back = vec![0u8; data.len()];
        reference.memcpy(addr, &mut back, Direction::ToDut).unwrap();
        prop_assert_eq!(back, data);
    }

    #[test]
    fn prop_memcpy_outside_window_is_rejected(offset in TOY_MEM as u64..(1u64 << 32), len in 1usize..64) {
        let mut reference = started_reference();
        let mut buf = vec![0u8; len];
        let err = reference
            .memcpy(GuestAddr(TOY_BASE + offset), &mut buf, Direction::ToDut)
            .unwrap_err();
        prop_assert!(err.is_contract_violation());
    }

    #[test]
    fn prop_dirty_ranges_cover_every_write(
        offset in 0..(TOY_MEM as u64 - 512),
        len in 1usize..512,
    ) {
        let mut memory = GuestMemory::new(GuestAddr(TOY_BASE), TOY_MEM).unwrap();
        let addr = GuestAddr(TOY_BASE + offset);
        memory.write(addr, &vec![0xa5; len]).unwrap();
        let dirty = memory.take_dirty();
        prop_assert!(dirty.iter().any(|range| range.contains(addr, len)));
        prop_assert!(memory.take_dirty().is_empty());
    }

    #[test]
    fn prop_state_equals_itself(state in toy_state()) {
        prop_assert!(compare(&state, &state).is_ok());
        prop_assert_eq!(mismatches(&state, &state).count(), 0);
    }

    #[test]
    fn prop_single_difference_is_named(
        reference in toy_state(),
        slot in 0usize..3,
        delta in 1u32..,
    ) {
        let mut dut = reference.clone();
        let expected_kind = if slot < 2 {
            dut.write(slot, reference.read(slot).wrapping_add(delta));
            MismatchKind::Register(slot)
        } else {
            dut.set_pc(reference.pc().wrapping_add(delta));
            MismatchKind::ProgramCounter
        };

        let report = compare(&dut, &reference).unwrap_err();
        prop_assert_eq!(report.kind, expected_kind);
        let ref_value = if slot < 2 { reference.read(slot) } else { reference.pc() };
        prop_assert_eq!(report.expected, u64::from(ref_value));
        prop_assert_eq!(compare(&dut, &reference).unwrap_err(), report);
        prop_assert_eq!(mismatches(&dut, &reference).count(), 1);
    }

    #[test]
    fn prop_ended_reference_rejects_every_exec(ran in 1u64..64, n in 0u64..10_000) {
        let mut reference = started_reference();
        reference.end_after = Some(ran);
        reference.exec(ran).unwrap();
        let err = reference.exec(n).unwrap_err();
        prop_assert!(err.is_reference_ended());
        prop_assert_eq!(reference.machine.executed, ran);
    }
}
