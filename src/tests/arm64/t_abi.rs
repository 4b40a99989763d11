use super::{AbiLoc, buffer_slots, build_entry_preamble, build_host_stub, compute_abi};
use crate::ssa::ir::Signature;
use crate::ssa::types::Type;
use crate::targets::arm64::inst::Inst;
use crate::targets::arm64::regs::{vreg_phys, xreg};

fn sig(params: &[Type], results: &[Type]) -> Signature {
    Signature {
        params: params.to_vec(),
        results: results.to_vec(),
    }
}

#[test]
fn test_int_args_fill_x2_through_x7_then_stack() {
    let abi = compute_abi(&sig(&[Type::I32; 8], &[]));
    for (idx, (_, loc)) in abi.args.iter().take(6).enumerate() {
        assert_eq!(*loc, AbiLoc::Reg(xreg(2 + idx as u8)));
    }
    assert_eq!(abi.args[6].1, AbiLoc::Stack { offset: 0 });
    assert_eq!(abi.args[7].1, AbiLoc::Stack { offset: 8 });
    assert_eq!(abi.arg_stack_bytes, 16);
    assert_eq!(abi.ret_stack_bytes, 0);
}

#[test]
fn test_float_args_fill_v0_through_v7() {
    let abi = compute_abi(&sig(&[Type::F64; 9], &[]));
    for (idx, (_, loc)) in abi.args.iter().take(8).enumerate() {
        assert_eq!(*loc, AbiLoc::Reg(vreg_phys(idx as u8)));
    }
    assert_eq!(abi.args[8].1, AbiLoc::Stack { offset: 0 });
}

#[test]
fn test_int_and_float_counters_are_independent() {
    let abi = compute_abi(&sig(&[Type::I32, Type::F32, Type::I64, Type::F64], &[]));
    assert_eq!(abi.args[0].1, AbiLoc::Reg(xreg(2)));
    assert_eq!(abi.args[1].1, AbiLoc::Reg(vreg_phys(0)));
    assert_eq!(abi.args[2].1, AbiLoc::Reg(xreg(3)));
    assert_eq!(abi.args[3].1, AbiLoc::Reg(vreg_phys(1)));
}

#[test]
fn test_results_mirror_argument_rule() {
    let abi = compute_abi(&sig(&[], &[Type::I32; 7]));
    for (idx, (_, loc)) in abi.results.iter().take(6).enumerate() {
        assert_eq!(*loc, AbiLoc::Reg(xreg(2 + idx as u8)));
    }
    assert_eq!(abi.results[6].1, AbiLoc::Stack { offset: 0 });
    assert_eq!(abi.ret_stack_bytes, 16);
}

#[test]
fn test_v128_stack_slots_are_16_aligned() {
    // Ten vector args: eight in registers, two on the stack.
    let abi = compute_abi(&sig(&[Type::V128; 10], &[]));
    assert_eq!(abi.args[8].1, AbiLoc::Stack { offset: 0 });
    assert_eq!(abi.args[9].1, AbiLoc::Stack { offset: 16 });
    assert_eq!(abi.arg_stack_bytes, 32);
}

#[test]
fn test_abi_assignment_is_idempotent() {
    let signature = sig(
        &[Type::I32, Type::F64, Type::V128, Type::I64, Type::I32],
        &[Type::I64, Type::F32],
    );
    assert_eq!(compute_abi(&signature), compute_abi(&signature));
}

#[test]
fn test_buffer_slots_account_for_v128() {
    let slots = buffer_slots(&[Type::I32, Type::V128, Type::I64]);
    assert_eq!(slots, vec![0, 1, 3]);
}

#[test]
fn test_entry_preamble_saves_and_restores_host_state() {
    let vcode = build_entry_preamble(&sig(&[Type::I32, Type::I32], &[Type::I32])).unwrap();
    let order = vcode.order();
    // First instruction saves the link register into the context; the last
    // is the return.
    assert!(matches!(vcode.inst(order[0]), Inst::Store { .. }));
    assert!(matches!(vcode.inst(*order.last().unwrap()), Inst::Ret));
    // Exactly one call to the function body.
    let calls = order
        .iter()
        .filter(|id| matches!(vcode.inst(**id), Inst::CallInd { .. }))
        .count();
    assert_eq!(calls, 1);
}

#[test]
fn test_host_stub_records_index_and_calls_dispatcher() {
    let vcode = build_host_stub(&sig(&[Type::I32], &[Type::I32]), 3).unwrap();
    let order = vcode.order();
    // The stub loads the dispatcher pointer and calls it once.
    let calls = order
        .iter()
        .filter(|id| matches!(vcode.inst(**id), Inst::CallInd { .. }))
        .count();
    assert_eq!(calls, 1);
    // The function index is materialized for the context store.
    let has_index = order.iter().any(|id| {
        matches!(
            vcode.inst(*id),
            Inst::MovWide { imm16: 3, shift: 0, .. }
        )
    });
    assert!(has_index);
    assert!(matches!(vcode.inst(*order.last().unwrap()), Inst::Ret));
}
