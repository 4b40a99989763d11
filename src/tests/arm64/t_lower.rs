use super::lower_function;
use crate::config::Config;
use crate::exec::context::ExitCode;
use crate::ssa::builder::FunctionBuilder;
use crate::ssa::ir::*;
use crate::ssa::layout::layout_blocks;
use crate::ssa::types::Type;
use crate::targets::arm64::inst::*;

fn lower(func: &Function, sigs: &[Signature]) -> VCode {
    let order = layout_blocks(func);
    lower_function(func, &order, sigs, &Config::default()).unwrap()
}

fn add_sub_func() -> Function {
    // fn(a, b) { (a + b) - a }
    let mut builder = FunctionBuilder::new(
        "add_sub",
        0,
        Signature {
            params: vec![Type::I32, Type::I32],
            results: vec![Type::I32],
        },
    );
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let a = builder.add_block_param(entry, Type::I32);
    let b = builder.add_block_param(entry, Type::I32);
    let sum = builder.append1(
        InstKind::Binary {
            op: BinaryOp::Add,
            lhs: a,
            rhs: b,
        },
        Type::I32,
    );
    let result = builder.append1(
        InstKind::Binary {
            op: BinaryOp::Sub,
            lhs: sum,
            rhs: a,
        },
        Type::I32,
    );
    builder.terminate(Terminator::Return {
        values: vec![result],
    });
    builder.finish()
}

fn count_matching(vcode: &VCode, matcher: impl Fn(&Inst) -> bool) -> usize {
    vcode
        .order()
        .into_iter()
        .filter(|id| matcher(vcode.inst(*id)))
        .count()
}

#[test]
fn test_lower_add_sub_shape() {
    let func = add_sub_func();
    let vcode = lower(&func, &[]);
    assert_eq!(
        count_matching(&vcode, |inst| matches!(
            inst,
            Inst::AluRRR { op: AluOp::Add, .. } | Inst::AluRRR { op: AluOp::Sub, .. }
        )),
        2
    );
    // One frame placeholder, one branch to the shared epilogue.
    assert_eq!(count_matching(&vcode, |inst| matches!(inst, Inst::ReserveFrame)), 1);
    assert!(vcode.epilogue_label.is_some());
}

#[test]
fn test_constant_rhs_uses_immediate_form() {
    let mut builder = FunctionBuilder::new(
        "imm",
        0,
        Signature {
            params: vec![Type::I32],
            results: vec![Type::I32],
        },
    );
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let x = builder.add_block_param(entry, Type::I32);
    let k = builder.iconst(Type::I32, 100);
    let sum = builder.append1(
        InstKind::Binary {
            op: BinaryOp::Add,
            lhs: x,
            rhs: k,
        },
        Type::I32,
    );
    builder.terminate(Terminator::Return { values: vec![sum] });
    let func = builder.finish();

    let vcode = lower(&func, &[]);
    assert_eq!(
        count_matching(&vcode, |inst| matches!(
            inst,
            Inst::AluRRImm12 { op: AluOp::Add, imm12: 100, .. }
        )),
        1
    );
}

#[test]
fn test_logical_constant_uses_bitmask_form() {
    let mut builder = FunctionBuilder::new(
        "mask",
        0,
        Signature {
            params: vec![Type::I64],
            results: vec![Type::I64],
        },
    );
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let x = builder.add_block_param(entry, Type::I64);
    let mask = builder.iconst(Type::I64, 0xFF);
    let masked = builder.append1(
        InstKind::Binary {
            op: BinaryOp::And,
            lhs: x,
            rhs: mask,
        },
        Type::I64,
    );
    builder.terminate(Terminator::Return {
        values: vec![masked],
    });
    let func = builder.finish();

    let vcode = lower(&func, &[]);
    assert_eq!(
        count_matching(&vcode, |inst| matches!(
            inst,
            Inst::AluRRImmLogic { op: AluOp::And, .. }
        )),
        1
    );
}

#[test]
fn test_exit_if_true_emits_shared_exit_sequence() {
    let mut builder = FunctionBuilder::new(
        "trapping",
        0,
        Signature {
            params: vec![Type::I32],
            results: vec![],
        },
    );
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let cond = builder.add_block_param(entry, Type::I32);
    builder.append(
        InstKind::ExitIfTrue {
            cond,
            code: ExitCode::IntegerDivByZero,
        },
        &[],
    );
    builder.append(
        InstKind::ExitIfTrue {
            cond,
            code: ExitCode::IntegerDivByZero,
        },
        &[],
    );
    builder.terminate(Terminator::Return { values: vec![] });
    let func = builder.finish();

    let vcode = lower(&func, &[]);
    // Two conditional branches, one shared exit sequence for the code.
    assert_eq!(
        count_matching(&vcode, |inst| matches!(inst, Inst::CondBr { .. })),
        2
    );
    assert_eq!(
        count_matching(&vcode, |inst| matches!(
            inst,
            Inst::ExitSequence { code: ExitCode::IntegerDivByZero }
        )),
        1
    );
}

#[test]
fn test_call_marshals_args_into_abi_registers() {
    let callee_sig = Signature {
        params: vec![Type::I32, Type::I32],
        results: vec![Type::I32],
    };
    let mut builder = FunctionBuilder::new(
        "caller",
        1,
        Signature {
            params: vec![Type::I32],
            results: vec![Type::I32],
        },
    );
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let x = builder.add_block_param(entry, Type::I32);
    let results = builder.append(
        InstKind::Call {
            func: 0,
            sig: 0,
            args: vec![x, x],
        },
        &[Type::I32],
    );
    builder.terminate(Terminator::Return {
        values: vec![results[0]],
    });
    let func = builder.finish();

    let vcode = lower(&func, &[callee_sig]);
    assert_eq!(
        count_matching(&vcode, |inst| matches!(inst, Inst::Call { func: 0 })),
        1
    );
    // x2 and x3 are fixed over the argument setup.
    assert!(vcode.fixed_ranges.len() >= 2);
}

#[test]
fn test_brif_prefers_fallthrough() {
    // brif with the then-side laid out next: the branch inverts.
    let mut builder = FunctionBuilder::new(
        "invert",
        0,
        Signature {
            params: vec![Type::I32],
            results: vec![],
        },
    );
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let cond = builder.add_block_param(entry, Type::I32);
    let then_block = builder.create_block();
    let else_block = builder.create_block();
    builder.terminate(Terminator::BrIf {
        cond,
        then_dst: BranchTarget {
            block: then_block,
            args: vec![],
        },
        else_dst: BranchTarget {
            block: else_block,
            args: vec![],
        },
    });
    builder.seal_block(then_block);
    builder.seal_block(else_block);
    builder.switch_to_block(then_block);
    builder.terminate(Terminator::Return { values: vec![] });
    builder.switch_to_block(else_block);
    builder.terminate(Terminator::Return { values: vec![] });
    let func = builder.finish();

    let vcode = lower(&func, &[]);
    // The conditional branch tests for zero (inverted) and targets the
    // else block, letting the then block fall through.
    assert_eq!(
        count_matching(&vcode, |inst| matches!(
            inst,
            Inst::CondBr { kind: CondBrKind::Zero(..), .. }
        )),
        1
    );
}
