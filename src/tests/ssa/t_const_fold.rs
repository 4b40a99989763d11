use super::ConstFold;
use crate::ssa::builder::FunctionBuilder;
use crate::ssa::ir::*;
use crate::ssa::opt::Pass;
use crate::ssa::types::Type;

fn single_block(results: Vec<Type>) -> FunctionBuilder {
    let mut builder = FunctionBuilder::new(
        "fold",
        0,
        Signature {
            params: vec![],
            results,
        },
    );
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    builder
}

#[test]
fn test_folds_constant_add() {
    let mut builder = single_block(vec![Type::I32]);
    let a = builder.iconst(Type::I32, 40);
    let b = builder.iconst(Type::I32, 2);
    let sum = builder.append1(
        InstKind::Binary {
            op: BinaryOp::Add,
            lhs: a,
            rhs: b,
        },
        Type::I32,
    );
    builder.terminate(Terminator::Return { values: vec![sum] });
    let mut func = builder.finish();

    assert!(ConstFold.run(&mut func));
    let folded = func.blocks[0]
        .insts
        .iter()
        .find(|inst| inst.results.first().map(|def| def.id) == Some(sum))
        .unwrap();
    assert!(matches!(folded.kind, InstKind::Iconst { bits: 42 }));
}

#[test]
fn test_wrapping_i32_add() {
    let mut builder = single_block(vec![Type::I32]);
    let a = builder.iconst(Type::I32, 0xFFFF_FFFF);
    let b = builder.iconst(Type::I32, 2);
    let sum = builder.append1(
        InstKind::Binary {
            op: BinaryOp::Add,
            lhs: a,
            rhs: b,
        },
        Type::I32,
    );
    builder.terminate(Terminator::Return { values: vec![sum] });
    let mut func = builder.finish();

    ConstFold.run(&mut func);
    let folded = func.blocks[0]
        .insts
        .iter()
        .find(|inst| inst.results.first().map(|def| def.id) == Some(sum))
        .unwrap();
    assert!(matches!(folded.kind, InstKind::Iconst { bits: 1 }));
}

#[test]
fn test_add_zero_identity_forwards_operand() {
    let mut builder = FunctionBuilder::new(
        "identity",
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
    let zero = builder.iconst(Type::I32, 0);
    let sum = builder.append1(
        InstKind::Binary {
            op: BinaryOp::Add,
            lhs: x,
            rhs: zero,
        },
        Type::I32,
    );
    builder.terminate(Terminator::Return { values: vec![sum] });
    let mut func = builder.finish();

    assert!(ConstFold.run(&mut func));
    // The return now uses x directly.
    let Terminator::Return { values } = &func.blocks[0].term else {
        panic!("expected return");
    };
    assert_eq!(values, &vec![x]);
}

#[test]
fn test_mul_one_identity() {
    let mut builder = FunctionBuilder::new(
        "mul_one",
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
    let one = builder.iconst(Type::I64, 1);
    let product = builder.append1(
        InstKind::Binary {
            op: BinaryOp::Mul,
            lhs: x,
            rhs: one,
        },
        Type::I64,
    );
    builder.terminate(Terminator::Return {
        values: vec![product],
    });
    let mut func = builder.finish();

    assert!(ConstFold.run(&mut func));
    let Terminator::Return { values } = &func.blocks[0].term else {
        panic!("expected return");
    };
    assert_eq!(values, &vec![x]);
}

#[test]
fn test_constant_brif_collapses_to_jump() {
    let mut builder = single_block(vec![]);
    let cond = builder.iconst(Type::I32, 1);
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
    for block in [then_block, else_block] {
        builder.switch_to_block(block);
        builder.terminate(Terminator::Return { values: vec![] });
    }
    let mut func = builder.finish();

    assert!(ConstFold.run(&mut func));
    let Terminator::Jump(target) = &func.blocks[0].term else {
        panic!("expected jump after folding");
    };
    assert_eq!(target.block, then_block);
}

#[test]
fn test_constant_comparison_folds() {
    let mut builder = single_block(vec![Type::I32]);
    let a = builder.iconst(Type::I32, 3);
    let b = builder.iconst(Type::I32, 7);
    let cmp = builder.append1(
        InstKind::IntCmp {
            cond: IntCC::LtU,
            lhs: a,
            rhs: b,
        },
        Type::I32,
    );
    builder.terminate(Terminator::Return { values: vec![cmp] });
    let mut func = builder.finish();

    assert!(ConstFold.run(&mut func));
    let folded = func.blocks[0]
        .insts
        .iter()
        .find(|inst| inst.results.first().map(|def| def.id) == Some(cmp))
        .unwrap();
    assert!(matches!(folded.kind, InstKind::Iconst { bits: 1 }));
}

#[test]
fn test_division_is_not_folded() {
    // The div-by-zero guards precede the op; folding would orphan them.
    let mut builder = single_block(vec![Type::I32]);
    let a = builder.iconst(Type::I32, 10);
    let b = builder.iconst(Type::I32, 2);
    let quotient = builder.append1(
        InstKind::Binary {
            op: BinaryOp::DivU,
            lhs: a,
            rhs: b,
        },
        Type::I32,
    );
    builder.terminate(Terminator::Return {
        values: vec![quotient],
    });
    let mut func = builder.finish();

    ConstFold.run(&mut func);
    let kept = func.blocks[0]
        .insts
        .iter()
        .find(|inst| inst.results.first().map(|def| def.id) == Some(quotient))
        .unwrap();
    assert!(matches!(kept.kind, InstKind::Binary { .. }));
}
