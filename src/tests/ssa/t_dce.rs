use super::DeadValueElim;
use crate::ssa::builder::FunctionBuilder;
use crate::ssa::ir::*;
use crate::ssa::opt::Pass;
use crate::ssa::types::Type;

#[test]
fn test_removes_unused_constant() {
    let mut builder = FunctionBuilder::new(
        "dead_const",
        0,
        Signature {
            params: vec![],
            results: vec![Type::I32],
        },
    );
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let kept = builder.iconst(Type::I32, 1);
    let _dead = builder.iconst(Type::I32, 2);
    builder.terminate(Terminator::Return { values: vec![kept] });
    let mut func = builder.finish();

    assert!(DeadValueElim.run(&mut func));
    assert_eq!(func.blocks[0].insts.len(), 1);
    assert!(matches!(
        func.blocks[0].insts[0].kind,
        InstKind::Iconst { bits: 1 }
    ));
}

#[test]
fn test_keeps_side_effecting_instructions() {
    let mut builder = FunctionBuilder::new(
        "store",
        0,
        Signature {
            params: vec![Type::I64],
            results: vec![],
        },
    );
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let addr = builder.add_block_param(entry, Type::I64);
    let value = builder.iconst(Type::I64, 3);
    builder.append(
        InstKind::Store {
            addr,
            value,
            offset: 0,
            bytes: 8,
        },
        &[],
    );
    builder.terminate(Terminator::Return { values: vec![] });
    let mut func = builder.finish();

    // The constant feeds the store, the store has effects: nothing dies.
    assert!(!DeadValueElim.run(&mut func));
    assert_eq!(func.blocks[0].insts.len(), 2);
}

#[test]
fn test_transitively_dead_chain_removed() {
    let mut builder = FunctionBuilder::new(
        "chain",
        0,
        Signature {
            params: vec![],
            results: vec![],
        },
    );
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let a = builder.iconst(Type::I32, 1);
    let b = builder.iconst(Type::I32, 2);
    let _sum = builder.append1(
        InstKind::Binary {
            op: BinaryOp::Add,
            lhs: a,
            rhs: b,
        },
        Type::I32,
    );
    builder.terminate(Terminator::Return { values: vec![] });
    let mut func = builder.finish();

    assert!(DeadValueElim.run(&mut func));
    assert!(func.blocks[0].insts.is_empty());
}

#[test]
fn test_branch_args_stay_live_across_blocks() {
    let mut builder = FunctionBuilder::new(
        "edge_arg",
        0,
        Signature {
            params: vec![],
            results: vec![Type::I32],
        },
    );
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let value = builder.iconst(Type::I32, 5);

    let next = builder.create_block();
    let param = builder.add_block_param(next, Type::I32);
    builder.terminate(Terminator::Jump(BranchTarget {
        block: next,
        args: vec![value],
    }));
    builder.seal_block(next);
    builder.switch_to_block(next);
    builder.terminate(Terminator::Return {
        values: vec![param],
    });
    let mut func = builder.finish();

    assert!(!DeadValueElim.run(&mut func));
    assert_eq!(func.blocks[0].insts.len(), 1);
}
