use super::SplitCriticalEdges;
use crate::ssa::builder::FunctionBuilder;
use crate::ssa::ir::*;
use crate::ssa::opt::Pass;
use crate::ssa::types::Type;

/// A conditional edge carrying an argument into a block that also has a
/// second predecessor: the classic critical edge.
fn critical_edge_func() -> (Function, BlockId, BlockId) {
    let mut builder = FunctionBuilder::new(
        "critical",
        0,
        Signature {
            params: vec![Type::I32],
            results: vec![Type::I32],
        },
    );
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let cond = builder.add_block_param(entry, Type::I32);

    let other = builder.create_block();
    let join = builder.create_block();
    let param = builder.add_block_param(join, Type::I32);

    let one = builder.iconst(Type::I32, 1);
    builder.terminate(Terminator::BrIf {
        cond,
        then_dst: BranchTarget {
            block: join,
            args: vec![one],
        },
        else_dst: BranchTarget {
            block: other,
            args: vec![],
        },
    });
    builder.seal_block(other);
    builder.switch_to_block(other);
    let two = builder.iconst(Type::I32, 2);
    builder.terminate(Terminator::Jump(BranchTarget {
        block: join,
        args: vec![two],
    }));
    builder.seal_block(join);
    builder.switch_to_block(join);
    builder.terminate(Terminator::Return {
        values: vec![param],
    });

    (builder.finish(), entry, join)
}

#[test]
fn test_splits_conditional_edge_with_args() {
    let (mut func, entry, join) = critical_edge_func();
    let before = func.blocks.len();
    assert!(SplitCriticalEdges.run(&mut func));
    assert_eq!(func.blocks.len(), before + 1);

    // The conditional edge now goes through a fresh block with no args.
    let Terminator::BrIf { then_dst, .. } = &func.blocks[entry.index()].term else {
        panic!("expected brif");
    };
    assert!(then_dst.args.is_empty());
    let edge_block = &func.blocks[then_dst.block.index()];
    let Terminator::Jump(hop) = &edge_block.term else {
        panic!("expected jump in edge block");
    };
    assert_eq!(hop.block, join);
    assert_eq!(hop.args.len(), 1);
}

#[test]
fn test_jump_edges_are_left_alone() {
    let mut builder = FunctionBuilder::new(
        "plain",
        0,
        Signature {
            params: vec![],
            results: vec![],
        },
    );
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let next = builder.create_block();
    builder.terminate(Terminator::Jump(BranchTarget {
        block: next,
        args: vec![],
    }));
    builder.seal_block(next);
    builder.switch_to_block(next);
    builder.terminate(Terminator::Return { values: vec![] });
    let mut func = builder.finish();
    assert!(!SplitCriticalEdges.run(&mut func));
}
