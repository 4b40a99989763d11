use super::RemoveUnreachable;
use crate::ssa::builder::FunctionBuilder;
use crate::ssa::ir::*;
use crate::ssa::opt::Pass;
use crate::ssa::types::Type;

#[test]
fn test_removes_and_renumbers_unreachable_blocks() {
    let mut builder = FunctionBuilder::new(
        "cleanup",
        0,
        Signature {
            params: vec![],
            results: vec![],
        },
    );
    let entry = builder.create_block();
    let dead = builder.create_block();
    let tail = builder.create_block();

    builder.switch_to_block(entry);
    builder.seal_block(entry);
    builder.terminate(Terminator::Jump(BranchTarget {
        block: tail,
        args: vec![],
    }));

    builder.switch_to_block(dead);
    builder.seal_block(dead);
    builder.terminate(Terminator::Return { values: vec![] });

    builder.seal_block(tail);
    builder.switch_to_block(tail);
    builder.terminate(Terminator::Return { values: vec![] });

    let mut func = builder.finish();
    assert!(RemoveUnreachable.run(&mut func));
    assert_eq!(func.blocks.len(), 2);
    assert_eq!(func.blocks[0].id, BlockId(0));
    assert_eq!(func.blocks[1].id, BlockId(1));
    // The edge from entry was retargeted to the renumbered tail.
    let Terminator::Jump(target) = &func.blocks[0].term else {
        panic!("expected jump");
    };
    assert_eq!(target.block, BlockId(1));
}

#[test]
fn test_no_change_when_fully_reachable() {
    let mut builder = FunctionBuilder::new(
        "live",
        0,
        Signature {
            params: vec![],
            results: vec![],
        },
    );
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    builder.terminate(Terminator::Return { values: vec![] });
    let mut func = builder.finish();
    assert!(!RemoveUnreachable.run(&mut func));
}
