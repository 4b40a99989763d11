use super::Cfg;
use crate::ssa::builder::FunctionBuilder;
use crate::ssa::ir::*;
use crate::ssa::types::Type;

/// entry -> (then | else) -> join -> return
fn diamond() -> (Function, [BlockId; 4]) {
    let mut builder = FunctionBuilder::new(
        "diamond",
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
    let join = builder.create_block();

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
        builder.terminate(Terminator::Jump(BranchTarget {
            block: join,
            args: vec![],
        }));
    }
    builder.seal_block(join);
    builder.switch_to_block(join);
    builder.terminate(Terminator::Return { values: vec![] });

    (builder.finish(), [entry, then_block, else_block, join])
}

#[test]
fn test_preds_and_succs() {
    let (func, [entry, then_block, else_block, join]) = diamond();
    let cfg = Cfg::new(&func);
    assert_eq!(cfg.succs(entry), &[then_block, else_block]);
    assert_eq!(cfg.preds(join), &[then_block, else_block]);
    assert_eq!(cfg.preds(entry), &[] as &[BlockId]);
}

#[test]
fn test_rpo_visits_entry_first_join_last() {
    let (func, [entry, _, _, join]) = diamond();
    let cfg = Cfg::new(&func);
    let rpo = cfg.rpo();
    assert_eq!(rpo.len(), 4);
    assert_eq!(rpo[0], entry);
    assert_eq!(rpo[3], join);
}

#[test]
fn test_idoms_of_diamond() {
    let (func, [entry, then_block, else_block, join]) = diamond();
    let cfg = Cfg::new(&func);
    let idoms = cfg.idoms();
    assert_eq!(idoms[entry.index()], entry);
    assert_eq!(idoms[then_block.index()], entry);
    assert_eq!(idoms[else_block.index()], entry);
    // The join is dominated by the fork, not by either arm.
    assert_eq!(idoms[join.index()], entry);
}

#[test]
fn test_rpo_skips_unreachable_blocks() {
    let mut builder = FunctionBuilder::new(
        "dead",
        0,
        Signature {
            params: vec![],
            results: vec![],
        },
    );
    let entry = builder.create_block();
    let dead = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    builder.terminate(Terminator::Return { values: vec![] });
    builder.switch_to_block(dead);
    builder.seal_block(dead);
    builder.terminate(Terminator::Return { values: vec![] });

    let func = builder.finish();
    let cfg = Cfg::new(&func);
    assert_eq!(cfg.rpo(), vec![entry]);
}
