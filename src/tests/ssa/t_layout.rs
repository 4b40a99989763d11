use super::{falls_through, layout_blocks};
use crate::ssa::builder::FunctionBuilder;
use crate::ssa::ir::*;
use crate::ssa::types::Type;

#[test]
fn test_layout_is_reverse_postorder() {
    let mut builder = FunctionBuilder::new(
        "order",
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
    let func = builder.finish();

    let order = layout_blocks(&func);
    assert_eq!(order.first(), Some(&entry));
    assert_eq!(order.last(), Some(&join));
    let position = |block: BlockId| order.iter().position(|b| *b == block).unwrap();
    assert!(position(then_block) < position(join));
    assert!(position(else_block) < position(join));
}

#[test]
fn test_loop_header_precedes_body() {
    let mut builder = FunctionBuilder::new(
        "loop",
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
    let header = builder.create_block();
    let body = builder.create_block();
    let exit = builder.create_block();

    builder.terminate(Terminator::Jump(BranchTarget {
        block: header,
        args: vec![],
    }));
    builder.switch_to_block(header);
    builder.terminate(Terminator::BrIf {
        cond,
        then_dst: BranchTarget {
            block: body,
            args: vec![],
        },
        else_dst: BranchTarget {
            block: exit,
            args: vec![],
        },
    });
    builder.seal_block(body);
    builder.seal_block(exit);
    builder.switch_to_block(body);
    builder.terminate(Terminator::Jump(BranchTarget {
        block: header,
        args: vec![],
    }));
    builder.seal_block(header);
    builder.switch_to_block(exit);
    builder.terminate(Terminator::Return { values: vec![] });
    let func = builder.finish();

    let order = layout_blocks(&func);
    let position = |block: BlockId| order.iter().position(|b| *b == block).unwrap();
    assert!(position(header) < position(body));
}

#[test]
fn test_falls_through_only_for_argless_jump_to_next() {
    let target = BlockId(3);
    let jump = Terminator::Jump(BranchTarget {
        block: target,
        args: vec![],
    });
    assert!(falls_through(&jump, Some(target)));
    assert!(!falls_through(&jump, Some(BlockId(4))));
    assert!(!falls_through(&jump, None));

    let with_args = Terminator::Jump(BranchTarget {
        block: target,
        args: vec![ValueId(0)],
    });
    assert!(!falls_through(&with_args, Some(target)));
}
