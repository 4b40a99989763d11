use super::FunctionBuilder;
use crate::exec::context::ExitCode;
use crate::ssa::ir::*;
use crate::ssa::types::Type;

fn new_builder(params: &[Type], results: &[Type]) -> FunctionBuilder {
    FunctionBuilder::new(
        "test",
        0,
        Signature {
            params: params.to_vec(),
            results: results.to_vec(),
        },
    )
}

#[test]
fn test_straight_line_def_use() {
    let mut builder = new_builder(&[], &[Type::I32]);
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);

    let var = builder.declare_var(Type::I32);
    let value = builder.iconst(Type::I32, 7);
    builder.def_var(var, value);
    assert_eq!(builder.use_var(var), value);

    builder.terminate(Terminator::Return {
        values: vec![value],
    });
    let func = builder.finish();
    assert_eq!(func.blocks.len(), 1);
}

#[test]
fn test_constants_are_interned_per_block() {
    let mut builder = new_builder(&[], &[]);
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);

    let first = builder.iconst(Type::I32, 42);
    let second = builder.iconst(Type::I32, 42);
    let other = builder.iconst(Type::I64, 42);
    assert_eq!(first, second);
    assert_ne!(first, other);

    builder.terminate(Terminator::Return { values: vec![] });
    let func = builder.finish();
    assert_eq!(func.blocks[0].insts.len(), 2);
}

#[test]
fn test_join_with_divergent_defs_gets_param() {
    // if/else redefining a variable on one side: the join needs a param.
    let mut builder = new_builder(&[Type::I32], &[Type::I32]);
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let cond = builder.add_block_param(entry, Type::I32);

    let var = builder.declare_var(Type::I32);
    let one = builder.iconst(Type::I32, 1);
    builder.def_var(var, one);

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

    builder.switch_to_block(then_block);
    let two = builder.iconst(Type::I32, 2);
    builder.def_var(var, two);
    builder.terminate(Terminator::Jump(BranchTarget {
        block: join,
        args: vec![],
    }));

    builder.switch_to_block(else_block);
    builder.terminate(Terminator::Jump(BranchTarget {
        block: join,
        args: vec![],
    }));

    builder.seal_block(join);
    builder.switch_to_block(join);
    let merged = builder.use_var(var);
    builder.terminate(Terminator::Return {
        values: vec![merged],
    });

    let func = builder.finish();
    let join_block = &func.blocks[join.index()];
    assert_eq!(join_block.params.len(), 1);
    assert_eq!(join_block.params[0].id, merged);
    // Both predecessors now pass an argument.
    for pred in [then_block, else_block] {
        let term = &func.blocks[pred.index()].term;
        let Terminator::Jump(target) = term else {
            panic!("expected jump");
        };
        assert_eq!(target.args.len(), 1);
    }
}

#[test]
fn test_join_with_agreeing_defs_elides_param() {
    // Neither side redefines: the placeholder collapses to the original.
    let mut builder = new_builder(&[Type::I32], &[Type::I32]);
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let cond = builder.add_block_param(entry, Type::I32);

    let var = builder.declare_var(Type::I32);
    let value = builder.iconst(Type::I32, 9);
    builder.def_var(var, value);

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
    let merged = builder.use_var(var);
    assert_eq!(merged, value);
    assert!(builder.block_params(join).is_empty());
    builder.terminate(Terminator::Return {
        values: vec![merged],
    });
    builder.finish();
}

#[test]
fn test_unsealed_loop_header_placeholder_resolves() {
    // Counter loop: the header reads the variable before the backedge
    // exists; sealing at loop end fills both edges.
    let mut builder = new_builder(&[], &[Type::I32]);
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);

    let var = builder.declare_var(Type::I32);
    let zero = builder.iconst(Type::I32, 0);
    builder.def_var(var, zero);

    let header = builder.create_block();
    let exit = builder.create_block();
    builder.terminate(Terminator::Jump(BranchTarget {
        block: header,
        args: vec![],
    }));

    builder.switch_to_block(header);
    let current = builder.use_var(var); // placeholder param
    let one = builder.iconst(Type::I32, 1);
    let next = builder.append1(
        InstKind::Binary {
            op: BinaryOp::Add,
            lhs: current,
            rhs: one,
        },
        Type::I32,
    );
    builder.def_var(var, next);
    let ten = builder.iconst(Type::I32, 10);
    let done = builder.append1(
        InstKind::IntCmp {
            cond: IntCC::GeU,
            lhs: next,
            rhs: ten,
        },
        Type::I32,
    );
    builder.terminate(Terminator::BrIf {
        cond: done,
        then_dst: BranchTarget {
            block: exit,
            args: vec![],
        },
        else_dst: BranchTarget {
            block: header,
            args: vec![],
        },
    });
    builder.seal_block(header);
    builder.seal_block(exit);

    builder.switch_to_block(exit);
    let result = builder.use_var(var);
    builder.terminate(Terminator::Return {
        values: vec![result],
    });

    let func = builder.finish();
    let header_block = &func.blocks[header.index()];
    assert_eq!(header_block.params.len(), 1);
    assert_eq!(header_block.params[0].id, current);

    // Entry passes the initial value; the backedge passes the increment.
    let Terminator::Jump(from_entry) = &func.blocks[entry.index()].term else {
        panic!("expected jump");
    };
    assert_eq!(from_entry.args, vec![zero]);
    let Terminator::BrIf { else_dst, .. } = &func.blocks[header.index()].term else {
        panic!("expected brif");
    };
    assert_eq!(else_dst.args, vec![next]);
}

#[test]
#[should_panic(expected = "sealed twice")]
fn test_double_seal_is_a_bug() {
    let mut builder = new_builder(&[], &[]);
    let entry = builder.create_block();
    builder.seal_block(entry);
    builder.seal_block(entry);
}

#[test]
#[should_panic(expected = "already terminated")]
fn test_double_terminate_is_a_bug() {
    let mut builder = new_builder(&[], &[]);
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);
    builder.terminate(Terminator::Exit {
        code: ExitCode::Unreachable,
    });
    builder.terminate(Terminator::Return { values: vec![] });
}
