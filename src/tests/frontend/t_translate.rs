use super::{CompileCtx, builtin_types, signature_of, translate_function};
use crate::exec::context::{ExitCode, ModuleContextLayout};
use crate::ssa::ir::*;
use crate::ssa::verify::verify_function;
use crate::wasm::decode_module;

#[path = "../module_builder.rs"]
mod module_builder;
use module_builder::{I32, I64, ModuleBuilder};

fn translate(bytes: &[u8]) -> Vec<Function> {
    let module = decode_module(bytes).unwrap();
    let layout = ModuleContextLayout::compute(
        module.globals.iter().map(|global| global.ty.val_type),
    );
    let mut sigs: Vec<Signature> = module.types.iter().map(signature_of).collect();
    for ty in builtin_types() {
        sigs.push(signature_of(&ty));
    }
    let ctx = CompileCtx {
        module: &module,
        layout: &layout,
        sigs: &sigs,
    };
    let mut pipeline = crate::ssa::opt::Pipeline::new();
    (0..module.func_type_indices.len() as u32)
        .map(|local| {
            let mut func = translate_function(&ctx, local).unwrap();
            pipeline.run(&mut func);
            verify_function(&func).unwrap();
            func
        })
        .collect()
}

#[test]
fn test_add_sub_translates_to_two_binops() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.ty(&[I32, I32], &[I32]);
    let body = [
        0x20, 0x00, 0x20, 0x01, 0x6A, // (a + b)
        0x20, 0x00, 0x6B, // - a
        0x0B,
    ];
    let index = builder.func(ty, &[], &body);
    builder.export_func("add_sub", index);
    let funcs = translate(&builder.build());

    let func = &funcs[0];
    assert_eq!(func.name, "add_sub");
    let dump = func.to_string();
    assert!(dump.contains("add"));
    assert!(dump.contains("sub"));

    // Entry params for both wasm params, and a return flowing through the
    // function's end block.
    assert_eq!(func.blocks[0].params.len(), 2);
    assert!(func
        .blocks
        .iter()
        .any(|block| matches!(block.term, Terminator::Return { ref values } if values.len() == 1)));
}

#[test]
fn test_add_dump() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.ty(&[I32, I32], &[I32]);
    let body = [0x20, 0x00, 0x20, 0x01, 0x6A, 0x0B];
    let index = builder.func(ty, &[], &body);
    builder.export_func("add", index);
    let funcs = translate(&builder.build());

    // v2 is the function-end parameter, allocated before the body.
    assert_eq!(
        funcs[0].to_string(),
        indoc::indoc! {"
            fn add(i32, i32) -> (i32) {
            block0(v0: i32, v1: i32):
              v3 = add v0, v1
              jump block1(v3)
            block1(v2: i32):
              return v2
            }
        "}
    );
}

#[test]
fn test_locals_default_to_zero() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.ty(&[], &[I32]);
    // local.get 0 on a declared (zero-initialized) local.
    let body = [0x20, 0x00, 0x0B];
    builder.func(ty, &[(1, I32)], &body);
    let funcs = translate(&builder.build());
    let dump = funcs[0].to_string();
    assert!(dump.contains("iconst 0x0"));
}

#[test]
fn test_block_and_br_produce_join_block() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.ty(&[I32], &[I32]);
    // block (result i32): local.get 0, br 0, end
    let body = [
        0x02, 0x7F, // block i32
        0x20, 0x00, // local.get 0
        0x0C, 0x00, // br 0
        0x0B, // end (block)
        0x0B, // end (function)
    ];
    builder.func(ty, &[], &body);
    let funcs = translate(&builder.build());
    // The branch target block carries the result as a parameter.
    assert!(funcs[0].blocks.iter().any(|block| block.params.len() == 1));
}

#[test]
fn test_if_else_merges_at_end_block() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.ty(&[I32], &[I32]);
    // if (result i32) cond { 1 } else { 2 }
    let body = [
        0x20, 0x00, // local.get 0
        0x04, 0x7F, // if i32
        0x41, 0x01, // i32.const 1
        0x05, // else
        0x41, 0x02, // i32.const 2
        0x0B, // end if
        0x0B, // end
    ];
    builder.func(ty, &[], &body);
    let funcs = translate(&builder.build());
    let func = &funcs[0];
    assert!(func
        .blocks
        .iter()
        .any(|block| matches!(block.term, Terminator::BrIf { .. })));
    // Join receives one parameter from each arm.
    assert!(func.blocks.iter().any(|block| block.params.len() == 1));
}

#[test]
fn test_loop_with_backedge() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.ty(&[I32], &[]);
    // loop { local.get 0; br_if 0 }
    let body = [
        0x03, 0x40, // loop (empty)
        0x20, 0x00, // local.get 0
        0x0D, 0x00, // br_if 0
        0x0B, // end loop
        0x0B, // end
    ];
    builder.func(ty, &[], &body);
    let funcs = translate(&builder.build());
    // Some block branches back to an earlier block.
    let func = &funcs[0];
    let has_backedge = func.blocks.iter().any(|block| {
        block
            .term
            .targets()
            .iter()
            .any(|target| target.block.index() <= block.id.index())
    });
    assert!(has_backedge);
}

#[test]
fn test_memory_load_emits_bounds_check() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.ty(&[I32], &[I32]);
    builder.memory(1, Some(1));
    // i32.load align=2 offset=0
    let body = [0x20, 0x00, 0x28, 0x02, 0x00, 0x0B];
    builder.func(ty, &[], &body);
    let funcs = translate(&builder.build());
    let func = &funcs[0];

    let has_oob_check = func.blocks.iter().any(|block| {
        block.insts.iter().any(|inst| {
            matches!(
                inst.kind,
                InstKind::ExitIfTrue { code: ExitCode::MemoryOutOfBounds, .. }
            )
        })
    });
    assert!(has_oob_check);
    // The check happens before the load.
    let entry = &func.blocks[0];
    let check_pos = entry
        .insts
        .iter()
        .position(|inst| matches!(inst.kind, InstKind::ExitIfTrue { .. }));
    let load_pos = entry.insts.iter().position(|inst| {
        matches!(inst.kind, InstKind::Load { .. })
            && inst.results.first().map(|def| def.ty) == Some(crate::ssa::types::Type::I32)
    });
    if let (Some(check), Some(load)) = (check_pos, load_pos) {
        assert!(check < load);
    }
}

#[test]
fn test_div_emits_zero_and_overflow_guards() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.ty(&[I32, I32], &[I32]);
    let body = [0x20, 0x00, 0x20, 0x01, 0x6D, 0x0B]; // i32.div_s
    builder.func(ty, &[], &body);
    let funcs = translate(&builder.build());
    let func = &funcs[0];
    let mut codes = Vec::new();
    for block in &func.blocks {
        for inst in &block.insts {
            if let InstKind::ExitIfTrue { code, .. } = inst.kind {
                codes.push(code);
            }
        }
    }
    assert!(codes.contains(&ExitCode::IntegerDivByZero));
    assert!(codes.contains(&ExitCode::IntegerOverflow));
}

#[test]
fn test_unreachable_code_is_skipped() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.ty(&[], &[I32]);
    // return 1; then dead arithmetic.
    let body = [
        0x41, 0x01, // i32.const 1
        0x0F, // return
        0x41, 0x02, 0x41, 0x03, 0x6A, 0x1A, // dead add + drop
        0x0B,
    ];
    builder.func(ty, &[], &body);
    let funcs = translate(&builder.build());
    // The dead add never materializes.
    let total_binops: usize = funcs[0]
        .blocks
        .iter()
        .map(|block| {
            block
                .insts
                .iter()
                .filter(|inst| matches!(inst.kind, InstKind::Binary { .. }))
                .count()
        })
        .sum();
    assert_eq!(total_binops, 0);
}

#[test]
fn test_br_table_translates_to_switch_terminator() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.ty(&[I32], &[I32]);
    // block block block: br_table {0, 1} default 2
    let body = [
        0x02, 0x40, // block
        0x02, 0x40, // block
        0x20, 0x00, // local.get 0
        0x0E, 0x01, 0x00, 0x01, // br_table [0] default 1
        0x0B, // end inner
        0x41, 0x0B, // i32.const 11
        0x0F, // return
        0x0B, // end outer
        0x41, 0x0C, // i32.const 12
        0x0B, // end
    ];
    builder.func(ty, &[], &body);
    let funcs = translate(&builder.build());
    assert!(funcs[0]
        .blocks
        .iter()
        .any(|block| matches!(block.term, Terminator::BrTable { .. })));
}

#[test]
fn test_trunc_sat_has_no_guards() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.ty(&[], &[I32]);
    // f32.const 1.5; i32.trunc_sat_f32_s
    let mut body = vec![0x43];
    body.extend_from_slice(&1.5f32.to_le_bytes());
    body.extend_from_slice(&[0xFC, 0x00, 0x0B]);
    builder.func(ty, &[], &body);
    let funcs = translate(&builder.build());
    let func = &funcs[0];
    let guards = func
        .blocks
        .iter()
        .flat_map(|block| &block.insts)
        .filter(|inst| matches!(inst.kind, InstKind::ExitIfTrue { .. }))
        .count();
    assert_eq!(guards, 0);
    assert!(func.blocks.iter().flat_map(|b| &b.insts).any(|inst| {
        matches!(
            inst.kind,
            InstKind::FcvtToInt { saturating: true, .. }
        )
    }));
}

#[test]
fn test_i64_ops_carry_i64_types() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.ty(&[I64, I64], &[I64]);
    let body = [0x20, 0x00, 0x20, 0x01, 0x7C, 0x0B]; // i64.add
    builder.func(ty, &[], &body);
    let funcs = translate(&builder.build());
    let func = &funcs[0];
    let add = func
        .blocks
        .iter()
        .flat_map(|block| &block.insts)
        .find(|inst| matches!(inst.kind, InstKind::Binary { op: BinaryOp::Add, .. }))
        .unwrap();
    assert_eq!(add.results[0].ty, crate::ssa::types::Type::I64);
}
