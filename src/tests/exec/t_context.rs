use super::{ExecContext, ModuleContextLayout, exec_offsets};
use crate::wasm::ValType;

fn field_offset<T>(base: &ExecContext, field: &T) -> u32 {
    (field as *const T as usize - base as *const ExecContext as usize) as u32
}

#[test]
fn test_exec_context_field_offsets_match_constants() {
    let ctx = ExecContext::new();
    assert_eq!(field_offset(&ctx, &ctx.exit_code), exec_offsets::EXIT_CODE);
    assert_eq!(field_offset(&ctx, &ctx.module_ctx), exec_offsets::MODULE_CTX);
    assert_eq!(field_offset(&ctx, &ctx.frame_chain), exec_offsets::FRAME_CHAIN);
    assert_eq!(field_offset(&ctx, &ctx.stack_limit), exec_offsets::STACK_LIMIT);
    assert_eq!(
        field_offset(&ctx, &ctx.host_call_index),
        exec_offsets::HOST_CALL_INDEX
    );
    assert_eq!(
        field_offset(&ctx, &ctx.host_call_buffer),
        exec_offsets::HOST_CALL_BUFFER
    );
    assert_eq!(field_offset(&ctx, &ctx.trap_pc), exec_offsets::TRAP_PC);
    assert_eq!(field_offset(&ctx, &ctx.trap_sp), exec_offsets::TRAP_SP);
    assert_eq!(field_offset(&ctx, &ctx.orig_fp), exec_offsets::ORIG_FP);
    assert_eq!(field_offset(&ctx, &ctx.orig_sp), exec_offsets::ORIG_SP);
    assert_eq!(
        field_offset(&ctx, &ctx.host_return_addr),
        exec_offsets::HOST_RETURN_ADDR
    );
}

#[test]
fn test_module_context_layout_packs_globals() {
    let layout = ModuleContextLayout::compute(
        [ValType::I32, ValType::V128, ValType::I64].into_iter(),
    );
    assert_eq!(layout.imported_functions, 0x08);
    assert_eq!(layout.function_descriptors, 0x10);
    assert_eq!(layout.host_dispatcher, 0x18);
    // i32 at 0x20, v128 aligned up to 0x30, i64 at 0x40.
    assert_eq!(layout.globals, vec![0x20, 0x30, 0x40]);
    assert_eq!(layout.memory_base, 0x48);
    assert_eq!(layout.memory_len, 0x50);
    assert_eq!(layout.table_base, 0x58);
    assert_eq!(layout.table_len, 0x60);
    assert_eq!(layout.size % 16, 0);
    assert!(layout.size >= 0x68);
}

#[test]
fn test_module_context_layout_no_globals() {
    let layout = ModuleContextLayout::compute(std::iter::empty());
    assert!(layout.globals.is_empty());
    assert_eq!(layout.memory_base, 0x20);
    assert_eq!(layout.memory_len, 0x28);
}

#[test]
fn test_layout_is_stable() {
    let types = [ValType::F64, ValType::V128, ValType::I32];
    let first = ModuleContextLayout::compute(types.into_iter());
    let second = ModuleContextLayout::compute(types.into_iter());
    assert_eq!(first, second);
}
