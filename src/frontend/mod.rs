//! Wasm-to-SSA frontend.
//!
//! Re-walks a validated function body's opcode stream and emits SSA through
//! the builder. Wasm's structured control maps onto blocks with arguments:
//! join points (block ends, loop headers) carry parameters, everything else
//! reads values that dominate it. Memory, global, and table accesses become
//! typed loads and stores against the module-context pointer; checked
//! conditions become conditional exit sequences.

mod ops;

use crate::errors::{CompileError, DecodeError};
use crate::exec::context::{ExitCode, ModuleContextLayout};
use crate::ssa::builder::{FunctionBuilder, Var};
use crate::ssa::ir::*;
use crate::ssa::types::Type;
use crate::wasm::{FuncType, Module, Reader, ValType};

/// Indices of the runtime builtins within the imported-function descriptor
/// array, after the module's real imports. Order is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Builtin {
    MemoryGrow = 0,
    MemoryCopy,
    MemoryFill,
    MemoryInit,
    DataDrop,
    TableGrow,
    TableCopy,
    TableInit,
    TableFill,
    ElemDrop,
}

pub const NUM_BUILTINS: u32 = 10;

/// Wasm-level signatures of the builtins, in `Builtin` order.
pub fn builtin_types() -> Vec<FuncType> {
    use ValType::{FuncRef, I32};
    vec![
        FuncType::new(vec![I32], vec![I32]),
        FuncType::new(vec![I32, I32, I32], vec![]),
        FuncType::new(vec![I32, I32, I32], vec![]),
        FuncType::new(vec![I32, I32, I32, I32], vec![]),
        FuncType::new(vec![I32], vec![]),
        FuncType::new(vec![FuncRef, I32], vec![I32]),
        FuncType::new(vec![I32, I32, I32], vec![]),
        FuncType::new(vec![I32, I32, I32, I32], vec![]),
        FuncType::new(vec![I32, FuncRef, I32], vec![]),
        FuncType::new(vec![I32], vec![]),
    ]
}

/// Converts a Wasm function type to an SSA signature.
pub fn signature_of(ty: &FuncType) -> Signature {
    Signature {
        params: ty.params.iter().map(|ty| Type::from_val_type(*ty)).collect(),
        results: ty
            .results
            .iter()
            .map(|ty| Type::from_val_type(*ty))
            .collect(),
    }
}

/// Shared translation context for one module compilation.
pub struct CompileCtx<'a> {
    pub module: &'a Module,
    pub layout: &'a ModuleContextLayout,
    /// Canonical signature table: module types first, builtins after.
    pub sigs: &'a [Signature],
}

impl<'a> CompileCtx<'a> {
    pub fn builtin_sig_index(&self, builtin: Builtin) -> u32 {
        self.module.types.len() as u32 + builtin as u32
    }

    pub fn builtin_import_index(&self, builtin: Builtin) -> u32 {
        self.module.num_imported_funcs() + builtin as u32
    }
}

struct ControlFrame {
    kind: FrameKind,
    /// Block receiving the branch for this label: the end block, or the
    /// loop header.
    end_block: BlockId,
    param_types: Vec<Type>,
    result_types: Vec<Type>,
    /// Parameter values at frame entry, for the implicit else arm.
    param_values: Vec<ValueId>,
    /// Value-stack height below the frame's parameters.
    height: usize,
    /// Frames entered while unreachable carry no blocks.
    dummy: bool,
}

enum FrameKind {
    Func,
    Block,
    Loop { header: BlockId },
    If { else_block: BlockId, else_seen: bool },
}

impl ControlFrame {
    /// The block and argument arity a branch to this label uses.
    fn branch_target(&self) -> (BlockId, &[Type]) {
        match &self.kind {
            FrameKind::Loop { header } => (*header, &self.param_types),
            _ => (self.end_block, &self.result_types),
        }
    }
}

pub struct FunctionTranslator<'a> {
    ctx: &'a CompileCtx<'a>,
    builder: FunctionBuilder,
    reader: Reader<'a>,
    locals: Vec<Var>,
    stack: Vec<ValueId>,
    frames: Vec<ControlFrame>,
    reachable: bool,
    body_end: usize,
}

/// Translates local function `local_index` into SSA.
pub fn translate_function(
    ctx: &CompileCtx,
    local_index: u32,
) -> Result<Function, CompileError> {
    let module = ctx.module;
    let func_index = module.num_imported_funcs() + local_index;
    let type_index = module.func_type_indices[local_index as usize];
    let func_type = &module.types[type_index as usize];
    let body = &module.code[local_index as usize];
    let sig = signature_of(func_type);

    let name = module
        .exports
        .iter()
        .find_map(|(name, kind)| match kind {
            crate::wasm::ExternKind::Func(idx) if *idx == func_index => Some(name.clone()),
            _ => None,
        })
        .unwrap_or_else(|| format!("f{func_index}"));

    let mut builder = FunctionBuilder::new(name, func_index, sig.clone());
    let entry = builder.create_block();
    builder.switch_to_block(entry);
    builder.seal_block(entry);

    // Locals: parameters first, then zero-initialized declared locals.
    let mut locals = Vec::with_capacity(func_type.params.len() + body.locals.len());
    for ty in &func_type.params {
        let var = builder.declare_var(Type::from_val_type(*ty));
        let value = builder.add_block_param(entry, Type::from_val_type(*ty));
        builder.def_var(var, value);
        locals.push(var);
    }

    let mut translator = FunctionTranslator {
        ctx,
        builder,
        reader: Reader::at(&module.bytes, body.body_start),
        locals,
        stack: Vec::new(),
        frames: Vec::new(),
        reachable: true,
        body_end: body.body_end,
    };

    for ty in &body.locals {
        let ssa_ty = Type::from_val_type(*ty);
        let var = translator.builder.declare_var(ssa_ty);
        let zero = translator.zero_value(ssa_ty);
        translator.builder.def_var(var, zero);
        translator.locals.push(var);
    }

    // The implicit function frame.
    let end_block = translator.builder.create_block();
    let result_types: Vec<Type> = sig.results.clone();
    for ty in &result_types {
        translator.builder.add_block_param(end_block, *ty);
    }
    translator.frames.push(ControlFrame {
        kind: FrameKind::Func,
        end_block,
        param_types: Vec::new(),
        result_types,
        param_values: Vec::new(),
        height: 0,
        dummy: false,
    });

    translator.translate_body()?;

    let func = translator.builder.finish();
    tracing::trace!(func = %func.name, blocks = func.blocks.len(), "translated function");
    Ok(func)
}

impl<'a> FunctionTranslator<'a> {
    fn validation(&self, message: impl Into<String>) -> CompileError {
        CompileError::Validation(format!(
            "offset {:#x}: {}",
            self.reader.pos(),
            message.into()
        ))
    }

    fn push(&mut self, value: ValueId) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<ValueId, CompileError> {
        self.stack
            .pop()
            .ok_or_else(|| self.validation("operand stack underflow"))
    }

    fn pop_many(&mut self, count: usize) -> Result<Vec<ValueId>, CompileError> {
        if self.stack.len() < count {
            return Err(self.validation("operand stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn value_type(&self, value: ValueId) -> Type {
        self.builder.value_type(value)
    }

    fn zero_value(&mut self, ty: Type) -> ValueId {
        match ty {
            Type::V128 => self.builder.append1(InstKind::Vconst { lo: 0, hi: 0 }, ty),
            _ => self.builder.iconst(ty, 0),
        }
    }

    /// The context pointers are pinned registers, so materializing them is
    /// free; a fresh value per use site keeps every definition dominating.
    fn exec_ctx(&mut self) -> ValueId {
        self.builder.append1(InstKind::ExecCtx, Type::I64)
    }

    fn module_ctx(&mut self) -> ValueId {
        self.builder.append1(InstKind::ModuleCtx, Type::I64)
    }

    fn decode_err(&self, error: DecodeError) -> CompileError {
        CompileError::Decode(error)
    }

    fn block_type(&mut self) -> Result<(Vec<Type>, Vec<Type>), CompileError> {
        let raw = self.reader.s33_leb().map_err(|e| self.decode_err(e))?;
        match raw {
            -64 => Ok((Vec::new(), Vec::new())), // 0x40 empty
            -1 => Ok((Vec::new(), vec![Type::I32])),
            -2 => Ok((Vec::new(), vec![Type::I64])),
            -3 => Ok((Vec::new(), vec![Type::F32])),
            -4 => Ok((Vec::new(), vec![Type::F64])),
            -5 => Ok((Vec::new(), vec![Type::V128])),
            -16 | -17 => Ok((Vec::new(), vec![Type::I64])), // funcref/externref
            idx if idx >= 0 => {
                let ty = self
                    .ctx
                    .module
                    .types
                    .get(idx as usize)
                    .ok_or_else(|| self.validation("block type index out of range"))?;
                let sig = signature_of(ty);
                Ok((sig.params, sig.results))
            }
            _ => Err(self.validation(format!("invalid block type {raw}"))),
        }
    }

    /// Truncates the stack to the current frame's base and marks the code
    /// unreachable.
    fn set_unreachable(&mut self) {
        let height = self.frames.last().map(|frame| frame.height).unwrap_or(0);
        self.stack.truncate(height);
        self.reachable = false;
    }

    /// Branch target resolution by relative depth.
    fn frame_at_depth(&self, depth: u32) -> Result<&ControlFrame, CompileError> {
        self.frames
            .len()
            .checked_sub(1 + depth as usize)
            .and_then(|idx| self.frames.get(idx))
            .ok_or_else(|| self.validation(format!("branch depth {depth} out of range")))
    }

    fn emit_branch_to(&mut self, depth: u32) -> Result<BranchTarget, CompileError> {
        let (block, arity) = {
            let frame = self.frame_at_depth(depth)?;
            let (block, types) = frame.branch_target();
            (block, types.len())
        };
        if self.stack.len() < arity {
            return Err(self.validation("not enough values for branch arguments"));
        }
        let args = self.stack[self.stack.len() - arity..].to_vec();
        Ok(BranchTarget { block, args })
    }

    fn translate_body(&mut self) -> Result<(), CompileError> {
        while self.reader.pos() < self.body_end {
            let opcode = self.reader.byte().map_err(|e| self.decode_err(e))?;
            if self.reachable {
                self.translate_op(opcode)?;
            } else {
                self.skip_op(opcode)?;
            }
            if self.frames.is_empty() {
                break;
            }
        }
        if !self.frames.is_empty() {
            return Err(self.validation("function body ended with open control frames"));
        }
        Ok(())
    }

    /// Handles opcodes in unreachable code: only the control skeleton is
    /// tracked, immediates are consumed, nothing is emitted.
    fn skip_op(&mut self, opcode: u8) -> Result<(), CompileError> {
        match opcode {
            0x02 | 0x03 | 0x04 => {
                // block / loop / if entered while unreachable
                let _ = self.block_type()?;
                self.frames.push(ControlFrame {
                    kind: FrameKind::Block,
                    end_block: BlockId(u32::MAX),
                    param_types: Vec::new(),
                    result_types: Vec::new(),
                    param_values: Vec::new(),
                    height: self.stack.len(),
                    dummy: true,
                });
            }
            0x05 => {
                // else: reachable again when the if itself was live
                let frame = self
                    .frames
                    .last()
                    .ok_or_else(|| self.validation("else outside of if"))?;
                if !frame.dummy {
                    self.begin_else()?;
                }
            }
            0x0B => {
                let frame = self
                    .frames
                    .pop()
                    .ok_or_else(|| self.validation("unbalanced end"))?;
                if !frame.dummy {
                    self.frames.push(frame);
                    self.end_frame()?;
                }
            }
            _ => self.skip_immediates(opcode)?,
        }
        Ok(())
    }

    fn end_function(&mut self) -> Result<(), CompileError> {
        let frame = self.frames.pop().expect("function frame");
        let end = frame.end_block;
        if self.reachable {
            let arity = frame.result_types.len();
            let args = self.pop_many(arity)?;
            self.builder.terminate(Terminator::Jump(BranchTarget {
                block: end,
                args,
            }));
        }
        if self.builder.pred_count(end) == 0 {
            // Nothing ever reaches the return point; synthesize a trap
            // block so the function still terminates.
            self.builder.switch_to_block(end);
            self.builder.seal_block(end);
            self.builder.terminate(Terminator::Exit {
                code: ExitCode::Unreachable,
            });
            return Ok(());
        }
        self.builder.seal_block(end);
        self.builder.switch_to_block(end);
        let values: Vec<ValueId> = self
            .builder
            .block_params(end)
            .iter()
            .map(|param| param.id)
            .collect();
        self.builder.terminate(Terminator::Return { values });
        Ok(())
    }

    fn begin_else(&mut self) -> Result<(), CompileError> {
        // Close the then arm and open the else arm.
        let (else_block, height, param_values, result_len, end_block) = {
            let frame = self.frames.last_mut().expect("if frame");
            let FrameKind::If {
                else_block,
                else_seen,
            } = &mut frame.kind
            else {
                return Err(self.validation("else outside of if"));
            };
            *else_seen = true;
            (
                *else_block,
                frame.height,
                frame.param_values.clone(),
                frame.result_types.len(),
                frame.end_block,
            )
        };

        if self.reachable {
            let args = self.pop_many(result_len)?;
            self.builder.terminate(Terminator::Jump(BranchTarget {
                block: end_block,
                args,
            }));
        }

        self.stack.truncate(height);
        self.stack.extend(param_values);
        self.builder.switch_to_block(else_block);
        self.reachable = true;
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), CompileError> {
        if self.frames.len() == 1 {
            return self.end_function();
        }
        let frame = self.frames.pop().expect("frame");
        let end = frame.end_block;

        if self.reachable {
            let args = self.pop_many(frame.result_types.len())?;
            self.builder.terminate(Terminator::Jump(BranchTarget {
                block: end,
                args,
            }));
        }

        match frame.kind {
            FrameKind::If {
                else_block,
                else_seen,
            } if !else_seen => {
                // No else arm: route the condition's false edge to the end
                // block with the frame's entry parameters.
                if frame.param_values.len() != frame.result_types.len() {
                    return Err(
                        self.validation("if without else must have matching params and results")
                    );
                }
                self.builder.switch_to_block(else_block);
                self.builder.terminate(Terminator::Jump(BranchTarget {
                    block: end,
                    args: frame.param_values.clone(),
                }));
            }
            FrameKind::Loop { header } => {
                // All backedges are known now.
                if !self.builder.is_sealed(header) {
                    self.builder.seal_block(header);
                }
            }
            _ => {}
        }

        self.stack.truncate(frame.height);
        if self.builder.pred_count(end) == 0 {
            // The end block is unreachable; stay in unreachable mode.
            self.set_unreachable();
            // Blocks with no predecessors still need a terminator for the
            // verifier; give it a trap and let cleanup remove it.
            self.builder.switch_to_block(end);
            self.builder.seal_block(end);
            self.builder.terminate(Terminator::Exit {
                code: ExitCode::Unreachable,
            });
            return Ok(());
        }

        self.builder.seal_block(end);
        self.builder.switch_to_block(end);
        let params: Vec<ValueId> = self
            .builder
            .block_params(end)
            .iter()
            .map(|param| param.id)
            .collect();
        self.stack.extend(params);
        self.reachable = true;
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/frontend/t_translate.rs"]
mod tests;
