//! Per-opcode translation.

use crate::errors::CompileError;
use crate::exec::context::{ExitCode, descriptor_offsets, exec_offsets};
use crate::ssa::ir::*;
use crate::ssa::types::Type;
use crate::wasm::PAGE_SIZE;

use super::{Builtin, ControlFrame, FrameKind, FunctionTranslator};

impl<'a> FunctionTranslator<'a> {
    pub(super) fn translate_op(&mut self, opcode: u8) -> Result<(), CompileError> {
        match opcode {
            0x00 => {
                // unreachable
                self.builder.terminate(Terminator::Exit {
                    code: ExitCode::Unreachable,
                });
                self.set_unreachable();
            }
            0x01 => {} // nop
            0x02 => self.op_block()?,
            0x03 => self.op_loop()?,
            0x04 => self.op_if()?,
            0x05 => self.begin_else()?,
            0x0B => self.end_frame()?,
            0x0C => self.op_br()?,
            0x0D => self.op_br_if()?,
            0x0E => self.op_br_table()?,
            0x0F => self.op_return()?,
            0x10 => self.op_call()?,
            0x11 => self.op_call_indirect()?,
            0x1A => {
                self.pop()?;
            }
            0x1B => self.op_select(None)?,
            0x1C => {
                let count = self.u32()?;
                let mut ty = None;
                for _ in 0..count {
                    let byte = self.byte()?;
                    ty = crate::wasm::ValType::from_byte(byte).map(Type::from_val_type);
                }
                self.op_select(ty)?;
            }
            0x20 => {
                let raw = self.u32()?;
                let var = self.local(raw)?;
                let value = self.builder.use_var(var);
                self.push(value);
            }
            0x21 => {
                let raw = self.u32()?;
                let var = self.local(raw)?;
                let value = self.pop()?;
                self.builder.def_var(var, value);
            }
            0x22 => {
                let raw = self.u32()?;
                let var = self.local(raw)?;
                let value = *self
                    .stack
                    .last()
                    .ok_or_else(|| self.validation("tee on empty stack"))?;
                self.builder.def_var(var, value);
            }
            0x23 => self.op_global_get()?,
            0x24 => self.op_global_set()?,
            0x25 => self.op_table_get()?,
            0x26 => self.op_table_set()?,

            // Loads.
            0x28 => self.op_load(Type::I32, 4, LoadFlavor::Plain)?,
            0x29 => self.op_load(Type::I64, 8, LoadFlavor::Plain)?,
            0x2A => self.op_load(Type::F32, 4, LoadFlavor::Plain)?,
            0x2B => self.op_load(Type::F64, 8, LoadFlavor::Plain)?,
            0x2C => self.op_load(Type::I32, 1, LoadFlavor::Ext { bytes: 1, signed: true })?,
            0x2D => self.op_load(Type::I32, 1, LoadFlavor::Ext { bytes: 1, signed: false })?,
            0x2E => self.op_load(Type::I32, 2, LoadFlavor::Ext { bytes: 2, signed: true })?,
            0x2F => self.op_load(Type::I32, 2, LoadFlavor::Ext { bytes: 2, signed: false })?,
            0x30 => self.op_load(Type::I64, 1, LoadFlavor::Ext { bytes: 1, signed: true })?,
            0x31 => self.op_load(Type::I64, 1, LoadFlavor::Ext { bytes: 1, signed: false })?,
            0x32 => self.op_load(Type::I64, 2, LoadFlavor::Ext { bytes: 2, signed: true })?,
            0x33 => self.op_load(Type::I64, 2, LoadFlavor::Ext { bytes: 2, signed: false })?,
            0x34 => self.op_load(Type::I64, 4, LoadFlavor::Ext { bytes: 4, signed: true })?,
            0x35 => self.op_load(Type::I64, 4, LoadFlavor::Ext { bytes: 4, signed: false })?,

            // Stores.
            0x36 => self.op_store(4)?,
            0x37 => self.op_store(8)?,
            0x38 => self.op_store(4)?,
            0x39 => self.op_store(8)?,
            0x3A => self.op_store(1)?,
            0x3B => self.op_store(2)?,
            0x3C => self.op_store(1)?,
            0x3D => self.op_store(2)?,
            0x3E => self.op_store(4)?,

            0x3F => {
                // memory.size
                self.expect_zero_byte()?;
                let len = self.load_module_field(self.ctx.layout.memory_len, Type::I64);
                let shift = self.builder.iconst(Type::I64, PAGE_SIZE.trailing_zeros() as u64);
                let pages = self.builder.append1(
                    InstKind::Binary {
                        op: BinaryOp::ShrU,
                        lhs: len,
                        rhs: shift,
                    },
                    Type::I64,
                );
                let result = self
                    .builder
                    .append1(InstKind::Reduce { arg: pages }, Type::I32);
                self.push(result);
            }
            0x40 => {
                // memory.grow
                self.expect_zero_byte()?;
                self.call_builtin(Builtin::MemoryGrow, 1, true)?;
            }

            0x41 => {
                let value = self.i32_leb()?;
                let result = self.builder.iconst(Type::I32, value as u32 as u64);
                self.push(result);
            }
            0x42 => {
                let value = self.i64_leb()?;
                let result = self.builder.iconst(Type::I64, value as u64);
                self.push(result);
            }
            0x43 => {
                let bytes = self.reader.f32().map_err(|e| self.decode_err(e))?;
                let result = self.builder.iconst(Type::F32, bytes.to_bits() as u64);
                self.push(result);
            }
            0x44 => {
                let bytes = self.reader.f64().map_err(|e| self.decode_err(e))?;
                let result = self.builder.iconst(Type::F64, bytes.to_bits());
                self.push(result);
            }

            // i32/i64 comparisons.
            0x45 => self.op_eqz(Type::I32)?,
            0x46..=0x4F => self.op_icmp(int_cc_of(opcode - 0x46))?,
            0x50 => self.op_eqz(Type::I64)?,
            0x51..=0x5A => self.op_icmp(int_cc_of(opcode - 0x51))?,
            // f32/f64 comparisons.
            0x5B..=0x60 => self.op_fcmp(float_cc_of(opcode - 0x5B))?,
            0x61..=0x66 => self.op_fcmp(float_cc_of(opcode - 0x61))?,

            // i32 arithmetic.
            0x67 => self.op_unary(UnaryOp::Clz)?,
            0x68 => self.op_unary(UnaryOp::Ctz)?,
            0x69 => self.op_unary(UnaryOp::Popcnt)?,
            0x6A => self.op_binary(BinaryOp::Add)?,
            0x6B => self.op_binary(BinaryOp::Sub)?,
            0x6C => self.op_binary(BinaryOp::Mul)?,
            0x6D => self.op_div(true, true)?,
            0x6E => self.op_div(false, true)?,
            0x6F => self.op_rem(true)?,
            0x70 => self.op_rem(false)?,
            0x71 => self.op_binary(BinaryOp::And)?,
            0x72 => self.op_binary(BinaryOp::Or)?,
            0x73 => self.op_binary(BinaryOp::Xor)?,
            0x74 => self.op_binary(BinaryOp::Shl)?,
            0x75 => self.op_binary(BinaryOp::ShrS)?,
            0x76 => self.op_binary(BinaryOp::ShrU)?,
            0x77 => self.op_binary(BinaryOp::Rotl)?,
            0x78 => self.op_binary(BinaryOp::Rotr)?,
            // i64 arithmetic mirrors i32.
            0x79 => self.op_unary(UnaryOp::Clz)?,
            0x7A => self.op_unary(UnaryOp::Ctz)?,
            0x7B => self.op_unary(UnaryOp::Popcnt)?,
            0x7C => self.op_binary(BinaryOp::Add)?,
            0x7D => self.op_binary(BinaryOp::Sub)?,
            0x7E => self.op_binary(BinaryOp::Mul)?,
            0x7F => self.op_div(true, false)?,
            0x80 => self.op_div(false, false)?,
            0x81 => self.op_rem(true)?,
            0x82 => self.op_rem(false)?,
            0x83 => self.op_binary(BinaryOp::And)?,
            0x84 => self.op_binary(BinaryOp::Or)?,
            0x85 => self.op_binary(BinaryOp::Xor)?,
            0x86 => self.op_binary(BinaryOp::Shl)?,
            0x87 => self.op_binary(BinaryOp::ShrS)?,
            0x88 => self.op_binary(BinaryOp::ShrU)?,
            0x89 => self.op_binary(BinaryOp::Rotl)?,
            0x8A => self.op_binary(BinaryOp::Rotr)?,

            // f32 arithmetic.
            0x8B => self.op_unary(UnaryOp::Fabs)?,
            0x8C => self.op_unary(UnaryOp::Fneg)?,
            0x8D => self.op_unary(UnaryOp::Ceil)?,
            0x8E => self.op_unary(UnaryOp::Floor)?,
            0x8F => self.op_unary(UnaryOp::Trunc)?,
            0x90 => self.op_unary(UnaryOp::Nearest)?,
            0x91 => self.op_unary(UnaryOp::Fsqrt)?,
            0x92 => self.op_binary(BinaryOp::Fadd)?,
            0x93 => self.op_binary(BinaryOp::Fsub)?,
            0x94 => self.op_binary(BinaryOp::Fmul)?,
            0x95 => self.op_binary(BinaryOp::Fdiv)?,
            0x96 => self.op_binary(BinaryOp::Fmin)?,
            0x97 => self.op_binary(BinaryOp::Fmax)?,
            0x98 => self.op_binary(BinaryOp::Fcopysign)?,
            // f64 arithmetic.
            0x99 => self.op_unary(UnaryOp::Fabs)?,
            0x9A => self.op_unary(UnaryOp::Fneg)?,
            0x9B => self.op_unary(UnaryOp::Ceil)?,
            0x9C => self.op_unary(UnaryOp::Floor)?,
            0x9D => self.op_unary(UnaryOp::Trunc)?,
            0x9E => self.op_unary(UnaryOp::Nearest)?,
            0x9F => self.op_unary(UnaryOp::Fsqrt)?,
            0xA0 => self.op_binary(BinaryOp::Fadd)?,
            0xA1 => self.op_binary(BinaryOp::Fsub)?,
            0xA2 => self.op_binary(BinaryOp::Fmul)?,
            0xA3 => self.op_binary(BinaryOp::Fdiv)?,
            0xA4 => self.op_binary(BinaryOp::Fmin)?,
            0xA5 => self.op_binary(BinaryOp::Fmax)?,
            0xA6 => self.op_binary(BinaryOp::Fcopysign)?,

            // Conversions.
            0xA7 => {
                // i32.wrap_i64
                let arg = self.pop()?;
                let result = self.builder.append1(InstKind::Reduce { arg }, Type::I32);
                self.push(result);
            }
            0xA8 => self.op_trunc(Type::I32, true)?,
            0xA9 => self.op_trunc(Type::I32, false)?,
            0xAA => self.op_trunc(Type::I32, true)?,
            0xAB => self.op_trunc(Type::I32, false)?,
            0xAC => self.op_extend(32, true, Type::I64)?,
            0xAD => self.op_extend(32, false, Type::I64)?,
            0xAE => self.op_trunc(Type::I64, true)?,
            0xAF => self.op_trunc(Type::I64, false)?,
            0xB0 => self.op_trunc(Type::I64, true)?,
            0xB1 => self.op_trunc(Type::I64, false)?,
            0xB2 => self.op_convert(Type::F32, true)?,
            0xB3 => self.op_convert(Type::F32, false)?,
            0xB4 => self.op_convert(Type::F32, true)?,
            0xB5 => self.op_convert(Type::F32, false)?,
            0xB6 => {
                let arg = self.pop()?;
                let result = self.builder.append1(InstKind::Fdemote { arg }, Type::F32);
                self.push(result);
            }
            0xB7 => self.op_convert(Type::F64, true)?,
            0xB8 => self.op_convert(Type::F64, false)?,
            0xB9 => self.op_convert(Type::F64, true)?,
            0xBA => self.op_convert(Type::F64, false)?,
            0xBB => {
                let arg = self.pop()?;
                let result = self.builder.append1(InstKind::Fpromote { arg }, Type::F64);
                self.push(result);
            }
            0xBC => self.op_bitcast(Type::I32)?,
            0xBD => self.op_bitcast(Type::I64)?,
            0xBE => self.op_bitcast(Type::F32)?,
            0xBF => self.op_bitcast(Type::F64)?,

            // Sign-extension operators.
            0xC0 => self.op_extend(8, true, Type::I32)?,
            0xC1 => self.op_extend(16, true, Type::I32)?,
            0xC2 => self.op_extend(8, true, Type::I64)?,
            0xC3 => self.op_extend(16, true, Type::I64)?,
            0xC4 => self.op_extend(32, true, Type::I64)?,

            // Reference types.
            0xD0 => {
                let _ = self.byte()?; // heap type
                let result = self.builder.iconst(Type::I64, 0);
                self.push(result);
            }
            0xD1 => {
                let arg = self.pop()?;
                let zero = self.builder.iconst(Type::I64, 0);
                let result = self.builder.append1(
                    InstKind::IntCmp {
                        cond: IntCC::Eq,
                        lhs: arg,
                        rhs: zero,
                    },
                    Type::I32,
                );
                self.push(result);
            }
            0xD2 => self.op_ref_func()?,

            0xFC => self.translate_misc_op()?,
            0xFD => self.translate_simd_op()?,

            _ => {
                return Err(self.validation(format!("unsupported opcode {opcode:#04x}")));
            }
        }
        Ok(())
    }

    // ── Decoding helpers ─────────────────────────────────────────────────

    fn byte(&mut self) -> Result<u8, CompileError> {
        self.reader.byte().map_err(|e| self.decode_err(e))
    }

    fn u32(&mut self) -> Result<u32, CompileError> {
        self.reader.u32_leb().map_err(|e| self.decode_err(e))
    }

    fn i32_leb(&mut self) -> Result<i32, CompileError> {
        self.reader.i32_leb().map_err(|e| self.decode_err(e))
    }

    fn i64_leb(&mut self) -> Result<i64, CompileError> {
        self.reader.i64_leb().map_err(|e| self.decode_err(e))
    }

    fn expect_zero_byte(&mut self) -> Result<(), CompileError> {
        match self.byte()? {
            0 => Ok(()),
            byte => Err(self.validation(format!("expected zero index byte, got {byte}"))),
        }
    }

    fn local(&self, index: u32) -> Result<crate::ssa::builder::Var, CompileError> {
        self.locals
            .get(index as usize)
            .copied()
            .ok_or_else(|| self.validation(format!("local index {index} out of range")))
    }

    /// Consumes the immediates of a non-control opcode inside unreachable
    /// code.
    pub(super) fn skip_immediates(&mut self, opcode: u8) -> Result<(), CompileError> {
        match opcode {
            0x0C | 0x0D | 0x10 => {
                self.u32()?;
            }
            0x0E => {
                let count = self.u32()?;
                for _ in 0..=count {
                    self.u32()?;
                }
            }
            0x11 => {
                self.u32()?;
                self.u32()?;
            }
            0x1C => {
                let count = self.u32()?;
                for _ in 0..count {
                    self.byte()?;
                }
            }
            0x20..=0x26 => {
                self.u32()?;
            }
            0x28..=0x3E => {
                self.u32()?;
                self.u32()?;
            }
            0x3F | 0x40 => {
                self.byte()?;
            }
            0x41 => {
                self.i32_leb()?;
            }
            0x42 => {
                self.i64_leb()?;
            }
            0x43 => {
                self.reader.skip(4).map_err(|e| self.decode_err(e))?;
            }
            0x44 => {
                self.reader.skip(8).map_err(|e| self.decode_err(e))?;
            }
            0xD0 => {
                self.byte()?;
            }
            0xD2 => {
                self.u32()?;
            }
            0xFC => {
                let sub = self.u32()?;
                match sub {
                    8 | 10 | 12 | 14 => {
                        self.u32()?;
                        self.u32()?;
                    }
                    9 | 13 | 15 | 16 | 17 => {
                        self.u32()?;
                    }
                    11 => {
                        self.byte()?;
                    }
                    _ => {}
                }
            }
            0xFD => {
                let sub = self.u32()?;
                match sub {
                    0..=11 => {
                        self.u32()?;
                        self.u32()?;
                    }
                    12 | 13 => {
                        self.reader.skip(16).map_err(|e| self.decode_err(e))?;
                    }
                    21..=34 => {
                        self.byte()?;
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }

    // ── Control ──────────────────────────────────────────────────────────

    fn op_block(&mut self) -> Result<(), CompileError> {
        let (params, results) = self.block_type()?;
        if self.stack.len() < params.len() {
            return Err(self.validation("not enough block parameters"));
        }
        let end_block = self.builder.create_block();
        for ty in &results {
            self.builder.add_block_param(end_block, *ty);
        }
        let param_values = self.stack[self.stack.len() - params.len()..].to_vec();
        self.frames.push(ControlFrame {
            kind: FrameKind::Block,
            end_block,
            height: self.stack.len() - params.len(),
            param_types: params,
            result_types: results,
            param_values,
            dummy: false,
        });
        Ok(())
    }

    fn op_loop(&mut self) -> Result<(), CompileError> {
        let (params, results) = self.block_type()?;
        let args = self.pop_many(params.len())?;

        let header = self.builder.create_block();
        for ty in &params {
            self.builder.add_block_param(header, *ty);
        }
        let end_block = self.builder.create_block();
        for ty in &results {
            self.builder.add_block_param(end_block, *ty);
        }

        self.builder.terminate(Terminator::Jump(BranchTarget {
            block: header,
            args,
        }));
        self.builder.switch_to_block(header);

        let height = self.stack.len();
        let param_values: Vec<ValueId> = self
            .builder
            .block_params(header)
            .iter()
            .map(|param| param.id)
            .collect();
        self.stack.extend(param_values.iter().copied());

        self.frames.push(ControlFrame {
            kind: FrameKind::Loop { header },
            end_block,
            height,
            param_types: params,
            result_types: results,
            param_values,
            dummy: false,
        });
        Ok(())
    }

    fn op_if(&mut self) -> Result<(), CompileError> {
        let (params, results) = self.block_type()?;
        let cond = self.pop()?;
        if self.stack.len() < params.len() {
            return Err(self.validation("not enough if parameters"));
        }

        let then_block = self.builder.create_block();
        let else_block = self.builder.create_block();
        let end_block = self.builder.create_block();
        for ty in &results {
            self.builder.add_block_param(end_block, *ty);
        }

        self.builder.terminate(Terminator::BrIf {
            cond,
            then_dst: BranchTarget {
                block: then_block,
                args: Vec::new(),
            },
            else_dst: BranchTarget {
                block: else_block,
                args: Vec::new(),
            },
        });
        self.builder.seal_block(then_block);
        self.builder.seal_block(else_block);
        self.builder.switch_to_block(then_block);

        let param_values = self.stack[self.stack.len() - params.len()..].to_vec();
        self.frames.push(ControlFrame {
            kind: FrameKind::If {
                else_block,
                else_seen: false,
            },
            end_block,
            height: self.stack.len() - params.len(),
            param_types: params,
            result_types: results,
            param_values,
            dummy: false,
        });
        Ok(())
    }

    fn op_br(&mut self) -> Result<(), CompileError> {
        let depth = self.u32()?;
        let target = self.emit_branch_to(depth)?;
        self.builder.terminate(Terminator::Jump(target));
        self.set_unreachable();
        Ok(())
    }

    fn op_br_if(&mut self) -> Result<(), CompileError> {
        let depth = self.u32()?;
        let cond = self.pop()?;
        let target = self.emit_branch_to(depth)?;
        let fallthrough = self.builder.create_block();
        self.builder.terminate(Terminator::BrIf {
            cond,
            then_dst: target,
            else_dst: BranchTarget {
                block: fallthrough,
                args: Vec::new(),
            },
        });
        self.builder.seal_block(fallthrough);
        self.builder.switch_to_block(fallthrough);
        Ok(())
    }

    fn op_br_table(&mut self) -> Result<(), CompileError> {
        let count = self.u32()?;
        let mut depths = Vec::with_capacity(count as usize);
        for _ in 0..count {
            depths.push(self.u32()?);
        }
        let default_depth = self.u32()?;
        let index = self.pop()?;

        let targets = depths
            .iter()
            .map(|depth| self.emit_branch_to(*depth))
            .collect::<Result<Vec<_>, _>>()?;
        let default = self.emit_branch_to(default_depth)?;

        let arity = default.args.len();
        if targets.iter().any(|target| target.args.len() != arity) {
            return Err(self.validation("br_table arms have mismatched arity"));
        }

        self.builder.terminate(Terminator::BrTable {
            index,
            targets,
            default,
        });
        self.set_unreachable();
        Ok(())
    }

    fn op_return(&mut self) -> Result<(), CompileError> {
        let arity = self.frames[0].result_types.len();
        let values = self.pop_many(arity)?;
        self.builder.terminate(Terminator::Return { values });
        self.set_unreachable();
        Ok(())
    }

    // ── Calls ────────────────────────────────────────────────────────────

    fn op_call(&mut self) -> Result<(), CompileError> {
        let func_index = self.u32()?;
        let type_index = self
            .ctx
            .module
            .func_type_index(func_index)
            .ok_or_else(|| self.validation(format!("call to unknown function {func_index}")))?;
        let sig = self.ctx.sigs[type_index as usize].clone();
        let args = self.pop_many(sig.params.len())?;
        let result_types = sig.results.clone();

        let num_imported = self.ctx.module.num_imported_funcs();
        let results = if func_index < num_imported {
            let (code, ctx) = self.load_import_descriptor(func_index)?;
            let results = self.builder.append(
                InstKind::CallIndirect {
                    code,
                    ctx,
                    sig: type_index,
                    args,
                },
                &result_types,
            );
            // Host functions report failure through the exit-code word.
            self.check_pending_trap();
            results
        } else {
            self.builder.append(
                InstKind::Call {
                    func: func_index,
                    sig: type_index,
                    args,
                },
                &result_types,
            )
        };
        self.stack.extend(results);
        Ok(())
    }

    fn op_call_indirect(&mut self) -> Result<(), CompileError> {
        let type_index = self.u32()?;
        let table_index = self.u32()?;
        if table_index != 0 {
            return Err(self.validation("only table 0 is supported for call_indirect"));
        }
        let sig = self
            .ctx
            .sigs
            .get(type_index as usize)
            .ok_or_else(|| self.validation("call_indirect type index out of range"))?
            .clone();

        let index = self.pop()?;
        let args = self.pop_many(sig.params.len())?;

        let entry = self.table_entry_addr(index)?;
        let descriptor = self.builder.append1(
            InstKind::Load {
                addr: entry,
                offset: 0,
                flavor: LoadFlavor::Plain,
            },
            Type::I64,
        );

        // Null entry.
        let zero = self.builder.iconst(Type::I64, 0);
        let is_null = self.builder.append1(
            InstKind::IntCmp {
                cond: IntCC::Eq,
                lhs: descriptor,
                rhs: zero,
            },
            Type::I32,
        );
        self.builder.append(
            InstKind::ExitIfTrue {
                cond: is_null,
                code: ExitCode::IndirectCallNull,
            },
            &[],
        );

        // Signature check against the canonical type ID.
        let actual = self.builder.append1(
            InstKind::Load {
                addr: descriptor,
                offset: descriptor_offsets::TYPE_ID,
                flavor: LoadFlavor::Plain,
            },
            Type::I64,
        );
        let expected = self.builder.iconst(Type::I64, type_index as u64);
        let mismatch = self.builder.append1(
            InstKind::IntCmp {
                cond: IntCC::Ne,
                lhs: actual,
                rhs: expected,
            },
            Type::I32,
        );
        self.builder.append(
            InstKind::ExitIfTrue {
                cond: mismatch,
                code: ExitCode::IndirectCallTypeMismatch,
            },
            &[],
        );

        let code = self.builder.append1(
            InstKind::Load {
                addr: descriptor,
                offset: descriptor_offsets::CODE_PTR,
                flavor: LoadFlavor::Plain,
            },
            Type::I64,
        );
        let ctx = self.builder.append1(
            InstKind::Load {
                addr: descriptor,
                offset: descriptor_offsets::MODULE_CTX,
                flavor: LoadFlavor::Plain,
            },
            Type::I64,
        );

        let result_types = sig.results.clone();
        let results = self.builder.append(
            InstKind::CallIndirect {
                code,
                ctx,
                sig: type_index,
                args,
            },
            &result_types,
        );
        self.stack.extend(results);
        Ok(())
    }

    fn load_import_descriptor(
        &mut self,
        import_index: u32,
    ) -> Result<(ValueId, ValueId), CompileError> {
        let modctx = self.module_ctx();
        let array = self.builder.append1(
            InstKind::Load {
                addr: modctx,
                offset: self.ctx.layout.imported_functions,
                flavor: LoadFlavor::Plain,
            },
            Type::I64,
        );
        let base = import_index * descriptor_offsets::SIZE;
        let code = self.builder.append1(
            InstKind::Load {
                addr: array,
                offset: base + descriptor_offsets::CODE_PTR,
                flavor: LoadFlavor::Plain,
            },
            Type::I64,
        );
        let ctx = self.builder.append1(
            InstKind::Load {
                addr: array,
                offset: base + descriptor_offsets::MODULE_CTX,
                flavor: LoadFlavor::Plain,
            },
            Type::I64,
        );
        Ok((code, ctx))
    }

    /// Emits a builtin call through the host-call gate. `traps` adds the
    /// pending-trap check after the call.
    pub(super) fn call_builtin(
        &mut self,
        builtin: Builtin,
        num_args: usize,
        has_result: bool,
    ) -> Result<(), CompileError> {
        let args = self.pop_many(num_args)?;
        let (code, ctx) = self.load_import_descriptor(self.ctx.builtin_import_index(builtin))?;
        let sig_index = self.ctx.builtin_sig_index(builtin);
        let result_types: &[Type] = if has_result { &[Type::I32] } else { &[] };
        let results = self.builder.append(
            InstKind::CallIndirect {
                code,
                ctx,
                sig: sig_index,
                args,
            },
            result_types,
        );
        self.stack.extend(results);
        Ok(())
    }

    /// Checks the execution context's exit-code word after a builtin that
    /// can trap; re-raises the stored code.
    pub(super) fn check_pending_trap(&mut self) {
        let exec = self.exec_ctx();
        let pending = self.builder.append1(
            InstKind::Load {
                addr: exec,
                offset: exec_offsets::EXIT_CODE,
                flavor: LoadFlavor::Plain,
            },
            Type::I32,
        );
        self.builder.append(
            InstKind::ExitIfTrue {
                cond: pending,
                code: ExitCode::Pending,
            },
            &[],
        );
    }

    // ── Globals, tables, memory ──────────────────────────────────────────

    fn load_module_field(&mut self, offset: u32, ty: Type) -> ValueId {
        let modctx = self.module_ctx();
        self.builder.append1(
            InstKind::Load {
                addr: modctx,
                offset,
                flavor: LoadFlavor::Plain,
            },
            ty,
        )
    }

    fn op_global_get(&mut self) -> Result<(), CompileError> {
        let index = self.u32()?;
        let ty = self
            .ctx
            .module
            .global_type(index)
            .ok_or_else(|| self.validation("global index out of range"))?;
        let offset = self.ctx.layout.globals[index as usize];
        let value = self.load_module_field(offset, Type::from_val_type(ty.val_type));
        self.push(value);
        Ok(())
    }

    fn op_global_set(&mut self) -> Result<(), CompileError> {
        let index = self.u32()?;
        let ty = self
            .ctx
            .module
            .global_type(index)
            .ok_or_else(|| self.validation("global index out of range"))?;
        if !ty.mutable {
            return Err(self.validation("global.set of an immutable global"));
        }
        let offset = self.ctx.layout.globals[index as usize];
        let value = self.pop()?;
        let modctx = self.module_ctx();
        let bytes = (Type::from_val_type(ty.val_type).bits() / 8) as u8;
        self.builder.append(
            InstKind::Store {
                addr: modctx,
                value,
                offset,
                bytes,
            },
            &[],
        );
        Ok(())
    }

    /// Bounds-checked address of table entry `index`; traps on overflow.
    fn table_entry_addr(&mut self, index: ValueId) -> Result<ValueId, CompileError> {
        let index64 = self.builder.append1(
            InstKind::Extend {
                arg: index,
                from_bits: 32,
                signed: false,
            },
            Type::I64,
        );
        let len = self.load_module_field(self.ctx.layout.table_len, Type::I64);
        let oob = self.builder.append1(
            InstKind::IntCmp {
                cond: IntCC::GeU,
                lhs: index64,
                rhs: len,
            },
            Type::I32,
        );
        self.builder.append(
            InstKind::ExitIfTrue {
                cond: oob,
                code: ExitCode::TableOutOfBounds,
            },
            &[],
        );
        let base = self.load_module_field(self.ctx.layout.table_base, Type::I64);
        let three = self.builder.iconst(Type::I64, 3);
        let byte_off = self.builder.append1(
            InstKind::Binary {
                op: BinaryOp::Shl,
                lhs: index64,
                rhs: three,
            },
            Type::I64,
        );
        Ok(self.builder.append1(
            InstKind::Binary {
                op: BinaryOp::Add,
                lhs: base,
                rhs: byte_off,
            },
            Type::I64,
        ))
    }

    fn op_table_get(&mut self) -> Result<(), CompileError> {
        let _table = self.u32()?;
        let index = self.pop()?;
        let entry = self.table_entry_addr(index)?;
        let value = self.builder.append1(
            InstKind::Load {
                addr: entry,
                offset: 0,
                flavor: LoadFlavor::Plain,
            },
            Type::I64,
        );
        self.push(value);
        Ok(())
    }

    fn op_table_set(&mut self) -> Result<(), CompileError> {
        let _table = self.u32()?;
        let value = self.pop()?;
        let index = self.pop()?;
        let entry = self.table_entry_addr(index)?;
        self.builder.append(
            InstKind::Store {
                addr: entry,
                value,
                offset: 0,
                bytes: 8,
            },
            &[],
        );
        Ok(())
    }

    fn op_ref_func(&mut self) -> Result<(), CompileError> {
        let func_index = self.u32()?;
        if func_index >= self.ctx.module.num_funcs() {
            return Err(self.validation("ref.func index out of range"));
        }
        let modctx = self.module_ctx();
        let array = self.builder.append1(
            InstKind::Load {
                addr: modctx,
                offset: self.ctx.layout.function_descriptors,
                flavor: LoadFlavor::Plain,
            },
            Type::I64,
        );
        let offset = self
            .builder
            .iconst(Type::I64, (func_index * descriptor_offsets::SIZE) as u64);
        let result = self.builder.append1(
            InstKind::Binary {
                op: BinaryOp::Add,
                lhs: array,
                rhs: offset,
            },
            Type::I64,
        );
        self.push(result);
        Ok(())
    }

    /// The bounds-checked native address for a memory access of
    /// `access_bytes` at dynamic index plus static `offset`.
    fn memory_addr(&mut self, offset: u32, access_bytes: u8) -> Result<ValueId, CompileError> {
        let index = self.pop()?;
        let index64 = self.builder.append1(
            InstKind::Extend {
                arg: index,
                from_bits: 32,
                signed: false,
            },
            Type::I64,
        );
        // end = index + offset + size; cannot wrap in 64 bits.
        let ceil = offset as u64 + access_bytes as u64;
        let ceil = self.builder.iconst(Type::I64, ceil);
        let end = self.builder.append1(
            InstKind::Binary {
                op: BinaryOp::Add,
                lhs: index64,
                rhs: ceil,
            },
            Type::I64,
        );
        let len = self.load_module_field(self.ctx.layout.memory_len, Type::I64);
        let oob = self.builder.append1(
            InstKind::IntCmp {
                cond: IntCC::GtU,
                lhs: end,
                rhs: len,
            },
            Type::I32,
        );
        self.builder.append(
            InstKind::ExitIfTrue {
                cond: oob,
                code: ExitCode::MemoryOutOfBounds,
            },
            &[],
        );
        let base = self.load_module_field(self.ctx.layout.memory_base, Type::I64);
        Ok(self.builder.append1(
            InstKind::Binary {
                op: BinaryOp::Add,
                lhs: base,
                rhs: index64,
            },
            Type::I64,
        ))
    }

    fn op_load(
        &mut self,
        ty: Type,
        access_bytes: u8,
        flavor: LoadFlavor,
    ) -> Result<(), CompileError> {
        let _align = self.u32()?;
        let offset = self.u32()?;
        let addr = self.memory_addr(offset, access_bytes)?;
        let value = self.builder.append1(
            InstKind::Load {
                addr,
                offset,
                flavor,
            },
            ty,
        );
        self.push(value);
        Ok(())
    }

    fn op_store(&mut self, access_bytes: u8) -> Result<(), CompileError> {
        let _align = self.u32()?;
        let offset = self.u32()?;
        let value = self.pop()?;
        let addr = self.memory_addr(offset, access_bytes)?;
        self.builder.append(
            InstKind::Store {
                addr,
                value,
                offset,
                bytes: access_bytes,
            },
            &[],
        );
        Ok(())
    }

    // ── Numeric helpers ──────────────────────────────────────────────────

    fn op_binary(&mut self, op: BinaryOp) -> Result<(), CompileError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let ty = self.value_type(lhs);
        let result = self
            .builder
            .append1(InstKind::Binary { op, lhs, rhs }, ty);
        self.push(result);
        Ok(())
    }

    fn op_unary(&mut self, op: UnaryOp) -> Result<(), CompileError> {
        let arg = self.pop()?;
        let ty = self.value_type(arg);
        let result = self.builder.append1(InstKind::Unary { op, arg }, ty);
        self.push(result);
        Ok(())
    }

    fn op_eqz(&mut self, ty: Type) -> Result<(), CompileError> {
        let arg = self.pop()?;
        let zero = self.builder.iconst(ty, 0);
        let result = self.builder.append1(
            InstKind::IntCmp {
                cond: IntCC::Eq,
                lhs: arg,
                rhs: zero,
            },
            Type::I32,
        );
        self.push(result);
        Ok(())
    }

    fn op_icmp(&mut self, cond: IntCC) -> Result<(), CompileError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = self
            .builder
            .append1(InstKind::IntCmp { cond, lhs, rhs }, Type::I32);
        self.push(result);
        Ok(())
    }

    fn op_fcmp(&mut self, cond: FloatCC) -> Result<(), CompileError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = self
            .builder
            .append1(InstKind::FloatCmp { cond, lhs, rhs }, Type::I32);
        self.push(result);
        Ok(())
    }

    fn op_select(&mut self, _ty: Option<Type>) -> Result<(), CompileError> {
        let cond = self.pop()?;
        let if_false = self.pop()?;
        let if_true = self.pop()?;
        let ty = self.value_type(if_true);
        let result = self.builder.append1(
            InstKind::Select {
                cond,
                if_true,
                if_false,
            },
            ty,
        );
        self.push(result);
        Ok(())
    }

    fn op_extend(&mut self, from_bits: u8, signed: bool, to: Type) -> Result<(), CompileError> {
        let arg = self.pop()?;
        let result = self.builder.append1(
            InstKind::Extend {
                arg,
                from_bits,
                signed,
            },
            to,
        );
        self.push(result);
        Ok(())
    }

    fn op_bitcast(&mut self, to: Type) -> Result<(), CompileError> {
        let arg = self.pop()?;
        let result = self.builder.append1(InstKind::Bitcast { arg }, to);
        self.push(result);
        Ok(())
    }

    fn op_convert(&mut self, to: Type, signed: bool) -> Result<(), CompileError> {
        let arg = self.pop()?;
        let result = self
            .builder
            .append1(InstKind::FcvtFromInt { arg, signed }, to);
        self.push(result);
        Ok(())
    }

    fn op_div(&mut self, signed: bool, is32: bool) -> Result<(), CompileError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let ty = if is32 { Type::I32 } else { Type::I64 };
        self.guard_div_by_zero(rhs, ty);
        if signed {
            self.guard_div_overflow(lhs, rhs, ty);
        }
        let op = if signed { BinaryOp::DivS } else { BinaryOp::DivU };
        let result = self
            .builder
            .append1(InstKind::Binary { op, lhs, rhs }, ty);
        self.push(result);
        Ok(())
    }

    fn op_rem(&mut self, signed: bool) -> Result<(), CompileError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let ty = self.value_type(lhs);
        self.guard_div_by_zero(rhs, ty);
        // Signed remainder of INT_MIN / -1 is defined (0), and MSUB
        // computes it without faulting, so only the zero divisor traps.
        let op = if signed { BinaryOp::RemS } else { BinaryOp::RemU };
        let result = self
            .builder
            .append1(InstKind::Binary { op, lhs, rhs }, ty);
        self.push(result);
        Ok(())
    }

    fn guard_div_by_zero(&mut self, rhs: ValueId, ty: Type) {
        let zero = self.builder.iconst(ty, 0);
        let is_zero = self.builder.append1(
            InstKind::IntCmp {
                cond: IntCC::Eq,
                lhs: rhs,
                rhs: zero,
            },
            Type::I32,
        );
        self.builder.append(
            InstKind::ExitIfTrue {
                cond: is_zero,
                code: ExitCode::IntegerDivByZero,
            },
            &[],
        );
    }

    fn guard_div_overflow(&mut self, lhs: ValueId, rhs: ValueId, ty: Type) {
        // INT_MIN / -1 overflows.
        let int_min = match ty {
            Type::I32 => 0x8000_0000u64,
            _ => 0x8000_0000_0000_0000u64,
        };
        let minus_one = match ty {
            Type::I32 => 0xFFFF_FFFFu64,
            _ => u64::MAX,
        };
        let min_const = self.builder.iconst(ty, int_min);
        let neg_one = self.builder.iconst(ty, minus_one);
        let lhs_is_min = self.builder.append1(
            InstKind::IntCmp {
                cond: IntCC::Eq,
                lhs,
                rhs: min_const,
            },
            Type::I32,
        );
        let rhs_is_neg_one = self.builder.append1(
            InstKind::IntCmp {
                cond: IntCC::Eq,
                lhs: rhs,
                rhs: neg_one,
            },
            Type::I32,
        );
        let both = self.builder.append1(
            InstKind::Binary {
                op: BinaryOp::And,
                lhs: lhs_is_min,
                rhs: rhs_is_neg_one,
            },
            Type::I32,
        );
        self.builder.append(
            InstKind::ExitIfTrue {
                cond: both,
                code: ExitCode::IntegerOverflow,
            },
            &[],
        );
    }

    /// Trapping float-to-int conversion: NaN and out-of-range guards, then
    /// the (saturating) hardware conversion.
    fn op_trunc(&mut self, to: Type, signed: bool) -> Result<(), CompileError> {
        let arg = self.pop()?;
        let from = self.value_type(arg);

        // NaN is an invalid conversion.
        let is_nan = self.builder.append1(
            InstKind::FloatCmp {
                cond: FloatCC::Ne,
                lhs: arg,
                rhs: arg,
            },
            Type::I32,
        );
        self.builder.append(
            InstKind::ExitIfTrue {
                cond: is_nan,
                code: ExitCode::InvalidConversionToInteger,
            },
            &[],
        );

        let (lo_bits, lo_inclusive, hi_bits) = trunc_bounds(from, to, signed);
        let lo = self.builder.iconst(from, lo_bits);
        let lo_cond = if lo_inclusive { FloatCC::Le } else { FloatCC::Lt };
        let below = self.builder.append1(
            InstKind::FloatCmp {
                cond: lo_cond,
                lhs: arg,
                rhs: lo,
            },
            Type::I32,
        );
        self.builder.append(
            InstKind::ExitIfTrue {
                cond: below,
                code: ExitCode::IntegerOverflow,
            },
            &[],
        );
        let hi = self.builder.iconst(from, hi_bits);
        let above = self.builder.append1(
            InstKind::FloatCmp {
                cond: FloatCC::Ge,
                lhs: arg,
                rhs: hi,
            },
            Type::I32,
        );
        self.builder.append(
            InstKind::ExitIfTrue {
                cond: above,
                code: ExitCode::IntegerOverflow,
            },
            &[],
        );

        let result = self.builder.append1(
            InstKind::FcvtToInt {
                arg,
                signed,
                saturating: false,
            },
            to,
        );
        self.push(result);
        Ok(())
    }

    // ── 0xFC misc opcodes ────────────────────────────────────────────────

    fn translate_misc_op(&mut self) -> Result<(), CompileError> {
        let sub = self.u32()?;
        match sub {
            // Non-trapping float-to-int: the hardware conversion already
            // saturates and maps NaN to zero.
            0..=7 => {
                let (to, signed) = match sub {
                    0 => (Type::I32, true),
                    1 => (Type::I32, false),
                    2 => (Type::I32, true),
                    3 => (Type::I32, false),
                    4 => (Type::I64, true),
                    5 => (Type::I64, false),
                    6 => (Type::I64, true),
                    _ => (Type::I64, false),
                };
                let arg = self.pop()?;
                let result = self.builder.append1(
                    InstKind::FcvtToInt {
                        arg,
                        signed,
                        saturating: true,
                    },
                    to,
                );
                self.push(result);
            }
            8 => {
                // memory.init seg
                let seg = self.u32()?;
                self.expect_zero_byte()?;
                let seg_const = self.builder.iconst(Type::I32, seg as u64);
                let position = self
                    .stack
                    .len()
                    .checked_sub(3)
                    .ok_or_else(|| self.validation("operand stack underflow"))?;
                self.stack.insert(position, seg_const);
                self.call_builtin(Builtin::MemoryInit, 4, false)?;
                self.check_pending_trap();
            }
            9 => {
                let seg = self.u32()?;
                let seg_const = self.builder.iconst(Type::I32, seg as u64);
                self.push(seg_const);
                self.call_builtin(Builtin::DataDrop, 1, false)?;
            }
            10 => {
                // memory.copy
                self.expect_zero_byte()?;
                self.expect_zero_byte()?;
                self.call_builtin(Builtin::MemoryCopy, 3, false)?;
                self.check_pending_trap();
            }
            11 => {
                // memory.fill
                self.expect_zero_byte()?;
                self.call_builtin(Builtin::MemoryFill, 3, false)?;
                self.check_pending_trap();
            }
            12 => {
                // table.init seg table
                let seg = self.u32()?;
                let _table = self.u32()?;
                let seg_const = self.builder.iconst(Type::I32, seg as u64);
                let position = self
                    .stack
                    .len()
                    .checked_sub(3)
                    .ok_or_else(|| self.validation("operand stack underflow"))?;
                self.stack.insert(position, seg_const);
                self.call_builtin(Builtin::TableInit, 4, false)?;
                self.check_pending_trap();
            }
            13 => {
                let seg = self.u32()?;
                let seg_const = self.builder.iconst(Type::I32, seg as u64);
                self.push(seg_const);
                self.call_builtin(Builtin::ElemDrop, 1, false)?;
            }
            14 => {
                let _dst_table = self.u32()?;
                let _src_table = self.u32()?;
                self.call_builtin(Builtin::TableCopy, 3, false)?;
                self.check_pending_trap();
            }
            15 => {
                let _table = self.u32()?;
                self.call_builtin(Builtin::TableGrow, 2, true)?;
            }
            16 => {
                // table.size
                let _table = self.u32()?;
                let len = self.load_module_field(self.ctx.layout.table_len, Type::I64);
                let result = self.builder.append1(InstKind::Reduce { arg: len }, Type::I32);
                self.push(result);
            }
            17 => {
                let _table = self.u32()?;
                self.call_builtin(Builtin::TableFill, 3, false)?;
                self.check_pending_trap();
            }
            _ => {
                return Err(self.validation(format!("unsupported misc opcode 0xfc {sub}")));
            }
        }
        Ok(())
    }

    // ── 0xFD simd opcodes ────────────────────────────────────────────────

    fn translate_simd_op(&mut self) -> Result<(), CompileError> {
        let sub = self.u32()?;
        match sub {
            0 => {
                // v128.load
                let _align = self.u32()?;
                let offset = self.u32()?;
                let addr = self.memory_addr(offset, 16)?;
                let value = self.builder.append1(
                    InstKind::Load {
                        addr,
                        offset,
                        flavor: LoadFlavor::Plain,
                    },
                    Type::V128,
                );
                self.push(value);
            }
            11 => {
                // v128.store
                let _align = self.u32()?;
                let offset = self.u32()?;
                let value = self.pop()?;
                let addr = self.memory_addr(offset, 16)?;
                self.builder.append(
                    InstKind::Store {
                        addr,
                        value,
                        offset,
                        bytes: 16,
                    },
                    &[],
                );
            }
            12 => {
                let bytes = self.reader.bytes(16).map_err(|e| self.decode_err(e))?;
                let mut lo = [0u8; 8];
                let mut hi = [0u8; 8];
                lo.copy_from_slice(&bytes[..8]);
                hi.copy_from_slice(&bytes[8..]);
                let result = self.builder.append1(
                    InstKind::Vconst {
                        lo: u64::from_le_bytes(lo),
                        hi: u64::from_le_bytes(hi),
                    },
                    Type::V128,
                );
                self.push(result);
            }
            15..=20 => {
                let lanes = match sub {
                    15 => LaneShape::I8x16,
                    16 => LaneShape::I16x8,
                    17 => LaneShape::I32x4,
                    18 => LaneShape::I64x2,
                    19 => LaneShape::F32x4,
                    _ => LaneShape::F64x2,
                };
                let arg = self.pop()?;
                let result = self
                    .builder
                    .append1(InstKind::Splat { arg, lanes }, Type::V128);
                self.push(result);
            }
            21 | 22 | 24 | 25 | 27 | 29 | 31 | 33 => {
                let (lanes, ty, signed) = match sub {
                    21 => (LaneShape::I8x16, Type::I32, true),
                    22 => (LaneShape::I8x16, Type::I32, false),
                    24 => (LaneShape::I16x8, Type::I32, true),
                    25 => (LaneShape::I16x8, Type::I32, false),
                    27 => (LaneShape::I32x4, Type::I32, false),
                    29 => (LaneShape::I64x2, Type::I64, false),
                    31 => (LaneShape::F32x4, Type::F32, false),
                    _ => (LaneShape::F64x2, Type::F64, false),
                };
                let lane = self.byte()?;
                if lane as u32 >= lanes.lane_count() {
                    return Err(self.validation("lane index out of range"));
                }
                let arg = self.pop()?;
                let result = self.builder.append1(
                    InstKind::ExtractLane {
                        arg,
                        lanes,
                        lane,
                        signed,
                    },
                    ty,
                );
                self.push(result);
            }
            78..=81 => {
                let op = match sub {
                    78 => VBinaryOp::And,
                    79 => VBinaryOp::AndNot,
                    80 => VBinaryOp::Or,
                    _ => VBinaryOp::Xor,
                };
                self.op_vbinary(op, LaneShape::I8x16)?;
            }
            110 => self.op_vbinary(VBinaryOp::Add, LaneShape::I8x16)?,
            113 => self.op_vbinary(VBinaryOp::Sub, LaneShape::I8x16)?,
            142 => self.op_vbinary(VBinaryOp::Add, LaneShape::I16x8)?,
            145 => self.op_vbinary(VBinaryOp::Sub, LaneShape::I16x8)?,
            174 => self.op_vbinary(VBinaryOp::Add, LaneShape::I32x4)?,
            177 => self.op_vbinary(VBinaryOp::Sub, LaneShape::I32x4)?,
            206 => self.op_vbinary(VBinaryOp::Add, LaneShape::I64x2)?,
            209 => self.op_vbinary(VBinaryOp::Sub, LaneShape::I64x2)?,
            _ => {
                return Err(self.validation(format!("unsupported SIMD opcode 0xfd {sub}")));
            }
        }
        Ok(())
    }

    fn op_vbinary(&mut self, op: VBinaryOp, lanes: LaneShape) -> Result<(), CompileError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = self.builder.append1(
            InstKind::VBinary {
                op,
                lanes,
                lhs,
                rhs,
            },
            Type::V128,
        );
        self.push(result);
        Ok(())
    }
}

fn int_cc_of(offset: u8) -> IntCC {
    match offset {
        0 => IntCC::Eq,
        1 => IntCC::Ne,
        2 => IntCC::LtS,
        3 => IntCC::LtU,
        4 => IntCC::GtS,
        5 => IntCC::GtU,
        6 => IntCC::LeS,
        7 => IntCC::LeU,
        8 => IntCC::GeS,
        _ => IntCC::GeU,
    }
}

fn float_cc_of(offset: u8) -> FloatCC {
    match offset {
        0 => FloatCC::Eq,
        1 => FloatCC::Ne,
        2 => FloatCC::Lt,
        3 => FloatCC::Gt,
        4 => FloatCC::Le,
        _ => FloatCC::Ge,
    }
}

/// Range-check bounds for trapping float-to-int conversions:
/// `(low bound bits, low bound check is <=, high bound bits)`. Traps fire
/// when `arg <(=) lo` or `arg >= hi`.
fn trunc_bounds(from: Type, to: Type, signed: bool) -> (u64, bool, u64) {
    match (from, to, signed) {
        (Type::F32, Type::I32, true) => (0xCF00_0000, false, 0x4F00_0000),
        (Type::F32, Type::I32, false) => (0xBF80_0000, true, 0x4F80_0000),
        (Type::F32, Type::I64, true) => (0xDF00_0000, false, 0x5F00_0000),
        (Type::F32, Type::I64, false) => (0xBF80_0000, true, 0x5F80_0000),
        (Type::F64, Type::I32, true) => (0xC1E0_0000_0020_0000, true, 0x41E0_0000_0000_0000),
        (Type::F64, Type::I32, false) => (0xBFF0_0000_0000_0000, true, 0x41F0_0000_0000_0000),
        (Type::F64, Type::I64, true) => (0xC3E0_0000_0000_0000, false, 0x43E0_0000_0000_0000),
        _ => (0xBFF0_0000_0000_0000, true, 0x43F0_0000_0000_0000),
    }
}
