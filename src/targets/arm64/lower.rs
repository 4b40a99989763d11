//! SSA-to-vcode lowering for ARM64.
//!
//! Walks the laid-out block order and turns each SSA instruction into one
//! or more vcode instructions over fresh virtual registers. Immediate forms
//! are preferred when an operand is a constant that fits the instruction's
//! immediate encoding. Traps branch to shared exit sequences placed after
//! the body.

use std::collections::HashMap;

use crate::config::Config;
use crate::errors::CompileError;
use crate::exec::context::ExitCode;
use crate::ssa::ir::*;
use crate::ssa::types::Type;

use super::abi::{AbiLoc, compute_abi};
use super::encode::{encode_bitmask_imm, load_constant};
use super::inst::*;
use super::regs::{
    PhysReg, RegClass, X0_EXEC_CTX, X1_MODULE_CTX, X17_SCRATCH, XZR,
};

struct LowerCtx<'a> {
    func: &'a Function,
    sigs: &'a [Signature],
    vcode: VCode,
    value_vreg: HashMap<ValueId, VReg>,
    block_label: HashMap<BlockId, Label>,
    exit_label: HashMap<u8, Label>,
    /// Block-local integer constants, for immediate-form selection.
    consts: HashMap<ValueId, (Type, u64)>,
    /// Number of predecessors per block, for branch-argument placement.
    pred_count: Vec<u32>,
    /// Copy of the module context pointer, restored after cross-module
    /// calls.
    modctx_save: Option<VReg>,
    max_outgoing: u32,
}

pub fn lower_function(
    func: &Function,
    order: &[BlockId],
    sigs: &[Signature],
    config: &Config,
) -> Result<VCode, CompileError> {
    let mut consts = HashMap::new();
    let mut needs_modctx_save = false;
    for block in &func.blocks {
        for inst in &block.insts {
            match &inst.kind {
                InstKind::Iconst { bits } => {
                    if let Some(result) = inst.results.first() {
                        consts.insert(result.id, (result.ty, *bits));
                    }
                }
                InstKind::CallIndirect { .. } => needs_modctx_save = true,
                _ => {}
            }
        }
    }

    let mut pred_count = vec![0u32; func.blocks.len()];
    for block in &func.blocks {
        let mut seen = Vec::new();
        for target in block.term.targets() {
            if !seen.contains(&target.block) {
                seen.push(target.block);
                pred_count[target.block.index()] += 1;
            }
        }
    }

    let mut ctx = LowerCtx {
        func,
        sigs,
        vcode: VCode::new(),
        value_vreg: HashMap::new(),
        block_label: HashMap::new(),
        exit_label: HashMap::new(),
        consts,
        pred_count,
        modctx_save: None,
        max_outgoing: 0,
    };

    ctx.vcode.stack_check = config.stack_checks;
    ctx.vcode.push(Inst::ReserveFrame);
    if config.stack_checks {
        let label = ctx.vcode.alloc_label();
        ctx.vcode.stack_check_label = Some(label);
        ctx.exit_label.insert(ExitCode::CallStackOverflow as u8, label);
    }
    let epilogue = ctx.vcode.alloc_label();
    ctx.vcode.epilogue_label = Some(epilogue);

    for block in order {
        let label = ctx.vcode.alloc_label();
        ctx.block_label.insert(*block, label);
    }

    if needs_modctx_save {
        let save = ctx.vcode.alloc_vreg(RegClass::Int);
        ctx.vcode.push(Inst::MovRR {
            rd: save,
            rn: VReg::phys(X1_MODULE_CTX),
            is64: true,
        });
        ctx.modctx_save = Some(save);
    }

    ctx.lower_entry_args()?;

    for (position, block_id) in order.iter().enumerate() {
        let next = order.get(position + 1).copied();
        ctx.lower_block(*block_id, next, epilogue)?;
    }

    ctx.vcode.push(Inst::LabelDef { label: epilogue });

    // Shared exit sequences.
    let labels: Vec<(u8, Label)> = ctx
        .exit_label
        .iter()
        .map(|(code, label)| (*code, *label))
        .collect();
    let mut sorted = labels;
    sorted.sort_by_key(|(code, _)| *code);
    for (code, label) in sorted {
        let code = ExitCode::from_byte(code)
            .ok_or_else(|| CompileError::bug(format!("unknown exit code {code}")))?;
        ctx.vcode.push(Inst::LabelDef { label });
        ctx.vcode.push(Inst::ExitSequence { code });
    }

    ctx.vcode.frame.outgoing_args = ctx.max_outgoing;
    Ok(ctx.vcode)
}

impl<'a> LowerCtx<'a> {
    fn vreg(&mut self, value: ValueId) -> VReg {
        if let Some(vreg) = self.value_vreg.get(&value) {
            return *vreg;
        }
        let class = match self.func.value_type(value) {
            Type::F32 | Type::F64 | Type::V128 => RegClass::Float,
            _ => RegClass::Int,
        };
        let vreg = self.vcode.alloc_vreg(class);
        self.value_vreg.insert(value, vreg);
        vreg
    }

    fn is64(&self, value: ValueId) -> bool {
        matches!(self.func.value_type(value), Type::I64 | Type::F64)
    }

    fn exit(&mut self, code: ExitCode) -> Label {
        if let Some(label) = self.exit_label.get(&(code as u8)) {
            return *label;
        }
        let label = self.vcode.alloc_label();
        self.exit_label.insert(code as u8, label);
        label
    }

    /// A constant operand's bits, if the value is a block-local constant.
    fn const_of(&self, value: ValueId) -> Option<u64> {
        self.consts.get(&value).map(|(_, bits)| *bits)
    }

    fn lower_entry_args(&mut self) -> Result<(), CompileError> {
        let abi = compute_abi(&self.func.sig);
        let entry = &self.func.blocks[0];
        if entry.params.len() != abi.args.len() {
            return Err(CompileError::bug(format!(
                "entry block has {} params but signature has {}",
                entry.params.len(),
                abi.args.len()
            )));
        }
        let params: Vec<ValueDef> = entry.params.clone();
        let first_move = InstId(self.vcode.len() as u32);
        for (param, (ty, loc)) in params.iter().zip(abi.args.iter()) {
            let dst = self.vreg(param.id);
            match (ty, loc) {
                (ty, AbiLoc::Reg(reg)) if ty.is_int() => {
                    self.vcode.push(Inst::MovRR {
                        rd: dst,
                        rn: VReg::phys(*reg),
                        is64: true,
                    });
                }
                (ty, AbiLoc::Reg(reg)) if ty.is_vector() => {
                    self.vcode.push(Inst::FpuMov128 {
                        rd: dst,
                        rn: VReg::phys(*reg),
                    });
                }
                (ty, AbiLoc::Reg(reg)) => {
                    self.vcode.push(Inst::FpuMovRR {
                        rd: dst,
                        rn: VReg::phys(*reg),
                        is64: *ty == Type::F64,
                    });
                }
                (ty, AbiLoc::Stack { offset }) => {
                    let mem = AMode::IncomingArg { offset: *offset };
                    if ty.is_int() {
                        self.vcode.push(Inst::ULoad { rd: dst, mem, bits: 64 });
                    } else {
                        self.vcode.push(Inst::FpuLoad {
                            rd: dst,
                            mem,
                            bits: ty.bits() as u8,
                        });
                    }
                }
            }
        }
        // The incoming argument registers keep their values until the last
        // scatter move has read them.
        if self.vcode.len() as u32 > first_move.0 {
            let last_move = InstId(self.vcode.len() as u32 - 1);
            for (_, loc) in &abi.args {
                if let AbiLoc::Reg(reg) = loc {
                    self.vcode.fixed_ranges.push((*reg, first_move, last_move));
                }
            }
        }
        Ok(())
    }

    fn lower_block(
        &mut self,
        block_id: BlockId,
        next: Option<BlockId>,
        epilogue: Label,
    ) -> Result<(), CompileError> {
        let label = self.block_label[&block_id];
        self.vcode.push(Inst::LabelDef { label });

        // Single-predecessor blocks receive their parameters here; the
        // predecessor's conditional branch jumps straight to the label.
        // (Entry-block params are the ABI moves instead.)
        if block_id.index() != 0
            && !self.func.block(block_id).params.is_empty()
            && self.pred_count[block_id.index()] == 1
        {
            let (params, args) = self.single_pred_edge(block_id)?;
            self.parallel_moves(&params, &args)?;
        }

        let insts: Vec<Instruction> = self.func.block(block_id).insts.clone();
        for inst in &insts {
            self.lower_inst(inst)?;
        }

        let term = self.func.block(block_id).term.clone();
        self.lower_terminator(&term, next, epilogue)
    }

    fn single_pred_edge(
        &self,
        block_id: BlockId,
    ) -> Result<(Vec<ValueDef>, Vec<ValueId>), CompileError> {
        let params = self.func.block(block_id).params.clone();
        for pred in &self.func.blocks {
            for target in pred.term.targets() {
                if target.block == block_id {
                    return Ok((params, target.args.clone()));
                }
            }
        }
        Err(CompileError::bug(format!(
            "no predecessor edge found for block{}",
            block_id.0
        )))
    }

    /// Emits moves of `args` into the vregs of `params`, breaking cycles
    /// through a temporary.
    fn parallel_moves(
        &mut self,
        params: &[ValueDef],
        args: &[ValueId],
    ) -> Result<(), CompileError> {
        let mut pending: Vec<(VReg, VReg, Type)> = Vec::new();
        for (param, arg) in params.iter().zip(args) {
            let dst = self.vreg(param.id);
            let src = self.vreg(*arg);
            if dst != src {
                pending.push((dst, src, param.ty));
            }
        }

        while !pending.is_empty() {
            let ready = pending
                .iter()
                .position(|(dst, _, _)| !pending.iter().any(|(_, src, _)| src == dst));
            match ready {
                Some(idx) => {
                    let (dst, src, ty) = pending.remove(idx);
                    self.emit_move(dst, src, ty);
                }
                None => {
                    // Cycle: rotate one source through a temporary.
                    let (_, src, ty) = pending[0];
                    let class = if ty.is_int() { RegClass::Int } else { RegClass::Float };
                    let temp = self.vcode.alloc_vreg(class);
                    self.emit_move(temp, src, ty);
                    for entry in &mut pending {
                        if entry.1 == src {
                            entry.1 = temp;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_move(&mut self, dst: VReg, src: VReg, ty: Type) {
        match ty {
            Type::I32 | Type::I64 => {
                self.vcode.push(Inst::MovRR { rd: dst, rn: src, is64: true });
            }
            Type::F32 | Type::F64 => {
                self.vcode.push(Inst::FpuMovRR {
                    rd: dst,
                    rn: src,
                    is64: ty == Type::F64,
                });
            }
            Type::V128 => {
                self.vcode.push(Inst::FpuMov128 { rd: dst, rn: src });
            }
        }
    }

    fn lower_terminator(
        &mut self,
        term: &Terminator,
        next: Option<BlockId>,
        epilogue: Label,
    ) -> Result<(), CompileError> {
        match term {
            Terminator::Jump(target) => {
                // Multi-predecessor targets get their block arguments on
                // the edge.
                if !target.args.is_empty() && self.pred_count[target.block.index()] > 1 {
                    let params = self.func.block(target.block).params.clone();
                    let args = target.args.clone();
                    self.parallel_moves(&params, &args)?;
                }
                if next != Some(target.block) {
                    let label = self.block_label[&target.block];
                    self.vcode.push(Inst::B { label });
                }
                Ok(())
            }
            Terminator::BrIf {
                cond,
                then_dst,
                else_dst,
            } => {
                let cond = self.vreg(*cond);
                let then_label = self.block_label[&then_dst.block];
                let else_label = self.block_label[&else_dst.block];
                if next == Some(then_dst.block) {
                    // Inverted: fall through to the then side.
                    self.vcode.push(Inst::CondBr {
                        kind: CondBrKind::Zero(cond, false),
                        label: else_label,
                    });
                } else {
                    self.vcode.push(Inst::CondBr {
                        kind: CondBrKind::NotZero(cond, false),
                        label: then_label,
                    });
                    if next != Some(else_dst.block) {
                        self.vcode.push(Inst::B { label: else_label });
                    }
                }
                Ok(())
            }
            Terminator::BrTable {
                index,
                targets,
                default,
            } => {
                let index = self.vreg(*index);
                let default_label = self.block_label[&default.block];
                let count = targets.len() as u16;
                if count as usize != targets.len() || count > 4095 {
                    return Err(CompileError::Validation(format!(
                        "jump table with {} entries exceeds the supported size",
                        targets.len()
                    )));
                }
                self.vcode.push(Inst::CmpImm {
                    rn: index,
                    imm12: count,
                    is64: false,
                });
                self.vcode.push(Inst::CondBr {
                    kind: CondBrKind::Cond(Cond::Hs),
                    label: default_label,
                });
                let labels: Vec<Label> = targets
                    .iter()
                    .map(|target| self.block_label[&target.block])
                    .collect();
                self.vcode.push(Inst::JTSequence {
                    ridx: index,
                    targets: labels,
                });
                Ok(())
            }
            Terminator::Return { values } => {
                let abi = compute_abi(&self.func.sig);
                let first_move = InstId(self.vcode.len() as u32);
                let mut result_regs = Vec::new();
                for (value, (ty, loc)) in values.iter().zip(abi.results.iter()) {
                    let src = self.vreg(*value);
                    match loc {
                        AbiLoc::Reg(reg) => {
                            result_regs.push(*reg);
                            self.emit_move(VReg::phys(*reg), src, *ty)
                        }
                        AbiLoc::Stack { offset } => {
                            let mem = AMode::IncomingArg {
                                offset: abi.arg_stack_bytes + offset,
                            };
                            if ty.is_int() {
                                self.vcode.push(Inst::Store { rs: src, mem, bits: 64 });
                            } else {
                                self.vcode.push(Inst::FpuStore {
                                    rs: src,
                                    mem,
                                    bits: ty.bits() as u8,
                                });
                            }
                        }
                    }
                }
                let branch = self.vcode.push(Inst::B { label: epilogue });
                for reg in result_regs {
                    self.vcode.fixed_ranges.push((reg, first_move, branch));
                }
                Ok(())
            }
            Terminator::Exit { code } => {
                let label = self.exit(*code);
                self.vcode.push(Inst::B { label });
                Ok(())
            }
            Terminator::Unterminated => {
                Err(CompileError::bug("unterminated block reached lowering".to_string()))
            }
        }
    }

    fn lower_inst(&mut self, inst: &Instruction) -> Result<(), CompileError> {
        match &inst.kind {
            InstKind::Iconst { bits } => {
                let result = inst.results[0];
                match result.ty {
                    Type::I32 | Type::I64 => {
                        let rd = self.vreg(result.id);
                        for mi in load_constant(rd, *bits, result.ty == Type::I64) {
                            self.vcode.push(mi);
                        }
                    }
                    Type::F32 | Type::F64 => {
                        let is64 = result.ty == Type::F64;
                        let tmp = self.vcode.alloc_vreg(RegClass::Int);
                        for mi in load_constant(tmp, *bits, is64) {
                            self.vcode.push(mi);
                        }
                        let rd = self.vreg(result.id);
                        self.vcode.push(Inst::MovToFpu { rd, rn: tmp, is64 });
                    }
                    Type::V128 => {
                        return Err(CompileError::bug("iconst with vector type".to_string()));
                    }
                }
            }
            InstKind::Vconst { lo, hi } => {
                let rd = self.vreg(inst.results[0].id);
                self.vcode.push(Inst::LoadLit128 { rd, lo: *lo, hi: *hi });
            }
            InstKind::ExecCtx => {
                self.value_vreg
                    .insert(inst.results[0].id, VReg::phys(X0_EXEC_CTX));
            }
            InstKind::ModuleCtx => {
                self.value_vreg
                    .insert(inst.results[0].id, VReg::phys(X1_MODULE_CTX));
            }
            InstKind::Binary { op, lhs, rhs } => {
                self.lower_binary(inst, *op, *lhs, *rhs)?;
            }
            InstKind::Unary { op, arg } => {
                self.lower_unary(inst, *op, *arg)?;
            }
            InstKind::IntCmp { cond, lhs, rhs } => {
                let is64 = self.is64(*lhs);
                let rn = self.vreg(*lhs);
                if let Some(bits) = self.const_of(*rhs).filter(|bits| *bits <= 4095) {
                    self.vcode.push(Inst::CmpImm {
                        rn,
                        imm12: bits as u16,
                        is64,
                    });
                } else {
                    let rm = self.vreg(*rhs);
                    self.vcode.push(Inst::Cmp { rn, rm, is64 });
                }
                let rd = self.vreg(inst.results[0].id);
                self.vcode.push(Inst::CSet {
                    rd,
                    cond: int_cc(*cond),
                });
            }
            InstKind::FloatCmp { cond, lhs, rhs } => {
                let is64 = self.func.value_type(*lhs) == Type::F64;
                let rn = self.vreg(*lhs);
                let rm = self.vreg(*rhs);
                self.vcode.push(Inst::FpuCmp { rn, rm, is64 });
                let rd = self.vreg(inst.results[0].id);
                self.vcode.push(Inst::CSet {
                    rd,
                    cond: float_cc(*cond),
                });
            }
            InstKind::Extend {
                arg,
                from_bits,
                signed,
            } => {
                let to64 = inst.results[0].ty == Type::I64;
                let rd = self.vreg(inst.results[0].id);
                let rn = self.vreg(*arg);
                self.vcode.push(Inst::Extend {
                    rd,
                    rn,
                    signed: *signed,
                    from_bits: *from_bits,
                    to64,
                });
            }
            InstKind::Reduce { arg } => {
                let rd = self.vreg(inst.results[0].id);
                let rn = self.vreg(*arg);
                self.vcode.push(Inst::MovRR { rd, rn, is64: false });
            }
            InstKind::FcvtToInt { arg, signed, .. } => {
                let rd = self.vreg(inst.results[0].id);
                let rn = self.vreg(*arg);
                self.vcode.push(Inst::FpuToInt {
                    rd,
                    rn,
                    signed: *signed,
                    from64: self.func.value_type(*arg) == Type::F64,
                    to64: inst.results[0].ty == Type::I64,
                });
            }
            InstKind::FcvtFromInt { arg, signed } => {
                let rd = self.vreg(inst.results[0].id);
                let rn = self.vreg(*arg);
                self.vcode.push(Inst::IntToFpu {
                    rd,
                    rn,
                    signed: *signed,
                    from64: self.func.value_type(*arg) == Type::I64,
                    to64: inst.results[0].ty == Type::F64,
                });
            }
            InstKind::Fpromote { arg } => {
                let rd = self.vreg(inst.results[0].id);
                let rn = self.vreg(*arg);
                self.vcode.push(Inst::FpuRR {
                    op: FpuOp1::Cvt32To64,
                    rd,
                    rn,
                    is64: false,
                });
            }
            InstKind::Fdemote { arg } => {
                let rd = self.vreg(inst.results[0].id);
                let rn = self.vreg(*arg);
                self.vcode.push(Inst::FpuRR {
                    op: FpuOp1::Cvt64To32,
                    rd,
                    rn,
                    is64: true,
                });
            }
            InstKind::Bitcast { arg } => {
                let rd = self.vreg(inst.results[0].id);
                let rn = self.vreg(*arg);
                let to = inst.results[0].ty;
                if to.is_float() {
                    self.vcode.push(Inst::MovToFpu {
                        rd,
                        rn,
                        is64: to == Type::F64,
                    });
                } else {
                    self.vcode.push(Inst::MovFromFpu {
                        rd,
                        rn,
                        is64: to == Type::I64,
                    });
                }
            }
            InstKind::Select {
                cond,
                if_true,
                if_false,
            } => {
                let result = inst.results[0];
                let cond = self.vreg(*cond);
                self.vcode.push(Inst::CmpImm {
                    rn: cond,
                    imm12: 0,
                    is64: false,
                });
                let rn = self.vreg(*if_true);
                let rm = self.vreg(*if_false);
                let rd = self.vreg(result.id);
                match result.ty {
                    Type::I32 | Type::I64 => {
                        self.vcode.push(Inst::CSel {
                            rd,
                            cond: Cond::Ne,
                            rn,
                            rm,
                            is64: result.ty == Type::I64,
                        });
                    }
                    Type::F32 | Type::F64 => {
                        self.vcode.push(Inst::FpuCSel {
                            rd,
                            cond: Cond::Ne,
                            rn,
                            rm,
                            is64: result.ty == Type::F64,
                        });
                    }
                    Type::V128 => {
                        // No conditional-select form for Q registers; use a
                        // short diamond.
                        let skip = self.vcode.alloc_label();
                        self.vcode.push(Inst::FpuMov128 { rd, rn });
                        self.vcode.push(Inst::CondBr {
                            kind: CondBrKind::Cond(Cond::Ne),
                            label: skip,
                        });
                        self.vcode.push(Inst::FpuMov128 { rd, rn: rm });
                        self.vcode.push(Inst::LabelDef { label: skip });
                    }
                }
            }
            InstKind::Load { addr, offset, flavor } => {
                let result = inst.results[0];
                let rd = self.vreg(result.id);
                let mem = AMode::RegOffset {
                    rn: self.vreg(*addr),
                    off: *offset as i64,
                };
                match (result.ty, flavor) {
                    (Type::V128, _) => {
                        self.vcode.push(Inst::FpuLoad { rd, mem, bits: 128 });
                    }
                    (ty, LoadFlavor::Plain) if ty.is_float() => {
                        self.vcode.push(Inst::FpuLoad {
                            rd,
                            mem,
                            bits: ty.bits() as u8,
                        });
                    }
                    (ty, LoadFlavor::Plain) => {
                        self.vcode.push(Inst::ULoad {
                            rd,
                            mem,
                            bits: ty.bits() as u8,
                        });
                    }
                    (ty, LoadFlavor::Ext { bytes, signed }) => {
                        let bits = bytes * 8;
                        if *signed {
                            self.vcode.push(Inst::SLoad {
                                rd,
                                mem,
                                bits,
                                to64: ty == Type::I64,
                            });
                        } else {
                            self.vcode.push(Inst::ULoad { rd, mem, bits });
                        }
                    }
                }
            }
            InstKind::Store {
                addr,
                value,
                offset,
                bytes,
            } => {
                let rs = self.vreg(*value);
                let mem = AMode::RegOffset {
                    rn: self.vreg(*addr),
                    off: *offset as i64,
                };
                let ty = self.func.value_type(*value);
                if ty.is_int() {
                    self.vcode.push(Inst::Store {
                        rs,
                        mem,
                        bits: bytes * 8,
                    });
                } else {
                    self.vcode.push(Inst::FpuStore {
                        rs,
                        mem,
                        bits: bytes * 8,
                    });
                }
            }
            InstKind::Splat { arg, lanes } => {
                let rd = self.vreg(inst.results[0].id);
                let src_ty = self.func.value_type(*arg);
                let rn = if src_ty.is_float() {
                    // Route the bits through an integer register for the
                    // general-register DUP form.
                    let tmp = self.vcode.alloc_vreg(RegClass::Int);
                    let src = self.vreg(*arg);
                    self.vcode.push(Inst::MovFromFpu {
                        rd: tmp,
                        rn: src,
                        is64: src_ty == Type::F64,
                    });
                    tmp
                } else {
                    self.vreg(*arg)
                };
                self.vcode.push(Inst::VecDup {
                    rd,
                    rn,
                    shape: *lanes,
                });
            }
            InstKind::ExtractLane {
                arg,
                lanes,
                lane,
                signed,
            } => {
                let result = inst.results[0];
                let rd = self.vreg(result.id);
                let rn = self.vreg(*arg);
                if result.ty.is_float() {
                    self.vcode.push(Inst::VecDupLaneScalar {
                        rd,
                        rn,
                        shape: *lanes,
                        lane: *lane,
                    });
                } else {
                    self.vcode.push(Inst::VecMovToGpr {
                        rd,
                        rn,
                        shape: *lanes,
                        lane: *lane,
                        signed: *signed,
                    });
                }
            }
            InstKind::VBinary { op, lanes, lhs, rhs } => {
                let rd = self.vreg(inst.results[0].id);
                let rn = self.vreg(*lhs);
                let rm = self.vreg(*rhs);
                let op = match op {
                    VBinaryOp::And => VecOp::And,
                    VBinaryOp::AndNot => VecOp::Bic,
                    VBinaryOp::Or => VecOp::Orr,
                    VBinaryOp::Xor => VecOp::Eor,
                    VBinaryOp::Add => VecOp::Add,
                    VBinaryOp::Sub => VecOp::Sub,
                };
                self.vcode.push(Inst::VecRRR {
                    op,
                    rd,
                    rn,
                    rm,
                    shape: *lanes,
                });
            }
            InstKind::Call { func, sig, args } => {
                let results: Vec<ValueDef> = inst.results.clone();
                self.lower_call(CallTarget::Direct(*func), *sig, args, &results)?;
            }
            InstKind::CallIndirect {
                code,
                ctx,
                sig,
                args,
            } => {
                let results: Vec<ValueDef> = inst.results.clone();
                self.lower_call(CallTarget::Indirect(*code, *ctx), *sig, args, &results)?;
            }
            InstKind::ExitIfTrue { cond, code } => {
                let cond = self.vreg(*cond);
                let label = self.exit(*code);
                self.vcode.push(Inst::CondBr {
                    kind: CondBrKind::NotZero(cond, false),
                    label,
                });
            }
        }
        Ok(())
    }

    fn lower_binary(
        &mut self,
        inst: &Instruction,
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<(), CompileError> {
        let result = inst.results[0];
        let is64 = matches!(result.ty, Type::I64 | Type::F64);

        if op.is_float() {
            let rd = self.vreg(result.id);
            let rn = self.vreg(lhs);
            let rm = self.vreg(rhs);
            match op {
                BinaryOp::Fcopysign => self.lower_fcopysign(rd, rn, rm, is64),
                _ => {
                    let op = match op {
                        BinaryOp::Fadd => FpuOp2::Add,
                        BinaryOp::Fsub => FpuOp2::Sub,
                        BinaryOp::Fmul => FpuOp2::Mul,
                        BinaryOp::Fdiv => FpuOp2::Div,
                        BinaryOp::Fmax => FpuOp2::Max,
                        BinaryOp::Fmin => FpuOp2::Min,
                        _ => unreachable!(),
                    };
                    self.vcode.push(Inst::FpuRRR { op, rd, rn, rm, is64 });
                }
            }
            return Ok(());
        }

        let rd = self.vreg(result.id);
        let rn = self.vreg(lhs);
        let rhs_const = self.const_of(rhs);

        match op {
            BinaryOp::Add | BinaryOp::Sub => {
                let alu = if op == BinaryOp::Add { AluOp::Add } else { AluOp::Sub };
                if let Some(bits) = rhs_const.filter(|bits| *bits <= 4095) {
                    self.vcode.push(Inst::AluRRImm12 {
                        op: alu,
                        rd,
                        rn,
                        imm12: bits as u16,
                        shift12: false,
                        is64,
                    });
                } else if let Some(bits) =
                    rhs_const.filter(|bits| bits & 0xFFF == 0 && bits >> 12 <= 4095)
                {
                    self.vcode.push(Inst::AluRRImm12 {
                        op: alu,
                        rd,
                        rn,
                        imm12: (bits >> 12) as u16,
                        shift12: true,
                        is64,
                    });
                } else {
                    let rm = self.vreg(rhs);
                    self.vcode.push(Inst::AluRRR { op: alu, rd, rn, rm, is64 });
                }
            }
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
                let alu = match op {
                    BinaryOp::And => AluOp::And,
                    BinaryOp::Or => AluOp::Orr,
                    _ => AluOp::Eor,
                };
                let logic = rhs_const.and_then(|bits| encode_bitmask_imm(bits, is64));
                if let Some((n, immr, imms)) = logic {
                    self.vcode.push(Inst::AluRRImmLogic {
                        op: alu,
                        rd,
                        rn,
                        n: n != 0,
                        immr: immr as u8,
                        imms: imms as u8,
                        is64,
                    });
                } else {
                    let rm = self.vreg(rhs);
                    self.vcode.push(Inst::AluRRR { op: alu, rd, rn, rm, is64 });
                }
            }
            BinaryOp::Shl | BinaryOp::ShrS | BinaryOp::ShrU | BinaryOp::Rotr => {
                let width = if is64 { 64 } else { 32 };
                if let Some(bits) = rhs_const {
                    let amount = (bits % width) as u8;
                    let op = match op {
                        BinaryOp::Shl => ShiftImmOp::Lsl,
                        BinaryOp::ShrS => ShiftImmOp::Asr,
                        BinaryOp::ShrU => ShiftImmOp::Lsr,
                        _ => ShiftImmOp::Ror,
                    };
                    self.vcode.push(Inst::AluRRImmShift {
                        op,
                        rd,
                        rn,
                        amount,
                        is64,
                    });
                } else {
                    let alu = match op {
                        BinaryOp::Shl => AluOp::Lsl,
                        BinaryOp::ShrS => AluOp::Asr,
                        BinaryOp::ShrU => AluOp::Lsr,
                        _ => AluOp::Ror,
                    };
                    let rm = self.vreg(rhs);
                    self.vcode.push(Inst::AluRRR { op: alu, rd, rn, rm, is64 });
                }
            }
            BinaryOp::Rotl => {
                // rotl(x, n) == ror(x, width - n)
                let width = if is64 { 64u64 } else { 32 };
                if let Some(bits) = rhs_const {
                    let amount = ((width - (bits % width)) % width) as u8;
                    self.vcode.push(Inst::AluRRImmShift {
                        op: ShiftImmOp::Ror,
                        rd,
                        rn,
                        amount,
                        is64,
                    });
                } else {
                    let rm = self.vreg(rhs);
                    let neg = self.vcode.alloc_vreg(RegClass::Int);
                    self.vcode.push(Inst::AluRRR {
                        op: AluOp::Sub,
                        rd: neg,
                        rn: VReg::phys(XZR),
                        rm,
                        is64,
                    });
                    self.vcode.push(Inst::AluRRR {
                        op: AluOp::Ror,
                        rd,
                        rn,
                        rm: neg,
                        is64,
                    });
                }
            }
            BinaryOp::Mul => {
                let rm = self.vreg(rhs);
                self.vcode.push(Inst::MAdd {
                    rd,
                    rn,
                    rm,
                    ra: VReg::phys(XZR),
                    is64,
                });
            }
            BinaryOp::DivS | BinaryOp::DivU => {
                let alu = if op == BinaryOp::DivS { AluOp::SDiv } else { AluOp::UDiv };
                let rm = self.vreg(rhs);
                self.vcode.push(Inst::AluRRR { op: alu, rd, rn, rm, is64 });
            }
            BinaryOp::RemS | BinaryOp::RemU => {
                let alu = if op == BinaryOp::RemS { AluOp::SDiv } else { AluOp::UDiv };
                let rm = self.vreg(rhs);
                let quotient = self.vcode.alloc_vreg(RegClass::Int);
                self.vcode.push(Inst::AluRRR {
                    op: alu,
                    rd: quotient,
                    rn,
                    rm,
                    is64,
                });
                // rem = lhs - quotient * rhs
                self.vcode.push(Inst::MSub {
                    rd,
                    rn: quotient,
                    rm,
                    ra: rn,
                    is64,
                });
            }
            _ => {
                return Err(CompileError::bug(format!("unhandled binary op {op:?}")));
            }
        }
        Ok(())
    }

    fn lower_fcopysign(&mut self, rd: VReg, rn: VReg, rm: VReg, is64: bool) {
        // Combine magnitude and sign through the integer unit.
        let mag = self.vcode.alloc_vreg(RegClass::Int);
        let sign = self.vcode.alloc_vreg(RegClass::Int);
        self.vcode.push(Inst::MovFromFpu { rd: mag, rn, is64 });
        self.vcode.push(Inst::MovFromFpu { rd: sign, rn: rm, is64 });
        let (n, immr, imms) = if is64 {
            encode_bitmask_imm(0x7FFF_FFFF_FFFF_FFFF, true).unwrap()
        } else {
            encode_bitmask_imm(0x7FFF_FFFF, false).unwrap()
        };
        self.vcode.push(Inst::AluRRImmLogic {
            op: AluOp::And,
            rd: mag,
            rn: mag,
            n: n != 0,
            immr: immr as u8,
            imms: imms as u8,
            is64,
        });
        let (sn, simr, sims) = if is64 {
            encode_bitmask_imm(0x8000_0000_0000_0000, true).unwrap()
        } else {
            encode_bitmask_imm(0x8000_0000, false).unwrap()
        };
        self.vcode.push(Inst::AluRRImmLogic {
            op: AluOp::And,
            rd: sign,
            rn: sign,
            n: sn != 0,
            immr: simr as u8,
            imms: sims as u8,
            is64,
        });
        self.vcode.push(Inst::AluRRR {
            op: AluOp::Orr,
            rd: mag,
            rn: mag,
            rm: sign,
            is64,
        });
        self.vcode.push(Inst::MovToFpu { rd, rn: mag, is64 });
    }

    fn lower_call(
        &mut self,
        target: CallTarget,
        sig: u32,
        args: &[ValueId],
        results: &[ValueDef],
    ) -> Result<(), CompileError> {
        let sig = self
            .sigs
            .get(sig as usize)
            .ok_or_else(|| CompileError::bug(format!("missing signature {sig}")))?
            .clone();
        let abi = compute_abi(&sig);
        self.max_outgoing = self.max_outgoing.max(abi.outgoing_bytes());

        let mut range_start: Option<InstId> = None;
        let mut fixed: Vec<PhysReg> = Vec::new();

        // Stack arguments first, then register moves.
        for (value, (ty, loc)) in args.iter().zip(abi.args.iter()) {
            if let AbiLoc::Stack { offset } = loc {
                let src = self.vreg(*value);
                let mem = AMode::RegOffset {
                    rn: VReg::phys(super::regs::SP),
                    off: *offset as i64,
                };
                let id = if ty.is_int() {
                    self.vcode.push(Inst::Store { rs: src, mem, bits: 64 })
                } else {
                    self.vcode.push(Inst::FpuStore {
                        rs: src,
                        mem,
                        bits: ty.bits() as u8,
                    })
                };
                range_start.get_or_insert(id);
            }
        }
        for (value, (ty, loc)) in args.iter().zip(abi.args.iter()) {
            if let AbiLoc::Reg(reg) = loc {
                let src = self.vreg(*value);
                let before = self.vcode.len();
                self.emit_move(VReg::phys(*reg), src, *ty);
                let id = InstId(before as u32);
                range_start.get_or_insert(id);
                fixed.push(*reg);
            }
        }

        let call_id = match target {
            CallTarget::Direct(func) => self.vcode.push(Inst::Call { func }),
            CallTarget::Indirect(code, ctx) => {
                let code_vreg = self.vreg(code);
                let scratch = VReg::phys(X17_SCRATCH);
                self.vcode.push(Inst::MovRR {
                    rd: scratch,
                    rn: code_vreg,
                    is64: true,
                });
                let ctx_vreg = self.vreg(ctx);
                self.vcode.push(Inst::MovRR {
                    rd: VReg::phys(X1_MODULE_CTX),
                    rn: ctx_vreg,
                    is64: true,
                });
                self.vcode.push(Inst::CallInd { rn: scratch })
            }
        };

        // Restore the module context after a cross-module transfer.
        if matches!(target, CallTarget::Indirect(..)) {
            let save = self.modctx_save.ok_or_else(|| {
                CompileError::bug("indirect call without saved module context".to_string())
            })?;
            self.vcode.push(Inst::MovRR {
                rd: VReg::phys(X1_MODULE_CTX),
                rn: save,
                is64: true,
            });
        }

        let mut range_end = call_id;
        for (result, (ty, loc)) in results.iter().zip(abi.results.iter()) {
            let dst = self.vreg(result.id);
            match loc {
                AbiLoc::Reg(reg) => {
                    let before = self.vcode.len();
                    self.emit_move(dst, VReg::phys(*reg), *ty);
                    range_end = InstId(before as u32);
                    fixed.push(*reg);
                }
                AbiLoc::Stack { offset } => {
                    let mem = AMode::RegOffset {
                        rn: VReg::phys(super::regs::SP),
                        off: (abi.arg_stack_bytes + offset) as i64,
                    };
                    let id = if ty.is_int() {
                        self.vcode.push(Inst::ULoad { rd: dst, mem, bits: 64 })
                    } else {
                        self.vcode.push(Inst::FpuLoad {
                            rd: dst,
                            mem,
                            bits: ty.bits() as u8,
                        })
                    };
                    range_end = id;
                }
            }
        }

        let start = range_start.unwrap_or(call_id);
        fixed.sort();
        fixed.dedup();
        for reg in fixed {
            self.vcode.fixed_ranges.push((reg, start, range_end));
        }
        Ok(())
    }

    fn lower_unary(
        &mut self,
        inst: &Instruction,
        op: UnaryOp,
        arg: ValueId,
    ) -> Result<(), CompileError> {
        let result = inst.results[0];
        let rd = self.vreg(result.id);
        let rn = self.vreg(arg);
        let is64 = matches!(result.ty, Type::I64 | Type::F64);
        match op {
            UnaryOp::Clz => {
                self.vcode.push(Inst::BitRR {
                    op: BitOp::Clz,
                    rd,
                    rn,
                    is64,
                });
            }
            UnaryOp::Ctz => {
                let reversed = self.vcode.alloc_vreg(RegClass::Int);
                self.vcode.push(Inst::BitRR {
                    op: BitOp::Rbit,
                    rd: reversed,
                    rn,
                    is64,
                });
                self.vcode.push(Inst::BitRR {
                    op: BitOp::Clz,
                    rd,
                    rn: reversed,
                    is64,
                });
            }
            UnaryOp::Popcnt => {
                self.vcode.push(Inst::Popcnt { rd, rn, is64 });
            }
            UnaryOp::Fneg => self.push_fpu1(FpuOp1::Neg, rd, rn, is64),
            UnaryOp::Fabs => self.push_fpu1(FpuOp1::Abs, rd, rn, is64),
            UnaryOp::Fsqrt => self.push_fpu1(FpuOp1::Sqrt, rd, rn, is64),
            UnaryOp::Ceil => self.push_fpu1(FpuOp1::RintP, rd, rn, is64),
            UnaryOp::Floor => self.push_fpu1(FpuOp1::RintM, rd, rn, is64),
            UnaryOp::Trunc => self.push_fpu1(FpuOp1::RintZ, rd, rn, is64),
            UnaryOp::Nearest => self.push_fpu1(FpuOp1::RintN, rd, rn, is64),
        }
        Ok(())
    }

    fn push_fpu1(&mut self, op: FpuOp1, rd: VReg, rn: VReg, is64: bool) {
        self.vcode.push(Inst::FpuRR { op, rd, rn, is64 });
    }
}

#[derive(Clone, Copy)]
enum CallTarget {
    Direct(u32),
    Indirect(ValueId, ValueId),
}

fn int_cc(cond: IntCC) -> Cond {
    match cond {
        IntCC::Eq => Cond::Eq,
        IntCC::Ne => Cond::Ne,
        IntCC::LtS => Cond::Lt,
        IntCC::LtU => Cond::Lo,
        IntCC::GtS => Cond::Gt,
        IntCC::GtU => Cond::Hi,
        IntCC::LeS => Cond::Le,
        IntCC::LeU => Cond::Ls,
        IntCC::GeS => Cond::Ge,
        IntCC::GeU => Cond::Hs,
    }
}

fn float_cc(cond: FloatCC) -> Cond {
    match cond {
        FloatCC::Eq => Cond::Eq,
        FloatCC::Ne => Cond::Ne,
        FloatCC::Lt => Cond::Mi,
        FloatCC::Gt => Cond::Gt,
        FloatCC::Le => Cond::Ls,
        FloatCC::Ge => Cond::Ge,
    }
}

#[cfg(test)]
#[path = "../../tests/arm64/t_lower.rs"]
mod tests;
