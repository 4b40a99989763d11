//! ABI lowering: argument and result locations, the host entry preamble,
//! and host-call stubs.
//!
//! Internal calling convention: x0 carries the execution context and x1 the
//! module context; integer arguments fill x2..x7 and float/vector arguments
//! v0..v7 before overflowing to the stack. Results mirror the same rule.
//! The stack at a call site is laid out, from higher addresses down:
//! return-overflow area, argument-overflow area, then the callee's frame.

use crate::errors::CompileError;
use crate::exec::context::exec_offsets;
use crate::ssa::ir::Signature;
use crate::ssa::types::Type;

use super::inst::*;
use super::regs::{
    FLOAT_ARG_REGS, INT_ARG_REGS, PhysReg, SP, X0_EXEC_CTX, X16_SCRATCH, X17_SCRATCH, X29_FP,
    X30_LR, xreg,
};

/// Where one argument or result lives at a call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiLoc {
    Reg(PhysReg),
    /// Byte offset within the argument (or result) overflow area.
    Stack { offset: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiSig {
    pub args: Vec<(Type, AbiLoc)>,
    pub results: Vec<(Type, AbiLoc)>,
    /// Size of the argument overflow area, 16-aligned.
    pub arg_stack_bytes: u32,
    /// Size of the result overflow area, 16-aligned.
    pub ret_stack_bytes: u32,
}

impl AbiSig {
    /// Total outgoing stack bytes a caller reserves for this signature.
    pub fn outgoing_bytes(&self) -> u32 {
        self.arg_stack_bytes + self.ret_stack_bytes
    }
}

fn assign_locs(types: &[Type]) -> (Vec<(Type, AbiLoc)>, u32) {
    let mut locs = Vec::with_capacity(types.len());
    let mut next_int = 0;
    let mut next_float = 0;
    let mut stack: u32 = 0;
    for ty in types {
        let loc = if ty.is_int() {
            if next_int < INT_ARG_REGS.len() {
                next_int += 1;
                AbiLoc::Reg(INT_ARG_REGS[next_int - 1])
            } else {
                let offset = stack;
                stack += 8;
                AbiLoc::Stack { offset }
            }
        } else if next_float < FLOAT_ARG_REGS.len() {
            next_float += 1;
            AbiLoc::Reg(FLOAT_ARG_REGS[next_float - 1])
        } else if ty.is_vector() {
            stack = (stack + 15) & !15;
            let offset = stack;
            stack += 16;
            AbiLoc::Stack { offset }
        } else {
            let offset = stack;
            stack += 8;
            AbiLoc::Stack { offset }
        };
        locs.push((*ty, loc));
    }
    (locs, (stack + 15) & !15)
}

/// Resolves the locations for a signature. Deterministic: computing twice
/// yields the same map.
pub fn compute_abi(sig: &Signature) -> AbiSig {
    let (args, arg_stack_bytes) = assign_locs(&sig.params);
    let (results, ret_stack_bytes) = assign_locs(&sig.results);
    AbiSig {
        args,
        results,
        arg_stack_bytes,
        ret_stack_bytes,
    }
}

/// One u64 slot index per value in the host param buffer; v128 takes two.
pub fn buffer_slots(types: &[Type]) -> Vec<u32> {
    let mut slots = Vec::with_capacity(types.len());
    let mut next = 0;
    for ty in types {
        slots.push(next);
        next += if ty.is_vector() { 2 } else { 1 };
    }
    slots
}

fn sp_v() -> VReg {
    VReg::phys(SP)
}

fn x(enc: u8) -> VReg {
    VReg::phys(xreg(enc))
}

/// `mov sp, <rn>` / `mov <rd>, sp` both go through the ADD-immediate form.
fn mov_sp(rd: VReg, rn: VReg) -> Inst {
    Inst::AluRRImm12 {
        op: AluOp::Add,
        rd,
        rn,
        imm12: 0,
        shift12: false,
        is64: true,
    }
}

fn sp_adjust(vcode: &mut VCode, bytes: u32, down: bool) -> Result<(), CompileError> {
    if bytes == 0 {
        return Ok(());
    }
    let op = if down { AluOp::Sub } else { AluOp::Add };
    let low = bytes & 0xFFF;
    let high = bytes >> 12;
    if high > 0xFFF {
        return Err(CompileError::bug(format!("frame adjustment {bytes:#x} too large")));
    }
    if high != 0 {
        vcode.push(Inst::AluRRImm12 {
            op,
            rd: sp_v(),
            rn: sp_v(),
            imm12: high as u16,
            shift12: true,
            is64: true,
        });
    }
    if low != 0 || high == 0 {
        vcode.push(Inst::AluRRImm12 {
            op,
            rd: sp_v(),
            rn: sp_v(),
            imm12: low as u16,
            shift12: false,
            is64: true,
        });
    }
    Ok(())
}

fn load_buffer_slot(vcode: &mut VCode, ty: Type, buffer: VReg, slot: u32, dst: AbiLoc) {
    let off = (slot * 8) as i64;
    match (ty, dst) {
        (ty, AbiLoc::Reg(reg)) if ty.is_int() => {
            vcode.push(Inst::ULoad {
                rd: VReg::phys(reg),
                mem: AMode::RegOffset { rn: buffer, off },
                bits: 64,
            });
        }
        (ty, AbiLoc::Reg(reg)) => {
            vcode.push(Inst::FpuLoad {
                rd: VReg::phys(reg),
                mem: AMode::RegOffset { rn: buffer, off },
                bits: ty.bits() as u8,
            });
        }
        (ty, AbiLoc::Stack { offset }) if ty.is_vector() => {
            let scratch = VReg::phys(super::regs::V30_SCRATCH);
            vcode.push(Inst::FpuLoad {
                rd: scratch,
                mem: AMode::RegOffset { rn: buffer, off },
                bits: 128,
            });
            vcode.push(Inst::FpuStore {
                rs: scratch,
                mem: AMode::RegOffset { rn: sp_v(), off: offset as i64 },
                bits: 128,
            });
        }
        (_, AbiLoc::Stack { offset }) => {
            let scratch = VReg::phys(X16_SCRATCH);
            vcode.push(Inst::ULoad {
                rd: scratch,
                mem: AMode::RegOffset { rn: buffer, off },
                bits: 64,
            });
            vcode.push(Inst::Store {
                rs: scratch,
                mem: AMode::RegOffset { rn: sp_v(), off: offset as i64 },
                bits: 64,
            });
        }
    }
}

fn store_buffer_slot(vcode: &mut VCode, ty: Type, buffer: VReg, slot: u32, src: AbiLoc, ret_area_sp_off: u32) {
    let off = (slot * 8) as i64;
    match (ty, src) {
        (ty, AbiLoc::Reg(reg)) if ty.is_int() => {
            vcode.push(Inst::Store {
                rs: VReg::phys(reg),
                mem: AMode::RegOffset { rn: buffer, off },
                bits: 64,
            });
        }
        (ty, AbiLoc::Reg(reg)) => {
            vcode.push(Inst::FpuStore {
                rs: VReg::phys(reg),
                mem: AMode::RegOffset { rn: buffer, off },
                bits: ty.bits() as u8,
            });
        }
        (ty, AbiLoc::Stack { offset }) if ty.is_vector() => {
            let scratch = VReg::phys(super::regs::V30_SCRATCH);
            vcode.push(Inst::FpuLoad {
                rd: scratch,
                mem: AMode::RegOffset {
                    rn: sp_v(),
                    off: (ret_area_sp_off + offset) as i64,
                },
                bits: 128,
            });
            vcode.push(Inst::FpuStore {
                rs: scratch,
                mem: AMode::RegOffset { rn: buffer, off },
                bits: 128,
            });
        }
        (_, AbiLoc::Stack { offset }) => {
            let scratch = VReg::phys(X16_SCRATCH);
            vcode.push(Inst::ULoad {
                rd: scratch,
                mem: AMode::RegOffset {
                    rn: sp_v(),
                    off: (ret_area_sp_off + offset) as i64,
                },
                bits: 64,
            });
            vcode.push(Inst::Store {
                rs: scratch,
                mem: AMode::RegOffset { rn: buffer, off },
                bits: 64,
            });
        }
    }
}

/// Builds the entry trampoline for one signature.
///
/// Called from the host as `fn(exec_ctx: x0, module_ctx: x1, stack_top: x2,
/// params: x3, body: x4)`. Saves host FP/SP/LR into the execution context,
/// switches SP to the guest stack, scatters the `u64` param buffer into ABI
/// locations, calls the body, gathers results back into the buffer, and
/// restores the host state.
pub fn build_entry_preamble(sig: &Signature) -> Result<VCode, CompileError> {
    let abi = compute_abi(sig);
    let mut vcode = VCode::new();
    let exec = VReg::phys(X0_EXEC_CTX);
    let fp = VReg::phys(X29_FP);
    let lr = VReg::phys(X30_LR);
    let scratch = VReg::phys(X16_SCRATCH);

    let store_ctx = |off: u32, rs: VReg| Inst::Store {
        rs,
        mem: AMode::RegOffset { rn: exec, off: off as i64 },
        bits: 64,
    };
    let load_ctx = |off: u32, rd: VReg| Inst::ULoad {
        rd,
        mem: AMode::RegOffset { rn: exec, off: off as i64 },
        bits: 64,
    };

    vcode.push(store_ctx(exec_offsets::HOST_RETURN_ADDR, lr));
    vcode.push(store_ctx(exec_offsets::ORIG_FP, fp));
    vcode.push(mov_sp(scratch, sp_v()));
    vcode.push(store_ctx(exec_offsets::ORIG_SP, scratch));
    // Reset the call-frame chain for this entry.
    vcode.push(Inst::MovWide {
        op: MovWideOp::Z,
        rd: scratch,
        imm16: 0,
        shift: 0,
        is64: true,
    });
    vcode.push(store_ctx(exec_offsets::FRAME_CHAIN, scratch));

    // Switch to the guest stack and keep the param pointer in x19, saved
    // first so the host's value survives.
    vcode.push(mov_sp(sp_v(), x(2)));
    vcode.push(Inst::StpPre { rt: x(19), rt2: x(20) });
    vcode.push(Inst::MovRR { rd: x(19), rn: x(3), is64: true });
    vcode.push(Inst::MovRR { rd: x(20), rn: x(4), is64: true });

    sp_adjust(&mut vcode, abi.outgoing_bytes(), true)?;

    let arg_slots = buffer_slots(&sig.params);
    for ((ty, loc), slot) in abi.args.iter().zip(&arg_slots) {
        load_buffer_slot(&mut vcode, *ty, x(19), *slot, *loc);
    }

    vcode.push(Inst::CallInd { rn: x(20) });

    let ret_slots = buffer_slots(&sig.results);
    for ((ty, loc), slot) in abi.results.iter().zip(&ret_slots) {
        store_buffer_slot(&mut vcode, *ty, x(19), *slot, *loc, abi.arg_stack_bytes);
    }

    sp_adjust(&mut vcode, abi.outgoing_bytes(), false)?;
    vcode.push(Inst::LdpPost { rt: x(19), rt2: x(20) });

    vcode.push(load_ctx(exec_offsets::ORIG_FP, fp));
    vcode.push(load_ctx(exec_offsets::ORIG_SP, scratch));
    vcode.push(mov_sp(sp_v(), scratch));
    vcode.push(load_ctx(exec_offsets::HOST_RETURN_ADDR, lr));
    vcode.push(Inst::Ret);
    Ok(vcode)
}

/// Offset of the host dispatcher pointer within a module context; fixed by
/// `ModuleContextLayout::compute`.
const HOST_DISPATCHER_OFF: i64 = 0x18;

/// Builds the native-to-dispatcher stub for host function `index`.
///
/// The stub receives a call under the internal convention, spills its
/// arguments into a buffer on the guest stack, records the buffer and the
/// function index in the execution context, and calls the dispatcher
/// registered in the (host) module context. Results come back through the
/// same buffer.
pub fn build_host_stub(sig: &Signature, index: u32) -> Result<VCode, CompileError> {
    let abi = compute_abi(sig);
    let mut vcode = VCode::new();
    let exec = VReg::phys(X0_EXEC_CTX);
    let scratch = VReg::phys(X16_SCRATCH);

    let arg_slots = buffer_slots(&sig.params);
    let ret_slots = buffer_slots(&sig.results);
    let arg_slot_count: u32 = arg_slots.len() as u32
        + sig.params.iter().filter(|ty| ty.is_vector()).count() as u32;
    let ret_slot_count: u32 = ret_slots.len() as u32
        + sig.results.iter().filter(|ty| ty.is_vector()).count() as u32;
    let buf_bytes = (arg_slot_count.max(ret_slot_count) * 8 + 15) & !15;

    vcode.push(Inst::StpPre { rt: VReg::phys(X29_FP), rt2: VReg::phys(X30_LR) });
    vcode.push(Inst::StpPre { rt: x(19), rt2: x(20) });
    sp_adjust(&mut vcode, buf_bytes, true)?;

    // Incoming stack arguments now live above the two pushes and the
    // buffer.
    let incoming_base = (buf_bytes + 32) as i64;

    for ((ty, loc), slot) in abi.args.iter().zip(&arg_slots) {
        let buf_off = (*slot * 8) as i64;
        match (ty, loc) {
            (ty, AbiLoc::Reg(reg)) if ty.is_int() => {
                vcode.push(Inst::Store {
                    rs: VReg::phys(*reg),
                    mem: AMode::RegOffset { rn: sp_v(), off: buf_off },
                    bits: 64,
                });
            }
            (ty, AbiLoc::Reg(reg)) => {
                vcode.push(Inst::FpuStore {
                    rs: VReg::phys(*reg),
                    mem: AMode::RegOffset { rn: sp_v(), off: buf_off },
                    bits: ty.bits() as u8,
                });
            }
            (ty, AbiLoc::Stack { offset }) if ty.is_vector() => {
                let vscratch = VReg::phys(super::regs::V30_SCRATCH);
                vcode.push(Inst::FpuLoad {
                    rd: vscratch,
                    mem: AMode::RegOffset { rn: sp_v(), off: incoming_base + *offset as i64 },
                    bits: 128,
                });
                vcode.push(Inst::FpuStore {
                    rs: vscratch,
                    mem: AMode::RegOffset { rn: sp_v(), off: buf_off },
                    bits: 128,
                });
            }
            (_, AbiLoc::Stack { offset }) => {
                vcode.push(Inst::ULoad {
                    rd: scratch,
                    mem: AMode::RegOffset { rn: sp_v(), off: incoming_base + *offset as i64 },
                    bits: 64,
                });
                vcode.push(Inst::Store {
                    rs: scratch,
                    mem: AMode::RegOffset { rn: sp_v(), off: buf_off },
                    bits: 64,
                });
            }
        }
    }

    // exec_ctx.host_call_buffer = sp; exec_ctx.host_call_index = index.
    vcode.push(mov_sp(scratch, sp_v()));
    vcode.push(Inst::Store {
        rs: scratch,
        mem: AMode::RegOffset { rn: exec, off: exec_offsets::HOST_CALL_BUFFER as i64 },
        bits: 64,
    });
    for inst in super::encode::load_constant(scratch, index as u64, false) {
        vcode.push(inst);
    }
    vcode.push(Inst::Store {
        rs: scratch,
        mem: AMode::RegOffset { rn: exec, off: exec_offsets::HOST_CALL_INDEX as i64 },
        bits: 64,
    });

    // The dispatcher follows the platform convention and may clobber the
    // context registers; keep them in callee-saved copies.
    vcode.push(Inst::MovRR { rd: x(19), rn: x(0), is64: true });
    vcode.push(Inst::MovRR { rd: x(20), rn: x(1), is64: true });
    vcode.push(Inst::ULoad {
        rd: VReg::phys(X17_SCRATCH),
        mem: AMode::RegOffset { rn: x(1), off: HOST_DISPATCHER_OFF },
        bits: 64,
    });
    vcode.push(Inst::CallInd { rn: VReg::phys(X17_SCRATCH) });
    vcode.push(Inst::MovRR { rd: x(0), rn: x(19), is64: true });
    vcode.push(Inst::MovRR { rd: x(1), rn: x(20), is64: true });

    // Scatter results from the buffer into ABI locations; stack results go
    // into the caller's return-overflow area.
    let caller_ret_base = incoming_base + abi.arg_stack_bytes as i64;
    for ((ty, loc), slot) in abi.results.iter().zip(&ret_slots) {
        let buf_off = (*slot * 8) as i64;
        match (ty, loc) {
            (ty, AbiLoc::Reg(reg)) if ty.is_int() => {
                vcode.push(Inst::ULoad {
                    rd: VReg::phys(*reg),
                    mem: AMode::RegOffset { rn: sp_v(), off: buf_off },
                    bits: 64,
                });
            }
            (ty, AbiLoc::Reg(reg)) => {
                vcode.push(Inst::FpuLoad {
                    rd: VReg::phys(*reg),
                    mem: AMode::RegOffset { rn: sp_v(), off: buf_off },
                    bits: ty.bits() as u8,
                });
            }
            (ty, AbiLoc::Stack { offset }) if ty.is_vector() => {
                let vscratch = VReg::phys(super::regs::V30_SCRATCH);
                vcode.push(Inst::FpuLoad {
                    rd: vscratch,
                    mem: AMode::RegOffset { rn: sp_v(), off: buf_off },
                    bits: 128,
                });
                vcode.push(Inst::FpuStore {
                    rs: vscratch,
                    mem: AMode::RegOffset { rn: sp_v(), off: caller_ret_base + *offset as i64 },
                    bits: 128,
                });
            }
            (_, AbiLoc::Stack { offset }) => {
                vcode.push(Inst::ULoad {
                    rd: scratch,
                    mem: AMode::RegOffset { rn: sp_v(), off: buf_off },
                    bits: 64,
                });
                vcode.push(Inst::Store {
                    rs: scratch,
                    mem: AMode::RegOffset { rn: sp_v(), off: caller_ret_base + *offset as i64 },
                    bits: 64,
                });
            }
        }
    }

    sp_adjust(&mut vcode, buf_bytes, false)?;
    vcode.push(Inst::LdpPost { rt: x(19), rt2: x(20) });
    vcode.push(Inst::LdpPost { rt: VReg::phys(X29_FP), rt2: VReg::phys(X30_LR) });
    vcode.push(Inst::Ret);
    Ok(vcode)
}

#[cfg(test)]
#[path = "../../tests/arm64/t_abi.rs"]
mod tests;
