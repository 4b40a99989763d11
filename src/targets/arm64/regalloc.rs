//! Linear-scan register allocation over vcode.
//!
//! Liveness runs over the vcode's own block structure (labels are block
//! boundaries). Each virtual register gets one conservative interval from
//! its first definition to its last use, extended across blocks where it is
//! live-out. Values live across a call are restricted to callee-saved
//! registers; float values live across a call always spill, since generated
//! code treats every vector register as caller-saved.

use std::collections::{HashMap, HashSet};

use crate::errors::CompileError;
use crate::exec::context::exec_offsets;

use super::inst::*;
use super::regs::{
    ALLOCATABLE_FLOAT, ALLOCATABLE_INT, PhysReg, RegClass, SP, X0_EXEC_CTX, X16_SCRATCH,
    X17_SCRATCH, X29_FP, X30_LR, is_callee_saved, xreg, vreg_phys,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Reg(PhysReg),
    Slot(u32),
}

#[derive(Debug, Clone, Copy)]
struct Interval {
    vreg: VReg,
    start: u32,
    end: u32,
    crosses_call: bool,
}

pub fn run(vcode: &mut VCode) -> Result<(), CompileError> {
    let order = vcode.order();
    let mut position: HashMap<InstId, u32> = HashMap::with_capacity(order.len());
    for (pos, id) in order.iter().enumerate() {
        position.insert(*id, pos as u32);
    }

    let intervals = build_intervals(vcode, &order);
    let fixed: Vec<(PhysReg, u32, u32)> = vcode
        .fixed_ranges
        .iter()
        .map(|(reg, start, end)| (*reg, position[start], position[end]))
        .collect();

    let assignments = allocate(&intervals, &fixed);

    let spill_count = assignments
        .values()
        .filter_map(|loc| match loc {
            Location::Slot(slot) => Some(slot + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0);

    let mut saved: Vec<PhysReg> = assignments
        .values()
        .filter_map(|loc| match loc {
            Location::Reg(reg) if is_callee_saved(*reg) => Some(*reg),
            _ => None,
        })
        .collect();
    saved.sort();
    saved.dedup();

    vcode.frame.spill_slots = spill_count;
    vcode.frame.saved_regs = saved.clone();

    rewrite(vcode, &order, &assignments)?;

    let has_calls = order.iter().any(|id| vcode.inst(*id).is_call());
    emit_prologue(vcode, has_calls)?;
    emit_epilogue(vcode)?;
    resolve_frame_addresses(vcode)?;

    tracing::trace!(
        spills = vcode.frame.spill_slots,
        saved = vcode.frame.saved_regs.len(),
        "register allocation done"
    );
    Ok(())
}

/// Vcode block boundaries: a block starts at each `LabelDef` and at the
/// head of the list.
struct VBlock {
    start: u32,
    end: u32,
    succs: Vec<u32>,
}

fn build_blocks(vcode: &VCode, order: &[InstId]) -> (Vec<VBlock>, HashMap<Label, u32>) {
    let mut starts: Vec<u32> = vec![0];
    let mut label_block: HashMap<Label, u32> = HashMap::new();
    for (pos, id) in order.iter().enumerate() {
        if let Inst::LabelDef { label } = vcode.inst(*id) {
            if pos != 0 && starts.last() != Some(&(pos as u32)) {
                starts.push(pos as u32);
            }
            label_block.insert(*label, (starts.len() - 1) as u32);
        }
    }

    let mut blocks: Vec<VBlock> = Vec::with_capacity(starts.len());
    for (idx, start) in starts.iter().enumerate() {
        let end = starts
            .get(idx + 1)
            .copied()
            .unwrap_or(order.len() as u32);
        blocks.push(VBlock {
            start: *start,
            end,
            succs: Vec::new(),
        });
    }

    for (idx, block) in blocks.iter_mut().enumerate() {
        let mut falls_through = true;
        let mut targets: Vec<Label> = Vec::new();
        for pos in block.start..block.end {
            match vcode.inst(order[pos as usize]) {
                Inst::B { label } => {
                    targets.push(*label);
                    falls_through = false;
                }
                Inst::CondBr { label, .. } => targets.push(*label),
                Inst::JTSequence { targets: jt, .. } => {
                    targets.extend(jt.iter().copied());
                    falls_through = false;
                }
                Inst::Ret | Inst::ExitSequence { .. } | Inst::Brk => falls_through = false,
                _ => {}
            }
        }
        for label in targets {
            if let Some(succ) = label_block.get(&label) {
                block.succs.push(*succ);
            }
        }
        if falls_through && idx + 1 < starts.len() {
            block.succs.push((idx + 1) as u32);
        }
    }

    (blocks, label_block)
}

fn build_intervals(vcode: &VCode, order: &[InstId]) -> Vec<Interval> {
    let (blocks, _) = build_blocks(vcode, order);

    // Per-block upward-exposed uses and defs over virtual registers.
    let num_blocks = blocks.len();
    let mut uses: Vec<HashSet<VReg>> = vec![HashSet::new(); num_blocks];
    let mut defs: Vec<HashSet<VReg>> = vec![HashSet::new(); num_blocks];
    for (idx, block) in blocks.iter().enumerate() {
        for pos in block.start..block.end {
            let inst = vcode.inst(order[pos as usize]);
            inst.for_each_use(|vreg| {
                if !vreg.is_phys() && !defs[idx].contains(&vreg) {
                    uses[idx].insert(vreg);
                }
            });
            inst.for_each_def(|vreg| {
                if !vreg.is_phys() {
                    defs[idx].insert(vreg);
                }
            });
        }
    }

    let mut live_in: Vec<HashSet<VReg>> = vec![HashSet::new(); num_blocks];
    let mut live_out: Vec<HashSet<VReg>> = vec![HashSet::new(); num_blocks];
    let mut changed = true;
    while changed {
        changed = false;
        for idx in (0..num_blocks).rev() {
            let mut out = HashSet::new();
            for succ in &blocks[idx].succs {
                out.extend(live_in[*succ as usize].iter().copied());
            }
            let mut inp: HashSet<VReg> = out.difference(&defs[idx]).copied().collect();
            inp.extend(uses[idx].iter().copied());
            if out != live_out[idx] || inp != live_in[idx] {
                live_out[idx] = out;
                live_in[idx] = inp;
                changed = true;
            }
        }
    }

    let mut ranges: HashMap<VReg, (u32, u32)> = HashMap::new();
    let mut extend = |vreg: VReg, start: u32, end: u32| {
        ranges
            .entry(vreg)
            .and_modify(|range| {
                range.0 = range.0.min(start);
                range.1 = range.1.max(end);
            })
            .or_insert((start, end));
    };

    for (idx, block) in blocks.iter().enumerate() {
        for vreg in &live_in[idx] {
            extend(*vreg, block.start, block.start);
        }
        for vreg in &live_out[idx] {
            extend(*vreg, block.end, block.end);
        }
        for pos in block.start..block.end {
            let inst = vcode.inst(order[pos as usize]);
            inst.for_each_def(|vreg| {
                if !vreg.is_phys() {
                    extend(vreg, pos, pos + 1);
                }
            });
            inst.for_each_use(|vreg| {
                if !vreg.is_phys() {
                    extend(vreg, pos, pos + 1);
                }
            });
        }
    }

    let call_positions: Vec<u32> = order
        .iter()
        .enumerate()
        .filter(|(_, id)| vcode.inst(**id).is_call())
        .map(|(pos, _)| pos as u32)
        .collect();

    let mut intervals: Vec<Interval> = ranges
        .into_iter()
        .map(|(vreg, (start, end))| Interval {
            vreg,
            start,
            end,
            crosses_call: call_positions
                .iter()
                .any(|call| *call > start && *call < end),
        })
        .collect();
    intervals.sort_by_key(|iv| (iv.start, iv.end));
    intervals
}

fn allocate(
    intervals: &[Interval],
    fixed: &[(PhysReg, u32, u32)],
) -> HashMap<VReg, Location> {
    let mut assignments: HashMap<VReg, Location> = HashMap::new();
    let mut active: Vec<(Interval, PhysReg)> = Vec::new();
    let mut next_slot = 0u32;

    for interval in intervals {
        active.retain(|(held, _)| held.end > interval.start);

        let candidates: &[PhysReg] = match interval.vreg.class() {
            RegClass::Int => &ALLOCATABLE_INT,
            RegClass::Float => &ALLOCATABLE_FLOAT,
        };

        let admissible = |reg: PhysReg| {
            if interval.crosses_call && !is_callee_saved(reg) {
                return false;
            }
            !fixed.iter().any(|(fixed_reg, start, end)| {
                *fixed_reg == reg && *start <= interval.end && interval.start <= *end
            })
        };

        let in_use: HashSet<PhysReg> = active.iter().map(|(_, reg)| *reg).collect();
        let chosen = candidates
            .iter()
            .find(|reg| !in_use.contains(reg) && admissible(**reg));

        match chosen {
            Some(reg) => {
                assignments.insert(interval.vreg, Location::Reg(*reg));
                active.push((*interval, *reg));
            }
            None => {
                // Steal from the active interval that ends last, when its
                // register is admissible here; otherwise spill this one.
                let steal = active
                    .iter()
                    .enumerate()
                    .filter(|(_, (_, reg))| admissible(*reg))
                    .max_by_key(|(_, (held, _))| held.end)
                    .map(|(idx, (held, reg))| (idx, *held, *reg));
                match steal {
                    Some((idx, held, reg)) if held.end > interval.end => {
                        let slot = next_slot;
                        next_slot += 1;
                        assignments.insert(held.vreg, Location::Slot(slot));
                        active.remove(idx);
                        assignments.insert(interval.vreg, Location::Reg(reg));
                        active.push((*interval, reg));
                    }
                    _ => {
                        let slot = next_slot;
                        next_slot += 1;
                        assignments.insert(interval.vreg, Location::Slot(slot));
                    }
                }
            }
        }
    }

    assignments
}

/// Rewrites virtual registers to their assignments, inserting spill loads
/// and stores through the reserved scratch registers.
fn rewrite(
    vcode: &mut VCode,
    order: &[InstId],
    assignments: &HashMap<VReg, Location>,
) -> Result<(), CompileError> {
    const INT_SCRATCH: [PhysReg; 3] = [X16_SCRATCH, X17_SCRATCH, xreg(28)];
    const FLOAT_SCRATCH: [PhysReg; 2] = [vreg_phys(30), vreg_phys(31)];

    for id in order {
        // Collect the spilled vregs this instruction touches.
        let mut spilled: Vec<(VReg, u32, bool, bool)> = Vec::new();
        {
            let inst = vcode.inst(*id);
            let mut note = |vreg: VReg, is_use: bool, spilled: &mut Vec<(VReg, u32, bool, bool)>| {
                if vreg.is_phys() {
                    return;
                }
                if let Some(Location::Slot(slot)) = assignments.get(&vreg) {
                    if let Some(entry) = spilled.iter_mut().find(|entry| entry.0 == vreg) {
                        if is_use {
                            entry.2 = true;
                        } else {
                            entry.3 = true;
                        }
                    } else {
                        spilled.push((vreg, *slot, is_use, !is_use));
                    }
                }
            };
            inst.for_each_use(|vreg| note(vreg, true, &mut spilled));
            inst.for_each_def(|vreg| note(vreg, false, &mut spilled));
        }

        let mut int_scratch = INT_SCRATCH.iter();
        let mut float_scratch = FLOAT_SCRATCH.iter();
        let mut scratch_map: HashMap<VReg, PhysReg> = HashMap::new();
        for (vreg, _, _, _) in &spilled {
            let scratch = match vreg.class() {
                RegClass::Int => int_scratch.next(),
                RegClass::Float => float_scratch.next(),
            }
            .ok_or_else(|| {
                CompileError::bug("ran out of spill scratch registers".to_string())
            })?;
            scratch_map.insert(*vreg, *scratch);
        }

        // Map all register slots.
        vcode.inst_mut(*id).map_regs(|vreg| {
            if vreg.is_phys() {
                return;
            }
            if let Some(scratch) = scratch_map.get(vreg) {
                *vreg = VReg::phys(*scratch);
            } else if let Some(Location::Reg(reg)) = assignments.get(vreg) {
                *vreg = VReg::phys(*reg);
            }
        });

        // Reloads before, spill stores after.
        for (vreg, slot, is_use, is_def) in &spilled {
            let scratch = VReg::phys(scratch_map[vreg]);
            let mem = AMode::SpillSlot { slot: *slot };
            if *is_use {
                let load = match vreg.class() {
                    RegClass::Int => Inst::ULoad {
                        rd: scratch,
                        mem,
                        bits: 64,
                    },
                    RegClass::Float => Inst::FpuLoad {
                        rd: scratch,
                        mem,
                        bits: 128,
                    },
                };
                vcode.insert_before(*id, load);
            }
            if *is_def {
                let store = match vreg.class() {
                    RegClass::Int => Inst::Store {
                        rs: scratch,
                        mem,
                        bits: 64,
                    },
                    RegClass::Float => Inst::FpuStore {
                        rs: scratch,
                        mem,
                        bits: 128,
                    },
                };
                vcode.insert_after(*id, store);
            }
        }
    }

    Ok(())
}

fn sp_adjust_insts(bytes: u32, down: bool) -> Result<Vec<Inst>, CompileError> {
    let mut insts = Vec::new();
    if bytes == 0 {
        return Ok(insts);
    }
    let op = if down { AluOp::Sub } else { AluOp::Add };
    let low = bytes & 0xFFF;
    let high = bytes >> 12;
    if high > 0xFFF {
        return Err(CompileError::bug(format!("frame size {bytes:#x} too large")));
    }
    let sp = VReg::phys(SP);
    if high != 0 {
        insts.push(Inst::AluRRImm12 {
            op,
            rd: sp,
            rn: sp,
            imm12: high as u16,
            shift12: true,
            is64: true,
        });
    }
    if low != 0 {
        insts.push(Inst::AluRRImm12 {
            op,
            rd: sp,
            rn: sp,
            imm12: low as u16,
            shift12: false,
            is64: true,
        });
    }
    Ok(insts)
}

/// Replaces the frame-reservation placeholder with the real prologue:
/// stack check, FP/LR push, callee-saved pushes, SP reservation.
fn emit_prologue(vcode: &mut VCode, has_calls: bool) -> Result<(), CompileError> {
    let reserve = vcode
        .order()
        .into_iter()
        .find(|id| matches!(vcode.inst(*id), Inst::ReserveFrame))
        .ok_or_else(|| CompileError::bug("missing frame-reservation placeholder".to_string()))?;

    let reserved = vcode.frame.reserved_bytes();
    let saved = vcode.frame.saved_regs.clone();
    let total = reserved + saved.len() as u32 * 16 + 16;

    let mut prologue: Vec<Inst> = Vec::new();

    if vcode.stack_check && (total > 16 || has_calls) {
        let overflow = vcode
            .stack_check_label
            .ok_or_else(|| CompileError::bug("stack check without overflow label".to_string()))?;
        let scratch = VReg::phys(X16_SCRATCH);
        let probe = VReg::phys(X17_SCRATCH);
        prologue.push(Inst::ULoad {
            rd: scratch,
            mem: AMode::RegOffset {
                rn: VReg::phys(X0_EXEC_CTX),
                off: exec_offsets::STACK_LIMIT as i64,
            },
            bits: 64,
        });
        // probe = sp - total; trap when it dips below the limit.
        prologue.push(Inst::AluRRImm12 {
            op: AluOp::Add,
            rd: probe,
            rn: VReg::phys(SP),
            imm12: 0,
            shift12: false,
            is64: true,
        });
        for inst in sp_adjust_insts(total, true)? {
            // Rewrite the SP adjustments to run on the probe register.
            if let Inst::AluRRImm12 { op, imm12, shift12, is64, .. } = inst {
                prologue.push(Inst::AluRRImm12 {
                    op,
                    rd: probe,
                    rn: probe,
                    imm12,
                    shift12,
                    is64,
                });
            }
        }
        prologue.push(Inst::Cmp {
            rn: probe,
            rm: scratch,
            is64: true,
        });
        prologue.push(Inst::CondBr {
            kind: CondBrKind::Cond(Cond::Lo),
            label: overflow,
        });
    }

    prologue.push(Inst::StpPre {
        rt: VReg::phys(X29_FP),
        rt2: VReg::phys(X30_LR),
    });
    // Keep the frame chain intact for trap reporting.
    prologue.push(Inst::AluRRImm12 {
        op: AluOp::Add,
        rd: VReg::phys(X29_FP),
        rn: VReg::phys(SP),
        imm12: 0,
        shift12: false,
        is64: true,
    });
    for reg in &saved {
        prologue.push(Inst::Store {
            rs: VReg::phys(*reg),
            mem: AMode::PreIndexed {
                rn: VReg::phys(SP),
                simm9: -16,
            },
            bits: 64,
        });
    }
    prologue.extend(sp_adjust_insts(reserved, true)?);

    let mut iter = prologue.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| CompileError::bug("empty prologue".to_string()))?;
    *vcode.inst_mut(reserve) = first;
    let mut cursor = reserve;
    for inst in iter {
        cursor = vcode.insert_after(cursor, inst);
    }
    Ok(())
}

/// Emits the tear-down sequence after the shared epilogue label.
fn emit_epilogue(vcode: &mut VCode) -> Result<(), CompileError> {
    let label = vcode
        .epilogue_label
        .ok_or_else(|| CompileError::bug("missing epilogue label".to_string()))?;
    let at = vcode
        .order()
        .into_iter()
        .find(|id| matches!(vcode.inst(*id), Inst::LabelDef { label: l } if *l == label))
        .ok_or_else(|| CompileError::bug("epilogue label not in instruction stream".to_string()))?;

    let mut epilogue: Vec<Inst> = Vec::new();
    epilogue.extend(sp_adjust_insts(vcode.frame.reserved_bytes(), false)?);
    for reg in vcode.frame.saved_regs.clone().iter().rev() {
        epilogue.push(Inst::ULoad {
            rd: VReg::phys(*reg),
            mem: AMode::PostIndexed {
                rn: VReg::phys(SP),
                simm9: 16,
            },
            bits: 64,
        });
    }
    epilogue.push(Inst::LdpPost {
        rt: VReg::phys(X29_FP),
        rt2: VReg::phys(X30_LR),
    });
    epilogue.push(Inst::Ret);

    let mut cursor = at;
    for inst in epilogue {
        cursor = vcode.insert_after(cursor, inst);
    }
    Ok(())
}

/// Rewrites spill-slot and incoming-argument pseudo-addresses now that the
/// frame layout is final.
fn resolve_frame_addresses(vcode: &mut VCode) -> Result<(), CompileError> {
    let reserved = vcode.frame.reserved_bytes();
    let incoming_base = reserved as i64 + vcode.frame.saved_regs.len() as i64 * 16 + 16;
    let frame = vcode.frame.clone();

    for id in vcode.order() {
        let mut patch: Option<AMode> = None;
        match vcode.inst(id) {
            Inst::ULoad { mem, .. }
            | Inst::SLoad { mem, .. }
            | Inst::Store { mem, .. }
            | Inst::FpuLoad { mem, .. }
            | Inst::FpuStore { mem, .. } => match mem {
                AMode::SpillSlot { slot } => {
                    patch = Some(AMode::RegOffset {
                        rn: VReg::phys(SP),
                        off: frame.spill_slot_offset(*slot),
                    });
                }
                AMode::IncomingArg { offset } => {
                    patch = Some(AMode::RegOffset {
                        rn: VReg::phys(SP),
                        off: incoming_base + *offset as i64,
                    });
                }
                _ => {}
            },
            _ => {}
        }
        if let Some(new_mem) = patch {
            match vcode.inst_mut(id) {
                Inst::ULoad { mem, .. }
                | Inst::SLoad { mem, .. }
                | Inst::Store { mem, .. }
                | Inst::FpuLoad { mem, .. }
                | Inst::FpuStore { mem, .. } => *mem = new_mem,
                _ => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/arm64/t_regalloc.rs"]
mod tests;
