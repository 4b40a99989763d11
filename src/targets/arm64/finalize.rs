//! Finalization: offset assignment, fixup resolution, veneer expansion,
//! byte emission.
//!
//! Two passes over the instruction list. The first assigns each node its
//! `offset_in_binary` using the encoder's length-only mode and resolves
//! label offsets; conditional branches whose displacement exceeds the
//! 19-bit range are expanded into an inverted branch over an unconditional
//! far branch, and the offsets are recomputed (bounded iteration). The
//! second pass emits bytes.

use std::collections::{HashMap, HashSet};

use crate::errors::CompileError;
use crate::targets::CompiledCode;

use super::encode::{cond_br_in_range, encode_inst, encoded_len};
use super::inst::{CondBrKind, Inst, InstId, Label, VCode};

fn invert_kind(kind: &CondBrKind) -> CondBrKind {
    match kind {
        CondBrKind::Cond(cond) => CondBrKind::Cond(cond.invert()),
        CondBrKind::Zero(reg, is64) => CondBrKind::NotZero(*reg, *is64),
        CondBrKind::NotZero(reg, is64) => CondBrKind::Zero(*reg, *is64),
    }
}

pub fn finalize(vcode: &VCode) -> Result<CompiledCode, CompileError> {
    let order = vcode.order();

    let mut expanded: HashSet<InstId> = HashSet::new();
    let mut offsets: HashMap<InstId, u32> = HashMap::new();
    let mut labels: HashMap<Label, u32> = HashMap::new();

    // Pass 1: layout, iterated until no conditional branch is out of range.
    // Each iteration can only grow distances, so expansion is monotonic and
    // the loop is bounded by the branch count.
    loop {
        offsets.clear();
        labels.clear();
        let mut offset = 0u32;
        for id in &order {
            offsets.insert(*id, offset);
            let inst = vcode.inst(*id);
            if let Inst::LabelDef { label } = inst {
                labels.insert(*label, offset);
            }
            let len = if expanded.contains(id) {
                8
            } else {
                encoded_len(inst)
            };
            offset += len;
        }

        let mut grew = false;
        for id in &order {
            if expanded.contains(id) {
                continue;
            }
            if let Inst::CondBr { label, .. } = vcode.inst(*id) {
                let target = *labels
                    .get(label)
                    .ok_or_else(|| CompileError::bug(format!("unbound label {label:?}")))?;
                let disp = target as i64 - offsets[id] as i64;
                if !cond_br_in_range(disp) {
                    expanded.insert(*id);
                    grew = true;
                }
            }
        }
        if !grew {
            break;
        }
    }

    // Pass 2: emit.
    let mut bytes = Vec::new();
    let mut call_fixups = Vec::new();
    for id in &order {
        let at = offsets[id];
        debug_assert_eq!(at as usize, bytes.len());
        let inst = vcode.inst(*id);
        let resolve = |label: Label| -> u32 {
            labels.get(&label).copied().unwrap_or_else(|| {
                debug_assert!(false, "unbound label {label:?}");
                0
            })
        };
        if expanded.contains(id) {
            let Inst::CondBr { kind, label } = inst else {
                return Err(CompileError::bug("expanded non-branch".to_string()));
            };
            // Inverted short branch over the far branch.
            let skip = at + 8;
            let inverted = Inst::CondBr {
                kind: invert_kind(kind),
                label: *label,
            };
            encode_inst(&inverted, at, &|_| skip, &mut bytes, &mut call_fixups)?;
            let far = Inst::B { label: *label };
            encode_inst(&far, at + 4, &resolve, &mut bytes, &mut call_fixups)?;
        } else {
            encode_inst(inst, at, &resolve, &mut bytes, &mut call_fixups)?;
        }
    }

    Ok(CompiledCode { bytes, call_fixups })
}

#[cfg(test)]
#[path = "../../tests/arm64/t_finalize.rs"]
mod tests;
