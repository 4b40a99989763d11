//! Dead value elimination.

use std::collections::HashSet;

use super::Pass;
use super::super::analysis::liveness;
use super::super::ir::{
    Function, InstKind, Instruction, ValueId, for_each_inst_use, for_each_term_use,
};

pub struct DeadValueElim;

impl Pass for DeadValueElim {
    fn name(&self) -> &'static str {
        "ssa-dce"
    }

    fn run(&mut self, func: &mut Function) -> bool {
        let live_map = liveness::analyze(func);
        let mut changed = false;

        for (block_idx, block) in func.blocks.iter_mut().enumerate() {
            // Values that must survive to block exit, plus terminator uses.
            let mut live = live_map[block_idx].live_out.clone();
            for_each_term_use(&block.term, |value| {
                live.insert(value);
            });

            let mut kept = Vec::with_capacity(block.insts.len());
            for inst in block.insts.iter().rev() {
                // Backward sweep: a def dies when nothing downstream uses it
                // and the instruction has no effects.
                if should_keep(inst, &live) {
                    for result in &inst.results {
                        live.remove(&result.id);
                    }
                    for_each_inst_use(&inst.kind, |value| {
                        live.insert(value);
                    });
                    kept.push(inst.clone());
                } else {
                    changed = true;
                }
            }

            kept.reverse();
            block.insts = kept;
        }

        changed
    }
}

fn should_keep(inst: &Instruction, live: &HashSet<ValueId>) -> bool {
    if is_side_effecting(&inst.kind) {
        return true;
    }
    inst.results.iter().any(|result| live.contains(&result.id))
        || inst.results.is_empty()
}

fn is_side_effecting(kind: &InstKind) -> bool {
    matches!(
        kind,
        InstKind::Store { .. }
            | InstKind::Call { .. }
            | InstKind::CallIndirect { .. }
            | InstKind::ExitIfTrue { .. }
    )
}

#[cfg(test)]
#[path = "../../tests/ssa/t_dce.rs"]
mod tests;
