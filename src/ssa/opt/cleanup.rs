//! Unreachable-block removal.

use std::collections::HashMap;

use super::Pass;
use super::super::analysis::Cfg;
use super::super::ir::{BlockId, Function};

pub struct RemoveUnreachable;

impl Pass for RemoveUnreachable {
    fn name(&self) -> &'static str {
        "ssa-remove-unreachable"
    }

    fn run(&mut self, func: &mut Function) -> bool {
        let cfg = Cfg::new(func);
        let mut reachable = vec![false; func.blocks.len()];
        for block in cfg.rpo() {
            reachable[block.index()] = true;
        }
        if reachable.iter().all(|flag| *flag) {
            return false;
        }

        // Compact the block array and renumber IDs.
        let mut remap: HashMap<BlockId, BlockId> = HashMap::new();
        let mut kept = Vec::new();
        for block in std::mem::take(&mut func.blocks) {
            if reachable[block.id.index()] {
                let new_id = BlockId(kept.len() as u32);
                remap.insert(block.id, new_id);
                kept.push(block);
            }
        }
        for (idx, block) in kept.iter_mut().enumerate() {
            block.id = BlockId(idx as u32);
            for target in block.term.targets_mut() {
                target.block = remap[&target.block];
            }
        }
        func.blocks = kept;
        true
    }
}

#[cfg(test)]
#[path = "../../tests/ssa/t_cleanup.rs"]
mod tests;
