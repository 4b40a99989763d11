//! Critical-edge splitting.
//!
//! An edge is critical when its source has multiple successors and its
//! destination has multiple predecessors. Block arguments on such an edge
//! have nowhere to materialize their moves, so the edge gets a fresh block
//! carrying them.

use super::Pass;
use super::super::analysis::Cfg;
use super::super::ir::{Block, BlockId, Function, Terminator};

pub struct SplitCriticalEdges;

impl Pass for SplitCriticalEdges {
    fn name(&self) -> &'static str {
        "ssa-split-critical-edges"
    }

    fn run(&mut self, func: &mut Function) -> bool {
        let cfg = Cfg::new(func);
        let mut splits: Vec<(BlockId, usize)> = Vec::new();

        for block in &func.blocks {
            let succs = cfg.succs(block.id);
            if succs.len() < 2 {
                continue;
            }
            for (target_idx, target) in block.term.targets().iter().enumerate() {
                if target.args.is_empty() {
                    continue;
                }
                if cfg.preds(target.block).len() > 1 {
                    splits.push((block.id, target_idx));
                }
            }
        }

        if splits.is_empty() {
            return false;
        }

        for (source, target_idx) in splits {
            let edge_block = BlockId(func.blocks.len() as u32);
            let old_target = {
                let mut targets = func.blocks[source.index()].term.targets_mut();
                let target = &mut *targets[target_idx];
                let old = target.clone();
                target.block = edge_block;
                target.args = Vec::new();
                old
            };
            func.blocks.push(Block {
                id: edge_block,
                params: Vec::new(),
                insts: Vec::new(),
                term: Terminator::Jump(old_target),
            });
        }
        true
    }
}

#[cfg(test)]
#[path = "../../tests/ssa/t_split_edges.rs"]
mod tests;
