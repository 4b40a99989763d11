//! Control-flow graph over SSA blocks.

use super::super::ir::{BlockId, Function};

/// Predecessor/successor sets plus traversal orders for one function.
pub struct Cfg {
    entry: BlockId,
    preds: Vec<Vec<BlockId>>,
    succs: Vec<Vec<BlockId>>,
}

impl Cfg {
    pub fn new(func: &Function) -> Self {
        let len = func.blocks.len();
        let mut preds = vec![Vec::new(); len];
        let mut succs = vec![Vec::new(); len];

        for block in &func.blocks {
            for target in block.term.targets() {
                push_unique(&mut succs[block.id.index()], target.block);
                push_unique(&mut preds[target.block.index()], block.id);
            }
        }

        Self {
            entry: BlockId(0),
            preds,
            succs,
        }
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn preds(&self, block: BlockId) -> &[BlockId] {
        &self.preds[block.index()]
    }

    pub fn succs(&self, block: BlockId) -> &[BlockId] {
        &self.succs[block.index()]
    }

    /// Postorder over the reachable portion of the graph.
    pub fn postorder(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.succs.len()];
        let mut order = Vec::with_capacity(self.succs.len());
        self.dfs(self.entry, &mut visited, &mut order);
        order
    }

    /// Reverse postorder over the reachable portion of the graph.
    pub fn rpo(&self) -> Vec<BlockId> {
        let mut order = self.postorder();
        order.reverse();
        order
    }

    fn dfs(&self, block: BlockId, visited: &mut [bool], order: &mut Vec<BlockId>) {
        if visited[block.index()] {
            return;
        }
        visited[block.index()] = true;
        // Successors in reverse, so the first successor ends up adjacent in
        // reverse postorder and the layouter can fall through to it.
        for succ in self.succs(block).iter().rev() {
            self.dfs(*succ, visited, order);
        }
        order.push(block);
    }

    /// Immediate dominators for reachable blocks, indexed by block.
    /// Unreachable blocks map to themselves.
    pub fn idoms(&self) -> Vec<BlockId> {
        let rpo = self.rpo();
        let mut rpo_index = vec![usize::MAX; self.succs.len()];
        for (idx, block) in rpo.iter().enumerate() {
            rpo_index[block.index()] = idx;
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; self.succs.len()];
        idom[self.entry.index()] = Some(self.entry);

        let mut changed = true;
        while changed {
            changed = false;
            for block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for pred in self.preds(*block) {
                    if idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => *pred,
                        Some(current) => intersect(current, *pred, &idom, &rpo_index),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom[block.index()] != Some(new_idom) {
                        idom[block.index()] = Some(new_idom);
                        changed = true;
                    }
                }
            }
        }

        idom.into_iter()
            .enumerate()
            .map(|(idx, dom)| dom.unwrap_or(BlockId(idx as u32)))
            .collect()
    }
}

fn intersect(
    mut a: BlockId,
    mut b: BlockId,
    idom: &[Option<BlockId>],
    rpo_index: &[usize],
) -> BlockId {
    while a != b {
        while rpo_index[a.index()] > rpo_index[b.index()] {
            a = idom[a.index()].unwrap_or(a);
        }
        while rpo_index[b.index()] > rpo_index[a.index()] {
            b = idom[b.index()].unwrap_or(b);
        }
    }
    a
}

fn push_unique(list: &mut Vec<BlockId>, block: BlockId) {
    if !list.contains(&block) {
        list.push(block);
    }
}

#[cfg(test)]
#[path = "../../tests/ssa/t_cfg.rs"]
mod tests;
