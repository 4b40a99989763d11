//! SSA liveness analysis.

use std::collections::HashSet;

use super::super::ir::{Function, ValueId, for_each_inst_use, for_each_term_use};
use super::cfg::Cfg;

#[derive(Debug, Clone, Default)]
pub struct LiveSet {
    pub live_in: HashSet<ValueId>,
    pub live_out: HashSet<ValueId>,
}

/// Per-block live sets, indexed by block.
pub type LiveMap = Vec<LiveSet>;

/// Computes block-level liveness with a backward worklist pass.
pub fn analyze(func: &Function) -> LiveMap {
    let cfg = Cfg::new(func);
    let len = func.blocks.len();

    // Per-block upward-exposed uses and defs.
    let mut uses: Vec<HashSet<ValueId>> = vec![HashSet::new(); len];
    let mut defs: Vec<HashSet<ValueId>> = vec![HashSet::new(); len];
    for block in &func.blocks {
        let idx = block.id.index();
        for param in &block.params {
            defs[idx].insert(param.id);
        }
        for inst in &block.insts {
            for_each_inst_use(&inst.kind, |value| {
                if !defs[idx].contains(&value) {
                    uses[idx].insert(value);
                }
            });
            for result in &inst.results {
                defs[idx].insert(result.id);
            }
        }
        for_each_term_use(&block.term, |value| {
            if !defs[idx].contains(&value) {
                uses[idx].insert(value);
            }
        });
    }

    let mut live: LiveMap = vec![LiveSet::default(); len];
    let mut changed = true;
    while changed {
        changed = false;
        for block in cfg.postorder() {
            let idx = block.index();

            let mut out = HashSet::new();
            for succ in cfg.succs(block) {
                out.extend(live[succ.index()].live_in.iter().copied());
            }

            let mut live_in: HashSet<ValueId> =
                out.difference(&defs[idx]).copied().collect();
            live_in.extend(uses[idx].iter().copied());

            if out != live[idx].live_out || live_in != live[idx].live_in {
                live[idx].live_out = out;
                live[idx].live_in = live_in;
                changed = true;
            }
        }
    }

    live
}
