//! Linear block ordering for lowering.

use super::analysis::Cfg;
use super::ir::{BlockId, Function, Terminator};

/// Produces the block emission order: reverse postorder over the reachable
/// CFG. For the structured CFGs the frontend produces this places loop
/// headers before their bodies and keeps one successor of every conditional
/// adjacent, so the backend can pick the fallthrough side.
pub fn layout_blocks(func: &Function) -> Vec<BlockId> {
    let cfg = Cfg::new(func);
    cfg.rpo()
}

/// Whether `term` can fall through to `next` without an unconditional
/// branch, given the layout order.
pub fn falls_through(term: &Terminator, next: Option<BlockId>) -> bool {
    match (term, next) {
        (Terminator::Jump(target), Some(next)) => target.block == next && target.args.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
#[path = "../tests/ssa/t_layout.rs"]
mod tests;
