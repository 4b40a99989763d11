//! SSA optimization passes.

pub mod cleanup;
pub mod const_fold;
pub mod dce;
pub mod split_edges;

use super::ir::Function;

/// An SSA pass. Returns whether the function changed.
pub trait Pass {
    fn name(&self) -> &'static str;
    fn run(&mut self, func: &mut Function) -> bool;
}

/// The standard pass pipeline, in dependency order: dead values are removed
/// before folding so sinks are accurate, folding may turn conditional
/// branches into jumps, cleanup drops the blocks that became unreachable,
/// and critical edges are split last so the layouter sees the final CFG.
pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            passes: vec![
                Box::new(dce::DeadValueElim),
                Box::new(const_fold::ConstFold),
                Box::new(dce::DeadValueElim),
                Box::new(cleanup::RemoveUnreachable),
                Box::new(split_edges::SplitCriticalEdges),
            ],
        }
    }

    pub fn run(&mut self, func: &mut Function) {
        for pass in &mut self.passes {
            let changed = pass.run(func);
            if changed {
                tracing::trace!(pass = pass.name(), func = %func.name, "pass changed function");
            }
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
