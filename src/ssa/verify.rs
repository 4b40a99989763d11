//! SSA structural verifier.
//!
//! Checks the invariants the passes and the backend rely on: every value has
//! exactly one definition that dominates its uses, every block ends in one
//! terminator, and branch arguments match the target's parameter list.

use std::collections::HashMap;
use std::fmt;

use super::analysis::Cfg;
use super::ir::*;
use super::types::Type;

#[derive(Debug, Clone)]
pub struct VerifyError {
    message: String,
}

impl VerifyError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for VerifyError {}

fn err(func: &Function, block: Option<BlockId>, message: impl fmt::Display) -> VerifyError {
    match block {
        Some(block) => VerifyError::new(format!(
            "ssa verify: {} block{}: {message}",
            func.name, block.0
        )),
        None => VerifyError::new(format!("ssa verify: {}: {message}", func.name)),
    }
}

/// Position of a value definition for the domination check.
#[derive(Clone, Copy, PartialEq, Eq)]
struct DefSite {
    block: BlockId,
    /// Instruction index within the block; parameters are index 0 and
    /// instruction i defines at i + 1.
    position: u32,
}

pub fn verify_function(func: &Function) -> Result<(), VerifyError> {
    if func.blocks.is_empty() {
        return Err(err(func, None, "function has no blocks"));
    }

    let mut defs: HashMap<ValueId, (DefSite, Type)> = HashMap::new();

    for block in &func.blocks {
        for param in &block.params {
            let site = DefSite {
                block: block.id,
                position: 0,
            };
            if defs.insert(param.id, (site, param.ty)).is_some() {
                return Err(err(
                    func,
                    Some(block.id),
                    format!("value v{} defined more than once", param.id.0),
                ));
            }
        }
        for (idx, inst) in block.insts.iter().enumerate() {
            for result in &inst.results {
                let site = DefSite {
                    block: block.id,
                    position: idx as u32 + 1,
                };
                if defs.insert(result.id, (site, result.ty)).is_some() {
                    return Err(err(
                        func,
                        Some(block.id),
                        format!("value v{} defined more than once", result.id.0),
                    ));
                }
            }
        }
    }

    let cfg = Cfg::new(func);
    let idoms = cfg.idoms();
    let reachable: Vec<BlockId> = cfg.rpo();

    for block in &func.blocks {
        if matches!(block.term, Terminator::Unterminated) {
            return Err(err(func, Some(block.id), "block is unterminated"));
        }

        for (idx, inst) in block.insts.iter().enumerate() {
            let mut failure = None;
            for_each_inst_use(&inst.kind, |value| {
                if failure.is_none() {
                    failure = check_use(func, &defs, &idoms, block.id, idx as u32 + 1, value).err();
                }
            });
            if let Some(error) = failure {
                return Err(error);
            }
        }

        let term_position = block.insts.len() as u32 + 1;
        let mut failure = None;
        for_each_term_use(&block.term, |value| {
            if failure.is_none() {
                failure = check_use(func, &defs, &idoms, block.id, term_position, value).err();
            }
        });
        if let Some(error) = failure {
            return Err(error);
        }

        for target in block.term.targets() {
            check_branch_args(func, &defs, block.id, target)?;
        }
    }

    // Post-pass invariant: everything the layouter will see is reachable.
    if reachable.len() != func.blocks.len() {
        return Err(err(
            func,
            None,
            format!(
                "{} unreachable block(s) remain",
                func.blocks.len() - reachable.len()
            ),
        ));
    }

    Ok(())
}

fn check_use(
    func: &Function,
    defs: &HashMap<ValueId, (DefSite, Type)>,
    idoms: &[BlockId],
    block: BlockId,
    position: u32,
    value: ValueId,
) -> Result<(), VerifyError> {
    let Some((site, _)) = defs.get(&value) else {
        return Err(err(
            func,
            Some(block),
            format!("use of undefined value v{}", value.0),
        ));
    };

    if site.block == block {
        if site.position >= position && position != 0 {
            return Err(err(
                func,
                Some(block),
                format!("value v{} used before its definition", value.0),
            ));
        }
        return Ok(());
    }

    // Walk the dominator tree from the use block to the entry.
    let mut cursor = block;
    loop {
        let dom = idoms[cursor.index()];
        if dom == site.block {
            return Ok(());
        }
        if dom == cursor {
            return Err(err(
                func,
                Some(block),
                format!(
                    "definition of v{} in block{} does not dominate its use",
                    value.0, site.block.0
                ),
            ));
        }
        cursor = dom;
    }
}

fn check_branch_args(
    func: &Function,
    defs: &HashMap<ValueId, (DefSite, Type)>,
    from: BlockId,
    target: &BranchTarget,
) -> Result<(), VerifyError> {
    let Some(dest) = func.blocks.get(target.block.index()) else {
        return Err(err(
            func,
            Some(from),
            format!("branch to missing block{}", target.block.0),
        ));
    };

    if target.args.len() != dest.params.len() {
        return Err(err(
            func,
            Some(from),
            format!(
                "block{} expects {} args, got {}",
                dest.id.0,
                dest.params.len(),
                target.args.len()
            ),
        ));
    }

    for (idx, (arg, param)) in target.args.iter().zip(&dest.params).enumerate() {
        let Some((_, arg_ty)) = defs.get(arg) else {
            return Err(err(
                func,
                Some(from),
                format!("branch arg v{} is undefined", arg.0),
            ));
        };
        if *arg_ty != param.ty {
            return Err(err(
                func,
                Some(from),
                format!(
                    "arg {idx} to block{} has type {} but parameter expects {}",
                    dest.id.0, arg_ty, param.ty
                ),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "../tests/ssa/t_verify.rs"]
mod tests;
