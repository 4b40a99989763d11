//! Constant folding, arithmetic identities, and branch simplification.

use std::collections::HashMap;

use super::Pass;
use super::super::ir::*;
use super::super::types::Type;

pub struct ConstFold;

impl Pass for ConstFold {
    fn name(&self) -> &'static str {
        "ssa-const-fold"
    }

    fn run(&mut self, func: &mut Function) -> bool {
        let mut changed = false;

        for block_idx in 0..func.blocks.len() {
            // Block-local environment; no cross-block propagation.
            let mut env: HashMap<ValueId, (Type, u64)> = HashMap::new();
            let mut rewrites: Vec<(ValueId, ValueId)> = Vec::new();

            for inst_idx in 0..func.blocks[block_idx].insts.len() {
                let kind = func.blocks[block_idx].insts[inst_idx].kind.clone();
                let result = match func.blocks[block_idx].insts[inst_idx].results.first() {
                    Some(result) => *result,
                    None => continue,
                };

                match kind {
                    InstKind::Iconst { bits } => {
                        env.insert(result.id, (result.ty, bits));
                    }
                    InstKind::Binary { op, lhs, rhs } => {
                        if let Some(folded) = fold_binary(op, result.ty, env.get(&lhs), env.get(&rhs)) {
                            func.blocks[block_idx].insts[inst_idx].kind =
                                InstKind::Iconst { bits: folded };
                            env.insert(result.id, (result.ty, folded));
                            changed = true;
                        } else if let Some(source) = identity_operand(op, lhs, rhs, &env) {
                            // x+0, x-0, x*1, x|0, x^0, x<<0: forward the
                            // untouched operand.
                            rewrites.push((result.id, source));
                            changed = true;
                        }
                    }
                    InstKind::IntCmp { cond, lhs, rhs } => {
                        if let (Some((_, lhs_bits)), Some((_, rhs_bits))) =
                            (env.get(&lhs).copied(), env.get(&rhs).copied())
                        {
                            let value =
                                eval_int_cmp(cond, lhs_bits, rhs_bits, func.value_type(lhs));
                            func.blocks[block_idx].insts[inst_idx].kind =
                                InstKind::Iconst { bits: value as u64 };
                            env.insert(result.id, (result.ty, value as u64));
                            changed = true;
                        }
                    }
                    _ => {}
                }
            }

            for (from, to) in rewrites {
                replace_value_in_func(func, from, to);
            }

            if simplify_terminator(&mut func.blocks[block_idx].term, &env) {
                changed = true;
            }
        }

        changed
    }
}

fn truncate(ty: Type, bits: u64) -> u64 {
    match ty {
        Type::I32 | Type::F32 => bits & 0xFFFF_FFFF,
        _ => bits,
    }
}

fn fold_binary(
    op: BinaryOp,
    ty: Type,
    lhs: Option<&(Type, u64)>,
    rhs: Option<&(Type, u64)>,
) -> Option<u64> {
    if !ty.is_int() {
        return None;
    }
    let (_, lhs) = *lhs?;
    let (_, rhs) = *rhs?;
    let is32 = ty == Type::I32;

    let value = match op {
        BinaryOp::Add => lhs.wrapping_add(rhs),
        BinaryOp::Sub => lhs.wrapping_sub(rhs),
        BinaryOp::Mul => lhs.wrapping_mul(rhs),
        BinaryOp::And => lhs & rhs,
        BinaryOp::Or => lhs | rhs,
        BinaryOp::Xor => lhs ^ rhs,
        BinaryOp::Shl => {
            let amount = if is32 { rhs % 32 } else { rhs % 64 };
            lhs.wrapping_shl(amount as u32)
        }
        BinaryOp::ShrU => {
            let amount = if is32 { rhs % 32 } else { rhs % 64 };
            truncate(ty, lhs).wrapping_shr(amount as u32)
        }
        BinaryOp::ShrS => {
            let amount = if is32 { rhs % 32 } else { rhs % 64 };
            if is32 {
                ((truncate(ty, lhs) as u32 as i32) >> amount) as u32 as u64
            } else {
                ((lhs as i64) >> amount) as u64
            }
        }
        // Division folds are skipped: the guards around them are emitted
        // before this pass and folding the op would orphan them.
        _ => return None,
    };
    Some(truncate(ty, value))
}

/// `x op identity` and `identity op x` cases that forward `x` unchanged.
fn identity_operand(
    op: BinaryOp,
    lhs: ValueId,
    rhs: ValueId,
    env: &HashMap<ValueId, (Type, u64)>,
) -> Option<ValueId> {
    let lhs_const = env.get(&lhs).map(|(_, bits)| *bits);
    let rhs_const = env.get(&rhs).map(|(_, bits)| *bits);

    match op {
        BinaryOp::Add | BinaryOp::Or | BinaryOp::Xor => match (lhs_const, rhs_const) {
            (_, Some(0)) => Some(lhs),
            (Some(0), _) => Some(rhs),
            _ => None,
        },
        BinaryOp::Sub | BinaryOp::Shl | BinaryOp::ShrS | BinaryOp::ShrU => match rhs_const {
            Some(0) => Some(lhs),
            _ => None,
        },
        BinaryOp::Mul => match (lhs_const, rhs_const) {
            (_, Some(1)) => Some(lhs),
            (Some(1), _) => Some(rhs),
            _ => None,
        },
        _ => None,
    }
}

fn eval_int_cmp(cond: IntCC, lhs: u64, rhs: u64, operand_ty: Type) -> bool {
    let (lhs_s, rhs_s, lhs_u, rhs_u) = if operand_ty == Type::I32 {
        (
            lhs as u32 as i32 as i64,
            rhs as u32 as i32 as i64,
            lhs as u32 as u64,
            rhs as u32 as u64,
        )
    } else {
        (lhs as i64, rhs as i64, lhs, rhs)
    };
    match cond {
        IntCC::Eq => lhs_u == rhs_u,
        IntCC::Ne => lhs_u != rhs_u,
        IntCC::LtS => lhs_s < rhs_s,
        IntCC::LtU => lhs_u < rhs_u,
        IntCC::GtS => lhs_s > rhs_s,
        IntCC::GtU => lhs_u > rhs_u,
        IntCC::LeS => lhs_s <= rhs_s,
        IntCC::LeU => lhs_u <= rhs_u,
        IntCC::GeS => lhs_s >= rhs_s,
        IntCC::GeU => lhs_u >= rhs_u,
    }
}

/// Collapses conditional terminators whose condition is a block-local
/// constant.
fn simplify_terminator(term: &mut Terminator, env: &HashMap<ValueId, (Type, u64)>) -> bool {
    match term {
        Terminator::BrIf {
            cond,
            then_dst,
            else_dst,
        } => {
            let Some((_, bits)) = env.get(cond) else {
                return false;
            };
            let taken = if *bits != 0 {
                then_dst.clone()
            } else {
                else_dst.clone()
            };
            *term = Terminator::Jump(taken);
            true
        }
        Terminator::BrTable {
            index,
            targets,
            default,
        } => {
            let Some((_, bits)) = env.get(index) else {
                return false;
            };
            let taken = targets
                .get(*bits as usize)
                .unwrap_or(default)
                .clone();
            *term = Terminator::Jump(taken);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
#[path = "../../tests/ssa/t_const_fold.rs"]
mod tests;
