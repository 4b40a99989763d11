//! SSA function builder.
//!
//! Blocks move through `Open` -> `Closed` -> `Sealed`. Variable reads in a
//! block whose predecessor set is still growing insert placeholder block
//! parameters; sealing the block resolves each placeholder against the final
//! predecessors and elides it by rewrite when every predecessor agrees on a
//! single value.

use std::collections::HashMap;

use super::ir::*;
use super::types::Type;

/// A mutable local variable, pre-SSA. Wasm locals map to these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Var(pub u32);

impl Var {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    /// Accepting instructions.
    Open,
    /// Terminated, but predecessors may still be added.
    Closed,
    /// Terminated and all predecessors known.
    Sealed,
}

pub struct FunctionBuilder {
    func: Function,
    var_types: Vec<Type>,
    /// Per-block variable definitions.
    defs: Vec<HashMap<Var, ValueId>>,
    /// Placeholder params awaiting resolution at seal time.
    incomplete: Vec<Vec<(Var, ValueId)>>,
    preds: Vec<Vec<BlockId>>,
    states: Vec<BlockState>,
    /// Per-block constant pool: (block, type, bits) -> value.
    const_pool: HashMap<(BlockId, Type, u64), ValueId>,
    current: BlockId,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, index: u32, sig: Signature) -> Self {
        Self {
            func: Function {
                name: name.into(),
                index,
                sig,
                blocks: Vec::new(),
                value_types: Vec::new(),
            },
            var_types: Vec::new(),
            defs: Vec::new(),
            incomplete: Vec::new(),
            preds: Vec::new(),
            states: Vec::new(),
            const_pool: HashMap::new(),
            current: BlockId(0),
        }
    }

    /// Declares a mutable variable before or during construction.
    pub fn declare_var(&mut self, ty: Type) -> Var {
        let var = Var(self.var_types.len() as u32);
        self.var_types.push(ty);
        var
    }

    pub fn var_type(&self, var: Var) -> Type {
        self.var_types[var.index()]
    }

    /// Allocates a new basic block in the `Open` state and returns its ID.
    /// The first allocated block is the entry block.
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.func.blocks.len() as u32);
        self.func.blocks.push(Block {
            id,
            params: Vec::new(),
            insts: Vec::new(),
            term: Terminator::Unterminated,
        });
        self.defs.push(HashMap::new());
        self.incomplete.push(Vec::new());
        self.preds.push(Vec::new());
        self.states.push(BlockState::Open);
        id
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn is_sealed(&self, block: BlockId) -> bool {
        self.states[block.index()] == BlockState::Sealed
    }

    pub fn is_terminated(&self, block: BlockId) -> bool {
        !matches!(self.func.block(block).term, Terminator::Unterminated)
    }

    fn alloc_value(&mut self, ty: Type) -> ValueId {
        let id = ValueId(self.func.value_types.len() as u32);
        self.func.value_types.push(ty);
        id
    }

    /// Appends an explicit block parameter (used for function entry and
    /// control-join blocks) and returns its value. Must run before any
    /// predecessor edge exists, so argument positions stay aligned.
    pub fn add_block_param(&mut self, block: BlockId, ty: Type) -> ValueId {
        assert!(
            self.preds[block.index()].is_empty(),
            "BUG: adding a parameter to a block that already has predecessors"
        );
        self.push_param(block, ty)
    }

    fn push_param(&mut self, block: BlockId, ty: Type) -> ValueId {
        let id = self.alloc_value(ty);
        self.func.blocks[block.index()]
            .params
            .push(ValueDef { id, ty });
        id
    }

    pub fn block_params(&self, block: BlockId) -> &[ValueDef] {
        &self.func.block(block).params
    }

    pub fn pred_count(&self, block: BlockId) -> usize {
        self.preds[block.index()].len()
    }

    pub fn value_type(&self, value: ValueId) -> Type {
        self.func.value_type(value)
    }

    /// Appends an instruction to the current block; returns its results.
    /// Sealing restricts the predecessor set, not the body, so appending to
    /// a sealed block is fine as long as it has no terminator yet.
    pub fn append(&mut self, kind: InstKind, result_types: &[Type]) -> Vec<ValueId> {
        let block = self.current;
        assert!(
            !self.is_terminated(block),
            "BUG: appending to a terminated block {block:?}"
        );
        let results: Vec<ValueDef> = result_types
            .iter()
            .map(|ty| ValueDef {
                id: self.alloc_value(*ty),
                ty: *ty,
            })
            .collect();
        let ids = results.iter().map(|def| def.id).collect();
        self.func.blocks[block.index()]
            .insts
            .push(Instruction { results, kind });
        ids
    }

    /// Appends a single-result instruction and returns its value.
    pub fn append1(&mut self, kind: InstKind, ty: Type) -> ValueId {
        self.append(kind, &[ty])[0]
    }

    /// Interns an integer or float constant within the current block.
    pub fn iconst(&mut self, ty: Type, bits: u64) -> ValueId {
        let key = (self.current, ty, bits);
        if let Some(value) = self.const_pool.get(&key) {
            return *value;
        }
        let value = self.append1(InstKind::Iconst { bits }, ty);
        self.const_pool.insert(key, value);
        value
    }

    /// Sets the terminator of the current block and records predecessor
    /// edges. The block moves to `Closed`.
    pub fn terminate(&mut self, term: Terminator) {
        let block = self.current;
        assert!(
            !self.is_terminated(block),
            "BUG: block {block:?} already terminated"
        );
        for target in term.targets() {
            let succ = target.block;
            assert!(
                self.states[succ.index()] != BlockState::Sealed,
                "BUG: adding predecessor to sealed block {succ:?}"
            );
            // Multiplicity is irrelevant: edge argument patching walks every
            // matching target of a predecessor's terminator.
            if !self.preds[succ.index()].contains(&block) {
                self.preds[succ.index()].push(block);
            }
        }
        self.func.blocks[block.index()].term = term;
        // Closed blocks reject further instructions; the Open check in
        // `append` keys off the terminator, so only flip the state flag.
        if self.states[block.index()] == BlockState::Open {
            self.states[block.index()] = BlockState::Closed;
        }
    }

    /// Defines `var` in the current block.
    pub fn def_var(&mut self, var: Var, value: ValueId) {
        self.defs[self.current.index()].insert(var, value);
    }

    /// Reads `var` in the current block, inserting block parameters through
    /// unsealed or multi-predecessor blocks as needed.
    pub fn use_var(&mut self, var: Var) -> ValueId {
        self.use_var_in(var, self.current)
    }

    fn use_var_in(&mut self, var: Var, block: BlockId) -> ValueId {
        if let Some(value) = self.defs[block.index()].get(&var) {
            return *value;
        }

        if self.states[block.index()] != BlockState::Sealed {
            // Place a parameter now; seal_block fills in the edge arguments.
            let ty = self.var_type(var);
            let value = self.push_param(block, ty);
            self.incomplete[block.index()].push((var, value));
            self.defs[block.index()].insert(var, value);
            return value;
        }

        let preds = self.preds[block.index()].clone();
        if preds.len() == 1 {
            let value = self.use_var_in(var, preds[0]);
            self.defs[block.index()].insert(var, value);
            return value;
        }

        // Multiple sealed predecessors: introduce a parameter first so a
        // loop through this block resolves to it, then fill the edges.
        let ty = self.var_type(var);
        let value = self.push_param(block, ty);
        self.defs[block.index()].insert(var, value);
        self.fill_param_edges(block, var);
        self.try_elide_param(block, value)
    }

    /// Seals `block`: the predecessor set is final. Resolves every
    /// placeholder parameter recorded by `use_var`.
    pub fn seal_block(&mut self, block: BlockId) {
        assert!(
            self.states[block.index()] != BlockState::Sealed,
            "BUG: block {block:?} sealed twice"
        );
        let pending = std::mem::take(&mut self.incomplete[block.index()]);
        self.states[block.index()] = BlockState::Sealed;
        for (var, value) in pending {
            self.fill_param_edges(block, var);
            self.try_elide_param(block, value);
        }
    }

    /// True once every block has been sealed; checked before passes run.
    pub fn all_sealed(&self) -> bool {
        self.states.iter().all(|state| *state == BlockState::Sealed)
    }

    /// Computes the variable's value in every predecessor and appends it as
    /// a branch argument on each edge into `block`.
    fn fill_param_edges(&mut self, block: BlockId, var: Var) {
        let preds = self.preds[block.index()].clone();
        for pred in preds {
            let arg = self.use_var_in(var, pred);
            for target in self.func.blocks[pred.index()].term.targets_mut() {
                if target.block == block {
                    target.args.push(arg);
                }
            }
        }
    }

    /// If every incoming argument for the last-added parameter is the same
    /// value (or the parameter itself), removes the parameter and rewrites
    /// its uses.
    fn try_elide_param(&mut self, block: BlockId, param: ValueId) -> ValueId {
        let position = match self.func.blocks[block.index()]
            .params
            .iter()
            .position(|def| def.id == param)
        {
            Some(position) => position,
            None => return param,
        };

        let mut unique: Option<ValueId> = None;
        for pred in &self.preds[block.index()] {
            for target in self.func.blocks[pred.index()].term.targets() {
                if target.block != block {
                    continue;
                }
                let arg = target.args[position];
                if arg == param {
                    continue;
                }
                match unique {
                    None => unique = Some(arg),
                    Some(existing) if existing == arg => {}
                    Some(_) => return param,
                }
            }
        }

        let Some(replacement) = unique else {
            return param;
        };

        // Drop the parameter and the matching argument on every edge, then
        // rewrite remaining uses.
        self.func.blocks[block.index()].params.remove(position);
        let preds = self.preds[block.index()].clone();
        for pred in preds {
            for target in self.func.blocks[pred.index()].term.targets_mut() {
                if target.block == block {
                    target.args.remove(position);
                }
            }
        }
        replace_value_in_func(&mut self.func, param, replacement);
        for defs in &mut self.defs {
            for value in defs.values_mut() {
                if *value == param {
                    *value = replacement;
                }
            }
        }
        replacement
    }

    /// Finalizes construction. Every block must be sealed and terminated.
    pub fn finish(self) -> Function {
        debug_assert!(self.all_sealed(), "BUG: unsealed blocks at finish");
        self.func
    }

    pub fn func(&self) -> &Function {
        &self.func
    }
}

#[cfg(test)]
#[path = "../tests/ssa/t_builder.rs"]
mod tests;
