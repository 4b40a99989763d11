//! SSA data model.
//!
//! Values and blocks are u32 IDs into per-function arenas. Each value is
//! defined exactly once, either as a block parameter or as an instruction
//! result; parameter passing between blocks uses block arguments instead of
//! phi nodes.

use std::fmt;

use crate::exec::context::ExitCode;

use super::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

impl ValueId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueDef {
    pub id: ValueId,
    pub ty: Type,
}

/// Function signature at the SSA level. The execution-context and
/// module-context pointers are implicit leading arguments supplied by the
/// calling convention, not listed here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub params: Vec<Type>,
    pub results: Vec<Type>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    RemS,
    RemU,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Rotl,
    Rotr,
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Fmin,
    Fmax,
    Fcopysign,
}

impl BinaryOp {
    pub fn is_float(self) -> bool {
        matches!(
            self,
            Self::Fadd | Self::Fsub | Self::Fmul | Self::Fdiv | Self::Fmin | Self::Fmax | Self::Fcopysign
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Clz,
    Ctz,
    Popcnt,
    Fneg,
    Fabs,
    Fsqrt,
    Ceil,
    Floor,
    Trunc,
    Nearest,
}

/// Integer comparison conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntCC {
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,
}

impl IntCC {
    pub fn inverse(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::LtS => Self::GeS,
            Self::LtU => Self::GeU,
            Self::GtS => Self::LeS,
            Self::GtU => Self::LeU,
            Self::LeS => Self::GtS,
            Self::LeU => Self::GtU,
            Self::GeS => Self::LtS,
            Self::GeU => Self::LtU,
        }
    }
}

/// Float comparison conditions. All are "ordered" except `Ne`, which is true
/// on unordered operands, matching Wasm semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatCC {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

/// Vector lane shapes for the v128 subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneShape {
    I8x16,
    I16x8,
    I32x4,
    I64x2,
    F32x4,
    F64x2,
}

impl LaneShape {
    pub fn lane_bits(self) -> u32 {
        match self {
            Self::I8x16 => 8,
            Self::I16x8 => 16,
            Self::I32x4 | Self::F32x4 => 32,
            Self::I64x2 | Self::F64x2 => 64,
        }
    }

    pub fn lane_count(self) -> u32 {
        128 / self.lane_bits()
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32x4 | Self::F64x2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VBinaryOp {
    And,
    AndNot,
    Or,
    Xor,
    Add,
    Sub,
}

/// How a load widens its memory operand into the result type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFlavor {
    /// Load exactly `result.bits()` bits.
    Plain,
    /// Load `bytes` bytes and extend to the result type.
    Ext { bytes: u8, signed: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    /// Integer or float constant, by bit pattern. The result type decides
    /// the interpretation.
    Iconst { bits: u64 },
    Vconst { lo: u64, hi: u64 },
    /// The execution-context pointer (implicit first argument).
    ExecCtx,
    /// The module-context pointer (implicit second argument).
    ModuleCtx,
    Binary { op: BinaryOp, lhs: ValueId, rhs: ValueId },
    Unary { op: UnaryOp, arg: ValueId },
    IntCmp { cond: IntCC, lhs: ValueId, rhs: ValueId },
    FloatCmp { cond: FloatCC, lhs: ValueId, rhs: ValueId },
    /// Sign- or zero-extend the low `from_bits` of `arg` to the result type.
    Extend { arg: ValueId, from_bits: u8, signed: bool },
    /// Wrap an i64 to i32.
    Reduce { arg: ValueId },
    /// Float to integer conversion. Non-saturating variants are preceded by
    /// explicit range checks emitted by the frontend, so the conversion
    /// itself never traps.
    FcvtToInt { arg: ValueId, signed: bool, saturating: bool },
    FcvtFromInt { arg: ValueId, signed: bool },
    Fpromote { arg: ValueId },
    Fdemote { arg: ValueId },
    /// Same-width reinterpretation between int and float.
    Bitcast { arg: ValueId },
    Select { cond: ValueId, if_true: ValueId, if_false: ValueId },
    Load { addr: ValueId, offset: u32, flavor: LoadFlavor },
    Store { addr: ValueId, value: ValueId, offset: u32, bytes: u8 },
    Splat { arg: ValueId, lanes: LaneShape },
    ExtractLane { arg: ValueId, lanes: LaneShape, lane: u8, signed: bool },
    VBinary { op: VBinaryOp, lanes: LaneShape, lhs: ValueId, rhs: ValueId },
    /// Direct call to a function in the same module.
    Call { func: u32, sig: u32, args: Vec<ValueId> },
    /// Indirect call through a resolved code pointer, switching the
    /// module-context register to `ctx` for the duration of the call.
    CallIndirect { code: ValueId, ctx: ValueId, sig: u32, args: Vec<ValueId> },
    /// Conditional trap: executes the exit sequence when `cond` is nonzero.
    ExitIfTrue { cond: ValueId, code: ExitCode },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub results: Vec<ValueDef>,
    pub kind: InstKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BranchTarget {
    pub block: BlockId,
    pub args: Vec<ValueId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Jump(BranchTarget),
    BrIf {
        cond: ValueId,
        then_dst: BranchTarget,
        else_dst: BranchTarget,
    },
    BrTable {
        index: ValueId,
        targets: Vec<BranchTarget>,
        default: BranchTarget,
    },
    Return {
        values: Vec<ValueId>,
    },
    /// Unconditional trap or explicit `unreachable`.
    Exit {
        code: ExitCode,
    },
    /// Builder-internal sentinel; never survives construction.
    Unterminated,
}

impl Terminator {
    pub fn targets(&self) -> Vec<&BranchTarget> {
        match self {
            Self::Jump(target) => vec![target],
            Self::BrIf {
                then_dst, else_dst, ..
            } => vec![then_dst, else_dst],
            Self::BrTable {
                targets, default, ..
            } => {
                let mut out: Vec<&BranchTarget> = targets.iter().collect();
                out.push(default);
                out
            }
            Self::Return { .. } | Self::Exit { .. } | Self::Unterminated => Vec::new(),
        }
    }

    pub fn targets_mut(&mut self) -> Vec<&mut BranchTarget> {
        match self {
            Self::Jump(target) => vec![target],
            Self::BrIf {
                then_dst, else_dst, ..
            } => vec![then_dst, else_dst],
            Self::BrTable {
                targets, default, ..
            } => {
                let mut out: Vec<&mut BranchTarget> = targets.iter_mut().collect();
                out.push(default);
                out
            }
            Self::Return { .. } | Self::Exit { .. } | Self::Unterminated => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub params: Vec<ValueDef>,
    pub insts: Vec<Instruction>,
    pub term: Terminator,
}

#[derive(Debug, Clone, Default)]
pub struct Function {
    pub name: String,
    /// Function index within the module.
    pub index: u32,
    pub sig: Signature,
    pub blocks: Vec<Block>,
    /// Value arena: type of every allocated value, indexed by `ValueId`.
    pub value_types: Vec<Type>,
}

impl Function {
    pub fn value_type(&self, value: ValueId) -> Type {
        self.value_types[value.index()]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }
}

/// Visits each SSA value used by an instruction.
pub fn for_each_inst_use(kind: &InstKind, mut f: impl FnMut(ValueId)) {
    match kind {
        InstKind::Iconst { .. }
        | InstKind::Vconst { .. }
        | InstKind::ExecCtx
        | InstKind::ModuleCtx => {}
        InstKind::Binary { lhs, rhs, .. }
        | InstKind::IntCmp { lhs, rhs, .. }
        | InstKind::FloatCmp { lhs, rhs, .. }
        | InstKind::VBinary { lhs, rhs, .. } => {
            f(*lhs);
            f(*rhs);
        }
        InstKind::Unary { arg, .. }
        | InstKind::Extend { arg, .. }
        | InstKind::Reduce { arg }
        | InstKind::FcvtToInt { arg, .. }
        | InstKind::FcvtFromInt { arg, .. }
        | InstKind::Fpromote { arg }
        | InstKind::Fdemote { arg }
        | InstKind::Bitcast { arg }
        | InstKind::Splat { arg, .. }
        | InstKind::ExtractLane { arg, .. } => f(*arg),
        InstKind::Select {
            cond,
            if_true,
            if_false,
        } => {
            f(*cond);
            f(*if_true);
            f(*if_false);
        }
        InstKind::Load { addr, .. } => f(*addr),
        InstKind::Store { addr, value, .. } => {
            f(*addr);
            f(*value);
        }
        InstKind::Call { args, .. } => {
            for arg in args {
                f(*arg);
            }
        }
        InstKind::CallIndirect {
            code, ctx, args, ..
        } => {
            f(*code);
            f(*ctx);
            for arg in args {
                f(*arg);
            }
        }
        InstKind::ExitIfTrue { cond, .. } => f(*cond),
    }
}

/// Visits each SSA value used by a terminator, including branch arguments.
pub fn for_each_term_use(term: &Terminator, mut f: impl FnMut(ValueId)) {
    match term {
        Terminator::Jump(target) => {
            for arg in &target.args {
                f(*arg);
            }
        }
        Terminator::BrIf {
            cond,
            then_dst,
            else_dst,
        } => {
            f(*cond);
            for arg in then_dst.args.iter().chain(&else_dst.args) {
                f(*arg);
            }
        }
        Terminator::BrTable {
            index,
            targets,
            default,
        } => {
            f(*index);
            for target in targets.iter().chain(std::iter::once(default)) {
                for arg in &target.args {
                    f(*arg);
                }
            }
        }
        Terminator::Return { values } => {
            for value in values {
                f(*value);
            }
        }
        Terminator::Exit { .. } | Terminator::Unterminated => {}
    }
}

/// Replaces all uses of `from` with `to` in an instruction.
pub fn replace_value_in_inst(kind: &mut InstKind, from: ValueId, to: ValueId) {
    let replace = |value: &mut ValueId| {
        if *value == from {
            *value = to;
        }
    };

    match kind {
        InstKind::Iconst { .. }
        | InstKind::Vconst { .. }
        | InstKind::ExecCtx
        | InstKind::ModuleCtx => {}
        InstKind::Binary { lhs, rhs, .. }
        | InstKind::IntCmp { lhs, rhs, .. }
        | InstKind::FloatCmp { lhs, rhs, .. }
        | InstKind::VBinary { lhs, rhs, .. } => {
            replace(lhs);
            replace(rhs);
        }
        InstKind::Unary { arg, .. }
        | InstKind::Extend { arg, .. }
        | InstKind::Reduce { arg }
        | InstKind::FcvtToInt { arg, .. }
        | InstKind::FcvtFromInt { arg, .. }
        | InstKind::Fpromote { arg }
        | InstKind::Fdemote { arg }
        | InstKind::Bitcast { arg }
        | InstKind::Splat { arg, .. }
        | InstKind::ExtractLane { arg, .. } => replace(arg),
        InstKind::Select {
            cond,
            if_true,
            if_false,
        } => {
            replace(cond);
            replace(if_true);
            replace(if_false);
        }
        InstKind::Load { addr, .. } => replace(addr),
        InstKind::Store { addr, value, .. } => {
            replace(addr);
            replace(value);
        }
        InstKind::Call { args, .. } => {
            for arg in args {
                replace(arg);
            }
        }
        InstKind::CallIndirect {
            code, ctx, args, ..
        } => {
            replace(code);
            replace(ctx);
            for arg in args {
                replace(arg);
            }
        }
        InstKind::ExitIfTrue { cond, .. } => replace(cond),
    }
}

/// Replaces all uses of `from` with `to` in a terminator.
pub fn replace_value_in_term(term: &mut Terminator, from: ValueId, to: ValueId) {
    let replace = |value: &mut ValueId| {
        if *value == from {
            *value = to;
        }
    };

    match term {
        Terminator::Jump(target) => {
            for arg in &mut target.args {
                replace(arg);
            }
        }
        Terminator::BrIf {
            cond,
            then_dst,
            else_dst,
        } => {
            replace(cond);
            for arg in then_dst.args.iter_mut().chain(&mut else_dst.args) {
                replace(arg);
            }
        }
        Terminator::BrTable {
            index,
            targets,
            default,
        } => {
            replace(index);
            for target in targets.iter_mut().chain(std::iter::once(default)) {
                for arg in &mut target.args {
                    replace(arg);
                }
            }
        }
        Terminator::Return { values } => {
            for value in values {
                replace(value);
            }
        }
        Terminator::Exit { .. } | Terminator::Unterminated => {}
    }
}

/// Replaces `from` with `to` throughout a function.
pub fn replace_value_in_func(func: &mut Function, from: ValueId, to: ValueId) {
    for block in &mut func.blocks {
        for inst in &mut block.insts {
            replace_value_in_inst(&mut inst.kind, from, to);
        }
        replace_value_in_term(&mut block.term, from, to);
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}(", self.name)?;
        for (idx, ty) in self.sig.params.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{ty}")?;
        }
        write!(f, ") -> (")?;
        for (idx, ty) in self.sig.results.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{ty}")?;
        }
        writeln!(f, ") {{")?;
        for block in &self.blocks {
            write!(f, "block{}(", block.id.0)?;
            for (idx, param) in block.params.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "v{}: {}", param.id.0, param.ty)?;
            }
            writeln!(f, "):")?;
            for inst in &block.insts {
                write!(f, "  ")?;
                for (idx, result) in inst.results.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "v{}", result.id.0)?;
                }
                if !inst.results.is_empty() {
                    write!(f, " = ")?;
                }
                writeln!(f, "{}", format_inst_kind(&inst.kind))?;
            }
            writeln!(f, "  {}", format_terminator(&block.term))?;
        }
        writeln!(f, "}}")
    }
}

fn format_values(values: &[ValueId]) -> String {
    values
        .iter()
        .map(|value| format!("v{}", value.0))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_target(target: &BranchTarget) -> String {
    if target.args.is_empty() {
        format!("block{}", target.block.0)
    } else {
        format!("block{}({})", target.block.0, format_values(&target.args))
    }
}

fn format_inst_kind(kind: &InstKind) -> String {
    match kind {
        InstKind::Iconst { bits } => format!("iconst {bits:#x}"),
        InstKind::Vconst { lo, hi } => format!("vconst {hi:#x}:{lo:#x}"),
        InstKind::ExecCtx => "exec_ctx".to_string(),
        InstKind::ModuleCtx => "module_ctx".to_string(),
        InstKind::Binary { op, lhs, rhs } => {
            format!("{} v{}, v{}", format!("{op:?}").to_lowercase(), lhs.0, rhs.0)
        }
        InstKind::Unary { op, arg } => {
            format!("{} v{}", format!("{op:?}").to_lowercase(), arg.0)
        }
        InstKind::IntCmp { cond, lhs, rhs } => {
            format!("icmp {} v{}, v{}", format!("{cond:?}").to_lowercase(), lhs.0, rhs.0)
        }
        InstKind::FloatCmp { cond, lhs, rhs } => {
            format!("fcmp {} v{}, v{}", format!("{cond:?}").to_lowercase(), lhs.0, rhs.0)
        }
        InstKind::Extend {
            arg,
            from_bits,
            signed,
        } => {
            let kind = if *signed { "sext" } else { "uext" };
            format!("{kind}{from_bits} v{}", arg.0)
        }
        InstKind::Reduce { arg } => format!("wrap v{}", arg.0),
        InstKind::FcvtToInt {
            arg,
            signed,
            saturating,
        } => {
            let sign = if *signed { "s" } else { "u" };
            let sat = if *saturating { "_sat" } else { "" };
            format!("fcvt_to_{sign}int{sat} v{}", arg.0)
        }
        InstKind::FcvtFromInt { arg, signed } => {
            let sign = if *signed { "s" } else { "u" };
            format!("fcvt_from_{sign}int v{}", arg.0)
        }
        InstKind::Fpromote { arg } => format!("fpromote v{}", arg.0),
        InstKind::Fdemote { arg } => format!("fdemote v{}", arg.0),
        InstKind::Bitcast { arg } => format!("bitcast v{}", arg.0),
        InstKind::Select {
            cond,
            if_true,
            if_false,
        } => format!("select v{}, v{}, v{}", cond.0, if_true.0, if_false.0),
        InstKind::Load { addr, offset, flavor } => match flavor {
            LoadFlavor::Plain => format!("load v{}+{offset}", addr.0),
            LoadFlavor::Ext { bytes, signed } => {
                let kind = if *signed { "s" } else { "u" };
                format!("load{}{} v{}+{offset}", bytes * 8, kind, addr.0)
            }
        },
        InstKind::Store {
            addr,
            value,
            offset,
            bytes,
        } => format!("store{} v{}, v{}+{offset}", bytes * 8, value.0, addr.0),
        InstKind::Splat { arg, lanes } => format!("splat.{lanes:?} v{}", arg.0),
        InstKind::ExtractLane {
            arg, lanes, lane, ..
        } => format!("extract_lane.{lanes:?} v{}, {lane}", arg.0),
        InstKind::VBinary { op, lanes, lhs, rhs } => {
            format!("v{}.{lanes:?} v{}, v{}", format!("{op:?}").to_lowercase(), lhs.0, rhs.0)
        }
        InstKind::Call { func, args, .. } => {
            format!("call f{}({})", func, format_values(args))
        }
        InstKind::CallIndirect { code, args, .. } => {
            format!("call_indirect v{}({})", code.0, format_values(args))
        }
        InstKind::ExitIfTrue { cond, code } => {
            format!("exit_if v{}, {code:?}", cond.0)
        }
    }
}

fn format_terminator(term: &Terminator) -> String {
    match term {
        Terminator::Jump(target) => format!("jump {}", format_target(target)),
        Terminator::BrIf {
            cond,
            then_dst,
            else_dst,
        } => format!(
            "brif v{}, {}, {}",
            cond.0,
            format_target(then_dst),
            format_target(else_dst)
        ),
        Terminator::BrTable {
            index,
            targets,
            default,
        } => {
            let cases = targets
                .iter()
                .map(format_target)
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "br_table v{}, [{}], default {}",
                index.0,
                cases,
                format_target(default)
            )
        }
        Terminator::Return { values } => {
            if values.is_empty() {
                "return".to_string()
            } else {
                format!("return {}", format_values(values))
            }
        }
        Terminator::Exit { code } => format!("exit {code:?}"),
        Terminator::Unterminated => "<unterminated>".to_string(),
    }
}
