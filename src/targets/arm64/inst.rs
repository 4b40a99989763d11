//! ARM64 backend instruction model (vcode).
//!
//! Instructions operate on virtual registers and live in a per-function
//! arena as an intrusive doubly-linked list, so lowering, register
//! allocation, and finalization can insert at arbitrary points without
//! shifting a vector.

use crate::exec::context::ExitCode;
use crate::ssa::ir::LaneShape;

use super::regs::{PhysReg, RegClass};

/// A virtual register. Indices below [`VReg::FIRST_VIRTUAL`] are the
/// physical-register prefix: 0..=31 general, 32..=63 vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VReg {
    index: u32,
    class: RegClass,
}

/// Sentinel for "no register".
pub const NIL_VREG: VReg = VReg {
    index: u32::MAX,
    class: RegClass::Int,
};

impl VReg {
    pub const FIRST_VIRTUAL: u32 = 64;

    pub fn phys(reg: PhysReg) -> Self {
        Self {
            index: reg.0 as u32,
            class: reg.class(),
        }
    }

    pub fn virt(index: u32, class: RegClass) -> Self {
        Self {
            index: index + Self::FIRST_VIRTUAL,
            class,
        }
    }

    pub fn is_phys(self) -> bool {
        self.index < Self::FIRST_VIRTUAL
    }

    pub fn as_phys(self) -> Option<PhysReg> {
        if self.is_phys() {
            Some(PhysReg(self.index as u8))
        } else {
            None
        }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn class(self) -> RegClass {
        self.class
    }
}

/// Condition codes, by hardware encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    Eq = 0,
    Ne = 1,
    Hs = 2,
    Lo = 3,
    Mi = 4,
    Pl = 5,
    Vs = 6,
    Vc = 7,
    Hi = 8,
    Ls = 9,
    Ge = 10,
    Lt = 11,
    Gt = 12,
    Le = 13,
}

impl Cond {
    pub fn invert(self) -> Self {
        // Condition pairs differ in the low bit.
        let bits = (self as u8) ^ 1;
        match bits {
            0 => Self::Eq,
            1 => Self::Ne,
            2 => Self::Hs,
            3 => Self::Lo,
            4 => Self::Mi,
            5 => Self::Pl,
            6 => Self::Vs,
            7 => Self::Vc,
            8 => Self::Hi,
            9 => Self::Ls,
            10 => Self::Ge,
            11 => Self::Lt,
            12 => Self::Gt,
            _ => Self::Le,
        }
    }
}

/// A symbolic code offset, resolved during finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

/// Memory addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AMode {
    /// Base plus displacement. The encoder picks the shortest admissible
    /// form: scaled unsigned imm12, unscaled simm9, add-synthesis through
    /// the reserved scratch register, or a literal-pool sequence.
    RegOffset { rn: VReg, off: i64 },
    /// Base plus register, optionally shifted left by the access size.
    RegReg { rn: VReg, rm: VReg, shifted: bool },
    /// Pre-indexed push form: `[rn, #simm9]!`.
    PreIndexed { rn: VReg, simm9: i16 },
    /// Post-indexed pop form: `[rn], #simm9`.
    PostIndexed { rn: VReg, simm9: i16 },
    /// A 16-byte spill slot; rewritten to an SP offset by the allocator.
    SpillSlot { slot: u32 },
    /// A caller-provided stack slot (stack argument or return overflow),
    /// relative to SP at function entry; rewritten once the frame size is
    /// known.
    IncomingArg { offset: u32 },
}

impl AMode {
    pub fn base(&self) -> Option<VReg> {
        match self {
            Self::RegOffset { rn, .. }
            | Self::RegReg { rn, .. }
            | Self::PreIndexed { rn, .. }
            | Self::PostIndexed { rn, .. } => Some(*rn),
            Self::SpillSlot { .. } | Self::IncomingArg { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    /// SUBS writing the result; used with the zero register for compares.
    SubS,
    And,
    Orr,
    Eor,
    Lsl,
    Lsr,
    Asr,
    Ror,
    SDiv,
    UDiv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovWideOp {
    Z,
    N,
    K,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftImmOp {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    Clz,
    Rbit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpuOp2 {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpuOp1 {
    Abs,
    Neg,
    Sqrt,
    /// Round toward minus infinity (floor).
    RintM,
    /// Round toward plus infinity (ceil).
    RintP,
    /// Round toward zero (trunc).
    RintZ,
    /// Round to nearest, ties to even.
    RintN,
    /// f32 -> f64; operand size is 32 regardless of `is64`.
    Cvt32To64,
    /// f64 -> f32.
    Cvt64To32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VecOp {
    And,
    Orr,
    Eor,
    Bic,
    Add,
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondBrKind {
    Cond(Cond),
    Zero(VReg, bool),
    NotZero(VReg, bool),
}

/// One backend instruction. `is64` selects the 64-bit register form.
#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    /// Position marker; encodes to nothing.
    LabelDef { label: Label },
    MovRR { rd: VReg, rn: VReg, is64: bool },
    FpuMovRR { rd: VReg, rn: VReg, is64: bool },
    FpuMov128 { rd: VReg, rn: VReg },
    MovWide { op: MovWideOp, rd: VReg, imm16: u16, shift: u8, is64: bool },
    MovToFpu { rd: VReg, rn: VReg, is64: bool },
    MovFromFpu { rd: VReg, rn: VReg, is64: bool },
    AluRRR { op: AluOp, rd: VReg, rn: VReg, rm: VReg, is64: bool },
    AluRRImm12 { op: AluOp, rd: VReg, rn: VReg, imm12: u16, shift12: bool, is64: bool },
    AluRRImmLogic { op: AluOp, rd: VReg, rn: VReg, n: bool, immr: u8, imms: u8, is64: bool },
    AluRRImmShift { op: ShiftImmOp, rd: VReg, rn: VReg, amount: u8, is64: bool },
    MAdd { rd: VReg, rn: VReg, rm: VReg, ra: VReg, is64: bool },
    MSub { rd: VReg, rn: VReg, rm: VReg, ra: VReg, is64: bool },
    BitRR { op: BitOp, rd: VReg, rn: VReg, is64: bool },
    /// Sign/zero-extend the low `from_bits` into a 32- or 64-bit result.
    Extend { rd: VReg, rn: VReg, signed: bool, from_bits: u8, to64: bool },
    Cmp { rn: VReg, rm: VReg, is64: bool },
    CmpImm { rn: VReg, imm12: u16, is64: bool },
    CSet { rd: VReg, cond: Cond },
    CSel { rd: VReg, cond: Cond, rn: VReg, rm: VReg, is64: bool },
    FpuRRR { op: FpuOp2, rd: VReg, rn: VReg, rm: VReg, is64: bool },
    FpuRR { op: FpuOp1, rd: VReg, rn: VReg, is64: bool },
    FpuCmp { rn: VReg, rm: VReg, is64: bool },
    FpuCSel { rd: VReg, cond: Cond, rn: VReg, rm: VReg, is64: bool },
    IntToFpu { rd: VReg, rn: VReg, signed: bool, from64: bool, to64: bool },
    FpuToInt { rd: VReg, rn: VReg, signed: bool, from64: bool, to64: bool },
    /// Zero-extending load of 8, 16, 32, or 64 bits.
    ULoad { rd: VReg, mem: AMode, bits: u8 },
    /// Sign-extending load into a 32- or 64-bit register.
    SLoad { rd: VReg, mem: AMode, bits: u8, to64: bool },
    Store { rs: VReg, mem: AMode, bits: u8 },
    FpuLoad { rd: VReg, mem: AMode, bits: u8 },
    FpuStore { rs: VReg, mem: AMode, bits: u8 },
    /// `stp rt, rt2, [sp, #-16]!`
    StpPre { rt: VReg, rt2: VReg },
    /// `ldp rt, rt2, [sp], #16`
    LdpPost { rt: VReg, rt2: VReg },
    VecRRR { op: VecOp, rd: VReg, rn: VReg, rm: VReg, shape: LaneShape },
    VecDup { rd: VReg, rn: VReg, shape: LaneShape },
    /// Move a lane to a general register (UMOV/SMOV).
    VecMovToGpr { rd: VReg, rn: VReg, shape: LaneShape, lane: u8, signed: bool },
    /// Scalar DUP of one lane, for float lane extraction.
    VecDupLaneScalar { rd: VReg, rn: VReg, shape: LaneShape, lane: u8 },
    /// Population count through the vector unit; clobbers the float
    /// scratch register.
    Popcnt { rd: VReg, rn: VReg, is64: bool },
    /// 128-bit constant via a literal-pool load.
    LoadLit128 { rd: VReg, lo: u64, hi: u64 },
    /// `adr rd, label`; `None` resolves to the instruction's own address.
    Adr { rd: VReg, label: Option<Label> },
    B { label: Label },
    CondBr { kind: CondBrKind, label: Label },
    /// Jump-table dispatch: `adr` + scaled `ldrsw` + `add` + `br`, followed
    /// by the table of 32-bit offsets.
    JTSequence { ridx: VReg, targets: Vec<Label> },
    /// Module-local direct call; the BL displacement is fixed up at link
    /// time against the callee's section offset.
    Call { func: u32 },
    CallInd { rn: VReg },
    Ret,
    Brk,
    /// Frame-reservation placeholder emitted at lowering time; the register
    /// allocator patches it to the real SP adjustment once the spill count
    /// is known.
    ReserveFrame,
    /// Exit-sequence body: store the code, snapshot PC/SP, restore host
    /// state, return. `Pending` re-raises the code already in the context.
    ExitSequence { code: ExitCode },
}

impl Inst {
    /// Visits registers read by this instruction.
    pub fn for_each_use(&self, mut f: impl FnMut(VReg)) {
        let mut mem = |mem: &AMode, f: &mut dyn FnMut(VReg)| match mem {
            AMode::RegOffset { rn, .. }
            | AMode::PreIndexed { rn, .. }
            | AMode::PostIndexed { rn, .. } => f(*rn),
            AMode::RegReg { rn, rm, .. } => {
                f(*rn);
                f(*rm);
            }
            AMode::SpillSlot { .. } | AMode::IncomingArg { .. } => {}
        };

        match self {
            Inst::LabelDef { .. }
            | Inst::MovWide { .. }
            | Inst::CSet { .. }
            | Inst::B { .. }
            | Inst::Call { .. }
            | Inst::Ret
            | Inst::Brk
            | Inst::ReserveFrame
            | Inst::LoadLit128 { .. }
            | Inst::Adr { .. }
            | Inst::ExitSequence { .. } => {}
            Inst::MovRR { rn, .. }
            | Inst::FpuMovRR { rn, .. }
            | Inst::FpuMov128 { rn, .. }
            | Inst::MovToFpu { rn, .. }
            | Inst::MovFromFpu { rn, .. }
            | Inst::AluRRImm12 { rn, .. }
            | Inst::AluRRImmLogic { rn, .. }
            | Inst::AluRRImmShift { rn, .. }
            | Inst::BitRR { rn, .. }
            | Inst::Extend { rn, .. }
            | Inst::CmpImm { rn, .. }
            | Inst::FpuRR { rn, .. }
            | Inst::IntToFpu { rn, .. }
            | Inst::FpuToInt { rn, .. }
            | Inst::VecDup { rn, .. }
            | Inst::VecMovToGpr { rn, .. }
            | Inst::VecDupLaneScalar { rn, .. }
            | Inst::Popcnt { rn, .. }
            | Inst::CallInd { rn } => f(*rn),
            Inst::AluRRR { rn, rm, .. }
            | Inst::Cmp { rn, rm, .. }
            | Inst::FpuRRR { rn, rm, .. }
            | Inst::FpuCmp { rn, rm, .. }
            | Inst::CSel { rn, rm, .. }
            | Inst::FpuCSel { rn, rm, .. }
            | Inst::VecRRR { rn, rm, .. } => {
                f(*rn);
                f(*rm);
            }
            Inst::MAdd { rn, rm, ra, .. } | Inst::MSub { rn, rm, ra, .. } => {
                f(*rn);
                f(*rm);
                f(*ra);
            }
            Inst::ULoad { mem: m, .. }
            | Inst::SLoad { mem: m, .. }
            | Inst::FpuLoad { mem: m, .. } => mem(m, &mut f),
            Inst::Store { rs, mem: m, .. } | Inst::FpuStore { rs, mem: m, .. } => {
                f(*rs);
                mem(m, &mut f);
            }
            Inst::StpPre { rt, rt2 } => {
                f(*rt);
                f(*rt2);
            }
            Inst::LdpPost { .. } => {}
            Inst::CondBr { kind, .. } => match kind {
                CondBrKind::Cond(_) => {}
                CondBrKind::Zero(reg, _) | CondBrKind::NotZero(reg, _) => f(*reg),
            },
            Inst::JTSequence { ridx, .. } => f(*ridx),
        }
    }

    /// Visits registers written by this instruction.
    pub fn for_each_def(&self, mut f: impl FnMut(VReg)) {
        match self {
            Inst::MovRR { rd, .. }
            | Inst::FpuMovRR { rd, .. }
            | Inst::FpuMov128 { rd, .. }
            | Inst::MovWide { rd, .. }
            | Inst::MovToFpu { rd, .. }
            | Inst::MovFromFpu { rd, .. }
            | Inst::AluRRR { rd, .. }
            | Inst::AluRRImm12 { rd, .. }
            | Inst::AluRRImmLogic { rd, .. }
            | Inst::AluRRImmShift { rd, .. }
            | Inst::MAdd { rd, .. }
            | Inst::MSub { rd, .. }
            | Inst::BitRR { rd, .. }
            | Inst::Extend { rd, .. }
            | Inst::CSet { rd, .. }
            | Inst::CSel { rd, .. }
            | Inst::FpuRRR { rd, .. }
            | Inst::FpuRR { rd, .. }
            | Inst::FpuCSel { rd, .. }
            | Inst::IntToFpu { rd, .. }
            | Inst::FpuToInt { rd, .. }
            | Inst::ULoad { rd, .. }
            | Inst::SLoad { rd, .. }
            | Inst::FpuLoad { rd, .. }
            | Inst::VecRRR { rd, .. }
            | Inst::VecDup { rd, .. }
            | Inst::VecMovToGpr { rd, .. }
            | Inst::VecDupLaneScalar { rd, .. }
            | Inst::Popcnt { rd, .. }
            | Inst::LoadLit128 { rd, .. }
            | Inst::Adr { rd, .. } => f(*rd),
            Inst::LdpPost { rt, rt2 } => {
                f(*rt);
                f(*rt2);
            }
            Inst::LabelDef { .. }
            | Inst::Cmp { .. }
            | Inst::CmpImm { .. }
            | Inst::FpuCmp { .. }
            | Inst::Store { .. }
            | Inst::FpuStore { .. }
            | Inst::StpPre { .. }
            | Inst::B { .. }
            | Inst::CondBr { .. }
            | Inst::JTSequence { .. }
            | Inst::Call { .. }
            | Inst::CallInd { .. }
            | Inst::Ret
            | Inst::Brk
            | Inst::ReserveFrame
            | Inst::ExitSequence { .. } => {}
        }
    }

    /// Rewrites every register slot through `f`.
    pub fn map_regs(&mut self, mut f: impl FnMut(&mut VReg)) {
        let mut mem = |mem: &mut AMode, f: &mut dyn FnMut(&mut VReg)| match mem {
            AMode::RegOffset { rn, .. }
            | AMode::PreIndexed { rn, .. }
            | AMode::PostIndexed { rn, .. } => f(rn),
            AMode::RegReg { rn, rm, .. } => {
                f(rn);
                f(rm);
            }
            AMode::SpillSlot { .. } | AMode::IncomingArg { .. } => {}
        };

        match self {
            Inst::LabelDef { .. }
            | Inst::B { .. }
            | Inst::Call { .. }
            | Inst::Ret
            | Inst::Brk
            | Inst::ReserveFrame
            | Inst::ExitSequence { .. } => {}
            Inst::MovWide { rd, .. } | Inst::CSet { rd, .. } => f(rd),
            Inst::LoadLit128 { rd, .. } | Inst::Adr { rd, .. } => f(rd),
            Inst::MovRR { rd, rn, .. }
            | Inst::FpuMovRR { rd, rn, .. }
            | Inst::FpuMov128 { rd, rn }
            | Inst::MovToFpu { rd, rn, .. }
            | Inst::MovFromFpu { rd, rn, .. }
            | Inst::AluRRImm12 { rd, rn, .. }
            | Inst::AluRRImmLogic { rd, rn, .. }
            | Inst::AluRRImmShift { rd, rn, .. }
            | Inst::BitRR { rd, rn, .. }
            | Inst::Extend { rd, rn, .. }
            | Inst::FpuRR { rd, rn, .. }
            | Inst::IntToFpu { rd, rn, .. }
            | Inst::FpuToInt { rd, rn, .. }
            | Inst::VecDup { rd, rn, .. }
            | Inst::VecMovToGpr { rd, rn, .. }
            | Inst::VecDupLaneScalar { rd, rn, .. }
            | Inst::Popcnt { rd, rn, .. } => {
                f(rd);
                f(rn);
            }
            Inst::AluRRR { rd, rn, rm, .. }
            | Inst::CSel { rd, rn, rm, .. }
            | Inst::FpuRRR { rd, rn, rm, .. }
            | Inst::FpuCSel { rd, rn, rm, .. }
            | Inst::VecRRR { rd, rn, rm, .. } => {
                f(rd);
                f(rn);
                f(rm);
            }
            Inst::MAdd { rd, rn, rm, ra, .. } | Inst::MSub { rd, rn, rm, ra, .. } => {
                f(rd);
                f(rn);
                f(rm);
                f(ra);
            }
            Inst::Cmp { rn, rm, .. } | Inst::FpuCmp { rn, rm, .. } => {
                f(rn);
                f(rm);
            }
            Inst::CmpImm { rn, .. } => f(rn),
            Inst::ULoad { rd, mem: m, .. }
            | Inst::SLoad { rd, mem: m, .. }
            | Inst::FpuLoad { rd, mem: m, .. } => {
                f(rd);
                mem(m, &mut f);
            }
            Inst::Store { rs, mem: m, .. } | Inst::FpuStore { rs, mem: m, .. } => {
                f(rs);
                mem(m, &mut f);
            }
            Inst::StpPre { rt, rt2 } | Inst::LdpPost { rt, rt2 } => {
                f(rt);
                f(rt2);
            }
            Inst::CondBr { kind, .. } => match kind {
                CondBrKind::Cond(_) => {}
                CondBrKind::Zero(reg, _) | CondBrKind::NotZero(reg, _) => f(reg),
            },
            Inst::JTSequence { ridx, .. } => f(ridx),
            Inst::CallInd { rn } => f(rn),
        }
    }

    /// Whether this instruction is a call that clobbers caller-saved
    /// registers.
    pub fn is_call(&self) -> bool {
        matches!(self, Inst::Call { .. } | Inst::CallInd { .. })
    }
}

/// Intrusive-list node indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstId(pub u32);

const NONE: u32 = u32::MAX;

struct InstNode {
    inst: Inst,
    prev: u32,
    next: u32,
}

/// Frame bookkeeping filled in by the register allocator.
#[derive(Debug, Clone, Default)]
pub struct FrameInfo {
    pub spill_slots: u32,
    /// Bytes reserved at the bottom of the frame for outgoing stack
    /// arguments and returns.
    pub outgoing_args: u32,
    pub saved_regs: Vec<PhysReg>,
}

impl FrameInfo {
    /// Frame bytes reserved below the callee-saved pushes, 16-aligned.
    pub fn reserved_bytes(&self) -> u32 {
        let bytes = self.spill_slots * 16 + self.outgoing_args;
        (bytes + 15) & !15
    }

    pub fn spill_slot_offset(&self, slot: u32) -> i64 {
        (self.outgoing_args + slot * 16) as i64
    }
}

/// A function's worth of backend instructions.
pub struct VCode {
    nodes: Vec<InstNode>,
    head: u32,
    tail: u32,
    next_virtual: u32,
    next_label: u32,
    pub frame: FrameInfo,
    /// Physical registers with a fixed role over an instruction range
    /// (call argument setup and result extraction). The allocator keeps
    /// virtual registers out of them across the range.
    pub fixed_ranges: Vec<(PhysReg, InstId, InstId)>,
    /// Whether the prologue carries a stack-bound check.
    pub stack_check: bool,
    /// Label of the shared epilogue; return sites branch here and the
    /// allocator emits the tear-down sequence after it.
    pub epilogue_label: Option<Label>,
    /// Exit label for the prologue stack check.
    pub stack_check_label: Option<Label>,
}

impl VCode {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            head: NONE,
            tail: NONE,
            next_virtual: 0,
            next_label: 0,
            frame: FrameInfo::default(),
            fixed_ranges: Vec::new(),
            stack_check: false,
            epilogue_label: None,
            stack_check_label: None,
        }
    }

    pub fn alloc_vreg(&mut self, class: RegClass) -> VReg {
        let vreg = VReg::virt(self.next_virtual, class);
        self.next_virtual += 1;
        vreg
    }

    pub fn num_virtual(&self) -> u32 {
        self.next_virtual
    }

    pub fn alloc_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn push(&mut self, inst: Inst) -> InstId {
        let id = self.nodes.len() as u32;
        self.nodes.push(InstNode {
            inst,
            prev: self.tail,
            next: NONE,
        });
        if self.tail != NONE {
            self.nodes[self.tail as usize].next = id;
        } else {
            self.head = id;
        }
        self.tail = id;
        InstId(id)
    }

    pub fn insert_before(&mut self, at: InstId, inst: Inst) -> InstId {
        let id = self.nodes.len() as u32;
        let prev = self.nodes[at.0 as usize].prev;
        self.nodes.push(InstNode {
            inst,
            prev,
            next: at.0,
        });
        self.nodes[at.0 as usize].prev = id;
        if prev != NONE {
            self.nodes[prev as usize].next = id;
        } else {
            self.head = id;
        }
        InstId(id)
    }

    pub fn insert_after(&mut self, at: InstId, inst: Inst) -> InstId {
        let id = self.nodes.len() as u32;
        let next = self.nodes[at.0 as usize].next;
        self.nodes.push(InstNode {
            inst,
            prev: at.0,
            next,
        });
        self.nodes[at.0 as usize].next = id;
        if next != NONE {
            self.nodes[next as usize].prev = id;
        } else {
            self.tail = id;
        }
        InstId(id)
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.nodes[id.0 as usize].inst
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.nodes[id.0 as usize].inst
    }

    pub fn first(&self) -> Option<InstId> {
        (self.head != NONE).then(|| InstId(self.head))
    }

    pub fn next(&self, id: InstId) -> Option<InstId> {
        let next = self.nodes[id.0 as usize].next;
        (next != NONE).then(|| InstId(next))
    }

    /// In-order instruction IDs. Stable against insertions made after the
    /// snapshot is taken.
    pub fn order(&self) -> Vec<InstId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut cursor = self.head;
        while cursor != NONE {
            order.push(InstId(cursor));
            cursor = self.nodes[cursor as usize].next;
        }
        order
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for VCode {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "../../tests/arm64/t_inst.rs"]
mod tests;
