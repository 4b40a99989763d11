//! ARM64 register model.
//!
//! Physical registers are small indices: 0..=31 for general registers,
//! 32..=63 for vector registers. Virtual registers continue from 64, so the
//! physical set is the reserved prefix of the VReg space.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysReg(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    Int,
    Float,
}

impl PhysReg {
    pub fn class(self) -> RegClass {
        if self.0 < 32 {
            RegClass::Int
        } else {
            RegClass::Float
        }
    }

    /// Hardware encoding (0..=31 within the class).
    pub fn enc(self) -> u32 {
        (self.0 & 31) as u32
    }
}

pub const fn xreg(n: u8) -> PhysReg {
    PhysReg(n)
}

pub const fn vreg_phys(n: u8) -> PhysReg {
    PhysReg(32 + n)
}

/// Execution-context pointer; pinned for the lifetime of every function.
pub const X0_EXEC_CTX: PhysReg = xreg(0);
/// Module-context pointer; pinned, saved/restored around cross-module calls.
pub const X1_MODULE_CTX: PhysReg = xreg(1);
/// Spill/veneer scratch, never allocated.
pub const X16_SCRATCH: PhysReg = xreg(16);
pub const X17_SCRATCH: PhysReg = xreg(17);
/// Long-offset address-synthesis scratch reserved for the encoder.
pub const X27_ADDR_SCRATCH: PhysReg = xreg(27);
pub const X29_FP: PhysReg = xreg(29);
pub const X30_LR: PhysReg = xreg(30);
pub const SP: PhysReg = xreg(31);
/// The zero register shares encoding 31 with SP; context decides.
pub const XZR: PhysReg = xreg(31);

/// Float spill scratch registers, never allocated.
pub const V30_SCRATCH: PhysReg = vreg_phys(30);
pub const V31_SCRATCH: PhysReg = vreg_phys(31);

/// Integer argument registers of the internal calling convention. x0/x1 are
/// the two context pointers, so real arguments start at x2.
pub const INT_ARG_REGS: [PhysReg; 6] = [xreg(2), xreg(3), xreg(4), xreg(5), xreg(6), xreg(7)];

/// Float/vector argument registers.
pub const FLOAT_ARG_REGS: [PhysReg; 8] = [
    vreg_phys(0),
    vreg_phys(1),
    vreg_phys(2),
    vreg_phys(3),
    vreg_phys(4),
    vreg_phys(5),
    vreg_phys(6),
    vreg_phys(7),
];

/// General registers the allocator may hand out. Ordered caller-saved
/// first so short-lived values prefer them.
pub const ALLOCATABLE_INT: [PhysReg; 22] = [
    xreg(2),
    xreg(3),
    xreg(4),
    xreg(5),
    xreg(6),
    xreg(7),
    xreg(8),
    xreg(9),
    xreg(10),
    xreg(11),
    xreg(12),
    xreg(13),
    xreg(14),
    xreg(15),
    xreg(19),
    xreg(20),
    xreg(21),
    xreg(22),
    xreg(23),
    xreg(24),
    xreg(25),
    xreg(26),
];

/// Vector registers the allocator may hand out. v8..v15 are excluded: their
/// low halves are callee-saved in AAPCS and the host dispatcher relies on
/// that, while generated code treats all float registers as caller-saved.
pub const ALLOCATABLE_FLOAT: [PhysReg; 22] = [
    vreg_phys(0),
    vreg_phys(1),
    vreg_phys(2),
    vreg_phys(3),
    vreg_phys(4),
    vreg_phys(5),
    vreg_phys(6),
    vreg_phys(7),
    vreg_phys(16),
    vreg_phys(17),
    vreg_phys(18),
    vreg_phys(19),
    vreg_phys(20),
    vreg_phys(21),
    vreg_phys(22),
    vreg_phys(23),
    vreg_phys(24),
    vreg_phys(25),
    vreg_phys(26),
    vreg_phys(27),
    vreg_phys(28),
    vreg_phys(29),
];

/// Callee-saved registers of the internal convention.
pub const CALLEE_SAVED_INT: [PhysReg; 8] = [
    xreg(19),
    xreg(20),
    xreg(21),
    xreg(22),
    xreg(23),
    xreg(24),
    xreg(25),
    xreg(26),
];

pub fn is_callee_saved(reg: PhysReg) -> bool {
    CALLEE_SAVED_INT.contains(&reg)
}

pub fn reg_name(reg: PhysReg, is64: bool) -> String {
    match reg.0 {
        31 => "sp".to_string(),
        30 => "lr".to_string(),
        29 => "fp".to_string(),
        n if n < 32 => {
            if is64 {
                format!("x{n}")
            } else {
                format!("w{n}")
            }
        }
        n => format!("v{}", n - 32),
    }
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", reg_name(*self, true))
    }
}
