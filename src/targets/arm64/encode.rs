//! ARM64 instruction encoder.
//!
//! Pure functions from fully-resolved instructions (physical registers,
//! resolved labels) to little-endian code words. Every entry point has a
//! length-only twin so the finalizer can lay out offsets before emitting a
//! single byte.
//!
//! Memory operands pick the shortest admissible encoding: scaled unsigned
//! imm12, then unscaled simm9, then an `add` through the reserved scratch
//! register, then a literal-pool sequence for offsets beyond the 24-bit
//! synthesis range. Ties prefer the scaled form.

use crate::errors::CompileError;
use crate::exec::context::{ExitCode, exec_offsets};
use crate::ssa::ir::LaneShape;

use super::inst::*;
use super::regs::{PhysReg, X16_SCRATCH, X17_SCRATCH, X27_ADDR_SCRATCH};

/// Module-level call fixups produced while encoding: byte offset of a BL
/// word and the callee function index.
pub type CallFixups = Vec<(u32, u32)>;

fn reg_bits(vreg: VReg) -> Result<u32, CompileError> {
    vreg.as_phys()
        .map(|reg| reg.enc())
        .ok_or_else(|| CompileError::bug(format!("virtual register {vreg:?} reached the encoder")))
}

fn push_word(out: &mut Vec<u8>, word: u32) {
    out.extend_from_slice(&word.to_le_bytes());
}

/// Attempts the (N, immr, imms) encoding of a logical bitmask immediate.
pub fn encode_bitmask_imm(value: u64, is64: bool) -> Option<(u32, u32, u32)> {
    let width: u32 = if is64 { 64 } else { 32 };
    let value = if is64 { value } else { value & 0xFFFF_FFFF };
    if value == 0 || value == if is64 { u64::MAX } else { 0xFFFF_FFFF } {
        return None;
    }

    for size in [2u32, 4, 8, 16, 32, 64] {
        if size > width {
            continue;
        }
        let mask = if size == 64 {
            u64::MAX
        } else {
            (1u64 << size) - 1
        };
        let elem = value & mask;

        // The element must repeat across the full width.
        let mut repeats = true;
        let mut pos = size;
        while pos < width {
            if (value >> pos) & mask != elem {
                repeats = false;
                break;
            }
            pos += size;
        }
        if !repeats {
            continue;
        }

        let ones = elem.count_ones();
        if ones == 0 || ones == size {
            continue;
        }

        // Rotate until the run of ones starts at bit zero.
        let mut found = None;
        for rot in 0..size {
            let rotated = if rot == 0 {
                elem
            } else {
                ((elem >> rot) | (elem << (size - rot))) & mask
            };
            if rotated.trailing_ones() == ones {
                found = Some(if rot == 0 { 0 } else { size - rot });
                break;
            }
        }
        let Some(immr) = found else {
            continue;
        };

        let n = if size == 64 { 1 } else { 0 };
        let imms = match size {
            2 => 0b11_1100 | (ones - 1),
            4 => 0b11_1000 | (ones - 1),
            8 => 0b11_0000 | (ones - 1),
            16 => 0b10_0000 | (ones - 1),
            _ => ones - 1,
        };
        return Some((n, immr, imms));
    }
    None
}

fn sf(is64: bool) -> u32 {
    if is64 { 1 << 31 } else { 0 }
}

// ── Length-only mode ─────────────────────────────────────────────────────

/// Deterministic encoded length in bytes. Must agree exactly with
/// [`encode_inst`].
pub fn encoded_len(inst: &Inst) -> u32 {
    match inst {
        Inst::LabelDef { .. } => 0,
        Inst::ReserveFrame => 0,
        Inst::Popcnt { .. } => 16,
        Inst::LoadLit128 { .. } => 24,
        Inst::JTSequence { targets, .. } => 16 + 4 * targets.len() as u32,
        Inst::ExitSequence { code } => {
            if *code == ExitCode::Pending {
                36
            } else {
                44
            }
        }
        Inst::ULoad { mem, bits, .. } | Inst::SLoad { mem, bits, .. } => mem_len(mem, *bits),
        Inst::Store { mem, bits, .. } => mem_len(mem, *bits),
        Inst::FpuLoad { mem, bits, .. } | Inst::FpuStore { mem, bits, .. } => mem_len(mem, *bits),
        _ => 4,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemForm {
    ScaledImm12,
    UnscaledImm9,
    RegOffset,
    AddSynthesis,
    Literal,
    Indexed,
}

fn classify_mem(mem: &AMode, bits: u8) -> MemForm {
    let size = (bits / 8) as i64;
    match mem {
        AMode::RegReg { .. } => MemForm::RegOffset,
        AMode::PreIndexed { .. } | AMode::PostIndexed { .. } => MemForm::Indexed,
        AMode::SpillSlot { .. } | AMode::IncomingArg { .. } => MemForm::ScaledImm12,
        AMode::RegOffset { off, .. } => {
            let off = *off;
            if off >= 0 && off % size == 0 && off / size <= 4095 {
                MemForm::ScaledImm12
            } else if (-256..=255).contains(&off) {
                MemForm::UnscaledImm9
            } else if off > 0 && off < (1 << 24) {
                let low = off & 0xFFF;
                if low % size == 0 || (0..=255).contains(&low) {
                    MemForm::AddSynthesis
                } else {
                    MemForm::Literal
                }
            } else {
                MemForm::Literal
            }
        }
    }
}

fn mem_len(mem: &AMode, bits: u8) -> u32 {
    match classify_mem(mem, bits) {
        MemForm::ScaledImm12 | MemForm::UnscaledImm9 | MemForm::RegOffset | MemForm::Indexed => 4,
        MemForm::AddSynthesis => 8,
        MemForm::Literal => 20,
    }
}

// ── Load/store templates ─────────────────────────────────────────────────

/// Opcode templates for one access flavor, parameterized by addressing
/// form. `scaled` is the unsigned-imm12 form; the unscaled, register, and
/// indexed forms derive from it.
#[derive(Clone, Copy)]
struct LsTemplates {
    scaled: u32,
    unscaled: u32,
    size_bytes: u32,
}

fn ls_templates(kind: &Inst) -> Result<LsTemplates, CompileError> {
    let tpl = match kind {
        Inst::ULoad { bits, .. } => match bits {
            8 => LsTemplates { scaled: 0x3940_0000, unscaled: 0x3840_0000, size_bytes: 1 },
            16 => LsTemplates { scaled: 0x7940_0000, unscaled: 0x7840_0000, size_bytes: 2 },
            32 => LsTemplates { scaled: 0xB940_0000, unscaled: 0xB840_0000, size_bytes: 4 },
            64 => LsTemplates { scaled: 0xF940_0000, unscaled: 0xF840_0000, size_bytes: 8 },
            _ => return Err(CompileError::bug(format!("bad load width {bits}"))),
        },
        Inst::SLoad { bits, to64, .. } => match (bits, to64) {
            (8, true) => LsTemplates { scaled: 0x3980_0000, unscaled: 0x3880_0000, size_bytes: 1 },
            (8, false) => LsTemplates { scaled: 0x39C0_0000, unscaled: 0x38C0_0000, size_bytes: 1 },
            (16, true) => LsTemplates { scaled: 0x7980_0000, unscaled: 0x7880_0000, size_bytes: 2 },
            (16, false) => LsTemplates { scaled: 0x79C0_0000, unscaled: 0x78C0_0000, size_bytes: 2 },
            (32, true) => LsTemplates { scaled: 0xB980_0000, unscaled: 0xB880_0000, size_bytes: 4 },
            _ => return Err(CompileError::bug("bad sign-extending load shape".to_string())),
        },
        Inst::Store { bits, .. } => match bits {
            8 => LsTemplates { scaled: 0x3900_0000, unscaled: 0x3800_0000, size_bytes: 1 },
            16 => LsTemplates { scaled: 0x7900_0000, unscaled: 0x7800_0000, size_bytes: 2 },
            32 => LsTemplates { scaled: 0xB900_0000, unscaled: 0xB800_0000, size_bytes: 4 },
            64 => LsTemplates { scaled: 0xF900_0000, unscaled: 0xF800_0000, size_bytes: 8 },
            _ => return Err(CompileError::bug(format!("bad store width {bits}"))),
        },
        Inst::FpuLoad { bits, .. } => match bits {
            32 => LsTemplates { scaled: 0xBD40_0000, unscaled: 0xBC40_0000, size_bytes: 4 },
            64 => LsTemplates { scaled: 0xFD40_0000, unscaled: 0xFC40_0000, size_bytes: 8 },
            128 => LsTemplates { scaled: 0x3DC0_0000, unscaled: 0x3CC0_0000, size_bytes: 16 },
            _ => return Err(CompileError::bug(format!("bad fpu load width {bits}"))),
        },
        Inst::FpuStore { bits, .. } => match bits {
            32 => LsTemplates { scaled: 0xBD00_0000, unscaled: 0xBC00_0000, size_bytes: 4 },
            64 => LsTemplates { scaled: 0xFD00_0000, unscaled: 0xFC00_0000, size_bytes: 8 },
            128 => LsTemplates { scaled: 0x3D80_0000, unscaled: 0x3C80_0000, size_bytes: 16 },
            _ => return Err(CompileError::bug(format!("bad fpu store width {bits}"))),
        },
        _ => return Err(CompileError::bug("not a load/store".to_string())),
    };
    Ok(tpl)
}

/// Register-offset form derived from the unscaled template: bit 21 set and
/// option/shift fields in bits 15:10.
fn reg_offset_word(tpl: LsTemplates, rt: u32, rn: u32, rm: u32, shifted: bool) -> u32 {
    let shift = if shifted { 1 << 12 } else { 0 };
    // Option 011 = LSL/UXTX.
    (tpl.unscaled & !0x0000_0C00) | (1 << 21) | (rm << 16) | (0b011 << 13) | shift | (1 << 11) | (rn << 5) | rt
}

fn emit_load_store(
    inst: &Inst,
    rt: VReg,
    mem: &AMode,
    out: &mut Vec<u8>,
) -> Result<(), CompileError> {
    let tpl = ls_templates(inst)?;
    let rt = reg_bits(rt)?;
    let size = tpl.size_bytes as i64;

    match (mem, classify_mem(mem, (tpl.size_bytes * 8).min(255) as u8)) {
        (AMode::RegOffset { rn, off }, MemForm::ScaledImm12) => {
            let rn = reg_bits(*rn)?;
            let imm12 = (*off / size) as u32;
            push_word(out, tpl.scaled | (imm12 << 10) | (rn << 5) | rt);
        }
        (AMode::RegOffset { rn, off }, MemForm::UnscaledImm9) => {
            let rn = reg_bits(*rn)?;
            let imm9 = (*off as u32) & 0x1FF;
            push_word(out, tpl.unscaled | (imm9 << 12) | (rn << 5) | rt);
        }
        (AMode::RegOffset { rn, off }, MemForm::AddSynthesis) => {
            let rn = reg_bits(*rn)?;
            let scratch = X27_ADDR_SCRATCH.enc();
            let high = (*off >> 12) as u32;
            // add x27, rn, #high, lsl #12
            push_word(out, 0x9140_0000 | (high << 10) | (rn << 5) | scratch);
            let low = *off & 0xFFF;
            if low % size == 0 {
                let imm12 = (low / size) as u32;
                push_word(out, tpl.scaled | (imm12 << 10) | (scratch << 5) | rt);
            } else {
                let imm9 = (low as u32) & 0x1FF;
                push_word(out, tpl.unscaled | (imm9 << 12) | (scratch << 5) | rt);
            }
        }
        (AMode::RegOffset { rn, off }, MemForm::Literal) => {
            if *off < 0 || *off > u32::MAX as i64 {
                return Err(CompileError::bug(format!(
                    "load/store offset {off:#x} out of range"
                )));
            }
            let rn = reg_bits(*rn)?;
            let scratch = X27_ADDR_SCRATCH.enc();
            // ldr w27, #8 ; b #8 ; .word off ; <access [rn, x27]>
            push_word(out, 0x1800_0000 | (2 << 5) | scratch);
            push_word(out, 0x1400_0002);
            push_word(out, *off as u32);
            push_word(out, reg_offset_word(tpl, rt, rn, scratch, false));
        }
        (AMode::RegReg { rn, rm, shifted }, _) => {
            let rn = reg_bits(*rn)?;
            let rm = reg_bits(*rm)?;
            push_word(out, reg_offset_word(tpl, rt, rn, rm, *shifted));
        }
        (AMode::PreIndexed { rn, simm9 }, _) => {
            let rn = reg_bits(*rn)?;
            let imm9 = (*simm9 as u32) & 0x1FF;
            push_word(out, tpl.unscaled | (imm9 << 12) | (0b11 << 10) | (rn << 5) | rt);
        }
        (AMode::PostIndexed { rn, simm9 }, _) => {
            let rn = reg_bits(*rn)?;
            let imm9 = (*simm9 as u32) & 0x1FF;
            push_word(out, tpl.unscaled | (imm9 << 12) | (0b01 << 10) | (rn << 5) | rt);
        }
        (AMode::SpillSlot { .. } | AMode::IncomingArg { .. }, _) => {
            return Err(CompileError::bug(
                "unresolved frame pseudo-address at encode".to_string(),
            ));
        }
        (AMode::RegOffset { .. }, form) => {
            return Err(CompileError::bug(format!("bad memory form {form:?}")));
        }
    }
    Ok(())
}

// ── Main entry points ────────────────────────────────────────────────────

fn branch_disp(from: u32, to: u32) -> i64 {
    to as i64 - from as i64
}

/// Encodes one instruction at byte offset `at`. Labels must already be
/// resolved through `label_at`.
pub fn encode_inst(
    inst: &Inst,
    at: u32,
    label_at: &dyn Fn(Label) -> u32,
    out: &mut Vec<u8>,
    call_fixups: &mut CallFixups,
) -> Result<(), CompileError> {
    match inst {
        Inst::LabelDef { .. } => {}
        Inst::ReserveFrame => {
            return Err(CompileError::bug(
                "frame-reservation placeholder survived register allocation".to_string(),
            ));
        }
        Inst::MovRR { rd, rn, is64 } => {
            // orr rd, xzr, rn
            let word = sf(*is64) | 0x2A00_03E0 | (reg_bits(*rn)? << 16) | reg_bits(*rd)?;
            push_word(out, word);
        }
        Inst::FpuMovRR { rd, rn, is64 } => {
            let base = if *is64 { 0x1E60_4000 } else { 0x1E20_4000 };
            push_word(out, base | (reg_bits(*rn)? << 5) | reg_bits(*rd)?);
        }
        Inst::FpuMov128 { rd, rn } => {
            // orr vd.16b, vn.16b, vn.16b
            let rn = reg_bits(*rn)?;
            push_word(out, 0x4EA0_1C00 | (rn << 16) | (rn << 5) | reg_bits(*rd)?);
        }
        Inst::MovWide { op, rd, imm16, shift, is64 } => {
            let opc = match op {
                MovWideOp::N => 0x1280_0000,
                MovWideOp::Z => 0x5280_0000,
                MovWideOp::K => 0x7280_0000,
            };
            let word = sf(*is64)
                | opc
                | ((*shift as u32 / 16) << 21)
                | ((*imm16 as u32) << 5)
                | reg_bits(*rd)?;
            push_word(out, word);
        }
        Inst::MovToFpu { rd, rn, is64 } => {
            let base = if *is64 { 0x9E67_0000 } else { 0x1E27_0000 };
            push_word(out, base | (reg_bits(*rn)? << 5) | reg_bits(*rd)?);
        }
        Inst::MovFromFpu { rd, rn, is64 } => {
            let base = if *is64 { 0x9E66_0000 } else { 0x1E26_0000 };
            push_word(out, base | (reg_bits(*rn)? << 5) | reg_bits(*rd)?);
        }
        Inst::AluRRR { op, rd, rn, rm, is64 } => {
            let rd = reg_bits(*rd)?;
            let rn = reg_bits(*rn)?;
            let rm = reg_bits(*rm)?;
            let word = match op {
                AluOp::Add => sf(*is64) | 0x0B00_0000 | (rm << 16) | (rn << 5) | rd,
                AluOp::Sub => sf(*is64) | 0x4B00_0000 | (rm << 16) | (rn << 5) | rd,
                AluOp::SubS => sf(*is64) | 0x6B00_0000 | (rm << 16) | (rn << 5) | rd,
                AluOp::And => sf(*is64) | 0x0A00_0000 | (rm << 16) | (rn << 5) | rd,
                AluOp::Orr => sf(*is64) | 0x2A00_0000 | (rm << 16) | (rn << 5) | rd,
                AluOp::Eor => sf(*is64) | 0x4A00_0000 | (rm << 16) | (rn << 5) | rd,
                AluOp::Lsl => sf(*is64) | 0x1AC0_2000 | (rm << 16) | (rn << 5) | rd,
                AluOp::Lsr => sf(*is64) | 0x1AC0_2400 | (rm << 16) | (rn << 5) | rd,
                AluOp::Asr => sf(*is64) | 0x1AC0_2800 | (rm << 16) | (rn << 5) | rd,
                AluOp::Ror => sf(*is64) | 0x1AC0_2C00 | (rm << 16) | (rn << 5) | rd,
                AluOp::SDiv => sf(*is64) | 0x1AC0_0C00 | (rm << 16) | (rn << 5) | rd,
                AluOp::UDiv => sf(*is64) | 0x1AC0_0800 | (rm << 16) | (rn << 5) | rd,
            };
            push_word(out, word);
        }
        Inst::AluRRImm12 { op, rd, rn, imm12, shift12, is64 } => {
            let opc = match op {
                AluOp::Add => 0x1100_0000,
                AluOp::Sub => 0x5100_0000,
                AluOp::SubS => 0x7100_0000,
                _ => {
                    return Err(CompileError::bug(format!("{op:?} has no imm12 form")));
                }
            };
            let shift = if *shift12 { 1 << 22 } else { 0 };
            let word = sf(*is64)
                | opc
                | shift
                | ((*imm12 as u32) << 10)
                | (reg_bits(*rn)? << 5)
                | reg_bits(*rd)?;
            push_word(out, word);
        }
        Inst::AluRRImmLogic { op, rd, rn, n, immr, imms, is64 } => {
            let opc = match op {
                AluOp::And => 0x1200_0000,
                AluOp::Orr => 0x3200_0000,
                AluOp::Eor => 0x5200_0000,
                _ => {
                    return Err(CompileError::bug(format!("{op:?} has no bitmask form")));
                }
            };
            let n_bit = if *n { 1 << 22 } else { 0 };
            let word = sf(*is64)
                | opc
                | n_bit
                | ((*immr as u32) << 16)
                | ((*imms as u32) << 10)
                | (reg_bits(*rn)? << 5)
                | reg_bits(*rd)?;
            push_word(out, word);
        }
        Inst::AluRRImmShift { op, rd, rn, amount, is64 } => {
            let width: u32 = if *is64 { 64 } else { 32 };
            let amount = *amount as u32 % width;
            let rd = reg_bits(*rd)?;
            let rn = reg_bits(*rn)?;
            let n_sf = if *is64 { sf(true) | (1 << 22) } else { 0 };
            let word = match op {
                // lsl => ubfm rd, rn, #(width-amount)%width, #(width-1-amount)
                ShiftImmOp::Lsl => {
                    let immr = (width - amount) % width;
                    let imms = width - 1 - amount;
                    0x5300_0000 | n_sf | (immr << 16) | (imms << 10) | (rn << 5) | rd
                }
                ShiftImmOp::Lsr => {
                    0x5300_0000 | n_sf | (amount << 16) | ((width - 1) << 10) | (rn << 5) | rd
                }
                ShiftImmOp::Asr => {
                    0x1300_0000 | n_sf | (amount << 16) | ((width - 1) << 10) | (rn << 5) | rd
                }
                // ror => extr rd, rn, rn, #amount
                ShiftImmOp::Ror => {
                    let base: u32 = if *is64 { 0x93C0_0000 } else { 0x1380_0000 };
                    sf(*is64) | base | (rn << 16) | (amount << 10) | (rn << 5) | rd
                }
            };
            push_word(out, word);
        }
        Inst::MAdd { rd, rn, rm, ra, is64 } => {
            let word = sf(*is64)
                | 0x1B00_0000
                | (reg_bits(*rm)? << 16)
                | (reg_bits(*ra)? << 10)
                | (reg_bits(*rn)? << 5)
                | reg_bits(*rd)?;
            push_word(out, word);
        }
        Inst::MSub { rd, rn, rm, ra, is64 } => {
            let word = sf(*is64)
                | 0x1B00_8000
                | (reg_bits(*rm)? << 16)
                | (reg_bits(*ra)? << 10)
                | (reg_bits(*rn)? << 5)
                | reg_bits(*rd)?;
            push_word(out, word);
        }
        Inst::BitRR { op, rd, rn, is64 } => {
            let base = match op {
                BitOp::Clz => 0x5AC0_1000,
                BitOp::Rbit => 0x5AC0_0000,
            };
            push_word(out, sf(*is64) | base | (reg_bits(*rn)? << 5) | reg_bits(*rd)?);
        }
        Inst::Extend { rd, rn, signed, from_bits, to64 } => {
            let rd = reg_bits(*rd)?;
            let rn = reg_bits(*rn)?;
            let imms = (*from_bits as u32) - 1;
            let word = match (signed, to64) {
                // sbfm/ubfm #0, #(from_bits-1)
                (true, true) => 0x9340_0000 | (imms << 10) | (rn << 5) | rd,
                (true, false) => 0x1300_0000 | (imms << 10) | (rn << 5) | rd,
                // 32-to-64 zero extension is a plain W-register move.
                (false, _) if *from_bits == 32 => 0x2A00_03E0 | (rn << 16) | rd,
                (false, _) => 0x5300_0000 | (imms << 10) | (rn << 5) | rd,
            };
            push_word(out, word);
        }
        Inst::Cmp { rn, rm, is64 } => {
            // subs xzr, rn, rm
            let word = sf(*is64) | 0x6B00_001F | (reg_bits(*rm)? << 16) | (reg_bits(*rn)? << 5);
            push_word(out, word);
        }
        Inst::CmpImm { rn, imm12, is64 } => {
            let word = sf(*is64) | 0x7100_001F | ((*imm12 as u32) << 10) | (reg_bits(*rn)? << 5);
            push_word(out, word);
        }
        Inst::CSet { rd, cond } => {
            // csinc rd, wzr, wzr, inv(cond); always the 32-bit form.
            let cond = cond.invert() as u32;
            push_word(out, 0x1A9F_07E0 | (cond << 12) | reg_bits(*rd)?);
        }
        Inst::CSel { rd, cond, rn, rm, is64 } => {
            let word = sf(*is64)
                | 0x1A80_0000
                | (reg_bits(*rm)? << 16)
                | ((*cond as u32) << 12)
                | (reg_bits(*rn)? << 5)
                | reg_bits(*rd)?;
            push_word(out, word);
        }
        Inst::FpuRRR { op, rd, rn, rm, is64 } => {
            let ty = if *is64 { 0x0040_0000 } else { 0 };
            let base = match op {
                FpuOp2::Add => 0x1E20_2800,
                FpuOp2::Sub => 0x1E20_3800,
                FpuOp2::Mul => 0x1E20_0800,
                FpuOp2::Div => 0x1E20_1800,
                FpuOp2::Max => 0x1E20_4800,
                FpuOp2::Min => 0x1E20_5800,
            };
            push_word(
                out,
                base | ty | (reg_bits(*rm)? << 16) | (reg_bits(*rn)? << 5) | reg_bits(*rd)?,
            );
        }
        Inst::FpuRR { op, rd, rn, is64 } => {
            let ty = if *is64 { 0x0040_0000 } else { 0 };
            let word = match op {
                FpuOp1::Abs => 0x1E20_C000 | ty,
                FpuOp1::Neg => 0x1E21_4000 | ty,
                FpuOp1::Sqrt => 0x1E21_C000 | ty,
                FpuOp1::RintM => 0x1E25_4000 | ty,
                FpuOp1::RintP => 0x1E24_C000 | ty,
                FpuOp1::RintZ => 0x1E25_C000 | ty,
                FpuOp1::RintN => 0x1E24_4000 | ty,
                FpuOp1::Cvt32To64 => 0x1E22_C000,
                FpuOp1::Cvt64To32 => 0x1E62_4000,
            };
            push_word(out, word | (reg_bits(*rn)? << 5) | reg_bits(*rd)?);
        }
        Inst::FpuCmp { rn, rm, is64 } => {
            let ty = if *is64 { 0x0040_0000 } else { 0 };
            push_word(out, 0x1E20_2000 | ty | (reg_bits(*rm)? << 16) | (reg_bits(*rn)? << 5));
        }
        Inst::FpuCSel { rd, cond, rn, rm, is64 } => {
            let ty = if *is64 { 0x0040_0000 } else { 0 };
            let word = 0x1E20_0C00
                | ty
                | (reg_bits(*rm)? << 16)
                | ((*cond as u32) << 12)
                | (reg_bits(*rn)? << 5)
                | reg_bits(*rd)?;
            push_word(out, word);
        }
        Inst::IntToFpu { rd, rn, signed, from64, to64 } => {
            let base: u32 = match (signed, to64) {
                (true, false) => 0x1E22_0000,
                (true, true) => 0x1E62_0000,
                (false, false) => 0x1E23_0000,
                (false, true) => 0x1E63_0000,
            };
            let word = if *from64 { base | 0x8000_0000 } else { base };
            push_word(out, word | (reg_bits(*rn)? << 5) | reg_bits(*rd)?);
        }
        Inst::FpuToInt { rd, rn, signed, from64, to64 } => {
            let base: u32 = match (signed, from64) {
                (true, false) => 0x1E38_0000,
                (true, true) => 0x1E78_0000,
                (false, false) => 0x1E39_0000,
                (false, true) => 0x1E79_0000,
            };
            let word = if *to64 { base | 0x8000_0000 } else { base };
            push_word(out, word | (reg_bits(*rn)? << 5) | reg_bits(*rd)?);
        }
        Inst::ULoad { rd, mem, .. } | Inst::SLoad { rd, mem, .. } | Inst::FpuLoad { rd, mem, .. } => {
            emit_load_store(inst, *rd, mem, out)?;
        }
        Inst::Store { rs, mem, .. } | Inst::FpuStore { rs, mem, .. } => {
            emit_load_store(inst, *rs, mem, out)?;
        }
        Inst::StpPre { rt, rt2 } => {
            // stp rt, rt2, [sp, #-16]!
            let imm7 = 0x7Eu32; // -2 in 7-bit two's complement
            let word = 0xA980_0000
                | (imm7 << 15)
                | (reg_bits(*rt2)? << 10)
                | (31 << 5)
                | reg_bits(*rt)?;
            push_word(out, word);
        }
        Inst::LdpPost { rt, rt2 } => {
            // ldp rt, rt2, [sp], #16
            let imm7 = 0x02u32;
            let word = 0xA8C0_0000
                | (imm7 << 15)
                | (reg_bits(*rt2)? << 10)
                | (31 << 5)
                | reg_bits(*rt)?;
            push_word(out, word);
        }
        Inst::VecRRR { op, rd, rn, rm, shape } => {
            let rd = reg_bits(*rd)?;
            let rn = reg_bits(*rn)?;
            let rm = reg_bits(*rm)?;
            let size = match shape.lane_bits() {
                8 => 0u32,
                16 => 1,
                32 => 2,
                _ => 3,
            };
            let word = match op {
                VecOp::And => 0x4E20_1C00 | (rm << 16) | (rn << 5) | rd,
                VecOp::Orr => 0x4EA0_1C00 | (rm << 16) | (rn << 5) | rd,
                VecOp::Eor => 0x6E20_1C00 | (rm << 16) | (rn << 5) | rd,
                VecOp::Bic => 0x4E60_1C00 | (rm << 16) | (rn << 5) | rd,
                VecOp::Add => 0x4E20_8400 | (size << 22) | (rm << 16) | (rn << 5) | rd,
                VecOp::Sub => 0x6E20_8400 | (size << 22) | (rm << 16) | (rn << 5) | rd,
            };
            push_word(out, word);
        }
        Inst::VecDup { rd, rn, shape } => {
            // dup vd.<t>, wn/xn
            let imm5 = match shape.lane_bits() {
                8 => 0b00001u32,
                16 => 0b00010,
                32 => 0b00100,
                _ => 0b01000,
            };
            push_word(out, 0x4E00_0C00 | (imm5 << 16) | (reg_bits(*rn)? << 5) | reg_bits(*rd)?);
        }
        Inst::VecMovToGpr { rd, rn, shape, lane, signed } => {
            let lane_bits = shape.lane_bits();
            let imm5 = match lane_bits {
                8 => 0b00001u32 | ((*lane as u32) << 1),
                16 => 0b00010 | ((*lane as u32) << 2),
                32 => 0b00100 | ((*lane as u32) << 3),
                _ => 0b01000 | ((*lane as u32) << 4),
            };
            let word = match (signed, lane_bits) {
                // umov xd for 64-bit lanes, wd otherwise
                (false, 64) => 0x4E00_3C00,
                (false, _) => 0x0E00_3C00,
                (true, 64) => 0x4E00_2C00,
                (true, _) => 0x0E00_2C00,
            };
            push_word(out, word | (imm5 << 16) | (reg_bits(*rn)? << 5) | reg_bits(*rd)?);
        }
        Inst::VecDupLaneScalar { rd, rn, shape, lane } => {
            // dup sd/dd, vn.<t>[lane]
            let imm5 = match shape.lane_bits() {
                32 => 0b00100u32 | ((*lane as u32) << 3),
                _ => 0b01000 | ((*lane as u32) << 4),
            };
            push_word(out, 0x5E00_0400 | (imm5 << 16) | (reg_bits(*rn)? << 5) | reg_bits(*rd)?);
        }
        Inst::Popcnt { rd, rn, is64 } => {
            let rd = reg_bits(*rd)?;
            let rn = reg_bits(*rn)?;
            let scratch = 30u32; // v30
            // fmov d30, xn / fmov s30, wn; the 32-bit form clears the rest
            // of the vector, so stale high bits never reach the count.
            let fmov = if *is64 { 0x9E67_0000 } else { 0x1E27_0000 };
            push_word(out, fmov | (rn << 5) | scratch);
            // cnt v30.8b, v30.8b
            push_word(out, 0x0E20_5800 | (scratch << 5) | scratch);
            // uaddlv h30, v30.8b
            push_word(out, 0x2E30_3800 | (scratch << 5) | scratch);
            // umov wd, v30.h[0]
            push_word(out, 0x0E02_3C00 | (scratch << 5) | rd);
        }
        Inst::LoadLit128 { rd, lo, hi } => {
            // ldr qd, #8 ; b #20 ; .quad lo ; .quad hi
            push_word(out, 0x9C00_0000 | (2 << 5) | reg_bits(*rd)?);
            push_word(out, 0x1400_0005);
            out.extend_from_slice(&lo.to_le_bytes());
            out.extend_from_slice(&hi.to_le_bytes());
        }
        Inst::Adr { rd, label } => {
            let target = match label {
                Some(label) => label_at(*label),
                None => at,
            };
            let disp = branch_disp(at, target);
            if !(-(1 << 20)..(1 << 20)).contains(&disp) {
                return Err(CompileError::bug(format!(
                    "adr displacement {disp:#x} beyond +/-1MiB"
                )));
            }
            let imm = disp as u32 & 0x1F_FFFF;
            let immlo = imm & 3;
            let immhi = imm >> 2;
            push_word(out, 0x1000_0000 | (immlo << 29) | (immhi << 5) | reg_bits(*rd)?);
        }
        Inst::B { label } => {
            let disp = branch_disp(at, label_at(*label));
            encode_b(disp, out)?;
        }
        Inst::CondBr { kind, label } => {
            let disp = branch_disp(at, label_at(*label));
            encode_cond_br(kind, disp, out)?;
        }
        Inst::JTSequence { ridx, targets } => {
            // The table base lives in x27 and the entry in x16, so a spill
            // reload of the index through x16 still reads correctly.
            let ridx = reg_bits(*ridx)?;
            let x16 = X16_SCRATCH.enc();
            let x27 = X27_ADDR_SCRATCH.enc();
            // adr x27, #16 (the table base)
            push_word(out, 0x1000_0000 | (4 << 5) | x27);
            // ldrsw x16, [x27, w_ridx, uxtw #2]
            push_word(out, 0xB8A0_5800 | (ridx << 16) | (x27 << 5) | x16);
            // add x27, x27, x16
            push_word(out, 0x8B00_0000 | (x16 << 16) | (x27 << 5) | x27);
            // br x27
            push_word(out, 0xD61F_0000 | (x27 << 5));
            let table_base = at + 16;
            for target in targets {
                let rel = label_at(*target) as i64 - table_base as i64;
                push_word(out, rel as i32 as u32);
            }
        }
        Inst::Call { func } => {
            call_fixups.push((at, *func));
            push_word(out, 0x9400_0000);
        }
        Inst::CallInd { rn } => {
            push_word(out, 0xD63F_0000 | (reg_bits(*rn)? << 5));
        }
        Inst::Ret => push_word(out, 0xD65F_03C0),
        Inst::Brk => push_word(out, 0xD420_0000),
        Inst::ExitSequence { code } => {
            encode_exit_sequence(*code, out);
        }
    }
    Ok(())
}

fn encode_b(disp: i64, out: &mut Vec<u8>) -> Result<(), CompileError> {
    if disp % 4 != 0 || !(-(1 << 27)..(1 << 27)).contains(&disp) {
        return Err(CompileError::bug(format!(
            "branch displacement {disp:#x} out of B range"
        )));
    }
    let imm26 = ((disp / 4) as u32) & 0x03FF_FFFF;
    push_word(out, 0x1400_0000 | imm26);
    Ok(())
}

/// Range of a 19-bit conditional-branch displacement in bytes.
pub fn cond_br_in_range(disp: i64) -> bool {
    disp % 4 == 0 && (-(1 << 20)..(1 << 20)).contains(&disp)
}

fn encode_cond_br(kind: &CondBrKind, disp: i64, out: &mut Vec<u8>) -> Result<(), CompileError> {
    if !cond_br_in_range(disp) {
        return Err(CompileError::bug(format!(
            "conditional branch displacement {disp:#x} out of range; veneer expansion missed it"
        )));
    }
    let imm19 = ((disp / 4) as u32) & 0x7_FFFF;
    let word = match kind {
        CondBrKind::Cond(cond) => 0x5400_0000 | (imm19 << 5) | (*cond as u32),
        CondBrKind::Zero(reg, is64) => {
            sf(*is64) | 0x3400_0000 | (imm19 << 5) | reg_bits(*reg)?
        }
        CondBrKind::NotZero(reg, is64) => {
            sf(*is64) | 0x3500_0000 | (imm19 << 5) | reg_bits(*reg)?
        }
    };
    push_word(out, word);
    Ok(())
}

fn encode_exit_sequence(code: ExitCode, out: &mut Vec<u8>) {
    let x16 = X16_SCRATCH.enc();
    let x17 = X17_SCRATCH.enc();
    if code != ExitCode::Pending {
        // movz w17, #code ; strb w17, [x0]
        push_word(out, 0x5280_0000 | ((code as u32) << 5) | x17);
        push_word(out, 0x3900_0000 | x17);
    }
    // adr x16, #0 (the trap program counter)
    push_word(out, 0x1000_0000 | x16);
    // str x16, [x0, #TRAP_PC]
    push_word(out, 0xF900_0000 | ((exec_offsets::TRAP_PC / 8) << 10) | x16);
    // mov x16, sp ; str x16, [x0, #TRAP_SP]
    push_word(out, 0x9100_03E0 | x16);
    push_word(out, 0xF900_0000 | ((exec_offsets::TRAP_SP / 8) << 10) | x16);
    // ldr x29, [x0, #ORIG_FP]
    push_word(out, 0xF940_0000 | ((exec_offsets::ORIG_FP / 8) << 10) | 29);
    // ldr x16, [x0, #ORIG_SP]
    push_word(out, 0xF940_0000 | ((exec_offsets::ORIG_SP / 8) << 10) | x16);
    // ldr x30, [x0, #HOST_RETURN_ADDR]
    push_word(out, 0xF940_0000 | ((exec_offsets::HOST_RETURN_ADDR / 8) << 10) | 30);
    // mov sp, x16 ; ret
    push_word(out, 0x9100_001F | (x16 << 5));
    push_word(out, 0xD65F_03C0);
}

/// Picks MOVZ/MOVN + MOVK sequences for an arbitrary integer constant.
/// Returns the instruction list; at most four entries.
pub fn load_constant(rd: VReg, value: u64, is64: bool) -> Vec<Inst> {
    let value = if is64 { value } else { value & 0xFFFF_FFFF };

    // A logical immediate is a single ORR from the zero register.
    if let Some((n, immr, imms)) = encode_bitmask_imm(value, is64) {
        return vec![Inst::AluRRImmLogic {
            op: AluOp::Orr,
            rd,
            rn: VReg::phys(PhysReg(31)),
            n: n != 0,
            immr: immr as u8,
            imms: imms as u8,
            is64,
        }];
    }

    let halves: u32 = if is64 { 4 } else { 2 };
    let nonzero = (0..halves)
        .filter(|idx| (value >> (idx * 16)) & 0xFFFF != 0)
        .count();
    let nonones = (0..halves)
        .filter(|idx| (value >> (idx * 16)) & 0xFFFF != 0xFFFF)
        .count();

    let mut insts = Vec::new();
    if nonones < nonzero {
        // MOVN seeds all-ones halves.
        let mut first = true;
        for idx in 0..halves {
            let half = ((value >> (idx * 16)) & 0xFFFF) as u16;
            if half == 0xFFFF {
                continue;
            }
            if first {
                insts.push(Inst::MovWide {
                    op: MovWideOp::N,
                    rd,
                    imm16: !half,
                    shift: (idx * 16) as u8,
                    is64,
                });
                first = false;
            } else {
                insts.push(Inst::MovWide {
                    op: MovWideOp::K,
                    rd,
                    imm16: half,
                    shift: (idx * 16) as u8,
                    is64,
                });
            }
        }
        if first {
            // All halves are ones.
            insts.push(Inst::MovWide {
                op: MovWideOp::N,
                rd,
                imm16: 0,
                shift: 0,
                is64,
            });
        }
    } else {
        let mut first = true;
        for idx in 0..halves {
            let half = ((value >> (idx * 16)) & 0xFFFF) as u16;
            if half == 0 {
                continue;
            }
            let op = if first { MovWideOp::Z } else { MovWideOp::K };
            insts.push(Inst::MovWide {
                op,
                rd,
                imm16: half,
                shift: (idx * 16) as u8,
                is64,
            });
            first = false;
        }
        if first {
            insts.push(Inst::MovWide {
                op: MovWideOp::Z,
                rd,
                imm16: 0,
                shift: 0,
                is64,
            });
        }
    }
    insts
}

#[cfg(test)]
#[path = "../../tests/arm64/t_encode.rs"]
mod tests;
