use super::*;
use crate::exec::context::ExitCode;
use crate::targets::arm64::inst::*;
use crate::targets::arm64::regs::{RegClass, SP, xreg};

fn x(n: u8) -> VReg {
    VReg::phys(xreg(n))
}

fn enc(inst: &Inst) -> Vec<u8> {
    enc_at(inst, 0, |_| 0)
}

fn enc_at(inst: &Inst, at: u32, labels: impl Fn(Label) -> u32) -> Vec<u8> {
    let mut out = Vec::new();
    let mut fixups = Vec::new();
    encode_inst(inst, at, &labels, &mut out, &mut fixups).unwrap();
    out
}

fn word(inst: &Inst) -> u32 {
    let bytes = enc(inst);
    assert_eq!(bytes.len(), 4);
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[test]
fn test_alu_register_forms() {
    // add x0, x1, x2
    assert_eq!(
        word(&Inst::AluRRR {
            op: AluOp::Add,
            rd: x(0),
            rn: x(1),
            rm: x(2),
            is64: true
        }),
        0x8B020020
    );
    // udiv w4, w5, w6
    assert_eq!(
        word(&Inst::AluRRR {
            op: AluOp::UDiv,
            rd: x(4),
            rn: x(5),
            rm: x(6),
            is64: false
        }),
        0x1AC608A4
    );
    // madd x0, x1, x2, xzr  (mul x0, x1, x2)
    assert_eq!(
        word(&Inst::MAdd {
            rd: x(0),
            rn: x(1),
            rm: x(2),
            ra: x(31),
            is64: true
        }),
        0x9B027C20
    );
}

#[test]
fn test_alu_immediate_forms() {
    // sub w3, w4, #16
    assert_eq!(
        word(&Inst::AluRRImm12 {
            op: AluOp::Sub,
            rd: x(3),
            rn: x(4),
            imm12: 16,
            shift12: false,
            is64: false
        }),
        0x51004083
    );
    // add sp, sp, #1, lsl #12
    assert_eq!(
        word(&Inst::AluRRImm12 {
            op: AluOp::Add,
            rd: VReg::phys(SP),
            rn: VReg::phys(SP),
            imm12: 1,
            shift12: true,
            is64: true
        }),
        0x914007FF
    );
}

#[test]
fn test_moves_and_wide_immediates() {
    // mov x0, x1 == orr x0, xzr, x1
    assert_eq!(
        word(&Inst::MovRR {
            rd: x(0),
            rn: x(1),
            is64: true
        }),
        0xAA0103E0
    );
    // movz w5, #42
    assert_eq!(
        word(&Inst::MovWide {
            op: MovWideOp::Z,
            rd: x(5),
            imm16: 42,
            shift: 0,
            is64: false
        }),
        0x52800545
    );
    // movk x7, #0xbeef, lsl #16
    assert_eq!(
        word(&Inst::MovWide {
            op: MovWideOp::K,
            rd: x(7),
            imm16: 0xBEEF,
            shift: 16,
            is64: true
        }),
        0xF2B7DDE7
    );
}

#[test]
fn test_bitmask_immediates() {
    assert_eq!(encode_bitmask_imm(0xFF, true), Some((1, 0, 7)));
    assert_eq!(encode_bitmask_imm(0x5555_5555_5555_5555, true), Some((0, 0, 0x3C)));
    // 0xF0F0... : size 8 elements of 4 ones rotated by 4.
    assert!(encode_bitmask_imm(0xF0F0_F0F0_F0F0_F0F0, true).is_some());
    assert_eq!(encode_bitmask_imm(0, true), None);
    assert_eq!(encode_bitmask_imm(u64::MAX, true), None);
    // Non-repeating pattern.
    assert_eq!(encode_bitmask_imm(0x1234_5678_9ABC_DEF0, true), None);

    // orr x0, xzr, #0xff
    assert_eq!(
        word(&Inst::AluRRImmLogic {
            op: AluOp::Orr,
            rd: x(0),
            rn: x(31),
            n: true,
            immr: 0,
            imms: 7,
            is64: true
        }),
        0xB2401FE0
    );
}

#[test]
fn test_load_store_scaled_and_unscaled() {
    // ldr x1, [x2, #16]
    assert_eq!(
        word(&Inst::ULoad {
            rd: x(1),
            mem: AMode::RegOffset { rn: x(2), off: 16 },
            bits: 64
        }),
        0xF9400841
    );
    // str w3, [sp]
    assert_eq!(
        word(&Inst::Store {
            rs: x(3),
            mem: AMode::RegOffset { rn: VReg::phys(SP), off: 0 },
            bits: 32
        }),
        0xB90003E3
    );
    // ldur x1, [x2, #-8]
    assert_eq!(
        word(&Inst::ULoad {
            rd: x(1),
            mem: AMode::RegOffset { rn: x(2), off: -8 },
            bits: 64
        }),
        0xF85F8041
    );
    // ldrb w9, [x3, x4]
    assert_eq!(
        word(&Inst::ULoad {
            rd: x(9),
            mem: AMode::RegReg { rn: x(3), rm: x(4), shifted: false },
            bits: 8
        }),
        0x38646869
    );
    // str x5, [x6, #32760] -- the largest scaled 8-byte offset
    assert_eq!(
        word(&Inst::Store {
            rs: x(5),
            mem: AMode::RegOffset { rn: x(6), off: 32760 },
            bits: 64
        }),
        0xF93FFCC5
    );
    // stp x29, x30, [sp, #-16]!
    assert_eq!(
        word(&Inst::StpPre { rt: x(29), rt2: x(30) }),
        0xA9BF7BFD
    );
    // ldp x29, x30, [sp], #16
    assert_eq!(
        word(&Inst::LdpPost { rt: x(29), rt2: x(30) }),
        0xA8C17BFD
    );
}

/// Offset corner cases crossed with every access size: every combination
/// must pick the shortest admissible form, and the length-only mode must
/// agree with the emitted bytes.
#[test]
fn test_offset_corner_set_lengths_agree() {
    let offsets: [i64; 19] = [
        -1,
        0,
        1,
        2,
        15,
        16,
        17,
        -128,
        -256,
        80,
        255,
        4096,
        8192,
        32760,
        65520,
        1048584,
        1 << 27,
        1 << 30,
        (1 << 31) - 8,
    ];
    for bits in [8u8, 16, 32, 64] {
        for off in offsets {
            let inst = Inst::ULoad {
                rd: x(1),
                mem: AMode::RegOffset { rn: x(2), off },
                bits,
            };
            let expected = encoded_len(&inst);
            let bytes = enc(&inst);
            assert_eq!(
                bytes.len() as u32,
                expected,
                "length mismatch for {bits}-bit load at offset {off}"
            );
            // Each emitted chunk is a whole number of words.
            assert_eq!(bytes.len() % 4, 0);
        }
    }
}

#[test]
fn test_long_offset_synthesis_uses_scratch_add() {
    // 0x100008 needs add x27, base, #0x100, lsl #12 then a scaled load.
    let inst = Inst::ULoad {
        rd: x(1),
        mem: AMode::RegOffset { rn: x(2), off: 0x10_0008 },
        bits: 64,
    };
    let bytes = enc(&inst);
    assert_eq!(bytes.len(), 8);
    let first = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    // add x27, x2, #0x100, lsl #12
    assert_eq!(first, 0x9144005B);
    let second = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    // ldr x1, [x27, #8]
    assert_eq!(second, 0xF9400761);
}

#[test]
fn test_very_large_offset_uses_literal_pool() {
    let inst = Inst::ULoad {
        rd: x(1),
        mem: AMode::RegOffset { rn: x(2), off: 1 << 30 },
        bits: 32,
    };
    let bytes = enc(&inst);
    assert_eq!(bytes.len(), 20);
    // The third word is the raw offset literal.
    let literal = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    assert_eq!(literal, 1 << 30);
}

#[test]
fn test_branches() {
    let target = Label(0);
    // b +16
    let bytes = enc_at(&Inst::B { label: target }, 0, |_| 16);
    assert_eq!(u32::from_le_bytes(bytes.try_into().unwrap()), 0x14000004);
    // cbz x3, +8
    let bytes = enc_at(
        &Inst::CondBr {
            kind: CondBrKind::Zero(x(3), true),
            label: target,
        },
        0,
        |_| 8,
    );
    assert_eq!(u32::from_le_bytes(bytes.try_into().unwrap()), 0xB4000043);
    // b.ne -4
    let bytes = enc_at(
        &Inst::CondBr {
            kind: CondBrKind::Cond(Cond::Ne),
            label: target,
        },
        4,
        |_| 0,
    );
    assert_eq!(u32::from_le_bytes(bytes.try_into().unwrap()), 0x54FFFFE1);
    // ret
    assert_eq!(word(&Inst::Ret), 0xD65F03C0);
    // blr x8
    assert_eq!(word(&Inst::CallInd { rn: x(8) }), 0xD63F0100);
}

#[test]
fn test_direct_call_records_fixup() {
    let mut out = Vec::new();
    let mut fixups = Vec::new();
    encode_inst(&Inst::Call { func: 7 }, 24, &|_| 0, &mut out, &mut fixups).unwrap();
    assert_eq!(u32::from_le_bytes(out.try_into().unwrap()), 0x94000000);
    assert_eq!(fixups, vec![(24, 7)]);
}

#[test]
fn test_jump_table_sequence() {
    let targets = vec![Label(0), Label(1)];
    let bytes = enc_at(
        &Inst::JTSequence { ridx: x(2), targets },
        0,
        |label| if label == Label(0) { 100 } else { 200 },
    );
    assert_eq!(bytes.len(), 24);
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    assert_eq!(words[0], 0x1000009B); // adr x27, #16
    assert_eq!(words[1], 0xB8A25B70); // ldrsw x16, [x27, w2, uxtw #2]
    assert_eq!(words[2], 0x8B10037B); // add x27, x27, x16
    assert_eq!(words[3], 0xD61F0360); // br x27
    assert_eq!(words[4], 84); // 100 - 16
    assert_eq!(words[5], 184); // 200 - 16
}

#[test]
fn test_exit_sequence_shape() {
    let full = enc(&Inst::ExitSequence {
        code: ExitCode::Unreachable,
    });
    assert_eq!(full.len(), 44);
    // movz w17, #1 then strb w17, [x0]
    let first = u32::from_le_bytes(full[0..4].try_into().unwrap());
    assert_eq!(first, 0x52800031);
    let second = u32::from_le_bytes(full[4..8].try_into().unwrap());
    assert_eq!(second, 0x39000011);
    // Ends with ret.
    let last = u32::from_le_bytes(full[40..44].try_into().unwrap());
    assert_eq!(last, 0xD65F03C0);

    let pending = enc(&Inst::ExitSequence {
        code: ExitCode::Pending,
    });
    assert_eq!(pending.len(), 36);
}

#[test]
fn test_load_constant_selection() {
    let rd = x(3);
    // Small positive: one movz.
    let insts = load_constant(rd, 42, true);
    assert_eq!(insts.len(), 1);
    assert!(matches!(
        insts[0],
        Inst::MovWide { op: MovWideOp::Z, imm16: 42, shift: 0, .. }
    ));

    // Two halves: movz + movk.
    let insts = load_constant(rd, 0x1234_5678, false);
    assert_eq!(insts.len(), 2);
    assert!(matches!(
        insts[0],
        Inst::MovWide { op: MovWideOp::Z, imm16: 0x5678, shift: 0, .. }
    ));
    assert!(matches!(
        insts[1],
        Inst::MovWide { op: MovWideOp::K, imm16: 0x1234, shift: 16, .. }
    ));

    // Mostly-ones: a single movn.
    let insts = load_constant(rd, 0xFFFF_FFFF_FFFF_0005, true);
    assert_eq!(insts.len(), 1);
    assert!(matches!(
        insts[0],
        Inst::MovWide { op: MovWideOp::N, imm16, shift: 0, .. } if imm16 == !0x0005u16
    ));

    // A bitmask immediate becomes one orr.
    let insts = load_constant(rd, 0xFF, true);
    assert_eq!(insts.len(), 1);
    assert!(matches!(insts[0], Inst::AluRRImmLogic { op: AluOp::Orr, .. }));

    // Zero is a single movz #0.
    let insts = load_constant(rd, 0, true);
    assert_eq!(insts.len(), 1);
}

#[test]
fn test_fpu_arithmetic() {
    let v = |n: u8| VReg::phys(crate::targets::arm64::regs::vreg_phys(n));
    // fadd d0, d1, d2
    assert_eq!(
        word(&Inst::FpuRRR {
            op: FpuOp2::Add,
            rd: v(0),
            rn: v(1),
            rm: v(2),
            is64: true
        }),
        0x1E622820
    );
    // fsqrt s3, s4
    assert_eq!(
        word(&Inst::FpuRR {
            op: FpuOp1::Sqrt,
            rd: v(3),
            rn: v(4),
            is64: false
        }),
        0x1E21C083
    );
    // fcvtzs w0, s1
    assert_eq!(
        word(&Inst::FpuToInt {
            rd: x(0),
            rn: v(1),
            signed: true,
            from64: false,
            to64: false
        }),
        0x1E380020
    );
    // scvtf d2, x3
    assert_eq!(
        word(&Inst::IntToFpu {
            rd: v(2),
            rn: x(3),
            signed: true,
            from64: true,
            to64: true
        }),
        0x9E620062
    );
    // fmov x1, d5
    assert_eq!(
        word(&Inst::MovFromFpu {
            rd: x(1),
            rn: v(5),
            is64: true
        }),
        0x9E6600A1
    );
}

#[test]
fn test_extend_forms() {
    // sxtb w1, w2 == sbfm w1, w2, #0, #7
    assert_eq!(
        word(&Inst::Extend {
            rd: x(1),
            rn: x(2),
            signed: true,
            from_bits: 8,
            to64: false
        }),
        0x13001C41
    );
    // sxtw x3, w4
    assert_eq!(
        word(&Inst::Extend {
            rd: x(3),
            rn: x(4),
            signed: true,
            from_bits: 32,
            to64: true
        }),
        0x93407C83
    );
    // uxtw (mov w5, w6)
    assert_eq!(
        word(&Inst::Extend {
            rd: x(5),
            rn: x(6),
            signed: false,
            from_bits: 32,
            to64: true
        }),
        0x2A0603E5
    );
}

#[test]
fn test_virtual_register_is_a_bug() {
    let mut vcode = VCode::new();
    let virt = vcode.alloc_vreg(RegClass::Int);
    let mut out = Vec::new();
    let mut fixups = Vec::new();
    let error = encode_inst(
        &Inst::MovRR { rd: virt, rn: x(0), is64: true },
        0,
        &|_| 0,
        &mut out,
        &mut fixups,
    )
    .unwrap_err();
    assert!(error.to_string().starts_with("BUG:"));
}
