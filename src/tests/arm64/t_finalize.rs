use super::finalize;
use crate::targets::arm64::inst::*;
use crate::targets::arm64::regs::xreg;

fn x(n: u8) -> VReg {
    VReg::phys(xreg(n))
}

fn words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

#[test]
fn test_forward_branch_resolution() {
    let mut vcode = VCode::new();
    let target = vcode.alloc_label();
    vcode.push(Inst::B { label: target });
    vcode.push(Inst::Brk);
    vcode.push(Inst::LabelDef { label: target });
    vcode.push(Inst::Ret);

    let code = finalize(&vcode).unwrap();
    let words = words(&code.bytes);
    // b +8, brk, ret
    assert_eq!(words[0], 0x14000002);
    assert_eq!(words[2], 0xD65F03C0);
}

#[test]
fn test_backward_branch_resolution() {
    let mut vcode = VCode::new();
    let top = vcode.alloc_label();
    vcode.push(Inst::LabelDef { label: top });
    vcode.push(Inst::Brk);
    vcode.push(Inst::B { label: top });

    let code = finalize(&vcode).unwrap();
    let words = words(&code.bytes);
    // b -4 from offset 4.
    assert_eq!(words[1], 0x14000000 | (0x03FF_FFFF & ((-1i32) as u32)));
}

#[test]
fn test_labels_have_zero_size() {
    let mut vcode = VCode::new();
    let a = vcode.alloc_label();
    let b = vcode.alloc_label();
    vcode.push(Inst::LabelDef { label: a });
    vcode.push(Inst::LabelDef { label: b });
    vcode.push(Inst::Ret);
    let code = finalize(&vcode).unwrap();
    assert_eq!(code.bytes.len(), 4);
}

#[test]
fn test_cond_branch_within_range_is_single_word() {
    let mut vcode = VCode::new();
    let target = vcode.alloc_label();
    vcode.push(Inst::CondBr {
        kind: CondBrKind::Cond(Cond::Eq),
        label: target,
    });
    vcode.push(Inst::Brk);
    vcode.push(Inst::LabelDef { label: target });
    vcode.push(Inst::Ret);
    let code = finalize(&vcode).unwrap();
    // b.eq +8
    assert_eq!(words(&code.bytes)[0], 0x54000040);
}

/// A conditional branch whose target sits beyond the 19-bit displacement
/// range is expanded into an inverted branch over an unconditional far
/// branch.
#[test]
fn test_out_of_range_cond_branch_gets_veneer() {
    let mut vcode = VCode::new();
    let target = vcode.alloc_label();
    vcode.push(Inst::CondBr {
        kind: CondBrKind::Zero(x(0), false),
        label: target,
    });
    // Pad past +-1MiB of conditional reach.
    let padding = (1 << 20) / 4 + 16;
    for _ in 0..padding {
        vcode.push(Inst::Brk);
    }
    vcode.push(Inst::LabelDef { label: target });
    vcode.push(Inst::Ret);

    let code = finalize(&vcode).unwrap();
    let words = words(&code.bytes);
    // cbnz w0, +8 (inverted, skipping the far branch)
    assert_eq!(words[0], 0x35000040);
    // b <target>, reaching the ret at the end.
    let far = words[1];
    assert_eq!(far & 0xFC00_0000, 0x1400_0000);
    let disp = (far & 0x03FF_FFFF) as i64 * 4;
    assert_eq!(disp, 4 * (padding as i64 + 1));
    // Total length grew by exactly one word.
    assert_eq!(code.bytes.len(), (padding + 3) * 4);
}

#[test]
fn test_unbound_label_is_a_bug() {
    let mut vcode = VCode::new();
    let dangling = vcode.alloc_label();
    vcode.push(Inst::CondBr {
        kind: CondBrKind::Cond(Cond::Ne),
        label: dangling,
    });
    let error = finalize(&vcode).unwrap_err();
    assert!(error.to_string().starts_with("BUG:"));
}
