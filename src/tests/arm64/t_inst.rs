use super::*;
use crate::targets::arm64::regs::{RegClass, xreg};

#[test]
fn test_vreg_phys_prefix() {
    let phys = VReg::phys(xreg(5));
    assert!(phys.is_phys());
    assert_eq!(phys.as_phys(), Some(xreg(5)));

    let virt = VReg::virt(0, RegClass::Int);
    assert!(!virt.is_phys());
    assert_eq!(virt.as_phys(), None);
    assert_eq!(virt.index(), VReg::FIRST_VIRTUAL);
}

#[test]
fn test_push_preserves_order() {
    let mut vcode = VCode::new();
    let a = vcode.push(Inst::Brk);
    let b = vcode.push(Inst::Ret);
    assert_eq!(vcode.order(), vec![a, b]);
}

#[test]
fn test_insert_before_head_and_middle() {
    let mut vcode = VCode::new();
    let first = vcode.push(Inst::Brk);
    let last = vcode.push(Inst::Ret);
    let head_label = vcode.alloc_label();
    let middle_label = vcode.alloc_label();
    let head = vcode.insert_before(first, Inst::LabelDef { label: head_label });
    let middle = vcode.insert_before(last, Inst::LabelDef { label: middle_label });
    assert_eq!(vcode.order(), vec![head, first, middle, last]);
}

#[test]
fn test_insert_after_tail() {
    let mut vcode = VCode::new();
    let only = vcode.push(Inst::Brk);
    let tail = vcode.insert_after(only, Inst::Ret);
    assert_eq!(vcode.order(), vec![only, tail]);
    assert_eq!(vcode.next(tail), None);
}

#[test]
fn test_use_def_visitors() {
    let mut vcode = VCode::new();
    let a = vcode.alloc_vreg(RegClass::Int);
    let b = vcode.alloc_vreg(RegClass::Int);
    let c = vcode.alloc_vreg(RegClass::Int);
    let inst = Inst::AluRRR {
        op: AluOp::Add,
        rd: c,
        rn: a,
        rm: b,
        is64: true,
    };
    let mut uses = Vec::new();
    inst.for_each_use(|vreg| uses.push(vreg));
    assert_eq!(uses, vec![a, b]);
    let mut defs = Vec::new();
    inst.for_each_def(|vreg| defs.push(vreg));
    assert_eq!(defs, vec![c]);
}

#[test]
fn test_map_regs_rewrites_memory_operands() {
    let mut vcode = VCode::new();
    let base = vcode.alloc_vreg(RegClass::Int);
    let rd = vcode.alloc_vreg(RegClass::Int);
    let mut inst = Inst::ULoad {
        rd,
        mem: AMode::RegOffset { rn: base, off: 8 },
        bits: 64,
    };
    inst.map_regs(|vreg| {
        if *vreg == base {
            *vreg = VReg::phys(xreg(9));
        }
    });
    let Inst::ULoad { mem: AMode::RegOffset { rn, .. }, .. } = inst else {
        panic!("shape changed");
    };
    assert_eq!(rn, VReg::phys(xreg(9)));
}
