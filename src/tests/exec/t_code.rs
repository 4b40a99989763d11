use super::{CodeSegment, ExecutableCode};

#[test]
fn test_append_aligns_sections_to_16() {
    let mut segment = CodeSegment::new();
    let first = segment.append(&[0xAA; 20]);
    let second = segment.append(&[0xBB; 4]);
    assert_eq!(first, 0);
    assert_eq!(second, 32);
    // Filler between sections is the brk pattern, four bytes at a time.
    let filler = &segment.bytes()[20..24];
    assert_eq!(filler, &0xD43E_0000u32.to_le_bytes());
}

#[test]
fn test_patch_u32_rewrites_in_place() {
    let mut segment = CodeSegment::new();
    segment.push_u32(0x1111_1111);
    segment.push_u32(0x2222_2222);
    segment.patch_u32(4, 0xDEAD_BEEF).unwrap();
    assert_eq!(&segment.bytes()[4..8], &0xDEAD_BEEFu32.to_le_bytes());
    assert!(segment.patch_u32(100, 0).is_err());
}

#[test]
fn test_install_publishes_bytes() {
    let mut segment = CodeSegment::new();
    // ret, plus padding.
    segment.push_u32(0xD65F_03C0);
    let code = ExecutableCode::install(&segment).unwrap();
    assert_eq!(code.len(), 4);
    let word = unsafe { std::ptr::read(code.ptr_at(0) as *const u32) };
    assert_eq!(word, 0xD65F_03C0);
}
