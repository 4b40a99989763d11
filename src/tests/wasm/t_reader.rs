use super::Reader;

#[test]
fn test_u32_leb_single_and_multi_byte() {
    let bytes = [0x05, 0xE5, 0x8E, 0x26, 0xFF, 0xFF, 0xFF, 0xFF, 0x0F];
    let mut reader = Reader::new(&bytes);
    assert_eq!(reader.u32_leb().unwrap(), 5);
    assert_eq!(reader.u32_leb().unwrap(), 624485);
    assert_eq!(reader.u32_leb().unwrap(), u32::MAX);
    assert!(reader.is_empty());
}

#[test]
fn test_u32_leb_overlong_rejected() {
    // Five bytes with high bits that overflow 32 bits.
    let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
    let mut reader = Reader::new(&bytes);
    assert!(reader.u32_leb().is_err());
}

#[test]
fn test_i32_leb_negative() {
    let bytes = [0x7F, 0x80, 0x7F];
    let mut reader = Reader::new(&bytes);
    assert_eq!(reader.i32_leb().unwrap(), -1);
    assert_eq!(reader.i32_leb().unwrap(), -128);
}

#[test]
fn test_i64_leb_extremes() {
    let mut encoded = Vec::new();
    encode_sleb(i64::MIN, &mut encoded);
    encode_sleb(i64::MAX, &mut encoded);
    let mut reader = Reader::new(&encoded);
    assert_eq!(reader.i64_leb().unwrap(), i64::MIN);
    assert_eq!(reader.i64_leb().unwrap(), i64::MAX);
}

fn encode_sleb(mut value: i64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        let sign = byte & 0x40 != 0;
        if (value == 0 && !sign) || (value == -1 && sign) {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

#[test]
fn test_name_reads_utf8() {
    let bytes = [0x03, b'a', b'd', b'd', 0x00];
    let mut reader = Reader::new(&bytes);
    assert_eq!(reader.name().unwrap(), "add");
    assert_eq!(reader.pos(), 4);
}

#[test]
fn test_reads_past_end_fail_with_offset() {
    let mut reader = Reader::new(&[0x01]);
    reader.byte().unwrap();
    let error = reader.byte().unwrap_err();
    assert_eq!(error.offset, 1);
}

#[test]
fn test_f32_f64_little_endian() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1.5f32.to_le_bytes());
    bytes.extend_from_slice(&(-2.25f64).to_le_bytes());
    let mut reader = Reader::new(&bytes);
    assert_eq!(reader.f32().unwrap(), 1.5);
    assert_eq!(reader.f64().unwrap(), -2.25);
}
