// ISO/IEC 15444-9 A.2.1
//
// Variable-length Byte-Aligned Segments. A value is written as 7 bit groups,
// most significant group first. Every byte but the last has its high bit set.
use crate::JPIPError;

/// Number of bytes needed to encode `value`, at least one.
pub fn vbas_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

pub fn encode_vbas(value: u64, out: &mut Vec<u8>) {
    let len = vbas_len(value);
    for k in (0..len).rev() {
        let group = ((value >> (7 * k)) & 0x7f) as u8;
        if k == 0 {
            out.push(group);
        } else {
            out.push(group | 0x80);
        }
    }
}

/// Decodes a VBAS starting at `pos`, returning the value and the number of
/// bytes consumed.
pub fn decode_vbas(bytes: &[u8], pos: usize) -> Result<(u64, usize), JPIPError> {
    let mut value: u64 = 0;
    let mut consumed = 0;
    loop {
        let byte = match bytes.get(pos + consumed) {
            Some(byte) => *byte,
            None => {
                return Err(JPIPError::Truncated {
                    offset: (pos + consumed) as u64,
                })
            }
        };
        if value > u64::MAX >> 7 {
            return Err(JPIPError::ParseError { offset: pos as u64 });
        }
        value = (value << 7) | (byte & 0x7f) as u64;
        consumed += 1;
        if byte & 0x80 == 0 {
            return Ok((value, consumed));
        }
    }
}

/// First VBAS of every message: `[continue:1][bb:2][c:1][id:4]`, the
/// in-class identifier continuing in ordinary 7 bit groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinIdHeader {
    /// 1: class and csn as the previous message, 2: class follows,
    /// 3: class and csn follow.
    pub bb: u8,
    /// Set when the message holds the last byte of its data-bin.
    pub last_byte: bool,
    pub in_class_id: u64,
}

impl BinIdHeader {
    pub fn encoded_len(&self) -> usize {
        let bits = 64 - self.in_class_id.leading_zeros() as usize;
        if bits <= 4 {
            1
        } else {
            1 + (bits - 4).div_ceil(7)
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let len = self.encoded_len();
        let continuation = if len > 1 { 0x80 } else { 0 };
        let first = ((self.in_class_id >> (7 * (len - 1))) & 0x0f) as u8;
        out.push(
            continuation
                | ((self.bb & 0b11) << 5)
                | if self.last_byte { 0x10 } else { 0 }
                | first,
        );
        for k in (0..len - 1).rev() {
            let group = ((self.in_class_id >> (7 * k)) & 0x7f) as u8;
            out.push(if k == 0 { group } else { group | 0x80 });
        }
    }

    pub fn decode(bytes: &[u8], pos: usize) -> Result<(BinIdHeader, usize), JPIPError> {
        let first = *bytes
            .get(pos)
            .ok_or(JPIPError::Truncated { offset: pos as u64 })?;
        let mut header = BinIdHeader {
            bb: (first >> 5) & 0b11,
            last_byte: first & 0x10 != 0,
            in_class_id: (first & 0x0f) as u64,
        };
        let mut consumed = 1;
        if first & 0x80 != 0 {
            let (rest, used) = decode_vbas(bytes, pos + 1)?;
            let bits = 7 * used as u32;
            if bits >= 64 || header.in_class_id.leading_zeros() < bits {
                return Err(JPIPError::ParseError { offset: pos as u64 });
            }
            header.in_class_id = (header.in_class_id << bits) | rest;
            consumed += used;
        }
        Ok((header, consumed))
    }
}
