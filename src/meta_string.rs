use std::collections::HashMap;
use std::rc::Rc;

use crate::buffer::MemoryBuffer;
use crate::constants::MAX_META_STRING_LEN;
use crate::hash::hash64;
use crate::result::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaEncoding {
    LowerSpecial = 0,
    LowerUpperDigitSpecial = 1,
    FirstToLowerSpecial = 2,
    AllToLowerSpecial = 3,
    Utf8 = 4,
}

impl MetaEncoding {
    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::LowerSpecial),
            1 => Ok(Self::LowerUpperDigitSpecial),
            2 => Ok(Self::FirstToLowerSpecial),
            3 => Ok(Self::AllToLowerSpecial),
            4 => Ok(Self::Utf8),
            _ => Err(Error::Malformed("unknown meta-string encoding tag")),
        }
    }
}

const STRIP_LAST_FLAG: u8 = 0x08;
const ENCODING_MASK: u8 = 0x07;

pub fn encode(source: &str) -> Result<Vec<u8>> {
    if source.chars().count() > MAX_META_STRING_LEN {
        return Err(Error::Malformed("namespace or type name too long"));
    }
    match select_encoding(source) {
        MetaEncoding::LowerSpecial => {
            pack(MetaEncoding::LowerSpecial, 5, source.chars().map(|c| lower_special_value(c).unwrap_or_default()))
        }
        MetaEncoding::FirstToLowerSpecial => {
            let values = source
                .chars()
                .enumerate()
                .map(|(i, c)| {
                    let c = if i == 0 { c.to_ascii_lowercase() } else { c };
                    lower_special_value(c).unwrap_or_default()
                });
            pack(MetaEncoding::FirstToLowerSpecial, 5, values)
        }
        MetaEncoding::AllToLowerSpecial => {
            let mut values = Vec::with_capacity(source.len());
            for c in source.chars() {
                if c.is_ascii_uppercase() {
                    values.push(ESCAPE_VALUE);
                    values.push(lower_special_value(c.to_ascii_lowercase()).unwrap_or_default());
                } else {
                    values.push(lower_special_value(c).unwrap_or_default());
                }
            }
            pack(MetaEncoding::AllToLowerSpecial, 5, values.into_iter())
        }
        MetaEncoding::LowerUpperDigitSpecial => {
            pack(MetaEncoding::LowerUpperDigitSpecial, 6, source.chars().map(|c| luds_value(c).unwrap_or_default()))
        }
        MetaEncoding::Utf8 => {
            let mut out = Vec::with_capacity(source.len() + 1);
            out.push(MetaEncoding::Utf8 as u8);
            out.extend_from_slice(source.as_bytes());
            Ok(out)
        }
    }
}

pub fn decode(payload: &[u8]) -> Result<String> {
    let (&header, content) = payload
        .split_first()
        .ok_or(Error::Malformed("empty meta-string payload"))?;
    let encoding = MetaEncoding::from_tag(header & ENCODING_MASK)?;
    let strip_last = header & STRIP_LAST_FLAG != 0;
    match encoding {
        MetaEncoding::LowerSpecial => {
            let values = unpack(content, 5, strip_last);
            values.into_iter().map(lower_special_char).collect()
        }
        MetaEncoding::FirstToLowerSpecial => {
            let values = unpack(content, 5, strip_last);
            let mut out = String::with_capacity(values.len());
            for (i, v) in values.into_iter().enumerate() {
                let c = lower_special_char(v)?;
                out.push(if i == 0 { c.to_ascii_uppercase() } else { c });
            }
            Ok(out)
        }
        MetaEncoding::AllToLowerSpecial => {
            let values = unpack(content, 5, strip_last);
            let mut out = String::with_capacity(values.len());
            let mut escaped = false;
            for v in values {
                if escaped {
                    out.push(lower_special_char(v)?.to_ascii_uppercase());
                    escaped = false;
                } else if v == ESCAPE_VALUE {
                    escaped = true;
                } else {
                    out.push(lower_special_char(v)?);
                }
            }
            if escaped {
                return Err(Error::Malformed("dangling escape in meta-string"));
            }
            Ok(out)
        }
        MetaEncoding::LowerUpperDigitSpecial => {
            let values = unpack(content, 6, strip_last);
            values.into_iter().map(luds_char).collect()
        }
        MetaEncoding::Utf8 => String::from_utf8(content.to_vec())
            .map_err(|_| Error::Malformed("meta-string is not valid UTF-8")),
    }
}

fn select_encoding(source: &str) -> MetaEncoding {
    if !source.is_ascii() {
        return MetaEncoding::Utf8;
    }
    let chars: Vec<char> = source.chars().collect();
    if chars.iter().all(|&c| lower_special_value(c).is_some()) {
        return MetaEncoding::LowerSpecial;
    }

    let first_to_lower = chars
        .first()
        .is_some_and(|c| c.is_ascii_uppercase())
        && chars[1..].iter().all(|&c| lower_special_value(c).is_some());
    let uppers = chars.iter().filter(|c| c.is_ascii_uppercase()).count();
    let all_to_lower = uppers > 0
        && chars
            .iter()
            .all(|&c| c != '|' && (c.is_ascii_uppercase() || lower_special_value(c).is_some()));
    let luds = chars.iter().all(|&c| luds_value(c).is_some());

    let mut best = (source.len() * 8, MetaEncoding::Utf8);
    if luds && chars.len() * 6 < best.0 {
        best = (chars.len() * 6, MetaEncoding::LowerUpperDigitSpecial);
    }
    if all_to_lower && (chars.len() + uppers) * 5 < best.0 {
        best = ((chars.len() + uppers) * 5, MetaEncoding::AllToLowerSpecial);
    }
    if first_to_lower && chars.len() * 5 < best.0 {
        best = (chars.len() * 5, MetaEncoding::FirstToLowerSpecial);
    }
    best.1
}

fn pack(
    encoding: MetaEncoding,
    width: u32,
    values: impl Iterator<Item = u32>,
) -> Result<Vec<u8>> {
    let mut out = vec![encoding as u8];
    let mut acc = 0u32;
    let mut bits = 0u32;
    let mut total_bits = 0usize;
    for v in values {
        acc = (acc << width) | v;
        bits += width;
        total_bits += width as usize;
        while bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
        }
    }
    if bits > 0 {
        out.push((acc << (8 - bits)) as u8);
    }
    let padding = (out.len() - 1) * 8 - total_bits;
    if padding >= width as usize {
        out[0] |= STRIP_LAST_FLAG;
    }
    Ok(out)
}

fn unpack(content: &[u8], width: u32, strip_last: bool) -> Vec<u32> {
    let mut count = content.len() * 8 / width as usize;
    if strip_last {
        count = count.saturating_sub(1);
    }
    let mut values = Vec::with_capacity(count);
    let mut acc = 0u32;
    let mut bits = 0u32;
    let mut bytes = content.iter();
    while values.len() < count {
        while bits < width {
            acc = (acc << 8) | u32::from(bytes.next().copied().unwrap_or_default());
            bits += 8;
        }
        bits -= width;
        values.push((acc >> bits) & ((1 << width) - 1));
    }
    values
}

const ESCAPE_VALUE: u32 = 29;

fn lower_special_value(c: char) -> Option<u32> {
    match c {
        'a'..='z' => Some(c as u32 - 'a' as u32),
        '.' => Some(26),
        '_' => Some(27),
        '$' => Some(28),
        '|' => Some(29),
        _ => None,
    }
}

fn lower_special_char(v: u32) -> Result<char> {
    match v {
        0..=25 => Ok((b'a' + v as u8) as char),
        26 => Ok('.'),
        27 => Ok('_'),
        28 => Ok('$'),
        29 => Ok('|'),
        _ => Err(Error::Malformed("meta-string value outside alphabet")),
    }
}

fn luds_value(c: char) -> Option<u32> {
    match c {
        'a'..='z' => Some(c as u32 - 'a' as u32),
        'A'..='Z' => Some(c as u32 - 'A' as u32 + 26),
        '0'..='9' => Some(c as u32 - '0' as u32 + 52),
        '.' => Some(62),
        '_' => Some(63),
        _ => None,
    }
}

fn luds_char(v: u32) -> Result<char> {
    match v {
        0..=25 => Ok((b'a' + v as u8) as char),
        26..=51 => Ok((b'A' + (v - 26) as u8) as char),
        52..=61 => Ok((b'0' + (v - 52) as u8) as char),
        62 => Ok('.'),
        63 => Ok('_'),
        _ => Err(Error::Malformed("meta-string value outside alphabet")),
    }
}

#[derive(Debug)]
pub struct MetaStringBytes {
    bytes: Box<[u8]>,
    hash: u64,
}

impl MetaStringBytes {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn decode_string(&self) -> Result<String> {
        decode(&self.bytes)
    }
}

impl PartialEq for MetaStringBytes {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for MetaStringBytes {}

#[derive(Debug, Default)]
pub struct MetaStringResolver {
    by_payload: HashMap<Box<[u8]>, Rc<MetaStringBytes>>,
    by_source: HashMap<Box<str>, Rc<MetaStringBytes>>,
}

impl MetaStringResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern_str(&mut self, source: &str) -> Result<Rc<MetaStringBytes>> {
        if let Some(interned) = self.by_source.get(source) {
            return Ok(interned.clone());
        }
        let payload = encode(source)?;
        let interned = self.intern_payload(&payload);
        self.by_source.insert(source.into(), interned.clone());
        Ok(interned)
    }

    pub fn intern_payload(&mut self, payload: &[u8]) -> Rc<MetaStringBytes> {
        if let Some(interned) = self.by_payload.get(payload) {
            return interned.clone();
        }
        let interned = Rc::new(MetaStringBytes {
            bytes: payload.into(),
            hash: hash64(payload),
        });
        self.by_payload.insert(payload.into(), interned.clone());
        interned
    }
}

#[derive(Debug, Default)]
pub struct MetaWriterState {
    written: HashMap<usize, u32>,
}

impl MetaWriterState {
    pub fn write(&mut self, buf: &mut MemoryBuffer, meta: &Rc<MetaStringBytes>) {
        let key = Rc::as_ptr(meta) as usize;
        if let Some(&token) = self.written.get(&key) {
            buf.write_var_uint32(token << 1);
            return;
        }
        let token = self.written.len() as u32;
        self.written.insert(key, token);
        buf.write_var_uint32((token << 1) | 1);
        buf.write_var_uint32(meta.bytes.len() as u32);
        buf.write_bytes(&meta.bytes);
    }

    pub fn reset(&mut self) {
        self.written.clear();
    }
}

#[derive(Debug, Default)]
pub struct MetaReaderState {
    read: Vec<Rc<MetaStringBytes>>,
}

impl MetaReaderState {
    pub fn read(
        &mut self,
        buf: &mut MemoryBuffer,
        pool: &mut MetaStringResolver,
    ) -> Result<Rc<MetaStringBytes>> {
        let token = buf.read_var_uint32()?;
        if token & 1 == 1 {
            let len = buf.read_var_uint32()? as usize;
            let payload = buf.read_bytes(len)?;
            let interned = pool.intern_payload(&payload);
            self.read.push(interned.clone());
            Ok(interned)
        } else {
            self.read
                .get((token >> 1) as usize)
                .cloned()
                .ok_or(Error::Malformed("meta-string back-reference out of range"))
        }
    }

    pub fn reset(&mut self) {
        self.read.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(s: &str) -> (MetaEncoding, String) {
        let payload = encode(s).unwrap();
        let encoding = MetaEncoding::from_tag(payload[0] & ENCODING_MASK).unwrap();
        (encoding, decode(&payload).unwrap())
    }

    #[test]
    fn picks_smallest_preserving_encoding() {
        assert_eq!(roundtrip("com.example"), (MetaEncoding::LowerSpecial, "com.example".into()));
        assert_eq!(roundtrip("Point"), (MetaEncoding::FirstToLowerSpecial, "Point".into()));
        assert_eq!(
            roundtrip("MyTypeName"),
            (MetaEncoding::LowerUpperDigitSpecial, "MyTypeName".into())
        );
        // digit plus '$' fits no packed alphabet
        assert_eq!(roundtrip("Type$1"), (MetaEncoding::Utf8, "Type$1".into()));
        assert_eq!(roundtrip("naïve"), (MetaEncoding::Utf8, "naïve".into()));
        assert_eq!(roundtrip(""), (MetaEncoding::LowerSpecial, String::new()));
    }

    #[test]
    fn escaped_lower_beats_six_bit_when_cheaper() {
        // one upper out of many: 5 * (n + 1) < 6 * n
        let (encoding, decoded) = roundtrip("internal$Name");
        assert_eq!(encoding, MetaEncoding::AllToLowerSpecial);
        assert_eq!(decoded, "internal$Name");
    }

    #[test]
    fn strip_last_char_boundary() {
        // five 5-bit chars leave seven padding bits, enough for a phantom char
        let (_, decoded) = roundtrip("abcde");
        assert_eq!(decoded, "abcde");
        for len in 1..=17 {
            let s: String = std::iter::repeat('x').take(len).collect();
            assert_eq!(roundtrip(&s).1, s);
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(encode("com.example").unwrap(), encode("com.example").unwrap());
    }

    #[test]
    fn interning_shares_records() {
        let mut pool = MetaStringResolver::new();
        let a = pool.intern_str("com.example").unwrap();
        let b = pool.intern_str("com.example").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.hash(), b.hash());

        let c = pool.intern_payload(a.bytes());
        assert!(Rc::ptr_eq(&a, &c));
    }

    #[test]
    fn second_write_is_single_token() {
        let mut pool = MetaStringResolver::new();
        let meta = pool.intern_str("com.example").unwrap();
        let mut state = MetaWriterState::default();
        let mut buf = MemoryBuffer::new();

        state.write(&mut buf, &meta);
        let first_len = buf.size();
        state.write(&mut buf, &meta);
        assert_eq!(buf.size(), first_len + 1);

        let mut reader = MetaReaderState::default();
        let a = reader.read(&mut buf, &mut pool).unwrap();
        let b = reader.read(&mut buf, &mut pool).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.decode_string().unwrap(), "com.example");
    }

    #[test]
    fn unknown_tag_is_malformed() {
        assert!(matches!(decode(&[0x07]), Err(Error::Malformed(_))));
    }
}
