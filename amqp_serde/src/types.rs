//! Named wire types used throughout AMQP 0-9-1 method argument lists and
//! message properties, plus the field-value/field-table codec.

use crate::{need_internal, AmqpDecode, AmqpEncode, Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// Channel identifiers are 16-bit; 0 is reserved for connection-level frames.
pub type AmqpChannelId = u16;
pub type Octet = u8;
pub type Boolean = bool;
pub type ShortShortInt = i8;
pub type ShortShortUint = u8;
pub type ShortInt = i16;
pub type ShortUint = u16;
pub type LongInt = i32;
pub type LongUint = u32;
pub type LongLongInt = i64;
pub type LongLongUint = u64;
pub type TimeStamp = u64;
pub type DeliveryTag = LongLongUint;

/// A length-prefixed string, 1-byte length, max 255 bytes, tag `s`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ShortStr(String);

impl ShortStr {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for ShortStr {
    type Error = Error;
    fn try_from(value: &str) -> Result<Self> {
        if value.len() > u8::MAX as usize {
            return Err(Error::Malformed(format!(
                "short-string exceeds 255 bytes: {} bytes",
                value.len()
            )));
        }
        Ok(Self(value.to_owned()))
    }
}

impl TryFrom<String> for ShortStr {
    type Error = Error;
    fn try_from(value: String) -> Result<Self> {
        Self::try_from(value.as_str())
    }
}

impl From<ShortStr> for String {
    fn from(value: ShortStr) -> Self {
        value.0
    }
}

impl AmqpEncode for ShortStr {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.0.len() as u8);
        buf.put_slice(self.0.as_bytes());
    }
}

impl AmqpDecode for ShortStr {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        need_internal("short-string length", buf, 1)?;
        let len = buf.get_u8() as usize;
        need_internal("short-string data", buf, len)?;
        let bytes = buf.copy_to_bytes(len);
        let s = String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Malformed(format!("short-string not utf8: {e}")))?;
        Ok(Self(s))
    }
}

/// A length-prefixed opaque byte string, 4-byte length, tag `S`.
///
/// Used both for the `longstr` argument type and for message bodies, which
/// are framed the same way but carried outside the method argument list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LongStr(Vec<u8>);

impl LongStr {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for LongStr {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}
impl From<String> for LongStr {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}
impl From<Vec<u8>> for LongStr {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}
impl From<LongStr> for Vec<u8> {
    fn from(value: LongStr) -> Self {
        value.0
    }
}

impl AmqpEncode for LongStr {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.0.len() as u32);
        buf.put_slice(&self.0);
    }
}

impl AmqpDecode for LongStr {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        need_internal("long-string length", buf, 4)?;
        let len = buf.get_u32() as usize;
        need_internal("long-string data", buf, len)?;
        Ok(Self(buf.copy_to_bytes(len).to_vec()))
    }
}

/// `scale` digits after the decimal point, `value` the unscaled integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalValue {
    pub scale: u8,
    pub value: i32,
}

impl AmqpEncode for DecimalValue {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.scale);
        buf.put_i32(self.value);
    }
}
impl AmqpDecode for DecimalValue {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        need_internal("decimal scale", buf, 1)?;
        let scale = buf.get_u8();
        need_internal("decimal value", buf, 4)?;
        let value = buf.get_i32();
        Ok(Self { scale, value })
    }
}

/// A field name is just a short string used as a field-table key.
pub type FieldName = ShortStr;

/// The closed tagged union of values a field table / message header / array
/// element can hold. Type tags match the real AMQP 0-9-1 wire protocol
/// (see DESIGN.md for why this diverges from spec.md's literal, internally
/// inconsistent tag table for `short-int`/`short-string`).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Boolean(bool),             // t
    ShortShortInt(i8),         // b
    ShortShortUint(u8),        // B
    ShortInt(i16),             // U
    ShortUint(u16),            // u
    LongInt(i32),              // I
    LongUint(u32),             // i
    LongLongInt(i64),          // L
    Float(f32),                // f
    Double(f64),               // d
    Decimal(DecimalValue),     // D
    ShortString(ShortStr),     // s
    LongString(LongStr),       // S
    FieldArray(Vec<FieldValue>), // A
    Timestamp(TimeStamp),       // T
    FieldTable(FieldTable),     // F
    Void,                        // V
    ByteArray(Vec<u8>),          // x
}

impl FieldValue {
    fn tag(&self) -> u8 {
        match self {
            FieldValue::Boolean(_) => b't',
            FieldValue::ShortShortInt(_) => b'b',
            FieldValue::ShortShortUint(_) => b'B',
            FieldValue::ShortInt(_) => b'U',
            FieldValue::ShortUint(_) => b'u',
            FieldValue::LongInt(_) => b'I',
            FieldValue::LongUint(_) => b'i',
            FieldValue::LongLongInt(_) => b'L',
            FieldValue::Float(_) => b'f',
            FieldValue::Double(_) => b'd',
            FieldValue::Decimal(_) => b'D',
            FieldValue::ShortString(_) => b's',
            FieldValue::LongString(_) => b'S',
            FieldValue::FieldArray(_) => b'A',
            FieldValue::Timestamp(_) => b'T',
            FieldValue::FieldTable(_) => b'F',
            FieldValue::Void => b'V',
            FieldValue::ByteArray(_) => b'x',
        }
    }
}

impl AmqpEncode for FieldValue {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tag());
        match self {
            FieldValue::Boolean(v) => v.encode(buf),
            FieldValue::ShortShortInt(v) => v.encode(buf),
            FieldValue::ShortShortUint(v) => v.encode(buf),
            FieldValue::ShortInt(v) => v.encode(buf),
            FieldValue::ShortUint(v) => v.encode(buf),
            FieldValue::LongInt(v) => v.encode(buf),
            FieldValue::LongUint(v) => v.encode(buf),
            FieldValue::LongLongInt(v) => v.encode(buf),
            FieldValue::Float(v) => v.encode(buf),
            FieldValue::Double(v) => v.encode(buf),
            FieldValue::Decimal(v) => v.encode(buf),
            FieldValue::ShortString(v) => v.encode(buf),
            FieldValue::LongString(v) => v.encode(buf),
            FieldValue::FieldArray(items) => {
                let mut inner = BytesMut::new();
                for item in items {
                    item.encode(&mut inner);
                }
                buf.put_u32(inner.len() as u32);
                buf.put_slice(&inner);
            }
            FieldValue::Timestamp(v) => v.encode(buf),
            FieldValue::FieldTable(v) => v.encode(buf),
            FieldValue::Void => {}
            FieldValue::ByteArray(bytes) => {
                buf.put_u32(bytes.len() as u32);
                buf.put_slice(bytes);
            }
        }
    }
}

impl AmqpDecode for FieldValue {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        need_internal("field-value tag", buf, 1)?;
        let tag = buf.get_u8();
        Ok(match tag {
            b't' => FieldValue::Boolean(bool::decode(buf)?),
            b'b' => FieldValue::ShortShortInt(i8::decode(buf)?),
            b'B' => FieldValue::ShortShortUint(u8::decode(buf)?),
            b'U' => FieldValue::ShortInt(i16::decode(buf)?),
            b'u' => FieldValue::ShortUint(u16::decode(buf)?),
            b'I' => FieldValue::LongInt(i32::decode(buf)?),
            b'i' => FieldValue::LongUint(u32::decode(buf)?),
            b'L' => FieldValue::LongLongInt(i64::decode(buf)?),
            b'f' => FieldValue::Float(f32::decode(buf)?),
            b'd' => FieldValue::Double(f64::decode(buf)?),
            b'D' => FieldValue::Decimal(DecimalValue::decode(buf)?),
            b's' => FieldValue::ShortString(ShortStr::decode(buf)?),
            b'S' => FieldValue::LongString(LongStr::decode(buf)?),
            b'A' => {
                need_internal("field-array length", buf, 4)?;
                let len = buf.get_u32() as usize;
                need_internal("field-array data", buf, len)?;
                let mut inner = buf.copy_to_bytes(len);
                let mut items = Vec::new();
                while inner.has_remaining() {
                    items.push(FieldValue::decode(&mut inner)?);
                }
                FieldValue::FieldArray(items)
            }
            b'T' => FieldValue::Timestamp(u64::decode(buf)?),
            b'F' => FieldValue::FieldTable(FieldTable::decode(buf)?),
            b'V' => FieldValue::Void,
            b'x' => {
                need_internal("byte-array length", buf, 4)?;
                let len = buf.get_u32() as usize;
                need_internal("byte-array data", buf, len)?;
                FieldValue::ByteArray(buf.copy_to_bytes(len).to_vec())
            }
            other => return Err(Error::UnknownFieldType(other)),
        })
    }
}

/// A field table: an ordered map of short-string keys to [`FieldValue`]s,
/// framed on the wire as a `longstr`-length-prefixed sequence of entries.
///
/// `BTreeMap` is used rather than an insertion-order map: field tables are
/// compared for equality in this crate's tests, never for their byte-level
/// ordering, and a deterministic key order keeps round-trip tests simple.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldTable(BTreeMap<FieldName, FieldValue>);

impl FieldTable {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: FieldName, value: FieldValue) -> Option<FieldValue> {
        self.0.insert(key, value)
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(k, _)| k.as_str() == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldName, &FieldValue)> {
        self.0.iter()
    }
}

/// Server/client properties and message headers are both plain field tables.
pub type AmqpPeerProperties = FieldTable;

impl AmqpEncode for FieldTable {
    fn encode(&self, buf: &mut BytesMut) {
        let mut inner = BytesMut::new();
        for (k, v) in &self.0 {
            k.encode(&mut inner);
            v.encode(&mut inner);
        }
        buf.put_u32(inner.len() as u32);
        buf.put_slice(&inner);
    }
}

impl AmqpDecode for FieldTable {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        need_internal("field-table length", buf, 4)?;
        let len = buf.get_u32() as usize;
        need_internal("field-table data", buf, len)?;
        let mut inner = buf.copy_to_bytes(len);
        let mut map = BTreeMap::new();
        while inner.has_remaining() {
            let key = FieldName::decode(&mut inner)?;
            let value = FieldValue::decode(&mut inner)?;
            map.insert(key, value);
        }
        Ok(Self(map))
    }
}

/// Pack up to 8 booleans that are adjacent in a method's argument list into
/// a single bit-field byte, least-significant bit first — the convention
/// AMQP 0-9-1 uses for e.g. `queue.declare`'s durable/exclusive/auto-delete/
/// no-wait flags.
pub fn pack_bits(bits: &[bool]) -> u8 {
    debug_assert!(bits.len() <= 8);
    let mut byte = 0u8;
    for (i, b) in bits.iter().enumerate() {
        if *b {
            byte |= 1 << i;
        }
    }
    byte
}

/// Inverse of [`pack_bits`]: unpack the low `count` bits of `byte`.
pub fn unpack_bits(byte: u8, count: usize) -> Vec<bool> {
    debug_assert!(count <= 8);
    (0..count).map(|i| byte & (1 << i) != 0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Buf, BufMut, Bytes, BytesMut};

    fn roundtrip<T>(value: T)
    where
        T: AmqpEncode + AmqpDecode + PartialEq + std::fmt::Debug,
    {
        let mut buf = BytesMut::new();
        value.encode(&mut buf);
        let mut cursor = Bytes::copy_from_slice(&buf);
        let decoded = T::decode(&mut cursor).expect("decode");
        assert_eq!(value, decoded);
        assert!(!cursor.has_remaining(), "decoder left bytes unconsumed");
    }

    #[test]
    fn short_str_roundtrip() {
        roundtrip(ShortStr::try_from("hello.queue").unwrap());
        roundtrip(ShortStr::try_from("").unwrap());
    }

    #[test]
    fn short_str_rejects_oversize() {
        let s = "x".repeat(256);
        assert!(ShortStr::try_from(s.as_str()).is_err());
    }

    #[test]
    fn long_str_roundtrip() {
        roundtrip(LongStr::from(vec![0u8, 1, 2, 255, 254]));
        roundtrip(LongStr::from("a longer body than a short-string could hold"));
    }

    #[test]
    fn field_value_roundtrip_every_tag() {
        roundtrip(FieldValue::Boolean(true));
        roundtrip(FieldValue::Boolean(false));
        roundtrip(FieldValue::ShortShortInt(-12));
        roundtrip(FieldValue::ShortShortUint(200));
        roundtrip(FieldValue::ShortInt(-4000));
        roundtrip(FieldValue::ShortUint(40000));
        roundtrip(FieldValue::LongInt(-70000));
        roundtrip(FieldValue::LongUint(70000));
        roundtrip(FieldValue::LongLongInt(-5_000_000_000));
        roundtrip(FieldValue::Float(1.5));
        roundtrip(FieldValue::Double(2.5));
        roundtrip(FieldValue::Decimal(DecimalValue { scale: 2, value: 12345 }));
        roundtrip(FieldValue::ShortString(ShortStr::try_from("tag").unwrap()));
        roundtrip(FieldValue::LongString(LongStr::from("long tag value")));
        roundtrip(FieldValue::Timestamp(1_690_000_000));
        roundtrip(FieldValue::Void);
        roundtrip(FieldValue::ByteArray(vec![1, 2, 3]));
        roundtrip(FieldValue::FieldArray(vec![
            FieldValue::LongInt(1),
            FieldValue::Boolean(true),
            FieldValue::ShortString(ShortStr::try_from("nested").unwrap()),
        ]));
    }

    #[test]
    fn field_table_roundtrip_nested() {
        let mut inner = FieldTable::new();
        inner.insert(ShortStr::try_from("x-inner").unwrap(), FieldValue::LongInt(7));

        let mut table = FieldTable::new();
        table.insert(ShortStr::try_from("content-type").unwrap(), FieldValue::LongString("text/plain".into()));
        table.insert(ShortStr::try_from("priority").unwrap(), FieldValue::ShortShortUint(5));
        table.insert(ShortStr::try_from("nested").unwrap(), FieldValue::FieldTable(inner));

        roundtrip(table);
    }

    #[test]
    fn empty_field_table_roundtrip() {
        roundtrip(FieldTable::new());
    }

    #[test]
    fn unknown_field_tag_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'?');
        let mut cursor = Bytes::copy_from_slice(&buf);
        let err = FieldValue::decode(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::UnknownFieldType(b'?')));
    }

    #[test]
    fn truncated_input_is_reported() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'i'); // long-uint tag, no payload follows
        let mut cursor = Bytes::copy_from_slice(&buf);
        assert!(FieldValue::decode(&mut cursor).is_err());
    }

    #[test]
    fn pack_and_unpack_bits_roundtrip() {
        let bits = [true, false, true, true, false, false, true, false];
        let byte = pack_bits(&bits);
        assert_eq!(unpack_bits(byte, 8), bits);
    }

    #[test]
    fn pack_bits_handles_fewer_than_eight() {
        let bits = [true, false, true];
        let byte = pack_bits(&bits);
        assert_eq!(unpack_bits(byte, 3), bits);
        // higher bits are untouched/zero
        assert_eq!(byte & 0b1111_1000, 0);
    }
}
