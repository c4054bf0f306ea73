//! Wire-level primitive types and big-endian codec for AMQP 0-9-1.
//!
//! This crate has no networking and no async dependency. It knows how to
//! turn the handful of primitive wire types used by AMQP 0-9-1 method
//! arguments and message properties into bytes and back, and nothing else.
//! The frame envelope (type/channel/length/terminator) lives in `amqprs`.

pub mod types;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Decode failure for a primitive wire value.
///
/// Any occurrence of this error while decoding a frame payload is fatal to
/// the frame and, per the AMQP error model, fatal to the connection
/// (`amqprs::error::Error::MalformedFrame`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Fewer bytes remained in the buffer than the value required.
    Truncated { what: &'static str, needed: usize, available: usize },
    /// A string or field-table payload was not valid for its declared length.
    Malformed(String),
    /// An unrecognized field-value type tag.
    UnknownFieldType(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Truncated { what, needed, available } => write!(
                f,
                "truncated while decoding {what}: needed {needed} bytes, {available} available"
            ),
            Error::Malformed(msg) => write!(f, "malformed wire value: {msg}"),
            Error::UnknownFieldType(tag) => write!(f, "unknown field-value type tag: 0x{tag:02x}"),
        }
    }
}

impl std::error::Error for Error {}

/// A value that can be serialized into the AMQP wire format.
pub trait AmqpEncode {
    fn encode(&self, buf: &mut BytesMut);
}

/// A value that can be parsed out of an AMQP wire buffer.
///
/// Implementations must not consume any bytes from `buf` on failure, so
/// callers can report a useful error without having to rewind a cursor.
pub trait AmqpDecode: Sized {
    fn decode(buf: &mut Bytes) -> Result<Self>;
}

/// Check that `n` more bytes remain in `buf`, otherwise fail with
/// [`Error::Truncated`]. Shared by this crate's primitive decoders and by
/// `types`'s string/field-value/field-table decoders.
pub(crate) fn need_internal(what: &'static str, buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        Err(Error::Truncated { what, needed: n, available: buf.remaining() })
    } else {
        Ok(())
    }
}

macro_rules! impl_int {
    ($t:ty, $put:ident, $get:ident, $name:expr) => {
        impl AmqpEncode for $t {
            fn encode(&self, buf: &mut BytesMut) {
                buf.$put(*self);
            }
        }
        impl AmqpDecode for $t {
            fn decode(buf: &mut Bytes) -> Result<Self> {
                need_internal($name, buf, std::mem::size_of::<$t>())?;
                Ok(buf.$get())
            }
        }
    };
}

impl_int!(u8, put_u8, get_u8, "octet");
impl_int!(i8, put_i8, get_i8, "short-short-int");
impl_int!(u16, put_u16, get_u16, "short-uint");
impl_int!(i16, put_i16, get_i16, "short-int");
impl_int!(u32, put_u32, get_u32, "long-uint");
impl_int!(i32, put_i32, get_i32, "long-int");
impl_int!(u64, put_u64, get_u64, "long-long-uint");
impl_int!(i64, put_i64, get_i64, "long-long-int");
impl_int!(f32, put_f32, get_f32, "float");
impl_int!(f64, put_f64, get_f64, "double");

impl AmqpEncode for bool {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(if *self { 1 } else { 0 });
    }
}
impl AmqpDecode for bool {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        need_internal("boolean", buf, 1)?;
        Ok(buf.get_u8() != 0)
    }
}

/// Serialize `value` with its [`AmqpEncode`] impl into a freshly allocated buffer.
pub fn to_buffer<T: AmqpEncode>(value: &T) -> BytesMut {
    let mut buf = BytesMut::new();
    value.encode(&mut buf);
    buf
}

/// Parse a `T` out of `bytes`, returning it alongside how many bytes it consumed.
pub fn from_buffer<T: AmqpDecode>(bytes: &[u8]) -> Result<(T, usize)> {
    let mut cursor = Bytes::copy_from_slice(bytes);
    let before = cursor.remaining();
    let value = T::decode(&mut cursor)?;
    Ok((value, before - cursor.remaining()))
}
