//! The AMQP 0-9-1 frame envelope and the method/content-header argument
//! lists used by this client (spec §3, §4.1).
//!
//! Every method struct knows its own `(class-id, method-id)` pair and how
//! to encode/decode its argument list; [`Frame`] is the tagged union that
//! wraps a channel id around a method, a content header, a body chunk, or
//! a heartbeat.

use amqp_serde::types::{
    pack_bits, unpack_bits, AmqpChannelId, AmqpPeerProperties, DeliveryTag, FieldTable, LongLongUint,
    LongUint, LongStr, Octet, ShortStr, ShortUint, TimeStamp,
};
use amqp_serde::{AmqpDecode, AmqpEncode};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;
type Result<T> = std::result::Result<T, Error>;

pub const CONN_DEFAULT_CHANNEL: AmqpChannelId = 0;

pub const FRAME_METHOD: u8 = 1;
pub const FRAME_HEADER: u8 = 2;
pub const FRAME_BODY: u8 = 3;
pub const FRAME_HEARTBEAT: u8 = 8;
pub const FRAME_END: u8 = 0xCE;

pub const AMQP_PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x00\x00\x09\x01";

fn malformed(what: &str) -> Error {
    Error::MalformedFrame(what.to_string())
}

/// Decoded `(class-id, method-id)` pair, used to report `UnexpectedFrame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodHeader {
    pub class_id: ShortUint,
    pub method_id: ShortUint,
}

impl std::fmt::Display for MethodHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.class_id, self.method_id)
    }
}

/// One AMQP frame: method, content header, content body, or heartbeat.
/// The channel id lives alongside the payload, matching how the wire frame
/// carries it (spec §3: "every frame carries a channel id").
#[derive(Debug, Clone)]
pub enum Frame {
    Method(AmqpChannelId, MethodPayload),
    Header(AmqpChannelId, ContentHeader),
    Body(AmqpChannelId, Vec<u8>),
    Heartbeat,
}

impl Frame {
    pub fn channel_id(&self) -> AmqpChannelId {
        match self {
            Frame::Method(ch, _) => *ch,
            Frame::Header(ch, _) => *ch,
            Frame::Body(ch, _) => *ch,
            Frame::Heartbeat => CONN_DEFAULT_CHANNEL,
        }
    }

    /// Encode a method frame: 1-byte type, 2-byte channel, 4-byte length,
    /// the class/method ids and argument list, then the terminator.
    pub fn encode_method(channel: AmqpChannelId, method: &MethodPayload) -> BytesMut {
        let mut payload = BytesMut::new();
        method.encode(&mut payload);
        wrap(FRAME_METHOD, channel, payload)
    }

    /// Encode a content-header frame, serializing only the properties that
    /// are actually present (spec §4.1).
    pub fn encode_header(channel: AmqpChannelId, header: &ContentHeader) -> BytesMut {
        let mut payload = BytesMut::new();
        header.class_id.encode(&mut payload);
        0u16.encode(&mut payload); // weight, always 0
        header.body_size.encode(&mut payload);
        header.properties.encode(&mut payload);
        wrap(FRAME_HEADER, channel, payload)
    }

    /// Encode a content-body frame. Callers are responsible for splitting
    /// a message body into `frame_max - 8`-sized chunks before calling this
    /// (spec §4.4 `basic.publish`).
    pub fn encode_body(channel: AmqpChannelId, body: &[u8]) -> BytesMut {
        let mut payload = BytesMut::with_capacity(body.len());
        payload.put_slice(body);
        wrap(FRAME_BODY, channel, payload)
    }

    pub fn encode_heartbeat() -> BytesMut {
        wrap(FRAME_HEARTBEAT, CONN_DEFAULT_CHANNEL, BytesMut::new())
    }

    /// Parse one complete frame out of `buf`. Returns `Ok(None)` if `buf`
    /// does not yet hold a whole frame (caller should read more and retry).
    pub fn decode(buf: &Bytes) -> Result<Option<(usize, Frame)>> {
        if buf.len() < 7 {
            return Ok(None);
        }
        let frame_type = buf[0];
        let channel = u16::from_be_bytes([buf[1], buf[2]]);
        let payload_size = u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]) as usize;
        let total_len = 7 + payload_size + 1;
        if buf.len() < total_len {
            return Ok(None);
        }
        if buf[total_len - 1] != FRAME_END {
            return Err(Error::MalformedFrame("missing frame terminator".to_string()));
        }
        let mut payload = buf.slice(7..7 + payload_size);
        let frame = match frame_type {
            FRAME_METHOD => Frame::Method(channel, MethodPayload::decode(&mut payload)?),
            FRAME_HEADER => Frame::Header(channel, ContentHeader::decode(&mut payload)?),
            FRAME_BODY => Frame::Body(channel, payload.to_vec()),
            FRAME_HEARTBEAT => Frame::Heartbeat,
            other => return Err(Error::MalformedFrame(format!("unknown frame type {other}"))),
        };
        Ok(Some((total_len, frame)))
    }
}

fn wrap(frame_type: u8, channel: AmqpChannelId, payload: BytesMut) -> BytesMut {
    let mut out = BytesMut::with_capacity(7 + payload.len() + 1);
    out.put_u8(frame_type);
    out.put_u16(channel);
    out.put_u32(payload.len() as u32);
    out.put_slice(&payload);
    out.put_u8(FRAME_END);
    out
}

// ---------------------------------------------------------------------
// Content header / message properties (spec §3 "ContentHeader").
// ---------------------------------------------------------------------

const FLAG_CONTENT_TYPE: u16 = 1 << 15;
const FLAG_CONTENT_ENCODING: u16 = 1 << 14;
const FLAG_HEADERS: u16 = 1 << 13;
const FLAG_DELIVERY_MODE: u16 = 1 << 12;
const FLAG_PRIORITY: u16 = 1 << 11;
const FLAG_CORRELATION_ID: u16 = 1 << 10;
const FLAG_REPLY_TO: u16 = 1 << 9;
const FLAG_EXPIRATION: u16 = 1 << 8;
const FLAG_MESSAGE_ID: u16 = 1 << 7;
const FLAG_TIMESTAMP: u16 = 1 << 6;
const FLAG_TYPE: u16 = 1 << 5;
const FLAG_USER_ID: u16 = 1 << 4;
const FLAG_APP_ID: u16 = 1 << 3;
const FLAG_RESERVED: u16 = 1 << 2;

/// AMQP `basic` class message properties (spec §3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicProperties {
    pub content_type: Option<ShortStr>,
    pub content_encoding: Option<ShortStr>,
    pub headers: Option<FieldTable>,
    pub delivery_mode: Option<Octet>,
    pub priority: Option<Octet>,
    pub correlation_id: Option<ShortStr>,
    pub reply_to: Option<ShortStr>,
    pub expiration: Option<ShortStr>,
    pub message_id: Option<ShortStr>,
    pub timestamp: Option<TimeStamp>,
    pub kind: Option<ShortStr>,
    pub user_id: Option<ShortStr>,
    pub app_id: Option<ShortStr>,
    pub reserved: Option<ShortStr>,
}

impl BasicProperties {
    pub fn builder() -> BasicPropertiesBuilder {
        BasicPropertiesBuilder::default()
    }

    /// Delivery mode 2 = persistent, 1 = transient, per spec §3.
    pub fn is_persistent(&self) -> bool {
        self.delivery_mode == Some(2)
    }

    fn flags(&self) -> u16 {
        let mut flags = 0u16;
        if self.content_type.is_some() {
            flags |= FLAG_CONTENT_TYPE;
        }
        if self.content_encoding.is_some() {
            flags |= FLAG_CONTENT_ENCODING;
        }
        if self.headers.is_some() {
            flags |= FLAG_HEADERS;
        }
        if self.delivery_mode.is_some() {
            flags |= FLAG_DELIVERY_MODE;
        }
        if self.priority.is_some() {
            flags |= FLAG_PRIORITY;
        }
        if self.correlation_id.is_some() {
            flags |= FLAG_CORRELATION_ID;
        }
        if self.reply_to.is_some() {
            flags |= FLAG_REPLY_TO;
        }
        if self.expiration.is_some() {
            flags |= FLAG_EXPIRATION;
        }
        if self.message_id.is_some() {
            flags |= FLAG_MESSAGE_ID;
        }
        if self.timestamp.is_some() {
            flags |= FLAG_TIMESTAMP;
        }
        if self.kind.is_some() {
            flags |= FLAG_TYPE;
        }
        if self.user_id.is_some() {
            flags |= FLAG_USER_ID;
        }
        if self.app_id.is_some() {
            flags |= FLAG_APP_ID;
        }
        if self.reserved.is_some() {
            flags |= FLAG_RESERVED;
        }
        flags
    }
}

impl AmqpEncode for BasicProperties {
    fn encode(&self, buf: &mut BytesMut) {
        let flags = self.flags();
        flags.encode(buf);
        macro_rules! put_opt {
            ($field:expr) => {
                if let Some(v) = &$field {
                    v.encode(buf);
                }
            };
        }
        put_opt!(self.content_type);
        put_opt!(self.content_encoding);
        put_opt!(self.headers);
        put_opt!(self.delivery_mode);
        put_opt!(self.priority);
        put_opt!(self.correlation_id);
        put_opt!(self.reply_to);
        put_opt!(self.expiration);
        put_opt!(self.message_id);
        put_opt!(self.timestamp);
        put_opt!(self.kind);
        put_opt!(self.user_id);
        put_opt!(self.app_id);
        put_opt!(self.reserved);
    }
}

impl AmqpDecode for BasicProperties {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let flags = u16::decode(buf)?;
        let mut props = BasicProperties::default();
        if flags & FLAG_CONTENT_TYPE != 0 {
            props.content_type = Some(ShortStr::decode(buf)?);
        }
        if flags & FLAG_CONTENT_ENCODING != 0 {
            props.content_encoding = Some(ShortStr::decode(buf)?);
        }
        if flags & FLAG_HEADERS != 0 {
            props.headers = Some(FieldTable::decode(buf)?);
        }
        if flags & FLAG_DELIVERY_MODE != 0 {
            props.delivery_mode = Some(Octet::decode(buf)?);
        }
        if flags & FLAG_PRIORITY != 0 {
            props.priority = Some(Octet::decode(buf)?);
        }
        if flags & FLAG_CORRELATION_ID != 0 {
            props.correlation_id = Some(ShortStr::decode(buf)?);
        }
        if flags & FLAG_REPLY_TO != 0 {
            props.reply_to = Some(ShortStr::decode(buf)?);
        }
        if flags & FLAG_EXPIRATION != 0 {
            props.expiration = Some(ShortStr::decode(buf)?);
        }
        if flags & FLAG_MESSAGE_ID != 0 {
            props.message_id = Some(ShortStr::decode(buf)?);
        }
        if flags & FLAG_TIMESTAMP != 0 {
            props.timestamp = Some(TimeStamp::decode(buf)?);
        }
        if flags & FLAG_TYPE != 0 {
            props.kind = Some(ShortStr::decode(buf)?);
        }
        if flags & FLAG_USER_ID != 0 {
            props.user_id = Some(ShortStr::decode(buf)?);
        }
        if flags & FLAG_APP_ID != 0 {
            props.app_id = Some(ShortStr::decode(buf)?);
        }
        if flags & FLAG_RESERVED != 0 {
            props.reserved = Some(ShortStr::decode(buf)?);
        }
        Ok(props)
    }
}

#[derive(Debug, Default)]
pub struct BasicPropertiesBuilder {
    props: BasicProperties,
}

impl BasicPropertiesBuilder {
    pub fn content_type(mut self, v: &str) -> Self {
        self.props.content_type = ShortStr::try_from(v).ok();
        self
    }
    pub fn content_encoding(mut self, v: &str) -> Self {
        self.props.content_encoding = ShortStr::try_from(v).ok();
        self
    }
    pub fn headers(mut self, v: FieldTable) -> Self {
        self.props.headers = Some(v);
        self
    }
    /// Mirrors spec §4.4's `basic.publish` normalization: `true` => mode 2
    /// (persistent), `false` => mode 1 (transient).
    pub fn persistent(mut self, v: bool) -> Self {
        self.props.delivery_mode = Some(if v { 2 } else { 1 });
        self
    }
    pub fn delivery_mode(mut self, v: Octet) -> Self {
        self.props.delivery_mode = Some(v);
        self
    }
    pub fn priority(mut self, v: Octet) -> Self {
        self.props.priority = Some(v);
        self
    }
    pub fn correlation_id(mut self, v: &str) -> Self {
        self.props.correlation_id = ShortStr::try_from(v).ok();
        self
    }
    pub fn reply_to(mut self, v: &str) -> Self {
        self.props.reply_to = ShortStr::try_from(v).ok();
        self
    }
    pub fn expiration(mut self, v: &str) -> Self {
        self.props.expiration = ShortStr::try_from(v).ok();
        self
    }
    pub fn message_id(mut self, v: &str) -> Self {
        self.props.message_id = ShortStr::try_from(v).ok();
        self
    }
    pub fn timestamp(mut self, v: TimeStamp) -> Self {
        self.props.timestamp = Some(v);
        self
    }
    pub fn kind(mut self, v: &str) -> Self {
        self.props.kind = ShortStr::try_from(v).ok();
        self
    }
    pub fn user_id(mut self, v: &str) -> Self {
        self.props.user_id = ShortStr::try_from(v).ok();
        self
    }
    pub fn app_id(mut self, v: &str) -> Self {
        self.props.app_id = ShortStr::try_from(v).ok();
        self
    }
    pub fn finish(self) -> BasicProperties {
        self.props
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentHeader {
    pub class_id: ShortUint,
    pub body_size: LongLongUint,
    pub properties: BasicProperties,
}

impl ContentHeader {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        let class_id = ShortUint::decode(buf).map_err(|_| malformed("content header class-id"))?;
        let _weight = ShortUint::decode(buf).map_err(|_| malformed("content header weight"))?;
        let body_size = LongLongUint::decode(buf).map_err(|_| malformed("content header body-size"))?;
        let properties = BasicProperties::decode(buf).map_err(|_| malformed("content header properties"))?;
        Ok(Self { class_id, body_size, properties })
    }
}

// ---------------------------------------------------------------------
// Method argument lists.
// ---------------------------------------------------------------------

macro_rules! class_method_ids {
    ($ty:ty, $class:expr, $method:expr) => {
        impl $ty {
            pub const CLASS_ID: ShortUint = $class;
            pub const METHOD_ID: ShortUint = $method;
            pub fn header() -> MethodHeader {
                MethodHeader { class_id: $class, method_id: $method }
            }
        }
    };
}

/// Declares a method struct whose fields are encoded/decoded in order with
/// no bit-packing. Methods that pack booleans implement `AmqpEncode`/
/// `AmqpDecode` by hand further down.
macro_rules! plain_method {
    (
        $(#[$meta:meta])*
        $name:ident, class = $class:expr, method = $method:expr,
        { $($fname:ident : $fty:ty),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name {
            $(pub $fname: $fty),*
        }
        class_method_ids!($name, $class, $method);
        impl AmqpEncode for $name {
            fn encode(&self, buf: &mut BytesMut) {
                $(self.$fname.encode(buf);)*
            }
        }
        impl AmqpDecode for $name {
            fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
                Ok(Self { $($fname: AmqpDecode::decode(buf)?),* })
            }
        }
    };
}

// -- connection class (10) -------------------------------------------

plain_method!(ConnectionStart, class = 10, method = 10, {
    version_major: Octet,
    version_minor: Octet,
    server_properties: AmqpPeerProperties,
    mechanisms: LongStr,
    locales: LongStr,
});

plain_method!(ConnectionStartOk, class = 10, method = 11, {
    client_properties: AmqpPeerProperties,
    mechanism: ShortStr,
    response: LongStr,
    locale: ShortStr,
});

plain_method!(ConnectionTune, class = 10, method = 30, {
    channel_max: ShortUint,
    frame_max: LongUint,
    heartbeat: ShortUint,
});

plain_method!(ConnectionTuneOk, class = 10, method = 31, {
    channel_max: ShortUint,
    frame_max: LongUint,
    heartbeat: ShortUint,
});

plain_method!(ConnectionOpen, class = 10, method = 40, {
    virtual_host: ShortStr,
    capabilities: ShortStr,
    insist: bool,
});

plain_method!(ConnectionOpenOk, class = 10, method = 41, {
    known_hosts: ShortStr,
});

plain_method!(ConnectionClose, class = 10, method = 50, {
    reply_code: ShortUint,
    reply_text: ShortStr,
    class_id: ShortUint,
    method_id: ShortUint,
});

plain_method!(ConnectionCloseOk, class = 10, method = 51, {});

plain_method!(ConnectionBlocked, class = 10, method = 60, {
    reason: ShortStr,
});

plain_method!(ConnectionUnblocked, class = 10, method = 61, {});

// -- channel class (20) -----------------------------------------------

plain_method!(ChannelOpen, class = 20, method = 10, {
    reserved_1: ShortStr,
});

plain_method!(ChannelOpenOk, class = 20, method = 11, {
    reserved_1: LongStr,
});

plain_method!(ChannelClose, class = 20, method = 40, {
    reply_code: ShortUint,
    reply_text: ShortStr,
    class_id: ShortUint,
    method_id: ShortUint,
});

plain_method!(ChannelCloseOk, class = 20, method = 41, {});

// -- exchange class (40) ------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeDeclare {
    pub reserved_1: ShortUint,
    pub exchange: ShortStr,
    pub kind: ShortStr,
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}
class_method_ids!(ExchangeDeclare, 40, 10);
impl AmqpEncode for ExchangeDeclare {
    fn encode(&self, buf: &mut BytesMut) {
        self.reserved_1.encode(buf);
        self.exchange.encode(buf);
        self.kind.encode(buf);
        pack_bits(&[self.passive, self.durable, self.auto_delete, self.internal, self.no_wait]).encode(buf);
        self.arguments.encode(buf);
    }
}
impl AmqpDecode for ExchangeDeclare {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let reserved_1 = ShortUint::decode(buf)?;
        let exchange = ShortStr::decode(buf)?;
        let kind = ShortStr::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 5);
        let arguments = FieldTable::decode(buf)?;
        Ok(Self {
            reserved_1,
            exchange,
            kind,
            passive: bits[0],
            durable: bits[1],
            auto_delete: bits[2],
            internal: bits[3],
            no_wait: bits[4],
            arguments,
        })
    }
}

plain_method!(ExchangeDeclareOk, class = 40, method = 11, {});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeDelete {
    pub reserved_1: ShortUint,
    pub exchange: ShortStr,
    pub if_unused: bool,
    pub no_wait: bool,
}
class_method_ids!(ExchangeDelete, 40, 20);
impl AmqpEncode for ExchangeDelete {
    fn encode(&self, buf: &mut BytesMut) {
        self.reserved_1.encode(buf);
        self.exchange.encode(buf);
        pack_bits(&[self.if_unused, self.no_wait]).encode(buf);
    }
}
impl AmqpDecode for ExchangeDelete {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let reserved_1 = ShortUint::decode(buf)?;
        let exchange = ShortStr::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 2);
        Ok(Self { reserved_1, exchange, if_unused: bits[0], no_wait: bits[1] })
    }
}

plain_method!(ExchangeDeleteOk, class = 40, method = 21, {});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeBind {
    pub reserved_1: ShortUint,
    pub destination: ShortStr,
    pub source: ShortStr,
    pub routing_key: ShortStr,
    pub no_wait: bool,
    pub arguments: FieldTable,
}
class_method_ids!(ExchangeBind, 40, 30);
impl AmqpEncode for ExchangeBind {
    fn encode(&self, buf: &mut BytesMut) {
        self.reserved_1.encode(buf);
        self.destination.encode(buf);
        self.source.encode(buf);
        self.routing_key.encode(buf);
        pack_bits(&[self.no_wait]).encode(buf);
        self.arguments.encode(buf);
    }
}
impl AmqpDecode for ExchangeBind {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let reserved_1 = ShortUint::decode(buf)?;
        let destination = ShortStr::decode(buf)?;
        let source = ShortStr::decode(buf)?;
        let routing_key = ShortStr::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 1);
        let arguments = FieldTable::decode(buf)?;
        Ok(Self { reserved_1, destination, source, routing_key, no_wait: bits[0], arguments })
    }
}

plain_method!(ExchangeBindOk, class = 40, method = 31, {});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeUnbind {
    pub reserved_1: ShortUint,
    pub destination: ShortStr,
    pub source: ShortStr,
    pub routing_key: ShortStr,
    pub no_wait: bool,
    pub arguments: FieldTable,
}
class_method_ids!(ExchangeUnbind, 40, 40);
impl AmqpEncode for ExchangeUnbind {
    fn encode(&self, buf: &mut BytesMut) {
        self.reserved_1.encode(buf);
        self.destination.encode(buf);
        self.source.encode(buf);
        self.routing_key.encode(buf);
        pack_bits(&[self.no_wait]).encode(buf);
        self.arguments.encode(buf);
    }
}
impl AmqpDecode for ExchangeUnbind {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let reserved_1 = ShortUint::decode(buf)?;
        let destination = ShortStr::decode(buf)?;
        let source = ShortStr::decode(buf)?;
        let routing_key = ShortStr::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 1);
        let arguments = FieldTable::decode(buf)?;
        Ok(Self { reserved_1, destination, source, routing_key, no_wait: bits[0], arguments })
    }
}

plain_method!(ExchangeUnbindOk, class = 40, method = 51, {});

// -- queue class (50) -----------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDeclare {
    pub reserved_1: ShortUint,
    pub queue: ShortStr,
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}
class_method_ids!(QueueDeclare, 50, 10);
impl AmqpEncode for QueueDeclare {
    fn encode(&self, buf: &mut BytesMut) {
        self.reserved_1.encode(buf);
        self.queue.encode(buf);
        pack_bits(&[self.passive, self.durable, self.exclusive, self.auto_delete, self.no_wait]).encode(buf);
        self.arguments.encode(buf);
    }
}
impl AmqpDecode for QueueDeclare {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let reserved_1 = ShortUint::decode(buf)?;
        let queue = ShortStr::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 5);
        let arguments = FieldTable::decode(buf)?;
        Ok(Self {
            reserved_1,
            queue,
            passive: bits[0],
            durable: bits[1],
            exclusive: bits[2],
            auto_delete: bits[3],
            no_wait: bits[4],
            arguments,
        })
    }
}

plain_method!(QueueDeclareOk, class = 50, method = 11, {
    queue: ShortStr,
    message_count: LongUint,
    consumer_count: LongUint,
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueBind {
    pub reserved_1: ShortUint,
    pub queue: ShortStr,
    pub exchange: ShortStr,
    pub routing_key: ShortStr,
    pub no_wait: bool,
    pub arguments: FieldTable,
}
class_method_ids!(QueueBind, 50, 20);
impl AmqpEncode for QueueBind {
    fn encode(&self, buf: &mut BytesMut) {
        self.reserved_1.encode(buf);
        self.queue.encode(buf);
        self.exchange.encode(buf);
        self.routing_key.encode(buf);
        pack_bits(&[self.no_wait]).encode(buf);
        self.arguments.encode(buf);
    }
}
impl AmqpDecode for QueueBind {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let reserved_1 = ShortUint::decode(buf)?;
        let queue = ShortStr::decode(buf)?;
        let exchange = ShortStr::decode(buf)?;
        let routing_key = ShortStr::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 1);
        let arguments = FieldTable::decode(buf)?;
        Ok(Self { reserved_1, queue, exchange, routing_key, no_wait: bits[0], arguments })
    }
}

plain_method!(QueueBindOk, class = 50, method = 21, {});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueuePurge {
    pub reserved_1: ShortUint,
    pub queue: ShortStr,
    pub no_wait: bool,
}
class_method_ids!(QueuePurge, 50, 30);
impl AmqpEncode for QueuePurge {
    fn encode(&self, buf: &mut BytesMut) {
        self.reserved_1.encode(buf);
        self.queue.encode(buf);
        pack_bits(&[self.no_wait]).encode(buf);
    }
}
impl AmqpDecode for QueuePurge {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let reserved_1 = ShortUint::decode(buf)?;
        let queue = ShortStr::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 1);
        Ok(Self { reserved_1, queue, no_wait: bits[0] })
    }
}

plain_method!(QueuePurgeOk, class = 50, method = 31, {
    message_count: LongUint,
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDelete {
    pub reserved_1: ShortUint,
    pub queue: ShortStr,
    pub if_unused: bool,
    pub if_empty: bool,
    pub no_wait: bool,
}
class_method_ids!(QueueDelete, 50, 40);
impl AmqpEncode for QueueDelete {
    fn encode(&self, buf: &mut BytesMut) {
        self.reserved_1.encode(buf);
        self.queue.encode(buf);
        pack_bits(&[self.if_unused, self.if_empty, self.no_wait]).encode(buf);
    }
}
impl AmqpDecode for QueueDelete {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let reserved_1 = ShortUint::decode(buf)?;
        let queue = ShortStr::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 3);
        Ok(Self { reserved_1, queue, if_unused: bits[0], if_empty: bits[1], no_wait: bits[2] })
    }
}

plain_method!(QueueDeleteOk, class = 50, method = 41, {
    message_count: LongUint,
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueUnbind {
    pub reserved_1: ShortUint,
    pub queue: ShortStr,
    pub exchange: ShortStr,
    pub routing_key: ShortStr,
    pub arguments: FieldTable,
}
class_method_ids!(QueueUnbind, 50, 50);
impl AmqpEncode for QueueUnbind {
    fn encode(&self, buf: &mut BytesMut) {
        self.reserved_1.encode(buf);
        self.queue.encode(buf);
        self.exchange.encode(buf);
        self.routing_key.encode(buf);
        self.arguments.encode(buf);
    }
}
impl AmqpDecode for QueueUnbind {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        Ok(Self {
            reserved_1: ShortUint::decode(buf)?,
            queue: ShortStr::decode(buf)?,
            exchange: ShortStr::decode(buf)?,
            routing_key: ShortStr::decode(buf)?,
            arguments: FieldTable::decode(buf)?,
        })
    }
}

plain_method!(QueueUnbindOk, class = 50, method = 51, {});

// -- basic class (60) -------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicQos {
    pub prefetch_size: LongUint,
    pub prefetch_count: ShortUint,
    pub global: bool,
}
class_method_ids!(BasicQos, 60, 10);
impl AmqpEncode for BasicQos {
    fn encode(&self, buf: &mut BytesMut) {
        self.prefetch_size.encode(buf);
        self.prefetch_count.encode(buf);
        pack_bits(&[self.global]).encode(buf);
    }
}
impl AmqpDecode for BasicQos {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let prefetch_size = LongUint::decode(buf)?;
        let prefetch_count = ShortUint::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 1);
        Ok(Self { prefetch_size, prefetch_count, global: bits[0] })
    }
}

plain_method!(BasicQosOk, class = 60, method = 11, {});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicConsume {
    pub reserved_1: ShortUint,
    pub queue: ShortStr,
    pub consumer_tag: ShortStr,
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}
class_method_ids!(BasicConsume, 60, 20);
impl AmqpEncode for BasicConsume {
    fn encode(&self, buf: &mut BytesMut) {
        self.reserved_1.encode(buf);
        self.queue.encode(buf);
        self.consumer_tag.encode(buf);
        pack_bits(&[self.no_local, self.no_ack, self.exclusive, self.no_wait]).encode(buf);
        self.arguments.encode(buf);
    }
}
impl AmqpDecode for BasicConsume {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let reserved_1 = ShortUint::decode(buf)?;
        let queue = ShortStr::decode(buf)?;
        let consumer_tag = ShortStr::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 4);
        let arguments = FieldTable::decode(buf)?;
        Ok(Self {
            reserved_1,
            queue,
            consumer_tag,
            no_local: bits[0],
            no_ack: bits[1],
            exclusive: bits[2],
            no_wait: bits[3],
            arguments,
        })
    }
}

plain_method!(BasicConsumeOk, class = 60, method = 21, {
    consumer_tag: ShortStr,
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicCancel {
    pub consumer_tag: ShortStr,
    pub no_wait: bool,
}
class_method_ids!(BasicCancel, 60, 30);
impl AmqpEncode for BasicCancel {
    fn encode(&self, buf: &mut BytesMut) {
        self.consumer_tag.encode(buf);
        pack_bits(&[self.no_wait]).encode(buf);
    }
}
impl AmqpDecode for BasicCancel {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let consumer_tag = ShortStr::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 1);
        Ok(Self { consumer_tag, no_wait: bits[0] })
    }
}

plain_method!(BasicCancelOk, class = 60, method = 31, {
    consumer_tag: ShortStr,
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicPublish {
    pub reserved_1: ShortUint,
    pub exchange: ShortStr,
    pub routing_key: ShortStr,
    pub mandatory: bool,
    pub immediate: bool,
}
class_method_ids!(BasicPublish, 60, 40);
impl AmqpEncode for BasicPublish {
    fn encode(&self, buf: &mut BytesMut) {
        self.reserved_1.encode(buf);
        self.exchange.encode(buf);
        self.routing_key.encode(buf);
        pack_bits(&[self.mandatory, self.immediate]).encode(buf);
    }
}
impl AmqpDecode for BasicPublish {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let reserved_1 = ShortUint::decode(buf)?;
        let exchange = ShortStr::decode(buf)?;
        let routing_key = ShortStr::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 2);
        Ok(Self { reserved_1, exchange, routing_key, mandatory: bits[0], immediate: bits[1] })
    }
}

plain_method!(BasicReturn, class = 60, method = 50, {
    reply_code: ShortUint,
    reply_text: ShortStr,
    exchange: ShortStr,
    routing_key: ShortStr,
});

plain_method!(BasicDeliver, class = 60, method = 60, {
    consumer_tag: ShortStr,
    delivery_tag: DeliveryTag,
    redelivered: bool,
    exchange: ShortStr,
    routing_key: ShortStr,
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicGet {
    pub reserved_1: ShortUint,
    pub queue: ShortStr,
    pub no_ack: bool,
}
class_method_ids!(BasicGet, 60, 70);
impl AmqpEncode for BasicGet {
    fn encode(&self, buf: &mut BytesMut) {
        self.reserved_1.encode(buf);
        self.queue.encode(buf);
        pack_bits(&[self.no_ack]).encode(buf);
    }
}
impl AmqpDecode for BasicGet {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let reserved_1 = ShortUint::decode(buf)?;
        let queue = ShortStr::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 1);
        Ok(Self { reserved_1, queue, no_ack: bits[0] })
    }
}

plain_method!(BasicGetOk, class = 60, method = 71, {
    delivery_tag: DeliveryTag,
    redelivered: bool,
    exchange: ShortStr,
    routing_key: ShortStr,
    message_count: LongUint,
});

plain_method!(BasicGetEmpty, class = 60, method = 72, {
    reserved_1: ShortStr,
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicAck {
    pub delivery_tag: DeliveryTag,
    pub multiple: bool,
}
class_method_ids!(BasicAck, 60, 80);
impl AmqpEncode for BasicAck {
    fn encode(&self, buf: &mut BytesMut) {
        self.delivery_tag.encode(buf);
        pack_bits(&[self.multiple]).encode(buf);
    }
}
impl AmqpDecode for BasicAck {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let delivery_tag = DeliveryTag::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 1);
        Ok(Self { delivery_tag, multiple: bits[0] })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicReject {
    pub delivery_tag: DeliveryTag,
    pub requeue: bool,
}
class_method_ids!(BasicReject, 60, 90);
impl AmqpEncode for BasicReject {
    fn encode(&self, buf: &mut BytesMut) {
        self.delivery_tag.encode(buf);
        pack_bits(&[self.requeue]).encode(buf);
    }
}
impl AmqpDecode for BasicReject {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let delivery_tag = DeliveryTag::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 1);
        Ok(Self { delivery_tag, requeue: bits[0] })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicRecover {
    pub requeue: bool,
}
class_method_ids!(BasicRecover, 60, 110);
impl AmqpEncode for BasicRecover {
    fn encode(&self, buf: &mut BytesMut) {
        pack_bits(&[self.requeue]).encode(buf);
    }
}
impl AmqpDecode for BasicRecover {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let bits = unpack_bits(Octet::decode(buf)?, 1);
        Ok(Self { requeue: bits[0] })
    }
}

plain_method!(BasicRecoverOk, class = 60, method = 111, {});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicNack {
    pub delivery_tag: DeliveryTag,
    pub multiple: bool,
    pub requeue: bool,
}
class_method_ids!(BasicNack, 60, 120);
impl AmqpEncode for BasicNack {
    fn encode(&self, buf: &mut BytesMut) {
        self.delivery_tag.encode(buf);
        pack_bits(&[self.multiple, self.requeue]).encode(buf);
    }
}
impl AmqpDecode for BasicNack {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let delivery_tag = DeliveryTag::decode(buf)?;
        let bits = unpack_bits(Octet::decode(buf)?, 2);
        Ok(Self { delivery_tag, multiple: bits[0], requeue: bits[1] })
    }
}

// -- confirm class (85) -------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfirmSelect {
    pub no_wait: bool,
}
class_method_ids!(ConfirmSelect, 85, 10);
impl AmqpEncode for ConfirmSelect {
    fn encode(&self, buf: &mut BytesMut) {
        pack_bits(&[self.no_wait]).encode(buf);
    }
}
impl AmqpDecode for ConfirmSelect {
    fn decode(buf: &mut Bytes) -> amqp_serde::Result<Self> {
        let bits = unpack_bits(Octet::decode(buf)?, 1);
        Ok(Self { no_wait: bits[0] })
    }
}

plain_method!(ConfirmSelectOk, class = 85, method = 11, {});

// -- tx class (90) --------------------------------------------------------

plain_method!(TxSelect, class = 90, method = 10, {});
plain_method!(TxSelectOk, class = 90, method = 11, {});
plain_method!(TxCommit, class = 90, method = 20, {});
plain_method!(TxCommitOk, class = 90, method = 21, {});
plain_method!(TxRollback, class = 90, method = 30, {});
plain_method!(TxRollbackOk, class = 90, method = 31, {});

// ---------------------------------------------------------------------
// The method dispatch union.
// ---------------------------------------------------------------------

macro_rules! method_payload {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        #[derive(Debug, Clone)]
        pub enum MethodPayload {
            $($variant($ty)),*
        }

        impl MethodPayload {
            pub fn header(&self) -> MethodHeader {
                match self {
                    $(MethodPayload::$variant(_) => <$ty>::header()),*
                }
            }

            fn encode(&self, buf: &mut BytesMut) {
                match self {
                    $(MethodPayload::$variant(inner) => {
                        <$ty>::CLASS_ID.encode(buf);
                        <$ty>::METHOD_ID.encode(buf);
                        inner.encode(buf);
                    }),*
                }
            }

            fn decode(buf: &mut Bytes) -> Result<Self> {
                let class_id = ShortUint::decode(buf).map_err(|_| malformed("method class-id"))?;
                let method_id = ShortUint::decode(buf).map_err(|_| malformed("method method-id"))?;
                match (class_id, method_id) {
                    $((<$ty>::CLASS_ID, <$ty>::METHOD_ID) => Ok(MethodPayload::$variant(
                        <$ty>::decode(buf).map_err(|e| malformed(&format!("{}: {e}", stringify!($ty))))?
                    ))),*,
                    (c, m) => Err(malformed(&format!("unknown method ({c}, {m})"))),
                }
            }
        }
    };
}

method_payload!(
    ConnectionStart(ConnectionStart),
    ConnectionStartOk(ConnectionStartOk),
    ConnectionTune(ConnectionTune),
    ConnectionTuneOk(ConnectionTuneOk),
    ConnectionOpen(ConnectionOpen),
    ConnectionOpenOk(ConnectionOpenOk),
    ConnectionClose(ConnectionClose),
    ConnectionCloseOk(ConnectionCloseOk),
    ConnectionBlocked(ConnectionBlocked),
    ConnectionUnblocked(ConnectionUnblocked),
    ChannelOpen(ChannelOpen),
    ChannelOpenOk(ChannelOpenOk),
    ChannelClose(ChannelClose),
    ChannelCloseOk(ChannelCloseOk),
    ExchangeDeclare(ExchangeDeclare),
    ExchangeDeclareOk(ExchangeDeclareOk),
    ExchangeDelete(ExchangeDelete),
    ExchangeDeleteOk(ExchangeDeleteOk),
    ExchangeBind(ExchangeBind),
    ExchangeBindOk(ExchangeBindOk),
    ExchangeUnbind(ExchangeUnbind),
    ExchangeUnbindOk(ExchangeUnbindOk),
    QueueDeclare(QueueDeclare),
    QueueDeclareOk(QueueDeclareOk),
    QueueBind(QueueBind),
    QueueBindOk(QueueBindOk),
    QueuePurge(QueuePurge),
    QueuePurgeOk(QueuePurgeOk),
    QueueDelete(QueueDelete),
    QueueDeleteOk(QueueDeleteOk),
    QueueUnbind(QueueUnbind),
    QueueUnbindOk(QueueUnbindOk),
    BasicQos(BasicQos),
    BasicQosOk(BasicQosOk),
    BasicConsume(BasicConsume),
    BasicConsumeOk(BasicConsumeOk),
    BasicCancel(BasicCancel),
    BasicCancelOk(BasicCancelOk),
    BasicPublish(BasicPublish),
    BasicReturn(BasicReturn),
    BasicDeliver(BasicDeliver),
    BasicGet(BasicGet),
    BasicGetOk(BasicGetOk),
    BasicGetEmpty(BasicGetEmpty),
    BasicAck(BasicAck),
    BasicReject(BasicReject),
    BasicRecover(BasicRecover),
    BasicRecoverOk(BasicRecoverOk),
    BasicNack(BasicNack),
    ConfirmSelect(ConfirmSelect),
    ConfirmSelectOk(ConfirmSelectOk),
    TxSelect(TxSelect),
    TxSelectOk(TxSelectOk),
    TxCommit(TxCommit),
    TxCommitOk(TxCommitOk),
    TxRollback(TxRollback),
    TxRollbackOk(TxRollbackOk),
);

impl MethodPayload {
    /// True for methods that carry content (header + body frames follow).
    pub fn is_content_bearing(&self) -> bool {
        matches!(
            self,
            MethodPayload::BasicPublish(_) | MethodPayload::BasicReturn(_) | MethodPayload::BasicDeliver(_) | MethodPayload::BasicGetOk(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amqp_serde::types::ShortStr;

    fn roundtrip_frame(channel: AmqpChannelId, method: MethodPayload) {
        let encoded = Frame::encode_method(channel, &method);
        let bytes = Bytes::copy_from_slice(&encoded);
        let (len, decoded) = Frame::decode(&bytes).unwrap().expect("complete frame");
        assert_eq!(len, bytes.len());
        match decoded {
            Frame::Method(ch, decoded_method) => {
                assert_eq!(ch, channel);
                assert_eq!(decoded_method.header(), method.header());
            }
            _ => panic!("expected method frame"),
        }
    }

    #[test]
    fn method_frame_roundtrip_no_bitpacking() {
        roundtrip_frame(
            0,
            MethodPayload::ConnectionTune(ConnectionTune { channel_max: 2047, frame_max: 131072, heartbeat: 60 }),
        );
    }

    #[test]
    fn method_frame_roundtrip_with_bitpacked_bools() {
        let declare = QueueDeclare {
            reserved_1: 0,
            queue: ShortStr::try_from("my-queue").unwrap(),
            passive: false,
            durable: true,
            exclusive: false,
            auto_delete: true,
            no_wait: false,
            arguments: FieldTable::new(),
        };
        roundtrip_frame(7, MethodPayload::QueueDeclare(declare));
    }

    #[test]
    fn basic_publish_bits_roundtrip_all_combinations() {
        for mandatory in [true, false] {
            for immediate in [true, false] {
                let publish = BasicPublish {
                    reserved_1: 0,
                    exchange: ShortStr::try_from("").unwrap(),
                    routing_key: ShortStr::try_from("rk").unwrap(),
                    mandatory,
                    immediate,
                };
                roundtrip_frame(1, MethodPayload::BasicPublish(publish));
            }
        }
    }

    #[test]
    fn malformed_unknown_method_errors() {
        let mut payload = BytesMut::new();
        9999u16.encode(&mut payload);
        1u16.encode(&mut payload);
        let frame = wrap(FRAME_METHOD, 0, payload);
        let bytes = Bytes::copy_from_slice(&frame);
        assert!(Frame::decode(&bytes).is_err());
    }

    #[test]
    fn truncated_frame_returns_none_not_error() {
        let bytes = Bytes::from_static(&[FRAME_METHOD, 0, 0, 0, 0, 0, 50]); // claims 50-byte payload, has none
        assert!(Frame::decode(&bytes).unwrap().is_none());
    }

    #[test]
    fn missing_terminator_is_malformed() {
        let mut payload = BytesMut::new();
        ConnectionCloseOk::CLASS_ID.encode(&mut payload);
        ConnectionCloseOk::METHOD_ID.encode(&mut payload);
        let mut frame = wrap(FRAME_METHOD, 0, payload);
        let last = frame.len() - 1;
        frame[last] = 0x00; // corrupt terminator
        let bytes = Bytes::copy_from_slice(&frame);
        assert!(Frame::decode(&bytes).is_err());
    }

    #[test]
    fn content_header_roundtrip_only_present_properties() {
        let props = BasicProperties::builder()
            .content_type("text/plain")
            .persistent(true)
            .correlation_id("abc-123")
            .finish();
        let header = ContentHeader { class_id: 60, body_size: 11, properties: props.clone() };
        let encoded = Frame::encode_header(3, &header);
        let bytes = Bytes::copy_from_slice(&encoded);
        let (_len, decoded) = Frame::decode(&bytes).unwrap().unwrap();
        match decoded {
            Frame::Header(ch, decoded_header) => {
                assert_eq!(ch, 3);
                assert_eq!(decoded_header.properties, props);
                assert!(decoded_header.properties.content_encoding.is_none());
            }
            _ => panic!("expected header frame"),
        }
    }

    #[test]
    fn body_frame_roundtrip() {
        let body = vec![1u8, 2, 3, 4, 5];
        let encoded = Frame::encode_body(2, &body);
        let bytes = Bytes::copy_from_slice(&encoded);
        let (_len, decoded) = Frame::decode(&bytes).unwrap().unwrap();
        match decoded {
            Frame::Body(ch, decoded_body) => {
                assert_eq!(ch, 2);
                assert_eq!(decoded_body, body);
            }
            _ => panic!("expected body frame"),
        }
    }

    #[test]
    fn heartbeat_frame_roundtrip() {
        let encoded = Frame::encode_heartbeat();
        let bytes = Bytes::copy_from_slice(&encoded);
        let (_len, decoded) = Frame::decode(&bytes).unwrap().unwrap();
        assert!(matches!(decoded, Frame::Heartbeat));
    }
}
