//! Public value types returned from, or passed into, the API layer (spec
//! §3 "Delivered message", §4.4 `publish`/`get`/`return`).

use amqp_serde::types::{DeliveryTag, LongUint, ShortUint};

use crate::frame::BasicProperties;

/// A message delivered to a consumer (`basic.deliver`) or returned by
/// `basic.get` (`basic.get-ok`), fully assembled from its method, header,
/// and body frames (spec §4.3 "Content assembly").
#[derive(Debug, Clone)]
pub struct Message {
    pub delivery_tag: DeliveryTag,
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub body: Vec<u8>,
    pub redelivered: bool,
    /// `Some` for `basic.deliver`, `None` for `basic.get-ok`.
    pub consumer_tag: Option<String>,
}

/// A message handed back by the broker via `basic.return` because it
/// could not be routed (spec §4.4 `publish`, mandatory/immediate flags).
#[derive(Debug, Clone)]
pub struct ReturnMessage {
    pub reply_code: ShortUint,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub body: Vec<u8>,
}

/// Result of declaring a queue: the server-assigned or confirmed name,
/// plus current message/consumer counts (spec §4.4 `queue_declare`).
#[derive(Debug, Clone)]
pub struct QueueDeclareResult {
    pub queue: String,
    pub message_count: LongUint,
    pub consumer_count: LongUint,
}

/// Result of `exchange_declare`/`queue_bind`/etc that carry no payload
/// other than the confirmation itself.
pub type DeclareOk = ();

/// The negotiated server properties and protocol parameters returned
/// from a successful handshake (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct ServerProperties {
    pub product: Option<String>,
    pub version: Option<String>,
    pub platform: Option<String>,
}
