//! User-supplied async callbacks for out-of-band connection/channel
//! events (spec §4.4 "Callbacks"): `connection.blocked`/`unblocked`,
//! `channel.close` initiated by the broker, and `basic.cancel` pushed by
//! the broker (e.g. when a queue the consumer was bound to is deleted).
//!
//! Modeled on the teacher's trait-object callback registered on
//! `Connection::open`/`Channel::register_callback`; using `async_trait`
//! here the same way the teacher does, so implementors write plain
//! `async fn` bodies.

use async_trait::async_trait;

use amqp_serde::types::AmqpChannelId;

/// Connection-scoped event callback (spec §4.2 "connection.blocked").
#[async_trait]
pub trait ConnectionCallback: Send + Sync {
    async fn blocked(&mut self, reason: String);
    async fn unblocked(&mut self);
}

/// Channel-scoped event callback (spec §4.3 "channel.close", "basic.cancel",
/// and publisher-confirm/return notifications per spec §4.4 `publish`).
#[async_trait]
pub trait ChannelCallback: Send + Sync {
    async fn close(&mut self, channel_id: AmqpChannelId, reply_code: u16, reply_text: String);
    async fn cancel(&mut self, channel_id: AmqpChannelId, consumer_tag: &str);

    /// A `basic.ack` confirm arrived for `delivery_tag` (or, if
    /// `multiple`, for every outstanding tag up to and including it).
    async fn publish_ack(&mut self, channel_id: AmqpChannelId, delivery_tag: u64, multiple: bool) {
        let _ = (channel_id, delivery_tag, multiple);
    }

    /// A `basic.nack` confirm arrived: the broker could not take
    /// responsibility for the message.
    async fn publish_nack(&mut self, channel_id: AmqpChannelId, delivery_tag: u64, multiple: bool) {
        let _ = (channel_id, delivery_tag, multiple);
    }

    /// An unroutable message came back via `basic.return`.
    async fn publish_return(&mut self, channel_id: AmqpChannelId, reply_code: u16, reply_text: String) {
        let _ = (channel_id, reply_code, reply_text);
    }
}

/// A `ChannelCallback`/`ConnectionCallback` that logs at `warn` and takes
/// no other action — the default registered when the caller supplies
/// none (spec §4.4 default behaviors).
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnectionCallback;

#[async_trait]
impl ConnectionCallback for DefaultConnectionCallback {
    async fn blocked(&mut self, _reason: String) {
        #[cfg(feature = "traces")]
        tracing::warn!("connection blocked: {_reason}");
    }

    async fn unblocked(&mut self) {
        #[cfg(feature = "traces")]
        tracing::warn!("connection unblocked");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultChannelCallback;

#[async_trait]
impl ChannelCallback for DefaultChannelCallback {
    async fn close(&mut self, channel_id: AmqpChannelId, reply_code: u16, reply_text: String) {
        #[cfg(feature = "traces")]
        tracing::warn!("channel {channel_id} closed by broker: {reply_code} {reply_text}");
        #[cfg(not(feature = "traces"))]
        let _ = (channel_id, reply_code, reply_text);
    }

    async fn cancel(&mut self, channel_id: AmqpChannelId, consumer_tag: &str) {
        #[cfg(feature = "traces")]
        tracing::warn!("consumer {consumer_tag} on channel {channel_id} cancelled by broker");
        #[cfg(not(feature = "traces"))]
        let _ = (channel_id, consumer_tag);
    }
}
