//! The single connection reader (spec §4.3): decode frames off the socket
//! in a loop, classify them by channel id, and route them to the right
//! mailbox. Never blocks on a user callback, never holds a channel lock
//! across one — every callback invocation is handed off to a spawned
//! task so a slow callback on one channel can't stall frame dispatch for
//! the rest of the connection.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use amqp_serde::types::AmqpChannelId;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
#[cfg(feature = "traces")]
use tracing::warn;

use crate::api::types::{Message, ReturnMessage};
use crate::frame::{Frame, MethodPayload, CONN_DEFAULT_CHANNEL};
use crate::net::shared::{now_secs, Assembly, ChannelInner, CloseReason, ConnectionShared, GetResult, PendingContent};
use crate::net::split_connection::BufReader;

/// How long `finalize` retries a `basic.deliver` whose consumer mailbox
/// hasn't been registered yet (spec §4.3: "if the consumer is not yet
/// registered (race), retry briefly").
const DELIVER_RETRY_ATTEMPTS: u32 = 5;
const DELIVER_RETRY_DELAY: Duration = Duration::from_millis(20);

pub(crate) struct ReaderHandler<S> {
    reader: BufReader<S>,
    conn: Arc<ConnectionShared>,
    outgoing_tx: mpsc::Sender<Vec<Frame>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send + 'static> ReaderHandler<S> {
    pub(crate) fn new(reader: BufReader<S>, conn: Arc<ConnectionShared>, outgoing_tx: mpsc::Sender<Vec<Frame>>) -> Self {
        Self { reader, conn, outgoing_tx }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let (channel_id, frame) = match self.reader.read_frame().await {
                Ok(v) => v,
                Err(err) => {
                    #[cfg(feature = "traces")]
                    warn!("connection reader stopped: {err}");
                    let reason = CloseReason { code: 0, text: err.to_string(), class_id: None, method_id: None };
                    self.conn.cascade_close(reason).await;
                    return;
                }
            };
            self.conn.last_read.store(now_secs(), Ordering::Relaxed);

            if channel_id == CONN_DEFAULT_CHANNEL {
                if self.handle_connection_frame(frame).await {
                    return; // connection.close processed, reader exits
                }
                continue;
            }

            self.handle_channel_frame(channel_id, frame).await;
        }
    }

    /// Returns `true` if the connection is now closing and the reader
    /// should stop.
    async fn handle_connection_frame(&mut self, frame: Frame) -> bool {
        match frame {
            Frame::Method(_, MethodPayload::ConnectionClose(close)) => {
                let reason = CloseReason {
                    code: close.reply_code,
                    text: close.reply_text.as_str().to_string(),
                    class_id: Some(close.class_id),
                    method_id: Some(close.method_id),
                };
                let close_ok = Frame::Method(CONN_DEFAULT_CHANNEL, MethodPayload::ConnectionCloseOk(Default::default()));
                let _ = self.outgoing_tx.send(vec![close_ok]).await;
                self.conn.cascade_close(reason).await;
                true
            }
            Frame::Method(_, MethodPayload::ConnectionCloseOk(_)) => {
                if let Some(tx) = self.conn.close_ack.lock().await.take() {
                    let _ = tx.send(());
                }
                // A locally-initiated close completed: cascade so every
                // channel's blocked callers wake with `ConnectionClosed`
                // too (spec §4.2 `close`, §8 invariant 5).
                let reason = CloseReason { code: 200, text: "connection closed".to_string(), class_id: None, method_id: None };
                self.conn.cascade_close(reason).await;
                true
            }
            Frame::Method(_, MethodPayload::ConnectionBlocked(blocked)) => {
                self.conn.blocked.store(true, Ordering::Relaxed);
                let conn = self.conn.clone();
                let reason = blocked.reason.as_str().to_string();
                tokio::spawn(async move {
                    if let Some(cb) = conn.callback.lock().await.as_mut() {
                        cb.blocked(reason).await;
                    }
                });
                false
            }
            Frame::Method(_, MethodPayload::ConnectionUnblocked(_)) => {
                self.conn.blocked.store(false, Ordering::Relaxed);
                let conn = self.conn.clone();
                tokio::spawn(async move {
                    if let Some(cb) = conn.callback.lock().await.as_mut() {
                        cb.unblocked().await;
                    }
                });
                false
            }
            Frame::Heartbeat => false,
            _ => false,
        }
    }

    async fn handle_channel_frame(&mut self, channel_id: AmqpChannelId, frame: Frame) {
        let channel = { self.conn.channels.lock().await.get(&channel_id).cloned() };
        let Some(channel) = channel else {
            // Frame for a channel we don't know about (already closed, or a
            // race during open). Nothing meaningful to do with it.
            return;
        };

        match frame {
            Frame::Method(_, method) => self.handle_method(&channel, method).await,
            Frame::Header(_, header) => {
                let mut assembly = channel.assembly.lock().await;
                if let Some(a) = assembly.as_mut() {
                    a.body_size = header.body_size;
                    a.properties = Some(header.properties);
                    if a.is_complete() {
                        let finished = assembly.take().unwrap();
                        drop(assembly);
                        self.finalize(&channel, finished).await;
                    }
                }
            }
            Frame::Body(_, body) => {
                let mut assembly = channel.assembly.lock().await;
                if let Some(a) = assembly.as_mut() {
                    a.buffer.extend_from_slice(&body);
                    if a.is_complete() {
                        let finished = assembly.take().unwrap();
                        drop(assembly);
                        self.finalize(&channel, finished).await;
                    }
                }
            }
            Frame::Heartbeat => {}
        }
    }

    async fn handle_method(&mut self, channel: &Arc<ChannelInner>, method: MethodPayload) {
        use MethodPayload::*;
        match method {
            ChannelClose(close) => {
                let reason = CloseReason {
                    code: close.reply_code,
                    text: close.reply_text.as_str().to_string(),
                    class_id: Some(close.class_id),
                    method_id: Some(close.method_id),
                };
                let close_ok = Frame::Method(channel.id, MethodPayload::ChannelCloseOk(Default::default()));
                let _ = channel.outgoing_tx.send(vec![close_ok]).await;
                channel.shutdown_mailboxes(reason.clone(), true).await;
                self.conn.channels.lock().await.remove(&channel.id);
                let channel = channel.clone();
                tokio::spawn(async move {
                    if let Some(cb) = channel.callback.lock().await.as_mut() {
                        cb.close(channel.id, reason.code, reason.text.clone()).await;
                    }
                });
            }
            BasicCancel(cancel) => {
                let consumer_tag = cancel.consumer_tag.as_str().to_string();
                channel.consumers.lock().await.remove(&consumer_tag);
                let channel = channel.clone();
                tokio::spawn(async move {
                    if let Some(cb) = channel.callback.lock().await.as_mut() {
                        cb.cancel(channel.id, &consumer_tag).await;
                    }
                });
            }
            BasicAck(ack) => self.handle_confirm(channel, ack.delivery_tag, ack.multiple, false).await,
            BasicNack(nack) => self.handle_confirm(channel, nack.delivery_tag, nack.multiple, true).await,
            BasicDeliver(deliver) => {
                *channel.assembly.lock().await = Some(Assembly {
                    content: PendingContent::Deliver {
                        consumer_tag: deliver.consumer_tag.as_str().to_string(),
                        delivery_tag: deliver.delivery_tag,
                        redelivered: deliver.redelivered,
                        exchange: deliver.exchange.as_str().to_string(),
                        routing_key: deliver.routing_key.as_str().to_string(),
                    },
                    body_size: 0,
                    properties: None,
                    buffer: Vec::new(),
                });
            }
            BasicGetOk(get_ok) => {
                *channel.assembly.lock().await = Some(Assembly {
                    content: PendingContent::GetOk {
                        delivery_tag: get_ok.delivery_tag,
                        redelivered: get_ok.redelivered,
                        exchange: get_ok.exchange.as_str().to_string(),
                        routing_key: get_ok.routing_key.as_str().to_string(),
                        message_count: get_ok.message_count,
                    },
                    body_size: 0,
                    properties: None,
                    buffer: Vec::new(),
                });
            }
            BasicGetEmpty(_) => {
                if let Some(tx) = channel.basic_gets_tx.lock().await.as_ref() {
                    let _ = tx.send(GetResult::Empty);
                }
            }
            BasicReturn(ret) => {
                *channel.assembly.lock().await = Some(Assembly {
                    content: PendingContent::Return {
                        reply_code: ret.reply_code,
                        reply_text: ret.reply_text.as_str().to_string(),
                        exchange: ret.exchange.as_str().to_string(),
                        routing_key: ret.routing_key.as_str().to_string(),
                    },
                    body_size: 0,
                    properties: None,
                    buffer: Vec::new(),
                });
            }
            // Every other method is a synchronous reply: push to `replies`.
            other => {
                if let Some(tx) = channel.replies_tx.lock().await.as_ref() {
                    let _ = tx.send(other);
                }
            }
        }
    }

    async fn handle_confirm(&self, channel: &Arc<ChannelInner>, tag: u64, multiple: bool, is_nack: bool) {
        let drained = {
            let mut confirm = channel.confirm.lock().await;
            if confirm.unconfirmed.is_empty() {
                return;
            }
            confirm.apply(tag, multiple, is_nack)
        };
        if drained {
            channel.confirm_drained.notify_waiters();
        }
        let channel = channel.clone();
        tokio::spawn(async move {
            if let Some(cb) = channel.callback.lock().await.as_mut() {
                if is_nack {
                    cb.publish_nack(channel.id, tag, multiple).await;
                } else {
                    cb.publish_ack(channel.id, tag, multiple).await;
                }
            }
        });
    }

    async fn finalize(&self, channel: &Arc<ChannelInner>, assembly: Assembly) {
        let properties = assembly.properties.unwrap_or_default();
        let body = assembly.buffer;
        match assembly.content {
            PendingContent::Deliver { consumer_tag, delivery_tag, redelivered, exchange, routing_key } => {
                let message = Message { delivery_tag, exchange, routing_key, properties, body, redelivered, consumer_tag: Some(consumer_tag.clone()) };
                {
                    let consumers = channel.consumers.lock().await;
                    if let Some(mailbox) = consumers.get(&consumer_tag) {
                        let _ = mailbox.tx.send(message);
                        return;
                    }
                }
                // basic.deliver arrived before basic_consume finished
                // registering the mailbox: retry briefly off the reader
                // task rather than blocking frame dispatch on the delay.
                let channel = channel.clone();
                tokio::spawn(async move {
                    for _ in 0..DELIVER_RETRY_ATTEMPTS {
                        tokio::time::sleep(DELIVER_RETRY_DELAY).await;
                        let consumers = channel.consumers.lock().await;
                        if let Some(mailbox) = consumers.get(&consumer_tag) {
                            let _ = mailbox.tx.send(message);
                            return;
                        }
                    }
                    #[cfg(feature = "traces")]
                    warn!("dropping delivery for unregistered consumer {consumer_tag} on channel {}", channel.id);
                    #[cfg(not(feature = "traces"))]
                    let _ = (&channel, &consumer_tag);
                });
            }
            PendingContent::GetOk { delivery_tag, redelivered, exchange, routing_key, message_count: _ } => {
                let message = Message { delivery_tag, exchange, routing_key, properties, body, redelivered, consumer_tag: None };
                if let Some(tx) = channel.basic_gets_tx.lock().await.as_ref() {
                    let _ = tx.send(GetResult::Message(message));
                }
            }
            PendingContent::Return { reply_code, reply_text, exchange, routing_key } => {
                let ret = ReturnMessage { reply_code, reply_text: reply_text.clone(), exchange, routing_key, properties, body };
                let on_return = channel.on_return.lock().await.clone();
                let channel = channel.clone();
                tokio::spawn(async move {
                    match on_return {
                        Some(cb) => cb(ret),
                        None => {
                            #[cfg(feature = "traces")]
                            warn!("unroutable message returned on channel {} with no on_return handler: {}:{}", channel.id, ret.exchange, ret.routing_key);
                            #[cfg(not(feature = "traces"))]
                            let _ = &ret;
                        }
                    }
                    if let Some(cb) = channel.callback.lock().await.as_mut() {
                        cb.publish_return(channel.id, reply_code, reply_text).await;
                    }
                });
            }
        }
    }
}
