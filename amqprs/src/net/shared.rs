//! The state shared between the public API (`api::connection`,
//! `api::channel`), the reader task, and the writer task: the channel
//! table, per-channel reply/get/consumer mailboxes, the in-flight content
//! assembly slot, and the publisher-confirm bookkeeping (spec §3 "Channel
//! state").

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use amqp_serde::types::{AmqpChannelId, DeliveryTag, LongUint, ShortUint};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};

use crate::api::callbacks::{ChannelCallback, ConnectionCallback};
use crate::api::types::{Message, ReturnMessage, ServerProperties};
use crate::error::{Error, Result};
use crate::frame::{BasicProperties, Frame, MethodPayload};

pub(crate) type OutgoingGroup = Vec<Frame>;

/// Shared by the reader/writer heartbeat checks so both sides agree on the
/// clock (spec §4.2(e)).
pub(crate) fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Status of a logical channel (spec §3 "Channel state").
#[derive(Debug, Clone)]
pub(crate) enum ChannelStatus {
    Uninitialized,
    Open,
    ClosingLocal,
    ClosedRemote(CloseReason),
    ClosedLocal(CloseReason),
}

#[derive(Debug, Clone)]
pub(crate) struct CloseReason {
    pub code: ShortUint,
    pub text: String,
    pub class_id: Option<ShortUint>,
    pub method_id: Option<ShortUint>,
}

pub(crate) enum PendingContent {
    Deliver { consumer_tag: String, delivery_tag: DeliveryTag, redelivered: bool, exchange: String, routing_key: String },
    GetOk { delivery_tag: DeliveryTag, redelivered: bool, exchange: String, routing_key: String, message_count: LongUint },
    Return { reply_code: ShortUint, reply_text: String, exchange: String, routing_key: String },
}

pub(crate) struct Assembly {
    pub content: PendingContent,
    pub body_size: u64,
    pub properties: Option<BasicProperties>,
    pub buffer: Vec<u8>,
}

impl Assembly {
    pub(crate) fn is_complete(&self) -> bool {
        self.properties.is_some() && self.buffer.len() as u64 >= self.body_size
    }
}

/// Result delivered through a channel's `basic_gets` FIFO (spec §3).
pub(crate) enum GetResult {
    Message(Message),
    Empty,
}

/// Per-consumer state: the mailbox deliveries are pushed into, plus a
/// cancellation flag the worker pool watches.
pub(crate) struct ConsumerMailbox {
    pub tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
pub(crate) struct ConfirmState {
    pub enabled: bool,
    pub next_tag: DeliveryTag,
    pub unconfirmed: VecDeque<DeliveryTag>,
    pub any_nack: bool,
}

impl ConfirmState {
    /// Records a publish under confirm mode, returning the delivery tag
    /// assigned to it (spec §4.4 `publish`, §8 invariant 3).
    pub(crate) fn record_publish(&mut self) -> DeliveryTag {
        if self.unconfirmed.is_empty() {
            self.any_nack = false;
        }
        self.next_tag += 1;
        self.unconfirmed.push_back(self.next_tag);
        self.next_tag
    }

    /// Applies a `basic.ack`/`basic.nack` confirm, removing `tag` (and
    /// every older outstanding tag if `multiple`) from the unconfirmed
    /// set. Returns `true` once every outstanding tag has drained.
    pub(crate) fn apply(&mut self, tag: DeliveryTag, multiple: bool, is_nack: bool) -> bool {
        if is_nack {
            self.any_nack = true;
        }
        if multiple {
            self.unconfirmed.retain(|&t| t > tag);
        } else {
            self.unconfirmed.retain(|&t| t != tag);
        }
        self.unconfirmed.is_empty()
    }
}

/// Everything the reader/writer tasks and the public `Channel` handle need
/// to share about one logical channel.
pub(crate) struct ChannelInner {
    pub id: AmqpChannelId,
    pub outgoing_tx: mpsc::Sender<OutgoingGroup>,
    pub conn: Arc<ConnectionShared>,

    pub status: Mutex<ChannelStatus>,
    /// Serializes synchronous request/reply pairs so `replies` stays FIFO
    /// from the point of view of a single caller (spec §3 invariants).
    pub call_lock: Mutex<()>,

    pub replies_tx: Mutex<Option<mpsc::UnboundedSender<MethodPayload>>>,
    pub replies_rx: Mutex<mpsc::UnboundedReceiver<MethodPayload>>,

    pub basic_gets_tx: Mutex<Option<mpsc::UnboundedSender<GetResult>>>,
    pub basic_gets_rx: Mutex<mpsc::UnboundedReceiver<GetResult>>,

    pub assembly: Mutex<Option<Assembly>>,
    pub consumers: Mutex<HashMap<String, ConsumerMailbox>>,
    pub confirm: Mutex<ConfirmState>,
    pub confirm_drained: Notify,

    pub on_return: Mutex<Option<Arc<dyn Fn(ReturnMessage) + Send + Sync>>>,
    pub callback: Mutex<Option<Box<dyn ChannelCallback>>>,
}

impl ChannelInner {
    pub(crate) fn new(id: AmqpChannelId, outgoing_tx: mpsc::Sender<OutgoingGroup>, conn: Arc<ConnectionShared>) -> Arc<Self> {
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let (gets_tx, gets_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            id,
            outgoing_tx,
            conn,
            status: Mutex::new(ChannelStatus::Uninitialized),
            call_lock: Mutex::new(()),
            replies_tx: Mutex::new(Some(replies_tx)),
            replies_rx: Mutex::new(replies_rx),
            basic_gets_tx: Mutex::new(Some(gets_tx)),
            basic_gets_rx: Mutex::new(gets_rx),
            assembly: Mutex::new(None),
            consumers: Mutex::new(HashMap::new()),
            confirm: Mutex::new(ConfirmState::default()),
            confirm_drained: Notify::new(),
            on_return: Mutex::new(None),
            callback: Mutex::new(None),
        })
    }

    /// Tear down every mailbox so blocked callers wake with `reason`
    /// (spec §4.4 `close`/`closed!`).
    pub(crate) async fn shutdown_mailboxes(&self, reason: CloseReason, remote: bool) {
        {
            let mut status = self.status.lock().await;
            *status = if remote { ChannelStatus::ClosedRemote(reason.clone()) } else { ChannelStatus::ClosedLocal(reason.clone()) };
        }
        self.replies_tx.lock().await.take(); // drop sender: recv() on replies_rx returns None
        self.basic_gets_tx.lock().await.take();
        let mut consumers = self.consumers.lock().await;
        consumers.clear(); // dropping each UnboundedSender closes the consumer's mailbox
        self.confirm_drained.notify_waiters();
    }

    pub(crate) async fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().await = status;
    }

    pub(crate) async fn close_reason(&self) -> CloseReason {
        match &*self.status.lock().await {
            ChannelStatus::ClosedRemote(r) | ChannelStatus::ClosedLocal(r) => r.clone(),
            _ => CloseReason { code: 0, text: "channel closed".to_string(), class_id: None, method_id: None },
        }
    }

    pub(crate) fn channel_closed_error(&self, reason: CloseReason) -> Error {
        Error::ChannelClosed {
            channel_id: self.id,
            code: reason.code,
            text: reason.text,
            class_id: reason.class_id,
            method_id: reason.method_id,
        }
    }

    pub(crate) async fn ensure_open(&self) -> Result<()> {
        match &*self.status.lock().await {
            ChannelStatus::Open => Ok(()),
            ChannelStatus::ClosedRemote(r) | ChannelStatus::ClosedLocal(r) => Err(self.channel_closed_error(r.clone())),
            _ => Err(self.channel_closed_error(CloseReason { code: 0, text: "channel not open".to_string(), class_id: None, method_id: None })),
        }
    }

    /// Send `method` and block on the next reply in the per-channel
    /// synchronous FIFO (spec §4.4: "await the corresponding reply from
    /// `replies`"). `call_lock` ensures the request and its matching reply
    /// aren't interleaved with another caller's synchronous round-trip on
    /// the same channel.
    pub(crate) async fn call(&self, method: MethodPayload) -> Result<MethodPayload> {
        let _guard = self.call_lock.lock().await;
        self.ensure_open().await?;
        self.outgoing_tx.send(vec![Frame::Method(self.id, method)]).await?;
        let mut rx = self.replies_rx.lock().await;
        match rx.recv().await {
            Some(reply) => Ok(reply),
            None => Err(self.channel_closed_error(self.close_reason().await)),
        }
    }

    /// Fire a method with no reply expected (spec §4.4 ack/nack/reject).
    pub(crate) async fn cast(&self, method: MethodPayload) -> Result<()> {
        self.ensure_open().await?;
        self.outgoing_tx.send(vec![Frame::Method(self.id, method)]).await?;
        Ok(())
    }

    /// Raised when a synchronous wait receives the wrong method: a protocol
    /// violation that closes the channel with code 505 (spec §7).
    pub(crate) async fn unexpected(&self, expected: crate::frame::MethodHeader, actual: MethodPayload) -> Error {
        let err = Error::UnexpectedFrame { expected, actual: actual.header() };
        let reason = CloseReason { code: 505, text: "UNEXPECTED_FRAME".to_string(), class_id: None, method_id: None };
        self.shutdown_mailboxes(reason, false).await;
        err
    }
}

/// Connection-level shared state: the channel table, negotiated
/// parameters, and the outgoing-frame queue to the writer task.
pub(crate) struct ConnectionShared {
    pub outgoing_tx: mpsc::Sender<OutgoingGroup>,
    pub channels: Mutex<HashMap<AmqpChannelId, Arc<ChannelInner>>>,
    pub channel_max: ShortUint,
    pub frame_max: LongUint,
    pub heartbeat: ShortUint,
    pub is_open: AtomicBool,
    pub blocked: AtomicBool,
    pub close_reason: Mutex<Option<CloseReason>>,
    pub callback: Mutex<Option<Box<dyn ConnectionCallback>>>,
    pub last_write: AtomicU64,
    pub last_read: AtomicU64,
    /// Woken by the reader when `connection.close-ok` arrives for a
    /// locally-initiated close (spec §4.2 `close`).
    pub close_ack: Mutex<Option<oneshot::Sender<()>>>,
    pub server_properties: ServerProperties,
}

impl ConnectionShared {
    pub(crate) fn new(
        outgoing_tx: mpsc::Sender<OutgoingGroup>,
        channel_max: ShortUint,
        frame_max: LongUint,
        heartbeat: ShortUint,
        server_properties: ServerProperties,
    ) -> Self {
        let now = now_secs();
        Self {
            outgoing_tx,
            channels: Mutex::new(HashMap::new()),
            channel_max,
            frame_max,
            heartbeat,
            is_open: AtomicBool::new(true),
            blocked: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            callback: Mutex::new(None),
            last_write: AtomicU64::new(now),
            last_read: AtomicU64::new(now),
            close_ack: Mutex::new(None),
            server_properties,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Relaxed)
    }

    /// Cascade-close every channel with `ConnectionClosed` (spec §4.2(c),
    /// §4.3 "connection.close").
    pub(crate) async fn cascade_close(&self, reason: CloseReason) {
        self.is_open.store(false, Ordering::Relaxed);
        *self.close_reason.lock().await = Some(reason.clone());
        let channels: Vec<Arc<ChannelInner>> = self.channels.lock().await.drain().map(|(_, c)| c).collect();
        for channel in channels {
            channel.shutdown_mailboxes(reason.clone(), true).await;
        }
    }

    pub(crate) async fn next_channel_id(&self) -> Result<AmqpChannelId, Error> {
        let channels = self.channels.lock().await;
        for id in 1..=self.channel_max {
            if !channels.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(Error::ChannelMax)
    }

    pub(crate) fn connection_closed_error(&self, reason: CloseReason) -> Error {
        Error::ConnectionClosed { code: reason.code, text: reason.text, class_id: reason.class_id, method_id: reason.method_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_publish_assigns_increasing_tags() {
        let mut state = ConfirmState::default();
        assert_eq!(state.record_publish(), 1);
        assert_eq!(state.record_publish(), 2);
        assert_eq!(state.unconfirmed.len(), 2);
    }

    #[test]
    fn apply_single_ack_removes_only_that_tag() {
        let mut state = ConfirmState::default();
        state.record_publish();
        state.record_publish();
        let drained = state.apply(1, false, false);
        assert!(!drained);
        assert_eq!(state.unconfirmed, VecDeque::from([2]));
        assert!(!state.any_nack);
    }

    #[test]
    fn apply_multiple_ack_drains_every_older_tag() {
        let mut state = ConfirmState::default();
        state.record_publish();
        state.record_publish();
        state.record_publish();
        let drained = state.apply(2, true, false);
        assert!(!drained);
        assert_eq!(state.unconfirmed, VecDeque::from([3]));
        let drained = state.apply(3, false, false);
        assert!(drained);
    }

    #[test]
    fn apply_nack_sets_any_nack_until_next_drain_cycle() {
        let mut state = ConfirmState::default();
        state.record_publish();
        state.apply(1, false, true);
        assert!(state.any_nack);

        // Next publish starts a fresh drain window since unconfirmed is
        // empty again (spec §9 wait_for_confirms boundary decision).
        state.record_publish();
        assert!(!state.any_nack);
    }
}
