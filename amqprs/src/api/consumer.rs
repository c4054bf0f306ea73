//! Consumer dispatch (spec §4.5 "Delivery dispatch"): the `AsyncConsumer`
//! trait callers implement, and the worker pool that drains a consumer's
//! mailbox and calls it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::api::channel::Channel;
use crate::api::types::Message;

/// Implemented by callers to receive deliveries from `basic.consume`
/// (spec §4.5). `basic_consume` requires `C: Clone` so that with
/// `worker_threads > 1` every worker owns its own instance and runs
/// concurrently rather than queuing behind a single shared handler —
/// implementations that need cross-worker state should put it behind
/// their own `Arc`/lock inside the cloned value.
#[async_trait]
pub trait AsyncConsumer: Send + Sync {
    async fn consume(&mut self, channel: &Channel, message: Message);
}

/// Drain `rx` on the calling task until the mailbox closes (consumer
/// cancelled or channel torn down). Used when `BasicConsumeArguments::
/// worker_threads` is `0` — the caller's own task becomes the poll loop
/// and this call does not return until then.
pub(crate) async fn drain_inline<C: AsyncConsumer>(channel: Channel, mut rx: mpsc::UnboundedReceiver<Message>, mut handler: C) {
    while let Some(message) = rx.recv().await {
        handler.consume(&channel, message).await;
    }
}

/// Spawn `count` worker tasks, each owning its own clone of `handler`,
/// that pull deliveries off the shared mailbox `rx` and hand them to
/// `consume()`. Workers only share `rx` (behind a `Mutex`, so each
/// delivery goes to exactly one idle worker) — with no handler lock in
/// the path, `count` workers genuinely process deliveries in parallel
/// (spec §4.5: "with N>1 order is not preserved across workers").
pub(crate) fn spawn_workers<C: AsyncConsumer + Clone + 'static>(channel: Channel, rx: mpsc::UnboundedReceiver<Message>, handler: C, count: usize) {
    let rx = Arc::new(Mutex::new(rx));
    for _ in 0..count {
        let rx = rx.clone();
        let mut handler = handler.clone();
        let channel = channel.clone();
        tokio::spawn(async move {
            loop {
                let message = {
                    let mut rx = rx.lock().await;
                    rx.recv().await
                };
                match message {
                    Some(message) => handler.consume(&channel, message).await,
                    None => return,
                }
            }
        });
    }
}
