//! The connection writer (spec §4.2(d)): serializes all outbound frames
//! through a single mpsc queue so a publish's method+header+body frames
//! are never interleaved with another channel's frames, sends an empty
//! heartbeat frame whenever the connection has been idle for
//! `heartbeat / 2` seconds, and treats silence from the peer for
//! `2 * heartbeat` seconds as connection death (spec §4.2(e)).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
#[cfg(feature = "traces")]
use tracing::warn;

use crate::frame::Frame;
use crate::net::shared::{now_secs, CloseReason, ConnectionShared};
use crate::net::split_connection::BufWriter;
use tokio::io::{AsyncRead, AsyncWrite};

pub(crate) struct WriterHandler<S> {
    writer: BufWriter<S>,
    outgoing_rx: mpsc::Receiver<Vec<Frame>>,
    conn: Arc<ConnectionShared>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send + 'static> WriterHandler<S> {
    pub(crate) fn new(writer: BufWriter<S>, outgoing_rx: mpsc::Receiver<Vec<Frame>>, conn: Arc<ConnectionShared>) -> Self {
        Self { writer, outgoing_rx, conn }
    }

    pub(crate) async fn run(mut self) {
        let heartbeat_period = if self.conn.heartbeat > 0 {
            Duration::from_secs((self.conn.heartbeat / 2).max(1) as u64)
        } else {
            Duration::from_secs(3600)
        };
        let mut ticker = interval(heartbeat_period);

        loop {
            tokio::select! {
                group = self.outgoing_rx.recv() => {
                    match group {
                        Some(frames) => {
                            if let Err(err) = self.writer.write_frames(&frames).await {
                                #[cfg(feature = "traces")]
                                warn!("connection writer stopped: {err}");
                                return;
                            }
                            self.conn.last_write.store(now_secs(), Ordering::Relaxed);
                        }
                        None => return, // every sender dropped: connection is closing
                    }
                }
                _ = ticker.tick() => {
                    if !self.conn.is_open() {
                        return;
                    }

                    if self.conn.heartbeat > 0 {
                        let idle_read = now_secs().saturating_sub(self.conn.last_read.load(Ordering::Relaxed));
                        if idle_read >= 2 * self.conn.heartbeat as u64 {
                            #[cfg(feature = "traces")]
                            warn!("no frame from peer in {idle_read}s (>= 2x heartbeat): treating connection as dead");
                            let reason = CloseReason {
                                code: 0,
                                text: "missed heartbeat".to_string(),
                                class_id: None,
                                method_id: None,
                            };
                            self.conn.cascade_close(reason).await;
                            return;
                        }
                    }

                    let idle_for = now_secs().saturating_sub(self.conn.last_write.load(Ordering::Relaxed));
                    if self.conn.heartbeat > 0 && idle_for >= (self.conn.heartbeat / 2).max(1) as u64 {
                        if let Err(err) = self.writer.write_frames(&[Frame::Heartbeat]).await {
                            #[cfg(feature = "traces")]
                            warn!("failed to send heartbeat: {err}");
                            return;
                        }
                        self.conn.last_write.store(now_secs(), Ordering::Relaxed);
                    }
                }
            }
        }
    }
}
