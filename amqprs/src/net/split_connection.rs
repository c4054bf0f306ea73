//! Buffered frame reader/writer over a generic duplex stream.
//!
//! Generic over `S: AsyncRead + AsyncWrite` so the same code serves both a
//! plain `TcpStream` and a `tokio-rustls` `TlsStream` (feature `tls`):
//! `tokio::io::split` works for either. Adapted from the teacher's
//! `net::split_connection`, trading its `amqp_serde`-Serialize-based framing
//! for this crate's explicit [`Frame`] codec.

use crate::error::Error;
use crate::frame::{Frame, AMQP_PROTOCOL_HEADER};
use amqp_serde::types::AmqpChannelId;
use bytes::{Buf, BytesMut};
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
#[cfg(feature = "traces")]
use tracing::trace;

type Result<T> = std::result::Result<T, Error>;
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// A duplex byte stream usable as the connection's transport, whether a
/// plain `TcpStream` or a `tokio-rustls` `TlsStream` (feature `tls`).
/// `Connection::open` always boxes into this so the reader/writer tasks
/// and frame codec are oblivious to which transport is in use.
pub(crate) trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> IoStream for T {}

pub(crate) type BoxedStream = Box<dyn IoStream>;

pub(crate) struct SplitConnection<S> {
    reader: BufReader<S>,
    writer: BufWriter<S>,
}

pub(crate) struct BufReader<S> {
    stream: ReadHalf<S>,
    buffer: BytesMut,
}

pub(crate) struct BufWriter<S> {
    stream: WriteHalf<S>,
}

pub(crate) type ChannelFrame = (AmqpChannelId, Frame);

impl<S: AsyncRead + AsyncWrite + Unpin> SplitConnection<S> {
    /// Send the protocol header and wrap `stream` for frame-at-a-time I/O.
    pub(crate) async fn new(mut stream: S) -> Result<Self> {
        stream.write_all(&AMQP_PROTOCOL_HEADER).await?;
        let (read_half, write_half) = split(stream);
        Ok(Self {
            reader: BufReader { stream: read_half, buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE) },
            writer: BufWriter { stream: write_half },
        })
    }

    pub(crate) fn into_split(self) -> (BufReader<S>, BufWriter<S>) {
        (self.reader, self.writer)
    }

    pub(crate) async fn read_frame(&mut self) -> Result<ChannelFrame> {
        self.reader.read_frame().await
    }

    pub(crate) async fn write_frames(&mut self, frames: &[Frame]) -> Result<()> {
        self.writer.write_frames(frames).await
    }
}

impl<S: AsyncWrite + Unpin> BufWriter<S> {
    /// Write every frame in `frames` back-to-back before returning, which
    /// is how atomic multi-frame publishes (spec §4.2(f), §5) are kept
    /// uninterleaved: the writer task never yields control between frames
    /// of the same group.
    pub(crate) async fn write_frames(&mut self, frames: &[Frame]) -> Result<()> {
        for frame in frames {
            let bytes = match frame {
                Frame::Method(channel, method) => Frame::encode_method(*channel, method),
                Frame::Header(channel, header) => Frame::encode_header(*channel, header),
                Frame::Body(channel, body) => Frame::encode_body(*channel, body),
                Frame::Heartbeat => Frame::encode_heartbeat(),
            };
            #[cfg(feature = "traces")]
            trace!("SENT on channel {}: {:?}", frame.channel_id(), frame);
            self.stream.write_all(&bytes).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    pub(crate) async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

impl<S: AsyncRead + Unpin> BufReader<S> {
    fn try_decode(&mut self) -> Result<Option<ChannelFrame>> {
        let snapshot = self.buffer.clone().freeze();
        match Frame::decode(&snapshot)? {
            Some((len, frame)) => {
                self.buffer.advance(len);
                let channel = frame.channel_id();
                #[cfg(feature = "traces")]
                trace!("RECV on channel {}: {:?}", channel, frame);
                Ok(Some((channel, frame)))
            }
            None => Ok(None),
        }
    }

    /// Read a complete frame from the socket, blocking until enough bytes
    /// for one have arrived. Returns `Error::Io` on a clean EOF — the
    /// reader handler (`net::reader_handler`) treats that the same as a
    /// socket error and cascades `ConnectionClosed`.
    pub(crate) async fn read_frame(&mut self) -> Result<ChannelFrame> {
        if let Some(frame) = self.try_decode()? {
            return Ok(frame);
        }
        loop {
            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(Error::Io("connection closed by peer".to_string()));
            }
            if let Some(frame) = self.try_decode()? {
                return Ok(frame);
            }
        }
    }

    pub(crate) async fn close(self) {}
}
