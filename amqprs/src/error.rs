//! The shared error taxonomy (spec §7) and the close-cascade propagation
//! rules: reader-discovered protocol errors close the owning scope
//! (channel or connection) and wake every dependent waiter; per-operation
//! errors are surfaced directly to the caller.

use crate::frame::MethodHeader;
use amqp_serde::types::{AmqpChannelId, ShortUint};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything a public, possibly-blocking method on [`crate::Connection`]
/// or [`crate::Channel`] can raise.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// The connection was torn down — by the peer, by a local `close()`
    /// call, or by a socket error. Every channel and consumer on it
    /// cascade-closes with this error.
    #[error("connection closed: code={code} text={text}")]
    ConnectionClosed {
        code: ShortUint,
        text: String,
        class_id: Option<ShortUint>,
        method_id: Option<ShortUint>,
    },

    /// The channel is closed — locally, by the broker, or by connection
    /// teardown — and an operation was attempted on it, or a synchronous
    /// waiter was sitting on it when it closed.
    #[error("channel {channel_id} closed: code={code} text={text}")]
    ChannelClosed {
        channel_id: AmqpChannelId,
        code: ShortUint,
        text: String,
        class_id: Option<ShortUint>,
        method_id: Option<ShortUint>,
    },

    /// A synchronous wait received a method other than the one it expected.
    /// Per spec §7 the channel is closed with code 505 (UNEXPECTED_FRAME)
    /// as a consequence.
    #[error("unexpected frame: expected {expected}, got {actual}")]
    UnexpectedFrame { expected: MethodHeader, actual: MethodHeader },

    /// The frame codec failed to decode a frame. Fatal to the connection
    /// (closed with code 501, FRAME_ERROR).
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// No unused channel id remained in `[1, channel_max]`.
    #[error("channel id space exhausted")]
    ChannelMax,

    /// The caller supplied an invalid argument (e.g. a field-table value
    /// that doesn't round-trip, or a body exceeding a caller-specified cap).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The socket failed. Surfaces to the connection/channel layer, which
    /// turns it into a `ConnectionClosed`.
    #[error("network I/O error: {0}")]
    Io(String),

    /// The connection's internal reader/writer/management tasks are gone;
    /// observed when sending on an internal `mpsc`/`oneshot` channel whose
    /// receiver was already dropped (i.e. the connection already closed).
    #[error("connection management channel closed")]
    ConnectionManagementError,

    /// TLS handshake or configuration failure (feature `tls`).
    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection URI failed to parse (feature `urispec`).
    #[cfg(feature = "urispec")]
    #[error("invalid connection URI: {0}")]
    UriParse(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ConnectionManagementError
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::ConnectionManagementError
    }
}

impl From<amqp_serde::Error> for Error {
    fn from(err: amqp_serde::Error) -> Self {
        Error::MalformedFrame(err.to_string())
    }
}
