//! The transport layer: frame I/O over a generic duplex stream, and the
//! reader/writer tasks that own it (spec §4.2, §4.3).

mod reader_handler;
mod shared;
mod split_connection;
mod writer_handler;

pub(crate) use reader_handler::ReaderHandler;
pub(crate) use shared::{
    now_secs, Assembly, ChannelInner, ChannelStatus, CloseReason, ConfirmState, ConnectionShared, ConsumerMailbox,
    GetResult, OutgoingGroup, PendingContent,
};
pub(crate) use split_connection::{BoxedStream, SplitConnection};
pub(crate) use writer_handler::WriterHandler;
