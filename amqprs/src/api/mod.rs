//! The public surface: connections, channels, their argument builders,
//! callbacks, and consumer dispatch (spec §4.2-§4.5).

pub mod callbacks;
pub mod channel;
pub mod connection;
pub mod consumer;
pub mod types;

pub use callbacks::{ChannelCallback, ConnectionCallback, DefaultChannelCallback, DefaultConnectionCallback};
pub use channel::{
    BasicConsumeArguments, BasicGetArguments, BasicPublishArguments, BasicQosArguments, Channel, ConfirmSelectArguments,
    ExchangeBindArguments, ExchangeDeclareArguments, ExchangeDeleteArguments, ExchangeUnbindArguments,
    QueueBindArguments, QueueDeclareArguments, QueueDeleteArguments, QueuePurgeArguments, QueueUnbindArguments,
};
pub use connection::{Connection, OpenConnectionArguments};
pub use consumer::AsyncConsumer;
pub use types::{DeclareOk, Message, QueueDeclareResult, ReturnMessage, ServerProperties};
