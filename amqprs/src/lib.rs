//! A Tokio-based AMQP 0-9-1 client (spec §1 "Overview").
//!
//! Opens a connection with [`Connection::open`], multiplexes logical
//! [`Channel`]s over it, and drives exchange/queue/message operations
//! through them. A single reader task per connection decodes frames off
//! the socket and routes them to per-channel mailboxes; callers never
//! poll the socket themselves.
//!
//! ```no_run
//! use amqprs::{Connection, OpenConnectionArguments};
//!
//! # async fn go() -> amqprs::Result<()> {
//! let connection = Connection::open(&OpenConnectionArguments::new("localhost", 5672, "guest", "guest")).await?;
//! let channel = connection.channel().await?;
//! # Ok(())
//! # }
//! ```

mod api;
mod error;
mod frame;
mod net;
#[cfg(feature = "tls")]
mod tls;
#[cfg(feature = "urispec")]
mod uri;

pub use api::{
    AsyncConsumer, BasicConsumeArguments, BasicGetArguments, BasicPublishArguments, BasicQosArguments, Channel,
    ChannelCallback, ConfirmSelectArguments, Connection, ConnectionCallback, DeclareOk, DefaultChannelCallback,
    DefaultConnectionCallback, ExchangeBindArguments, ExchangeDeclareArguments, ExchangeDeleteArguments,
    ExchangeUnbindArguments, Message, OpenConnectionArguments, QueueBindArguments, QueueDeclareArguments,
    QueueDeclareResult, QueueDeleteArguments, QueuePurgeArguments, QueueUnbindArguments, ReturnMessage,
    ServerProperties,
};
pub use error::{Error, Result};
pub use frame::{BasicProperties, BasicPropertiesBuilder, MethodHeader};

#[cfg(feature = "tls")]
pub use tls::TlsAdaptor;
