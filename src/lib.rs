pub mod client;
pub mod codec;
pub mod command;
pub mod commands;
pub mod config;
pub mod connection;
pub mod decoder;
pub mod encoder;
pub mod line;
pub mod pipeline;
pub mod pubsub;
pub mod reply;
pub mod transaction;
pub mod typecast;
pub mod value;

pub use client::{Client, ConnectionEvent};
pub use command::{Arg, Cmd};
pub use config::{ClientConfig, ClientOptions};
pub use pipeline::{CommandError, Pipeline, UsageError};
pub use pubsub::PushMessage;
pub use reply::Reply;
pub use transaction::{Transaction, TransactionError};
pub use value::Value;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
