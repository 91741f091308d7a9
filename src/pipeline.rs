//! Pairs replies with the commands that caused them.
//!
//! The pipeline does no I/O of its own: the connection task feeds it the bytes it reads with
//! [`Pipeline::receive`], writes whatever [`Pipeline::take_output`] hands back, and reports the
//! transport coming and going through [`Pipeline::connection_established`] and
//! [`Pipeline::connection_lost`]. Every callback runs from one of those calls.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use thiserror::Error as ThisError;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::command::Cmd;
use crate::decoder::{DecodeError, ReplyDecoder};
use crate::encoder::CommandEncoder;
use crate::pubsub::{self, ChannelRegistry, PushHandler, PushMessage};
use crate::reply::Reply;
use crate::transaction::{ActiveTransaction, TransactionBlock, TransactionOutcome};
use crate::typecast::typecast;
use crate::value::Value;

/// Receives the outcome of one command.
pub type Callback = Box<dyn FnOnce(Result<Value, CommandError>) + Send>;

/// The error handed to a command's callback.
#[derive(Clone, Debug, ThisError, PartialEq)]
pub enum CommandError {
    /// The server answered with an error reply.
    #[error("{0}")]
    Server(String),
    #[error("connection lost before the reply was received")]
    Orphaned,
    #[error("could not connect to the server")]
    NoConnection,
    #[error("the transaction was rolled back")]
    TransactionAborted,
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("the client is closed")]
    Closed,
}

/// Misuse detected before anything is sent.
#[derive(Clone, Debug, ThisError, PartialEq)]
pub enum UsageError {
    #[error("{0} is issued by the transaction API, not by hand")]
    TransactionCommand(String),
    #[error("{0} needs at least one channel")]
    MissingChannel(String),
    #[error("channel name is empty")]
    EmptyChannelName,
    #[error("only pub/sub commands are allowed while subscribed, got {0}")]
    Subscribed(String),
    #[error("{0} cannot be queued in a transaction")]
    NotTransactional(String),
}

/// The reply stream no longer lines up with the commands sent. The connection has to be dropped.
#[derive(Debug, ThisError, PartialEq)]
pub enum ProtocolError {
    #[error("protocol error; reply {0} with no pending command")]
    UnexpectedReply(Reply),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// What to do with the reply of a command once it arrives.
pub(crate) enum Completion {
    /// Deliver the typecast value to the caller.
    Caller(Callback),
    /// An internal command; failures are logged.
    Silent,
    /// The reply to `MULTI`.
    Begin,
    /// The acknowledgement of a command queued in a transaction.
    Ack,
    /// An acknowledgement behind a rejected one; the reply is dropped.
    Retired,
    /// The reply to `EXEC`.
    Commit,
    /// The reply to `DISCARD`.
    Abort,
}

impl Completion {
    fn is_transactional(&self) -> bool {
        !matches!(self, Completion::Caller(_) | Completion::Silent)
    }
}

pub(crate) struct PendingCommand {
    pub(crate) cmd: Cmd,
    pub(crate) completion: Completion,
}

impl PendingCommand {
    fn fail(self, error: CommandError) {
        if let Completion::Caller(callback) = self.completion {
            callback(Err(error));
        }
    }
}

/// A command encoded while the transport could not take it.
pub(crate) struct QueuedCommand {
    pub(crate) entries: Vec<PendingCommand>,
    bytes: Bytes,
}

/// Work held back until the running transaction closes.
pub(crate) enum Deferred {
    Command { cmd: Cmd, completion: Completion },
    Transaction {
        block: TransactionBlock,
        outcome: TransactionOutcome,
    },
}

pub struct Pipeline {
    encoder: CommandEncoder,
    decoder: ReplyDecoder,
    // Commands written to the transport, oldest first, waiting for their reply.
    pub(crate) history: VecDeque<PendingCommand>,
    // Commands encoded while the transport was not writable, in send order.
    pub(crate) queued: VecDeque<QueuedCommand>,
    pub(crate) deferred: VecDeque<Deferred>,
    pub(crate) txn: Option<ActiveTransaction>,
    channels: ChannelRegistry,
    pub(crate) subscribed: bool,
    selected_db: i64,
    writable: bool,
    output: BytesMut,
}

impl Pipeline {
    pub fn new() -> Pipeline {
        Pipeline {
            encoder: CommandEncoder::new(),
            decoder: ReplyDecoder::new(),
            history: VecDeque::new(),
            queued: VecDeque::new(),
            deferred: VecDeque::new(),
            txn: None,
            channels: ChannelRegistry::new(),
            subscribed: false,
            selected_db: 0,
            writable: false,
            output: BytesMut::new(),
        }
    }

    /// Sends `cmd`; `callback` receives its outcome.
    ///
    /// While a transaction is running the command is held back until it closes. Misuse is
    /// reported right away, to the callback as well as to the caller.
    pub fn send(&mut self, cmd: Cmd, callback: Callback) -> Result<(), UsageError> {
        if let Err(err) = self.check_usage(&cmd) {
            callback(Err(CommandError::Usage(err.clone())));
            return Err(err);
        }

        self.submit(cmd, Completion::Caller(callback));
        Ok(())
    }

    pub(crate) fn submit(&mut self, cmd: Cmd, completion: Completion) {
        if self.txn.is_some() {
            debug!(command = %cmd, "deferring command until the transaction closes");
            self.deferred.push_back(Deferred::Command { cmd, completion });
            return;
        }

        self.dispatch(cmd, completion);
    }

    /// Encodes `cmd` and writes it, or queues it behind the commands already waiting for the
    /// transport.
    pub(crate) fn dispatch(&mut self, cmd: Cmd, completion: Completion) {
        if self.writable && self.queued.is_empty() {
            self.write(cmd, completion);
            return;
        }

        let bytes = Bytes::copy_from_slice(self.encoder.encode(cmd.name(), cmd.arguments()));
        debug!(command = %cmd, "queueing command until the connection is writable");
        let entries = self.entries(cmd, completion);
        self.queued.push_back(QueuedCommand { entries, bytes });
    }

    fn write(&mut self, cmd: Cmd, completion: Completion) {
        let bytes = self.encoder.encode(cmd.name(), cmd.arguments());
        self.output.extend_from_slice(bytes);
        debug!(command = %cmd, "sending command");

        let entries = self.entries(cmd, completion);
        self.history.extend(entries);
    }

    /// The history entries for `cmd`: a subscription command naming N channels is answered N
    /// times. Inside a transaction every command is acknowledged once.
    fn entries(&mut self, cmd: Cmd, completion: Completion) -> Vec<PendingCommand> {
        let replies = if is_subscription_command(cmd.name()) && !completion.is_transactional() {
            if matches!(cmd.name(), "subscribe" | "psubscribe") {
                self.subscribed = true;
            }
            cmd.arguments().len().max(1)
        } else {
            1
        };

        let mut entries = Vec::with_capacity(replies);
        for _ in 1..replies {
            entries.push(PendingCommand {
                cmd: cmd.clone(),
                completion: Completion::Silent,
            });
        }
        entries.insert(0, PendingCommand { cmd, completion });
        entries
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Reports transport backpressure. Becoming writable flushes the queued commands.
    pub fn set_writable(&mut self, writable: bool) {
        self.writable = writable;
        if writable {
            self.flush_queued();
        }
    }

    fn flush_queued(&mut self) {
        if !self.queued.is_empty() {
            debug!(count = self.queued.len(), "flushing queued commands");
        }

        while let Some(queued) = self.queued.pop_front() {
            self.output.extend_from_slice(&queued.bytes);
            self.history.extend(queued.entries);
        }
    }

    /// The bytes to write to the transport, if any.
    pub fn take_output(&mut self) -> Option<Bytes> {
        if self.output.is_empty() {
            return None;
        }

        Some(self.output.split().freeze())
    }

    /// Feeds bytes read from the transport, completing callbacks for every reply they finish.
    ///
    /// This is the entry point for transports that hand over raw bytes. A driver that already
    /// decodes replies, like [`Connection`](crate::connection::Connection) with its codec, calls
    /// [`Pipeline::handle_reply`] instead and leaves the pipeline's own decoder idle.
    pub fn receive(&mut self, chunk: &[u8]) -> Result<(), ProtocolError> {
        let mut replies = Vec::new();
        self.decoder.feed_into(chunk, &mut replies)?;

        for reply in replies {
            self.handle_reply(reply)?;
        }

        Ok(())
    }

    /// Routes one complete reply.
    ///
    /// Push messages are recognized by shape alone, subscribed or not. An ordinary reply that is
    /// exactly `["message", x, y]` or `["pmessage", x, y, z]` is taken for one and never reaches
    /// its command.
    pub fn handle_reply(&mut self, reply: Reply) -> Result<(), ProtocolError> {
        if let Some(message) = PushMessage::classify(&reply) {
            if !self.channels.dispatch(&message) {
                warn!(channel = message.channel(), "dropping message without a handler");
            }
            return Ok(());
        }

        let Some(pending) = self.history.pop_front() else {
            error!(reply = %reply, "received a reply with no pending command");
            return Err(ProtocolError::UnexpectedReply(reply));
        };

        debug!(command = %pending.cmd, kind = %reply.kind(), "received reply");
        self.track_subscriptions(&pending.cmd, &reply);

        match pending.completion {
            Completion::Caller(callback) => {
                let result = self.resolve(&pending.cmd, reply);
                callback(result);
            }
            Completion::Silent => {
                if let Err(err) = self.resolve(&pending.cmd, reply) {
                    warn!(command = %pending.cmd, error = %err, "internal command failed");
                }
            }
            Completion::Begin => self.on_begin(reply),
            Completion::Ack => self.on_ack(&pending.cmd, reply),
            Completion::Retired => {
                debug!(command = %pending.cmd, "dropping acknowledgement of a rolled back command");
            }
            Completion::Commit => self.on_commit(reply),
            Completion::Abort => self.on_abort(reply),
        }

        Ok(())
    }

    /// Turns the reply of `cmd` into its callback's argument. Runs exactly once per reply.
    pub(crate) fn resolve(&mut self, cmd: &Cmd, reply: Reply) -> Result<Value, CommandError> {
        if let Reply::Error(message) = reply {
            return Err(CommandError::Server(
                String::from_utf8_lossy(&message).into_owned(),
            ));
        }

        if let Some(db) = cmd.selected_db() {
            self.selected_db = db;
        }

        Ok(typecast(cmd, reply))
    }

    fn track_subscriptions(&mut self, cmd: &Cmd, reply: &Reply) {
        if !matches!(cmd.name(), "unsubscribe" | "punsubscribe") {
            return;
        }

        if pubsub::remaining_subscriptions(reply) == Some(0) {
            debug!("no subscriptions left, leaving pub/sub mode");
            self.subscribed = false;
        }
    }

    /// The transport is connected and writable.
    ///
    /// Connection scoped server state is restored ahead of everything queued: the selected
    /// database first, then every registered subscription.
    pub fn connection_established(&mut self) {
        self.writable = true;

        if self.selected_db != 0 {
            info!(db = self.selected_db, "restoring selected database");
            self.write(Cmd::new("select").arg(self.selected_db), Completion::Silent);
        }

        let names: Vec<String> = self.channels.names().map(str::to_string).collect();
        for name in names {
            let command = if pubsub::is_pattern(&name) {
                "psubscribe"
            } else {
                "subscribe"
            };
            self.write(Cmd::new(command).arg(name), Completion::Silent);
        }

        self.flush_queued();
    }

    /// The transport is gone. Every command waiting for a reply fails with
    /// [`CommandError::Orphaned`]; commands not written yet stay queued for the next connection.
    pub fn connection_lost(&mut self) {
        self.writable = false;
        self.subscribed = false;
        self.decoder.reset();
        self.output.clear();

        let txn_written = self
            .history
            .iter()
            .any(|pending| pending.completion.is_transactional());

        let orphaned = std::mem::take(&mut self.history);
        if !orphaned.is_empty() {
            warn!(count = orphaned.len(), "connection lost, orphaning pending commands");
        }
        for pending in orphaned {
            pending.fail(CommandError::Orphaned);
        }

        if txn_written {
            self.abandon_transaction(CommandError::Orphaned);
            self.run_deferred();
        }
    }

    /// Fails everything in flight or waiting with `error`. Used when the client gives up on the
    /// connection or is closed.
    pub fn shutdown(&mut self, error: CommandError) {
        self.writable = false;
        self.output.clear();

        for pending in std::mem::take(&mut self.history) {
            pending.fail(error.clone());
        }
        for queued in std::mem::take(&mut self.queued) {
            for pending in queued.entries {
                pending.fail(error.clone());
            }
        }

        self.abandon_transaction(error.clone());

        for deferred in std::mem::take(&mut self.deferred) {
            match deferred {
                Deferred::Command { cmd, completion } => PendingCommand { cmd, completion }.fail(error.clone()),
                Deferred::Transaction { outcome, .. } => outcome(Err(error.clone().into())),
            }
        }
    }

    /// Whether nothing is waiting for a reply, for the transport or for a transaction.
    pub fn is_idle(&self) -> bool {
        self.history.is_empty()
            && self.queued.is_empty()
            && self.deferred.is_empty()
            && self.txn.is_none()
    }

    pub fn selected_db(&self) -> i64 {
        self.selected_db
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Registers `handler` for a channel, or for a pattern if `name` has glob characters, and
    /// subscribes to it. Subscribing to a name twice keeps the first handler.
    pub fn subscribe_to(&mut self, name: &str, handler: PushHandler) -> Result<(), UsageError> {
        if name.is_empty() {
            return Err(UsageError::EmptyChannelName);
        }

        if !self.channels.insert(name, handler) {
            return Ok(());
        }

        let command = if pubsub::is_pattern(name) {
            "psubscribe"
        } else {
            "subscribe"
        };
        self.submit(Cmd::new(command).arg(name), Completion::Silent);
        Ok(())
    }

    /// Drops the handler for `name` and unsubscribes from it. Unknown names are ignored.
    pub fn unsubscribe_from(&mut self, name: &str) {
        if !self.channels.remove(name) {
            return;
        }

        let command = if pubsub::is_pattern(name) {
            "punsubscribe"
        } else {
            "unsubscribe"
        };
        self.submit(Cmd::new(command).arg(name), Completion::Silent);
    }

    pub fn check_usage(&self, cmd: &Cmd) -> Result<(), UsageError> {
        match cmd.name() {
            "multi" | "exec" | "discard" => {
                Err(UsageError::TransactionCommand(cmd.name().to_string()))
            }
            name if is_subscription_command(name) && cmd.arguments().is_empty() => {
                Err(UsageError::MissingChannel(name.to_string()))
            }
            name if self.subscribed
                && !is_subscription_command(name)
                && !matches!(name, "ping" | "quit") =>
            {
                Err(UsageError::Subscribed(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn run_deferred(&mut self) {
        while self.txn.is_none() {
            let Some(deferred) = self.deferred.pop_front() else {
                break;
            };

            match deferred {
                Deferred::Command { cmd, completion } => self.dispatch(cmd, completion),
                Deferred::Transaction { block, outcome } => self.begin_transaction(block, outcome),
            }
        }
    }

    /// Drops the commands of the running transaction that were never written.
    pub(crate) fn purge_queued_transaction(&mut self) {
        self.queued.retain(|queued| {
            !queued
                .entries
                .iter()
                .any(|pending| pending.completion.is_transactional())
        });
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn is_subscription_command(name: &str) -> bool {
    matches!(
        name,
        "subscribe" | "psubscribe" | "unsubscribe" | "punsubscribe"
    )
}

/// Resolves to the outcome of one command.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Result<Value, CommandError>>,
}

impl PendingReply {
    /// A callback paired with the future it completes.
    pub fn channel() -> (Callback, PendingReply) {
        let (tx, rx) = oneshot::channel();
        let callback: Callback = Box::new(move |result| {
            let _ = tx.send(result);
        });

        (callback, PendingReply { rx })
    }
}

impl Future for PendingReply {
    type Output = Result<Value, CommandError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(CommandError::Closed)))
    }
}
