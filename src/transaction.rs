// https://redis.io/docs/latest/develop/interact/transactions/

use thiserror::Error as ThisError;
use tracing::{debug, error, warn};

use crate::command::Cmd;
use crate::pipeline::{
    is_subscription_command, Callback, CommandError, Completion, Deferred, PendingReply, Pipeline,
    UsageError,
};
use crate::reply::Reply;

/// Issues the commands of a transaction. Runs synchronously, once.
pub type TransactionBlock = Box<dyn FnOnce(&mut Transaction<'_>) + Send>;

/// Receives the overall outcome of a transaction, after every command callback has run.
pub type TransactionOutcome = Box<dyn FnOnce(Result<(), TransactionError>) + Send>;

#[derive(Clone, Debug, ThisError, PartialEq)]
pub enum TransactionError {
    /// A queued command was rejected; nothing was executed.
    #[error("transaction aborted, {command} was rejected: {reason}")]
    Aborted { command: String, reason: String },
    /// `EXEC` returned a null reply, a watched key changed.
    #[error("transaction discarded by the server")]
    Discarded,
    #[error("transaction failed: {0}")]
    Failed(String),
    #[error("connection lost before the transaction completed")]
    Orphaned,
    #[error("could not connect to the server")]
    NoConnection,
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("the client is closed")]
    Closed,
}

impl From<CommandError> for TransactionError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Orphaned => TransactionError::Orphaned,
            CommandError::NoConnection => TransactionError::NoConnection,
            CommandError::Closed => TransactionError::Closed,
            CommandError::Usage(err) => TransactionError::Usage(err),
            CommandError::Server(message) => TransactionError::Failed(message),
            err @ CommandError::TransactionAborted => TransactionError::Failed(err.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum TransactionState {
    Idle,
    /// The block is issuing commands.
    Queuing,
    /// The block is done, acknowledgements are outstanding.
    AwaitingAcks,
    /// `EXEC` is sent.
    Committing,
    /// A command was rejected, `DISCARD` is sent.
    Aborting,
}

struct QueuedHandler {
    cmd: Cmd,
    callback: Callback,
}

struct Rejection {
    // Position in the handlers, `None` when `MULTI` itself failed.
    index: Option<usize>,
    command: String,
    reason: String,
}

/// The transaction currently owning the connection.
pub(crate) struct ActiveTransaction {
    state: TransactionState,
    handlers: Vec<QueuedHandler>,
    unacked: usize,
    acked: usize,
    did_register_all: bool,
    rejection: Option<Rejection>,
    outcome: TransactionOutcome,
}

impl ActiveTransaction {
    fn new(outcome: TransactionOutcome) -> ActiveTransaction {
        ActiveTransaction {
            state: TransactionState::Queuing,
            handlers: Vec::new(),
            unacked: 0,
            acked: 0,
            did_register_all: false,
            rejection: None,
            outcome,
        }
    }

    fn ready_to_commit(&self) -> bool {
        self.state == TransactionState::AwaitingAcks
            && self.did_register_all
            && self.unacked == 0
            && self.rejection.is_none()
    }
}

/// The handle a transaction block issues its commands through.
pub struct Transaction<'a> {
    pipeline: &'a mut Pipeline,
}

impl Transaction<'_> {
    /// Queues `cmd`; `callback` receives its result once the transaction executes.
    pub fn send_with(&mut self, cmd: Cmd, callback: Callback) -> Result<(), UsageError> {
        let usage = self.pipeline.check_usage(&cmd).and_then(|()| {
            // Subscription replies are not answered once per command, EXEC could not pair them.
            if is_subscription_command(cmd.name()) {
                return Err(UsageError::NotTransactional(cmd.name().to_string()));
            }
            Ok(())
        });
        if let Err(err) = usage {
            callback(Err(CommandError::Usage(err.clone())));
            return Err(err);
        }

        let Some(txn) = self.pipeline.txn.as_mut() else {
            // The handle only exists while its transaction is queuing.
            callback(Err(CommandError::TransactionAborted));
            return Ok(());
        };

        txn.handlers.push(QueuedHandler {
            cmd: cmd.clone(),
            callback,
        });
        txn.unacked += 1;

        self.pipeline.dispatch(cmd, Completion::Ack);
        Ok(())
    }

    /// Queues `cmd`, returning a future for its result.
    pub fn send(&mut self, cmd: Cmd) -> PendingReply {
        let (callback, reply) = PendingReply::channel();
        // A usage error has already been handed to the callback.
        let _ = self.send_with(cmd, callback);
        reply
    }

    /// The protocol has no nested transactions: the block's commands join this one.
    pub fn transaction<F>(&mut self, block: F)
    where
        F: FnOnce(&mut Transaction<'_>),
    {
        block(self);
    }

    /// The number of commands queued so far.
    pub fn len(&self) -> usize {
        self.pipeline
            .txn
            .as_ref()
            .map_or(0, |txn| txn.handlers.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Pipeline {
    /// Runs `block` inside `MULTI`/`EXEC`.
    ///
    /// Every command the block issues is acknowledged by the server before `EXEC` is sent. If one
    /// is rejected the transaction is discarded: the rejected command's callback receives the
    /// server error, the others [`CommandError::TransactionAborted`], and `outcome` receives
    /// [`TransactionError::Aborted`]. A transaction started while another one runs waits for it.
    pub fn transaction(
        &mut self,
        block: TransactionBlock,
        outcome: TransactionOutcome,
    ) -> Result<(), UsageError> {
        if self.subscribed {
            let err = UsageError::Subscribed("multi".to_string());
            outcome(Err(err.clone().into()));
            return Err(err);
        }

        if self.txn.is_some() {
            debug!("deferring transaction until the running one closes");
            self.deferred
                .push_back(Deferred::Transaction { block, outcome });
            return Ok(());
        }

        self.begin_transaction(block, outcome);
        Ok(())
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.txn
            .as_ref()
            .map_or(TransactionState::Idle, |txn| txn.state)
    }

    pub(crate) fn begin_transaction(&mut self, block: TransactionBlock, outcome: TransactionOutcome) {
        self.txn = Some(ActiveTransaction::new(outcome));
        self.dispatch(Cmd::new("multi"), Completion::Begin);

        block(&mut Transaction { pipeline: self });

        let Some(txn) = self.txn.as_mut() else {
            return;
        };
        txn.did_register_all = true;
        txn.state = TransactionState::AwaitingAcks;
        debug!(commands = txn.handlers.len(), "transaction queued");

        self.commit_if_ready();
    }

    pub(crate) fn on_begin(&mut self, reply: Reply) {
        let Reply::Error(message) = reply else {
            return;
        };

        let Some(txn) = self.txn.as_mut() else {
            return;
        };
        txn.rejection = Some(Rejection {
            index: None,
            command: "multi".to_string(),
            reason: String::from_utf8_lossy(&message).into_owned(),
        });
        self.abort();
    }

    pub(crate) fn on_ack(&mut self, cmd: &Cmd, reply: Reply) {
        let Some(txn) = self.txn.as_mut() else {
            error!(command = %cmd, "acknowledgement outside of a transaction");
            return;
        };

        let index = txn.acked;
        txn.acked += 1;
        txn.unacked = txn.unacked.saturating_sub(1);

        match reply {
            Reply::Status(status) if status == "QUEUED" => self.commit_if_ready(),
            reply => {
                let reason = match reply {
                    Reply::Error(message) => String::from_utf8_lossy(&message).into_owned(),
                    reply => format!("unexpected acknowledgement {}", reply),
                };
                warn!(command = %cmd, reason = %reason, "transaction command rejected");

                txn.rejection = Some(Rejection {
                    index: Some(index),
                    command: cmd.name().to_string(),
                    reason,
                });
                self.abort();
            }
        }
    }

    fn commit_if_ready(&mut self) {
        let Some(txn) = self.txn.as_mut() else {
            return;
        };
        if !txn.ready_to_commit() {
            return;
        }

        txn.state = TransactionState::Committing;
        self.dispatch(Cmd::new("exec"), Completion::Commit);
    }

    /// Discards the transaction after a rejection.
    ///
    /// The server answers every command sent after `MULTI`, so acknowledgements already written
    /// stay in the history as retired entries whose replies are dropped. Those not written yet
    /// are never sent.
    fn abort(&mut self) {
        let Some(txn) = self.txn.as_mut() else {
            return;
        };
        txn.state = TransactionState::Aborting;

        for pending in self.history.iter_mut() {
            if matches!(pending.completion, Completion::Ack) {
                pending.completion = Completion::Retired;
            }
        }
        self.queued.retain(|queued| {
            !queued
                .entries
                .iter()
                .any(|pending| matches!(pending.completion, Completion::Ack))
        });

        self.dispatch(Cmd::new("discard"), Completion::Abort);
    }

    pub(crate) fn on_abort(&mut self, reply: Reply) {
        if let Reply::Error(message) = &reply {
            debug!(reply = %String::from_utf8_lossy(message), "discard failed");
        }

        let Some(txn) = self.txn.take() else {
            return;
        };
        let (index, command, reason) = match txn.rejection {
            Some(rejection) => (rejection.index, rejection.command, rejection.reason),
            None => (None, "discard".to_string(), "transaction discarded".to_string()),
        };

        for (i, handler) in txn.handlers.into_iter().enumerate() {
            let err = if Some(i) == index {
                CommandError::Server(reason.clone())
            } else {
                CommandError::TransactionAborted
            };
            (handler.callback)(Err(err));
        }
        (txn.outcome)(Err(TransactionError::Aborted { command, reason }));

        self.run_deferred();
    }

    /// Hands each element of the `EXEC` reply to the callback of the command at the same position.
    pub(crate) fn on_commit(&mut self, reply: Reply) {
        let Some(txn) = self.txn.take() else {
            return;
        };

        let result = match reply {
            Reply::Array(Some(items)) if items.len() == txn.handlers.len() => {
                for (handler, item) in txn.handlers.into_iter().zip(items) {
                    let result = self.resolve(&handler.cmd, item);
                    (handler.callback)(result);
                }
                Ok(())
            }
            reply => {
                let err = match reply {
                    Reply::Array(None) => TransactionError::Discarded,
                    Reply::Error(message) => {
                        TransactionError::Failed(String::from_utf8_lossy(&message).into_owned())
                    }
                    reply => {
                        error!(reply = %reply, commands = txn.handlers.len(), "EXEC reply does not match the transaction");
                        TransactionError::Failed(format!("unexpected EXEC reply {}", reply))
                    }
                };
                for handler in txn.handlers {
                    (handler.callback)(Err(CommandError::TransactionAborted));
                }
                Err(err)
            }
        };
        (txn.outcome)(result);

        self.run_deferred();
    }

    /// Fails the running transaction without waiting for the server.
    pub(crate) fn abandon_transaction(&mut self, err: CommandError) {
        let Some(txn) = self.txn.take() else {
            return;
        };
        warn!(state = %txn.state, error = %err, "abandoning transaction");

        self.purge_queued_transaction();

        for handler in txn.handlers {
            (handler.callback)(Err(err.clone()));
        }
        (txn.outcome)(Err(err.into()));
    }
}
