use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::command::Cmd;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::pipeline::{Callback, CommandError, PendingReply, Pipeline, UsageError};
use crate::pubsub::{PushHandler, PushMessage};
use crate::transaction::{Transaction, TransactionBlock, TransactionError, TransactionOutcome};
use crate::value::Value;
use crate::Error;

enum Request {
    Send {
        cmd: Cmd,
        callback: Callback,
    },
    Transaction {
        block: TransactionBlock,
        outcome: TransactionOutcome,
    },
    Subscribe {
        name: String,
        handler: PushHandler,
    },
    Unsubscribe {
        name: String,
    },
    Close,
}

impl Request {
    fn fail(self, err: CommandError) {
        match self {
            Request::Send { callback, .. } => callback(Err(err)),
            Request::Transaction { outcome, .. } => outcome(Err(err.into())),
            Request::Subscribe { .. } | Request::Unsubscribe { .. } | Request::Close => {}
        }
    }
}

// Events are dropped for receivers lagging further behind.
const EVENT_CAPACITY: usize = 32;

/// What happens to the connection underneath a [`Client`].
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    /// The connection was lost. Commands waiting for a reply fail with
    /// [`CommandError::Orphaned`].
    Disconnected { error: String },
    /// Waiting `delay` before reconnection attempt number `attempt`.
    Reconnecting { attempt: u32, delay: Duration },
    Reconnected,
    /// The last reconnection attempt failed; everything waiting fails with
    /// [`CommandError::NoConnection`].
    NoConnection,
    /// The connection task is done, no request is handled anymore.
    Closed,
}

/// A handle to one pipelined connection.
///
/// Handles are cheap to clone and share the connection. The connection task ends once
/// [`Client::close`] was called and every command sent has completed, or once every handle is
/// dropped.
#[derive(Clone, Debug)]
pub struct Client {
    requests: mpsc::UnboundedSender<Request>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Send { cmd, .. } => write!(f, "Send({})", cmd),
            Request::Transaction { .. } => write!(f, "Transaction"),
            Request::Subscribe { name, .. } => write!(f, "Subscribe({})", name),
            Request::Unsubscribe { name } => write!(f, "Unsubscribe({})", name),
            Request::Close => write!(f, "Close"),
        }
    }
}

impl Client {
    /// Connects to the server and spawns the connection task.
    ///
    /// A failed first connection is not retried.
    pub async fn connect(config: ClientConfig) -> Result<Client, Error> {
        let connection = Connection::connect(&config).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let task = Task {
            config,
            requests: rx,
            events: events.clone(),
            pipeline: Pipeline::new(),
            closing: false,
        };
        tokio::spawn(task.run(connection));

        Ok(Client {
            requests: tx,
            events,
        })
    }

    /// Subscribes to the connection events emitted from now on.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Sends `cmd`; `callback` runs on the connection task with its outcome.
    pub fn send_with<F>(&self, cmd: Cmd, callback: F)
    where
        F: FnOnce(Result<Value, CommandError>) + Send + 'static,
    {
        self.request(Request::Send {
            cmd,
            callback: Box::new(callback),
        });
    }

    pub async fn send(&self, cmd: impl Into<Cmd>) -> Result<Value, CommandError> {
        let (callback, reply) = PendingReply::channel();
        self.request(Request::Send {
            cmd: cmd.into(),
            callback,
        });
        reply.await
    }

    /// Runs `block` in a transaction and returns what it returns once the transaction has
    /// executed.
    ///
    /// ```no_run
    /// # async fn example(client: pipedis::Client) -> Result<(), Box<dyn std::error::Error>> {
    /// use pipedis::Cmd;
    ///
    /// let (incr, get) = client
    ///     .transaction(|t| {
    ///         let incr = t.send(Cmd::new("incr").arg("counter"));
    ///         let get = t.send(Cmd::new("get").arg("counter"));
    ///         (incr, get)
    ///     })
    ///     .await?;
    /// println!("{} {}", incr.await?, get.await?);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn transaction<F, R>(&self, block: F) -> Result<R, TransactionError>
    where
        F: FnOnce(&mut Transaction<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (value_tx, value_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        self.transaction_with(
            Box::new(move |t: &mut Transaction<'_>| {
                let _ = value_tx.send(block(t));
            }),
            Box::new(move |result: Result<(), TransactionError>| {
                let _ = outcome_tx.send(result);
            }),
        );

        outcome_rx.await.unwrap_or(Err(TransactionError::Closed))?;
        value_rx.await.map_err(|_| TransactionError::Closed)
    }

    /// Callback flavor of [`Client::transaction`].
    pub fn transaction_with(&self, block: TransactionBlock, outcome: TransactionOutcome) {
        self.request(Request::Transaction { block, outcome });
    }

    /// Calls `handler` for every message published to `name`, a channel or a glob pattern.
    pub fn subscribe_to<F>(&self, name: &str, handler: F) -> Result<(), UsageError>
    where
        F: FnMut(&PushMessage) + Send + 'static,
    {
        if name.is_empty() {
            return Err(UsageError::EmptyChannelName);
        }

        self.request(Request::Subscribe {
            name: name.to_string(),
            handler: Box::new(handler),
        });
        Ok(())
    }

    pub fn unsubscribe_from(&self, name: &str) {
        self.request(Request::Unsubscribe {
            name: name.to_string(),
        });
    }

    /// Stops accepting commands. Commands already sent still complete.
    pub fn close(&self) {
        self.request(Request::Close);
    }

    fn request(&self, request: Request) {
        if let Err(mpsc::error::SendError(request)) = self.requests.send(request) {
            request.fail(CommandError::Closed);
        }
    }
}

/// Owns the connection and the pipeline. Every request and every reply is handled here, one at a
/// time.
struct Task {
    config: ClientConfig,
    requests: mpsc::UnboundedReceiver<Request>,
    events: broadcast::Sender<ConnectionEvent>,
    pipeline: Pipeline,
    closing: bool,
}

impl Task {
    #[instrument(
        name = "connection",
        skip(self, connection),
        fields(connection_id, server_address = %self.config.address())
    )]
    async fn run(mut self, mut connection: Connection) {
        let mut reconnected = false;

        loop {
            tracing::Span::current().record("connection_id", connection.id.to_string());
            if reconnected {
                info!("reconnected");
                self.emit(ConnectionEvent::Reconnected);
            } else {
                info!("connected");
            }

            self.pipeline.connection_established();

            match self.serve(&mut connection).await {
                Ok(()) => break,
                Err(err) => {
                    warn!(error = %err, "connection lost");
                    self.emit(ConnectionEvent::Disconnected {
                        error: err.to_string(),
                    });
                }
            }

            drop(connection);
            self.pipeline.connection_lost();

            if self.closing {
                break;
            }

            match self.reconnect().await {
                Some(next) => {
                    connection = next;
                    reconnected = true;
                }
                None if self.closing => break,
                None => {
                    warn!(
                        attempts = self.config.max_reconnection_attempts,
                        "giving up reconnecting"
                    );
                    self.emit(ConnectionEvent::NoConnection);
                    self.pipeline.shutdown(CommandError::NoConnection);
                    break;
                }
            }
        }

        self.pipeline.shutdown(CommandError::Closed);

        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            request.fail(CommandError::Closed);
        }

        self.emit(ConnectionEvent::Closed);
        info!("connection task finished");
    }

    /// Handles requests and replies until the connection fails, or until the client is closed and
    /// nothing is left in flight.
    async fn serve(&mut self, connection: &mut Connection) -> Result<(), Error> {
        loop {
            connection.flush(&mut self.pipeline).await?;

            if self.closing && self.pipeline.is_idle() {
                return Ok(());
            }

            tokio::select! {
                request = self.requests.recv(), if !self.closing => match request {
                    Some(request) => self.apply(request),
                    // Every handle is gone.
                    None => self.closing = true,
                },
                reply = connection.read_reply() => match reply? {
                    Some(reply) => self.pipeline.handle_reply(reply)?,
                    None => return Err("connection closed by the server".into()),
                },
            }
        }
    }

    /// Reconnects with exponential backoff. Requests keep being accepted while waiting; they are
    /// queued until a connection is back.
    async fn reconnect(&mut self) -> Option<Connection> {
        let mut delay = self.config.reconnection_delay;

        for attempt in 1..=self.config.max_reconnection_attempts {
            delay *= 2;
            debug!(attempt, delay_ms = delay.as_millis() as u64, "waiting to reconnect");
            self.emit(ConnectionEvent::Reconnecting { attempt, delay });

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);

            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    request = self.requests.recv() => match request {
                        Some(request) => self.apply(request),
                        None => self.closing = true,
                    },
                }

                if self.closing {
                    return None;
                }
            }

            match Connection::connect(&self.config).await {
                Ok(connection) => return Some(connection),
                Err(err) => warn!(attempt, error = %err, "reconnection attempt failed"),
            }
        }

        None
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receiver is not an error.
        let _ = self.events.send(event);
    }

    fn apply(&mut self, request: Request) {
        debug!(request = ?request, "handling request");

        match request {
            // Usage errors have already been handed to the callback.
            Request::Send { cmd, callback } => {
                let _ = self.pipeline.send(cmd, callback);
            }
            Request::Transaction { block, outcome } => {
                let _ = self.pipeline.transaction(block, outcome);
            }
            Request::Subscribe { name, handler } => {
                if let Err(err) = self.pipeline.subscribe_to(&name, handler) {
                    warn!(channel = %name, error = %err, "subscription failed");
                }
            }
            Request::Unsubscribe { name } => self.pipeline.unsubscribe_from(&name),
            Request::Close => self.closing = true,
        }
    }
}
