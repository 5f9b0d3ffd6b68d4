use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tracing::{debug, error, info, warn};

use super::DriverHandle;
use crate::error::{DriverError, TransportError};
use crate::protocol::{channel, read_message, subject, Message, RouteKey};

/// Pause before reading again after a failed read.
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send>>;
pub type MessageHandler = Arc<dyn Fn(DriverHandle, Message) -> HandlerFuture + Send + Sync>;

/// Boxes an async closure into a [`MessageHandler`].
pub fn message_handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(DriverHandle, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), DriverError>> + Send + 'static,
{
    Arc::new(move |driver, message| Box::pin(f(driver, message)))
}

/// Where an incoming message goes.
pub enum Route {
    RpcCall,
    RpcReturn,
    Command,
    Handler(MessageHandler),
    Unrouted,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Route::RpcCall => "RpcCall",
            Route::RpcReturn => "RpcReturn",
            Route::Command => "Command",
            Route::Handler(_) => "Handler",
            Route::Unrouted => "Unrouted",
        };
        f.write_str(name)
    }
}

/// `(channel, subject)` → handler, plus the fixed routes for rpc and commands.
#[derive(Default, Clone)]
pub struct RoutingTable {
    handlers: HashMap<RouteKey, MessageHandler>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one for the same key.
    pub fn insert(&mut self, key: RouteKey, handler: MessageHandler) {
        self.handlers.insert(key, handler);
    }

    /// Whether a handler is registered for exactly `key`.
    pub fn contains(&self, key: &RouteKey) -> bool {
        self.handlers.contains_key(key)
    }

    /// Registered handlers, not counting the fixed routes.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// `rpc`, `rpcReply` and eventbus command subjects always take their
    /// fixed route; anything else is looked up by its exact key.
    pub fn route(&self, message: &Message) -> Route {
        match message.channel.as_str() {
            channel::RPC => return Route::RpcCall,
            channel::RPC_REPLY => return Route::RpcReturn,
            channel::EVENTBUS if is_command_subject(&message.subject) => return Route::Command,
            _ => {}
        }
        match self.handlers.get(&message.route_key()) {
            Some(handler) => Route::Handler(Arc::clone(handler)),
            None => Route::Unrouted,
        }
    }
}

fn is_command_subject(s: &str) -> bool {
    s == subject::COMMAND
        || s.strip_prefix(subject::COMMAND)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Something that can handle one message at a time, cloned into each unit.
pub trait Dispatch: Clone + Send + Sync + 'static {
    fn service(&self) -> &str;

    fn dispatch(&self, message: Message) -> impl Future<Output = Result<(), DriverError>> + Send;
}

/// Reads messages and runs each one in its own task.
///
/// A failing or panicking unit is logged and never takes the loop down.
/// Undecodable frames are skipped and read errors are retried after a short
/// pause. The loop ends only when the input stream does.
pub struct DispatchLoop<D> {
    target: D,
}

impl<D: Dispatch> DispatchLoop<D> {
    pub fn new(target: D) -> Self {
        Self { target }
    }

    pub async fn run<R>(&self, input: &mut R) -> TransportError
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            match read_message(input).await {
                Ok(message) => self.spawn_unit(message),
                Err(TransportError::Malformed(reason)) => {
                    warn!(service = self.target.service(), %reason, "skipping malformed frame");
                }
                Err(err) if err.is_stream_closed() => return err,
                Err(err) => {
                    warn!(service = self.target.service(), error = %err, "reading input failed, retrying");
                    tokio::time::sleep(READ_RETRY_DELAY).await;
                }
            }
        }
    }

    fn spawn_unit(&self, message: Message) {
        let service = self.target.service().to_string();
        let channel = message.channel.clone();
        let subject = message.subject.clone();
        debug!(%service, %channel, %subject, "dispatching message");

        let target = self.target.clone();
        let unit = tokio::spawn(async move { target.dispatch(message).await });

        tokio::spawn(async move {
            match unit.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(%service, %channel, %subject, error = %err, "message handler failed");
                }
                Err(join) if join.is_panic() => {
                    error!(%service, %channel, %subject, "message handler panicked");
                }
                Err(_) => {
                    info!(%service, %channel, %subject, "message handler cancelled");
                }
            }
        });
    }
}
