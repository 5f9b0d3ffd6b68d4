//! Driver side of the message bus
//!
//! A [`Driver`] reads messages from the daemon, runs each one in its own task
//! and writes replies through a shared [`Outbox`]. The control messages on the
//! `command` channel drive a small state machine:
//!
//! ```text
//! loaded ──start──▶ alive ──start (no reload hook)──▶ cold ──start──▶ alive
//!    └────────────────────┴──────────── stop ──────────────┴──▶ exit
//! ```
//!
//! `start` and `stop` are serialized against each other, and `start` waits
//! (bounded) for `options` to have arrived first.

mod command;
mod dispatch;
mod outbox;
mod ready;
mod rpc;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{DriverError, RpcError, TransportError};
use crate::logging::{LogControl, DEFAULT_LEVEL};
use crate::protocol::{channel, subject, DriverState, Message, Payload, RouteKey};

pub use command::{command_message, CommandCall, CommandHandler, CommandRequest, CommandRouter};
pub use dispatch::{message_handler, Dispatch, DispatchLoop, HandlerFuture, MessageHandler, Route, RoutingTable};
pub use outbox::Outbox;
pub use ready::{Readiness, ReadySignal};
pub use rpc::{CallSubject, PendingCall, PendingCalls, ReplySubject, RpcCaller, RpcHandler, RpcProvider, RpcRequest};

/// How long `start` waits for `options` before going ahead without them.
pub const START_OPTIONS_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Hooks {
    start: Option<MessageHandler>,
    stop: Option<MessageHandler>,
    reload: Option<MessageHandler>,
}

struct DriverCore {
    name: String,
    service: String,
    state: RwLock<DriverState>,
    options: RwLock<Value>,
    /// Serializes start and stop
    lifecycle: Mutex<()>,
    ready: ReadySignal,
    outbox: Arc<Outbox>,
    table: RoutingTable,
    hooks: Hooks,
    provider: RpcProvider,
    caller: RpcCaller,
    commands: CommandRouter,
    log_control: Option<LogControl>,
    stopped: Notify,
}

/// Cheap, cloneable reference to a running driver, passed to every handler.
#[derive(Clone)]
pub struct DriverHandle(Arc<DriverCore>);

impl DriverHandle {
    /// Driver name; also the caller part of the rpc calls it makes.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Service the daemon assigned to this driver.
    pub fn service(&self) -> &str {
        &self.0.service
    }

    pub async fn state(&self) -> DriverState {
        *self.0.state.read().await
    }

    async fn set_state(&self, state: DriverState) {
        let mut current = self.0.state.write().await;
        if *current != state {
            info!(service = %self.0.service, from = %*current, to = %state, "driver state changed");
            *current = state;
        }
    }

    pub(crate) fn outbox(&self) -> &Outbox {
        &self.0.outbox
    }

    /// Writes one message to the daemon. Concurrent sends never interleave.
    pub async fn send(&self, message: &Message) -> Result<(), TransportError> {
        self.0.outbox.send(message).await
    }

    /// Sends `bytes` unchanged as the payload.
    pub async fn send_raw(
        &self,
        channel: &str,
        subject: &str,
        bytes: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.send(&Message::raw(channel, subject, bytes)).await
    }

    /// Sends `value` as a JSON payload.
    pub async fn send_structured(
        &self,
        channel: &str,
        subject: &str,
        value: Value,
    ) -> Result<(), TransportError> {
        self.send(&Message::structured(channel, subject, value)).await
    }

    /// Reports the current state to the daemon.
    pub async fn ping(&self) -> Result<(), TransportError> {
        let state = self.state().await;
        self.send(&Message::signal(channel::STATE, state.as_str())).await
    }

    /// Options received with the last `options` message.
    pub async fn options(&self) -> Value {
        self.0.options.read().await.clone()
    }

    /// Looks up a dotted path such as `data.loglevel` in the options.
    pub async fn option(&self, path: &str) -> Option<Value> {
        let options = self.0.options.read().await;
        lookup(&options, path).cloned()
    }

    pub async fn option_str(&self, path: &str) -> Option<String> {
        self.option(path)
            .await
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// The caller behind [`call`](Self::call), for timeouts and structured calls.
    pub fn caller(&self) -> &RpcCaller {
        &self.0.caller
    }

    /// Calls a method on the daemon and waits for the reply.
    pub async fn call(&self, method: &str, payload: Payload) -> Result<Payload, RpcError> {
        self.0.caller.call(method, payload).await
    }

    async fn handle_options(&self, message: Message) -> Result<(), DriverError> {
        let options = message.structured_value()?;
        *self.0.options.write().await = options;

        if let Some(control) = &self.0.log_control {
            let level = self
                .option_str("data.loglevel")
                .await
                .unwrap_or_else(|| DEFAULT_LEVEL.to_string());
            if let Err(err) = control.set_level(&level) {
                warn!(service = %self.0.service, error = %err, "unable to apply log level");
            }
        }

        debug!(service = %self.0.service, "options received");
        self.0.ready.signal();
        Ok(())
    }

    async fn handle_start(&self, message: Message) -> Result<(), DriverError> {
        let _lifecycle = self.0.lifecycle.lock().await;

        if self.0.ready.wait(START_OPTIONS_TIMEOUT).await == Readiness::TimedOut {
            warn!(
                service = %self.0.service,
                "options not received within {:?}, starting with current options",
                START_OPTIONS_TIMEOUT
            );
        }

        let outcome = if self.state().await == DriverState::Alive {
            match self.0.hooks.reload.clone() {
                Some(reload) => {
                    info!(service = %self.0.service, "reloading driver");
                    reload(self.clone(), message).await
                }
                None => {
                    self.set_state(DriverState::Cold).await;
                    Ok(())
                }
            }
        } else {
            let started = match self.0.hooks.start.clone() {
                Some(start) => start(self.clone(), message).await,
                None => Ok(()),
            };
            if started.is_ok() {
                self.set_state(DriverState::Alive).await;
            }
            started
        };

        self.ping().await?;
        outcome
    }

    async fn handle_stop(&self, message: Message) -> Result<(), DriverError> {
        let _lifecycle = self.0.lifecycle.lock().await;
        self.set_state(DriverState::Exit).await;

        let hook = match self.0.hooks.stop.clone() {
            Some(stop) => stop(self.clone(), message).await,
            None => Ok(()),
        };
        let ping = self.ping().await;

        info!(service = %self.0.service, "quitting on daemon request");
        self.0.stopped.notify_one();

        hook?;
        ping.map_err(DriverError::from)
    }
}

impl Dispatch for DriverHandle {
    fn service(&self) -> &str {
        &self.0.service
    }

    async fn dispatch(&self, message: Message) -> Result<(), DriverError> {
        match self.0.table.route(&message) {
            Route::RpcCall => self.0.provider.handle(self, message).await?,
            Route::RpcReturn => self.0.caller.handle_return(message)?,
            Route::Command => self.0.commands.handle(self, message).await?,
            Route::Handler(handler) => handler(self.clone(), message).await?,
            Route::Unrouted => {
                info!(
                    service = %self.0.service,
                    route = %message.route_key(),
                    "no handler for message, skipping"
                );
            }
        }
        Ok(())
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |node, key| match node {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// A driver bound to its input stream, ready to [`run`](Driver::run).
pub struct Driver {
    handle: DriverHandle,
    input: BoxedReader,
}

impl Driver {
    pub fn builder(service: impl Into<String>, name: impl Into<String>) -> DriverBuilder {
        DriverBuilder::new(service, name)
    }

    pub fn handle(&self) -> DriverHandle {
        self.handle.clone()
    }

    /// Services messages until the daemon sends `stop` or closes the stream.
    ///
    /// Returns `Ok` after a `stop`, and the transport error when the input
    /// ended without one.
    pub async fn run(self) -> Result<(), DriverError> {
        let Driver { handle, mut input } = self;
        let mut methods: Vec<&str> = handle.0.provider.methods().collect();
        methods.sort_unstable();
        let mut commands: Vec<&str> = handle.0.commands.commands().collect();
        commands.sort_unstable();
        info!(
            service = %handle.service(),
            driver = %handle.name(),
            ?methods,
            ?commands,
            "driver loaded"
        );

        let dispatch = DispatchLoop::new(handle.clone());
        tokio::select! {
            biased;
            _ = handle.0.stopped.notified() => {
                debug!(service = %handle.service(), "dispatch stopped");
                Ok(())
            }
            end = dispatch.run(&mut input) => {
                if handle.state().await == DriverState::Exit {
                    return Ok(());
                }
                error!(service = %handle.service(), error = %end, "daemon closed channel");
                Err(end.into())
            }
        }
    }
}

pub struct DriverBuilder {
    service: String,
    name: String,
    table: RoutingTable,
    hooks: Hooks,
    rpc: HashMap<String, RpcHandler>,
    commands: HashMap<String, CommandHandler>,
    log_control: Option<LogControl>,
}

impl DriverBuilder {
    pub fn new(service: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
            table: RoutingTable::new(),
            hooks: Hooks::default(),
            rpc: HashMap::new(),
            commands: HashMap::new(),
            log_control: None,
        }
    }

    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(DriverHandle, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DriverError>> + Send + 'static,
    {
        self.hooks.start = Some(message_handler(f));
        self
    }

    pub fn on_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(DriverHandle, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DriverError>> + Send + 'static,
    {
        self.hooks.stop = Some(message_handler(f));
        self
    }

    /// Called on `start` while already alive. Without it the driver goes cold.
    pub fn on_reload<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(DriverHandle, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DriverError>> + Send + 'static,
    {
        self.hooks.reload = Some(message_handler(f));
        self
    }

    /// Registers a handler for `channel:subject`.
    pub fn handle<F, Fut>(mut self, channel: &str, subject: &str, f: F) -> Self
    where
        F: Fn(DriverHandle, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DriverError>> + Send + 'static,
    {
        self.table.insert(RouteKey::new(channel, subject), message_handler(f));
        self
    }

    pub fn rpc<F, Fut>(mut self, method: &str, f: F) -> Self
    where
        F: Fn(DriverHandle, RpcRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, RpcError>> + Send + 'static,
    {
        let handler: RpcHandler = Arc::new(move |driver, request| Box::pin(f(driver, request)));
        self.rpc.insert(method.to_string(), handler);
        self
    }

    pub fn command<F, Fut>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(DriverHandle, CommandCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        let handler: CommandHandler = Arc::new(move |driver, call| Box::pin(f(driver, call)));
        self.commands.insert(name.to_string(), handler);
        self
    }

    pub fn log_control(mut self, control: LogControl) -> Self {
        self.log_control = Some(control);
        self
    }

    pub fn build<R, W>(mut self, input: R, output: W) -> Driver
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        // control handlers always win over user registrations
        self.table.insert(
            RouteKey::new(channel::COMMAND, subject::OPTIONS),
            message_handler(|driver: DriverHandle, message| async move { driver.handle_options(message).await }),
        );
        self.table.insert(
            RouteKey::new(channel::COMMAND, subject::PING),
            message_handler(|driver: DriverHandle, _| async move { driver.ping().await.map_err(DriverError::from) }),
        );
        self.table.insert(
            RouteKey::new(channel::COMMAND, subject::START),
            message_handler(|driver: DriverHandle, message| async move { driver.handle_start(message).await }),
        );
        self.table.insert(
            RouteKey::new(channel::COMMAND, subject::STOP),
            message_handler(|driver: DriverHandle, message| async move { driver.handle_stop(message).await }),
        );

        let outbox = Arc::new(Outbox::new(self.service.clone(), output));
        let caller = RpcCaller::new(self.name.clone(), Arc::clone(&outbox));
        let core = DriverCore {
            name: self.name,
            service: self.service,
            state: RwLock::new(DriverState::Loaded),
            options: RwLock::new(Value::Null),
            lifecycle: Mutex::new(()),
            ready: ReadySignal::new(),
            outbox,
            table: self.table,
            hooks: self.hooks,
            provider: RpcProvider::new(self.rpc),
            caller,
            commands: CommandRouter::new(self.commands),
            log_control: self.log_control,
            stopped: Notify::new(),
        };

        Driver {
            handle: DriverHandle(Arc::new(core)),
            input: Box::new(input),
        }
    }

    /// Binds the driver to the process stdin and stdout.
    pub fn build_stdio(self) -> Driver {
        self.build(tokio::io::stdin(), tokio::io::stdout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_message, write_message};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    struct Peer {
        to_driver: DuplexStream,
        from_driver: DuplexStream,
        handle: DriverHandle,
        run: JoinHandle<Result<(), DriverError>>,
    }

    impl Peer {
        async fn send(&mut self, message: Message) {
            write_message(&mut self.to_driver, &message).await.unwrap();
        }

        async fn recv(&mut self) -> Message {
            tokio::time::timeout(Duration::from_secs(5), read_message(&mut self.from_driver))
                .await
                .expect("driver did not answer")
                .unwrap()
        }

        async fn state_after(&mut self, message: Message) -> String {
            self.send(message).await;
            let reply = self.recv().await;
            assert_eq!(reply.channel, "state");
            reply.subject
        }
    }

    fn spawn(builder: DriverBuilder) -> Peer {
        let (to_driver, driver_in) = tokio::io::duplex(64 * 1024);
        let (driver_out, from_driver) = tokio::io::duplex(64 * 1024);
        let driver = builder.build(driver_in, driver_out);
        let handle = driver.handle();
        Peer {
            to_driver,
            from_driver,
            handle,
            run: tokio::spawn(driver.run()),
        }
    }

    fn options() -> Message {
        Message::structured("command", "options", json!({"data": {"loglevel": "DEBUG", "port": 8080}}))
    }

    #[tokio::test]
    async fn start_then_start_again_without_reload_goes_cold() {
        let mut peer = spawn(Driver::builder("engine", "engine-1"));
        assert_eq!(peer.handle.state().await, DriverState::Loaded);

        peer.send(options()).await;
        assert_eq!(peer.state_after(Message::signal("command", "start")).await, "alive");
        assert_eq!(peer.handle.option_str("data.loglevel").await.as_deref(), Some("DEBUG"));
        assert_eq!(peer.handle.option("data.port").await, Some(json!(8080)));

        peer.send(options()).await;
        assert_eq!(peer.state_after(Message::signal("command", "start")).await, "cold");

        peer.send(options()).await;
        assert_eq!(peer.state_after(Message::signal("command", "start")).await, "alive");
    }

    #[tokio::test]
    async fn reload_hook_keeps_driver_alive() {
        let reloads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reloads);
        let mut peer = spawn(Driver::builder("engine", "engine-1").on_reload(move |_, _| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        peer.send(options()).await;
        assert_eq!(peer.state_after(Message::signal("command", "start")).await, "alive");
        peer.send(options()).await;
        assert_eq!(peer.state_after(Message::signal("command", "start")).await, "alive");
        assert_eq!(reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_without_options_waits_for_the_bound() {
        let started = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&started);
        let mut peer = spawn(Driver::builder("receiver", "rx").on_start(move |_, _| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        let begin = Instant::now();
        assert_eq!(peer.state_after(Message::signal("command", "start")).await, "alive");
        let waited = begin.elapsed();
        assert!(waited >= Duration::from_millis(900), "waited {waited:?}");
        assert!(waited < Duration::from_secs(4), "waited {waited:?}");
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(peer.handle.options().await, Value::Null);
    }

    #[tokio::test]
    async fn ping_reports_state() {
        let mut peer = spawn(Driver::builder("engine", "engine-1"));
        assert_eq!(peer.state_after(Message::signal("command", "ping")).await, "loaded");
    }

    #[tokio::test]
    async fn stop_reports_exit_and_ends_run() {
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stops);
        let mut peer = spawn(Driver::builder("engine", "engine-1").on_stop(move |_, _| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        assert_eq!(peer.state_after(Message::signal("command", "stop")).await, "exit");
        let outcome = tokio::time::timeout(Duration::from_secs(5), &mut peer.run)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_ok());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_from_alive_runs_hook_and_ends_run() {
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stops);
        let mut peer = spawn(Driver::builder("engine", "engine-1").on_stop(move |driver: DriverHandle, _| {
            let counter = Arc::clone(&counter);
            async move {
                // the hook already sees the final state
                assert_eq!(driver.state().await, DriverState::Exit);
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        peer.send(options()).await;
        assert_eq!(peer.state_after(Message::signal("command", "start")).await, "alive");
        assert_eq!(peer.state_after(Message::signal("command", "stop")).await, "exit");
        let outcome = tokio::time::timeout(Duration::from_secs(5), &mut peer.run)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_ok());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_from_cold_ends_run() {
        let mut peer = spawn(Driver::builder("engine", "engine-1"));
        peer.send(options()).await;
        assert_eq!(peer.state_after(Message::signal("command", "start")).await, "alive");
        peer.send(options()).await;
        assert_eq!(peer.state_after(Message::signal("command", "start")).await, "cold");

        assert_eq!(peer.state_after(Message::signal("command", "stop")).await, "exit");
        let outcome = tokio::time::timeout(Duration::from_secs(5), &mut peer.run)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_ok());
        assert_eq!(peer.handle.state().await, DriverState::Exit);
    }

    #[tokio::test]
    async fn closed_input_ends_run_with_error() {
        let peer = spawn(Driver::builder("engine", "engine-1"));
        drop(peer.to_driver);
        let outcome = tokio::time::timeout(Duration::from_secs(5), peer.run)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.unwrap_err().is_stream_closed());
    }

    #[tokio::test]
    async fn panicking_handler_leaves_driver_running() {
        let mut peer = spawn(
            Driver::builder("engine", "engine-1")
                .handle("eventbus", "poke", |_, _| async { panic!("poked too hard") }),
        );
        peer.send(Message::signal("eventbus", "poke")).await;
        peer.send(Message::signal("eventbus", "unheard-of")).await;
        assert_eq!(peer.state_after(Message::signal("command", "ping")).await, "loaded");
    }

    #[tokio::test]
    async fn user_handler_cannot_replace_control_handler() {
        let mut peer = spawn(
            Driver::builder("engine", "engine-1")
                .handle("command", "ping", |_, _| async { Err(DriverError::Handler("shadowed".into())) }),
        );
        assert_eq!(peer.state_after(Message::signal("command", "ping")).await, "loaded");
    }

    #[tokio::test]
    async fn rpc_provider_replies_and_reports_errors() {
        let mut peer = spawn(
            Driver::builder("engine", "engine-1")
                .rpc("echo", |_, request| async move { Ok(Payload::from_bytes(request.payload)) })
                .rpc("fail", |_, _| async { Err(RpcError::Handler("not today".into())) }),
        );

        peer.send(Message::raw("rpc", "echo.1.daemon", b"hello".to_vec())).await;
        let reply = peer.recv().await;
        assert_eq!(reply.channel, "rpcReply");
        assert_eq!(reply.subject, "daemon.1");
        assert_eq!(reply.payload_bytes().unwrap(), b"hello");

        peer.send(Message::signal("rpc", "fail.2.daemon")).await;
        let reply = peer.recv().await;
        assert_eq!(reply.subject, "daemon.2.err");
        assert_eq!(reply.structured_value().unwrap(), json!({"reason": "not today"}));

        peer.send(Message::signal("rpc", "missing.3.daemon")).await;
        let reply = peer.recv().await;
        assert_eq!(reply.subject, "daemon.3.err");
    }

    #[tokio::test]
    async fn driver_calls_daemon_and_gets_reply() {
        let mut peer = spawn(Driver::builder("engine", "engine-1"));
        let handle = peer.handle.clone();
        let call = tokio::spawn(async move { handle.call("lookup", Payload::Raw(b"key".to_vec())).await });

        let request = peer.recv().await;
        assert_eq!(request.channel, "rpc");
        let subject = CallSubject::parse("rpc", &request.subject).unwrap();
        assert_eq!(subject.method, "lookup");
        assert_eq!(subject.caller, "engine-1");

        peer.send(Message::raw("rpcReply", subject.reply().to_string(), b"value".to_vec()))
            .await;
        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply, Payload::Raw(b"value".to_vec()));
    }

    #[tokio::test]
    async fn command_router_replies_on_eventbus() {
        let mut peer = spawn(Driver::builder("engine", "engine-1").command("sum", |_, call| async move {
            let numbers: Vec<i64> = serde_json::from_value(call.data().clone())?;
            Ok(json!(numbers.iter().sum::<i64>()))
        }));

        peer.send(command_message("9", "daemon", "sum", json!([1, 2, 3])).unwrap())
            .await;
        let reply = peer.recv().await;
        assert_eq!(reply.channel, "eventbus");
        assert_eq!(reply.subject, "daemon.9");
        assert_eq!(reply.structured_value().unwrap(), json!(6));

        peer.send(command_message("10", "daemon", "divide", Value::Null).unwrap())
            .await;
        let reply = peer.recv().await;
        assert_eq!(reply.subject, "daemon.10.err");
    }

    #[test]
    fn dotted_lookup() {
        let value = json!({"a": {"b": [10, {"c": "x"}]}});
        assert_eq!(lookup(&value, "a.b.1.c"), Some(&json!("x")));
        assert_eq!(lookup(&value, "a.b.0"), Some(&json!(10)));
        assert_eq!(lookup(&value, "a.z"), None);
    }
}
