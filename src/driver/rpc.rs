//! Remote procedure calls over the message pipe
//!
//! Calls travel on `rpc` with subject `<method>.<id>.<caller>`. Replies travel
//! on `rpcReply` with subject `<caller>.<id>`, or `<caller>.<id>.err` with a
//! `{"reason": ...}` payload when the provider failed. Replies are matched to
//! calls by id only; their order is irrelevant.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::outbox::Outbox;
use super::DriverHandle;
use crate::error::RpcError;
use crate::protocol::{channel, Message, Payload, ERROR_SUFFIX};

pub type RpcFuture = Pin<Box<dyn Future<Output = Result<Payload, RpcError>> + Send>>;
pub type RpcHandler = Arc<dyn Fn(DriverHandle, RpcRequest) -> RpcFuture + Send + Sync>;

/// `<method>.<id>.<caller>`; the caller part may itself contain dots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSubject {
    pub method: String,
    pub correlation_id: String,
    pub caller: String,
}

impl CallSubject {
    pub fn parse(channel: &str, subject: &str) -> Result<Self, RpcError> {
        let mut parts = subject.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(id), Some(caller))
                if !method.is_empty() && !id.is_empty() && !caller.is_empty() =>
            {
                Ok(Self {
                    method: method.to_string(),
                    correlation_id: id.to_string(),
                    caller: caller.to_string(),
                })
            }
            _ => Err(RpcError::malformed(channel, subject)),
        }
    }

    pub fn reply(&self) -> ReplySubject {
        ReplySubject {
            caller: self.caller.clone(),
            correlation_id: self.correlation_id.clone(),
            is_error: false,
        }
    }

    pub fn error_reply(&self) -> ReplySubject {
        ReplySubject {
            is_error: true,
            ..self.reply()
        }
    }
}

impl fmt::Display for CallSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.method, self.correlation_id, self.caller)
    }
}

/// `<caller>.<id>` or `<caller>.<id>.err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplySubject {
    pub caller: String,
    pub correlation_id: String,
    pub is_error: bool,
}

impl ReplySubject {
    pub fn parse(channel: &str, subject: &str) -> Result<Self, RpcError> {
        let error_tail = format!(".{ERROR_SUFFIX}");
        let (rest, is_error) = match subject.strip_suffix(error_tail.as_str()) {
            Some(rest) => (rest, true),
            None => (subject, false),
        };
        match rest.rsplit_once('.') {
            Some((caller, id)) if !caller.is_empty() && !id.is_empty() => Ok(Self {
                caller: caller.to_string(),
                correlation_id: id.to_string(),
                is_error,
            }),
            _ => Err(RpcError::malformed(channel, subject)),
        }
    }
}

impl fmt::Display for ReplySubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.caller, self.correlation_id)?;
        if self.is_error {
            write!(f, ".{ERROR_SUFFIX}")?;
        }
        Ok(())
    }
}

/// An incoming call as seen by a local handler.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub method: String,
    pub correlation_id: String,
    pub caller: String,
    /// Undecoded payload; handlers decide whether it is structured.
    pub payload: Vec<u8>,
}

impl RpcRequest {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Sends the success or error reply for a call and hands the outcome back.
///
/// An error outcome is returned as `Err` after the error reply went out, so
/// the handling unit aborts.
pub(crate) async fn send_reply(
    outbox: &Outbox,
    reply_channel: &str,
    call: &CallSubject,
    outcome: Result<Payload, RpcError>,
) -> Result<(), RpcError> {
    match outcome {
        Ok(payload) => {
            let reply = Message::new(reply_channel, call.reply().to_string(), payload);
            outbox.send(&reply).await?;
            Ok(())
        }
        Err(err) => {
            let reason = match &err {
                RpcError::Handler(reason) => reason.clone(),
                other => other.to_string(),
            };
            let reply = Message::structured(
                reply_channel,
                call.error_reply().to_string(),
                json!({ "reason": reason }),
            );
            outbox.send(&reply).await?;
            Err(err)
        }
    }
}

/// Executes local methods on behalf of remote callers.
#[derive(Default)]
pub struct RpcProvider {
    handlers: HashMap<String, RpcHandler>,
}

impl RpcProvider {
    pub fn new(handlers: HashMap<String, RpcHandler>) -> Self {
        Self { handlers }
    }

    /// Registered method names, in no particular order.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Handles one `rpc` message.
    ///
    /// A malformed subject fails the call without a reply (there is nobody to
    /// answer). An unknown method is answered with an error reply and fails
    /// the call.
    pub async fn handle(&self, driver: &DriverHandle, message: Message) -> Result<(), RpcError> {
        let call = CallSubject::parse(channel::RPC, &message.subject)?;
        debug!(
            service = driver.service(),
            method = %call.method,
            id = %call.correlation_id,
            caller = %call.caller,
            "rpc call received"
        );

        let outcome = match self.handlers.get(&call.method) {
            Some(handler) => {
                let request = RpcRequest {
                    method: call.method.clone(),
                    correlation_id: call.correlation_id.clone(),
                    caller: call.caller.clone(),
                    payload: message.payload_bytes()?,
                };
                handler(driver.clone(), request).await
            }
            None => Err(RpcError::UnknownMethod(call.method.clone())),
        };

        send_reply(driver.outbox(), channel::RPC_REPLY, &call, outcome).await
    }
}

type Waiter = oneshot::Sender<Result<Payload, RpcError>>;

/// Correlation state for outgoing calls, independent of how calls are sent.
///
/// The driver side pairs this with its outbox, the daemon side with the
/// driver's stdin. Ids are unique per instance.
pub struct PendingCalls {
    identity: String,
    next_id: AtomicU64,
    waiters: Mutex<HashMap<String, Waiter>>,
}

impl PendingCalls {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            next_id: AtomicU64::new(1),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Name replies must carry to be routed here.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Calls still waiting for a reply.
    pub fn len(&self) -> usize {
        self.waiters().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a new call to `method`. The record lives as long as the
    /// returned [`PendingCall`]; dropping it unanswered forgets the id.
    pub fn register(&self, method: &str) -> PendingCall<'_> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let (tx, rx) = oneshot::channel();
        self.waiters().insert(id.clone(), tx);
        PendingCall {
            subject: CallSubject {
                method: method.to_string(),
                correlation_id: id,
                caller: self.identity.clone(),
            },
            calls: self,
            rx,
        }
    }

    /// Whether `message` is a reply addressed to this caller.
    pub fn accepts(&self, message: &Message) -> bool {
        message.channel == channel::RPC_REPLY
            && ReplySubject::parse(channel::RPC_REPLY, &message.subject)
                .is_ok_and(|reply| reply.caller == self.identity)
    }

    /// Hands one `rpcReply` message to its waiting call. Replies nobody
    /// waits for are logged and dropped.
    pub fn resolve(&self, message: Message) -> Result<(), RpcError> {
        let reply = ReplySubject::parse(channel::RPC_REPLY, &message.subject)?;
        if reply.caller != self.identity {
            warn!(
                caller = %self.identity,
                subject = %message.subject,
                "dropping rpc reply addressed to another caller"
            );
            return Ok(());
        }

        let Some(waiter) = self.waiters().remove(&reply.correlation_id) else {
            warn!(
                caller = %self.identity,
                id = %reply.correlation_id,
                "dropping rpc reply without a pending call"
            );
            return Ok(());
        };

        let outcome = if reply.is_error {
            let reason = message
                .structured_value()
                .ok()
                .and_then(|v| v.get("reason").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| "unknown error".to_string());
            Err(RpcError::Remote { reason })
        } else {
            Ok(message.payload)
        };

        if waiter.send(outcome).is_err() {
            debug!(id = %reply.correlation_id, "rpc caller gave up before the reply arrived");
        }
        Ok(())
    }

    fn forget(&self, id: &str) {
        self.waiters().remove(id);
    }

    // waiters are only touched in short critical sections, never across an await
    fn waiters(&self) -> MutexGuard<'_, HashMap<String, Waiter>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One outstanding call. Dropping it before the reply arrives removes its
/// record, so abandoned calls never pile up.
pub struct PendingCall<'a> {
    subject: CallSubject,
    calls: &'a PendingCalls,
    rx: oneshot::Receiver<Result<Payload, RpcError>>,
}

impl PendingCall<'_> {
    pub fn subject(&self) -> &CallSubject {
        &self.subject
    }

    /// The `rpc` message announcing this call.
    pub fn message(&self, payload: Payload) -> Message {
        Message::new(channel::RPC, self.subject.to_string(), payload)
    }

    /// Waits for the reply, without a time limit.
    pub async fn wait(mut self) -> Result<Payload, RpcError> {
        match (&mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Canceled(self.subject.correlation_id.clone())),
        }
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.calls.forget(&self.subject.correlation_id);
    }
}

/// Issues calls to the peer and routes replies back to the waiting caller.
pub struct RpcCaller {
    calls: PendingCalls,
    outbox: Arc<Outbox>,
}

impl RpcCaller {
    /// `identity` is the caller part of every call subject, normally the driver name.
    pub fn new(identity: impl Into<String>, outbox: Arc<Outbox>) -> Self {
        Self {
            calls: PendingCalls::new(identity),
            outbox,
        }
    }

    /// Caller part of the subjects this caller sends.
    pub fn identity(&self) -> &str {
        self.calls.identity()
    }

    /// Calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.calls.len()
    }

    /// Calls `method` on the peer and waits for its reply, without a time limit.
    ///
    /// Dropping the returned future, for example from an outer timeout,
    /// withdraws the call.
    pub async fn call(&self, method: &str, payload: Payload) -> Result<Payload, RpcError> {
        let pending = self.calls.register(method);
        self.outbox.send(&pending.message(payload)).await?;
        pending.wait().await
    }

    /// Like [`call`](Self::call), giving up after `timeout`.
    pub async fn call_timeout(
        &self,
        method: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, RpcError> {
        tokio::time::timeout(timeout, self.call(method, payload))
            .await
            .map_err(|_| RpcError::Timeout {
                method: method.to_string(),
                timeout,
            })?
    }

    /// Calls `method` with a structured argument and decodes a structured result.
    pub async fn call_json<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let reply = self.call(method, Payload::Structured(params)).await?;
        Ok(serde_json::from_value(reply.to_value()?)?)
    }

    /// Handles one `rpcReply` message.
    pub fn handle_return(&self, message: Message) -> Result<(), RpcError> {
        self.calls.resolve(message)
    }
}
