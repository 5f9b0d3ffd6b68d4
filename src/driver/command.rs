//! Named commands on the `eventbus` channel
//!
//! A command call is an `eventbus` message with subject `command.<id>.<caller>`
//! and a structured payload `{"command": <name>, "data": <args>}`. The result
//! goes back on `eventbus` as `<caller>.<id>`, or `<caller>.<id>.err` with a
//! `{"reason": ...}` payload.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::rpc::{send_reply, CallSubject};
use super::DriverHandle;
use crate::error::RpcError;
use crate::protocol::{channel, subject, Message, Payload};

pub type CommandFuture = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>>;
pub type CommandHandler = Arc<dyn Fn(DriverHandle, CommandCall) -> CommandFuture + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

/// A command invocation handed to a registered handler.
#[derive(Debug, Clone)]
pub struct CommandCall {
    pub caller: String,
    pub correlation_id: String,
    pub request: CommandRequest,
}

impl CommandCall {
    pub fn name(&self) -> &str {
        &self.request.command
    }

    pub fn data(&self) -> &Value {
        &self.request.data
    }
}

/// Builds the `eventbus` message that invokes `command` on a peer.
pub fn command_message(id: &str, caller: &str, command: &str, data: Value) -> Result<Message, serde_json::Error> {
    let call = CallSubject {
        method: subject::COMMAND.to_string(),
        correlation_id: id.to_string(),
        caller: caller.to_string(),
    };
    let request = CommandRequest {
        command: command.to_string(),
        data,
    };
    Message::encode(channel::EVENTBUS, call.to_string(), &request)
}

#[derive(Default)]
pub struct CommandRouter {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandRouter {
    pub fn new(handlers: HashMap<String, CommandHandler>) -> Self {
        Self { handlers }
    }

    /// Registered command names, in no particular order.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Handles one command call.
    ///
    /// An undecodable request or an unknown command is answered with an
    /// error reply, and the call fails.
    pub async fn handle(&self, driver: &DriverHandle, message: Message) -> Result<(), RpcError> {
        let call = CallSubject::parse(channel::EVENTBUS, &message.subject)?;
        if call.method != subject::COMMAND {
            return Err(RpcError::malformed(channel::EVENTBUS, &message.subject));
        }

        let outcome = match message.deserialize::<CommandRequest>() {
            Ok(request) => {
                debug!(
                    service = driver.service(),
                    command = %request.command,
                    caller = %call.caller,
                    id = %call.correlation_id,
                    "command received"
                );
                match self.handlers.get(&request.command) {
                    Some(handler) => {
                        let invocation = CommandCall {
                            caller: call.caller.clone(),
                            correlation_id: call.correlation_id.clone(),
                            request,
                        };
                        handler(driver.clone(), invocation).await.map(Payload::Structured)
                    }
                    None => Err(RpcError::UnknownMethod(request.command)),
                }
            }
            Err(err) => Err(RpcError::Payload(err)),
        };

        send_reply(driver.outbox(), channel::EVENTBUS, &call, outcome).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_message_shape() {
        let message = command_message("5", "daemon", "flush", json!({"force": true})).unwrap();
        assert_eq!(message.channel, "eventbus");
        assert_eq!(message.subject, "command.5.daemon");
        assert_eq!(
            message.structured_value().unwrap(),
            json!({"command": "flush", "data": {"force": true}})
        );
    }

    #[test]
    fn data_defaults_to_null() {
        let request: CommandRequest = serde_json::from_value(json!({"command": "flush"})).unwrap();
        assert_eq!(request.data, Value::Null);
    }
}
