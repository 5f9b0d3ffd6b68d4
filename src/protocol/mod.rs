//! Message model shared by drivers and the daemon
//!
//! A [`Message`] is a `(channel, subject, payload)` triple. The payload is
//! either raw bytes or a structured JSON value; which one is decided by the
//! sender and never written on the wire. Structured payloads arrive as raw
//! bytes and are decoded only when a handler asks for it.
//!
//! ```text
//! daemon ──stdin──▶ driver      command:options, command:start, rpc, eventbus
//! daemon ◀─stdout── driver      state:<state>, rpcReply, eventbus
//! ```

mod frame;
mod frame_buffer;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::TransportError;

pub use frame::{read_message, write_frame, write_message, Envelope, MessageFrame, LENGTH_PREFIX, MAX_FRAME_LEN};
pub use frame_buffer::{FillOutcome, FrameBuffer, FILL_BUDGET};

/// Reserved channel names.
pub mod channel {
    pub const COMMAND: &str = "command";
    pub const STATE: &str = "state";
    pub const RPC: &str = "rpc";
    pub const RPC_REPLY: &str = "rpcReply";
    pub const EVENTBUS: &str = "eventbus";
}

/// Reserved subjects on the `command` and `eventbus` channels.
pub mod subject {
    pub const OPTIONS: &str = "options";
    pub const PING: &str = "ping";
    pub const START: &str = "start";
    pub const STOP: &str = "stop";
    pub const COMMAND: &str = "command";
}

/// Suffix marking an error reply subject.
pub const ERROR_SUFFIX: &str = "err";

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Raw(Vec<u8>),
    Structured(Value),
}

impl Payload {
    /// Wraps bytes received from the wire. Zero bytes means a signal-only message.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            Payload::Empty
        } else {
            Payload::Raw(bytes)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Payload::Raw(_))
    }

    /// Bytes as they go on the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        match self {
            Payload::Empty => Ok(Vec::new()),
            Payload::Raw(bytes) => Ok(bytes.clone()),
            Payload::Structured(value) => {
                serde_json::to_vec(value).map_err(|e| TransportError::Encode(e.to_string()))
            }
        }
    }

    /// Structured view of the payload; an empty payload reads as `null`.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Payload::Empty => Ok(Value::Null),
            Payload::Raw(bytes) => serde_json::from_slice(bytes),
            Payload::Structured(value) => Ok(value.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub channel: String,
    pub subject: String,
    pub payload: Payload,
}

impl Message {
    pub fn new(channel: impl Into<String>, subject: impl Into<String>, payload: Payload) -> Self {
        Self {
            channel: channel.into(),
            subject: subject.into(),
            payload,
        }
    }

    /// A message without payload (ping, start, stop, state).
    pub fn signal(channel: impl Into<String>, subject: impl Into<String>) -> Self {
        Self::new(channel, subject, Payload::Empty)
    }

    pub fn raw(channel: impl Into<String>, subject: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(channel, subject, Payload::from_bytes(bytes))
    }

    pub fn structured(channel: impl Into<String>, subject: impl Into<String>, value: Value) -> Self {
        Self::new(channel, subject, Payload::Structured(value))
    }

    /// Builds a structured message from any serializable value.
    pub fn encode<T: Serialize>(
        channel: impl Into<String>,
        subject: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::structured(channel, subject, serde_json::to_value(value)?))
    }

    pub fn route_key(&self) -> RouteKey {
        RouteKey::new(&self.channel, &self.subject)
    }

    pub fn is_raw(&self) -> bool {
        self.payload.is_raw()
    }

    pub fn payload_bytes(&self) -> Result<Vec<u8>, TransportError> {
        self.payload.to_bytes()
    }

    /// Decodes a raw payload into its structured form.
    pub fn decode_payload(self) -> Result<Self, serde_json::Error> {
        let payload = match self.payload {
            Payload::Raw(bytes) => Payload::Structured(serde_json::from_slice(&bytes)?),
            other => other,
        };
        Ok(Self { payload, ..self })
    }

    pub fn structured_value(&self) -> Result<Value, serde_json::Error> {
        self.payload.to_value()
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.structured_value()?)
    }
}

/// Routing key of a message: the `(channel, subject)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub channel: String,
    pub subject: String,
}

impl RouteKey {
    pub fn new(channel: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            subject: subject.into(),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.subject)
    }
}

/// Lifecycle state reported by a driver in its `state` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Loaded,
    Alive,
    Cold,
    Exit,
}

impl DriverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverState::Loaded => "loaded",
            DriverState::Alive => "alive",
            DriverState::Cold => "cold",
            DriverState::Exit => "exit",
        }
    }

    pub fn parse(state: &str) -> Option<Self> {
        match state {
            "loaded" => Some(DriverState::Loaded),
            "alive" => Some(DriverState::Alive),
            "cold" => Some(DriverState::Cold),
            "exit" => Some(DriverState::Exit),
            _ => None,
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
