use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failures while moving frames over a pipe.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The peer closed its end of the pipe.
    #[error("peer closed the stream")]
    StreamClosed,

    /// The bytes on the wire do not form a valid frame.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The message could not be turned into a frame.
    #[error("failed to encode frame: {0}")]
    Encode(String),

    #[error("transport io: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether the peer hung up. This is the only transport fault that ends a dispatch loop.
    pub fn is_stream_closed(&self) -> bool {
        matches!(self, Self::StreamClosed)
    }

    pub(crate) fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::StreamClosed,
            _ => Self::Io(err),
        }
    }

    pub(crate) fn from_write(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => Self::StreamClosed,
            _ => Self::Io(err),
        }
    }
}

/// Failures of a single remote call, on either side of it.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The provider answered with an error reply.
    #[error("remote call failed: {reason}")]
    Remote { reason: String },

    /// A local handler refused the call; the reason is sent back to the caller.
    #[error("{0}")]
    Handler(String),

    #[error("malformed subject for {channel} message: {subject}")]
    MalformedSubject { channel: String, subject: String },

    #[error("no handler registered for method {0}")]
    UnknownMethod(String),

    /// The pending call was dropped before its reply arrived.
    #[error("call {0} was abandoned before a reply arrived")]
    Canceled(String),

    #[error("call {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RpcError {
    pub(crate) fn malformed(channel: &str, subject: &str) -> Self {
        Self::MalformedSubject {
            channel: channel.to_string(),
            subject: subject.to_string(),
        }
    }
}

/// Failures raised while a driver handles a message.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("invalid structured payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("handler failed: {0}")]
    Handler(String),
}

impl DriverError {
    pub fn is_stream_closed(&self) -> bool {
        matches!(self, Self::Transport(err) if err.is_stream_closed())
    }
}

/// Failures of the daemon-side process supervisor.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("[{service}] failed to start driver {executable}: {source}")]
    Spawn {
        service: String,
        executable: String,
        #[source]
        source: io::Error,
    },

    #[error("[{service}] unable to link to driver stdout")]
    MissingStdout { service: String },

    #[error("[{service}] unable to link to driver stdin")]
    MissingStdin { service: String },

    #[error("[{service}] unable to make driver stdout non-blocking: {source}")]
    NonBlocking {
        service: String,
        #[source]
        source: io::Error,
    },

    #[error("[{service}] driver {driver} is not running")]
    NotRunning { service: String, driver: String },

    #[error("[{service}] transport fault: {source}")]
    Transport {
        service: String,
        #[source]
        source: TransportError,
    },

    #[error("[{service}] process io: {source}")]
    Io {
        service: String,
        #[source]
        source: io::Error,
    },

    #[error("[{service}] rpc call failed: {source}")]
    Rpc {
        service: String,
        #[source]
        source: RpcError,
    },

    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    #[error("driver '{0}' is already running")]
    AlreadyRunning(String),
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("failed to install log subscriber: {0}")]
    Install(String),

    #[error("failed to change log level: {0}")]
    Reload(String),
}
