//! Daemon side: launching drivers and relaying their messages
//!
//! Each driver runs as a child process. Its stdin carries daemon → driver
//! messages, its stdout (set non-blocking) carries driver → daemon messages,
//! and its stderr is passed straight through.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │                 daemon                   │
//! ├──────────────────────────────────────────┤
//! │  Supervisor        │   HealthMonitor     │
//! │  (runtimes, relay) │   (exit watch)      │
//! ├──────────────────────────────────────────┤
//! │  receiver │ engine │ transmitter │ ...   │
//! └──────────────────────────────────────────┘
//! ```

pub mod health;
pub mod launch;
pub mod runtime;
pub mod services;

pub use health::{HealthMonitor, HealthStatus};
pub use launch::{DriverMeta, DriverSpec, PreStartHook};
pub use runtime::{drain, handshake_messages, write_handshake, DriverInfo, DriverRuntime, Stopped};
pub use services::{Relayed, Supervisor, DAEMON_CALLER};
