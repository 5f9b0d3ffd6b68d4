use std::time::Duration;

/// Environment variables read by drivers and the supervisor.
#[derive(Debug, Clone, Copy)]
pub enum EnvVar {
    /// Log level override, wins over `data.loglevel` from options
    Log,
    /// Descriptor used as the driver log sink (`off` disables it)
    LogFd,
    /// Interval between supervisor drains, in milliseconds
    PollMs,
    /// Grace period for a driver to exit after `stop`, in seconds
    StopTimeoutSecs,
}

impl EnvVar {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvVar::Log => "DRIVERLINK_LOG",
            EnvVar::LogFd => "DRIVERLINK_LOG_FD",
            EnvVar::PollMs => "DRIVERLINK_POLL_MS",
            EnvVar::StopTimeoutSecs => "DRIVERLINK_STOP_TIMEOUT_SECS",
        }
    }
}

/// The third descriptor after stdin, stdout and stderr.
pub const DEFAULT_LOG_FD: i32 = 3;
const DEFAULT_POLL_MS: u64 = 50;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;
const DISABLED_VALUES: [&str; 4] = ["off", "none", "no", "-"];

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.trim().parse().ok())
}

/// Log level override ($DRIVERLINK_LOG)
pub fn log_override() -> Option<String> {
    let val = env_opt(EnvVar::Log.as_str());
    tracing::trace!(value = ?val, "DRIVERLINK_LOG env var");
    val
}

/// Log sink descriptor ($DRIVERLINK_LOG_FD or 3); `None` when disabled
pub fn log_fd() -> Option<i32> {
    match env_opt(EnvVar::LogFd.as_str()) {
        Some(v) if DISABLED_VALUES.contains(&v.trim().to_ascii_lowercase().as_str()) => None,
        Some(v) => Some(v.trim().parse().unwrap_or(DEFAULT_LOG_FD)),
        None => Some(DEFAULT_LOG_FD),
    }
}

/// Supervisor drain interval ($DRIVERLINK_POLL_MS or 50ms)
pub fn poll_interval() -> Duration {
    let ms = env_parse(EnvVar::PollMs.as_str()).unwrap_or(DEFAULT_POLL_MS);
    tracing::trace!(ms, "Supervisor poll interval");
    Duration::from_millis(ms.max(1))
}

/// Driver stop grace period ($DRIVERLINK_STOP_TIMEOUT_SECS or 10s)
pub fn stop_timeout() -> Duration {
    let secs = env_parse(EnvVar::StopTimeoutSecs.as_str()).unwrap_or(DEFAULT_STOP_TIMEOUT_SECS);
    Duration::from_secs(secs)
}
