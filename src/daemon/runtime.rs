use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::launch::{DriverMeta, DriverSpec};
use crate::error::{SupervisorError, TransportError};
use crate::protocol::{channel, subject, DriverState, FillOutcome, FrameBuffer, Message, MessageFrame};

/// Grace period between SIGTERM and SIGKILL when a driver ignores `stop`
const TERM_GRACE: Duration = Duration::from_secs(1);
const EXIT_POLL: Duration = Duration::from_millis(10);

/// The supervisor half of the startup handshake: options, then start.
pub fn handshake_messages(data: &Value) -> [Message; 2] {
    [
        Message::structured(channel::COMMAND, subject::OPTIONS, data.clone()),
        Message::signal(channel::COMMAND, subject::START),
    ]
}

pub fn write_handshake<W: Write + ?Sized>(writer: &mut W, data: &Value) -> Result<(), TransportError> {
    for message in handshake_messages(data) {
        write_frame_sync(writer, &message)?;
    }
    Ok(())
}

fn write_frame_sync<W: Write + ?Sized>(writer: &mut W, message: &Message) -> Result<(), TransportError> {
    let frame = MessageFrame::encode(message)?;
    writer.write_all(&frame).map_err(TransportError::from_write)?;
    writer.flush().map_err(TransportError::from_write)
}

/// Reads what is available from `reader` and decodes every complete frame.
///
/// End of stream and read faults only end this drain. Malformed frames are
/// reported and skipped.
pub fn drain<R: Read + ?Sized>(buffer: &mut FrameBuffer, reader: &mut R, service: &str) -> Vec<Message> {
    match buffer.fill_from(reader) {
        Ok(FillOutcome::Drained) => {}
        Ok(FillOutcome::Closed) => debug!(service, "driver output at end of stream"),
        Ok(FillOutcome::Limited) => debug!(service, "driver output left for the next drain"),
        Err(err) => warn!(service, error = %err, "unable to read driver output"),
    }

    let mut messages = Vec::new();
    while let Some(next) = buffer.next_message() {
        match next {
            Ok(message) => messages.push(message),
            Err(err) => warn!(service, error = %err, "dropping malformed frame from driver"),
        }
    }
    messages
}

/// Result of stopping a driver: its exit status and whatever it wrote last.
#[derive(Debug)]
pub struct Stopped {
    pub status: ExitStatus,
    pub messages: Vec<Message>,
}

/// Snapshot of a runtime for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    pub service: String,
    pub driver: String,
    pub pid: Option<u32>,
    /// Last state the driver reported
    pub state: Option<DriverState>,
    pub uptime_secs: Option<u64>,
    pub exit_code: Option<i32>,
    pub running: bool,
}

/// One supervised driver process.
///
/// The driver's stdout is non-blocking, so [`fetch_messages`](Self::fetch_messages)
/// returns immediately with whatever is available.
pub struct DriverRuntime {
    service: String,
    meta: DriverMeta,
    spec: DriverSpec,
    data: Value,
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    buffer: FrameBuffer,
    last_state: Option<DriverState>,
    started_at: Option<Instant>,
    exit_status: Option<ExitStatus>,
}

impl DriverRuntime {
    /// A runtime that has not started yet. `data` goes out with the handshake.
    pub fn new(service: impl Into<String>, meta: DriverMeta, spec: DriverSpec, data: Value) -> Self {
        Self {
            service: service.into(),
            meta,
            spec,
            data,
            process: None,
            stdin: None,
            stdout: None,
            buffer: FrameBuffer::new(),
            last_state: None,
            started_at: None,
            exit_status: None,
        }
    }

    /// Creates a runtime and starts its process.
    pub fn launch(
        service: impl Into<String>,
        meta: DriverMeta,
        spec: DriverSpec,
        data: Value,
    ) -> Result<Self, SupervisorError> {
        let mut runtime = Self::new(service, meta, spec, data);
        runtime.start()?;
        Ok(runtime)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn meta(&self) -> &DriverMeta {
        &self.meta
    }

    pub fn spec(&self) -> &DriverSpec {
        &self.spec
    }

    /// Changes apply from the next [`start`](Self::start).
    pub fn spec_mut(&mut self) -> &mut DriverSpec {
        &mut self.spec
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// State from the driver's most recent `state` message, if any.
    pub fn last_state(&self) -> Option<DriverState> {
        self.last_state
    }

    /// Set once the process has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(Child::id)
    }

    /// Started and not yet seen to exit.
    pub fn is_running(&self) -> bool {
        self.process.is_some() && self.exit_status.is_none()
    }

    pub fn uptime_secs(&self) -> Option<u64> {
        self.started_at.map(|t| t.elapsed().as_secs())
    }

    pub fn info(&self) -> DriverInfo {
        DriverInfo {
            service: self.service.clone(),
            driver: self.meta.name.clone(),
            pid: self.pid(),
            state: self.last_state,
            uptime_secs: self.uptime_secs(),
            exit_code: self.exit_status.and_then(|s| s.code()),
            running: self.is_running(),
        }
    }

    /// Spawns the driver as `<executable> <service> [args...]` and sends the handshake.
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        if let Some(hook) = self.spec.pre_start.clone() {
            let service = self.service.clone();
            hook(&service, self);
        }

        let mut cmd = Command::new(&self.spec.executable);
        cmd.arg(&self.service).args(&self.spec.args);
        for (key, value) in &self.spec.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|source| {
            error!(service = %self.service, executable = %self.spec.executable, error = %source, "failed to start driver");
            SupervisorError::Spawn {
                service: self.service.clone(),
                executable: self.spec.executable.clone(),
                source,
            }
        })?;
        info!(
            service = %self.service,
            driver = %self.meta.name,
            pid = child.id(),
            "driver process started"
        );

        let Some(stdout) = child.stdout.take() else {
            abort(&mut child);
            return Err(SupervisorError::MissingStdout {
                service: self.service.clone(),
            });
        };
        if let Err(source) = set_nonblocking(&stdout) {
            abort(&mut child);
            return Err(SupervisorError::NonBlocking {
                service: self.service.clone(),
                source,
            });
        }
        let Some(mut stdin) = child.stdin.take() else {
            abort(&mut child);
            return Err(SupervisorError::MissingStdin {
                service: self.service.clone(),
            });
        };

        if let Err(source) = write_handshake(&mut stdin, &self.data) {
            abort(&mut child);
            return Err(SupervisorError::Transport {
                service: self.service.clone(),
                source,
            });
        }
        debug!(service = %self.service, "handshake sent");

        self.process = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        self.buffer = FrameBuffer::new();
        self.last_state = None;
        self.started_at = Some(Instant::now());
        self.exit_status = None;
        Ok(())
    }

    /// Writes one message to the driver's stdin.
    pub fn send_message(&mut self, message: &Message) -> Result<(), SupervisorError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(SupervisorError::NotRunning {
                service: self.service.clone(),
                driver: self.meta.name.clone(),
            });
        };
        write_frame_sync(stdin, message).map_err(|source| SupervisorError::Transport {
            service: self.service.clone(),
            source,
        })
    }

    /// Drains every message the driver has written so far, in order.
    pub fn fetch_messages(&mut self) -> Vec<Message> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Vec::new();
        };
        let messages = drain(&mut self.buffer, stdout, &self.service);
        for message in &messages {
            if message.channel == channel::STATE {
                match DriverState::parse(&message.subject) {
                    Some(state) => self.last_state = Some(state),
                    None => warn!(service = %self.service, state = %message.subject, "unknown driver state"),
                }
            }
        }
        messages
    }

    /// Checks, without blocking, whether the process has exited.
    pub fn try_exit(&mut self) -> Result<Option<ExitStatus>, SupervisorError> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        let Some(child) = self.process.as_mut() else {
            return Ok(None);
        };
        let status = child.try_wait().map_err(|source| SupervisorError::Io {
            service: self.service.clone(),
            source,
        })?;
        if let Some(status) = status {
            info!(service = %self.service, driver = %self.meta.name, %status, "driver exited");
            self.exit_status = Some(status);
        }
        Ok(status)
    }

    async fn wait_exit(&mut self, timeout: Duration) -> Result<Option<ExitStatus>, SupervisorError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_exit()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(EXIT_POLL).await;
        }
    }

    /// Asks the driver to stop and waits up to `timeout` for it to exit,
    /// then terminates it.
    pub async fn stop(&mut self, timeout: Duration) -> Result<Stopped, SupervisorError> {
        if self.process.is_none() {
            return Err(SupervisorError::NotRunning {
                service: self.service.clone(),
                driver: self.meta.name.clone(),
            });
        }

        if self.exit_status.is_none() {
            if let Err(err) = self.send_message(&Message::signal(channel::COMMAND, subject::STOP)) {
                warn!(service = %self.service, error = %err, "unable to deliver stop");
            }
        }

        let status = match self.wait_exit(timeout).await? {
            Some(status) => status,
            None => {
                warn!(service = %self.service, ?timeout, "driver did not stop in time, terminating");
                self.terminate().await?
            }
        };

        let messages = self.fetch_messages();
        self.stdin = None;
        self.stdout = None;
        self.process = None;
        self.started_at = None;
        Ok(Stopped { status, messages })
    }

    async fn terminate(&mut self) -> Result<ExitStatus, SupervisorError> {
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid() {
                // SAFETY: plain signal delivery to our own child.
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
                if let Some(status) = self.wait_exit(TERM_GRACE).await? {
                    return Ok(status);
                }
            }
        }

        let service = self.service.clone();
        let io_err = |source: io::Error| SupervisorError::Io {
            service: service.clone(),
            source,
        };
        let Some(child) = self.process.as_mut() else {
            return Err(SupervisorError::NotRunning {
                service: self.service.clone(),
                driver: self.meta.name.clone(),
            });
        };
        warn!(service = %self.service, "force killing driver");
        child.kill().map_err(io_err)?;
        let status = child.wait().map_err(io_err)?;
        self.exit_status = Some(status);
        Ok(status)
    }
}

impl Drop for DriverRuntime {
    fn drop(&mut self) {
        if self.exit_status.is_none() {
            if let Some(child) = self.process.as_mut() {
                abort(child);
            }
        }
    }
}

fn abort(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn set_nonblocking(stdout: &ChildStdout) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = stdout.as_raw_fd();
    // SAFETY: fcntl on a descriptor we own, no pointers involved.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_nonblocking(_stdout: &ChildStdout) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "non-blocking pipes need a unix platform",
    ))
}
