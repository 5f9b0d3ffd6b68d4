use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::TransportError;
use crate::protocol::{write_frame, Message, MessageFrame};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared writer for one output stream.
///
/// Concurrent handlers all send through the same outbox; each frame is
/// written and flushed under the lock, so frames never interleave.
pub struct Outbox {
    service: String,
    writer: Mutex<BoxedWriter>,
}

impl Outbox {
    pub fn new<W>(service: impl Into<String>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            service: service.into(),
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub async fn send(&self, message: &Message) -> Result<(), TransportError> {
        debug!(
            service = %self.service,
            channel = %message.channel,
            subject = %message.subject,
            "sending message"
        );
        let frame = MessageFrame::encode(message)?;
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &frame).await
    }
}
