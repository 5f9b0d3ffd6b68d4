//! Wire framing
//!
//! Format: `[4-byte length (little-endian)][rkyv Envelope]`

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Message, Payload};
use crate::error::TransportError;

pub const LENGTH_PREFIX: usize = 4;

/// Frames above this size are rejected as malformed.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// What travels inside a frame. Whether the payload is raw or structured is
/// known only to the sender and the handler.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub struct Envelope {
    pub channel: String,
    pub subject: String,
    pub payload: Vec<u8>,
}

pub struct MessageFrame;

impl MessageFrame {
    /// Encode a message to bytes with length prefix
    pub fn encode(message: &Message) -> Result<Vec<u8>, TransportError> {
        let envelope = Envelope {
            channel: message.channel.clone(),
            subject: message.subject.clone(),
            payload: message.payload.to_bytes()?,
        };
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&envelope)
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        if bytes.len() > MAX_FRAME_LEN {
            return Err(TransportError::Encode(format!(
                "frame of {} bytes exceeds limit of {} bytes",
                bytes.len(),
                MAX_FRAME_LEN
            )));
        }
        let len = u32::try_from(bytes.len())
            .map_err(|_| TransportError::Encode("frame length overflows u32".to_string()))?;

        let mut result = Vec::with_capacity(LENGTH_PREFIX + bytes.len());
        result.extend_from_slice(&len.to_le_bytes());
        result.extend_from_slice(&bytes);
        Ok(result)
    }

    /// Read length prefix from buffer
    pub fn read_length(buf: &[u8; LENGTH_PREFIX]) -> usize {
        u32::from_le_bytes(*buf) as usize
    }

    /// Decode a frame body (everything after the length prefix).
    pub fn decode_body(body: &[u8]) -> Result<Message, TransportError> {
        // rkyv validates alignment of the archived root
        let mut aligned = AlignedVec::<16>::with_capacity(body.len());
        aligned.extend_from_slice(body);

        let archived = rkyv::access::<ArchivedEnvelope, rkyv::rancor::Error>(&aligned)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        Ok(Message {
            channel: archived.channel.as_str().to_string(),
            subject: archived.subject.as_str().to_string(),
            payload: Payload::from_bytes(archived.payload.as_slice().to_vec()),
        })
    }
}

/// Reads one message, waiting until the whole frame is available.
///
/// A peer hangup, at a frame boundary or inside a frame, is
/// [`TransportError::StreamClosed`]. An oversized or undecodable frame is
/// [`TransportError::Malformed`]; its bytes are consumed so the next read
/// starts on a frame boundary.
pub async fn read_message<R>(reader: &mut R) -> Result<Message, TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; LENGTH_PREFIX];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(TransportError::from_read)?;
    let len = MessageFrame::read_length(&len_buf);

    if len > MAX_FRAME_LEN {
        let skipped = tokio::io::copy(&mut (&mut *reader).take(len as u64), &mut tokio::io::sink())
            .await
            .map_err(TransportError::from_read)?;
        if skipped < len as u64 {
            return Err(TransportError::StreamClosed);
        }
        return Err(TransportError::Malformed(format!(
            "frame of {} bytes exceeds limit of {} bytes",
            len, MAX_FRAME_LEN
        )));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(TransportError::from_read)?;

    MessageFrame::decode_body(&body)
}

/// Writes an already encoded frame and flushes it.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(frame).await.map_err(TransportError::from_write)?;
    writer.flush().await.map_err(TransportError::from_write)
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = MessageFrame::encode(message)?;
    write_frame(writer, &frame).await
}
