use std::io::{self, Read};

use super::frame::{MessageFrame, LENGTH_PREFIX, MAX_FRAME_LEN};
use super::Message;
use crate::error::TransportError;

const READ_CHUNK: usize = 8 * 1024;
/// Most bytes taken in by one [`FrameBuffer::fill_from`] call.
pub const FILL_BUDGET: usize = 4 * 1024 * 1024;

/// How a fill from a non-blocking reader ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Nothing more is available right now.
    Drained,
    /// The writer closed its end.
    Closed,
    /// The per-call budget was spent; more may be waiting.
    Limited,
}

/// Accumulates partial reads and hands out complete frames.
///
/// Bytes of a frame that has not fully arrived stay buffered until the next
/// fill, so a frame split across reads is never lost or misparsed.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as a message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Reads everything currently available from `reader`.
    ///
    /// Stops on `WouldBlock` (non-blocking descriptor with no data), on end
    /// of stream, or after [`FILL_BUDGET`] bytes so a chatty writer cannot
    /// grow the buffer without bound in one call.
    pub fn fill_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<FillOutcome> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut taken = 0;
        loop {
            if taken >= FILL_BUDGET {
                return Ok(FillOutcome::Limited);
            }
            match reader.read(&mut chunk) {
                Ok(0) => return Ok(FillOutcome::Closed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    taken += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(FillOutcome::Drained),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Pops the next complete frame, or `None` when the next frame is incomplete.
    pub fn next_message(&mut self) -> Option<Result<Message, TransportError>> {
        let mut len_buf = [0u8; LENGTH_PREFIX];
        len_buf.copy_from_slice(self.buf.get(..LENGTH_PREFIX)?);
        let len = MessageFrame::read_length(&len_buf);

        if len > MAX_FRAME_LEN {
            // no way to find the next frame boundary
            self.buf.clear();
            return Some(Err(TransportError::Malformed(format!(
                "frame of {} bytes exceeds limit of {} bytes",
                len, MAX_FRAME_LEN
            ))));
        }

        let end = LENGTH_PREFIX + len;
        if self.buf.len() < end {
            return None;
        }
        let frame: Vec<u8> = self.buf.drain(..end).collect();
        Some(MessageFrame::decode_body(&frame[LENGTH_PREFIX..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame(subject: &str) -> Vec<u8> {
        MessageFrame::encode(&Message::raw("eventbus", subject, b"payload".to_vec())).unwrap()
    }

    #[test]
    fn yields_nothing_until_frame_complete() {
        let bytes = frame("one");
        let mut buffer = FrameBuffer::new();

        buffer.extend(&bytes[..3]);
        assert!(buffer.next_message().is_none());

        buffer.extend(&bytes[3..bytes.len() - 1]);
        assert!(buffer.next_message().is_none());

        buffer.extend(&bytes[bytes.len() - 1..]);
        let message = buffer.next_message().unwrap().unwrap();
        assert_eq!(message.subject, "one");
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn keeps_trailing_partial_frame() {
        let mut wire = frame("one");
        wire.extend(frame("two"));
        let partial = frame("three");
        wire.extend(&partial[..5]);

        let mut buffer = FrameBuffer::new();
        let outcome = buffer.fill_from(&mut Cursor::new(wire)).unwrap();
        assert_eq!(outcome, FillOutcome::Closed);

        assert_eq!(buffer.next_message().unwrap().unwrap().subject, "one");
        assert_eq!(buffer.next_message().unwrap().unwrap().subject, "two");
        assert!(buffer.next_message().is_none());
        assert_eq!(buffer.buffered(), 5);

        buffer.extend(&partial[5..]);
        assert_eq!(buffer.next_message().unwrap().unwrap().subject, "three");
    }

    #[test]
    fn would_block_ends_fill_without_error() {
        struct Idle;
        impl Read for Idle {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"))
            }
        }

        let mut buffer = FrameBuffer::new();
        assert_eq!(buffer.fill_from(&mut Idle).unwrap(), FillOutcome::Drained);
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn oversized_length_resets_buffer() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&u32::MAX.to_le_bytes());
        buffer.extend(b"junk");
        assert!(matches!(
            buffer.next_message(),
            Some(Err(TransportError::Malformed(_)))
        ));
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn endless_writer_is_read_in_bounded_steps() {
        let mut endless = io::repeat(7);
        let mut buffer = FrameBuffer::new();

        assert_eq!(buffer.fill_from(&mut endless).unwrap(), FillOutcome::Limited);
        assert_eq!(buffer.buffered(), FILL_BUDGET);
        assert_eq!(buffer.fill_from(&mut endless).unwrap(), FillOutcome::Limited);
        assert_eq!(buffer.buffered(), 2 * FILL_BUDGET);
    }
}
