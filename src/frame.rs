// ABOUTME: Length-prefixed, checksummed framing for the pub/sub wire protocol
// ABOUTME: Provides Connection (request/response) and the split FrameReader/FrameWriter pair

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Marks the start of a frame on the wire; lets a reader resynchronize after corruption.
pub const START_BYTE: u8 = 0x01;

/// Largest permitted value of the 3-byte size field (`len(body) + 4`).
pub const MAX_PACKET_SIZE: usize = 0x00FF_FFFF;

const CHECKSUM_LEN: usize = 4;
const SIZE_FIELD_LEN: usize = 3;
const HEADER_LEN: usize = 1 + SIZE_FIELD_LEN;
const READ_BUF_CAPACITY: usize = 4 * 1024;

/// Errors raised while framing or deframing a packet.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer's TCP stream closed mid-frame.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// The encoded body would not fit in the 3-byte size field.
    #[error("payload exceeds MAX_PACKET_SIZE ({MAX_PACKET_SIZE} bytes)")]
    OversizedPacket,

    /// The body contains a forbidden `0x00` byte.
    #[error("payload contains a forbidden 0x00 byte")]
    InvalidPayload,

    /// Corruption detected while decoding: bad size field, `0x00` in the body,
    /// or a checksum mismatch. The caller may resynchronize once by retrying;
    /// a second consecutive occurrence should close the session.
    #[error("malformed frame: {0}")]
    NotAMessage(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Encode `body` into a complete on-wire frame: start byte, 3-byte big-endian
/// size (`len(body) + 4`), body, 4-byte big-endian Adler-32 checksum of body.
pub fn encode(body: &[u8]) -> Result<Bytes, FrameError> {
    if body.contains(&0u8) {
        return Err(FrameError::InvalidPayload);
    }
    let framed_len = body
        .len()
        .checked_add(CHECKSUM_LEN)
        .filter(|&len| len <= MAX_PACKET_SIZE)
        .ok_or(FrameError::OversizedPacket)?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + framed_len);
    buf.put_u8(START_BYTE);
    put_u24(&mut buf, framed_len as u32);
    buf.put_slice(body);
    buf.put_u32(adler::adler32_slice(body));
    Ok(buf.freeze())
}

fn put_u24(buf: &mut BytesMut, value: u32) {
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}

fn u24_at(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32
}

/// Attempts to extract one complete frame from `buf`.
///
/// On success, the frame's bytes (start byte through checksum) are drained
/// from `buf` and the body is returned. Returns `Ok(None)` when more bytes
/// must be read before a frame can be produced. A framing error still drains
/// the offending start byte (or the whole frame, on checksum mismatch) so the
/// next call can resynchronize on the next `START_BYTE` in the stream.
fn parse_buffered(buf: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
    let Some(start) = buf.iter().position(|&b| b == START_BYTE) else {
        buf.clear();
        return Ok(None);
    };
    if start > 0 {
        buf.advance(start);
    }
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let framed_len = u24_at(&buf[1..HEADER_LEN]) as usize;
    if framed_len < CHECKSUM_LEN {
        buf.advance(1);
        return Err(FrameError::NotAMessage("size field smaller than checksum"));
    }

    let total_len = HEADER_LEN + framed_len;
    if buf.len() < total_len {
        return Ok(None);
    }

    let body_len = framed_len - CHECKSUM_LEN;
    let body = Bytes::copy_from_slice(&buf[HEADER_LEN..HEADER_LEN + body_len]);
    let checksum = u32::from_be_bytes(
        buf[HEADER_LEN + body_len..total_len]
            .try_into()
            .expect("checksum slice is exactly 4 bytes"),
    );
    buf.advance(total_len);

    if body.contains(&0u8) {
        return Err(FrameError::NotAMessage(
            "payload contains a forbidden 0x00 byte",
        ));
    }
    if adler::adler32_slice(&body) != checksum {
        return Err(FrameError::NotAMessage("checksum mismatch"));
    }
    Ok(Some(body))
}

/// Reads from `stream` until either a complete frame is parsed out of
/// `buffer`, the stream reaches a clean EOF, or a framing error is detected.
async fn fill_and_parse<R>(
    stream: &mut R,
    buffer: &mut BytesMut,
) -> Result<Option<Bytes>, FrameError>
where
    R: AsyncRead + Unpin,
{
    loop {
        match parse_buffered(buffer) {
            Ok(Some(body)) => return Ok(Some(body)),
            Ok(None) => {}
            Err(e) => return Err(e),
        }

        if 0 == stream.read_buf(buffer).await? {
            return if buffer.is_empty() {
                Ok(None)
            } else {
                Err(FrameError::ConnectionReset)
            };
        }
    }
}

async fn write_framed<W>(stream: &mut W, body: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(body)?;
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// A buffered, bidirectional connection used for request/response style I/O:
/// the embedded client library issues one command and awaits the reply on
/// the same socket, from a single task.
#[derive(Debug)]
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    /// Wrap `socket`, allocating the read buffer.
    pub fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(READ_BUF_CAPACITY),
        }
    }

    /// Read a single frame body, blocking for more bytes as needed. Returns
    /// `Ok(None)` on a clean peer shutdown between frames.
    #[tracing::instrument(skip(self))]
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        fill_and_parse(&mut self.stream, &mut self.buffer).await
    }

    /// Frame and write `body` to the socket, flushing immediately.
    #[tracing::instrument(skip(self, body))]
    pub async fn write_frame(&mut self, body: &[u8]) -> Result<(), FrameError> {
        write_framed(&mut self.stream, body).await
    }
}

/// The read half of a session's socket, owned by its reader task.
#[derive(Debug)]
pub struct FrameReader {
    stream: OwnedReadHalf,
    buffer: BytesMut,
}

impl FrameReader {
    pub fn new(stream: OwnedReadHalf) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_BUF_CAPACITY),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        fill_and_parse(&mut self.stream, &mut self.buffer).await
    }
}

/// The write half of a session's socket, owned by its writer task.
#[derive(Debug)]
pub struct FrameWriter {
    stream: BufWriter<OwnedWriteHalf>,
}

impl FrameWriter {
    pub fn new(stream: OwnedWriteHalf) -> Self {
        Self {
            stream: BufWriter::new(stream),
        }
    }

    #[tracing::instrument(skip(self, body))]
    pub async fn write_frame(&mut self, body: &[u8]) -> Result<(), FrameError> {
        write_framed(&mut self.stream, body).await
    }
}

/// Exposes internals needed by the benchmark suite, which lives outside the
/// crate and so cannot reach private items directly.
#[doc(hidden)]
pub mod test_support {
    pub use super::parse_buffered;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_parse_roundtrip() {
        let body = b"PUB::topic,hello world";
        let frame = encode(body).unwrap();

        let mut buf = BytesMut::from(&frame[..]);
        let parsed = parse_buffered(&mut buf).unwrap();
        assert_eq!(parsed.as_deref(), Some(&body[..]));
        assert!(buf.is_empty());
    }

    #[test]
    fn parse_needs_more_data() {
        let frame = encode(b"SUB::topic").unwrap();
        let mut buf = BytesMut::from(&frame[..frame.len() - 2]);
        assert!(matches!(parse_buffered(&mut buf), Ok(None)));
    }

    #[test]
    fn encode_rejects_null_byte() {
        let err = encode(b"bad\0payload").unwrap_err();
        assert!(matches!(err, FrameError::InvalidPayload));
    }

    #[test]
    fn encode_rejects_oversized_body() {
        let body = vec![b'a'; MAX_PACKET_SIZE];
        let err = encode(&body).unwrap_err();
        assert!(matches!(err, FrameError::OversizedPacket));
    }

    #[test]
    fn parse_rejects_bad_checksum() {
        let frame = encode(b"SUB::topic").unwrap();
        let mut corrupted = frame.to_vec();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;

        let mut buf = BytesMut::from(&corrupted[..]);
        let err = parse_buffered(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::NotAMessage(_)));
    }

    #[test]
    fn parse_resynchronizes_after_garbage_prefix() {
        let frame = encode(b"SUB::topic").unwrap();
        let mut buf = BytesMut::new();
        buf.put_slice(b"\x02\x03garbage-before-start");
        buf.put_slice(&frame);

        let parsed = parse_buffered(&mut buf).unwrap();
        assert_eq!(parsed.as_deref(), Some(&b"SUB::topic"[..]));
    }
}
