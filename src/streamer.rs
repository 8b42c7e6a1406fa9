//! HTTP/1.1 chunked transfer encoding over a raw connection.
//!
//! One outbound connection per response, opened against the runtime API
//! address and closed after the acknowledgment is read. The request carries
//! the streaming-mode indicator and `Transfer-Encoding: chunked`; never a
//! `Content-Length` (the two are mutually exclusive under this protocol).
//!
//! Wire format per chunk: the byte length as uppercase hex ASCII, CRLF, the
//! raw bytes, CRLF. Chunk N is fully flushed before chunk N+1 is encoded.
//! A zero-length chunk produced by the handler is still framed; only the
//! explicit end of the sequence emits the true terminator `0\r\n\r\n`.
//!
//! If the sequence fails mid-stream the connection is abandoned without a
//! terminator: the frames already flushed remain visible to the consumer,
//! and the failure propagates so the caller can report it on a fresh
//! connection.

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::context::RequestId;
use crate::error::RuntimeError;
use crate::handler::ByteStream;

/// End-of-sequence terminator: a zero-length chunk frame closing the body.
pub const TERMINATOR: &[u8] = b"0\r\n\r\n";

/// Frame one chunk: uppercase hex length, CRLF, payload, CRLF.
pub fn encode_frame(chunk: &[u8]) -> Vec<u8> {
    let mut frame = format!("{:X}\r\n", chunk.len()).into_bytes();
    frame.extend_from_slice(chunk);
    frame.extend_from_slice(b"\r\n");
    frame
}

/// Streams handler output to the invocation response endpoint.
pub struct ChunkedStreamer {
    api_base: String,
}

impl ChunkedStreamer {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
        }
    }

    /// Stream `chunks` as the response body for `request_id` and read the
    /// acknowledgment.
    pub async fn stream(
        &self,
        request_id: &RequestId,
        chunks: ByteStream,
    ) -> Result<(), RuntimeError> {
        let mut socket = TcpStream::connect(&self.api_base)
            .await
            .map_err(|e| RuntimeError::StreamTransport(format!("connect failed: {e}")))?;
        let path = RuntimeConfig::response_path(request_id);
        let outcome = stream_to(&mut socket, &self.api_base, &path, chunks).await;
        // Connection is dropped here; on the failure path that abandons the
        // stream without a terminator, as required.
        outcome
    }
}

/// Socket-generic streaming body, so tests can drive it over an in-memory
/// duplex pipe instead of a TCP socket.
pub(crate) async fn stream_to<S>(
    socket: &mut S,
    host: &str,
    path: &str,
    mut chunks: ByteStream,
) -> Result<(), RuntimeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = format!(
        "POST {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Lambda-Runtime-Function-Response-Mode: streaming\r\n\
         Transfer-Encoding: chunked\r\n\
         \r\n"
    );
    write_wire(socket, head.as_bytes()).await?;

    let mut frames = 0usize;
    let mut payload_bytes = 0usize;
    while let Some(item) = chunks.next().await {
        // A sequence failure propagates before any further frame or the
        // terminator touches the now-inconsistent connection.
        let chunk = item?;
        payload_bytes += chunk.len();
        write_wire(socket, &encode_frame(&chunk)).await?;
        flush_wire(socket).await?;
        frames += 1;
        debug!(frame = frames, len = chunk.len(), "chunk flushed");
    }

    write_wire(socket, TERMINATOR).await?;
    flush_wire(socket).await?;
    info!(frames, payload_bytes, "streaming complete");

    let status = read_ack(socket).await?;
    if status != 202 {
        warn!(status, "unexpected acknowledgment status from runtime API");
    }
    Ok(())
}

async fn write_wire<S: AsyncWrite + Unpin>(socket: &mut S, bytes: &[u8]) -> Result<(), RuntimeError> {
    socket
        .write_all(bytes)
        .await
        .map_err(|e| RuntimeError::StreamTransport(e.to_string()))
}

async fn flush_wire<S: AsyncWrite + Unpin>(socket: &mut S) -> Result<(), RuntimeError> {
    socket
        .flush()
        .await
        .map_err(|e| RuntimeError::StreamTransport(e.to_string()))
}

/// Read and discard the endpoint's acknowledgment, returning its status code.
///
/// Minimal HTTP/1.1 response parse: status line, headers, then a
/// `Content-Length`-delimited body which is drained and dropped.
pub(crate) async fn read_ack<S: AsyncRead + Unpin>(socket: &mut S) -> Result<u16, RuntimeError> {
    let mut buf: Vec<u8> = Vec::with_capacity(256);
    let mut tmp = [0u8; 256];

    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        let n = socket
            .read(&mut tmp)
            .await
            .map_err(|e| RuntimeError::StreamTransport(e.to_string()))?;
        if n == 0 {
            return Err(RuntimeError::StreamTransport(
                "connection closed before acknowledgment".into(),
            ));
        }
        buf.extend_from_slice(&tmp[..n]);
    };

    let head = std::str::from_utf8(&buf[..header_end])
        .map_err(|e| RuntimeError::StreamTransport(format!("non-UTF-8 acknowledgment: {e}")))?;
    let status = parse_status(head)?;
    let content_length = parse_content_length(head);

    // Drain the body so the peer sees a clean close.
    let mut remaining = content_length.saturating_sub(buf.len() - (header_end + 4));
    while remaining > 0 {
        let n = socket
            .read(&mut tmp)
            .await
            .map_err(|e| RuntimeError::StreamTransport(e.to_string()))?;
        if n == 0 {
            break;
        }
        remaining = remaining.saturating_sub(n);
    }

    Ok(status)
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_status(head: &str) -> Result<u16, RuntimeError> {
    head.lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| RuntimeError::StreamTransport("malformed acknowledgment status line".into()))
}

fn parse_content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}
