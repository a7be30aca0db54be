//! `Content-Length` framing of DAP messages.

use async_std::channel::Sender;
use async_std::io::{Read, ReadExt, Write, WriteExt};

use anyhow::Result;
use log::{trace, warn};
use serde::Serialize;
use serde_json::{from_slice, to_vec, Value};
use thiserror::Error;

use super::protocol::DebugAdapterMessage;
use super::Input;

const SEPARATOR: &[u8] = b"\r\n\r\n";
const MAX_HEADER_LEN: usize = 8 * 1024;
const READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("header has no Content-Length")]
    MissingContentLength,
    #[error("no blank line after {0} bytes of header")]
    MissingSeparator(usize),
    #[error("stream ended with {0} bytes of an unfinished message")]
    Truncated(usize),
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

/// Buffers raw bytes and cuts complete messages out of them.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> FrameDecoder {
        FrameDecoder::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete message.
    ///
    /// `Ok(None)` means more input is needed. On error the offending bytes
    /// are already discarded, so decoding can simply continue.
    pub fn next_message(&mut self) -> Result<Option<DebugAdapterMessage>, FrameError> {
        let header_end = match find(&self.buffer, SEPARATOR) {
            Some(pos) => pos,
            None if self.buffer.len() > MAX_HEADER_LEN => {
                let len = self.buffer.len();
                self.buffer.clear();
                return Err(FrameError::MissingSeparator(len));
            }
            None => return Ok(None),
        };
        let body_start = header_end + SEPARATOR.len();

        let len = match content_length(&self.buffer[..header_end]) {
            Ok(len) => len,
            Err(err) => {
                self.buffer.drain(..body_start);
                return Err(err);
            }
        };

        if self.buffer.len() < body_start + len {
            return Ok(None);
        }

        let body: Vec<u8> = self.buffer.drain(..body_start + len).skip(body_start).collect();
        decode_body(&body).map(Some)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn content_length(header: &[u8]) -> Result<usize, FrameError> {
    let header = std::str::from_utf8(header)
        .map_err(|_| FrameError::MalformedHeader("not UTF-8".to_owned()))?;

    let mut len = None;
    for line in header.split("\r\n") {
        trace!("< {}", line);
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_owned()))?;
        if name.trim().eq_ignore_ascii_case("Content-Length") {
            len = Some(
                value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::MalformedHeader(line.to_owned()))?,
            );
        }
    }
    len.ok_or(FrameError::MissingContentLength)
}

fn decode_body(body: &[u8]) -> Result<DebugAdapterMessage, FrameError> {
    let value: Value = from_slice(body)?;
    let type_ = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    Ok(match type_.as_str() {
        "request" => DebugAdapterMessage::Request(serde_json::from_value(value)?),
        "response" => DebugAdapterMessage::Response(serde_json::from_value(value)?),
        "event" => DebugAdapterMessage::Event(serde_json::from_value(value)?),
        _ => return Err(FrameError::UnknownType(type_)),
    })
}

/// Frame a message as `Content-Length: <n>\r\n\r\n<json>`.
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let body = to_vec(msg)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub async fn send_message<W: Write + Unpin, T: Serialize>(writer: &mut W, msg: &T) -> Result<()> {
    let frame = encode_message(msg)?;
    trace!("> {}", String::from_utf8_lossy(&frame));

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read framed messages until the stream ends and post them to the session inbox.
///
/// Malformed input is logged and dropped.
pub async fn read_messages<R: Read + Unpin>(mut reader: R, inbox: Sender<Input>) -> Result<()> {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        decoder.feed(&chunk[..n]);

        loop {
            match decoder.next_message() {
                Ok(Some(msg)) => {
                    trace!("< {:?}", msg);
                    if inbox.send(Input::Client(msg)).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(err) => warn!("Dropping client input: {}", err),
            }
        }
    }

    if decoder.buffered() > 0 {
        warn!("Dropping client input: {}", FrameError::Truncated(decoder.buffered()));
    }
    let _ = inbox.send(Input::ClientClosed).await;
    Ok(())
}
