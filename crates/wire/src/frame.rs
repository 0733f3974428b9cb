// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame codec: 4-byte big-endian length prefix + frame body.
//!
//! Body layout: one kind byte, the 8-byte correlation id, then for requests a
//! length-prefixed command string followed by the payload; responses carry
//! only the payload.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for a single frame. File pushes are chunked well below this;
/// anything larger is a protocol violation.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const KIND_REQUEST: u8 = 0;
const KIND_RESPONSE_OK: u8 = 1;
const KIND_RESPONSE_ERR: u8 = 2;

/// Errors from the frame codec.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Frame of {0} bytes exceeds the protocol limit")]
    FrameTooLarge(usize),

    #[error("Malformed frame: {0}")]
    Malformed(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single message on the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A command sent to the peer, awaiting a correlated response.
    Request {
        id: u64,
        command: String,
        payload: Vec<u8>,
    },
    /// The peer's answer to a request with the same id.
    Response {
        id: u64,
        ok: bool,
        payload: Vec<u8>,
    },
}

impl Frame {
    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut body = Vec::new();
        match self {
            Frame::Request {
                id,
                command,
                payload,
            } => {
                if command.len() > u8::MAX as usize {
                    return Err(ProtocolError::Malformed("command name too long"));
                }
                body.push(KIND_REQUEST);
                body.extend_from_slice(&id.to_be_bytes());
                body.push(command.len() as u8);
                body.extend_from_slice(command.as_bytes());
                body.extend_from_slice(payload);
            }
            Frame::Response { id, ok, payload } => {
                body.push(if *ok { KIND_RESPONSE_OK } else { KIND_RESPONSE_ERR });
                body.extend_from_slice(&id.to_be_bytes());
                body.extend_from_slice(payload);
            }
        }
        if body.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(body.len()));
        }
        Ok(body)
    }

    fn decode(body: Vec<u8>) -> Result<Self, ProtocolError> {
        if body.len() < 9 {
            return Err(ProtocolError::Malformed("frame shorter than its header"));
        }
        let kind = body[0];
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&body[1..9]);
        let id = u64::from_be_bytes(id_bytes);
        match kind {
            KIND_REQUEST => {
                let Some(&cmd_len) = body.get(9) else {
                    return Err(ProtocolError::Malformed("request without command length"));
                };
                let cmd_end = 10 + cmd_len as usize;
                if body.len() < cmd_end {
                    return Err(ProtocolError::Malformed("command truncated"));
                }
                let command = std::str::from_utf8(&body[10..cmd_end])
                    .map_err(|_| ProtocolError::Malformed("command is not UTF-8"))?
                    .to_string();
                Ok(Frame::Request {
                    id,
                    command,
                    payload: body[cmd_end..].to_vec(),
                })
            }
            KIND_RESPONSE_OK | KIND_RESPONSE_ERR => Ok(Frame::Response {
                id,
                ok: kind == KIND_RESPONSE_OK,
                payload: body[9..].to_vec(),
            }),
            _ => Err(ProtocolError::Malformed("unknown frame kind")),
        }
    }
}

/// Read one length-prefixed frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    match reader.read_exact(&mut body).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }
    Frame::decode(body)
}

/// Write one length-prefixed frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), ProtocolError> {
    let body = frame.encode()?;
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
