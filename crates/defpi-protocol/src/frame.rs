// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for TCP stream framing.
//!
//! Both the control channel and the data channels carry length-delimited frames:
//! - 4 bytes: payload length (big-endian)
//! - N bytes: payload
//!
//! A payload of exactly [`HEARTBEAT_LENGTH`] bytes is a heartbeat. Every other
//! payload is a codec-encoded message (see [`crate::codec`]), which is never
//! shorter than two bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum payload size (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame header size (4 bytes length)
pub const HEADER_SIZE: usize = 4;

/// Payload length reserved for heartbeats
pub const HEARTBEAT_LENGTH: usize = 1;

/// Heartbeat request byte
pub const PING: u8 = 0x0A;

/// Heartbeat reply byte
pub const PONG: u8 = 0x0B;

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("empty frame")]
    Empty,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,
}

/// The two heartbeat payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heartbeat {
    Ping,
    Pong,
}

impl Heartbeat {
    pub fn as_byte(self) -> u8 {
        match self {
            Heartbeat::Ping => PING,
            Heartbeat::Pong => PONG,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            PING => Some(Heartbeat::Ping),
            PONG => Some(Heartbeat::Pong),
            _ => None,
        }
    }
}

/// A single length-delimited payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame around an encoded payload
    pub fn new(payload: impl Into<Bytes>) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(FrameError::Empty);
        }
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(payload.len()));
        }
        Ok(Self { payload })
    }

    /// Create a heartbeat frame
    pub fn heartbeat(heartbeat: Heartbeat) -> Self {
        Self {
            payload: Bytes::copy_from_slice(&[heartbeat.as_byte()]),
        }
    }

    /// Whether this frame occupies the heartbeat slot, regardless of its byte value
    pub fn is_heartbeat(&self) -> bool {
        self.payload.len() == HEARTBEAT_LENGTH
    }

    /// The heartbeat carried by this frame, if it is a known one
    pub fn as_heartbeat(&self) -> Option<Heartbeat> {
        if self.is_heartbeat() {
            Heartbeat::from_byte(self.payload[0])
        } else {
            None
        }
    }

    /// Encode the frame to bytes for wire transmission
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u32(self.payload.len() as u32);
        buf.put(self.payload.clone());
        buf.freeze()
    }

    /// Decode a frame from bytes
    pub fn decode_from_bytes(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame header",
            )));
        }

        let length = bytes.get_u32() as usize;
        check_length(length)?;

        if bytes.len() < length {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame payload",
            )));
        }

        Ok(Self {
            payload: bytes.split_to(length),
        })
    }
}

fn check_length(length: usize) -> Result<(), FrameError> {
    if length == 0 {
        return Err(FrameError::Empty);
    }
    if length > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(length));
    }
    Ok(())
}

/// Write a frame to an async writer
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), FrameError> {
    let encoded = frame.encode();
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a frame from an async reader
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let length = u32::from_be_bytes(header) as usize;
    check_length(length)?;

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    Ok(Frame {
        payload: Bytes::from(payload),
    })
}

/// Framed codec for encoding/decoding frames on a stream
pub struct FramedStream<S> {
    stream: S,
}

impl<S> FramedStream<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> FramedStream<S> {
    /// Read the next frame from the stream
    pub async fn read_frame(&mut self) -> Result<Frame, FrameError> {
        read_frame(&mut self.stream).await
    }
}

impl<S: AsyncWrite + Unpin> FramedStream<S> {
    /// Write a frame to the stream
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), FrameError> {
        write_frame(&mut self.stream, frame).await
    }

    /// Write a raw payload as one frame
    pub async fn write_payload(&mut self, payload: impl Into<Bytes>) -> Result<(), FrameError> {
        let frame = Frame::new(payload)?;
        self.write_frame(&frame).await
    }
}
