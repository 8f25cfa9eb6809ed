// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP client for the process control channel.
//!
//! This is the orchestrator's side of the channel. The runtime never uses it
//! itself; it exists for tooling and integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::codec::{CodecError, MessageRegistry};
use crate::frame::{FrameError, FramedStream};
use crate::messages::{ControlReply, ControlRequest, control_registry};

/// Errors that can occur in the control client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected reply type: {0}")]
    UnexpectedReply(&'static str),

    #[error("request timed out after {0}ms")]
    Timeout(u64),
}

/// Configuration for the control client
#[derive(Debug, Clone)]
pub struct ControlClientConfig {
    /// Process control port to connect to
    pub server_addr: SocketAddr,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for ControlClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], crate::MANAGEMENT_PORT)),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
        }
    }
}

/// Client speaking to one process's control port
pub struct ControlClient {
    stream: FramedStream<TcpStream>,
    registry: MessageRegistry,
    config: ControlClientConfig,
}

impl ControlClient {
    /// Connect to the given control address with default timeouts
    pub async fn connect(server_addr: SocketAddr) -> Result<Self, ClientError> {
        Self::connect_with_config(ControlClientConfig {
            server_addr,
            ..Default::default()
        })
        .await
    }

    #[instrument(skip(config), fields(addr = %config.server_addr))]
    pub async fn connect_with_config(config: ControlClientConfig) -> Result<Self, ClientError> {
        let stream = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            TcpStream::connect(config.server_addr),
        )
        .await
        .map_err(|_| ClientError::Timeout(config.connect_timeout_ms))??;
        stream.set_nodelay(true)?;

        debug!("connected to control port");

        Ok(Self {
            stream: FramedStream::new(stream),
            registry: control_registry(),
            config,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.config.server_addr
    }

    /// Send a raw payload and wait for the raw reply
    pub async fn request_raw(&mut self, payload: impl Into<Bytes>) -> Result<Bytes, ClientError> {
        let timeout = self.config.request_timeout_ms;
        let stream = &mut self.stream;
        let exchange = async move {
            stream.write_payload(payload).await?;
            let frame = stream.read_frame().await?;
            Ok::<_, ClientError>(frame.payload)
        };
        tokio::time::timeout(Duration::from_millis(timeout), exchange)
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
    }

    /// Send a control request and decode the reply
    pub async fn request(&mut self, request: &ControlRequest) -> Result<ControlReply, ClientError> {
        let payload = request.encode(&self.registry)?;
        let reply = self.request_raw(payload).await?;
        let decoded = self.registry.decode(&reply)?;
        ControlReply::from_decoded(decoded)
            .map_err(|other| ClientError::UnexpectedReply(other.type_name()))
    }
}
