// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP server helpers for the process control channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tracing::{debug, info, instrument, warn};

use crate::frame::{FrameError, FramedStream};

/// Errors that can occur in the control server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind error: {0}")]
    Bind(#[from] std::io::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("server closed")]
    Closed,
}

/// Configuration for the control server
#[derive(Debug, Clone)]
pub struct ControlServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Listen backlog
    pub backlog: u32,
    /// Maximum concurrently served orchestrator connections (0 for unlimited)
    pub max_concurrent_handlers: u32,
}

impl Default for ControlServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], crate::MANAGEMENT_PORT)),
            backlog: 128,
            max_concurrent_handlers: 4,
        }
    }
}

/// Bind a TCP listener with `SO_REUSEADDR` set, so a port can be taken back
/// while old connections linger in `TIME_WAIT`.
///
/// Must be called from within a tokio runtime.
pub fn bind_reusable(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    use socket2::{Domain, Protocol, Socket, Type};

    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

/// Listening side of the control channel
pub struct ControlServer {
    listener: TcpListener,
    config: ControlServerConfig,
}

impl ControlServer {
    /// Bind the control port.
    pub fn bind(config: ControlServerConfig) -> Result<Self, ServerError> {
        let listener = bind_reusable(config.bind_addr, config.backlog)?;

        info!(
            addr = %config.bind_addr,
            max_handlers = config.max_concurrent_handlers,
            "Control server bound"
        );

        Ok(Self { listener, config })
    }

    /// Get the local address the server is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &ControlServerConfig {
        &self.config
    }

    /// Accept the next orchestrator connection
    pub async fn accept(&self) -> Result<ControlConnection, ServerError> {
        let (stream, remote_addr) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%remote_addr, error = %e, "failed to set TCP_NODELAY");
        }
        Ok(ControlConnection::new(stream, remote_addr))
    }

    /// Run the accept loop until `shutdown` flips to `true`.
    ///
    /// Each accepted connection is handed to `handler` on its own task.
    #[instrument(skip(self, handler, shutdown))]
    pub async fn run<H, Fut>(
        &self,
        handler: H,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ServerError>
    where
        H: Fn(ControlConnection) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        info!("Control server running");

        let semaphore = if self.config.max_concurrent_handlers > 0 {
            Some(Arc::new(Semaphore::new(
                self.config.max_concurrent_handlers as usize,
            )))
        } else {
            None
        };

        loop {
            if *shutdown.borrow() {
                break;
            }

            let connection = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                accepted = self.accept() => match accepted {
                    Ok(connection) => connection,
                    Err(e) => {
                        warn!(error = %e, "failed to accept control connection");
                        continue;
                    }
                },
            };

            let handler = handler.clone();
            let semaphore = semaphore.clone();

            tokio::spawn(async move {
                let _permit = if let Some(ref sem) = semaphore {
                    match sem.clone().acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            warn!("semaphore closed, dropping connection");
                            return;
                        }
                    }
                } else {
                    None
                };

                debug!(remote_addr = %connection.remote_addr(), "accepted control connection");
                handler(connection).await;
            });
        }

        info!("Control server stopped");
        Ok(())
    }
}

/// One accepted orchestrator connection
pub struct ControlConnection {
    stream: FramedStream<TcpStream>,
    remote_addr: SocketAddr,
}

impl ControlConnection {
    pub fn new(stream: TcpStream, remote_addr: SocketAddr) -> Self {
        Self {
            stream: FramedStream::new(stream),
            remote_addr,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Read one request payload.
    ///
    /// Returns `Ok(None)` when nothing arrives within `idle_timeout`.
    pub async fn read_request(&mut self, idle_timeout: Duration) -> Result<Option<Bytes>, ServerError> {
        match tokio::time::timeout(idle_timeout, self.stream.read_frame()).await {
            Ok(Ok(frame)) => Ok(Some(frame.payload)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }

    /// Write one reply payload
    pub async fn write_reply(&mut self, payload: Bytes) -> Result<(), ServerError> {
        self.stream.write_payload(payload).await?;
        Ok(())
    }
}
