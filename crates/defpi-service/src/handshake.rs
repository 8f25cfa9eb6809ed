// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection handshake.
//!
//! Before any data flows on a channel both sides send a
//! [`ConnectionHandshake`] carrying the connection id and wait for the peer's.
//! The exchange is symmetric: whoever reaches the peer second finds the other
//! side's handshake already queued.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use defpi_protocol::{ConnectionHandshake, ConnectionState, HEARTBEAT_LENGTH, MessageRegistry, handshake_registry};
use tracing::{debug, error, warn};

use crate::error::Result;

/// The two halves of a data channel, as seen by the handshake.
#[async_trait]
pub trait HandshakeTransport: Send {
    /// Send one payload to the peer
    async fn send(&mut self, payload: Bytes) -> Result<()>;

    /// Receive one payload; `Ok(None)` if nothing arrived within `timeout`
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Bytes>>;
}

/// Configuration for the handshake
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub receive_timeout: Duration,
    pub max_tries: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_millis(100),
            max_tries: 100,
        }
    }
}

/// Runs the handshake for one connection id.
#[derive(Debug, Clone)]
pub struct HandshakeMonitor {
    connection_id: String,
    registry: MessageRegistry,
    config: HandshakeConfig,
}

impl HandshakeMonitor {
    pub fn new(connection_id: impl Into<String>, config: HandshakeConfig) -> Self {
        Self {
            connection_id: connection_id.into(),
            registry: handshake_registry(),
            config,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Encoded handshake announcing `state`
    pub fn handshake_payload(&self, state: ConnectionState) -> Result<Bytes> {
        Ok(self
            .registry
            .encode(&ConnectionHandshake::new(self.connection_id.clone(), state))?)
    }

    /// Send our handshake and wait for a matching one.
    ///
    /// Returns `false` when the send fails, the transport breaks, or the retry
    /// budget runs out; the caller backs off and tries again later.
    pub async fn shake_hands<T: HandshakeTransport + ?Sized>(
        &self,
        transport: &mut T,
        state: ConnectionState,
    ) -> bool {
        let payload = match self.handshake_payload(state) {
            Ok(payload) => payload,
            Err(e) => {
                error!(connection_id = %self.connection_id, error = %e, "Failed to encode handshake");
                return false;
            }
        };

        if let Err(e) = transport.send(payload).await {
            debug!(connection_id = %self.connection_id, error = %e, "Failed to send handshake, peer not ready?");
            return false;
        }

        for attempt in 0..self.config.max_tries {
            let data = match transport.receive(self.config.receive_timeout).await {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(e) => {
                    warn!(connection_id = %self.connection_id, error = %e, "Channel closed while waiting for handshake");
                    return false;
                }
            };

            if data.len() == HEARTBEAT_LENGTH {
                debug!(connection_id = %self.connection_id, attempt, "Received heartbeat instead of handshake, retrying");
                continue;
            }

            let received = match self.registry.decode_as::<ConnectionHandshake>(&data) {
                Ok(received) => received,
                Err(e) => {
                    warn!(connection_id = %self.connection_id, error = %e, "Received unexpected message while waiting for handshake");
                    continue;
                }
            };

            if received.connection_id == self.connection_id {
                debug!(
                    connection_id = %self.connection_id,
                    peer_state = ?received.connection_state(),
                    "Handshake acknowledged"
                );
                return true;
            }

            warn!(
                connection_id = %self.connection_id,
                received_id = %received.connection_id,
                "Invalid connection id in handshake"
            );
        }

        debug!(connection_id = %self.connection_id, tries = self.config.max_tries, "No handshake received");
        false
    }
}
