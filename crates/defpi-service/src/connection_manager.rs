// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection table driven by the orchestrator's connection commands.

use std::collections::HashMap;
use std::sync::Arc;

use defpi_protocol::{ConnectionHandshake, ConnectionMessage, ConnectionMode, ConnectionState};
use tracing::{info, warn};

use crate::config::ConnectionConfig;
use crate::error::{Result, ServiceError};
use crate::executor::ServiceExecutor;
use crate::interface::InterfaceInfo;
use crate::managed_connection::ManagedConnection;

/// Owns every data connection of the process.
///
/// Only the control loop mutates the table.
#[derive(Debug)]
pub struct ConnectionManager {
    interfaces: Vec<Arc<InterfaceInfo>>,
    connections: HashMap<String, ManagedConnection>,
    executor: Arc<ServiceExecutor>,
    config: ConnectionConfig,
}

impl ConnectionManager {
    pub fn new(
        interfaces: Vec<Arc<InterfaceInfo>>,
        executor: Arc<ServiceExecutor>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            interfaces,
            connections: HashMap::new(),
            executor,
            config,
        }
    }

    pub fn interfaces(&self) -> &[Arc<InterfaceInfo>] {
        &self.interfaces
    }

    /// Apply one connection command and report the connection's resulting state.
    pub async fn handle_connection_message(&mut self, message: &ConnectionMessage) -> Result<ConnectionHandshake> {
        let mode = ConnectionMode::try_from(message.mode)
            .map_err(|_| ServiceError::InvalidArgument(format!("unknown connection mode {}", message.mode)))?;
        let id = message.connection_id.as_str();
        info!(connection_id = %id, ?mode, target = %message.target_address, "Connection command");

        let state = match mode {
            ConnectionMode::Create => self.create(message).await?,
            ConnectionMode::Resume => {
                let port = listen_port(message)?;
                self.existing(id)?.resume(port, &message.target_address).await?
            }
            ConnectionMode::Suspend => self.existing(id)?.suspend().await?,
            ConnectionMode::Terminate => {
                let connection = self
                    .connections
                    .remove(id)
                    .ok_or_else(|| ServiceError::UnknownConnection(id.to_string()))?;
                connection.terminate().await?
            }
        };

        Ok(ConnectionHandshake::new(id, state))
    }

    async fn create(&mut self, message: &ConnectionMessage) -> Result<ConnectionState> {
        let id = &message.connection_id;
        if self.connections.contains_key(id) {
            return Err(ServiceError::DuplicateConnection(id.clone()));
        }

        let interface = self
            .interfaces
            .iter()
            .find(|i| i.matches(&message.receive_hash, &message.send_hash))
            .cloned()
            .ok_or_else(|| ServiceError::IncompatibleInterface {
                receive_hash: message.receive_hash.clone(),
                send_hash: message.send_hash.clone(),
            })?;

        let connection = ManagedConnection::create(
            id.clone(),
            listen_port(message)?,
            &message.target_address,
            interface,
            self.executor.clone(),
            self.config.clone(),
        )
        .await?;
        let state = connection.state();
        self.connections.insert(id.clone(), connection);
        Ok(state)
    }

    fn existing(&self, id: &str) -> Result<&ManagedConnection> {
        self.connections
            .get(id)
            .ok_or_else(|| ServiceError::UnknownConnection(id.to_string()))
    }

    pub fn connection(&self, id: &str) -> Option<&ManagedConnection> {
        self.connections.get(id)
    }

    pub fn state_of(&self, id: &str) -> Option<ConnectionState> {
        self.connections.get(id).map(ManagedConnection::state)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Terminate every connection.
    pub async fn close_all(&mut self) {
        for (id, connection) in self.connections.drain() {
            if let Err(e) = connection.terminate().await {
                warn!(connection_id = %id, error = %e, "Failed to terminate connection");
            }
        }
    }
}

fn listen_port(message: &ConnectionMessage) -> Result<u16> {
    u16::try_from(message.listen_port)
        .map_err(|_| ServiceError::InvalidArgument(format!("listen port {} out of range", message.listen_port)))
}
