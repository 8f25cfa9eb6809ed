// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process control state machine.
//!
//! Turns each control request from the orchestrator into service callbacks
//! and exactly one reply. Every failure, timeouts included, becomes an
//! [`ErrorMessage`](defpi_protocol::ErrorMessage) reply; nothing here takes
//! the process down.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use defpi_protocol::{
    ControlReply, ControlRequest, GoToProcessStateMessage, MessageRegistry, ProcessState,
    ResumeProcessMessage, SetConfigMessage, control_registry,
};
use tracing::{debug, error, info, warn};

use crate::config::DefPiParams;
use crate::connection_manager::ConnectionManager;
use crate::error::{Result, ServiceError};
use crate::executor::ServiceExecutor;
use crate::service::Service;
use crate::service_config::decode_config;

/// Whether the control loop keeps serving after a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct ServiceManager<S: Service> {
    service: Arc<S>,
    params: Arc<DefPiParams>,
    executor: Arc<ServiceExecutor>,
    connections: ConnectionManager,
    registry: MessageRegistry,
    callback_timeout: Duration,
    configured: bool,
    terminated: bool,
    process_state: ProcessState,
}

impl<S: Service> ServiceManager<S> {
    pub fn new(
        service: Arc<S>,
        params: DefPiParams,
        executor: Arc<ServiceExecutor>,
        connections: ConnectionManager,
        callback_timeout: Duration,
    ) -> Self {
        Self {
            service,
            params: Arc::new(params),
            executor,
            connections,
            registry: control_registry(),
            callback_timeout,
            configured: false,
            terminated: false,
            process_state: ProcessState::Starting,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Last state reported to the orchestrator
    pub fn process_state(&self) -> ProcessState {
        self.process_state
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn params(&self) -> &DefPiParams {
        &self.params
    }

    /// Decode one control payload, act on it, and encode the reply.
    pub async fn handle_payload(&mut self, payload: &[u8]) -> (Bytes, Flow) {
        let (reply, flow) = match self.registry.decode(payload) {
            Ok(decoded) => match ControlRequest::from_decoded(decoded) {
                Ok(request) => {
                    let kind = request.kind();
                    debug!(kind, "Control request");
                    match self.handle_request(request).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!(kind, error = %e, "Control request failed");
                            (self.error_reply(e.to_string()), Flow::Continue)
                        }
                    }
                }
                Err(other) => {
                    warn!(message_type = other.type_name(), "Unexpected message on control channel");
                    (
                        self.error_reply(format!("unexpected control message {}", other.type_name())),
                        Flow::Continue,
                    )
                }
            },
            Err(e) => {
                warn!(error = %e, "Undecodable control message");
                (self.error_reply(e.to_string()), Flow::Continue)
            }
        };

        (self.encode_reply(&reply), flow)
    }

    /// Act on one decoded request.
    pub async fn handle_request(&mut self, request: ControlRequest) -> Result<(ControlReply, Flow)> {
        if let Some(actual) = request.process_id() {
            self.check_process_id(actual)?;
        }

        match request {
            ControlRequest::GoToProcessState(message) => self.go_to_process_state(&message).await,
            ControlRequest::SetConfig(message) => Ok((self.set_config(message).await?, Flow::Continue)),
            ControlRequest::ResumeProcess(message) => Ok((self.resume_process(message).await?, Flow::Continue)),
            ControlRequest::Connection(message) => {
                let handshake = self.connections.handle_connection_message(&message).await?;
                Ok((ControlReply::Connection(handshake), Flow::Continue))
            }
        }
    }

    fn check_process_id(&self, actual: &str) -> Result<()> {
        let expected = &self.params.process_id;
        if !expected.is_empty() && actual != expected {
            return Err(ServiceError::ProcessIdMismatch {
                expected: expected.clone(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    async fn go_to_process_state(&mut self, message: &GoToProcessStateMessage) -> Result<(ControlReply, Flow)> {
        let target = ProcessState::try_from(message.target_state).map_err(|_| {
            ServiceError::InvalidArgument(format!("unknown process state {}", message.target_state))
        })?;
        info!(?target, "Going to process state");

        match target {
            ProcessState::Running => {
                let service = self.service.clone();
                let params = self.params.clone();
                self.executor
                    .run("init", self.callback_timeout, move || service.init(None, &params))
                    .await?;
                self.configured = true;
                Ok((self.state_update(ProcessState::Running, Vec::new()), Flow::Continue))
            }
            ProcessState::Suspended => {
                let service = self.service.clone();
                let state = self
                    .executor
                    .run("suspend", self.callback_timeout, move || service.suspend())
                    .await?;
                let blob = serde_json::to_vec(&state)?;
                Ok((self.state_update(ProcessState::Suspended, blob), Flow::Stop))
            }
            ProcessState::Terminated => {
                let terminated = self.terminate_service().await;
                self.connections.close_all().await;
                terminated?;
                Ok((self.state_update(ProcessState::Terminated, Vec::new()), Flow::Stop))
            }
            ProcessState::Starting | ProcessState::Initializing => Err(ServiceError::InvalidTargetState(target)),
        }
    }

    async fn set_config(&mut self, message: SetConfigMessage) -> Result<ControlReply> {
        if message.is_update != self.configured {
            warn!(
                is_update = message.is_update,
                configured = self.configured,
                "Config update flag does not match the service state"
            );
        }

        let config: S::Config = decode_config(&message.config)?;
        let service = self.service.clone();
        if self.configured {
            self.executor
                .run("modify", self.callback_timeout, move || service.modify(config))
                .await?;
        } else {
            let params = self.params.clone();
            self.executor
                .run("init", self.callback_timeout, move || service.init(Some(config), &params))
                .await?;
            self.configured = true;
        }

        Ok(self.state_update(ProcessState::Running, Vec::new()))
    }

    async fn resume_process(&mut self, message: ResumeProcessMessage) -> Result<ControlReply> {
        let state: Option<S::State> = if message.state_data.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(&message.state_data)?)
        };

        let service = self.service.clone();
        self.executor
            .run("resume", self.callback_timeout, move || service.resume_from(state))
            .await?;
        Ok(self.state_update(ProcessState::Running, Vec::new()))
    }

    /// Call `terminate()` on a configured service, at most once.
    ///
    /// A failed terminate still counts as the one call.
    async fn terminate_service(&mut self) -> Result<()> {
        if !self.configured {
            debug!("Service never configured, skipping terminate");
            return Ok(());
        }
        if self.terminated {
            debug!("Service already terminated");
            return Ok(());
        }
        self.terminated = true;

        let service = self.service.clone();
        self.executor
            .run("terminate", self.callback_timeout, move || service.terminate())
            .await
    }

    /// Release everything on runtime shutdown.
    pub async fn close(&mut self) {
        if let Err(e) = self.terminate_service().await {
            error!(error = %e, "Failed to terminate service");
        }
        self.connections.close_all().await;
    }

    /// Encoded error reply for a request that will not be handled.
    pub fn reject(&self, reason: &str) -> Bytes {
        self.encode_reply(&self.error_reply(reason.to_string()))
    }

    fn state_update(&mut self, state: ProcessState, state_data: Vec<u8>) -> ControlReply {
        self.process_state = state;
        ControlReply::state_update(&self.params.process_id, state, state_data)
    }

    fn error_reply(&self, debug_information: String) -> ControlReply {
        ControlReply::error(&self.params.process_id, debug_information)
    }

    fn encode_reply(&self, reply: &ControlReply) -> Bytes {
        match reply.encode(&self.registry) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "Failed to encode control reply");
                self.error_reply(format!("failed to encode reply: {}", e))
                    .encode(&self.registry)
                    .unwrap_or_default()
            }
        }
    }
}
