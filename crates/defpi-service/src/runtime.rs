// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process runtime hosting one service.
//!
//! [`ServiceRuntime`] binds the control port, serves the orchestrator's
//! requests one at a time, and owns the worker pool and the connection table.
//!
//! # Example
//!
//! ```rust,ignore
//! use defpi_service::{RuntimeConfig, ServiceRuntime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = ServiceRuntime::builder(MyService::default())
//!         .interface(my_interface())
//!         .config(RuntimeConfig::from_env()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::select! {
//!         _ = tokio::signal::ctrl_c() => {}
//!         _ = runtime.stopped() => {}
//!     }
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use defpi_protocol::{ControlConnection, ControlServer, ControlServerConfig, ServerError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{DefPiParams, RuntimeConfig};
use crate::connection_manager::ConnectionManager;
use crate::error::{Result, ServiceError};
use crate::executor::ServiceExecutor;
use crate::interface::InterfaceInfo;
use crate::service::Service;
use crate::service_manager::{Flow, ServiceManager};
use crate::trigger::ConfigTrigger;

/// Builder for a [`ServiceRuntime`].
pub struct ServiceRuntimeBuilder<S: Service> {
    service: Arc<S>,
    interfaces: Vec<Arc<InterfaceInfo>>,
    params: Option<DefPiParams>,
    config: RuntimeConfig,
}

impl<S: Service> std::fmt::Debug for ServiceRuntimeBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRuntimeBuilder")
            .field("service", &std::any::type_name::<S>())
            .field("interfaces", &self.interfaces)
            .field("params", &self.params)
            .field("config", &self.config)
            .finish()
    }
}

impl<S: Service> ServiceRuntimeBuilder<S> {
    pub fn new(service: S) -> Self {
        Self {
            service: Arc::new(service),
            interfaces: Vec::new(),
            params: None,
            config: RuntimeConfig::default(),
        }
    }

    /// Offer an interface for incoming connection requests.
    pub fn interface(mut self, interface: InterfaceInfo) -> Self {
        self.interfaces.push(Arc::new(interface));
        self
    }

    /// Set the process parameters.
    ///
    /// Default: read from the environment by [`build`](Self::build).
    pub fn params(mut self, params: DefPiParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the control channel address.
    ///
    /// Default: `0.0.0.0:4999`
    pub fn control_addr(mut self, addr: SocketAddr) -> Self {
        self.config.control_addr = addr;
        self
    }

    pub fn build(self) -> Result<ServiceRuntimeConfig<S>> {
        let params = match self.params {
            Some(params) => params,
            None => DefPiParams::from_env()?,
        };

        Ok(ServiceRuntimeConfig {
            service: self.service,
            interfaces: self.interfaces,
            params,
            config: self.config,
        })
    }
}

/// Validated configuration for a [`ServiceRuntime`].
pub struct ServiceRuntimeConfig<S: Service> {
    service: Arc<S>,
    interfaces: Vec<Arc<InterfaceInfo>>,
    params: DefPiParams,
    config: RuntimeConfig,
}

impl<S: Service> std::fmt::Debug for ServiceRuntimeConfig<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRuntimeConfig")
            .field("service", &std::any::type_name::<S>())
            .field("interfaces", &self.interfaces.len())
            .field("params", &self.params)
            .field("config", &self.config)
            .finish()
    }
}

impl<S: Service> ServiceRuntimeConfig<S> {
    /// Bind the control port and start serving.
    ///
    /// Failing to bind is fatal.
    pub async fn start(self) -> Result<ServiceRuntime<S>> {
        let executor = Arc::new(ServiceExecutor::new(self.config.executor_workers));
        let connections = ConnectionManager::new(
            self.interfaces,
            executor.clone(),
            self.config.connection.clone(),
        );
        let manager = ServiceManager::new(
            self.service,
            self.params.clone(),
            executor.clone(),
            connections,
            self.config.callback_timeout,
        );

        let server = ControlServer::bind(ControlServerConfig {
            bind_addr: self.config.control_addr,
            ..Default::default()
        })?;
        let control_addr = server.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);
        let (calls_tx, calls_rx) = mpsc::channel(16);

        let processor = tokio::spawn(process_control_calls(manager, calls_rx, shutdown.clone()));

        let idle_timeout = self.config.control_read_timeout;
        let handler_shutdown = shutdown_rx.clone();
        let handler = move |connection: ControlConnection| {
            serve_control_connection(connection, calls_tx.clone(), idle_timeout, handler_shutdown.clone())
        };
        let server_handle = tokio::spawn(async move { server.run(handler, shutdown_rx).await });

        info!(
            addr = %control_addr,
            process_id = %self.params.process_id,
            "Service runtime started"
        );

        if self.config.request_config {
            let params = self.params.clone();
            tokio::spawn(async move {
                let result = match ConfigTrigger::new(&params) {
                    Ok(trigger) => trigger.request_config().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!(error = %e, "Could not request configuration from orchestrator");
                }
            });
        }

        Ok(ServiceRuntime {
            control_addr,
            shutdown,
            server_handle,
            processor,
            executor,
            grace: self.config.callback_timeout,
        })
    }
}

/// A running process runtime.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ServiceRuntime<S: Service> {
    control_addr: SocketAddr,
    shutdown: Arc<watch::Sender<bool>>,
    server_handle: JoinHandle<std::result::Result<(), ServerError>>,
    processor: JoinHandle<ServiceManager<S>>,
    executor: Arc<ServiceExecutor>,
    grace: Duration,
}

impl<S: Service> ServiceRuntime<S> {
    pub fn builder(service: S) -> ServiceRuntimeBuilder<S> {
        ServiceRuntimeBuilder::new(service)
    }

    /// Address the control server is bound to
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// Resolves once the control loop has stopped, after a suspend or
    /// terminate request or a call to [`shutdown`](Self::shutdown).
    pub async fn stopped(&self) {
        let mut rx = self.shutdown.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop the control loop, terminate the service if needed, close every
    /// connection and drain the worker pool.
    pub async fn shutdown(self) -> Result<()> {
        info!("Service runtime shutting down");
        self.shutdown.send_replace(true);

        match self.processor.await {
            Ok(mut manager) => manager.close().await,
            Err(e) => error!(error = %e, "Control loop task panicked"),
        }

        if !self.executor.shutdown(self.grace).await {
            warn!("Worker pool did not drain in time");
        }

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("Service runtime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(ServiceError::Executor(format!("control server task panicked: {}", e))),
        }
    }
}

/// One control payload waiting for its reply.
struct ControlCall {
    payload: Bytes,
    reply: oneshot::Sender<Bytes>,
}

/// Owns the service manager; handles calls strictly one at a time.
async fn process_control_calls<S: Service>(
    mut manager: ServiceManager<S>,
    mut calls: mpsc::Receiver<ControlCall>,
    shutdown: Arc<watch::Sender<bool>>,
) -> ServiceManager<S> {
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        let call = tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            call = calls.recv() => match call {
                Some(call) => call,
                None => break,
            },
        };

        let (reply, flow) = manager.handle_payload(&call.payload).await;
        if call.reply.send(reply).is_err() {
            debug!("Control connection gone before reply");
        }
        if flow == Flow::Stop {
            info!(state = ?manager.process_state(), "Control loop stopping");
            shutdown.send_replace(true);
            break;
        }
    }

    // Calls queued by other control connections still get their one reply.
    calls.close();
    while let Some(call) = calls.recv().await {
        debug!("Rejecting control call queued after stop");
        let _ = call.reply.send(manager.reject("process control loop has stopped"));
    }

    manager
}

/// Serve one orchestrator connection until it idles out, breaks, or the
/// runtime stops.
async fn serve_control_connection(
    mut connection: ControlConnection,
    calls: mpsc::Sender<ControlCall>,
    idle_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let remote_addr = connection.remote_addr();

    loop {
        let payload = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            read = connection.read_request(idle_timeout) => match read {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    debug!(%remote_addr, ?idle_timeout, "Control channel idle, closing");
                    break;
                }
                Err(e) => {
                    debug!(%remote_addr, error = %e, "Control channel closed");
                    break;
                }
            },
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let call = ControlCall {
            payload,
            reply: reply_tx,
        };
        if calls.send(call).await.is_err() {
            break;
        }
        let Ok(reply) = reply_rx.await else {
            break;
        };
        if let Err(e) = connection.write_reply(reply).await {
            warn!(%remote_addr, error = %e, "Failed to write control reply");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use defpi_protocol::{
        ControlReply, ControlRequest, GoToProcessStateMessage, ProcessState, control_registry,
    };

    use crate::config::ConnectionConfig;

    struct Idle;

    impl Service for Idle {
        type Config = ();
        type State = ();

        fn init(&self, _config: Option<()>, _params: &DefPiParams) -> anyhow::Result<()> {
            Ok(())
        }

        fn modify(&self, _config: ()) -> anyhow::Result<()> {
            Ok(())
        }

        fn suspend(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn resume_from(&self, _state: Option<()>) -> anyhow::Result<()> {
            Ok(())
        }

        fn terminate(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn go_to(state: ProcessState) -> Bytes {
        ControlRequest::GoToProcessState(GoToProcessStateMessage {
            process_id: "p1".to_string(),
            target_state: state as i32,
        })
        .encode(&control_registry())
        .unwrap()
    }

    fn decode_reply(bytes: &Bytes) -> ControlReply {
        let registry = control_registry();
        ControlReply::from_decoded(registry.decode(bytes).unwrap()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_calls_queued_behind_stop_still_get_a_reply() {
        let executor = Arc::new(ServiceExecutor::default());
        let connections = ConnectionManager::new(Vec::new(), executor.clone(), ConnectionConfig::default());
        let manager = ServiceManager::new(
            Arc::new(Idle),
            DefPiParams::standalone("p1"),
            executor,
            connections,
            Duration::from_secs(2),
        );

        let (calls_tx, calls_rx) = mpsc::channel(4);
        let mut replies = Vec::new();
        for state in [ProcessState::Terminated, ProcessState::Running, ProcessState::Running] {
            let (reply_tx, reply_rx) = oneshot::channel();
            calls_tx
                .send(ControlCall {
                    payload: go_to(state),
                    reply: reply_tx,
                })
                .await
                .unwrap();
            replies.push(reply_rx);
        }

        let (shutdown, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown);
        let manager = process_control_calls(manager, calls_rx, shutdown.clone()).await;

        assert!(*shutdown.borrow());
        assert_eq!(manager.process_state(), ProcessState::Terminated);

        let mut replies = replies.into_iter();
        match decode_reply(&replies.next().unwrap().await.unwrap()) {
            ControlReply::StateUpdate(update) => assert_eq!(update.state(), ProcessState::Terminated),
            other => panic!("expected state update, got {:?}", other),
        }
        for reply in replies {
            match decode_reply(&reply.await.unwrap()) {
                ControlReply::Error(error) => {
                    assert_eq!(error.process_id, "p1");
                    assert!(error.debug_information.contains("stopped"));
                }
                other => panic!("expected error reply, got {:?}", other),
            }
        }

        // Nothing more is accepted once the loop is gone.
        let (reply_tx, _reply_rx) = oneshot::channel();
        assert!(
            calls_tx
                .send(ControlCall {
                    payload: go_to(ProcessState::Running),
                    reply: reply_tx,
                })
                .await
                .is_err()
        );
    }
}
