// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! defpi service runtime.
//!
//! Hosts one service inside a process managed by the orchestrator:
//!
//! - the **control loop** answers lifecycle requests (configure, run,
//!   suspend, resume, terminate) on the control port;
//! - **managed connections** carry typed messages to and from other
//!   processes, reconnecting on their own after interruptions;
//! - every service callback runs on a bounded worker pool with a timeout.
//!
//! ```text
//! orchestrator ──control──▶ ServiceRuntime ──▶ ServiceManager ──▶ Service
//!                                                   │
//!                                                   ▼
//!                                           ConnectionManager
//!                                                   │
//!                                                   ▼
//!                      peer process ◀──data──▶ ManagedConnection ──▶ ConnectionHandler
//! ```

pub mod backoff;
pub mod config;
pub mod connection_manager;
pub mod error;
pub mod executor;
pub mod handshake;
pub mod heartbeat;
pub mod interface;
pub mod managed_connection;
pub mod runtime;
pub mod service;
pub mod service_config;
pub mod service_manager;
pub mod trigger;

pub use config::{ConfigError, ConnectionConfig, DefPiParams, RuntimeConfig};
pub use connection_manager::ConnectionManager;
pub use error::{Result, ServiceError};
pub use executor::ServiceExecutor;
pub use heartbeat::HeartbeatConfig;
pub use interface::{InterfaceBuilder, InterfaceInfo, descriptor_hash, interface_hash};
pub use managed_connection::{ConnectionHandle, ManagedConnection};
pub use runtime::{ServiceRuntime, ServiceRuntimeBuilder, ServiceRuntimeConfig};
pub use service::{ConnectionHandler, HandlerBinding, HandlerBindingBuilder, Service};
pub use service_config::{
    ConfigField, ConfigSchema, ConfigValue, ConfigView, FieldKind, FromConfigView, decode_config,
};
pub use service_manager::{Flow, ServiceManager};
pub use trigger::ConfigTrigger;

// Re-exported so services need only one dependency for their wire types.
pub use defpi_protocol::{ConnectionState, ProcessState, WireMessage};
