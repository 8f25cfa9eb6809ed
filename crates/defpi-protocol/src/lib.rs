// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! defpi Protocol - TCP + tagged Protobuf communication layer
//!
//! This crate provides the wire protocol for communication between:
//! - The orchestrator and a process runtime (control channel)
//! - Two process runtimes (data channels)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     defpi-protocol                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Control: one request frame, one reply frame                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Codec: 2-byte type tag + Protobuf body (prost)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Framing: 4-byte length prefix, 1-byte heartbeats           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: TCP (tokio)                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use defpi_protocol::{ControlClient, ControlReply, ControlRequest, GoToProcessStateMessage, ProcessState};
//!
//! let mut client = ControlClient::connect("127.0.0.1:4999".parse()?).await?;
//! let reply = client
//!     .request(&ControlRequest::GoToProcessState(GoToProcessStateMessage {
//!         process_id: "my-process".to_string(),
//!         target_state: ProcessState::Running as i32,
//!     }))
//!     .await?;
//! ```

pub mod client;
pub mod codec;
pub mod frame;
pub mod messages;
pub mod server;

/// Well-known port of the process control channel
pub const MANAGEMENT_PORT: u16 = 4999;

pub use client::{ClientError, ControlClient, ControlClientConfig};
pub use codec::{CodecError, DecodedMessage, MessageRegistry, WireMessage};
pub use frame::{Frame, FrameError, FramedStream, Heartbeat, HEARTBEAT_LENGTH, PING, PONG};
pub use messages::{
    ConnectionHandshake, ConnectionMessage, ConnectionMode, ConnectionState, ControlReply,
    ControlRequest, ErrorMessage, FIRST_APPLICATION_TAG, GoToProcessStateMessage, ProcessState,
    ProcessStateUpdateMessage, ResumeProcessMessage, SetConfigMessage, control_registry,
    handshake_registry,
};
pub use server::{ControlConnection, ControlServer, ControlServerConfig, ServerError, bind_reusable};
