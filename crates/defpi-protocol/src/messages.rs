// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Control and handshake messages.
//!
//! Tags `0x0001..0x0FFF` are reserved for these runtime messages; application
//! interfaces use tags from [`FIRST_APPLICATION_TAG`] upwards.

use std::collections::HashMap;

use bytes::Bytes;

use crate::codec::{CodecError, DecodedMessage, MessageRegistry, WireMessage};

/// Lowest tag available to application message types
pub const FIRST_APPLICATION_TAG: u16 = 0x1000;

/// Lifecycle state of a process as seen by the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ProcessState {
    Starting = 0,
    Initializing = 1,
    Running = 2,
    Suspended = 3,
    Terminated = 4,
}

/// Lifecycle state of one data connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ConnectionState {
    Starting = 0,
    Connected = 1,
    Interrupted = 2,
    Suspended = 3,
    Terminated = 4,
}

/// What a [`ConnectionMessage`] asks the runtime to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ConnectionMode {
    Create = 0,
    Resume = 1,
    Suspend = 2,
    Terminate = 3,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GoToProcessStateMessage {
    #[prost(string, tag = "1")]
    pub process_id: String,
    #[prost(enumeration = "ProcessState", tag = "2")]
    pub target_state: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SetConfigMessage {
    #[prost(string, tag = "1")]
    pub process_id: String,
    #[prost(bool, tag = "2")]
    pub is_update: bool,
    #[prost(map = "string, string", tag = "3")]
    pub config: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ResumeProcessMessage {
    #[prost(string, tag = "1")]
    pub process_id: String,
    #[prost(bytes = "vec", tag = "2")]
    pub state_data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectionMessage {
    #[prost(string, tag = "1")]
    pub connection_id: String,
    #[prost(enumeration = "ConnectionMode", tag = "2")]
    pub mode: i32,
    /// Peer endpoint, `host:port`, optionally prefixed with `tcp://`
    #[prost(string, tag = "3")]
    pub target_address: String,
    #[prost(uint32, tag = "4")]
    pub listen_port: u32,
    /// Expected hash of the local interface's inbound types
    #[prost(string, tag = "5")]
    pub receive_hash: String,
    /// Expected hash of the local interface's outbound types
    #[prost(string, tag = "6")]
    pub send_hash: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProcessStateUpdateMessage {
    #[prost(string, tag = "1")]
    pub process_id: String,
    #[prost(enumeration = "ProcessState", tag = "2")]
    pub state: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub state_data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ErrorMessage {
    #[prost(string, tag = "1")]
    pub process_id: String,
    #[prost(string, tag = "2")]
    pub debug_information: String,
}

/// Identity exchange on a data channel, also used as the reply to connection commands.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectionHandshake {
    #[prost(string, tag = "1")]
    pub connection_id: String,
    #[prost(enumeration = "ConnectionState", tag = "2")]
    pub connection_state: i32,
}

impl ConnectionHandshake {
    pub fn new(connection_id: impl Into<String>, state: ConnectionState) -> Self {
        Self {
            connection_id: connection_id.into(),
            connection_state: state as i32,
        }
    }
}

impl WireMessage for ConnectionHandshake {
    const TAG: u16 = 0x0001;
    const NAME: &'static str = "ConnectionHandshake";
}

impl WireMessage for GoToProcessStateMessage {
    const TAG: u16 = 0x0101;
    const NAME: &'static str = "GoToProcessStateMessage";
}

impl WireMessage for SetConfigMessage {
    const TAG: u16 = 0x0102;
    const NAME: &'static str = "SetConfigMessage";
}

impl WireMessage for ResumeProcessMessage {
    const TAG: u16 = 0x0103;
    const NAME: &'static str = "ResumeProcessMessage";
}

impl WireMessage for ConnectionMessage {
    const TAG: u16 = 0x0104;
    const NAME: &'static str = "ConnectionMessage";
}

impl WireMessage for ProcessStateUpdateMessage {
    const TAG: u16 = 0x0105;
    const NAME: &'static str = "ProcessStateUpdateMessage";
}

impl WireMessage for ErrorMessage {
    const TAG: u16 = 0x0106;
    const NAME: &'static str = "ErrorMessage";
}

/// Registry holding every control-channel message type.
pub fn control_registry() -> MessageRegistry {
    let mut registry = MessageRegistry::new();
    registry.insert::<GoToProcessStateMessage>();
    registry.insert::<SetConfigMessage>();
    registry.insert::<ResumeProcessMessage>();
    registry.insert::<ConnectionMessage>();
    registry.insert::<ProcessStateUpdateMessage>();
    registry.insert::<ErrorMessage>();
    registry.insert::<ConnectionHandshake>();
    registry
}

/// Registry holding the data-channel handshake only.
pub fn handshake_registry() -> MessageRegistry {
    let mut registry = MessageRegistry::new();
    registry.insert::<ConnectionHandshake>();
    registry
}

/// A request arriving from the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    GoToProcessState(GoToProcessStateMessage),
    SetConfig(SetConfigMessage),
    ResumeProcess(ResumeProcessMessage),
    Connection(ConnectionMessage),
}

impl ControlRequest {
    /// Narrow a decoded message to a request; anything else is handed back.
    pub fn from_decoded(decoded: DecodedMessage) -> Result<Self, DecodedMessage> {
        let decoded = match decoded.downcast::<GoToProcessStateMessage>() {
            Ok(m) => return Ok(Self::GoToProcessState(m)),
            Err(d) => d,
        };
        let decoded = match decoded.downcast::<SetConfigMessage>() {
            Ok(m) => return Ok(Self::SetConfig(m)),
            Err(d) => d,
        };
        let decoded = match decoded.downcast::<ResumeProcessMessage>() {
            Ok(m) => return Ok(Self::ResumeProcess(m)),
            Err(d) => d,
        };
        decoded.downcast::<ConnectionMessage>().map(Self::Connection)
    }

    /// Process id carried by the request. Connection commands carry none.
    pub fn process_id(&self) -> Option<&str> {
        match self {
            Self::GoToProcessState(m) => Some(&m.process_id),
            Self::SetConfig(m) => Some(&m.process_id),
            Self::ResumeProcess(m) => Some(&m.process_id),
            Self::Connection(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::GoToProcessState(_) => GoToProcessStateMessage::NAME,
            Self::SetConfig(_) => SetConfigMessage::NAME,
            Self::ResumeProcess(_) => ResumeProcessMessage::NAME,
            Self::Connection(_) => ConnectionMessage::NAME,
        }
    }

    pub fn encode(&self, registry: &MessageRegistry) -> Result<Bytes, CodecError> {
        match self {
            Self::GoToProcessState(m) => registry.encode(m),
            Self::SetConfig(m) => registry.encode(m),
            Self::ResumeProcess(m) => registry.encode(m),
            Self::Connection(m) => registry.encode(m),
        }
    }
}

/// A reply sent back to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlReply {
    StateUpdate(ProcessStateUpdateMessage),
    Error(ErrorMessage),
    Connection(ConnectionHandshake),
}

impl ControlReply {
    pub fn state_update(process_id: &str, state: ProcessState, state_data: Vec<u8>) -> Self {
        Self::StateUpdate(ProcessStateUpdateMessage {
            process_id: process_id.to_string(),
            state: state as i32,
            state_data,
        })
    }

    pub fn error(process_id: &str, debug_information: impl Into<String>) -> Self {
        Self::Error(ErrorMessage {
            process_id: process_id.to_string(),
            debug_information: debug_information.into(),
        })
    }

    pub fn from_decoded(decoded: DecodedMessage) -> Result<Self, DecodedMessage> {
        let decoded = match decoded.downcast::<ProcessStateUpdateMessage>() {
            Ok(m) => return Ok(Self::StateUpdate(m)),
            Err(d) => d,
        };
        let decoded = match decoded.downcast::<ErrorMessage>() {
            Ok(m) => return Ok(Self::Error(m)),
            Err(d) => d,
        };
        decoded.downcast::<ConnectionHandshake>().map(Self::Connection)
    }

    pub fn encode(&self, registry: &MessageRegistry) -> Result<Bytes, CodecError> {
        match self {
            Self::StateUpdate(m) => registry.encode(m),
            Self::Error(m) => registry.encode(m),
            Self::Connection(m) => registry.encode(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_getters_fall_back_to_default() {
        let msg = GoToProcessStateMessage {
            process_id: String::new(),
            target_state: 42,
        };
        assert_eq!(msg.target_state(), ProcessState::Starting);
        assert!(ProcessState::try_from(42).is_err());
        assert_eq!(ProcessState::try_from(3).unwrap(), ProcessState::Suspended);
    }

    #[test]
    fn test_control_registry_tags_unique() {
        let registry = control_registry();
        assert_eq!(registry.len(), 7);
        assert!(registry.contains::<ConnectionHandshake>());
        assert!(registry.contains_tag(0x0104));
    }

    #[test]
    fn test_control_request_from_decoded() {
        let registry = control_registry();
        let request = ControlRequest::SetConfig(SetConfigMessage {
            process_id: "p-1".into(),
            is_update: false,
            config: HashMap::from([("key".to_string(), "value".to_string())]),
        });
        let bytes = request.encode(&registry).unwrap();
        let decoded = registry.decode(&bytes).unwrap();
        let back = ControlRequest::from_decoded(decoded).unwrap();
        assert_eq!(back, request);
        assert_eq!(back.process_id(), Some("p-1"));
        assert_eq!(back.kind(), "SetConfigMessage");
    }

    #[test]
    fn test_reply_is_not_a_request() {
        let registry = control_registry();
        let reply = ControlReply::error("p-1", "boom");
        let decoded = registry.decode(&reply.encode(&registry).unwrap()).unwrap();
        let decoded = ControlRequest::from_decoded(decoded).unwrap_err();
        assert_eq!(ControlReply::from_decoded(decoded).unwrap(), reply);
    }

    #[test]
    fn test_state_update_with_empty_blob() {
        let registry = control_registry();
        let reply = ControlReply::state_update("p-1", ProcessState::Running, Vec::new());
        let bytes = reply.encode(&registry).unwrap();
        match ControlReply::from_decoded(registry.decode(&bytes).unwrap()).unwrap() {
            ControlReply::StateUpdate(update) => {
                assert_eq!(update.state(), ProcessState::Running);
                assert!(update.state_data.is_empty());
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }
}
