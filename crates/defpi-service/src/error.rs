// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime error types.

use std::time::Duration;

use defpi_protocol::{CodecError, FrameError, ProcessState, ServerError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur in the process runtime.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// Configuration error (environment or typed service config)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Message could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Framing error on a channel
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Control server failure
    #[error("control server error: {0}")]
    Server(#[from] ServerError),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Service state blob could not be (de)serialized
    #[error("state serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation not allowed in the current state
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Argument rejected by the runtime
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A service callback did not finish in time
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// A service callback returned an error
    #[error("{operation} failed: {message}")]
    Callback {
        operation: &'static str,
        message: String,
    },

    /// Control message addressed to another process
    #[error("received message for unexpected process id {actual} (expected {expected})")]
    ProcessIdMismatch { expected: String, actual: String },

    /// Orchestrator asked for a state a process cannot be put into
    #[error("invalid target state: {0:?}")]
    InvalidTargetState(ProcessState),

    /// No local interface matches the requested capability hashes
    #[error("no interface with receive hash {receive_hash} and send hash {send_hash}")]
    IncompatibleInterface {
        receive_hash: String,
        send_hash: String,
    },

    /// Connection id not known to this process
    #[error("unknown connection: {0}")]
    UnknownConnection(String),

    /// Connection id already in use
    #[error("connection already exists: {0}")]
    DuplicateConnection(String),

    /// Orchestrator refused the config trigger
    #[error("config trigger failed: {0}")]
    Trigger(String),

    /// HTTP request to the orchestrator failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The callback executor rejected or lost a task
    #[error("executor error: {0}")]
    Executor(String),
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = ServiceError::Timeout {
            operation: "init",
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "init timed out after 5s");
    }

    #[test]
    fn test_process_id_mismatch_display() {
        let err = ServiceError::ProcessIdMismatch {
            expected: "a".into(),
            actual: "b".into(),
        };
        assert!(err.to_string().contains("unexpected process id b"));
    }

    #[test]
    fn test_from_codec_error() {
        let err: ServiceError = CodecError::Encoding("Foo").into();
        assert!(matches!(err, ServiceError::Codec(_)));
    }
}
