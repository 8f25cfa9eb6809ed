// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use defpi_protocol::MANAGEMENT_PORT;

use crate::heartbeat::HeartbeatConfig;

/// Parameters handed to the process by the orchestrator.
///
/// Read once at startup and immutable for the lifetime of the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefPiParams {
    pub orchestrator_host: String,
    pub orchestrator_port: u16,
    pub orchestrator_token: String,
    /// Empty when unset; process id checks are skipped then
    pub process_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
}

impl DefPiParams {
    /// Load parameters from environment variables.
    ///
    /// All variables are optional:
    /// - `ORCHESTRATOR_HOST`
    /// - `ORCHESTRATOR_PORT` (default: 0)
    /// - `ORCHESTRATOR_TOKEN`
    /// - `PROCESS_ID`
    /// - `USER_ID`, `USER_NAME`, `USER_EMAIL`
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |name: &str| std::env::var(name).unwrap_or_default();

        let orchestrator_port = env_or("ORCHESTRATOR_PORT", 0u16, "must be a valid port number")?;

        Ok(Self {
            orchestrator_host: var("ORCHESTRATOR_HOST"),
            orchestrator_port,
            orchestrator_token: var("ORCHESTRATOR_TOKEN"),
            process_id: var("PROCESS_ID"),
            user_id: var("USER_ID"),
            user_name: var("USER_NAME"),
            user_email: var("USER_EMAIL"),
        })
    }

    /// Parameters for a process that is not managed by an orchestrator.
    pub fn standalone(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            ..Default::default()
        }
    }
}

/// Timing and sizing of one data connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bounded wait for one inbound payload during the handshake
    pub receive_timeout: Duration,
    /// Bounded wait for connecting or writing to the peer
    pub send_timeout: Duration,
    pub heartbeat: HeartbeatConfig,
    /// Receive attempts per handshake before giving up
    pub handshake_max_tries: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Capacity of the inbound payload queue
    pub inbox_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_millis(100),
            send_timeout: Duration::from_millis(200),
            heartbeat: HeartbeatConfig::default(),
            handshake_max_tries: 100,
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_millis(60_000),
            inbox_capacity: 1024,
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Control channel address
    pub control_addr: SocketAddr,
    /// Idle timeout on the control channel before it is reopened
    pub control_read_timeout: Duration,
    /// Upper bound on every lifecycle callback
    pub callback_timeout: Duration,
    /// Worker permits shared by all service callbacks
    pub executor_workers: usize,
    /// Ask the orchestrator for configuration once the control port is up
    pub request_config: bool,
    pub connection: ConnectionConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            control_addr: SocketAddr::from(([0, 0, 0, 0], MANAGEMENT_PORT)),
            control_read_timeout: Duration::from_secs(5 * 60),
            callback_timeout: Duration::from_secs(5),
            executor_workers: 1,
            request_config: true,
            connection: ConnectionConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `DEFPI_CONTROL_PORT`: control port (default: 4999)
    /// - `DEFPI_CONTROL_READ_TIMEOUT_MS`: control idle timeout (default: 300000)
    /// - `DEFPI_CALLBACK_TIMEOUT_MS`: service callback timeout (default: 5000)
    /// - `DEFPI_EXECUTOR_WORKERS`: callback worker permits (default: 1)
    /// - `DEFPI_REQUEST_CONFIG`: trigger the orchestrator at startup (default: true)
    /// - `DEFPI_RECEIVE_TIMEOUT_MS`: handshake receive timeout (default: 100)
    /// - `DEFPI_SEND_TIMEOUT_MS`: data channel send timeout (default: 200)
    /// - `DEFPI_HEARTBEAT_DELAY_MS`: first heartbeat delay (default: 2000)
    /// - `DEFPI_HEARTBEAT_PERIOD_MS`: heartbeat period (default: 10000)
    /// - `DEFPI_HANDSHAKE_MAX_TRIES`: handshake receive attempts (default: 100)
    /// - `DEFPI_BACKOFF_INITIAL_MS`: first reconnect delay (default: 100)
    /// - `DEFPI_BACKOFF_MAX_MS`: reconnect delay cap (default: 60000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();
        let conn = &default.connection;

        let control_port = env_or(
            "DEFPI_CONTROL_PORT",
            MANAGEMENT_PORT,
            "must be a valid port number",
        )?;
        let executor_workers: usize =
            env_or("DEFPI_EXECUTOR_WORKERS", 1, "must be a positive integer")?;
        if executor_workers == 0 {
            return Err(ConfigError::Invalid(
                "DEFPI_EXECUTOR_WORKERS",
                "must be a positive integer",
            ));
        }

        Ok(Self {
            control_addr: SocketAddr::from(([0, 0, 0, 0], control_port)),
            control_read_timeout: env_ms("DEFPI_CONTROL_READ_TIMEOUT_MS", default.control_read_timeout)?,
            callback_timeout: env_ms("DEFPI_CALLBACK_TIMEOUT_MS", default.callback_timeout)?,
            executor_workers,
            request_config: env_or("DEFPI_REQUEST_CONFIG", true, "must be true or false")?,
            connection: ConnectionConfig {
                receive_timeout: env_ms("DEFPI_RECEIVE_TIMEOUT_MS", conn.receive_timeout)?,
                send_timeout: env_ms("DEFPI_SEND_TIMEOUT_MS", conn.send_timeout)?,
                heartbeat: HeartbeatConfig {
                    initial_delay: env_ms("DEFPI_HEARTBEAT_DELAY_MS", conn.heartbeat.initial_delay)?,
                    period: env_ms("DEFPI_HEARTBEAT_PERIOD_MS", conn.heartbeat.period)?,
                },
                handshake_max_tries: env_or(
                    "DEFPI_HANDSHAKE_MAX_TRIES",
                    conn.handshake_max_tries,
                    "must be a positive integer",
                )?,
                backoff_initial: env_ms("DEFPI_BACKOFF_INITIAL_MS", conn.backoff_initial)?,
                backoff_max: env_ms("DEFPI_BACKOFF_MAX_MS", conn.backoff_max)?,
                inbox_capacity: conn.inbox_capacity,
            },
        })
    }
}

fn env_or<T: FromStr>(name: &'static str, default: T, hint: &'static str) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid(name, hint)),
        Err(_) => Ok(default),
    }
}

fn env_ms(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let millis = env_or(name, default.as_millis() as u64, "must be a duration in milliseconds")?;
    Ok(Duration::from_millis(millis))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),

    /// A service configuration field could not be parsed.
    #[error("invalid value {value:?} for config field {field} ({kind})")]
    InvalidField {
        field: String,
        kind: &'static str,
        value: String,
    },

    /// The service rejected its configuration.
    #[error("rejected configuration: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    const PARAM_VARS: [&str; 7] = [
        "ORCHESTRATOR_HOST",
        "ORCHESTRATOR_PORT",
        "ORCHESTRATOR_TOKEN",
        "PROCESS_ID",
        "USER_ID",
        "USER_NAME",
        "USER_EMAIL",
    ];

    #[test]
    fn test_params_default_when_unset() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        for var in PARAM_VARS {
            guard.remove(var);
        }

        let params = DefPiParams::from_env().unwrap();
        assert_eq!(params, DefPiParams::default());
        assert_eq!(params.orchestrator_port, 0);
    }

    #[test]
    fn test_params_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("ORCHESTRATOR_HOST", "orchestrator");
        guard.set("ORCHESTRATOR_PORT", "8080");
        guard.set("ORCHESTRATOR_TOKEN", "secret");
        guard.set("PROCESS_ID", "proc-42");
        guard.set("USER_ID", "u-1");
        guard.set("USER_NAME", "alice");
        guard.set("USER_EMAIL", "alice@example.org");

        let params = DefPiParams::from_env().unwrap();
        assert_eq!(params.orchestrator_host, "orchestrator");
        assert_eq!(params.orchestrator_port, 8080);
        assert_eq!(params.orchestrator_token, "secret");
        assert_eq!(params.process_id, "proc-42");
        assert_eq!(params.user_email, "alice@example.org");
    }

    #[test]
    fn test_params_invalid_port() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("ORCHESTRATOR_PORT", "not-a-port");

        let err = DefPiParams::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("ORCHESTRATOR_PORT", _)));
    }

    #[test]
    fn test_runtime_config_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        for var in [
            "DEFPI_CONTROL_PORT",
            "DEFPI_CALLBACK_TIMEOUT_MS",
            "DEFPI_EXECUTOR_WORKERS",
            "DEFPI_HEARTBEAT_PERIOD_MS",
            "DEFPI_REQUEST_CONFIG",
        ] {
            guard.remove(var);
        }

        let config = RuntimeConfig::from_env().unwrap();
        assert_eq!(config.control_addr.port(), 4999);
        assert_eq!(config.control_read_timeout, Duration::from_secs(300));
        assert_eq!(config.callback_timeout, Duration::from_secs(5));
        assert_eq!(config.executor_workers, 1);
        assert!(config.request_config);
        assert_eq!(config.connection.heartbeat.period, Duration::from_secs(10));
        assert_eq!(config.connection.backoff_max, Duration::from_secs(60));
    }

    #[test]
    fn test_runtime_config_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("DEFPI_CONTROL_PORT", "5999");
        guard.set("DEFPI_HEARTBEAT_PERIOD_MS", "250");
        guard.set("DEFPI_REQUEST_CONFIG", "false");

        let config = RuntimeConfig::from_env().unwrap();
        assert_eq!(config.control_addr.port(), 5999);
        assert_eq!(config.connection.heartbeat.period, Duration::from_millis(250));
        assert!(!config.request_config);
    }

    #[test]
    fn test_runtime_config_zero_workers_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("DEFPI_EXECUTOR_WORKERS", "0");

        let err = RuntimeConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("DEFPI_EXECUTOR_WORKERS", _)));
    }
}
