// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Echo service: answers every `EchoRequest` with an `EchoReply` carrying the
//! configured prefix.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use defpi_service::{
    ConfigField, ConfigSchema, ConfigView, ConnectionHandle, ConnectionHandler, DefPiParams,
    FromConfigView, HandlerBinding, InterfaceInfo, Service, WireMessage,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const ECHO_DESCRIPTOR: &str = r#"syntax = "proto3";
package defpi.echo;
message EchoRequest { string text = 1; }
message EchoReply { string text = 1; uint64 sequence = 2; }
"#;

#[derive(Clone, PartialEq, prost::Message)]
pub struct EchoRequest {
    #[prost(string, tag = "1")]
    pub text: String,
}

impl WireMessage for EchoRequest {
    const TAG: u16 = 0x1001;
    const NAME: &'static str = "EchoRequest";
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EchoReply {
    #[prost(string, tag = "1")]
    pub text: String,
    #[prost(uint64, tag = "2")]
    pub sequence: u64,
}

impl WireMessage for EchoReply {
    const TAG: u16 = 0x1002;
    const NAME: &'static str = "EchoReply";
}

#[derive(Debug, Clone, PartialEq)]
pub struct EchoConfig {
    pub prefix: String,
}

impl FromConfigView for EchoConfig {
    fn schema() -> ConfigSchema {
        ConfigSchema::new([ConfigField::string("prefix").with_default("")])
    }

    fn from_view(view: &ConfigView) -> anyhow::Result<Self> {
        Ok(Self {
            prefix: view.string("prefix").unwrap_or_default().to_string(),
        })
    }
}

/// What survives a suspend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoSnapshot {
    pub prefix: String,
    pub echoed: u64,
}

#[derive(Debug, Default)]
struct Shared {
    prefix: RwLock<String>,
    echoed: AtomicU64,
}

impl Shared {
    fn prefix(&self) -> String {
        self.prefix.read().map(|p| p.clone()).unwrap_or_default()
    }

    fn set_prefix(&self, prefix: String) {
        if let Ok(mut current) = self.prefix.write() {
            *current = prefix;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EchoService {
    shared: Arc<Shared>,
}

impl EchoService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn echoed(&self) -> u64 {
        self.shared.echoed.load(Ordering::Relaxed)
    }

    /// The interface this service offers to peers.
    pub fn interface(&self) -> defpi_service::Result<InterfaceInfo> {
        let shared = self.shared.clone();
        Ok(InterfaceInfo::builder("echo", "1.0.0")
            .descriptor(ECHO_DESCRIPTOR)
            .receives::<EchoRequest>()?
            .sends::<EchoReply>()?
            .handler(move |handle| {
                HandlerBinding::builder(EchoHandler {
                    shared: shared.clone(),
                    handle,
                })
                .on(EchoHandler::on_request)
                .build()
            }))
    }
}

impl Service for EchoService {
    type Config = EchoConfig;
    type State = EchoSnapshot;

    fn init(&self, config: Option<EchoConfig>, params: &DefPiParams) -> anyhow::Result<()> {
        if let Some(config) = config {
            self.shared.set_prefix(config.prefix);
        }
        info!(process_id = %params.process_id, prefix = %self.shared.prefix(), "Echo service initialized");
        Ok(())
    }

    fn modify(&self, config: EchoConfig) -> anyhow::Result<()> {
        info!(prefix = %config.prefix, "Echo prefix changed");
        self.shared.set_prefix(config.prefix);
        Ok(())
    }

    fn suspend(&self) -> anyhow::Result<EchoSnapshot> {
        Ok(EchoSnapshot {
            prefix: self.shared.prefix(),
            echoed: self.echoed(),
        })
    }

    fn resume_from(&self, state: Option<EchoSnapshot>) -> anyhow::Result<()> {
        if let Some(state) = state {
            self.shared.set_prefix(state.prefix);
            self.shared.echoed.store(state.echoed, Ordering::Relaxed);
        }
        info!(echoed = self.echoed(), "Echo service resumed");
        Ok(())
    }

    fn terminate(&self) -> anyhow::Result<()> {
        info!(echoed = self.echoed(), "Echo service terminated");
        Ok(())
    }
}

struct EchoHandler {
    shared: Arc<Shared>,
    handle: ConnectionHandle,
}

impl EchoHandler {
    fn on_request(&self, request: EchoRequest) -> anyhow::Result<()> {
        let sequence = self.shared.echoed.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(connection_id = %self.handle.id(), sequence, "Echoing");
        self.handle.send(&EchoReply {
            text: format!("{}{}", self.shared.prefix(), request.text),
            sequence,
        })?;
        Ok(())
    }
}

impl ConnectionHandler for EchoHandler {
    fn on_interrupt(&self) -> anyhow::Result<()> {
        debug!(connection_id = %self.handle.id(), "Peer went away, waiting for it");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use defpi_service::{ConnectionConfig, ConnectionState, ManagedConnection, ServiceExecutor};

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    struct Collector {
        replies: Arc<Mutex<Vec<EchoReply>>>,
    }

    impl Collector {
        fn on_reply(&self, reply: EchoReply) -> anyhow::Result<()> {
            self.replies.lock().unwrap().push(reply);
            Ok(())
        }
    }

    impl ConnectionHandler for Collector {}

    fn client_interface(replies: Arc<Mutex<Vec<EchoReply>>>) -> InterfaceInfo {
        InterfaceInfo::builder("echo-client", "1.0.0")
            .descriptor(ECHO_DESCRIPTOR)
            .receives::<EchoReply>()
            .unwrap()
            .sends::<EchoRequest>()
            .unwrap()
            .handler(move |_| {
                HandlerBinding::builder(Collector {
                    replies: replies.clone(),
                })
                .on(Collector::on_reply)
                .build()
            })
    }

    #[test]
    fn test_suspend_resume_keeps_prefix_and_count() {
        let service = EchoService::new();
        service
            .init(
                Some(EchoConfig {
                    prefix: "> ".to_string(),
                }),
                &DefPiParams::standalone("echo-1"),
            )
            .unwrap();
        service.shared.echoed.store(5, Ordering::Relaxed);

        let snapshot = service.suspend().unwrap();
        assert_eq!(
            snapshot,
            EchoSnapshot {
                prefix: "> ".to_string(),
                echoed: 5
            }
        );

        let restored = EchoService::new();
        restored.resume_from(Some(snapshot)).unwrap();
        assert_eq!(restored.echoed(), 5);
        assert_eq!(restored.shared.prefix(), "> ");
    }

    #[test]
    fn test_interface_directions_differ() {
        let interface = EchoService::new().interface().unwrap();
        assert_ne!(interface.receives_hash(), interface.sends_hash());
        assert!(interface.receives().contains::<EchoRequest>());
        assert!(interface.sends().contains::<EchoReply>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_echo_over_connection() {
        let service = EchoService::new();
        service
            .modify(EchoConfig {
                prefix: "echo: ".to_string(),
            })
            .unwrap();

        let executor = Arc::new(ServiceExecutor::new(2));
        let replies = Arc::new(Mutex::new(Vec::new()));
        let (echo_port, client_port) = (free_port(), free_port());

        let echo = ManagedConnection::create(
            "echo-link",
            echo_port,
            &format!("127.0.0.1:{}", client_port),
            Arc::new(service.interface().unwrap()),
            executor.clone(),
            ConnectionConfig::default(),
        )
        .await
        .unwrap();
        let client = ManagedConnection::create(
            "echo-link",
            client_port,
            &format!("127.0.0.1:{}", echo_port),
            Arc::new(client_interface(replies.clone())),
            executor.clone(),
            ConnectionConfig::default(),
        )
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(10), client.wait_for_state(ConnectionState::Connected))
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(10), echo.wait_for_state(ConnectionState::Connected))
            .await
            .unwrap()
            .unwrap();

        client
            .handle()
            .send(&EchoRequest {
                text: "ping".to_string(),
            })
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while replies.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let replies = replies.lock().unwrap().clone();
        assert_eq!(
            replies,
            vec![EchoReply {
                text: "echo: ping".to_string(),
                sequence: 1
            }]
        );
        assert_eq!(service.echoed(), 1);

        client.terminate().await.unwrap();
        echo.terminate().await.unwrap();
    }
}
