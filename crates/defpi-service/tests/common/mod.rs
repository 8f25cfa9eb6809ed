// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for defpi-service integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use defpi_service::{
    ConfigField, ConfigSchema, ConfigView, ConnectionConfig, ConnectionHandle, ConnectionHandler,
    DefPiParams, FromConfigView, HandlerBinding, HeartbeatConfig, InterfaceBuilder, InterfaceInfo,
    RuntimeConfig, Service, ServiceRuntime, WireMessage,
};
use serde::{Deserialize, Serialize};

pub const PROCESS_ID: &str = "test-process";

pub const NOTES_DESCRIPTOR: &str = r#"syntax = "proto3"; message Note { string text = 1; }"#;

#[derive(Clone, PartialEq, prost::Message)]
pub struct Note {
    #[prost(string, tag = "1")]
    pub text: String,
}

impl WireMessage for Note {
    const TAG: u16 = 0x1001;
    const NAME: &'static str = "Note";
}

impl Note {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

/// Never sent by [`notes_interface`]; used to exercise undeclared-type errors.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Stray {
    #[prost(uint32, tag = "1")]
    pub value: u32,
}

impl WireMessage for Stray {
    const TAG: u16 = 0x1002;
    const NAME: &'static str = "Stray";
}

/// Thread-safe event log shared between a test and the code under test.
#[derive(Clone, Default)]
pub struct Events {
    inner: Arc<Mutex<Vec<String>>>,
}

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.inner.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.inner.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.inner.lock().unwrap().iter().filter(|e| *e == event).count()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.count(event) > 0
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Short timings so state changes happen within a test's patience.
pub fn fast_connection_config() -> ConnectionConfig {
    ConnectionConfig {
        receive_timeout: Duration::from_millis(50),
        send_timeout: Duration::from_millis(500),
        heartbeat: HeartbeatConfig {
            initial_delay: Duration::from_secs(30),
            period: Duration::from_secs(30),
        },
        handshake_max_tries: 40,
        backoff_initial: Duration::from_millis(50),
        backoff_max: Duration::from_millis(400),
        inbox_capacity: 64,
    }
}

struct NoteHandler {
    events: Events,
    handle: ConnectionHandle,
}

impl NoteHandler {
    fn on_note(&self, note: Note) -> anyhow::Result<()> {
        match note.text.as_str() {
            "boom" => panic!("handler asked to panic"),
            "fail" => anyhow::bail!("handler asked to fail"),
            _ => {}
        }
        self.events.push(format!("note:{}", note.text));
        if note.text == "echo" {
            self.handle.send(&Note::new("echoed"))?;
        }
        Ok(())
    }
}

impl ConnectionHandler for NoteHandler {
    fn on_suspend(&self) -> anyhow::Result<()> {
        self.events.push("on_suspend");
        Ok(())
    }

    fn resume_after_suspend(&self) -> anyhow::Result<()> {
        self.events.push("resume_after_suspend");
        Ok(())
    }

    fn on_interrupt(&self) -> anyhow::Result<()> {
        self.events.push("on_interrupt");
        Ok(())
    }

    fn resume_after_interrupt(&self) -> anyhow::Result<()> {
        self.events.push("resume_after_interrupt");
        Ok(())
    }

    fn terminated(&self) -> anyhow::Result<()> {
        self.events.push("terminated");
        Ok(())
    }
}

/// Symmetric interface: receives and sends [`Note`].
pub fn notes_interface(events: Events) -> InterfaceInfo {
    note_handler_interface(
        InterfaceInfo::builder("notes", "1.0.0")
            .descriptor(NOTES_DESCRIPTOR)
            .receives::<Note>()
            .unwrap(),
        events,
    )
}

/// Receives [`Note`] and [`Stray`], but only [`Note`] has a route.
pub fn partly_routed_interface(events: Events) -> InterfaceInfo {
    note_handler_interface(
        InterfaceInfo::builder("notes-and-strays", "1.0.0")
            .descriptor(NOTES_DESCRIPTOR)
            .receives::<Note>()
            .unwrap()
            .receives::<Stray>()
            .unwrap(),
        events,
    )
}

fn note_handler_interface(builder: InterfaceBuilder, events: Events) -> InterfaceInfo {
    builder
        .sends::<Note>()
        .unwrap()
        .handler(move |handle| {
            events.push("created");
            HandlerBinding::builder(NoteHandler {
                events: events.clone(),
                handle,
            })
            .on(NoteHandler::on_note)
            .build()
        })
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestConfig {
    pub key: String,
    pub fail: bool,
    pub retries: i32,
}

impl FromConfigView for TestConfig {
    fn schema() -> ConfigSchema {
        ConfigSchema::new([
            ConfigField::string("key"),
            ConfigField::bool("makeMeThrowAnError").with_default("false"),
            ConfigField::int("retries").with_default("3"),
        ])
    }

    fn from_view(view: &ConfigView) -> anyhow::Result<Self> {
        Ok(Self {
            key: view.string("key").unwrap_or_default().to_string(),
            fail: view.bool("makeMeThrowAnError").unwrap_or_default(),
            retries: view.int("retries").unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestState {
    pub counter: u64,
    pub label: String,
}

/// Service recording every lifecycle call.
#[derive(Clone, Default)]
pub struct TestService {
    pub events: Events,
}

impl Service for TestService {
    type Config = TestConfig;
    type State = TestState;

    fn init(&self, config: Option<TestConfig>, params: &DefPiParams) -> anyhow::Result<()> {
        if let Some(config) = &config {
            if config.fail {
                anyhow::bail!("init was asked to fail");
            }
        }
        self.events.push(format!(
            "init:{}:{}",
            config.map(|c| c.key).unwrap_or_else(|| "-".to_string()),
            params.process_id
        ));
        Ok(())
    }

    fn modify(&self, config: TestConfig) -> anyhow::Result<()> {
        if config.fail {
            anyhow::bail!("modify was asked to fail");
        }
        self.events.push(format!("modify:{}", config.key));
        Ok(())
    }

    fn suspend(&self) -> anyhow::Result<TestState> {
        self.events.push("suspend");
        Ok(TestState {
            counter: 3,
            label: "saved".to_string(),
        })
    }

    fn resume_from(&self, state: Option<TestState>) -> anyhow::Result<()> {
        match state {
            Some(state) => self.events.push(format!("resume:{}:{}", state.counter, state.label)),
            None => self.events.push("resume:none"),
        }
        Ok(())
    }

    fn terminate(&self) -> anyhow::Result<()> {
        self.events.push("terminate");
        Ok(())
    }
}

pub fn test_runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        control_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        control_read_timeout: Duration::from_secs(30),
        callback_timeout: Duration::from_secs(2),
        request_config: false,
        connection: fast_connection_config(),
        ..Default::default()
    }
}

/// Start a runtime on an ephemeral control port.
pub async fn start_runtime(service: TestService, interface_events: Events) -> ServiceRuntime<TestService> {
    ServiceRuntime::builder(service)
        .interface(notes_interface(interface_events))
        .params(DefPiParams::standalone(PROCESS_ID))
        .config(test_runtime_config())
        .build()
        .unwrap()
        .start()
        .await
        .unwrap()
}
