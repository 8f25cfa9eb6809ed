// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Self-healing data connection between two processes.
//!
//! Each connection owns one listening socket, on which the peer's publisher
//! delivers frames, and one outbound publisher socket to the peer's listener.
//! A single task drives the state machine:
//!
//! ```text
//! STARTING ──handshake──▶ CONNECTED ──send error / peer closed / no pong──▶ INTERRUPTED
//!    │  ▲                    ▲  │                                             │
//!    └──┘ backoff            │  └───────────────suspend──▶ SUSPENDED          │
//!                            └─────handshake───────────────┴──────────────────┘
//! ```
//!
//! Any state moves to TERMINATED on an explicit terminate. Commands from the
//! connection manager are selected against every wait, so a suspend or
//! terminate never blocks behind a reconnect attempt.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use defpi_protocol::frame::write_frame;
use defpi_protocol::{
    ConnectionHandshake, ConnectionState, Frame, FramedStream, FrameError, HEARTBEAT_LENGTH,
    Heartbeat, MessageRegistry, WireMessage, bind_reusable, handshake_registry,
};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

use crate::backoff::Backoff;
use crate::config::ConnectionConfig;
use crate::error::{Result, ServiceError};
use crate::executor::ServiceExecutor;
use crate::handshake::{HandshakeConfig, HandshakeMonitor, HandshakeTransport};
use crate::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::interface::InterfaceInfo;
use crate::service::{ConnectionHandler, HandlerBinding};

const LISTEN_BACKLOG: u32 = 16;

/// Handed to connection handlers for sending on their connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: String,
    sends: MessageRegistry,
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl ConnectionHandle {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Queue a message for the peer.
    ///
    /// Delivery is at most once: a transport failure after the message has
    /// been queued interrupts the connection and the message is lost.
    pub fn send<M: WireMessage>(&self, message: &M) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(ServiceError::IllegalState(format!(
                "cannot send on connection {} while {:?}",
                self.inner.id, state
            )));
        }
        if !self.inner.sends.contains::<M>() {
            return Err(ServiceError::InvalidArgument(format!(
                "{} is not an outbound type of connection {}",
                M::NAME,
                self.inner.id
            )));
        }

        let payload = self.inner.sends.encode(message)?;
        self.inner
            .outbound
            .send(payload)
            .map_err(|_| ServiceError::IllegalState(format!("connection {} is closed", self.inner.id)))
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

enum CommandKind {
    Suspend,
    Resume { listen_port: u16, target: String },
    Terminate,
}

struct Command {
    kind: CommandKind,
    reply: oneshot::Sender<Result<ConnectionState>>,
}

/// One data connection and the task driving it.
pub struct ManagedConnection {
    handle: ConnectionHandle,
    listen_addr: watch::Receiver<Option<SocketAddr>>,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl ManagedConnection {
    /// Bind the listening socket and start connecting to `target`.
    ///
    /// A listen port of 0 picks an ephemeral port. Failing to bind is the only
    /// error; an unreachable peer is retried in the background.
    pub async fn create(
        id: impl Into<String>,
        listen_port: u16,
        target: &str,
        interface: Arc<InterfaceInfo>,
        executor: Arc<ServiceExecutor>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let id = id.into();
        let listener = bind_data_listener(listen_port)?;
        let local_addr = listener.local_addr()?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Starting);
        let (listen_addr_tx, listen_addr) = watch::channel(Some(local_addr));
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::channel(8);
        let (inbox_tx, inbox) = mpsc::channel(config.inbox_capacity.max(1));

        let handle = ConnectionHandle {
            inner: Arc::new(HandleInner {
                id: id.clone(),
                sends: interface.sends().clone(),
                state: state_rx,
                outbound: outbound_tx,
            }),
        };

        info!(
            connection_id = %id,
            interface = %interface.name(),
            listen_addr = %local_addr,
            target = %target,
            "Creating connection"
        );

        let acceptor = spawn_acceptor(listener, inbox_tx.clone(), id.clone());
        let handshake = HandshakeMonitor::new(
            id.clone(),
            HandshakeConfig {
                receive_timeout: config.receive_timeout,
                max_tries: config.handshake_max_tries,
            },
        );

        let actor = ConnectionActor {
            backoff: Backoff::new(config.backoff_initial, config.backoff_max),
            id,
            interface,
            executor,
            config,
            handle: handle.clone(),
            handshake,
            state_tx,
            listen_addr_tx,
            commands,
            outbound,
            inbox,
            inbox_tx,
            acceptor: Some(acceptor),
            publisher: None,
            target: Some(normalize_target(target)),
            binding: None,
        };
        let task = tokio::spawn(actor.run());

        Ok(Self {
            handle,
            listen_addr,
            commands: command_tx,
            task,
        })
    }

    pub fn id(&self) -> &str {
        self.handle.id()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Address of the listening socket; `None` while suspended.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        *self.listen_addr.borrow()
    }

    /// Wait until the connection reaches `wanted`.
    pub async fn wait_for_state(&self, wanted: ConnectionState) -> Result<()> {
        let mut state = self.handle.inner.state.clone();
        let reached = state.wait_for(|s| *s == wanted).await.is_ok();
        if reached {
            Ok(())
        } else {
            Err(ServiceError::IllegalState(format!("connection {} task stopped", self.id())))
        }
    }

    /// Close both sockets and wait for a resume.
    pub async fn suspend(&self) -> Result<ConnectionState> {
        self.command(CommandKind::Suspend).await
    }

    /// Rebind on `listen_port` and reconnect to `target`. Only valid while suspended.
    pub async fn resume(&self, listen_port: u16, target: &str) -> Result<ConnectionState> {
        self.command(CommandKind::Resume {
            listen_port,
            target: normalize_target(target),
        })
        .await
    }

    /// Terminate the connection and wait for its task to finish.
    pub async fn terminate(self) -> Result<ConnectionState> {
        let state = match self.command(CommandKind::Terminate).await {
            Ok(state) => state,
            // Task already gone
            Err(ServiceError::IllegalState(_)) => ConnectionState::Terminated,
            Err(e) => return Err(e),
        };
        if let Err(e) = self.task.await {
            warn!(error = %e, "Connection task ended abnormally");
        }
        Ok(state)
    }

    async fn command(&self, kind: CommandKind) -> Result<ConnectionState> {
        let stopped = || ServiceError::IllegalState(format!("connection {} task stopped", self.id()));
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command { kind, reply })
            .await
            .map_err(|_| stopped())?;
        response.await.map_err(|_| stopped())?
    }
}

impl std::fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("listen_addr", &self.listen_addr())
            .finish()
    }
}

fn normalize_target(target: &str) -> String {
    target.strip_prefix("tcp://").unwrap_or(target).to_string()
}

fn bind_data_listener(port: u16) -> Result<TcpListener> {
    Ok(bind_reusable(SocketAddr::from(([0, 0, 0, 0], port)), LISTEN_BACKLOG)?)
}

/// Accept peer publishers and feed their frames into the inbox.
fn spawn_acceptor(listener: TcpListener, inbox: mpsc::Sender<Bytes>, connection_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut readers = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(connection_id = %connection_id, %peer, "Accepted data channel");
                        let _ = stream.set_nodelay(true);
                        readers.spawn(forward_frames(stream, inbox.clone()));
                    }
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Failed to accept data channel");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(_) = readers.join_next(), if !readers.is_empty() => {}
            }
        }
    })
}

async fn forward_frames(stream: TcpStream, inbox: mpsc::Sender<Bytes>) {
    let mut framed = FramedStream::new(stream);
    loop {
        match framed.read_frame().await {
            Ok(frame) => {
                if inbox.send(frame.payload).await.is_err() {
                    return;
                }
            }
            Err(FrameError::ConnectionClosed) => return,
            Err(e) => {
                debug!(error = %e, "Data channel read failed");
                return;
            }
        }
    }
}

/// Outbound socket to the peer's listener.
struct Publisher {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl Publisher {
    async fn connect(target: &str, timeout: Duration) -> Result<Self> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(ServiceError::Timeout {
                    operation: "connect",
                    timeout,
                });
            }
        };
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Ok(Self { reader, writer })
    }

    async fn write(&mut self, frame: &Frame, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, write_frame(&mut self.writer, frame)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ServiceError::Timeout {
                operation: "send",
                timeout,
            }),
        }
    }
}

/// The data channel as seen by the handshake.
struct DataChannel<'a> {
    publisher: &'a mut Publisher,
    inbox: &'a mut mpsc::Receiver<Bytes>,
    send_timeout: Duration,
}

#[async_trait]
impl<'a> HandshakeTransport for DataChannel<'a> {
    async fn send(&mut self, payload: Bytes) -> Result<()> {
        let frame = Frame::new(payload)?;
        self.publisher.write(&frame, self.send_timeout).await
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        match tokio::time::timeout(timeout, self.inbox.recv()).await {
            Ok(Some(payload)) => Ok(Some(payload)),
            Ok(None) => Err(ServiceError::IllegalState("inbox closed".to_string())),
            Err(_) => Ok(None),
        }
    }
}

/// State owned by the connection task.
struct ConnectionActor {
    id: String,
    interface: Arc<InterfaceInfo>,
    executor: Arc<ServiceExecutor>,
    config: ConnectionConfig,
    handle: ConnectionHandle,
    handshake: HandshakeMonitor,
    backoff: Backoff,
    state_tx: watch::Sender<ConnectionState>,
    listen_addr_tx: watch::Sender<Option<SocketAddr>>,
    commands: mpsc::Receiver<Command>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    inbox: mpsc::Receiver<Bytes>,
    inbox_tx: mpsc::Sender<Bytes>,
    acceptor: Option<JoinHandle<()>>,
    publisher: Option<Publisher>,
    target: Option<String>,
    binding: Option<HandlerBinding>,
}

impl ConnectionActor {
    #[instrument(skip(self), fields(connection_id = %self.id))]
    async fn run(mut self) {
        loop {
            match self.state() {
                ConnectionState::Terminated => break,
                ConnectionState::Connected => self.serve().await,
                ConnectionState::Suspended if self.target.is_none() => self.wait_for_resume().await,
                _ => self.establish().await,
            }
        }
        self.close_sockets();
        debug!("Connection task stopped");
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(connection_id = %self.id, from = ?previous, to = ?state, "Connection state changed");
        }
    }

    /// One connect-and-handshake attempt, followed by a backoff on failure.
    async fn establish(&mut self) {
        let Some(target) = self.target.clone() else {
            self.wait_for_resume().await;
            return;
        };
        let from = self.state();

        let attempt = tokio::select! {
            biased;
            command = self.commands.recv() => {
                self.on_command(command).await;
                return;
            }
            publisher = Self::attempt(
                &self.handshake,
                &mut self.inbox,
                &target,
                self.config.send_timeout,
                from,
            ) => publisher,
        };

        match attempt {
            Some(publisher) => self.on_established(publisher, from),
            None => {
                let delay = self.backoff.next_delay();
                debug!(connection_id = %self.id, target = %target, ?delay, "Handshake failed, backing off");
                tokio::select! {
                    biased;
                    command = self.commands.recv() => self.on_command(command).await,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    async fn attempt(
        handshake: &HandshakeMonitor,
        inbox: &mut mpsc::Receiver<Bytes>,
        target: &str,
        send_timeout: Duration,
        state: ConnectionState,
    ) -> Option<Publisher> {
        let mut publisher = match Publisher::connect(target, send_timeout).await {
            Ok(publisher) => publisher,
            Err(e) => {
                debug!(connection_id = %handshake.connection_id(), target, error = %e, "Peer not reachable");
                return None;
            }
        };

        let mut channel = DataChannel {
            publisher: &mut publisher,
            inbox,
            send_timeout,
        };
        if handshake.shake_hands(&mut channel, state).await {
            Some(publisher)
        } else {
            None
        }
    }

    fn on_established(&mut self, publisher: Publisher, from: ConnectionState) {
        self.publisher = Some(publisher);
        self.backoff.reset();

        if self.binding.is_none() {
            self.binding = Some(self.interface.create_handler(self.handle.clone()));
        }
        self.set_state(ConnectionState::Connected);

        match from {
            ConnectionState::Interrupted => {
                self.notify("resume_after_interrupt", |h| h.resume_after_interrupt())
            }
            ConnectionState::Suspended => self.notify("resume_after_suspend", |h| h.resume_after_suspend()),
            _ => {}
        }
    }

    /// Pump the established channel until it breaks or a command moves us on.
    async fn serve(&mut self) {
        let mut heartbeat = HeartbeatMonitor::start(&self.config.heartbeat);
        let mut scratch = [0u8; 64];

        while self.state() == ConnectionState::Connected {
            let Some(publisher) = self.publisher.as_mut() else {
                self.interrupt("publisher missing");
                return;
            };

            tokio::select! {
                biased;
                command = self.commands.recv() => self.on_command(command).await,
                Some(payload) = self.inbox.recv() => self.on_inbound(payload, &mut heartbeat).await,
                Some(payload) = self.outbound.recv() => self.on_outbound(payload).await,
                action = heartbeat.tick() => match action {
                    HeartbeatAction::SendPing => {
                        self.write_or_interrupt(Frame::heartbeat(Heartbeat::Ping)).await;
                    }
                    HeartbeatAction::Expired => self.interrupt("heartbeat expired"),
                },
                read = publisher.reader.read(&mut scratch) => match read {
                    Ok(0) => self.interrupt("peer closed the channel"),
                    Err(_) => self.interrupt("peer reset the channel"),
                    // The peer never writes on this socket
                    Ok(_) => {}
                },
            }
        }
    }

    async fn on_inbound(&mut self, payload: Bytes, heartbeat: &mut HeartbeatMonitor) {
        if payload.len() == HEARTBEAT_LENGTH {
            match Heartbeat::from_byte(payload[0]) {
                Some(Heartbeat::Ping) => self.write_or_interrupt(Frame::heartbeat(Heartbeat::Pong)).await,
                Some(Heartbeat::Pong) => heartbeat.pong_received(),
                None => warn!(connection_id = %self.id, byte = payload[0], "Unknown heartbeat byte"),
            }
            return;
        }

        if payload.len() >= 2 && u16::from_be_bytes([payload[0], payload[1]]) == ConnectionHandshake::TAG {
            self.on_peer_handshake(&payload).await;
            return;
        }

        let decoded = match self.interface.receives().decode(&payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "Dropping undecodable message");
                return;
            }
        };

        let route = self.binding.as_ref().and_then(|b| b.route(decoded.tag()));
        match route {
            Some(route) => self.executor.spawn("handle message", move || route(decoded)),
            None => warn!(
                connection_id = %self.id,
                message_type = decoded.type_name(),
                "No handler registered for message type"
            ),
        }
    }

    /// The peer restarted its side and is handshaking again; answer it.
    async fn on_peer_handshake(&mut self, payload: &[u8]) {
        let received = match handshake_registry().decode_as::<ConnectionHandshake>(payload) {
            Ok(received) => received,
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "Invalid handshake");
                return;
            }
        };
        if received.connection_id != self.id {
            warn!(connection_id = %self.id, received_id = %received.connection_id, "Handshake for another connection");
            return;
        }
        if received.connection_state() == ConnectionState::Connected {
            return;
        }

        debug!(connection_id = %self.id, peer_state = ?received.connection_state(), "Peer handshaking, replying");
        match self.handshake.handshake_payload(ConnectionState::Connected) {
            Ok(reply) => self.write_or_interrupt(Frame { payload: reply }).await,
            Err(e) => warn!(connection_id = %self.id, error = %e, "Failed to encode handshake reply"),
        }
    }

    async fn on_outbound(&mut self, payload: Bytes) {
        match Frame::new(payload) {
            Ok(frame) => self.write_or_interrupt(frame).await,
            Err(e) => warn!(connection_id = %self.id, error = %e, "Dropping outbound message"),
        }
    }

    async fn write_or_interrupt(&mut self, frame: Frame) {
        let Some(publisher) = self.publisher.as_mut() else {
            return;
        };
        if let Err(e) = publisher.write(&frame, self.config.send_timeout).await {
            debug!(connection_id = %self.id, error = %e, "Write to peer failed");
            self.interrupt("send failed");
        }
    }

    /// Leave CONNECTED. No-op in any other state.
    fn interrupt(&mut self, reason: &'static str) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        warn!(connection_id = %self.id, reason, "Connection interrupted");
        self.publisher = None;

        let mut dropped = 0usize;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(connection_id = %self.id, dropped, "Discarded queued outbound messages");
        }

        self.set_state(ConnectionState::Interrupted);
        self.notify("on_interrupt", |h| h.on_interrupt());
    }

    async fn wait_for_resume(&mut self) {
        let command = self.commands.recv().await;
        self.on_command(command).await;
    }

    async fn on_command(&mut self, command: Option<Command>) {
        let Some(Command { kind, reply }) = command else {
            debug!(connection_id = %self.id, "Connection dropped without terminate");
            self.close_sockets();
            self.set_state(ConnectionState::Terminated);
            return;
        };

        let result = match kind {
            CommandKind::Suspend => Ok(self.suspend()),
            CommandKind::Resume { listen_port, target } => self.resume(listen_port, target),
            CommandKind::Terminate => Ok(self.terminate()),
        };
        let _ = reply.send(result);
    }

    fn suspend(&mut self) -> ConnectionState {
        if self.state() != ConnectionState::Suspended {
            self.notify("on_suspend", |h| h.on_suspend());
            self.close_sockets();
            self.target = None;
            self.set_state(ConnectionState::Suspended);
        }
        ConnectionState::Suspended
    }

    fn resume(&mut self, listen_port: u16, target: String) -> Result<ConnectionState> {
        let state = self.state();
        if state != ConnectionState::Suspended {
            return Err(ServiceError::IllegalState(format!(
                "cannot resume connection {} while {:?}",
                self.id, state
            )));
        }

        let listener = bind_data_listener(listen_port)?;
        let local_addr = listener.local_addr()?;
        self.acceptor = Some(spawn_acceptor(listener, self.inbox_tx.clone(), self.id.clone()));
        self.listen_addr_tx.send_replace(Some(local_addr));
        info!(connection_id = %self.id, listen_addr = %local_addr, target = %target, "Resuming connection");
        self.target = Some(target);
        Ok(state)
    }

    fn terminate(&mut self) -> ConnectionState {
        self.notify("terminated", |h| h.terminated());
        self.close_sockets();
        self.target = None;
        self.set_state(ConnectionState::Terminated);
        ConnectionState::Terminated
    }

    /// Release both sockets and discard anything still queued.
    fn close_sockets(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
        self.publisher = None;
        self.listen_addr_tx.send_replace(None);
        while self.inbox.try_recv().is_ok() {}
        while self.outbound.try_recv().is_ok() {}
    }

    /// Run a lifecycle callback on the handler, once one exists.
    fn notify(&self, operation: &'static str, callback: fn(&dyn ConnectionHandler) -> anyhow::Result<()>) {
        if let Some(binding) = &self.binding {
            let handler = binding.handler().clone();
            self.executor.spawn(operation, move || callback(handler.as_ref()));
        }
    }
}

impl Drop for ConnectionActor {
    fn drop(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_target() {
        assert_eq!(normalize_target("tcp://10.0.0.1:5000"), "10.0.0.1:5000");
        assert_eq!(normalize_target("peer:5000"), "peer:5000");
    }

    #[tokio::test]
    async fn test_data_channel_receive_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut publisher = Publisher::connect(&addr.to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        let (_tx, mut inbox) = mpsc::channel(4);

        let mut channel = DataChannel {
            publisher: &mut publisher,
            inbox: &mut inbox,
            send_timeout: Duration::from_secs(1),
        };
        assert!(channel.receive(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_acceptor_forwards_frames() {
        let listener = bind_data_listener(0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, mut inbox) = mpsc::channel(4);
        let acceptor = spawn_acceptor(listener, tx, "conn".to_string());

        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut framed = FramedStream::new(stream);
        framed.write_payload(Bytes::from_static(b"hello")).await.unwrap();
        framed.write_frame(&Frame::heartbeat(Heartbeat::Ping)).await.unwrap();

        assert_eq!(inbox.recv().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(inbox.recv().await.unwrap(), Bytes::from_static(&[defpi_protocol::PING]));
        acceptor.abort();
    }
}
