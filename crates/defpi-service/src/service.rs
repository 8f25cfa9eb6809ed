// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Contract between the runtime and the hosted service.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use defpi_protocol::{DecodedMessage, WireMessage};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::DefPiParams;
use crate::service_config::FromConfigView;

/// Lifecycle callbacks of a hosted service.
///
/// Callbacks run on the runtime's blocking executor, one at a time by default,
/// and are bounded by the callback timeout.
pub trait Service: Send + Sync + 'static {
    /// Typed configuration, decoded from the orchestrator's key/value map
    type Config: FromConfigView;
    /// Opaque state handed back to the orchestrator on suspend
    type State: Serialize + DeserializeOwned + Send + 'static;

    /// First start. `config` is `None` when the orchestrator forces the
    /// process to RUNNING without sending configuration.
    fn init(&self, config: Option<Self::Config>, params: &DefPiParams) -> anyhow::Result<()>;

    /// Configuration update on an already initialized service.
    fn modify(&self, config: Self::Config) -> anyhow::Result<()>;

    /// Capture state before the process is suspended.
    fn suspend(&self) -> anyhow::Result<Self::State>;

    /// Restore from a previously suspended state, if any was stored.
    fn resume_from(&self, state: Option<Self::State>) -> anyhow::Result<()>;

    fn terminate(&self) -> anyhow::Result<()>;
}

/// Per-connection lifecycle callbacks.
///
/// Every method defaults to a no-op.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn on_suspend(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn resume_after_suspend(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_interrupt(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn resume_after_interrupt(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn terminated(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Dispatch function for one inbound message type
pub type Route = Arc<dyn Fn(DecodedMessage) -> anyhow::Result<()> + Send + Sync>;

/// A connection handler plus its inbound message routes, keyed by wire tag.
#[derive(Clone)]
pub struct HandlerBinding {
    handler: Arc<dyn ConnectionHandler>,
    routes: HashMap<u16, Route>,
}

impl HandlerBinding {
    pub fn builder<H: ConnectionHandler>(handler: H) -> HandlerBindingBuilder<H> {
        HandlerBindingBuilder {
            handler: Arc::new(handler),
            routes: HashMap::new(),
        }
    }

    pub fn handler(&self) -> &Arc<dyn ConnectionHandler> {
        &self.handler
    }

    /// The route for a wire tag, if the handler registered one
    pub fn route(&self, tag: u16) -> Option<Route> {
        self.routes.get(&tag).cloned()
    }

    pub fn handles(&self, tag: u16) -> bool {
        self.routes.contains_key(&tag)
    }
}

impl fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.routes.keys().collect();
        tags.sort_unstable();
        f.debug_struct("HandlerBinding").field("routes", &tags).finish()
    }
}

/// Builds a [`HandlerBinding`] by registering one function per inbound type.
pub struct HandlerBindingBuilder<H> {
    handler: Arc<H>,
    routes: HashMap<u16, Route>,
}

impl<H: ConnectionHandler> HandlerBindingBuilder<H> {
    /// Route messages of type `M` to `f`. A later registration for the same
    /// type replaces the earlier one.
    pub fn on<M, F>(mut self, f: F) -> Self
    where
        M: WireMessage,
        F: Fn(&H, M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler = self.handler.clone();
        let route: Route = Arc::new(move |decoded: DecodedMessage| {
            let message = decoded.downcast::<M>().map_err(|other| {
                anyhow::anyhow!("expected {}, got {}", M::NAME, other.type_name())
            })?;
            f(&handler, message)
        });
        self.routes.insert(M::TAG, route);
        self
    }

    pub fn build(self) -> HandlerBinding {
        HandlerBinding {
            handler: self.handler,
            routes: self.routes,
        }
    }
}
