// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service interfaces and their capability hashes.
//!
//! An interface names the message types a connection may receive and send.
//! The orchestrator matches connection requests to interfaces by two hashes,
//! each computed over the interface description and the type names on one
//! side.

use std::fmt;
use std::sync::Arc;

use defpi_protocol::{FIRST_APPLICATION_TAG, MessageRegistry, WireMessage};
use sha2::{Digest, Sha256};

use crate::error::{Result, ServiceError};
use crate::managed_connection::ConnectionHandle;
use crate::service::HandlerBinding;

type HandlerFactory = Arc<dyn Fn(ConnectionHandle) -> HandlerBinding + Send + Sync>;

/// Lowercase hex SHA-256 of `descriptor_hash;type1;type2;...`.
///
/// Type names are hashed in the order they were declared.
pub fn interface_hash<'a>(descriptor_hash: &str, type_names: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(descriptor_hash.as_bytes());
    for name in type_names {
        hasher.update(b";");
        hasher.update(name.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Lowercase hex SHA-256 of an interface description document.
pub fn descriptor_hash(descriptor: &str) -> String {
    format!("{:x}", Sha256::digest(descriptor.as_bytes()))
}

/// One interface a service offers.
#[derive(Clone)]
pub struct InterfaceInfo {
    name: String,
    version: String,
    receives: MessageRegistry,
    sends: MessageRegistry,
    receives_hash: String,
    sends_hash: String,
    factory: HandlerFactory,
}

impl InterfaceInfo {
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> InterfaceBuilder {
        InterfaceBuilder {
            name: name.into(),
            version: version.into(),
            descriptor_hash: String::new(),
            receives: MessageRegistry::new(),
            receive_names: Vec::new(),
            sends: MessageRegistry::new(),
            send_names: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn receives(&self) -> &MessageRegistry {
        &self.receives
    }

    pub fn sends(&self) -> &MessageRegistry {
        &self.sends
    }

    pub fn receives_hash(&self) -> &str {
        &self.receives_hash
    }

    pub fn sends_hash(&self) -> &str {
        &self.sends_hash
    }

    /// Whether a connection request with these hashes belongs to this interface
    pub fn matches(&self, receive_hash: &str, send_hash: &str) -> bool {
        self.receives_hash == receive_hash && self.sends_hash == send_hash
    }

    /// Build the handler for a newly established connection
    pub fn create_handler(&self, handle: ConnectionHandle) -> HandlerBinding {
        (self.factory)(handle)
    }
}

impl fmt::Debug for InterfaceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceInfo")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("receives", &self.receives)
            .field("sends", &self.sends)
            .field("receives_hash", &self.receives_hash)
            .field("sends_hash", &self.sends_hash)
            .finish()
    }
}

pub struct InterfaceBuilder {
    name: String,
    version: String,
    descriptor_hash: String,
    receives: MessageRegistry,
    receive_names: Vec<&'static str>,
    sends: MessageRegistry,
    send_names: Vec<&'static str>,
}

impl InterfaceBuilder {
    /// Hash the interface description document.
    pub fn descriptor(mut self, descriptor: &str) -> Self {
        self.descriptor_hash = descriptor_hash(descriptor);
        self
    }

    /// Use a precomputed description hash.
    pub fn descriptor_hash(mut self, hash: impl Into<String>) -> Self {
        self.descriptor_hash = hash.into();
        self
    }

    pub fn receives<M: WireMessage>(mut self) -> Result<Self> {
        check_application_tag::<M>()?;
        if !self.receives.contains::<M>() {
            self.receives.register::<M>()?;
            self.receive_names.push(M::NAME);
        }
        Ok(self)
    }

    pub fn sends<M: WireMessage>(mut self) -> Result<Self> {
        check_application_tag::<M>()?;
        if !self.sends.contains::<M>() {
            self.sends.register::<M>()?;
            self.send_names.push(M::NAME);
        }
        Ok(self)
    }

    /// Finish with the factory that builds a handler per connection.
    pub fn handler<F>(self, factory: F) -> InterfaceInfo
    where
        F: Fn(ConnectionHandle) -> HandlerBinding + Send + Sync + 'static,
    {
        InterfaceInfo {
            receives_hash: interface_hash(&self.descriptor_hash, self.receive_names.iter().copied()),
            sends_hash: interface_hash(&self.descriptor_hash, self.send_names.iter().copied()),
            name: self.name,
            version: self.version,
            receives: self.receives,
            sends: self.sends,
            factory: Arc::new(factory),
        }
    }
}

fn check_application_tag<M: WireMessage>() -> Result<()> {
    if M::TAG < FIRST_APPLICATION_TAG {
        return Err(ServiceError::InvalidArgument(format!(
            "{} uses reserved tag {:#06x}",
            M::NAME,
            M::TAG
        )));
    }
    Ok(())
}
