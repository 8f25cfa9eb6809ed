// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tagged message codec.
//!
//! Every message type that may cross a channel implements [`WireMessage`] and
//! is registered in a [`MessageRegistry`]. Encoded messages are laid out as:
//! - 2 bytes: type tag (big-endian)
//! - N bytes: protobuf body
//!
//! The tag makes decoding unambiguous without any out-of-band type information,
//! and keeps every encoded message at least two bytes long so it can never be
//! mistaken for a heartbeat.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the type tag prefix
pub const TAG_SIZE: usize = 2;

/// A protobuf message with a stable wire tag.
pub trait WireMessage: prost::Message + Default + Send + Sync + 'static {
    /// Unique tag identifying this type on the wire
    const TAG: u16;
    /// Stable type name, used in logs and capability hashes
    const NAME: &'static str;
}

/// Errors raised by the codec
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encoding error: message type {0} is not registered")]
    Encoding(&'static str),

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("tag {tag:#06x} already registered for {existing}, cannot register {name}")]
    DuplicateTag {
        tag: u16,
        existing: &'static str,
        name: &'static str,
    },
}

type DecodeFn = fn(Bytes) -> Result<Box<dyn Any + Send + Sync>, prost::DecodeError>;

fn decode_boxed<M: WireMessage>(body: Bytes) -> Result<Box<dyn Any + Send + Sync>, prost::DecodeError> {
    Ok(Box::new(M::decode(body)?))
}

#[derive(Clone, Copy)]
struct Entry {
    type_id: TypeId,
    name: &'static str,
    decode: DecodeFn,
}

/// A decoded message whose concrete type is known only by its tag.
pub struct DecodedMessage {
    tag: u16,
    name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

impl DecodedMessage {
    pub fn tag(&self) -> u16 {
        self.tag
    }

    pub fn type_name(&self) -> &'static str {
        self.name
    }

    pub fn is<M: WireMessage>(&self) -> bool {
        self.value.is::<M>()
    }

    pub fn downcast_ref<M: WireMessage>(&self) -> Option<&M> {
        self.value.downcast_ref::<M>()
    }

    /// Take the concrete message out, or give the envelope back on a type mismatch.
    pub fn downcast<M: WireMessage>(self) -> Result<M, Self> {
        let DecodedMessage { tag, name, value } = self;
        match value.downcast::<M>() {
            Ok(message) => Ok(*message),
            Err(value) => Err(DecodedMessage { tag, name, value }),
        }
    }
}

impl fmt::Debug for DecodedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedMessage")
            .field("tag", &format_args!("{:#06x}", self.tag))
            .field("name", &self.name)
            .finish()
    }
}

/// Maps message types to wire tags and back.
#[derive(Clone, Default)]
pub struct MessageRegistry {
    tags: HashMap<TypeId, u16>,
    entries: HashMap<u16, Entry>,
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message type.
    ///
    /// Registering the same type twice is a no-op; a different type claiming an
    /// already used tag is rejected.
    pub fn register<M: WireMessage>(&mut self) -> Result<(), CodecError> {
        if let Some(existing) = self.entries.get(&M::TAG) {
            if existing.type_id == TypeId::of::<M>() {
                return Ok(());
            }
            return Err(CodecError::DuplicateTag {
                tag: M::TAG,
                existing: existing.name,
                name: M::NAME,
            });
        }
        self.insert::<M>();
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<M: WireMessage>(mut self) -> Result<Self, CodecError> {
        self.register::<M>()?;
        Ok(self)
    }

    pub(crate) fn insert<M: WireMessage>(&mut self) {
        self.tags.insert(TypeId::of::<M>(), M::TAG);
        self.entries.insert(
            M::TAG,
            Entry {
                type_id: TypeId::of::<M>(),
                name: M::NAME,
                decode: decode_boxed::<M>,
            },
        );
    }

    pub fn contains<M: WireMessage>(&self) -> bool {
        self.tags.contains_key(&TypeId::of::<M>())
    }

    pub fn contains_tag(&self, tag: u16) -> bool {
        self.entries.contains_key(&tag)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Registered type names in tag order
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.entries.keys().copied().collect();
        tags.sort_unstable();
        tags.iter().map(|tag| self.entries[tag].name).collect()
    }

    /// Encode a registered message
    pub fn encode<M: WireMessage>(&self, message: &M) -> Result<Bytes, CodecError> {
        let tag = self
            .tags
            .get(&TypeId::of::<M>())
            .copied()
            .ok_or(CodecError::Encoding(M::NAME))?;

        let mut buf = BytesMut::with_capacity(TAG_SIZE + message.encoded_len());
        buf.put_u16(tag);
        message
            .encode(&mut buf)
            .map_err(|_| CodecError::Encoding(M::NAME))?;
        Ok(buf.freeze())
    }

    /// Decode any registered message
    pub fn decode(&self, payload: &[u8]) -> Result<DecodedMessage, CodecError> {
        if payload.len() < TAG_SIZE {
            return Err(CodecError::Decoding(format!(
                "payload of {} bytes is shorter than the type tag",
                payload.len()
            )));
        }

        let mut bytes = Bytes::copy_from_slice(payload);
        let tag = bytes.get_u16();
        let entry = self
            .entries
            .get(&tag)
            .ok_or_else(|| CodecError::Decoding(format!("unknown type tag {:#06x}", tag)))?;

        let value = (entry.decode)(bytes)
            .map_err(|e| CodecError::Decoding(format!("{}: {}", entry.name, e)))?;

        Ok(DecodedMessage {
            tag,
            name: entry.name,
            value,
        })
    }

    /// Decode a payload that must be of type `M`
    pub fn decode_as<M: WireMessage>(&self, payload: &[u8]) -> Result<M, CodecError> {
        self.decode(payload)?.downcast::<M>().map_err(|other| {
            CodecError::Decoding(format!("expected {}, got {}", M::NAME, other.type_name()))
        })
    }
}
