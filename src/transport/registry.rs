//! Protocol registry.
//!
//! Maps a protocol id to the descriptor of that protocol's message set, so an
//! inbound `(protocol_id, message_index)` pair can be turned back into a typed
//! message. Each protocol module registers itself once at startup; after that
//! the registry is shared read-only (usually behind an `Arc`) by every
//! connection that needs to decode.
//!
//! # Example
//! ```rust
//! use sdms::transport::{MessageId, ProtocolRegistry};
//!
//! let mut registry = ProtocolRegistry::new();
//! let id = sdms::protocol::register(&mut registry).unwrap();
//!
//! assert!(registry.resolve(MessageId::new(id, 0)).is_some());
//! assert!(registry.resolve(MessageId::new(id + 1, 0)).is_none());
//! ```
use std::{collections::BTreeMap, fmt};

use log::debug;

use super::{
    Message, MessageId, TypedMessage,
    error::{CodecError, RegistryError},
    message::parse_payload,
};

/// Construct-and-parse entry for one message type.
#[derive(Clone, Copy)]
pub struct MessageDescriptor {
    id: MessageId,
    name: &'static str,
    construct: fn() -> Box<dyn Message>,
    parse: fn(&[u8]) -> Result<Box<dyn Message>, CodecError>,
}

impl MessageDescriptor {
    pub fn of<T: TypedMessage>() -> Self {
        Self {
            id: T::id(),
            name: T::NAME,
            construct: construct_default::<T>,
            parse: parse_boxed::<T>,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A zero-valued instance of the message type.
    pub fn construct(&self) -> Box<dyn Message> {
        (self.construct)()
    }

    pub fn parse(&self, bytes: &[u8]) -> Result<Box<dyn Message>, CodecError> {
        (self.parse)(bytes)
    }
}

impl fmt::Debug for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn construct_default<T: TypedMessage>() -> Box<dyn Message> {
    Box::new(T::default())
}

fn parse_boxed<T: TypedMessage>(bytes: &[u8]) -> Result<Box<dyn Message>, CodecError> {
    Ok(Box::new(parse_payload::<T>(bytes)?))
}

/// The ordered message set of one protocol. Message indices are positions in
/// this list.
#[derive(Debug, Clone)]
pub struct ProtocolDescriptor {
    name: &'static str,
    id: Option<u16>,
    messages: Vec<MessageDescriptor>,
}

impl ProtocolDescriptor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            id: None,
            messages: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: u16) -> Self {
        self.id = Some(id);
        self
    }

    /// Appends `T` at the next message index.
    pub fn message<T: TypedMessage>(mut self) -> Self {
        self.messages.push(MessageDescriptor::of::<T>());
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn id(&self) -> Option<u16> {
        self.id
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn message_at(&self, index: u16) -> Option<&MessageDescriptor> {
        self.messages.get(index as usize)
    }

    pub fn messages(&self) -> &[MessageDescriptor] {
        &self.messages
    }

    fn validate(&self, id: u16) -> Result<(), RegistryError> {
        if self.messages.len() > u16::MAX as usize {
            return Err(RegistryError::TooManyMessages {
                name: self.name,
                count: self.messages.len(),
            });
        }

        for (index, message) in self.messages.iter().enumerate() {
            let expected = MessageId::new(id, index as u16);
            if message.id != expected {
                return Err(RegistryError::MisplacedMessage {
                    name: message.name,
                    declared: message.id,
                    expected,
                });
            }
        }
        Ok(())
    }
}

/// Append-only map of protocol id to descriptor.
#[derive(Debug, Default)]
pub struct ProtocolRegistry {
    protocols: BTreeMap<u16, ProtocolDescriptor>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a protocol and returns its id. The registry is left untouched when
    /// registration fails.
    pub fn register(&mut self, protocol: ProtocolDescriptor) -> Result<u16, RegistryError> {
        let id = protocol
            .id
            .ok_or(RegistryError::MissingId {
                name: protocol.name,
            })?;

        if self.protocols.contains_key(&id) {
            return Err(RegistryError::DuplicateId { id });
        }
        protocol.validate(id)?;

        debug!(
            "registered protocol '{}' as {id} with {} messages",
            protocol.name,
            protocol.messages.len()
        );
        self.protocols.insert(id, protocol);
        Ok(id)
    }

    pub fn resolve(&self, id: MessageId) -> Option<&MessageDescriptor> {
        self.protocols
            .get(&id.protocol_id)
            .and_then(|protocol| protocol.message_at(id.message_index))
    }

    /// Index of the message called `name` within a registered protocol.
    pub fn find_message(&self, protocol_id: u16, name: &str) -> Result<u16, RegistryError> {
        let protocol = self
            .protocols
            .get(&protocol_id)
            .ok_or(RegistryError::UnknownProtocol(protocol_id))?;

        protocol
            .messages
            .iter()
            .position(|m| m.name == name)
            .map(|index| index as u16)
            .ok_or_else(|| RegistryError::UnknownMessage {
                protocol_id,
                name: name.to_string(),
            })
    }

    pub fn protocol(&self, id: u16) -> Option<&ProtocolDescriptor> {
        self.protocols.get(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.protocols.contains_key(&id)
    }

    pub fn protocol_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.protocols.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }
}
