//! Typed messages and their wire identity.
//!
//! Every message type belongs to exactly one protocol and sits at a fixed index
//! within that protocol's message set. The pair is a [`MessageId`] and is the
//! only type information that travels on the wire; the receiving side resolves
//! it through a [`ProtocolRegistry`](super::ProtocolRegistry) to find a parser.
//!
//! Protocol modules describe their messages by implementing [`TypedMessage`].
//! The transport itself only ever handles `dyn Message`, which every
//! `TypedMessage` implements.
use std::{any::Any, fmt};

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
    enc::write::SizeWriter,
};

use super::error::CodecError;

pub(crate) type WireConfig = Configuration<BigEndian, Fixint>;

/// Integer layout shared by frame headers and payloads.
pub(crate) fn wire_config() -> WireConfig {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Identifies a message type (not an instance) across all registered protocols.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    pub protocol_id: u16,
    pub message_index: u16,
}

impl MessageId {
    pub const fn new(protocol_id: u16, message_index: u16) -> Self {
        Self {
            protocol_id,
            message_index,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.protocol_id, self.message_index)
    }
}

/// Schema of a concrete message type.
///
/// `PROTOCOL_ID` and `INDEX` must match the position the type is given when its
/// protocol is registered; registration rejects a mismatch.
pub trait TypedMessage: Encode + Decode<()> + Default + fmt::Debug + Send + 'static {
    const PROTOCOL_ID: u16;
    const INDEX: u16;
    const NAME: &'static str;

    /// Rejects instances lacking content the schema marks as required.
    fn check_required(&self) -> Result<(), CodecError> {
        Ok(())
    }

    fn id() -> MessageId {
        MessageId::new(Self::PROTOCOL_ID, Self::INDEX)
    }
}

/// Object-safe view of a [`TypedMessage`] used by the transport.
pub trait Message: Any + fmt::Debug + Send {
    fn message_id(&self) -> MessageId;

    fn name(&self) -> &'static str;

    /// Exact serialized length of the payload. Fails when required content is
    /// missing.
    fn encoded_len(&self) -> Result<usize, CodecError>;

    /// Serializes the payload into `dst`, returning the number of bytes written.
    fn encode_into(&self, dst: &mut [u8]) -> Result<usize, CodecError>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: TypedMessage> Message for T {
    fn message_id(&self) -> MessageId {
        T::id()
    }

    fn name(&self) -> &'static str {
        T::NAME
    }

    fn encoded_len(&self) -> Result<usize, CodecError> {
        self.check_required()?;
        let mut size = SizeWriter::default();
        bincode::encode_into_writer(self, &mut size, wire_config())?;
        Ok(size.bytes_written)
    }

    fn encode_into(&self, dst: &mut [u8]) -> Result<usize, CodecError> {
        self.check_required()?;
        Ok(bincode::encode_into_slice(self, dst, wire_config())?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl dyn Message {
    pub fn is<T: TypedMessage>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: TypedMessage>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Recovers the concrete message, handing the box back untouched when the
    /// type does not match.
    pub fn downcast<T: TypedMessage>(self: Box<Self>) -> Result<Box<T>, Box<dyn Message>> {
        if self.is::<T>() {
            match self.into_any().downcast::<T>() {
                Ok(message) => Ok(message),
                Err(_) => unreachable!("type checked above"),
            }
        } else {
            Err(self)
        }
    }
}

/// Parses a complete payload; every byte must be consumed and required content
/// must be present.
pub(crate) fn parse_payload<T: TypedMessage>(bytes: &[u8]) -> Result<T, CodecError> {
    let (message, read): (T, usize) = bincode::decode_from_slice(bytes, wire_config())?;
    if read != bytes.len() {
        return Err(CodecError::TrailingBytes(bytes.len() - read));
    }
    message.check_required()?;
    Ok(message)
}
