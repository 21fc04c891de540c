use thiserror::Error;

use super::{HEADER_SIZE, MAX_ROUTING_ID_LEN, MessageId, Role};

/// Failures while building the protocol registry. All of them are
/// configuration mistakes and should abort startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("protocol '{name}' does not declare an id")]
    MissingId { name: &'static str },

    #[error("protocol id {id} has already been registered")]
    DuplicateId { id: u16 },

    #[error("protocol '{name}' declares {count} messages; at most {} are addressable", u16::MAX)]
    TooManyMessages { name: &'static str, count: usize },

    #[error("message '{name}' declares identity {declared} but is registered as {expected}")]
    MisplacedMessage {
        name: &'static str,
        declared: MessageId,
        expected: MessageId,
    },

    #[error("protocol id {0} has not been registered")]
    UnknownProtocol(u16),

    #[error("protocol {protocol_id} has no message named '{name}'")]
    UnknownMessage { protocol_id: u16, name: String },
}

/// Failures while turning a message into bytes or bytes into a message.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message '{message}' is missing required field '{field}'")]
    MissingField {
        message: &'static str,
        field: &'static str,
    },

    #[error("payload of {0} bytes does not fit in a frame")]
    PayloadTooLarge(usize),

    #[error("failed to encode message: {0}")]
    Serialize(#[from] bincode::error::EncodeError),

    #[error("failed to decode message: {0}")]
    Deserialize(#[from] bincode::error::DecodeError),

    #[error("{0} unread bytes after message payload")]
    TrailingBytes(usize),
}

/// Reasons an inbound message was rejected. A malformed message is consumed
/// and dropped; the connection stays usable.
#[derive(Debug, Error)]
pub enum Malformed {
    #[error("expected {expected} message parts, received {received}")]
    PartCount {
        expected: &'static str,
        received: usize,
    },

    #[error("routing identity of {0} bytes exceeds the {MAX_ROUTING_ID_LEN} byte limit")]
    RoutingIdTooLong(usize),

    #[error("frame header is {0} bytes, expected {HEADER_SIZE}")]
    HeaderLength(usize),

    #[error("payload is {actual} bytes but the header declares {declared}")]
    PayloadLength { declared: u32, actual: usize },

    #[error("message {0} is not registered")]
    UnknownMessage(MessageId),

    #[error("failed to parse message {id}: {source}")]
    Parse {
        id: MessageId,
        #[source]
        source: CodecError,
    },
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to {action} {role} socket at '{address}': {source}")]
    Setup {
        role: Role,
        action: &'static str,
        address: String,
        #[source]
        source: zmq::Error,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("routing identity of {0} bytes exceeds the {MAX_ROUTING_ID_LEN} byte limit")]
    RoutingIdTooLong(usize),

    #[error("{0} connections need a routing identity to send")]
    MissingRoutingId(Role),

    #[error("transport error: {0}")]
    Transport(#[from] zmq::Error),
}
