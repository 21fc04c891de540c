//! Typed-message transport.
//!
//! This module turns ZeroMQ sockets into channels of typed messages. It owns
//! the wire format every SDMS process speaks: how a message is framed, how its
//! type is identified, how replies find their way back to the right peer, and
//! how malformed input is detected without blocking or tearing the connection
//! down.
//!
//! # Key Components
//!
//! - [`ProtocolRegistry`]: maps protocol ids to the message sets contributed by
//!   protocol modules. Built once at startup and shared read-only.
//! - [`MessageBuffer`]: reusable, grow-only storage for one frame.
//! - [`codec`]: encodes a [`Message`] into a buffer and decodes it back through
//!   the registry.
//! - [`Connection`]: one socket in one [`Role`], with timeout-bounded
//!   send/receive of whole frames.
//!
//! # Binary Format
//!
//! A frame is sent as one multi-part ZeroMQ message of two or three parts:
//!
//! - An optional routing identity, present only on Server and Worker sockets.
//! - An 8 byte header: protocol id (`u16`), message index (`u16`) and payload
//!   size (`u32`), all big-endian.
//! - The payload: the bincode encoding of the message, exactly `payload size`
//!   bytes long.
//!
//! The `(protocol id, message index)` pair is the only type information on the
//! wire. Receivers that do not know the pair report the message as malformed
//! and carry on.
//!
//! # See Also
//!
//! - [`protocol`](crate::protocol): the Anon protocol and the facility server
//!   and client built on this transport.
pub mod codec;
mod buffer;
mod connection;
mod error;
mod message;
mod registry;

pub use buffer::{FrameHeader, HEADER_SIZE, MAX_ROUTING_ID_LEN, MessageBuffer};
pub use connection::{Connection, Envelope, Receipt, Role, RoutingId, SocketOptions, poll};
pub use error::{CodecError, ConnectionError, Malformed, RegistryError};
pub use message::{Message, MessageId, TypedMessage};
pub use registry::{MessageDescriptor, ProtocolDescriptor, ProtocolRegistry};
