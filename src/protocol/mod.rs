//! The Anon protocol and the facility server/client that speak it.
//!
//! Anon is the unauthenticated message set every SDMS service answers: a ping,
//! a status query and a text echo, plus the generic acknowledgement replies.
//! It is registered like any other protocol module, through [`register`], and
//! travels over the typed-message [`transport`](crate::transport).
//!
//! # Message Set
//!
//! | Index | Message           | Required fields |
//! |-------|-------------------|-----------------|
//! | 0     | [`AckReply`]      |                 |
//! | 1     | [`NackReply`]     | `err_code`      |
//! | 2     | [`StatusRequest`] |                 |
//! | 3     | [`StatusReply`]   | `status`        |
//! | 4     | [`PingRequest`]   |                 |
//! | 5     | [`TextRequest`]   | `data`          |
//! | 6     | [`TextReply`]     | `data`          |
//!
//! # See Also
//!
//! - [`FacilityServer`]: serves requests with a pool of worker connections.
//! - [`FacilityClient`]: request/reply session with a facility server.
use std::sync::Arc;

use crate::transport::{ProtocolDescriptor, ProtocolRegistry, RegistryError};

mod client;
mod request;
mod response;
mod server;
mod thread;

pub use client::{ClientError, FacilityClient};
pub use request::{PingRequest, StatusRequest, TextRequest};
pub use response::{AckReply, ErrorCode, NackReply, ServiceStatus, StatusReply, TextReply};
pub use server::{
    AnonHandler, FacilityServer, RequestHandler, ServerConfig, ServerError, ServerHandle,
};
pub use thread::WorkerPool;

pub const ANON_PROTOCOL_ID: u16 = 1;

pub fn descriptor() -> ProtocolDescriptor {
    ProtocolDescriptor::new("SDMS.Anon")
        .with_id(ANON_PROTOCOL_ID)
        .message::<AckReply>()
        .message::<NackReply>()
        .message::<StatusRequest>()
        .message::<StatusReply>()
        .message::<PingRequest>()
        .message::<TextRequest>()
        .message::<TextReply>()
}

/// Adds the Anon protocol to `registry`.
pub fn register(registry: &mut ProtocolRegistry) -> Result<u16, RegistryError> {
    registry.register(descriptor())
}

/// A registry holding every protocol this crate ships, ready to share.
pub fn registry() -> Result<Arc<ProtocolRegistry>, RegistryError> {
    let mut registry = ProtocolRegistry::new();
    register(&mut registry)?;
    Ok(Arc::new(registry))
}

#[cfg(test)]
mod tests {
    use crate::transport::{CodecError, FrameHeader, Malformed, MessageBuffer, MessageId, codec};

    use super::*;

    #[test]
    fn anon_registers_once() {
        let mut registry = ProtocolRegistry::new();

        assert_eq!(register(&mut registry).unwrap(), ANON_PROTOCOL_ID);
        assert!(matches!(
            register(&mut registry),
            Err(RegistryError::DuplicateId { .. })
        ));
        assert_eq!(
            registry.find_message(ANON_PROTOCOL_ID, "TextReply").unwrap(),
            6
        );
    }

    #[test]
    fn every_message_constructs_its_own_type() {
        let registry = registry().unwrap();
        let protocol = registry.protocol(ANON_PROTOCOL_ID).unwrap();

        for index in 0..protocol.message_count() as u16 {
            let message = protocol.message_at(index).unwrap().construct();
            assert_eq!(message.message_id(), MessageId::new(ANON_PROTOCOL_ID, index));
        }
    }

    #[test]
    fn nack_round_trips_through_codec() {
        let registry = registry().unwrap();
        let mut buffer = MessageBuffer::new();
        let sent = NackReply::new(ErrorCode::BadRequest, "no such record");

        codec::encode(&sent, &mut buffer).unwrap();
        let decoded = codec::decode(&registry, &buffer).unwrap();

        assert_eq!(decoded.downcast_ref::<NackReply>(), Some(&sent));
    }

    #[test]
    fn text_request_without_data_does_not_decode() {
        let registry = registry().unwrap();
        let mut buffer = MessageBuffer::new();
        // A TextRequest whose `data` is absent.
        buffer
            .prepare(FrameHeader {
                protocol_id: ANON_PROTOCOL_ID,
                message_index: 5,
                payload_size: 1,
            })
            .copy_from_slice(&[0]);

        assert!(matches!(
            codec::decode(&registry, &buffer),
            Err(Malformed::Parse {
                source: CodecError::MissingField { field: "data", .. },
                ..
            })
        ));
    }
}
