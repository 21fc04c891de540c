//! Frame codec.
//!
//! Converts between typed messages and the `[header | payload]` contents of a
//! [`MessageBuffer`]. The header carries the message identity and the exact
//! payload length; the payload is the bincode encoding of the message, written
//! directly after whatever routing prefix the buffer currently holds.
use log::trace;

use super::{
    FrameHeader, Message, MessageBuffer, ProtocolRegistry,
    error::{CodecError, Malformed},
};

/// Serializes `message` into `buffer`, after its routing prefix.
///
/// Fails without touching the buffer when the message lacks required content.
pub fn encode(message: &dyn Message, buffer: &mut MessageBuffer) -> Result<(), CodecError> {
    let header = frame_header(message)?;
    write_payload(message, header, buffer)
}

/// Like [`encode`], but replaces the routing prefix first. The buffer keeps
/// its previous frame when the message cannot be encoded.
pub(crate) fn encode_routed(
    message: &dyn Message,
    routing_id: Option<&[u8]>,
    buffer: &mut MessageBuffer,
) -> Result<(), CodecError> {
    let header = frame_header(message)?;
    match routing_id {
        Some(id) => buffer.set_prefix(id),
        None => buffer.clear_prefix(),
    }
    write_payload(message, header, buffer)
}

fn frame_header(message: &dyn Message) -> Result<FrameHeader, CodecError> {
    let size = message.encoded_len()?;
    let payload_size = u32::try_from(size).map_err(|_| CodecError::PayloadTooLarge(size))?;
    let id = message.message_id();

    Ok(FrameHeader {
        protocol_id: id.protocol_id,
        message_index: id.message_index,
        payload_size,
    })
}

fn write_payload(
    message: &dyn Message,
    header: FrameHeader,
    buffer: &mut MessageBuffer,
) -> Result<(), CodecError> {
    let payload = buffer.prepare(header);

    if let Err(e) = message.encode_into(payload) {
        buffer.discard_payload();
        return Err(e);
    }

    trace!(
        "encoded {} ({}) into {} bytes",
        message.name(),
        header.message_id(),
        header.payload_size
    );
    Ok(())
}

/// Rebuilds the typed message held in `buffer`.
pub fn decode(
    registry: &ProtocolRegistry,
    buffer: &MessageBuffer,
) -> Result<Box<dyn Message>, Malformed> {
    let id = buffer.message_id();
    let descriptor = registry
        .resolve(id)
        .ok_or(Malformed::UnknownMessage(id))?;

    descriptor
        .parse(buffer.payload())
        .map_err(|source| Malformed::Parse { id, source })
}

#[cfg(test)]
mod tests {
    use crate::transport::{
        MessageId, ProtocolDescriptor,
        message::tests::{Labelled, Probe},
    };

    use super::*;

    fn registry() -> ProtocolRegistry {
        let mut registry = ProtocolRegistry::new();
        registry
            .register(
                ProtocolDescriptor::new("probe")
                    .with_id(7)
                    .message::<Labelled>()
                    .message::<Probe>(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn ping_round_trip() {
        let registry = registry();
        let mut buffer = MessageBuffer::new();

        encode(
            &Probe {
                payload: "ping".into(),
            },
            &mut buffer,
        )
        .unwrap();
        assert_eq!(buffer.message_id(), MessageId::new(7, 1));

        let decoded = decode(&registry, &buffer).unwrap();
        assert_eq!(decoded.message_id(), MessageId::new(7, 1));
        assert_eq!(decoded.downcast_ref::<Probe>().unwrap().payload, "ping");
    }

    #[test]
    fn round_trip_after_routing_prefix() {
        let registry = registry();
        let mut buffer = MessageBuffer::with_capacity(0);
        buffer.set_prefix(b"peer-identity");
        let sent = Labelled {
            label: Some("x".repeat(4096)),
        };

        encode(&sent, &mut buffer).unwrap();

        assert_eq!(buffer.prefix(), b"peer-identity");
        let decoded = decode(&registry, &buffer).unwrap();
        assert_eq!(decoded.downcast_ref::<Labelled>(), Some(&sent));
    }

    #[test]
    fn missing_required_field_is_not_encoded() {
        let mut buffer = MessageBuffer::new();
        encode(
            &Probe {
                payload: "before".into(),
            },
            &mut buffer,
        )
        .unwrap();

        let before = buffer.payload().to_vec();

        let res = encode(&Labelled { label: None }, &mut buffer);

        assert!(matches!(res, Err(CodecError::MissingField { .. })));
        assert_eq!(buffer.message_id(), MessageId::new(7, 1));
        assert_eq!(buffer.payload(), &before[..]);
        let decoded = decode(&registry(), &buffer).unwrap();
        assert_eq!(decoded.downcast_ref::<Probe>().unwrap().payload, "before");
    }

    #[test]
    fn failed_routed_encode_keeps_previous_frame() {
        let mut buffer = MessageBuffer::new();
        encode_routed(
            &Probe {
                payload: "kept".into(),
            },
            Some(b"first-peer"),
            &mut buffer,
        )
        .unwrap();

        let res = encode_routed(&Labelled { label: None }, Some(b"other"), &mut buffer);

        assert!(matches!(res, Err(CodecError::MissingField { .. })));
        assert_eq!(buffer.prefix(), b"first-peer");
        let decoded = decode(&registry(), &buffer).unwrap();
        assert_eq!(decoded.downcast_ref::<Probe>().unwrap().payload, "kept");
    }

    #[test]
    fn payload_missing_required_field_is_malformed() {
        let registry = registry();
        let mut buffer = MessageBuffer::new();
        buffer
            .prepare(FrameHeader {
                protocol_id: 7,
                message_index: 0,
                payload_size: 1,
            })
            .copy_from_slice(&[0]);

        assert!(matches!(
            decode(&registry, &buffer),
            Err(Malformed::Parse {
                source: CodecError::MissingField { field: "label", .. },
                ..
            })
        ));
    }

    #[test]
    fn unknown_identity_is_malformed() {
        let mut buffer = MessageBuffer::new();
        encode(
            &Probe {
                payload: "ping".into(),
            },
            &mut buffer,
        )
        .unwrap();

        let empty = ProtocolRegistry::new();
        assert!(matches!(
            decode(&empty, &buffer),
            Err(Malformed::UnknownMessage(id)) if id == MessageId::new(7, 1)
        ));
    }

    #[test]
    fn corrupt_payload_is_malformed() {
        let registry = registry();
        let mut buffer = MessageBuffer::new();
        // String length prefix claims far more bytes than are present.
        buffer
            .prepare(FrameHeader {
                protocol_id: 7,
                message_index: 1,
                payload_size: 9,
            })
            .copy_from_slice(&[0, 0, 0, 0, 0, 0, 0, 200, b'a']);

        assert!(matches!(
            decode(&registry, &buffer),
            Err(Malformed::Parse { .. })
        ));
    }
}
