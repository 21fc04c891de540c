//! Reusable frame storage.
//!
//! A [`MessageBuffer`] holds the header of the current frame plus one byte
//! region laid out as `[routing prefix | payload]`. The region only ever grows,
//! and only to the exact size a frame needs, so a connection that sees a large
//! message once keeps the memory for the next one instead of reallocating.
use bincode::{Decode, Encode};

use super::{
    MessageId,
    error::{CodecError, Malformed},
    message::wire_config,
};

/// Encoded size of [`FrameHeader`] on the wire.
pub const HEADER_SIZE: usize = 8;

/// Longest routing identity accepted from or written to a socket.
pub const MAX_ROUTING_ID_LEN: usize = 1000;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct FrameHeader {
    pub protocol_id: u16,
    pub message_index: u16,
    pub payload_size: u32,
}

impl FrameHeader {
    pub fn message_id(&self) -> MessageId {
        MessageId::new(self.protocol_id, self.message_index)
    }

    pub fn to_bytes(&self) -> Result<[u8; HEADER_SIZE], CodecError> {
        let mut out = [0; HEADER_SIZE];
        bincode::encode_into_slice(self, &mut out, wire_config())?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Malformed> {
        if bytes.len() != HEADER_SIZE {
            return Err(Malformed::HeaderLength(bytes.len()));
        }
        // Fixed-width layout: eight bytes always decode.
        bincode::decode_from_slice(bytes, wire_config())
            .map(|(header, _)| header)
            .map_err(|_| Malformed::HeaderLength(bytes.len()))
    }
}

#[derive(Debug)]
pub struct MessageBuffer {
    header: FrameHeader,
    bytes: Vec<u8>,
    prefix_len: usize,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            header: FrameHeader::default(),
            bytes: vec![0; capacity],
            prefix_len: 0,
        }
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn message_id(&self) -> MessageId {
        self.header.message_id()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// Routing identity of the current frame; empty when none was attached.
    pub fn prefix(&self) -> &[u8] {
        &self.bytes[..self.prefix_len]
    }

    pub fn payload(&self) -> &[u8] {
        let start = self.prefix_len;
        &self.bytes[start..start + self.header.payload_size as usize]
    }

    /// Replaces the routing prefix. Any payload already in the buffer is
    /// invalidated and must be written again.
    pub fn set_prefix(&mut self, prefix: &[u8]) {
        self.prefix_len = prefix.len();
        self.header.payload_size = 0;
        self.ensure_capacity();
        self.bytes[..prefix.len()].copy_from_slice(prefix);
    }

    pub fn clear_prefix(&mut self) {
        self.prefix_len = 0;
        self.header.payload_size = 0;
    }

    /// Installs a new header and makes room for its payload after the prefix.
    /// Returns the payload region to fill.
    pub(crate) fn prepare(&mut self, header: FrameHeader) -> &mut [u8] {
        self.header = header;
        self.ensure_capacity();
        let start = self.prefix_len;
        &mut self.bytes[start..start + header.payload_size as usize]
    }

    pub(crate) fn discard_payload(&mut self) {
        self.header = FrameHeader::default();
    }

    /// Grows to exactly `prefix_len + payload_size` when undersized; never
    /// shrinks.
    fn ensure_capacity(&mut self) {
        let needed = self.prefix_len + self.header.payload_size as usize;
        if needed > self.bytes.len() {
            self.bytes.resize(needed, 0);
        }
    }
}
