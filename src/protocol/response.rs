use std::fmt;

use bincode::{Decode, Encode};

use crate::transport::{CodecError, TypedMessage};

use super::ANON_PROTOCOL_ID;

#[derive(Debug, Clone, Copy, Default, Encode, Decode, PartialEq, Eq)]
pub enum ErrorCode {
    #[default]
    Internal,
    BadRequest,
    Unsupported,
}

#[derive(Debug, Clone, Copy, Default, Encode, Decode, PartialEq, Eq)]
pub enum ServiceStatus {
    #[default]
    Normal,
    Degraded,
    Failed,
    Offline,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceStatus::Normal => "normal",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Offline => "offline",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, Encode, Decode, PartialEq, Eq)]
pub struct AckReply {}

impl TypedMessage for AckReply {
    const PROTOCOL_ID: u16 = ANON_PROTOCOL_ID;
    const INDEX: u16 = 0;
    const NAME: &'static str = "AckReply";
}

/// Negative acknowledgement; sent in place of the expected reply.
#[derive(Debug, Clone, Default, Encode, Decode, PartialEq, Eq)]
pub struct NackReply {
    pub err_code: Option<ErrorCode>,
    pub err_msg: Option<String>,
}

impl NackReply {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            err_code: Some(code),
            err_msg: Some(message.into()),
        }
    }
}

impl TypedMessage for NackReply {
    const PROTOCOL_ID: u16 = ANON_PROTOCOL_ID;
    const INDEX: u16 = 1;
    const NAME: &'static str = "NackReply";

    fn check_required(&self) -> Result<(), CodecError> {
        required(Self::NAME, "err_code", &self.err_code)
    }
}

#[derive(Debug, Clone, Default, Encode, Decode, PartialEq, Eq)]
pub struct StatusReply {
    pub status: Option<ServiceStatus>,
}

impl TypedMessage for StatusReply {
    const PROTOCOL_ID: u16 = ANON_PROTOCOL_ID;
    const INDEX: u16 = 3;
    const NAME: &'static str = "StatusReply";

    fn check_required(&self) -> Result<(), CodecError> {
        required(Self::NAME, "status", &self.status)
    }
}

#[derive(Debug, Clone, Default, Encode, Decode, PartialEq, Eq)]
pub struct TextReply {
    pub data: Option<String>,
}

impl TypedMessage for TextReply {
    const PROTOCOL_ID: u16 = ANON_PROTOCOL_ID;
    const INDEX: u16 = 6;
    const NAME: &'static str = "TextReply";

    fn check_required(&self) -> Result<(), CodecError> {
        required(Self::NAME, "data", &self.data)
    }
}

fn required<T>(
    message: &'static str,
    field: &'static str,
    value: &Option<T>,
) -> Result<(), CodecError> {
    match value {
        Some(_) => Ok(()),
        None => Err(CodecError::MissingField { message, field }),
    }
}

#[cfg(test)]
mod tests {
    use crate::transport::Message;

    use super::*;

    #[test]
    fn nack_requires_code() {
        let nack = NackReply {
            err_code: None,
            err_msg: Some("oops".into()),
        };

        assert!(matches!(
            nack.encoded_len(),
            Err(CodecError::MissingField {
                field: "err_code",
                ..
            })
        ));
        assert!(
            NackReply::new(ErrorCode::BadRequest, "oops")
                .encoded_len()
                .is_ok()
        );
    }

    #[test]
    fn status_reply_requires_status() {
        assert!(StatusReply::default().encoded_len().is_err());
        assert!(
            StatusReply {
                status: Some(ServiceStatus::Degraded)
            }
            .encoded_len()
            .is_ok()
        );
    }

    #[test]
    fn status_display() {
        assert_eq!(ServiceStatus::Normal.to_string(), "normal");
        assert_eq!(ServiceStatus::Offline.to_string(), "offline");
    }
}
