use bincode::{Decode, Encode};

use crate::transport::{CodecError, TypedMessage};

use super::ANON_PROTOCOL_ID;

#[derive(Debug, Clone, Default, Encode, Decode, PartialEq, Eq)]
pub struct StatusRequest {}

impl TypedMessage for StatusRequest {
    const PROTOCOL_ID: u16 = ANON_PROTOCOL_ID;
    const INDEX: u16 = 2;
    const NAME: &'static str = "StatusRequest";
}

#[derive(Debug, Clone, Default, Encode, Decode, PartialEq, Eq)]
pub struct PingRequest {}

impl TypedMessage for PingRequest {
    const PROTOCOL_ID: u16 = ANON_PROTOCOL_ID;
    const INDEX: u16 = 4;
    const NAME: &'static str = "PingRequest";
}

/// Free-form text, echoed back by the facility server.
#[derive(Debug, Clone, Default, Encode, Decode, PartialEq, Eq)]
pub struct TextRequest {
    pub data: Option<String>,
}

impl TextRequest {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }
}

impl TypedMessage for TextRequest {
    const PROTOCOL_ID: u16 = ANON_PROTOCOL_ID;
    const INDEX: u16 = 5;
    const NAME: &'static str = "TextRequest";

    fn check_required(&self) -> Result<(), CodecError> {
        match self.data {
            Some(_) => Ok(()),
            None => Err(CodecError::MissingField {
                message: Self::NAME,
                field: "data",
            }),
        }
    }
}
