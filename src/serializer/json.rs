use anyhow::{
    Error,
    Result,
};

use crate::{
    core::error::{
        ProtocolError,
        UnknownMessageKind,
    },
    message::message::Message,
    serializer::serializer::Serializer,
};

/// A serializer implemented for JavaScript Object Notation.
#[derive(Debug, Default)]
pub struct JsonSerializer {}

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Message) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(Error::new)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Message> {
        // The kind tag is inspected before the full decode so that well-formed frames of an
        // unrecognized kind can be dropped instead of failing the session.
        let value = serde_json::from_slice::<serde_json::Value>(bytes)
            .map_err(|err| ProtocolError::new(format!("malformed message: {err}")))?;
        let tag = value
            .as_array()
            .and_then(|list| list.first())
            .and_then(|tag| tag.as_u64())
            .ok_or_else(|| ProtocolError::new("message is not an array starting with a kind tag"))?;
        if !Message::known_tag(tag) {
            return Err(UnknownMessageKind(tag).into());
        }
        serde_json::from_value(value)
            .map_err(|err| ProtocolError::new(format!("invalid {tag} message: {err}")).into())
    }
}
