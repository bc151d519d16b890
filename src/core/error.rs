use anyhow::Error;
use thiserror::Error;

use crate::{
    core::{
        id::Id,
        types::{
            Dictionary,
            Integer,
            List,
            Value,
        },
        uri::Uri,
    },
    message::message::{
        ErrorMessage,
        Message,
    },
};

/// A failure of the underlying transport.
///
/// Transport failures are terminal: they propagate to every active operation on the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport was closed, by the peer or locally.
    #[error("transport closed")]
    Closed,
    /// The transport failed unexpectedly.
    #[error("transport error: {0}")]
    Failed(String),
}

/// A violation of the WAMP protocol: malformed JSON, a frame whose arity is invalid, or a message
/// kind that is not allowed in the current protocol state.
///
/// Protocol errors are terminal for the session.
#[derive(Debug, Clone, Error)]
#[error("protocol error: {0}")]
pub struct ProtocolError(String);

impl ProtocolError {
    pub fn new<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self(message.into())
    }
}

/// A well-formed frame whose kind tag is not recognized.
///
/// Unlike [`ProtocolError`], this is not terminal: unrecognized kinds are logged and discarded for
/// forward compatibility.
#[derive(Debug, Clone, Error)]
#[error("unknown message kind {0}")]
pub struct UnknownMessageKind(pub Integer);

/// A failure of the session-establishment handshake.
#[derive(Debug, Clone, Error)]
pub enum HandshakeError {
    /// The router sent CHALLENGE but no authentication was configured.
    #[error("received authentication challenge with no authentication configured")]
    UnexpectedChallenge,
    /// The router aborted the handshake.
    #[error("session aborted: {reason}")]
    Aborted { reason: Uri, details: Dictionary },
}

/// An error reported by the router for a single outstanding request, or raised by a procedure
/// handler to be reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WampError {
    reason: Uri,
    message: String,
    arguments: List,
    arguments_keyword: Dictionary,
}

impl WampError {
    /// Creates a new error with the given reason URI and message.
    pub fn new<S>(reason: Uri, message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            reason,
            message: message.into(),
            arguments: List::default(),
            arguments_keyword: Dictionary::default(),
        }
    }

    /// The reason URI for the error.
    pub fn reason(&self) -> &Uri {
        &self.reason
    }

    /// Positional arguments attached to the error.
    pub fn arguments(&self) -> &List {
        &self.arguments
    }

    /// Keyword arguments attached to the error.
    pub fn arguments_keyword(&self) -> &Dictionary {
        &self.arguments_keyword
    }
}

impl From<&ErrorMessage> for WampError {
    fn from(value: &ErrorMessage) -> Self {
        let message = match value.arguments.first() {
            Some(Value::String(message)) => message.clone(),
            _ => match value.details.get("message") {
                Some(Value::String(message)) => message.clone(),
                _ => value.error.to_string(),
            },
        };
        Self {
            reason: value.error.clone(),
            message,
            arguments: value.arguments.clone(),
            arguments_keyword: value.arguments_keyword.clone(),
        }
    }
}

/// Cancellation of a call or invocation, locally or peer-initiated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("cancelled")]
pub struct CanceledError;

/// An error that can be transmitted over channels.
///
/// Fanning a failure out to many consumers requires [`Clone`], which [`anyhow::Error`] does not
/// provide, so failures are flattened to a reason URI and message and rehydrated on the consumer
/// side.
#[derive(Debug, Clone)]
pub struct ChannelTransmittableError {
    pub reason: Uri,
    pub message: String,
    pub request_id: Option<Id>,
}

impl ChannelTransmittableError {
    /// Converts the error into a real error object that can be returned out.
    pub fn into_error(self) -> Error {
        match self.reason.as_ref() {
            "wamp.error.transport_closed" => TransportError::Closed.into(),
            "wamp.error.transport_failure" => TransportError::Failed(self.message).into(),
            "wamp.error.protocol_violation" => ProtocolError::new(self.message).into(),
            "wamp.error.cancelled" | "wamp.error.canceled" => CanceledError.into(),
            _ => WampError::new(self.reason, self.message).into(),
        }
    }
}

impl TryFrom<&Message> for ChannelTransmittableError {
    type Error = Error;
    fn try_from(value: &Message) -> Result<Self, Self::Error> {
        match value {
            Message::Error(message) => Ok(Self {
                reason: message.error.clone(),
                message: WampError::from(message).to_string(),
                request_id: Some(message.request),
            }),
            Message::Abort(message) => Ok(Self {
                reason: message.reason.clone(),
                message: match message.details.get("message") {
                    Some(Value::String(message)) => message.clone(),
                    _ => message.reason.to_string(),
                },
                request_id: None,
            }),
            _ => Err(Error::msg("message does not describe an error")),
        }
    }
}

impl From<&Error> for ChannelTransmittableError {
    fn from(value: &Error) -> Self {
        Self {
            reason: Uri::for_error(value),
            message: value.to_string(),
            request_id: None,
        }
    }
}

impl From<Error> for ChannelTransmittableError {
    fn from(value: Error) -> Self {
        Self::from(&value)
    }
}

/// Type alias for a channel-transmittable result.
pub type ChannelTransmittableResult<T> = Result<T, ChannelTransmittableError>;
