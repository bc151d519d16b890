use anyhow::Error;

use crate::{
    core::{
        cancel::CallCancelMode,
        id::Id,
        types::{
            Dictionary,
            List,
            Value,
        },
        uri::Uri,
    },
    message::message::{
        AbortMessage,
        CancelMessage,
        ErrorMessage,
        Message,
    },
};

pub fn abort_message_for_error(error: &Error) -> Message {
    Message::Abort(AbortMessage {
        details: Dictionary::from_iter([("message".to_owned(), Value::String(error.to_string()))]),
        reason: Uri::for_error(error),
    })
}

/// Constructs the ERROR reported to the router when an invocation fails on the callee.
///
/// The error message rides in the first positional argument, so callers see it regardless of how
/// their client extracts error details.
pub fn error_for_invocation(invocation_request: Id, error: &Error) -> Message {
    Message::Error(ErrorMessage {
        request_type: Message::INVOCATION_TAG,
        request: invocation_request,
        details: Dictionary::default(),
        error: Uri::for_error(error),
        arguments: List::from_iter([Value::String(error.to_string())]),
        arguments_keyword: Dictionary::default(),
    })
}

pub fn cancel_call_with_mode(call_request: Id, mode: CallCancelMode) -> Message {
    Message::Cancel(CancelMessage {
        call_request,
        options: Dictionary::from_iter([("mode".to_owned(), Value::String(mode.into()))]),
    })
}
