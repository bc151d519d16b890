use std::sync::Arc;

use anyhow::Result;
use futures_util::{
    stream::BoxStream,
    StreamExt,
};
use log::{
    debug,
    warn,
};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    core::{
        error::WampError,
        types::{
            Dictionary,
            List,
            Value,
        },
        uri::Uri,
    },
    message::{
        common::error_for_invocation,
        message::{
            InvocationMessage,
            Message,
            YieldMessage,
        },
    },
    peer::dispatch::{
        DispatchKey,
        MessageDispatcher,
    },
};

/// An invocation of a procedure, as delivered to its handler.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// A payload yielded from a procedure handler.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RpcYield {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// The lazy sequence of payloads produced by one invocation of a procedure handler.
///
/// Dropping the stream before it completes is the cancellation signal: any cleanup the handler
/// composed into the stream runs at that point.
pub type PayloadStream = BoxStream<'static, Result<RpcYield>>;

/// A procedure implementation supplied at registration time.
///
/// Every incoming INVOCATION calls [`ProcedureHandler::invoke`] once, producing a fresh payload
/// stream. In progressive mode each payload is relayed to the caller as it is produced; otherwise
/// only the last payload is reported, in the terminal YIELD.
pub trait ProcedureHandler: Send + Sync + 'static {
    fn invoke(&self, invocation: Invocation) -> PayloadStream;
}

impl<F> ProcedureHandler for F
where
    F: Fn(Invocation) -> PayloadStream + Send + Sync + 'static,
{
    fn invoke(&self, invocation: Invocation) -> PayloadStream {
        self(invocation)
    }
}

enum Outcome {
    Terminal(Message),
    Canceled,
    SessionGone,
}

/// Drives one invocation of a procedure handler, reporting its outcome to the router.
///
/// Exactly one terminal frame is emitted per invocation: either a YIELD without the progress flag
/// or an ERROR. An INTERRUPT for the invocation's request id cancels the handler stream before
/// the cancellation ERROR is emitted. If the session dies mid-flight, the handler stream is
/// dropped and nothing is emitted.
pub(crate) async fn run_invocation(
    name: String,
    message_tx: UnboundedSender<Message>,
    dispatcher: Arc<MessageDispatcher>,
    message: InvocationMessage,
    handler: Arc<dyn ProcedureHandler>,
) {
    let invocation_request = message.request;
    let receive_progress = message
        .details
        .get("receive_progress")
        .and_then(|value| value.bool())
        .unwrap_or(false);

    let mut interrupt_rx = dispatcher.subscribe(DispatchKey::Interrupt {
        invocation: invocation_request,
    });

    let mut payloads = handler.invoke(Invocation {
        arguments: message.call_arguments,
        arguments_keyword: message.call_arguments_keyword,
    });
    let mut last_payload: Option<RpcYield> = None;

    let outcome = loop {
        tokio::select! {
            payload = payloads.next() => match payload {
                Some(Ok(payload)) => {
                    if receive_progress {
                        let sent = message_tx.send(Message::Yield(YieldMessage {
                            invocation_request,
                            options: Dictionary::from_iter([(
                                "progress".to_owned(),
                                Value::Bool(true),
                            )]),
                            arguments: payload.arguments,
                            arguments_keyword: payload.arguments_keyword,
                        }));
                        if sent.is_err() {
                            break Outcome::SessionGone;
                        }
                    } else {
                        last_payload = Some(payload);
                    }
                }
                Some(Err(err)) => {
                    debug!("Invocation {invocation_request} on {name} failed: {err:#}");
                    break Outcome::Terminal(error_for_invocation(invocation_request, &err));
                }
                None => {
                    let (arguments, arguments_keyword) = match last_payload.take() {
                        Some(payload) => (payload.arguments, payload.arguments_keyword),
                        None => (List::default(), Dictionary::default()),
                    };
                    break Outcome::Terminal(Message::Yield(YieldMessage {
                        invocation_request,
                        options: Dictionary::default(),
                        arguments,
                        arguments_keyword,
                    }));
                }
            },
            interrupt = interrupt_rx.recv() => match interrupt {
                Some(Ok(Message::Interrupt(_))) => {
                    debug!("Invocation {invocation_request} on {name} interrupted");
                    break Outcome::Canceled;
                }
                Some(Ok(message)) => {
                    warn!(
                        "Dropped unexpected {} for pending invocation {invocation_request}",
                        message.message_name()
                    );
                }
                Some(Err(_)) | None => break Outcome::SessionGone,
            },
        }
    };

    // Dropping the handler stream runs its cleanup. For the cancellation path, this must happen
    // before the ERROR is reported.
    drop(payloads);

    match outcome {
        Outcome::Terminal(message) => {
            message_tx.send(message).ok();
        }
        Outcome::Canceled => {
            message_tx
                .send(error_for_invocation(
                    invocation_request,
                    &WampError::new(
                        Uri::from_known("wamp.error.cancelled"),
                        "function call has been cancelled",
                    )
                    .into(),
                ))
                .ok();
        }
        Outcome::SessionGone => (),
    }

    dispatcher.unsubscribe(DispatchKey::Interrupt {
        invocation: invocation_request,
    });
}
