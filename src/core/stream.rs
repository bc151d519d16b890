use std::{
    pin::Pin,
    task,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Sink,
    SinkExt,
    Stream,
    StreamExt,
};
use log::warn;

use crate::{
    core::error::UnknownMessageKind,
    message::message::Message,
    serializer::serializer::Serializer,
    transport::transport::{
        Transport,
        TransportData,
    },
};

/// An item flowing over a [`MessageStream`].
pub enum StreamMessage {
    Ping(Vec<u8>),
    Message(Message),
}

/// Adapts a [`Transport`] and a [`Serializer`] into a [`Stream`] and [`Sink`] of WAMP messages.
///
/// Well-formed frames of an unrecognized kind are dropped here with a diagnostic, so consumers
/// only ever see messages this peer understands. Any other decode failure surfaces as a stream
/// error.
pub struct MessageStream {
    transport: Box<dyn Transport>,
    serializer: Box<dyn Serializer>,
}

impl MessageStream {
    pub fn new(transport: Box<dyn Transport>, serializer: Box<dyn Serializer>) -> Self {
        Self {
            transport,
            serializer,
        }
    }
}

impl Stream for MessageStream {
    type Item = Result<StreamMessage>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        loop {
            match futures_util::ready!(self.transport.poll_next_unpin(cx)) {
                Some(Ok(TransportData::Ping(data))) => {
                    return task::Poll::Ready(Some(Ok(StreamMessage::Ping(data))))
                }
                Some(Ok(TransportData::Message(data))) => {
                    match self.serializer.deserialize(&data) {
                        Ok(message) => {
                            return task::Poll::Ready(Some(Ok(StreamMessage::Message(message))))
                        }
                        Err(err) => match err.downcast_ref::<UnknownMessageKind>() {
                            // Unrecognized kinds are dropped for forward compatibility.
                            Some(UnknownMessageKind(tag)) => {
                                warn!("Dropped message with unknown kind {tag}");
                            }
                            None => return task::Poll::Ready(Some(Err(err))),
                        },
                    }
                }
                Some(Err(err)) => return task::Poll::Ready(Some(Err(err))),
                None => return task::Poll::Ready(None),
            }
        }
    }
}

impl Sink<StreamMessage> for MessageStream {
    type Error = Error;

    fn poll_ready(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.transport.poll_ready_unpin(cx)
    }

    fn start_send(
        mut self: Pin<&mut Self>,
        item: StreamMessage,
    ) -> std::result::Result<(), Self::Error> {
        let data = match item {
            StreamMessage::Ping(data) => TransportData::Ping(data),
            StreamMessage::Message(message) => {
                TransportData::Message(self.serializer.serialize(&message)?)
            }
        };
        self.transport.start_send_unpin(data)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.transport.poll_flush_unpin(cx)
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.transport.poll_close_unpin(cx)
    }
}
