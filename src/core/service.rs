use anyhow::{
    Error,
    Result,
};
use futures_util::{
    SinkExt,
    StreamExt,
};
use log::error;
use tokio::{
    sync::{
        broadcast,
        mpsc::{
            unbounded_channel,
            UnboundedReceiver,
            UnboundedSender,
        },
    },
    task::JoinHandle,
};

use crate::{
    core::{
        error::ProtocolError,
        stream::{
            MessageStream,
            StreamMessage,
        },
    },
    message::{
        common::abort_message_for_error,
        message::Message,
    },
};

/// A handle to an asynchronously-running [`Service`].
/// The reason a [`Service`] ended, reported on the end channel.
#[derive(Debug, Clone)]
pub enum ServiceEnd {
    /// The transport closed, locally or on the remote side.
    Closed,
    /// The transport or codec failed.
    Failed(String),
}

pub struct ServiceHandle {
    start_handle: JoinHandle<()>,
    cancel_tx: broadcast::Sender<()>,
    message_tx: UnboundedSender<Message>,
}

impl ServiceHandle {
    /// Joins the task running the service.
    pub async fn join(self) -> Result<()> {
        self.start_handle.await.map_err(Error::new)
    }

    /// Cancels the service.
    ///
    /// Cancellation is the correct way to cleanly exit a service.
    pub fn cancel(&self) -> Result<()> {
        self.cancel_tx.send(()).map(|_| ()).map_err(Error::new)
    }

    /// The message transmission channel.
    pub fn message_tx(&self) -> UnboundedSender<Message> {
        self.message_tx.clone()
    }
}

/// The core asynchronous service that sends and receives WAMP messages over an underlying
/// transport.
///
/// Received messages are passed to a channel for the session layer to process. Outbound messages
/// belonging to one logical operation are serialized onto the transport in issue order, since they
/// all flow through the single unbounded channel owned here.
///
/// This type assumes errors are handled higher in the stack: canceling the service does not
/// inject an ABORT message. The session is expected to send ABORT before canceling the service if
/// one is warranted.
pub struct Service {
    name: String,
    stream: MessageStream,
    message_tx: broadcast::Sender<Message>,
    end_tx: broadcast::Sender<ServiceEnd>,
    _end_rx: broadcast::Receiver<ServiceEnd>,
    cancel_tx: broadcast::Sender<()>,
    cancel_rx: broadcast::Receiver<()>,

    user_message_tx: UnboundedSender<Message>,
    user_message_rx: UnboundedReceiver<Message>,
}

impl Service {
    /// Creates a new service over the given message stream.
    pub fn new(name: String, stream: MessageStream) -> Self {
        let (message_tx, _) = broadcast::channel(16);
        let (end_tx, end_rx) = broadcast::channel(1);
        let (cancel_tx, cancel_rx) = broadcast::channel(1);
        let (user_message_tx, user_message_rx) = unbounded_channel();
        Self {
            name,
            stream,
            message_tx,
            end_tx,
            _end_rx: end_rx,
            cancel_tx,
            cancel_rx,
            user_message_tx,
            user_message_rx,
        }
    }

    /// The message receiver channel.
    pub fn message_rx(&self) -> broadcast::Receiver<Message> {
        self.message_tx.subscribe()
    }

    /// The end receiver channel.
    pub fn end_rx(&self) -> broadcast::Receiver<ServiceEnd> {
        self.end_tx.subscribe()
    }

    /// Starts the service asynchronously.
    ///
    /// This method takes ownership of the service. All future interactions with the service should
    /// be made through the returned handle.
    pub fn start(self) -> ServiceHandle {
        let cancel_tx = self.cancel_tx.clone();
        let message_tx = self.user_message_tx.clone();
        let start_handle = tokio::spawn(self.run());
        ServiceHandle {
            start_handle,
            cancel_tx,
            message_tx,
        }
    }

    async fn run(mut self) {
        let end = match self.service_loop().await {
            Ok(()) => ServiceEnd::Closed,
            Err(err) => {
                error!("Service {} failed: {err:#}", self.name);
                ServiceEnd::Failed(format!("{err:#}"))
            }
        };
        if let Err(err) = self.end(end).await {
            error!("Failed to end service {}: {err:#}", self.name);
        }
    }

    async fn service_loop(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                message = self.stream.next() => {
                    match message {
                        Some(Ok(StreamMessage::Ping(data))) => {
                            // Ping the message back.
                            self.stream.send(StreamMessage::Ping(data)).await?;
                        },
                        Some(Ok(StreamMessage::Message(message))) => {
                            // Send the message out for handling.
                            self.message_tx.send(message)?;
                        }
                        Some(Err(err)) => {
                            if err.downcast_ref::<ProtocolError>().is_some() {
                                // Failed to parse the message. Inject an ABORT at this layer,
                                // since the stream is about to be abruptly closed. Ignore the
                                // send error because the stream may already be closed.
                                self.stream.send(StreamMessage::Message(abort_message_for_error(&err))).await.ok();
                            }
                            return Err(err);
                        }
                        None => {
                            return Ok(());
                        }
                    }
                }
                message = self.user_message_rx.recv() => {
                    match message {
                        Some(message) => {
                            self.stream.send(StreamMessage::Message(message)).await?;
                        }
                        None => {
                            return Err(Error::msg("user message stream closed"));
                        }
                    }
                }
                // We expect that cancellation is the correct way to cleanly exit the service.
                _ = self.cancel_rx.recv() => {
                    return Ok(());
                }
            }
        }
    }

    async fn end(&mut self, end: ServiceEnd) -> Result<()> {
        // Ignore error with the stream, since it may already be closed.
        self.stream.close().await.ok();
        self.end_tx.send(end)?;
        Ok(())
    }
}
