use std::fmt::Debug;

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Sink,
    Stream,
};

/// Data received from a [`Transport`].
pub enum TransportData {
    /// Data that should be perceived as a health check and immediately sent back to the sender.
    Ping(Vec<u8>),
    /// Data representing a meaningful WAMP message.
    Message(Vec<u8>),
}

/// A transport, over which WAMP messages can be sent and received.
///
/// Implemented as a [`Stream`] and [`Sink`] that extracts out meaningful data and reports
/// failures to be handled at higher layers. The stream ends when the connection closes, on either
/// side; it is finite and not restartable.
pub trait Transport:
    Send + Stream<Item = Result<TransportData>> + Sink<TransportData, Error = Error> + Unpin + Debug
{
}

/// A factory for creating a new [`Transport`].
///
/// Injecting a factory decouples the peer from any specific socket runtime. Every transport
/// carries JSON text frames; there is no per-connection format selection.
pub trait TransportFactory<S>: Send + Sync {
    /// Creates a new [`Transport`] over the given stream.
    fn new_transport(&self, stream: S) -> Box<dyn Transport>;
}
