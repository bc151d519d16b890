use anyhow::Result;
use async_trait::async_trait;

use crate::peer::peer::PeerConfig;

/// A type for initiating a connection to a router.
///
/// The connector owns subprotocol negotiation: the returned stream is only produced once the
/// router has agreed to speak `wamp.2.json`.
#[async_trait]
pub trait Connector<S> {
    async fn connect(&self, config: &PeerConfig, uri: &str) -> Result<S>;
}

/// A type for generating a new [`Connector`].
///
/// Injecting a factory decouples the peer from any specific socket construction, so alternate
/// runtimes and in-process test streams plug in without touching session code.
#[async_trait]
pub trait ConnectorFactory<S>: Send + Sync {
    /// Creates a new [`Connector`].
    fn new_connector(&self) -> Box<dyn Connector<S> + Send>;
}
