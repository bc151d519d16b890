//! # wamplink
//!
//! **wamplink** is a client-side implementation of the **Web Application Messaging Protocol**
//! (WAMP v2) for Rust.
//!
//! The library implements the peer (a.k.a., client) half of the protocol: it connects to a WAMP
//! router over a WebSocket, establishes a session in a realm, and exposes the four peer
//! operations — *call*, *register*, *publish*, *subscribe* — over a single multiplexed
//! full-duplex connection. Messages are serialized as JSON using the `wamp.2.json` subprotocol.
//!
//! The library uses [`tokio`](https://tokio.rs) as its asynchronous runtime.
//!
//! The WAMP protocol specification is described [here](https://wamp-proto.org/spec.html).
//!
//! ## Connecting to a realm
//!
//! Configure a peer using a [`PeerConfig`][`crate::peer::PeerConfig`] and construct a
//! [`Peer`][`crate::peer::Peer`] directly. If you are working with WebSocket connections, the
//! [`new_web_socket_peer`][`crate::peer::new_web_socket_peer`] utility function sets up the
//! proper modules for convenience.
//!
//! ```no_run
//! use wamplink::peer::{
//!     new_web_socket_peer,
//!     PeerConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut peer = new_web_socket_peer(PeerConfig::default())?;
//!     peer.connect("ws://localhost:8080").await?;
//!     peer.join_realm("com.myapp.realm").await?;
//!
//!     // Interact with the realm...
//!
//!     peer.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## RPC
//!
//! Calls are issued with progressive results enabled: the returned
//! [`Rpc`][`crate::peer::Rpc`] yields each progressive payload as it arrives, then the final
//! payload (if any). Dropping the `Rpc` before the call terminates cancels it.
//!
//! ```no_run
//! use wamplink::{
//!     core::uri::Uri,
//!     peer::{
//!         new_web_socket_peer,
//!         PeerConfig,
//!         RpcCall,
//!     },
//! };
//! use wamplink::core::types::Value;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut peer = new_web_socket_peer(PeerConfig::default())?;
//!     peer.connect("ws://localhost:8080").await?;
//!     peer.join_realm("com.myapp.realm").await?;
//!
//!     let mut rpc = peer
//!         .call(
//!             Uri::try_from("com.myapp.add2")?,
//!             RpcCall {
//!                 arguments: Vec::from_iter([Value::Integer(1), Value::Integer(2)]),
//!                 ..Default::default()
//!             },
//!         )
//!         .await?;
//!     while let Some(result) = rpc.next_result().await {
//!         println!("{:?}", result?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! On the callee side, a procedure is a [`ProcedureHandler`][`crate::peer::ProcedureHandler`]
//! producing a lazy stream of payloads per invocation. When the caller asked for progressive
//! results, each payload is relayed as it is produced; otherwise only the last one is reported.
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use wamplink::{
//!     core::uri::Uri,
//!     peer::{
//!         new_web_socket_peer,
//!         Invocation,
//!         PayloadStream,
//!         PeerConfig,
//!         RpcYield,
//!     },
//! };
//!
//! fn echo(invocation: Invocation) -> PayloadStream {
//!     futures_util::stream::iter([Ok(RpcYield {
//!         arguments: invocation.arguments,
//!         arguments_keyword: invocation.arguments_keyword,
//!     })])
//!     .boxed()
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut peer = new_web_socket_peer(PeerConfig::default())?;
//!     peer.connect("ws://localhost:8080").await?;
//!     peer.join_realm("com.myapp.realm").await?;
//!
//!     let registration = peer.register(Uri::try_from("com.myapp.echo")?, echo).await?;
//!
//!     // Handle invocations until unregistered...
//!
//!     peer.unregister(registration).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Pub/Sub
//!
//! ```no_run
//! use wamplink::{
//!     core::uri::Uri,
//!     peer::{
//!         new_web_socket_peer,
//!         PeerConfig,
//!         PublishedEvent,
//!     },
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut peer = new_web_socket_peer(PeerConfig::default())?;
//!     peer.connect("ws://localhost:8080").await?;
//!     peer.join_realm("com.myapp.realm").await?;
//!
//!     let mut subscription = peer.subscribe(Uri::try_from("com.myapp.topic")?).await?;
//!     peer.publish(
//!         Uri::try_from("com.myapp.topic")?,
//!         PublishedEvent::default(),
//!     )
//!     .await?;
//!     while let Some(event) = subscription.next_event().await {
//!         println!("{:?}", event?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod core;
pub mod message;
pub mod peer;
pub mod serializer;
pub mod transport;
