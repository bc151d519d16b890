use std::{
    fmt::Debug,
    pin::Pin,
    sync::Once,
    task,
    time::Duration,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Sink,
    Stream,
};
use tokio::sync::mpsc::{
    unbounded_channel,
    UnboundedReceiver,
    UnboundedSender,
};
use wamplink::transport::transport::{
    Transport,
    TransportData,
};

static INIT: Once = Once::new();

pub fn setup_test_environment() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing_core::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    });
}

/// A channel-backed transport, standing in for a WebSocket connection to a router.
pub struct MockTransport {
    inbound_rx: UnboundedReceiver<Result<TransportData>>,
    outbound_tx: UnboundedSender<Vec<u8>>,
}

impl Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport").finish_non_exhaustive()
    }
}

impl Transport for MockTransport {}

impl Stream for MockTransport {
    type Item = Result<TransportData>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        self.inbound_rx.poll_recv(cx)
    }
}

impl Sink<TransportData> for MockTransport {
    type Error = Error;

    fn poll_ready(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: TransportData) -> Result<(), Self::Error> {
        match item {
            TransportData::Ping(_) => Ok(()),
            TransportData::Message(data) => self
                .outbound_tx
                .send(data)
                .map_err(|_| Error::msg("router end is gone")),
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }

    fn poll_close(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }
}

/// The router-side handle of a [`MockTransport`].
pub struct MockRouter {
    inbound_tx: Option<UnboundedSender<Result<TransportData>>>,
    outbound_rx: UnboundedReceiver<Vec<u8>>,
}

impl MockRouter {
    /// Delivers a frame to the peer.
    pub fn send(&self, frame: &str) {
        self.inbound_tx
            .as_ref()
            .expect("transport is closed")
            .send(Ok(TransportData::Message(frame.as_bytes().to_vec())))
            .expect("peer end is gone");
    }

    /// Fails the transport with the given cause.
    pub fn fail(&self, cause: &str) {
        self.inbound_tx
            .as_ref()
            .expect("transport is closed")
            .send(Err(Error::msg(cause.to_owned())))
            .expect("peer end is gone");
    }

    /// Closes the transport.
    pub fn close(&mut self) {
        self.inbound_tx.take();
    }

    /// The next frame sent by the peer, parsed as JSON.
    pub async fn next_frame(&mut self) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.outbound_rx.recv())
            .await
            .expect("timed out waiting for an outbound frame")
            .expect("peer closed the transport");
        serde_json::from_slice(&frame).expect("outbound frame is not valid JSON")
    }

    /// The next frame sent by the peer, as raw text.
    pub async fn next_frame_text(&mut self) -> String {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.outbound_rx.recv())
            .await
            .expect("timed out waiting for an outbound frame")
            .expect("peer closed the transport");
        String::from_utf8(frame).expect("outbound frame is not valid UTF-8")
    }

    /// Asserts the peer sends nothing within a grace period.
    pub async fn expect_no_frame(&mut self) {
        match tokio::time::timeout(Duration::from_millis(100), self.outbound_rx.recv()).await {
            Err(_) => (),
            Ok(None) => (),
            Ok(Some(frame)) => panic!(
                "unexpected outbound frame: {}",
                String::from_utf8_lossy(&frame)
            ),
        }
    }
}

/// Creates a connected transport and its router-side handle.
pub fn mock_connection() -> (Box<dyn Transport>, MockRouter) {
    let (inbound_tx, inbound_rx) = unbounded_channel();
    let (outbound_tx, outbound_rx) = unbounded_channel();
    (
        Box::new(MockTransport {
            inbound_rx,
            outbound_tx,
        }),
        MockRouter {
            inbound_tx: Some(inbound_tx),
            outbound_rx,
        },
    )
}
