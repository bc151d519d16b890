use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        http::header::SEC_WEBSOCKET_PROTOCOL,
        ClientRequestBuilder,
    },
    MaybeTlsStream,
    WebSocketStream,
};

use crate::{
    peer::{
        connector::connector::{
            Connector,
            ConnectorFactory,
        },
        peer::PeerConfig,
    },
    serializer::serializer::SerializerType,
};

#[derive(Default)]
struct WebSocketConnector {}

#[async_trait]
impl Connector<WebSocketStream<MaybeTlsStream<TcpStream>>> for WebSocketConnector {
    async fn connect(
        &self,
        config: &PeerConfig,
        uri: &str,
    ) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let mut request = ClientRequestBuilder::new(uri.try_into()?)
            .with_sub_protocol(SerializerType::Json.uri().to_string());

        if let Some(web_socket) = &config.web_socket {
            for (key, value) in &web_socket.headers {
                request = request.with_header(key, value);
            }
        }

        let (stream, response) = connect_async(request).await?;
        match response.headers().get(SEC_WEBSOCKET_PROTOCOL) {
            Some(protocol) => {
                // The router picked from the offered subprotocols, so anything unsupported here
                // is a negotiation failure.
                match SerializerType::try_from(protocol.to_str()?).map_err(Error::msg)? {
                    SerializerType::Json => Ok(stream),
                }
            }
            None => Err(Error::msg("handshake did not produce a sub-protocol")),
        }
    }
}

/// A factory for generating [`Connector`]s for WebSocket connections.
#[derive(Default)]
pub struct WebSocketConnectorFactory {}

impl ConnectorFactory<WebSocketStream<MaybeTlsStream<TcpStream>>> for WebSocketConnectorFactory {
    fn new_connector(
        &self,
    ) -> Box<dyn Connector<WebSocketStream<MaybeTlsStream<TcpStream>>> + Send> {
        Box::new(WebSocketConnector::default())
    }
}
