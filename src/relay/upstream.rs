//! Upstream link establishment.
//!
//! The upstream endpoint is fixed for the process lifetime. Connecting means
//! a WebSocket handshake carrying the identifying agent string and the
//! `Origin` value the service expects, bounded by the handshake timeout.
//! Compression is never offered on the wire.

use std::future::Future;

use anyhow::Context as _;
use futures_util::{Sink, Stream};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::UpstreamConfig;

/// A bidirectional WebSocket frame transport. Both the client socket handed
/// over by the listener and the upstream link satisfy this; tests substitute
/// channel-backed doubles.
pub trait Transport:
    Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin + Send
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin + Send
{
}

/// Factory for upstream connections. Every (re)connect goes through here,
/// which is also the seam session tests use to inject failures.
pub trait Connect: Send + Sync + 'static {
    type Transport: Transport;

    fn connect(&self) -> impl Future<Output = anyhow::Result<Self::Transport>> + Send;
}

/// Production upstream transport.
pub type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the fixed upstream WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamConnector {
    cfg: UpstreamConfig,
}

impl UpstreamConnector {
    pub fn new(cfg: UpstreamConfig) -> Self {
        Self { cfg }
    }

    fn handshake_request(&self) -> anyhow::Result<Request> {
        let mut request = self
            .cfg
            .url
            .as_str()
            .into_client_request()
            .with_context(|| format!("Invalid upstream URL: {}", self.cfg.url))?;

        let headers = request.headers_mut();
        headers.insert(
            "User-Agent",
            HeaderValue::from_str(&self.cfg.agent).context("Invalid agent string")?,
        );
        headers.insert(
            "Origin",
            HeaderValue::from_str(&self.cfg.origin).context("Invalid origin value")?,
        );

        Ok(request)
    }
}

impl Connect for UpstreamConnector {
    type Transport = UpstreamStream;

    async fn connect(&self) -> anyhow::Result<UpstreamStream> {
        let request = self.handshake_request()?;

        let (stream, response) = timeout(self.cfg.handshake_timeout(), connect_async(request))
            .await
            .context("Upstream handshake timed out")?
            .context("Upstream handshake failed")?;

        tracing::debug!(
            url = %self.cfg.url,
            status = %response.status(),
            "Upstream handshake complete"
        );

        Ok(stream)
    }
}
