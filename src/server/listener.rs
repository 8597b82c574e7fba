//! Inbound acceptance boundary.
//!
//! Accepts TCP connections, rejects anything that is not a WebSocket
//! upgrade, completes the handshake, and hands each ready client socket to
//! a freshly spawned [`ProxySession`] with a unique connection id. The
//! relay core never sees raw HTTP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::info;
use uuid::Uuid;

use crate::config::{Config, RelayConfig};
use crate::events::SessionObserver;
use crate::registry::ConnectionRegistry;
use crate::relay::session::ProxySession;
use crate::relay::upstream::UpstreamConnector;

/// How long a client may take to present its request head.
const HANDSHAKE_READ_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run(
    cfg: &Config,
    registry: ConnectionRegistry,
    observer: Arc<dyn SessionObserver>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&cfg.listen_addr.0)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.listen_addr))?;
    info!("Listening on {}", cfg.listen_addr);

    let connector = UpstreamConnector::new(cfg.upstream.clone());
    serve(listener, connector, registry, observer, cfg.relay.clone()).await
}

/// Accept loop over an already-bound listener. Split out of [`run`] so tests
/// can serve on an ephemeral port.
pub async fn serve(
    listener: TcpListener,
    connector: UpstreamConnector,
    registry: ConnectionRegistry,
    observer: Arc<dyn SessionObserver>,
    relay_cfg: RelayConfig,
) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Accepted connection from {}", peer);

        let connector = connector.clone();
        let registry = registry.clone();
        let observer = observer.clone();
        let relay_cfg = relay_cfg.clone();

        tokio::spawn(async move {
            let handled = handle_connection(
                socket,
                peer.to_string(),
                connector,
                registry,
                observer,
                relay_cfg,
            )
            .await;
            if let Err(e) = handled {
                tracing::error!("Connection error from {}: {}", peer, e);
            }
        });
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    peer: String,
    connector: UpstreamConnector,
    registry: ConnectionRegistry,
    observer: Arc<dyn SessionObserver>,
    relay_cfg: RelayConfig,
) -> anyhow::Result<()> {
    let is_upgrade = timeout(HANDSHAKE_READ_TIMEOUT, sniff_upgrade(&socket))
        .await
        .context("Timed out reading request head")??;

    if !is_upgrade {
        reject(&mut socket).await?;
        return Ok(());
    }

    let client = tokio_tungstenite::accept_async(socket)
        .await
        .context("WebSocket handshake failed")?;

    let connection_id = Uuid::new_v4().to_string();
    let session = ProxySession::new(
        connection_id,
        peer,
        client,
        connector,
        registry,
        observer,
        relay_cfg,
    );
    session.run().await;

    Ok(())
}

/// Peek at the request head without consuming it and decide whether this is
/// a WebSocket upgrade. The bytes stay in the socket buffer for the real
/// handshake.
async fn sniff_upgrade(socket: &TcpStream) -> anyhow::Result<bool> {
    let mut buf = [0u8; 2048];

    loop {
        let n = socket.peek(&mut buf).await?;
        if n == 0 {
            // Peer went away before sending a request
            return Ok(false);
        }

        let head = &buf[..n];
        if let Some(end) = head.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&head[..end]);
            return Ok(has_header_token(&head, "upgrade", "websocket"));
        }

        if n == buf.len() {
            // Header section exceeds the peek window; no sane upgrade
            // request is this large.
            return Ok(false);
        }

        // Head is incomplete; let more bytes arrive before peeking again.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Case-insensitive check that a header carries the given token.
fn has_header_token(head: &str, name: &str, token: &str) -> bool {
    head.lines().skip(1).any(|line| {
        let Some((key, value)) = line.split_once(':') else {
            return false;
        };
        key.trim().eq_ignore_ascii_case(name)
            && value
                .split(',')
                .any(|v| v.trim().eq_ignore_ascii_case(token))
    })
}

/// Respond to a non-upgrade request with guidance and close the connection.
async fn reject(socket: &mut TcpStream) -> anyhow::Result<()> {
    let body = "This endpoint only accepts WebSocket connections. \
                Reconnect with a WebSocket client using the ws:// scheme \
                against this same host and port.\n";
    let response = format!(
        "HTTP/1.1 426 Upgrade Required\r\n\
         Upgrade: websocket\r\n\
         Connection: close\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        body.len(),
        body
    );

    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await?;
    Ok(())
}
