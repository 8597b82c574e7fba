//! Shared test doubles and helpers.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use wsrelay::events::{SessionEvent, SessionObserver};
use wsrelay::relay::upstream::Connect;

/// Channel-backed transport implementing the same `Stream + Sink` surface as
/// a real WebSocket stream. The paired [`FakePeer`] plays the remote side.
pub struct FakeTransport {
    incoming: UnboundedReceiver<Result<Message, WsError>>,
    outgoing: UnboundedSender<Message>,
}

/// The remote end of a [`FakeTransport`].
pub struct FakePeer {
    /// Feed messages (or errors) into the session.
    pub to_session: UnboundedSender<Result<Message, WsError>>,
    /// Observe messages the session sent to this side.
    pub from_session: UnboundedReceiver<Message>,
}

pub fn fake_pair() -> (FakeTransport, FakePeer) {
    let (to_session, incoming) = unbounded_channel();
    let (outgoing, from_session) = unbounded_channel();
    (
        FakeTransport { incoming, outgoing },
        FakePeer {
            to_session,
            from_session,
        },
    )
}

impl Stream for FakeTransport {
    type Item = Result<Message, WsError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.incoming.poll_recv(cx)
    }
}

impl Sink<Message> for FakeTransport {
    type Error = WsError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        if self.outgoing.is_closed() {
            Poll::Ready(Err(WsError::ConnectionClosed))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), WsError> {
        self.outgoing
            .send(item)
            .map_err(|_| WsError::ConnectionClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        Poll::Ready(Ok(()))
    }
}

impl FakePeer {
    pub fn send(&self, msg: Message) {
        self.to_session.send(Ok(msg)).expect("session gone");
    }

    pub fn fail(&self, err: WsError) {
        self.to_session.send(Err(err)).expect("session gone");
    }

    /// Receive the next data frame from the session, skipping control frames.
    pub async fn next_data_frame(&mut self, wait: Duration) -> Option<Message> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let msg = tokio::time::timeout_at(deadline, self.from_session.recv())
                .await
                .ok()??;
            match msg {
                Message::Text(_) | Message::Binary(_) => return Some(msg),
                _ => continue,
            }
        }
    }

    /// Wait for a ping from the session.
    pub async fn expect_ping(&mut self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let Ok(msg) = tokio::time::timeout_at(deadline, self.from_session.recv()).await else {
                return false;
            };
            match msg {
                Some(Message::Ping(_)) => return true,
                Some(_) => continue,
                None => return false,
            }
        }
    }
}

/// Upstream connector with a scripted outcome per connect attempt. Each
/// successful attempt hands the test the peer side of the new link.
#[derive(Clone)]
pub struct ScriptedConnector {
    outcomes: Arc<Mutex<VecDeque<bool>>>,
    peers: UnboundedSender<FakePeer>,
    attempts: Arc<AtomicU32>,
    handshake_delay: Duration,
}

impl ScriptedConnector {
    /// `script[i]` decides whether connect attempt `i` succeeds. Attempts
    /// past the end of the script fail.
    pub fn new(script: Vec<bool>) -> (Self, UnboundedReceiver<FakePeer>) {
        let (peers, peer_rx) = unbounded_channel();
        let connector = Self {
            outcomes: Arc::new(Mutex::new(script.into())),
            peers,
            attempts: Arc::new(AtomicU32::new(0)),
            handshake_delay: Duration::ZERO,
        };
        (connector, peer_rx)
    }

    /// Make every connect attempt hang for `delay` before resolving.
    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = delay;
        self
    }

    /// Total connect attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connect for ScriptedConnector {
    type Transport = FakeTransport;

    async fn connect(&self) -> anyhow::Result<FakeTransport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.handshake_delay.is_zero() {
            tokio::time::sleep(self.handshake_delay).await;
        }
        let ok = self.outcomes.lock().unwrap().pop_front().unwrap_or(false);
        if !ok {
            anyhow::bail!("upstream refused connection");
        }
        let (transport, peer) = fake_pair();
        let _ = self.peers.send(peer);
        Ok(transport)
    }
}

/// Observer that records every event for later assertions.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn contains(&self, event: &SessionEvent) -> bool {
        self.events.lock().unwrap().iter().any(|e| e == event)
    }
}

impl SessionObserver for RecordingObserver {
    fn on_event(&self, _connection_id: &str, event: &SessionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Poll a condition until it holds or ~5 seconds pass.
pub async fn wait_until<F, Fut>(mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if cond().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

/// Relay settings shrunk for tests.
pub fn fast_relay(max_reconnect_attempts: u32) -> wsrelay::config::RelayConfig {
    wsrelay::config::RelayConfig {
        heartbeat_period_ms: 10_000,
        reconnect_delay_ms: 100,
        max_reconnect_attempts,
        outage_policy: wsrelay::relay::OutagePolicy::Drop,
    }
}

/// Start a WebSocket echo server on an ephemeral port. Returns its address.
/// Connections beyond `drop_first` are echoed; the first `drop_first`
/// connections are accepted and immediately dropped.
pub async fn spawn_echo_upstream(drop_first: u32) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dropped = Arc::new(AtomicU32::new(0));

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let dropped = dropped.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                if dropped.fetch_add(1, Ordering::SeqCst) < drop_first {
                    return; // simulate an upstream that dies right away
                }
                while let Some(Ok(msg)) = ws.next().await {
                    match msg {
                        Message::Text(_) | Message::Binary(_) => {
                            if ws.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            });
        }
    });

    format!("ws://{addr}")
}
