//! The per-connection proxy session.
//!
//! One session couples one client socket to one upstream link and relays
//! frames verbatim in both directions until either side fails or closes.
//! The session runs as a single task driving an explicit state machine:
//!
//! ```text
//!        ┌──────────────┐  handshake ok   ┌──────────┐
//!        │  Connecting  │ ───────────────▶│   Open   │
//!        └──────┬───────┘                 └────┬─────┘
//!               │ handshake failed             │ upstream lost
//!               ▼                              ▼
//!        ┌──────────────┐  delay elapsed ┌──────────────┐
//!        │ Reconnecting │◀───────────────┤ Reconnecting │ (same state)
//!        └──────┬───────┘                └──────────────┘
//!               │ attempts exhausted, client closed/failed/unresponsive
//!               ▼
//!        ┌──────────────┐
//!        │    Closed    │ → cleanup: close client, deregister
//!        └──────────────┘
//! ```
//!
//! The upstream transport and the heartbeat interval live only inside the
//! `Open` state, so a heartbeat can never fire without an upstream link and
//! at most one upstream connection exists at any instant. Because every
//! timer and both sockets are serviced by the one task, a pending reconnect
//! delay is cancelled the moment the client goes away; no scheduled attempt
//! can race with teardown.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::time::{Instant, interval_at, sleep};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::config::RelayConfig;
use crate::events::{SessionEvent, SessionObserver, TeardownReason};
use crate::registry::ConnectionRegistry;
use crate::relay::buffer::OutageBuffer;
use crate::relay::upstream::{Connect, Transport};

/// Session state. The upstream transport is owned by `Open` alone.
enum State<T> {
    /// An upstream handshake is in flight.
    Connecting,
    /// Steady relay: client and upstream both live, heartbeat running.
    Open(T),
    /// Upstream was lost; waiting out the fixed delay before the next attempt.
    Reconnecting,
    /// Terminal. Cleanup runs exactly once after this.
    Closed(TeardownReason),
}

/// One end-to-end relay pairing a client connection with the upstream.
pub struct ProxySession<C, U>
where
    C: Transport,
    U: Connect,
{
    connection_id: String,
    peer: String,
    client: C,
    connector: U,
    registry: ConnectionRegistry,
    observer: Arc<dyn SessionObserver>,
    settings: RelayConfig,
    outage: OutageBuffer,
    is_alive: bool,
    reconnect_attempts: u32,
}

impl<C, U> ProxySession<C, U>
where
    C: Transport,
    U: Connect,
{
    pub fn new(
        connection_id: String,
        peer: String,
        client: C,
        connector: U,
        registry: ConnectionRegistry,
        observer: Arc<dyn SessionObserver>,
        settings: RelayConfig,
    ) -> Self {
        let outage = OutageBuffer::new(settings.outage_policy);
        Self {
            connection_id,
            peer,
            client,
            connector,
            registry,
            observer,
            settings,
            outage,
            is_alive: true,
            reconnect_attempts: 0,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Drive the session to completion. Consumes the session; when this
    /// returns, the client socket is closed and the registry entry is gone.
    pub async fn run(mut self) {
        self.emit(SessionEvent::Created);
        self.registry.insert(&self.connection_id, &self.peer).await;

        let mut state = State::Connecting;
        let reason = loop {
            state = match state {
                State::Connecting => self.run_connecting().await,
                State::Open(link) => self.run_open(link).await,
                State::Reconnecting => self.run_reconnecting().await,
                State::Closed(reason) => break reason,
            };
        };

        self.cleanup(reason).await;
    }

    /// Attempt one upstream handshake while still servicing the client.
    async fn run_connecting(&mut self) -> State<U::Transport> {
        // The pinned future borrows the connector, so it must be dropped
        // before the connect result is acted on below.
        let res = {
            let connect = self.connector.connect();
            tokio::pin!(connect);

            loop {
                tokio::select! {
                    res = &mut connect => break res,

                    item = self.client.next() => {
                        if let Some(reason) = Self::absorb_offline_item(
                            &self.connection_id,
                            &mut self.is_alive,
                            &mut self.outage,
                            item,
                        ) {
                            return State::Closed(reason);
                        }
                    }
                }
            }
        };

        match res {
            Ok(link) => self.on_connected(link).await,
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    error = %e,
                    "Upstream connect failed"
                );
                State::Reconnecting
            }
        }
    }

    /// A fresh upstream link: reset the attempt counter, flush anything the
    /// outage policy retained, and enter steady relay.
    async fn on_connected(&mut self, mut link: U::Transport) -> State<U::Transport> {
        self.reconnect_attempts = 0;
        self.emit(SessionEvent::UpstreamConnected);

        let held: Vec<Message> = self.outage.drain().collect();
        for frame in held {
            if let Err(e) = link.send(frame).await {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    error = %e,
                    "Upstream failed while flushing held frames"
                );
                let _ = link.close().await;
                return State::Reconnecting;
            }
        }

        State::Open(link)
    }

    /// Steady relay: forward frames both ways and probe client liveness on
    /// the heartbeat period. The heartbeat interval lives in this frame and
    /// stops the instant the state is left.
    async fn run_open(&mut self, mut link: U::Transport) -> State<U::Transport> {
        let period = self.settings.heartbeat_period();
        let mut heartbeat = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if !self.is_alive {
                        // No pong since the previous probe: the client is dead.
                        let _ = link.close().await;
                        return State::Closed(TeardownReason::ClientUnresponsive);
                    }
                    self.is_alive = false;
                    if self.client.send(Message::Ping(Bytes::new())).await.is_err() {
                        let _ = link.close().await;
                        return State::Closed(TeardownReason::ClientError);
                    }
                }

                item = self.client.next() => match item {
                    None => {
                        let _ = link.close().await;
                        return State::Closed(TeardownReason::ClientClosed);
                    }
                    Some(Err(e)) => {
                        tracing::debug!(
                            connection_id = %self.connection_id,
                            error = %e,
                            "Client socket error"
                        );
                        let _ = link.close().await;
                        return State::Closed(TeardownReason::ClientError);
                    }
                    Some(Ok(Message::Close(_))) => {
                        let _ = link.close().await;
                        return State::Closed(TeardownReason::ClientClosed);
                    }
                    Some(Ok(Message::Pong(_))) => {
                        self.is_alive = true;
                    }
                    // Client pings are answered by the transport itself.
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(frame)) => {
                        // A send failure here is transient: reconnect upstream,
                        // keep the client.
                        if let Err(e) = link.send(frame).await {
                            tracing::debug!(
                                connection_id = %self.connection_id,
                                error = %e,
                                "Upstream send failed"
                            );
                            let _ = link.close().await;
                            return State::Reconnecting;
                        }
                    }
                },

                item = link.next() => match item {
                    None | Some(Ok(Message::Close(_))) => {
                        tracing::debug!(
                            connection_id = %self.connection_id,
                            "Upstream closed"
                        );
                        return State::Reconnecting;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(
                            connection_id = %self.connection_id,
                            error = %e,
                            "Upstream socket error"
                        );
                        return State::Reconnecting;
                    }
                    Some(Ok(Message::Ping(_)))
                    | Some(Ok(Message::Pong(_)))
                    | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(frame)) => {
                        // The client being unreachable is fatal for the session.
                        if self.client.send(frame).await.is_err() {
                            let _ = link.close().await;
                            return State::Closed(TeardownReason::ClientError);
                        }
                    }
                },
            }
        }
    }

    /// Gate the attempt counter, then wait out the fixed delay. The client
    /// is still serviced during the wait so its departure cancels the
    /// pending attempt.
    async fn run_reconnecting(&mut self) -> State<U::Transport> {
        self.reconnect_attempts += 1;
        let max = self.settings.max_reconnect_attempts;
        if self.reconnect_attempts >= max {
            self.emit(SessionEvent::ReconnectExhausted);
            return State::Closed(TeardownReason::UpstreamUnreachable);
        }

        self.emit(SessionEvent::ReconnectScheduled {
            attempt: self.reconnect_attempts,
            max,
        });

        let delay = sleep(self.settings.reconnect_delay());
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => return State::Connecting,

                item = self.client.next() => {
                    if let Some(reason) = Self::absorb_offline_item(
                        &self.connection_id,
                        &mut self.is_alive,
                        &mut self.outage,
                        item,
                    ) {
                        return State::Closed(reason);
                    }
                }
            }
        }
    }

    /// Handle one client stream item while no upstream link is open.
    /// Data frames go to the outage policy; returns the teardown reason if
    /// the client is gone.
    fn absorb_offline_item(
        connection_id: &str,
        is_alive: &mut bool,
        outage: &mut OutageBuffer,
        item: Option<Result<Message, WsError>>,
    ) -> Option<TeardownReason> {
        match item {
            None => Some(TeardownReason::ClientClosed),
            Some(Err(e)) => {
                tracing::debug!(connection_id, error = %e, "Client socket error");
                Some(TeardownReason::ClientError)
            }
            Some(Ok(Message::Close(_))) => Some(TeardownReason::ClientClosed),
            Some(Ok(Message::Pong(_))) => {
                *is_alive = true;
                None
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Frame(_))) => None,
            Some(Ok(frame)) => {
                if !outage.push(frame) {
                    tracing::trace!(connection_id, "Dropped client frame, upstream down");
                }
                None
            }
        }
    }

    /// Teardown. Runs exactly once, after the state loop exits: the
    /// heartbeat and upstream link were dropped with the `Open` state, so
    /// the timer is already stopped when the sockets are released here.
    async fn cleanup(&mut self, reason: TeardownReason) {
        let _ = self.client.close().await;
        self.registry.remove(&self.connection_id).await;
        self.emit(SessionEvent::TornDown { reason });
    }

    fn emit(&self, event: SessionEvent) {
        self.observer.on_event(&self.connection_id, &event);
    }
}
