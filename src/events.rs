//! Session lifecycle events.
//!
//! The relay core does not format or persist log lines itself; it reports
//! discrete events through a [`SessionObserver`] so collaborators can log,
//! count, or export them however they like.

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// The client closed its side of the connection.
    ClientClosed,
    /// The client socket failed (read or write error).
    ClientError,
    /// The client stopped answering liveness probes.
    ClientUnresponsive,
    /// Upstream reconnect attempts were exhausted.
    UpstreamUnreachable,
}

/// Discrete events emitted over the lifetime of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session was created and registered.
    Created,
    /// The upstream link was (re)established.
    UpstreamConnected,
    /// A reconnect attempt was scheduled after the fixed delay.
    ReconnectScheduled { attempt: u32, max: u32 },
    /// The reconnect attempt cap was reached; upstream is declared unreachable.
    ReconnectExhausted,
    /// The session was torn down and removed from the registry.
    TornDown { reason: TeardownReason },
}

/// Receiver for session events. Implementations must be cheap and non-blocking;
/// they are called inline from the session task.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, connection_id: &str, event: &SessionEvent);
}

/// Default observer: forwards every event to `tracing`.
pub struct LogObserver;

impl SessionObserver for LogObserver {
    fn on_event(&self, connection_id: &str, event: &SessionEvent) {
        match event {
            SessionEvent::Created => {
                tracing::info!(connection_id, "Session created");
            }
            SessionEvent::UpstreamConnected => {
                tracing::info!(connection_id, "Upstream connected");
            }
            SessionEvent::ReconnectScheduled { attempt, max } => {
                tracing::warn!(
                    connection_id,
                    attempt,
                    max,
                    "Upstream reconnect scheduled"
                );
            }
            SessionEvent::ReconnectExhausted => {
                tracing::error!(connection_id, "Upstream reconnect attempts exhausted");
            }
            SessionEvent::TornDown { reason } => {
                tracing::info!(connection_id, ?reason, "Session torn down");
            }
        }
    }
}
