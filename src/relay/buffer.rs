//! Frame handling while upstream is unavailable.
//!
//! The default policy drops client frames during an outage (at-most-once
//! delivery, bounded memory). Deployments that prefer to paper over short
//! outages can opt into a bounded FIFO that is flushed, in order, once the
//! upstream link is back; on overflow the oldest frame is evicted so the
//! newest data survives.

use std::collections::VecDeque;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use tokio_tungstenite::tungstenite::Message;

/// What to do with client frames while no upstream connection is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutagePolicy {
    /// Discard frames silently.
    Drop,
    /// Hold up to `capacity` frames, evicting the oldest on overflow.
    Buffer { capacity: usize },
}

impl Default for OutagePolicy {
    fn default() -> Self {
        OutagePolicy::Drop
    }
}

// serde_yaml spells derived enums as `!tag` values; deserialize by hand so
// the config stays plain YAML: `drop` or `buffer: {capacity: N}`.
impl<'de> Deserialize<'de> for OutagePolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Keyword(String),
            Map { buffer: BufferRepr },
        }

        #[derive(Deserialize)]
        struct BufferRepr {
            capacity: usize,
        }

        match Repr::deserialize(deserializer)? {
            Repr::Keyword(s) if s == "drop" => Ok(OutagePolicy::Drop),
            Repr::Keyword(s) => Err(D::Error::custom(format!(
                "unknown outage policy `{s}`, expected `drop` or `buffer`"
            ))),
            Repr::Map { buffer } => Ok(OutagePolicy::Buffer {
                capacity: buffer.capacity,
            }),
        }
    }
}

/// Buffer applying an [`OutagePolicy`] to frames that arrive while the
/// upstream link is down.
#[derive(Debug)]
pub struct OutageBuffer {
    policy: OutagePolicy,
    frames: VecDeque<Message>,
    dropped: u64,
}

impl OutageBuffer {
    pub fn new(policy: OutagePolicy) -> Self {
        Self {
            policy,
            frames: VecDeque::new(),
            dropped: 0,
        }
    }

    /// Accept a frame that could not be relayed. Returns `true` if the frame
    /// was retained for later flushing.
    pub fn push(&mut self, frame: Message) -> bool {
        match self.policy {
            OutagePolicy::Drop => {
                self.dropped += 1;
                false
            }
            OutagePolicy::Buffer { capacity } => {
                if capacity == 0 {
                    self.dropped += 1;
                    return false;
                }
                if self.frames.len() >= capacity {
                    self.frames.pop_front();
                    self.dropped += 1;
                }
                self.frames.push_back(frame);
                true
            }
        }
    }

    /// Drain retained frames in arrival order.
    pub fn drain(&mut self) -> impl Iterator<Item = Message> + '_ {
        self.frames.drain(..)
    }

    /// Number of frames currently retained.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total frames discarded since the session started.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
