//! # Broadcast Dispatcher
//!
//! The `Dispatcher` is the publish/broadcast gateway of the live pipeline. It
//! takes one server message and fans it out to every open subscriber channel.
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: A message is wrapped in an `Arc` once. Each
//!     subscriber receives a new `Arc` pointer to the *same* allocation, so
//!     the payload is serialized per socket but never cloned per subscriber.
//!
//! 2.  **Non-blocking Sends**: Every subscriber owns an unbounded MPSC queue
//!     drained by its own socket task. Pushing into it never waits, so a slow
//!     or stuck socket cannot hold up the HTTP request that triggered the
//!     broadcast, nor the other subscribers.
//!
//! 3.  **Isolated Failures**: A failed push means the socket task is gone. That
//!     subscriber is dropped from the set and the loop moves on; nobody else
//!     notices.
//!
//! 4.  **At-most-once, no replay**: Nothing is queued on behalf of absent
//!     subscribers. With zero subscribers a broadcast is simply dropped.
//!
//! The subscriber list sits behind a `Mutex`. Registration, removal and the
//! whole fan-out loop run under that lock, so a channel closing mid-broadcast
//! can never invalidate the iteration.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::error::GreenError;
use crate::core::waste_log::WasteLogEntry;

/// # Server Message
///
/// Every frame the server pushes to a subscriber. Tagged by `type` on the wire:
///
/// - `{"type":"welcome","ts":<epoch-ms>}` right after a channel opens.
/// - `{"type":"waste","payload":<entry>}` for each new waste log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Informational handshake sent on open.
    Welcome {
        /// Server time in milliseconds since the Unix epoch.
        ts: i64,
    },
    /// A waste log event. The payload is whatever was published.
    Waste {
        /// Usually a serialized `WasteLogEntry`.
        payload: Value,
    },
}

impl ServerMessage {
    /// Welcome frame stamped with the current time.
    pub fn welcome_now() -> Self {
        ServerMessage::Welcome {
            ts: crate::utils::epoch_millis(),
        }
    }

    /// Serializes the frame for a text WebSocket message.
    pub fn to_json(&self) -> Result<String, GreenError> {
        serde_json::to_string(self).map_err(|e| GreenError::Transport(e.to_string()))
    }

    /// Parses a text frame. Unknown `type`s and garbage yield `None`.
    pub fn decode(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// The payload of a `waste` frame decoded as a `WasteLogEntry`.
    ///
    /// Returns `None` for other frame types, or when the payload is missing,
    /// null, or does not have the entry shape.
    pub fn waste_entry(&self) -> Option<WasteLogEntry> {
        match self {
            ServerMessage::Waste { payload } if !payload.is_null() => {
                serde_json::from_value(payload.clone()).ok()
            }
            _ => None,
        }
    }
}

/// # Client Handle
///
/// The dispatcher's side of one subscriber channel.
struct ClientHandle {
    /// Connection-scoped identifier; not stable across reconnects.
    id: String,
    /// Sending half of the subscriber's queue. Unbounded: a send only fails
    /// once the receiving socket task has dropped its end.
    sender: mpsc::UnboundedSender<Arc<ServerMessage>>,
}

/// # Core Dispatcher
///
/// Manages the registration, deregistration, and broadcasting of frames to
/// every open subscriber channel.
#[derive(Default)]
pub struct Dispatcher {
    clients: Mutex<Vec<ClientHandle>>,
}

impl Dispatcher {
    /// Creates a dispatcher with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// # Add Client
    ///
    /// Registers a subscriber and returns the receiving half of its queue. The
    /// caller's socket task drains it; dropping the receiver is enough to get
    /// the subscriber removed on the next broadcast.
    pub fn add_client(&self, id: &str) -> mpsc::UnboundedReceiver<Arc<ServerMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut clients = self.clients.lock().expect("Dispatcher lock poisoned");
        clients.push(ClientHandle {
            id: id.to_string(),
            sender: tx,
        });
        log::info!("Subscriber '{}' registered ({} open)", id, clients.len());
        rx
    }

    /// # Broadcast
    ///
    /// Wraps `payload` as a `waste` frame and fans it out. Returns how many
    /// subscribers accepted the frame.
    pub fn broadcast(&self, payload: Value) -> usize {
        self.send_message(ServerMessage::Waste { payload })
    }

    /// Fans an arbitrary frame out to every open subscriber.
    ///
    /// Subscribers whose queue is closed are removed in the same pass.
    pub fn send_message(&self, message: ServerMessage) -> usize {
        let frame = Arc::new(message);
        let mut clients = self.clients.lock().expect("Dispatcher lock poisoned");
        let mut delivered = 0;

        clients.retain(|client| match client.sender.send(Arc::clone(&frame)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                log::info!("Subscriber '{}' is gone. Removing from dispatcher.", client.id);
                false
            }
        });

        log::debug!("Broadcast delivered to {} subscriber(s)", delivered);
        delivered
    }

    /// Removes a specific subscriber by its id.
    pub fn remove_client(&self, id: &str) {
        let mut clients = self.clients.lock().expect("Dispatcher lock poisoned");
        clients.retain(|c| c.id != id);
        log::info!("Subscriber '{}' removed ({} open)", id, clients.len());
    }

    /// Number of currently registered subscribers.
    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("Dispatcher lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn welcome_and_waste_wire_shapes() {
        let welcome = ServerMessage::Welcome { ts: 1700000000000 };
        assert_eq!(
            welcome.to_json().unwrap(),
            r#"{"type":"welcome","ts":1700000000000}"#
        );

        let waste = ServerMessage::Waste {
            payload: json!({"id": "x"}),
        };
        assert_eq!(
            serde_json::to_value(&waste).unwrap(),
            json!({"type": "waste", "payload": {"id": "x"}})
        );
    }

    #[test]
    fn decode_ignores_unknown_types() {
        assert!(ServerMessage::decode(r#"{"type":"pricing","message":"abc"}"#).is_none());
        assert!(ServerMessage::decode("not json").is_none());
        assert_eq!(
            ServerMessage::decode(r#"{"type":"welcome","ts":5}"#),
            Some(ServerMessage::Welcome { ts: 5 })
        );
    }

    #[test]
    fn fan_out_reaches_every_subscriber_once() {
        let dispatcher = Dispatcher::new();
        let mut a = dispatcher.add_client("a");
        let mut b = dispatcher.add_client("b");

        let delivered = dispatcher.broadcast(json!({"id": "1"}));
        assert_eq!(delivered, 2);

        for rx in [&mut a, &mut b] {
            let frame = rx.try_recv().unwrap();
            assert_eq!(*frame, ServerMessage::Waste { payload: json!({"id": "1"}) });
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn dead_subscriber_does_not_block_the_others() {
        let dispatcher = Dispatcher::new();
        let mut a = dispatcher.add_client("a");
        let dead = dispatcher.add_client("dead");
        let mut c = dispatcher.add_client("c");
        drop(dead);

        let delivered = dispatcher.broadcast(json!({"id": "2"}));

        assert_eq!(delivered, 2);
        assert_eq!(dispatcher.client_count(), 2);
        assert!(a.try_recv().is_ok());
        assert!(c.try_recv().is_ok());
    }

    #[test]
    fn broadcast_without_subscribers_is_dropped() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.broadcast(json!({})), 0);

        // A late subscriber does not see earlier frames.
        let mut late = dispatcher.add_client("late");
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn remove_client_unregisters() {
        let dispatcher = Dispatcher::new();
        let _a = dispatcher.add_client("a");
        let _b = dispatcher.add_client("b");
        dispatcher.remove_client("a");
        assert_eq!(dispatcher.client_count(), 1);
    }
}
