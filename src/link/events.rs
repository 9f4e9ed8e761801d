//! # Link Events
//!
//! Typed notifications the link pushes to its embedder: connection state
//! flips, disconnect reasons, health snapshots, and reconnect progress.
//!
//! Events flow over a single unbounded channel. The receiver is handed
//! out once via [`EventChannel::subscribe`]; until someone subscribes,
//! emitted events are dropped rather than queued, so an embedder that
//! never listens costs nothing.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::health::HealthSnapshot;
use super::reconnect::ReconnectSnapshot;

/// Notification emitted by the link layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkEvent {
    /// The link opened or closed
    ConnectionState {
        connected: bool,
        port: Option<String>,
        baud_rate: Option<u32>,
    },
    /// Human-readable cause for a disconnect, emitted before teardown
    DisconnectReason { reason: String },
    /// Health state changed or was refreshed
    Health(HealthSnapshot),
    /// Reconnect supervisor progress
    Reconnect(ReconnectSnapshot),
}

/// Single-subscriber event channel.
///
/// Emission never blocks and never fails: without a subscriber events are
/// discarded, and after the subscriber goes away sends are silently
/// ignored.
pub struct EventChannel {
    sender: mpsc::UnboundedSender<LinkEvent>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    subscribed: AtomicBool,
}

impl EventChannel {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            subscribed: AtomicBool::new(false),
        }
    }

    /// Take the receiving end of the channel.
    ///
    /// # Returns
    ///
    /// The receiver on the first call, `None` on every call after that.
    pub fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        let taken = match self.receiver.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if taken.is_some() {
            self.subscribed.store(true, Ordering::SeqCst);
        }
        taken
    }

    /// Emit an event to the subscriber, if there is one.
    pub fn emit(&self, event: LinkEvent) {
        if !self.subscribed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.sender.send(event);
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> LinkEvent {
        LinkEvent::ConnectionState {
            connected: true,
            port: Some("/dev/ttyUSB0".to_string()),
            baud_rate: Some(9600),
        }
    }

    #[test]
    fn test_subscribe_hands_out_receiver_once() {
        let channel = EventChannel::new();
        assert!(channel.subscribe().is_some());
        assert!(channel.subscribe().is_none());
    }

    #[test]
    fn test_emit_reaches_subscriber() {
        let channel = EventChannel::new();
        let mut receiver = channel.subscribe().unwrap();

        channel.emit(sample_event());

        let received = receiver.try_recv().unwrap();
        assert_eq!(received, sample_event());
    }

    #[test]
    fn test_emit_without_subscriber_is_dropped() {
        let channel = EventChannel::new();
        channel.emit(sample_event());

        // Events before the subscription must not be queued up
        let mut receiver = channel.subscribe().unwrap();
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_emit_after_receiver_dropped_is_ignored() {
        let channel = EventChannel::new();
        let receiver = channel.subscribe().unwrap();
        drop(receiver);

        // Must not panic or error
        channel.emit(sample_event());
    }

    #[test]
    fn test_connection_state_serializes_with_type_tag() {
        let json = serde_json::to_value(sample_event()).unwrap();
        assert_eq!(json["type"], "connection_state");
        assert_eq!(json["connected"], true);
        assert_eq!(json["port"], "/dev/ttyUSB0");
        assert_eq!(json["baud_rate"], 9600);
    }

    #[test]
    fn test_disconnect_reason_serializes_with_type_tag() {
        let event = LinkEvent::DisconnectReason {
            reason: "Serial connection closed".to_string(),
        };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["type"], "disconnect_reason");
        assert_eq!(json["reason"], "Serial connection closed");
    }
}
