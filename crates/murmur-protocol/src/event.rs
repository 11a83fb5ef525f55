//! Events emitted by the gossip engine to its observer.

use std::time::SystemTime;

use tokio::sync::mpsc;

use crate::address::{PeerAddr, PeerId};
use crate::message::Message;

/// An observable state change inside the peer.
#[derive(Clone, Debug)]
pub enum Event {
    /// A peer address was inserted or replaced in the DHT.
    ///
    /// Emitted once per real change; idempotent updates stay silent.
    PeerChanged {
        /// When the change was applied.
        time: SystemTime,
        /// The new address.
        address: PeerAddr,
    },

    /// A cast, multicast or broadcast payload arrived.
    MessageReceived {
        /// When the payload was accepted.
        time: SystemTime,
        /// The connection-authenticated sender, when known.
        from: Option<PeerId>,
        /// The accepted message.
        message: Message,
    },
}

impl Event {
    /// A `PeerChanged` event stamped with the current time.
    pub fn peer_changed(address: PeerAddr) -> Self {
        Event::PeerChanged {
            time: SystemTime::now(),
            address,
        }
    }

    /// A `MessageReceived` event stamped with the current time.
    pub fn message_received(from: Option<PeerId>, message: Message) -> Self {
        Event::MessageReceived {
            time: SystemTime::now(),
            from,
            message,
        }
    }
}

/// Sink for events, drained by the embedding application.
pub type EventSender = mpsc::Sender<Event>;

/// Receiving half of the event channel.
pub type EventReceiver = mpsc::Receiver<Event>;
