//! Direct-cast messaging: one payload to one peer.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use murmur_protocol::{
    Event, EventSender, GroupId, Message, MessageOnTheWire, MessageSender, MessageVariant, PeerId,
    V1,
};

use crate::dht::Dht;
use crate::error::{PeerError, Result};
use crate::pingpong::validate;
use crate::send_with_cancel;

/// The direct-cast handler.
#[derive(Clone)]
pub struct Caster {
    dht: Arc<Dht>,
    messages: MessageSender,
    events: EventSender,
}

impl Caster {
    /// Create a handler.
    pub fn new(dht: Arc<Dht>, messages: MessageSender, events: EventSender) -> Self {
        Self {
            dht,
            messages,
            events,
        }
    }

    /// Send `body` directly to `to`.
    ///
    /// Fails with [`PeerError::PeerNotFound`] if the peer is unknown.
    pub async fn cast(&self, cancel: &CancellationToken, to: PeerId, body: Vec<u8>) -> Result<()> {
        let peer_addr = self.dht.peer_address(&to)?;
        let message = Message::new(V1, MessageVariant::Cast, GroupId::NIL, body);

        send_with_cancel(&self.messages, MessageOnTheWire::outbound(peer_addr, message), cancel)
            .await
    }

    /// Accept an inbound cast, surfacing it to the observer.
    pub async fn accept_cast(
        &self,
        cancel: &CancellationToken,
        from: Option<PeerId>,
        message: Message,
    ) -> Result<()> {
        validate(&message, MessageVariant::Cast)?;

        let event = Event::message_received(from, message);
        tokio::select! {
            _ = cancel.cancelled() => Err(PeerError::Cancelled),
            sent = self.events.send(event) => sent.map_err(|_| PeerError::ChannelClosed),
        }
    }
}

impl std::fmt::Debug for Caster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caster").finish_non_exhaustive()
    }
}
