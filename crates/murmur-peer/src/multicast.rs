//! Group multicast: one payload to every member of a group.
//!
//! Group membership lives in the directory ([`Dht::update_group`]); the
//! nil group stands for every known peer, which is what the supervisor's
//! plain `multicast` uses.

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

/// The multicast handler.
#[derive(Clone)]
pub struct Multicaster {
    dht: Arc<Dht>,
    messages: MessageSender,
    events: EventSender,
}

impl Multicaster {
    /// Create a handler.
    pub fn new(dht: Arc<Dht>, messages: MessageSender, events: EventSender) -> Self {
        Self {
            dht,
            messages,
            events,
        }
    }

    /// Multicast `body` to every known peer (the nil group).
    pub async fn multicast(&self, cancel: &CancellationToken, body: Vec<u8>) -> Result<()> {
        self.multicast_group(cancel, GroupId::NIL, body).await
    }

    /// Multicast `body` to the members of `group`.
    pub async fn multicast_group(
        &self,
        cancel: &CancellationToken,
        group: GroupId,
        body: Vec<u8>,
    ) -> Result<()> {
        let peer_addrs = self.dht.group_addresses(&group)?;
        for addr in peer_addrs {
            let message = Message::new(V1, MessageVariant::Multicast, group, body.clone());
            send_with_cancel(&self.messages, MessageOnTheWire::outbound(addr, message), cancel)
                .await?;
        }
        Ok(())
    }

    /// Accept an inbound multicast, surfacing it to the observer.
    pub async fn accept_multicast(
        &self,
        cancel: &CancellationToken,
        from: Option<PeerId>,
        message: Message,
    ) -> Result<()> {
        validate(&message, MessageVariant::Multicast)?;

        let event = Event::message_received(from, message);
        tokio::select! {
            _ = cancel.cancelled() => Err(PeerError::Cancelled),
            sent = self.events.send(event) => sent.map_err(|_| PeerError::ChannelClosed),
        }
    }
}

impl std::fmt::Debug for Multicaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multicaster").finish_non_exhaustive()
    }
}
