//! Network-wide flood dissemination with at-most-once delivery.
//!
//! Every broadcast body is fingerprinted (BLAKE3) and recorded in a
//! dedup store before any send. A node re-floods a fresh payload to every
//! known peer except the connection it arrived on; a payload whose
//! fingerprint is already recorded is dropped. Together these bound the
//! wire traffic per payload at one message per edge.
//!
//! The fingerprint is recorded *before* the re-flood starts, so a
//! concurrent accept of the same payload observes it as a duplicate.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use murmur_crypto::ContentHash;
use murmur_protocol::{
    Event, EventSender, GroupId, Message, MessageOnTheWire, MessageSender, MessageVariant, PeerId,
    V1,
};
use murmur_store::Store;

use crate::dht::Dht;
use crate::error::{PeerError, Result};
use crate::pingpong::validate;
use crate::send_with_cancel;

/// Record of broadcast fingerprints this node has already handled.
///
/// Entries are never pruned here; inject a store with its own eviction if
/// the network floods enough distinct payloads for that to matter.
#[derive(Clone)]
pub struct Storage {
    store: Arc<dyn Store>,
}

impl Storage {
    /// Wrap a key-value store as a fingerprint set.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Whether `fingerprint` has been recorded.
    pub fn seen(&self, fingerprint: &ContentHash) -> Result<bool> {
        Ok(self.store.contains(fingerprint.as_bytes())?)
    }

    /// Record `fingerprint`.
    pub fn record(&self, fingerprint: &ContentHash) -> Result<()> {
        self.store.insert(fingerprint.as_bytes(), &[])?;
        Ok(())
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

/// The broadcast handler.
#[derive(Clone)]
pub struct Broadcaster {
    storage: Storage,
    dht: Arc<Dht>,
    messages: MessageSender,
    events: EventSender,
}

impl Broadcaster {
    /// Create a handler deduplicating through `storage`.
    pub fn new(
        storage: Storage,
        dht: Arc<Dht>,
        messages: MessageSender,
        events: EventSender,
    ) -> Self {
        Self {
            storage,
            dht,
            messages,
            events,
        }
    }

    /// Originate a broadcast of `body` to every known peer.
    ///
    /// Idempotent: a body this node has already broadcast (or received)
    /// is silently skipped.
    pub async fn broadcast(&self, cancel: &CancellationToken, body: Vec<u8>) -> Result<()> {
        let fingerprint = ContentHash::of(&body);
        if self.storage.seen(&fingerprint)? {
            return Ok(());
        }
        self.storage.record(&fingerprint)?;

        let message = Message::new(V1, MessageVariant::Broadcast, GroupId::NIL, body);
        self.flood(cancel, &message, None).await
    }

    /// Accept an inbound broadcast.
    ///
    /// A fresh payload is recorded, surfaced to the observer and
    /// re-flooded to everyone except the sending connection. Duplicates
    /// are dropped silently.
    pub async fn accept_broadcast(
        &self,
        cancel: &CancellationToken,
        from: Option<PeerId>,
        message: Message,
    ) -> Result<()> {
        validate(&message, MessageVariant::Broadcast)?;

        let fingerprint = ContentHash::of(&message.body);
        if self.storage.seen(&fingerprint)? {
            debug!(%fingerprint, "dropping duplicate broadcast");
            return Ok(());
        }
        self.storage.record(&fingerprint)?;

        let event = Event::message_received(from, message.clone());
        tokio::select! {
            _ = cancel.cancelled() => return Err(PeerError::Cancelled),
            sent = self.events.send(event) => sent.map_err(|_| PeerError::ChannelClosed)?,
        }

        self.flood(cancel, &message, from).await
    }

    /// Enqueue `message` to every known peer, minus the excluded sender.
    async fn flood(
        &self,
        cancel: &CancellationToken,
        message: &Message,
        exclude: Option<PeerId>,
    ) -> Result<()> {
        for addr in self.dht.peer_addresses()? {
            if Some(addr.peer_id()) == exclude {
                continue;
            }
            send_with_cancel(
                &self.messages,
                MessageOnTheWire::outbound(addr, message.clone()),
                cancel,
            )
            .await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster").finish_non_exhaustive()
    }
}
