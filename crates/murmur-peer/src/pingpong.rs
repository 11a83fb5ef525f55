//! Membership discovery over ping and pong.
//!
//! A ping carries the sender's codec-encoded address. Accepting one
//! updates the directory, answers with a pong carrying our own address,
//! and propagates the introduction to everyone except the introduced peer
//! itself, which would only echo it straight back. A ping that
//! changes nothing in the directory is dropped without a pong or
//! propagation, which is what keeps repeated introductions from turning
//! into storms.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use murmur_protocol::{
    Event, EventSender, GroupId, Message, MessageOnTheWire, MessageSender, MessageVariant,
    PeerAddr, PeerAddressCodec, PeerId, ProtocolError, V1,
};

use crate::dht::Dht;
use crate::error::{PeerError, Result};
use crate::send_with_cancel;

/// The ping/pong protocol handler.
#[derive(Clone)]
pub struct PingPonger {
    dht: Arc<Dht>,
    messages: MessageSender,
    events: EventSender,
    codec: Arc<dyn PeerAddressCodec>,
}

impl PingPonger {
    /// Create a handler writing outbound messages to `messages` and state
    /// changes to `events`.
    pub fn new(
        dht: Arc<Dht>,
        messages: MessageSender,
        events: EventSender,
        codec: Arc<dyn PeerAddressCodec>,
    ) -> Self {
        Self {
            dht,
            messages,
            events,
            codec,
        }
    }

    /// Ping a known peer with our own address.
    ///
    /// Fails with [`PeerError::PeerNotFound`] if the peer is not in the
    /// directory. Blocks on the outbound channel until accepted or
    /// `cancel` fires.
    pub async fn ping(&self, cancel: &CancellationToken, to: PeerId) -> Result<()> {
        let peer_addr = self.dht.peer_address(&to)?;
        let me = self.codec.encode(self.dht.me().as_ref())?;
        let message = Message::new(V1, MessageVariant::Ping, GroupId::NIL, me);

        send_with_cancel(&self.messages, MessageOnTheWire::outbound(peer_addr, message), cancel)
            .await
    }

    /// Accept an inbound ping.
    pub async fn accept_ping(&self, cancel: &CancellationToken, message: Message) -> Result<()> {
        validate(&message, MessageVariant::Ping)?;

        let peer_addr = self
            .codec
            .decode(&message.body)
            .map_err(|e| decode_error(MessageVariant::Ping, &message.body, e))?;

        // A ping introducing our own address must not be stored or
        // propagated; doing so would let a peer trick us into gossiping
        // ourselves around as a fresh introduction forever.
        if peer_addr.peer_id() == self.dht.me().peer_id() {
            return Ok(());
        }

        let updated = self.update_peer_address(cancel, Arc::clone(&peer_addr)).await?;
        if !updated {
            // Already known with this exact address: the network has seen
            // this introduction, nothing left to do.
            return Ok(());
        }

        self.pong(cancel, Arc::clone(&peer_addr)).await?;
        self.propagate_ping(cancel, peer_addr.peer_id(), &message.body)
            .await
    }

    /// Accept an inbound pong, refreshing the sender's directory entry.
    pub async fn accept_pong(&self, cancel: &CancellationToken, message: Message) -> Result<()> {
        validate(&message, MessageVariant::Pong)?;

        let peer_addr = self
            .codec
            .decode(&message.body)
            .map_err(|e| decode_error(MessageVariant::Pong, &message.body, e))?;

        self.update_peer_address(cancel, peer_addr).await?;
        Ok(())
    }

    /// Answer a ping with our own address.
    async fn pong(&self, cancel: &CancellationToken, to: PeerAddr) -> Result<()> {
        let me = self.codec.encode(self.dht.me().as_ref())?;
        let message = Message::new(V1, MessageVariant::Pong, GroupId::NIL, me);

        send_with_cancel(&self.messages, MessageOnTheWire::outbound(to, message), cancel).await
    }

    /// Forward a ping body to every known peer except the introduced one.
    ///
    /// Sends go through the shared outbound channel, so backpressure
    /// applies. Per-peer failures do not stop the sweep; the last one is
    /// returned.
    async fn propagate_ping(
        &self,
        cancel: &CancellationToken,
        introduced: PeerId,
        body: &[u8],
    ) -> Result<()> {
        let peer_addrs = self.dht.peer_addresses()?;
        if peer_addrs.is_empty() {
            return Err(PeerError::NoKnownPeers);
        }

        let mut last_err = None;
        for addr in peer_addrs {
            if addr.peer_id() == introduced {
                continue;
            }
            let message = Message::new(V1, MessageVariant::Ping, GroupId::NIL, body.to_vec());
            if let Err(e) =
                send_with_cancel(&self.messages, MessageOnTheWire::outbound(addr, message), cancel)
                    .await
            {
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Update the directory and emit a `PeerChanged` event on real change.
    async fn update_peer_address(
        &self,
        cancel: &CancellationToken,
        peer_addr: PeerAddr,
    ) -> Result<bool> {
        let updated = self.dht.update_peer_address(Arc::clone(&peer_addr))?;
        if !updated {
            return Ok(false);
        }

        debug!(peer = %peer_addr, "peer address updated");
        let event = Event::peer_changed(peer_addr);
        tokio::select! {
            _ = cancel.cancelled() => Err(PeerError::Cancelled),
            sent = self.events.send(event) => {
                sent.map_err(|_| PeerError::ChannelClosed)?;
                Ok(true)
            }
        }
    }
}

impl std::fmt::Debug for PingPonger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PingPonger").finish_non_exhaustive()
    }
}

pub(crate) fn validate(message: &Message, variant: MessageVariant) -> Result<()> {
    if message.version != V1 {
        return Err(ProtocolError::UnsupportedVersion(message.version.0).into());
    }
    if message.variant != variant {
        return Err(ProtocolError::UnsupportedVariant(message.variant.as_u16()).into());
    }
    Ok(())
}

pub(crate) fn decode_error(
    variant: MessageVariant,
    body: &[u8],
    err: ProtocolError,
) -> PeerError {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    ProtocolError::Decode {
        variant: variant.name(),
        body: STANDARD.encode(body),
        reason: err.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_crypto::Signatory;
    use murmur_protocol::{BincodeAddressCodec, MessageReceiver, MessageVersion, TcpPeerAddress};
    use murmur_store::MemStore;
    use tokio::sync::mpsc;

    fn signatory(seed: u8) -> Signatory {
        Signatory::from_bytes(&[seed; 32]).unwrap()
    }

    fn address(seed: u8, port: u16) -> PeerAddr {
        Arc::new(TcpPeerAddress::new(
            signatory(seed),
            format!("127.0.0.1:{}", port).parse().unwrap(),
            0,
        ))
    }

    struct Fixture {
        ping_ponger: PingPonger,
        dht: Arc<Dht>,
        codec: Arc<BincodeAddressCodec>,
        messages: MessageReceiver,
        events: mpsc::Receiver<Event>,
        cancel: CancellationToken,
    }

    /// A node with identity `me` that already knows `bootstrap`.
    fn fixture(me: u8, bootstrap: &[PeerAddr]) -> Fixture {
        let codec = Arc::new(BincodeAddressCodec::new());
        let dht = Arc::new(
            Dht::new(
                address(me, 4000 + me as u16),
                codec.clone(),
                Arc::new(MemStore::new()),
                bootstrap,
            )
            .unwrap(),
        );
        let (msg_tx, msg_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        Fixture {
            ping_ponger: PingPonger::new(Arc::clone(&dht), msg_tx, event_tx, codec.clone()),
            dht,
            codec,
            messages: msg_rx,
            events: event_rx,
            cancel: CancellationToken::new(),
        }
    }

    fn ping_from(codec: &BincodeAddressCodec, addr: &PeerAddr) -> Message {
        let body = codec.encode(addr.as_ref()).unwrap();
        Message::new(V1, MessageVariant::Ping, GroupId::NIL, body)
    }

    #[tokio::test]
    async fn test_ping_enqueues_own_address() {
        let mut f = fixture(1, &[address(2, 5002)]);

        f.ping_ponger.ping(&f.cancel, signatory(2)).await.unwrap();

        let envelope = f.messages.recv().await.unwrap();
        assert_eq!(envelope.to.unwrap().peer_id(), signatory(2));
        assert_eq!(envelope.message.variant, MessageVariant::Ping);
        let carried = f.codec.decode(&envelope.message.body).unwrap();
        assert_eq!(carried.peer_id(), signatory(1));
    }

    #[tokio::test]
    async fn test_ping_unknown_peer_fails() {
        let f = fixture(1, &[]);
        assert!(matches!(
            f.ping_ponger.ping(&f.cancel, signatory(9)).await,
            Err(PeerError::PeerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_accept_ping_from_new_peer() {
        // Node 1 knows node 2; node 3 introduces itself.
        let mut f = fixture(1, &[address(2, 5002)]);
        let newcomer = address(3, 5003);

        f.ping_ponger
            .accept_ping(&f.cancel, ping_from(&f.codec, &newcomer))
            .await
            .unwrap();

        // Directory updated and change observed.
        assert!(f.dht.peer_address(&signatory(3)).is_ok());
        assert!(matches!(
            f.events.recv().await.unwrap(),
            Event::PeerChanged { ref address, .. } if address.peer_id() == signatory(3)
        ));

        // A pong back to the newcomer, then propagation to node 2 only.
        let pong = f.messages.recv().await.unwrap();
        assert_eq!(pong.message.variant, MessageVariant::Pong);
        assert_eq!(pong.to.unwrap().peer_id(), signatory(3));

        let propagated = f.messages.recv().await.unwrap();
        assert_eq!(propagated.message.variant, MessageVariant::Ping);
        assert_eq!(propagated.to.unwrap().peer_id(), signatory(2));
        let carried = f.codec.decode(&propagated.message.body).unwrap();
        assert_eq!(carried.peer_id(), signatory(3));

        // Nothing else: the introduced peer is excluded from propagation.
        assert!(f.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_accept_ping_known_address_stops_early() {
        let mut f = fixture(1, &[address(2, 5002)]);

        // Node 2 introduces itself with the exact address we already hold.
        f.ping_ponger
            .accept_ping(&f.cancel, ping_from(&f.codec, &address(2, 5002)))
            .await
            .unwrap();

        assert!(f.messages.try_recv().is_err());
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_accept_ping_with_own_address_is_ignored() {
        let mut f = fixture(1, &[address(2, 5002)]);
        let me = f.dht.me();

        f.ping_ponger
            .accept_ping(&f.cancel, ping_from(&f.codec, &me))
            .await
            .unwrap();

        assert_eq!(f.dht.num_peers().unwrap(), 1);
        assert!(f.messages.try_recv().is_err());
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_accept_ping_rejects_wrong_version() {
        let f = fixture(1, &[]);
        let mut message = ping_from(&f.codec, &address(3, 5003));
        message.version = MessageVersion(2);

        assert!(matches!(
            f.ping_ponger.accept_ping(&f.cancel, message).await,
            Err(PeerError::Protocol(ProtocolError::UnsupportedVersion(2)))
        ));
    }

    #[tokio::test]
    async fn test_accept_ping_rejects_wrong_variant() {
        let f = fixture(1, &[]);
        let message = Message::new(V1, MessageVariant::Pong, GroupId::NIL, vec![]);

        assert!(matches!(
            f.ping_ponger.accept_ping(&f.cancel, message).await,
            Err(PeerError::Protocol(ProtocolError::UnsupportedVariant(2)))
        ));
    }

    #[tokio::test]
    async fn test_accept_ping_reports_undecodable_body() {
        let f = fixture(1, &[]);
        let message = Message::new(V1, MessageVariant::Ping, GroupId::NIL, vec![0xde, 0xad]);

        let err = f.ping_ponger.accept_ping(&f.cancel, message).await.unwrap_err();
        match err {
            PeerError::Protocol(ProtocolError::Decode { variant, body, .. }) => {
                assert_eq!(variant, "ping");
                assert_eq!(body, "3q0=");
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_accept_pong_updates_directory() {
        let mut f = fixture(1, &[]);
        let body = f.codec.encode(address(2, 5002).as_ref()).unwrap();
        let message = Message::new(V1, MessageVariant::Pong, GroupId::NIL, body);

        f.ping_ponger.accept_pong(&f.cancel, message).await.unwrap();

        assert!(f.dht.peer_address(&signatory(2)).is_ok());
        assert!(matches!(
            f.events.recv().await.unwrap(),
            Event::PeerChanged { .. }
        ));
    }

    #[tokio::test]
    async fn test_accept_pong_rejects_wrong_version() {
        let f = fixture(1, &[]);
        let body = f.codec.encode(address(2, 5002).as_ref()).unwrap();
        let mut message = Message::new(V1, MessageVariant::Pong, GroupId::NIL, body);
        message.version = MessageVersion(7);

        assert!(matches!(
            f.ping_ponger.accept_pong(&f.cancel, message).await,
            Err(PeerError::Protocol(ProtocolError::UnsupportedVersion(7)))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_ping_does_not_block() {
        // Channel of capacity 1, already full: the send must select
        // against cancellation instead of blocking forever.
        let codec = Arc::new(BincodeAddressCodec::new());
        let dht = Arc::new(
            Dht::new(
                address(1, 4001),
                codec.clone(),
                Arc::new(MemStore::new()),
                &[address(2, 5002)],
            )
            .unwrap(),
        );
        let (msg_tx, _msg_rx) = mpsc::channel(1);
        let (event_tx, _event_rx) = mpsc::channel(1);
        let ping_ponger = PingPonger::new(dht, msg_tx.clone(), event_tx, codec);

        let filler = MessageOnTheWire::outbound(
            address(2, 5002),
            Message::new(V1, MessageVariant::Ping, GroupId::NIL, vec![]),
        );
        msg_tx.send(filler).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            ping_ponger.ping(&cancel, signatory(2)).await,
            Err(PeerError::Cancelled)
        ));
    }
}
