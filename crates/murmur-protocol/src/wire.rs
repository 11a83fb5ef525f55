//! Envelopes and channels connecting the gossip engine to its transport.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::address::{PeerAddr, PeerId};
use crate::message::Message;

/// A message paired with the destination it should be written to.
///
/// Outbound: the engine enqueues these onto the shared send channel and the
/// transport writes them through the destination's session. Inbound: the
/// transport stamps `from` with the session's authenticated signatory
/// before forwarding to the supervisor.
#[derive(Clone, Debug)]
pub struct MessageOnTheWire {
    /// Destination address; `None` on inbound envelopes.
    pub to: Option<PeerAddr>,
    /// Connection-authenticated sender; `None` on outbound envelopes.
    pub from: Option<PeerId>,
    /// The framed message.
    pub message: Message,
    /// Optional per-envelope cancellation, layered over the owner's token.
    pub cancel: Option<CancellationToken>,
}

impl MessageOnTheWire {
    /// An outbound envelope.
    pub fn outbound(to: PeerAddr, message: Message) -> Self {
        Self {
            to: Some(to),
            from: None,
            message,
            cancel: None,
        }
    }

    /// An inbound envelope stamped with the authenticated sender.
    pub fn inbound(from: PeerId, message: Message) -> Self {
        Self {
            to: None,
            from: Some(from),
            message,
            cancel: None,
        }
    }

    /// Attach a cancellation token to this envelope.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Sink accepting envelopes for transmission. Bounded; a full channel is
/// the engine's backpressure signal.
pub type MessageSender = mpsc::Sender<MessageOnTheWire>;

/// Source yielding envelopes received from the network.
pub type MessageReceiver = mpsc::Receiver<MessageOnTheWire>;
