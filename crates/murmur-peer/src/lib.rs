//! # murmur-peer
//!
//! The gossip engine of the murmur overlay:
//!
//! - [`Dht`]: the local peer directory, backed by an injected store
//! - [`PingPonger`]: membership discovery and address gossip
//! - [`Caster`] / [`Multicaster`] / [`Broadcaster`]: payload dissemination
//! - [`Peer`]: the supervisor multiplexing cancellation, bootstrap ticks
//!   and inbound dispatch in one event loop
//!
//! The engine owns no sockets. It reads inbound messages from a channel,
//! writes outbound messages to a bounded channel (its only backpressure
//! mechanism) and reports state changes to an event channel; `murmur-net`
//! supplies the transport on the other side of those pipes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod broadcast;
pub mod cast;
pub mod dht;
pub mod error;
pub mod multicast;
pub mod peer;
pub mod pingpong;

pub use broadcast::{Broadcaster, Storage};
pub use cast::Caster;
pub use dht::Dht;
pub use error::{PeerError, Result};
pub use multicast::Multicaster;
pub use peer::{Peer, PeerOptions, DEFAULT_BOOTSTRAP_DURATION};
pub use pingpong::PingPonger;

use murmur_protocol::{MessageOnTheWire, MessageSender};
use tokio_util::sync::CancellationToken;

/// Enqueue an envelope on the shared outbound channel, selecting against
/// cancellation. Blocking here is the engine's backpressure signal.
pub(crate) async fn send_with_cancel(
    messages: &MessageSender,
    envelope: MessageOnTheWire,
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PeerError::Cancelled),
        sent = messages.send(envelope) => sent.map_err(|_| PeerError::ChannelClosed),
    }
}
