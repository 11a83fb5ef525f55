//! # murmur-protocol
//!
//! Wire types and collaborator interfaces for the murmur gossip overlay:
//!
//! - [`Message`] framing (length-prefixed, versioned, variant-dispatched)
//! - [`PeerAddress`] capability trait, [`TcpPeerAddress`] and the
//!   injectable [`PeerAddressCodec`]
//! - [`MessageOnTheWire`] envelopes and the bounded channel aliases that
//!   connect engine and transport
//! - [`Event`]s emitted to the embedding application
//!
//! The gossip engine itself lives in `murmur-peer`; the transport and the
//! authenticated session in `murmur-net`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod error;
pub mod event;
pub mod message;
pub mod wire;

pub use address::{
    BincodeAddressCodec, PeerAddr, PeerAddress, PeerAddressCodec, PeerId, TcpPeerAddress,
    MAX_ADDRESS_SIZE,
};
pub use error::{ProtocolError, Result};
pub use event::{Event, EventReceiver, EventSender};
pub use message::{
    GroupId, Message, MessageVariant, MessageVersion, GROUPED_HEADER_SIZE, HEADER_SIZE,
    MAX_MESSAGE_SIZE, V1,
};
pub use wire::{MessageOnTheWire, MessageReceiver, MessageSender};
