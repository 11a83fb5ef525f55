//! Error types for the gossip engine.

use murmur_protocol::PeerId;
use thiserror::Error;

/// Errors that can occur inside the gossip engine.
#[derive(Error, Debug)]
pub enum PeerError {
    /// The supervisor was constructed with invalid options.
    #[error("Invalid peer options: {0}")]
    InvalidOptions(String),

    /// The requested peer is not in the DHT.
    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    /// The DHT holds no peer addresses at all.
    #[error("DHT has no peer addresses")]
    NoKnownPeers,

    /// Message validation or codec failure.
    #[error(transparent)]
    Protocol(#[from] murmur_protocol::ProtocolError),

    /// The DHT or broadcast store backend failed.
    #[error("Storage error: {0}")]
    Storage(#[from] murmur_store::StoreError),

    /// The cancellation token fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// The outbound message or event channel is closed.
    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for the gossip engine.
pub type Result<T> = std::result::Result<T, PeerError>;
