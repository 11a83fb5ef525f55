//! Error types for networking operations.

use murmur_crypto::Signatory;
use thiserror::Error;

/// Errors that can occur while establishing or using a connection.
#[derive(Error, Debug)]
pub enum NetError {
    /// Handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Session failed.
    #[error("Session failed: {0}")]
    Session(#[from] SessionError),

    /// Dialing or accepting a connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A peer address could not be resolved to a socket address.
    #[error("Invalid peer address {0:?}: {1}")]
    InvalidAddress(String, String),

    /// The operation outlived its deadline.
    #[error("Operation timed out")]
    Timeout,

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors aborting a handshake. No partial session is ever exposed.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// A length-prefixed field exceeded the configured maximum.
    #[error("Handshake field too large: {actual} bytes (max {max})")]
    FieldTooLarge {
        /// Received length.
        actual: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The peer's key, signature or signatory failed verification.
    #[error("Peer verification failed: {0}")]
    Crypto(#[from] murmur_crypto::CryptoError),

    /// The injected filter rejected the peer.
    #[error("Peer {0} rejected by filter")]
    Rejected(Signatory),

    /// The transported half key was not 32 bytes.
    #[error("Invalid half key length: {0}")]
    InvalidHalfKey(usize),

    /// IO error on the raw stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors terminating a session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Authentication failed: tampered frame, wrong key or replayed nonce.
    #[error("Frame authentication failed")]
    Authentication,

    /// A frame exceeded the maximum permitted size.
    #[error("Frame too large: {actual} bytes (max {max})")]
    FrameTooLarge {
        /// Received length.
        actual: usize,
        /// Permitted maximum.
        max: usize,
    },

    /// A frame was shorter than a nonce and tag.
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// The decrypted payload was not a valid message.
    #[error("Invalid message in frame: {0}")]
    Protocol(#[from] murmur_protocol::ProtocolError),

    /// IO error on the underlying stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for networking operations.
pub type Result<T> = std::result::Result<T, NetError>;
