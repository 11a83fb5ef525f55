//! Error types for protocol operations.

use thiserror::Error;

/// Errors that can occur while building, validating or decoding messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The message carries a version this node does not speak.
    #[error("Message version {0} is not supported")]
    UnsupportedVersion(u16),

    /// The message carries a variant this handler does not accept.
    #[error("Message variant {0} is not supported")]
    UnsupportedVariant(u16),

    /// A message frame could not be decoded.
    #[error("Invalid message frame: {0}")]
    InvalidFrame(String),

    /// A message body could not be decoded into the expected payload.
    ///
    /// Carries the variant and the base64-encoded offending bytes.
    #[error("Cannot decode {variant} message [{body}]: {reason}")]
    Decode {
        /// Variant of the message whose body failed to decode.
        variant: &'static str,
        /// Base64 encoding of the offending body.
        body: String,
        /// Underlying decoder error.
        reason: String,
    },

    /// A peer address could not be encoded.
    #[error("Cannot encode peer address: {0}")]
    Encode(String),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
