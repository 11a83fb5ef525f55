//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// A private key could not be parsed from the given bytes.
    #[error("Invalid private key")]
    InvalidPrivateKey,

    /// A public key could not be parsed from the given bytes.
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// A signature could not be parsed or did not recover a valid key.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signing failed.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// The recovered key does not match the claimed signatory.
    #[error("Signatory verification failed")]
    SignatoryMismatch,

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (invalid ciphertext or key).
    #[error("Decryption failed: invalid ciphertext or key")]
    Decryption,

    /// Invalid input length.
    #[error("Invalid {what} length: expected {expected}, got {actual}")]
    InvalidLength {
        /// What was being parsed.
        what: &'static str,
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },
}

/// Result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
