//! # murmur-crypto
//!
//! Cryptographic primitives for the murmur gossip overlay:
//!
//! - **Identities**: secp256k1 keypairs with 32-byte BLAKE3 signatories
//! - **Handshake signatures**: recoverable ECDSA over the signatory
//! - **Key transport**: ECIES (ephemeral ECDH + HKDF-SHA-256 + AES-256-GCM)
//! - **Fingerprints**: BLAKE3 content hashes for broadcast deduplication
//!
//! Session framing lives in `murmur-net`; this crate only provides the
//! primitives the handshake and the broadcast engine are built from.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod ecdsa;
pub mod ecies;
pub mod error;
pub mod hash;

pub use ecdsa::{
    combine_half_keys, random_half_key, sign_signatory, verify_signatory, Keypair, PublicKey,
    RecoverableSignature, Signatory, COMPRESSED_PUBKEY_SIZE, SIGNATORY_SIZE, SIGNATURE_SIZE,
};
pub use error::{CryptoError, Result};
pub use hash::ContentHash;
