//! # murmur-net
//!
//! Authenticated transport for the murmur gossip overlay:
//!
//! - [`Handshaker`]: mutual ECDSA handshake with ECIES key transport
//! - [`Session`]: AES-256-GCM framed channel over the handshaked stream
//! - [`tcp::Server`] / [`tcp::Client`]: listener and dialer wiring
//!   sessions to the supervisor's message channels
//!
//! Security comes from the handshake and the session, not from the
//! transport: the TCP layer treats every byte before `Session` framing as
//! untrusted.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod handshake;
pub mod session;
pub mod tcp;

pub use error::{HandshakeError, NetError, Result, SessionError};
pub use handshake::{AllowAll, Allowlist, Filter, Handshaker, DEFAULT_MAX_FIELD_SIZE};
pub use session::{Role, Session, KEY_SIZE, MAX_FRAME_SIZE, NONCE_SIZE, TAG_SIZE};
pub use tcp::{Client, ClientOptions, Server, ServerOptions};
