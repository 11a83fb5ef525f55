//! Peer addresses and their codec.
//!
//! The gossip engine treats addresses polymorphically: anything that can
//! name its peer and render a network locator can sit in the DHT. The
//! engine never inspects locators itself; it serializes addresses through
//! an injected [`PeerAddressCodec`] and compares the encoded bytes to
//! decide whether an update changed anything.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use murmur_crypto::Signatory;

use crate::{ProtocolError, Result};

/// A peer identity. Alias of the crypto-layer signatory.
pub type PeerId = Signatory;

/// Upper bound on an encoded peer address.
pub const MAX_ADDRESS_SIZE: usize = 1024;

/// Capability trait for network addresses of peers.
pub trait PeerAddress: std::fmt::Debug + std::fmt::Display + Send + Sync {
    /// The identity of the peer at this address.
    fn peer_id(&self) -> PeerId;

    /// The network locator, e.g. `host:port`.
    fn network_string(&self) -> String;

    /// Downcast support for codecs that handle concrete address types.
    fn as_any(&self) -> &dyn Any;
}

/// A shared, immutable peer address.
pub type PeerAddr = Arc<dyn PeerAddress>;

/// Encodes and decodes peer addresses for the wire and the DHT store.
pub trait PeerAddressCodec: Send + Sync {
    /// Encode an address to bytes.
    fn encode(&self, addr: &dyn PeerAddress) -> Result<Vec<u8>>;

    /// Decode an address from bytes.
    fn decode(&self, bytes: &[u8]) -> Result<PeerAddr>;
}

/// A TCP peer address: identity, socket address and an update nonce.
///
/// Two addresses for the same peer are ordered by `nonce`; the DHT keeps
/// whichever it saw last, so a peer that moves re-announces with a larger
/// nonce (typically a timestamp).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpPeerAddress {
    signatory: Signatory,
    addr: SocketAddr,
    nonce: u64,
}

impl TcpPeerAddress {
    /// Create an address.
    pub fn new(signatory: Signatory, addr: SocketAddr, nonce: u64) -> Self {
        Self {
            signatory,
            addr,
            nonce,
        }
    }

    /// The socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The update nonce; larger means newer.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }
}

impl PeerAddress for TcpPeerAddress {
    fn peer_id(&self) -> PeerId {
        self.signatory
    }

    fn network_string(&self) -> String {
        self.addr.to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Display for TcpPeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", &self.signatory.to_hex()[..8], self.addr)
    }
}

/// Bincode-backed codec for [`TcpPeerAddress`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeAddressCodec;

impl BincodeAddressCodec {
    /// Create a codec.
    pub fn new() -> Self {
        Self
    }
}

impl PeerAddressCodec for BincodeAddressCodec {
    fn encode(&self, addr: &dyn PeerAddress) -> Result<Vec<u8>> {
        let addr = addr
            .as_any()
            .downcast_ref::<TcpPeerAddress>()
            .ok_or_else(|| ProtocolError::Encode("not a TCP peer address".to_string()))?;
        bincode::serialize(addr).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<PeerAddr> {
        if bytes.len() > MAX_ADDRESS_SIZE {
            return Err(ProtocolError::InvalidFrame(format!(
                "peer address too large: {} bytes (max {})",
                bytes.len(),
                MAX_ADDRESS_SIZE
            )));
        }
        let addr: TcpPeerAddress =
            bincode::deserialize(bytes).map_err(|e| ProtocolError::InvalidFrame(e.to_string()))?;
        Ok(Arc::new(addr))
    }
}
