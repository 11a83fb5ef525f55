//! Mutual ECDSA handshake.
//!
//! Turns a raw bidirectional stream into an authenticated [`Session`] in
//! four mirrored steps. The initiator:
//!
//! 1. sends its compressed public key and a recoverable signature over its
//!    own signatory,
//! 2. reads and verifies the same from the peer, applying the injected
//!    [`Filter`],
//! 3. generates a random 32-byte half key, ECIES-encrypts it under the
//!    peer's key and sends it,
//! 4. reads the peer's half key and decrypts it with its own private key.
//!
//! The responder runs steps 2, 1, 4, 3. Both sides derive the session key
//! as the XOR of the two halves, so the keys are bitwise equal. Any I/O
//! failure, verification failure or filter rejection aborts with an error;
//! no partial session is ever produced.
//!
//! Each wire field is a length-prefixed byte string with a configured
//! maximum, so a malicious peer cannot force unbounded reads.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::Zeroize;

use murmur_crypto::{
    combine_half_keys, ecies, random_half_key, sign_signatory, verify_signatory, Keypair,
    PublicKey, RecoverableSignature, Signatory, COMPRESSED_PUBKEY_SIZE, SIGNATURE_SIZE,
};

use crate::error::HandshakeError;
use crate::session::{Role, Session};

/// Default maximum for any length-prefixed handshake field.
///
/// Key material and ECIES envelopes are all well under this.
pub const DEFAULT_MAX_FIELD_SIZE: usize = 1024;

/// Decides whether a handshake with the given peer may proceed.
pub trait Filter: Send + Sync {
    /// Return `true` to accept the peer, `false` to abort the handshake.
    fn allow(&self, signatory: &Signatory) -> bool;
}

/// Accepts every peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Filter for AllowAll {
    fn allow(&self, _signatory: &Signatory) -> bool {
        true
    }
}

/// Accepts only explicitly whitelisted peers.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    allowed: HashSet<Signatory>,
}

impl Allowlist {
    /// An empty allowlist rejecting everyone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer to the allowlist.
    pub fn insert(&mut self, signatory: Signatory) {
        self.allowed.insert(signatory);
    }
}

impl Filter for Allowlist {
    fn allow(&self, signatory: &Signatory) -> bool {
        self.allowed.contains(signatory)
    }
}

/// Runs the four-step handshake from either side.
pub struct Handshaker {
    keypair: Keypair,
    filter: Arc<dyn Filter>,
    max_field_size: usize,
}

impl Handshaker {
    /// Create a handshaker from this node's keypair and peer filter.
    pub fn new(keypair: Keypair, filter: Arc<dyn Filter>) -> Self {
        Self {
            keypair,
            filter,
            max_field_size: DEFAULT_MAX_FIELD_SIZE,
        }
    }

    /// Override the maximum size of a length-prefixed field.
    pub fn with_max_field_size(mut self, max: usize) -> Self {
        self.max_field_size = max;
        self
    }

    /// This node's signatory.
    pub fn signatory(&self) -> Signatory {
        self.keypair.signatory()
    }

    /// Run the handshake as the dialing side.
    pub async fn initiate<S>(&self, stream: &mut S) -> Result<Session, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.write_identity(stream).await?;
        let (peer_key, peer_signatory) = self.read_identity(stream).await?;

        let mut our_half = random_half_key();
        let result = async {
            self.write_half_key(stream, &peer_key, &our_half).await?;
            let mut peer_half = self.read_half_key(stream).await?;
            let session_key = combine_half_keys(&our_half, &peer_half);
            peer_half.zeroize();
            Ok(Session::new(session_key, peer_signatory, Role::Initiator))
        }
        .await;
        our_half.zeroize();
        result
    }

    /// Run the handshake as the accepting side.
    pub async fn respond<S>(&self, stream: &mut S) -> Result<Session, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (peer_key, peer_signatory) = self.read_identity(stream).await?;
        self.write_identity(stream).await?;

        let mut our_half = random_half_key();
        let result = async {
            let mut peer_half = self.read_half_key(stream).await?;
            self.write_half_key(stream, &peer_key, &our_half).await?;
            let session_key = combine_half_keys(&peer_half, &our_half);
            peer_half.zeroize();
            Ok(Session::new(session_key, peer_signatory, Role::Responder))
        }
        .await;
        our_half.zeroize();
        result
    }

    /// Step 1 (or 2): send our compressed key and signed signatory.
    async fn write_identity<S>(&self, stream: &mut S) -> Result<(), HandshakeError>
    where
        S: AsyncWrite + Unpin,
    {
        let pubkey = self.keypair.public_key().to_compressed_bytes();
        write_prefixed(stream, &pubkey).await?;

        let signature = sign_signatory(&self.keypair)?;
        write_prefixed(stream, signature.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Step 2 (or 1): read and verify the peer's key and signature.
    async fn read_identity<S>(
        &self,
        stream: &mut S,
    ) -> Result<(PublicKey, Signatory), HandshakeError>
    where
        S: AsyncRead + Unpin,
    {
        let pubkey_bytes =
            read_prefixed(stream, COMPRESSED_PUBKEY_SIZE.min(self.max_field_size)).await?;
        let pubkey = PublicKey::from_compressed_bytes(&pubkey_bytes)?;
        let signatory = pubkey.signatory();

        let signature_bytes =
            read_prefixed(stream, SIGNATURE_SIZE.min(self.max_field_size)).await?;
        let signature = RecoverableSignature::from_bytes(&signature_bytes)?;
        verify_signatory(&signatory, &signature)?;

        if !self.filter.allow(&signatory) {
            return Err(HandshakeError::Rejected(signatory));
        }
        Ok((pubkey, signatory))
    }

    /// Step 3 (or 4): ECIES-encrypt our half key to the peer and send it.
    async fn write_half_key<S>(
        &self,
        stream: &mut S,
        peer_key: &PublicKey,
        half: &[u8; 32],
    ) -> Result<(), HandshakeError>
    where
        S: AsyncWrite + Unpin,
    {
        let envelope = ecies::encrypt(peer_key, half)?;
        write_prefixed(stream, &envelope).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Step 4 (or 3): read and decrypt the peer's half key.
    async fn read_half_key<S>(&self, stream: &mut S) -> Result<[u8; 32], HandshakeError>
    where
        S: AsyncRead + Unpin,
    {
        let envelope = read_prefixed(stream, self.max_field_size).await?;
        let mut plaintext = ecies::decrypt(&self.keypair, &envelope)?;
        if plaintext.len() != 32 {
            let actual = plaintext.len();
            plaintext.zeroize();
            return Err(HandshakeError::InvalidHalfKey(actual));
        }
        let mut half = [0u8; 32];
        half.copy_from_slice(&plaintext);
        plaintext.zeroize();
        Ok(half)
    }
}

impl std::fmt::Debug for Handshaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshaker")
            .field("signatory", &self.signatory())
            .finish_non_exhaustive()
    }
}

async fn write_prefixed<W>(writer: &mut W, bytes: &[u8]) -> Result<(), HandshakeError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    Ok(())
}

async fn read_prefixed<R>(reader: &mut R, max: usize) -> Result<Vec<u8>, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max {
        return Err(HandshakeError::FieldTooLarge { actual: len, max });
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_protocol::{GroupId, Message, MessageVariant, V1};

    async fn run_handshake(
        client: Handshaker,
        server: Handshaker,
    ) -> (
        Result<Session, HandshakeError>,
        Result<Session, HandshakeError>,
    ) {
        let (mut client_stream, mut server_stream) = tokio::io::duplex(4096);
        tokio::join!(
            async move { client.initiate(&mut client_stream).await },
            async move { server.respond(&mut server_stream).await },
        )
    }

    #[tokio::test]
    async fn test_handshake_produces_matching_sessions() {
        let client_keys = Keypair::generate();
        let server_keys = Keypair::generate();
        let client_signatory = client_keys.signatory();
        let server_signatory = server_keys.signatory();

        let (client_session, server_session) = run_handshake(
            Handshaker::new(client_keys, Arc::new(AllowAll)),
            Handshaker::new(server_keys, Arc::new(AllowAll)),
        )
        .await;

        let client_session = client_session.unwrap();
        let server_session = server_session.unwrap();
        assert_eq!(client_session.remote(), server_signatory);
        assert_eq!(server_session.remote(), client_signatory);
    }

    #[tokio::test]
    async fn test_sessions_derive_the_same_key() {
        let (client_session, server_session) = run_handshake(
            Handshaker::new(Keypair::generate(), Arc::new(AllowAll)),
            Handshaker::new(Keypair::generate(), Arc::new(AllowAll)),
        )
        .await;
        let mut client_session = client_session.unwrap();
        let mut server_session = server_session.unwrap();

        // Keys are equal iff frames seal and open across the pair, in both
        // directions.
        let message = Message::new(V1, MessageVariant::Ping, GroupId::NIL, b"key check".to_vec());
        let frame = client_session.seal(&message.to_bytes()).unwrap();
        let opened = server_session.open(&frame).unwrap();
        assert_eq!(Message::from_bytes(&opened).unwrap(), message);

        let frame = server_session.seal(b"reverse").unwrap();
        assert_eq!(client_session.open(&frame).unwrap(), b"reverse");
    }

    #[tokio::test]
    async fn test_server_filter_rejects_client() {
        let client_keys = Keypair::generate();
        let server_keys = Keypair::generate();

        // Server allows nobody; client allows the server.
        let mut client_filter = Allowlist::new();
        client_filter.insert(server_keys.signatory());

        let (client_result, server_result) = run_handshake(
            Handshaker::new(client_keys, Arc::new(client_filter)),
            Handshaker::new(server_keys, Arc::new(Allowlist::new())),
        )
        .await;

        assert!(matches!(server_result, Err(HandshakeError::Rejected(_))));
        // The server hangs up before sending its half key, so the client
        // fails too; no session is produced on either side.
        assert!(client_result.is_err());
    }

    #[tokio::test]
    async fn test_allowlisted_peers_accepted() {
        let client_keys = Keypair::generate();
        let server_keys = Keypair::generate();

        let mut client_filter = Allowlist::new();
        client_filter.insert(server_keys.signatory());
        let mut server_filter = Allowlist::new();
        server_filter.insert(client_keys.signatory());

        let (client_result, server_result) = run_handshake(
            Handshaker::new(client_keys, Arc::new(client_filter)),
            Handshaker::new(server_keys, Arc::new(server_filter)),
        )
        .await;

        assert!(client_result.is_ok());
        assert!(server_result.is_ok());
    }

    #[tokio::test]
    async fn test_garbage_stream_fails_cleanly() {
        let server = Handshaker::new(Keypair::generate(), Arc::new(AllowAll));
        let (mut client_stream, mut server_stream) = tokio::io::duplex(4096);

        let (_, result) = tokio::join!(
            async move {
                client_stream.write_all(&[0u8; 64]).await.unwrap();
            },
            async move { server.respond(&mut server_stream).await },
        );

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_oversized_field_rejected() {
        let server = Handshaker::new(Keypair::generate(), Arc::new(AllowAll));
        let (mut client_stream, mut server_stream) = tokio::io::duplex(4096);

        let (_, result) = tokio::join!(
            async move {
                // Claim a 1 MiB public key.
                client_stream
                    .write_all(&(1024u32 * 1024).to_be_bytes())
                    .await
                    .unwrap();
            },
            async move { server.respond(&mut server_stream).await },
        );

        assert!(matches!(result, Err(HandshakeError::FieldTooLarge { .. })));
    }
}
