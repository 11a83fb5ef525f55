//! Authenticated-encrypted framed channel.
//!
//! A [`Session`] turns the raw byte stream left over after the handshake
//! into a confidential message channel. Each logical [`Message`] is sealed
//! into one frame with AES-256-GCM under the shared session key:
//!
//! ```text
//! length (u32) | nonce (12 B) | ciphertext | tag (16 B)
//! ```
//!
//! Nonces encode the sender's role and a per-direction counter starting at
//! zero, so the two directions of one session can never collide. The
//! reader recomputes the expected nonce and rejects anything else, which
//! makes replayed or reordered frames fail authentication.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::{Zeroize, ZeroizeOnDrop};

use murmur_crypto::Signatory;
use murmur_protocol::{Message, MAX_MESSAGE_SIZE};

use crate::error::SessionError;

/// Session key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Upper bound on a sealed frame (nonce + sealed message).
pub const MAX_FRAME_SIZE: usize = NONCE_SIZE + MAX_MESSAGE_SIZE + TAG_SIZE;

/// Which side of the handshake this session belongs to.
///
/// The role is baked into every nonce this side writes, separating the two
/// directions of the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// The dialing side; ran the handshake steps in initiator order.
    Initiator,
    /// The accepting side.
    Responder,
}

impl Role {
    fn nonce_tag(&self) -> u8 {
        match self {
            Role::Initiator => 0x01,
            Role::Responder => 0x02,
        }
    }

    fn peer(&self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

/// The 32-byte shared secret, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
struct SessionKey([u8; KEY_SIZE]);

/// An authenticated-encrypted channel to one remote peer.
pub struct Session {
    cipher: Aes256Gcm,
    _key: SessionKey,
    remote: Signatory,
    role: Role,
    write_counter: u64,
    read_counter: u64,
}

impl Session {
    /// Create a session from the shared key agreed during the handshake.
    pub fn new(key: [u8; KEY_SIZE], remote: Signatory, role: Role) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Self {
            cipher,
            _key: SessionKey(key),
            remote,
            role,
            write_counter: 0,
            read_counter: 0,
        }
    }

    /// The authenticated identity of the remote peer.
    pub fn remote(&self) -> Signatory {
        self.remote
    }

    /// This side's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Seal a plaintext into one frame body (`nonce || ciphertext || tag`).
    ///
    /// Advances the write counter; a failed write must terminate the
    /// session rather than retry with the same counter.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        let nonce_bytes = nonce_for(self.role, self.write_counter);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: &[],
                },
            )
            .map_err(|_| SessionError::Authentication)?;
        self.write_counter += 1;

        let mut frame = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        frame.extend_from_slice(&nonce_bytes);
        frame.extend_from_slice(&ciphertext);
        Ok(frame)
    }

    /// Open one frame body produced by the peer's [`Session::seal`].
    ///
    /// The nonce must match this side's expected read counter exactly.
    pub fn open(&mut self, frame: &[u8]) -> Result<Vec<u8>, SessionError> {
        if frame.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SessionError::FrameTooShort(frame.len()));
        }

        let expected = nonce_for(self.role.peer(), self.read_counter);
        if frame[..NONCE_SIZE] != expected {
            return Err(SessionError::Authentication);
        }

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&expected),
                Payload {
                    msg: &frame[NONCE_SIZE..],
                    aad: &[],
                },
            )
            .map_err(|_| SessionError::Authentication)?;
        self.read_counter += 1;
        Ok(plaintext)
    }

    /// Seal `message` and write it as one length-prefixed frame.
    pub async fn write_message<W>(
        &mut self,
        writer: &mut W,
        message: &Message,
    ) -> Result<(), SessionError>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = self.seal(&message.to_bytes())?;
        writer.write_all(&(frame.len() as u32).to_be_bytes()).await?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one length-prefixed frame and open it into a [`Message`].
    pub async fn read_message<R>(&mut self, reader: &mut R) -> Result<Message, SessionError>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(SessionError::FrameTooLarge {
                actual: len,
                max: MAX_FRAME_SIZE,
            });
        }
        if len < NONCE_SIZE + TAG_SIZE {
            return Err(SessionError::FrameTooShort(len));
        }

        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame).await?;

        let plaintext = self.open(&frame)?;
        Ok(Message::from_bytes(&plaintext)?)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("remote", &self.remote)
            .field("role", &self.role)
            .field("written", &self.write_counter)
            .field("read", &self.read_counter)
            .finish()
    }
}

fn nonce_for(role: Role, counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[0] = role.nonce_tag();
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}
