//! ECIES key transport over secp256k1.
//!
//! Used during the handshake to move each side's 32-byte half key to the
//! other under its authenticated public key. The construction is the
//! standard integrated scheme: an ephemeral ECDH against the recipient's
//! key, HKDF-SHA-256 to derive an AEAD key, and AES-256-GCM to seal the
//! plaintext.
//!
//! Envelope layout: `ephemeral compressed pubkey (33 B) || nonce (12 B) ||
//! ciphertext || tag (16 B)`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use k256::ecdh::EphemeralSecret;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::ecdsa::{Keypair, PublicKey, COMPRESSED_PUBKEY_SIZE};
use crate::{CryptoError, Result};

/// AES-GCM nonce size in bytes.
const NONCE_SIZE: usize = 12;

/// AES-GCM tag size in bytes.
const TAG_SIZE: usize = 16;

/// HKDF info string binding derived keys to this scheme.
const KDF_INFO: &[u8] = b"murmur/ecies/aes-256-gcm/v1";

/// Minimum length of a well-formed envelope.
const MIN_ENVELOPE_SIZE: usize = COMPRESSED_PUBKEY_SIZE + NONCE_SIZE + TAG_SIZE;

/// Encrypt `plaintext` to the holder of `recipient`.
pub fn encrypt(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_public = PublicKey::from_inner(ephemeral.public_key());

    let shared = ephemeral.diffie_hellman(recipient.inner());
    let mut key = derive_key(shared.raw_secret_bytes().as_slice())?;

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    key.zeroize();

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut envelope =
        Vec::with_capacity(COMPRESSED_PUBKEY_SIZE + NONCE_SIZE + ciphertext.len());
    envelope.extend_from_slice(&ephemeral_public.to_compressed_bytes());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Decrypt an envelope produced by [`encrypt`] with our private key.
///
/// # Errors
///
/// Returns [`CryptoError::Decryption`] if the envelope is truncated, the
/// ephemeral key is invalid, or authentication fails.
pub fn decrypt(keypair: &Keypair, envelope: &[u8]) -> Result<Vec<u8>> {
    if envelope.len() < MIN_ENVELOPE_SIZE {
        return Err(CryptoError::Decryption);
    }

    let ephemeral_public =
        PublicKey::from_compressed_bytes(&envelope[..COMPRESSED_PUBKEY_SIZE])
            .map_err(|_| CryptoError::Decryption)?;
    let nonce_bytes = &envelope[COMPRESSED_PUBKEY_SIZE..COMPRESSED_PUBKEY_SIZE + NONCE_SIZE];
    let ciphertext = &envelope[COMPRESSED_PUBKEY_SIZE + NONCE_SIZE..];

    let secret = keypair.secret();
    let shared = k256::ecdh::diffie_hellman(
        secret.to_nonzero_scalar(),
        ephemeral_public.inner().as_affine(),
    );
    let mut key = derive_key(shared.raw_secret_bytes().as_slice())?;

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    key.zeroize();

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

fn derive_key(shared_secret: &[u8]) -> Result<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; 32];
    hkdf.expand(KDF_INFO, &mut key)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let recipient = Keypair::generate();
        let plaintext = b"half key material";

        let envelope = encrypt(&recipient.public_key(), plaintext).unwrap();
        let decrypted = decrypt(&recipient, &envelope).unwrap();

        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_decrypt_fails_with_wrong_key() {
        let recipient = Keypair::generate();
        let other = Keypair::generate();

        let envelope = encrypt(&recipient.public_key(), b"secret").unwrap();
        assert!(matches!(
            decrypt(&other, &envelope),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn test_decrypt_fails_with_tampered_ciphertext() {
        let recipient = Keypair::generate();

        let mut envelope = encrypt(&recipient.public_key(), b"secret").unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0xff;

        assert!(matches!(
            decrypt(&recipient, &envelope),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn test_decrypt_fails_on_truncated_envelope() {
        let recipient = Keypair::generate();
        let envelope = encrypt(&recipient.public_key(), b"secret").unwrap();

        assert!(matches!(
            decrypt(&recipient, &envelope[..MIN_ENVELOPE_SIZE - 1]),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn test_envelopes_are_randomized() {
        let recipient = Keypair::generate();
        let e1 = encrypt(&recipient.public_key(), b"same").unwrap();
        let e2 = encrypt(&recipient.public_key(), b"same").unwrap();
        assert_ne!(e1, e2);
    }

    #[test]
    fn test_empty_plaintext() {
        let recipient = Keypair::generate();
        let envelope = encrypt(&recipient.public_key(), b"").unwrap();
        assert_eq!(decrypt(&recipient, &envelope).unwrap(), Vec::<u8>::new());
    }
}
