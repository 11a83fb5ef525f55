//! secp256k1 identities and recoverable signatures.
//!
//! Every peer is identified by a [`Signatory`]: the BLAKE3 hash of its
//! compressed public key. Handshake signatures are recoverable, so a
//! verifier needs only the signature and the signed digest to obtain the
//! signer's public key; verification then reduces to comparing the
//! recovered key's signatory against the claimed one.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::{CryptoError, Result};

/// Size of a signatory in bytes.
pub const SIGNATORY_SIZE: usize = 32;

/// Size of a SEC1-compressed public key in bytes.
pub const COMPRESSED_PUBKEY_SIZE: usize = 33;

/// Size of a recoverable signature in bytes (r || s || recovery id).
pub const SIGNATURE_SIZE: usize = 65;

/// A 32-byte peer identity derived from a public key.
#[derive(Clone, Copy, Default, Serialize, Deserialize)]
pub struct Signatory([u8; SIGNATORY_SIZE]);

impl Signatory {
    /// Create a signatory from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIGNATORY_SIZE {
            return Err(CryptoError::InvalidLength {
                what: "signatory",
                expected: SIGNATORY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SIGNATORY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Get the signatory as a byte slice.
    pub fn as_bytes(&self) -> &[u8; SIGNATORY_SIZE] {
        &self.0
    }

    /// Format as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for byte in &self.0 {
            s.push_str(&format!("{:02x}", byte));
        }
        s
    }
}

impl ConstantTimeEq for Signatory {
    fn ct_eq(&self, other: &Self) -> subtle::Choice {
        self.0.ct_eq(&other.0)
    }
}

impl PartialEq for Signatory {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl Eq for Signatory {}

impl std::hash::Hash for Signatory {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Bucket selection only; not a cryptographic operation.
        self.0.hash(state);
    }
}

impl std::fmt::Debug for Signatory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signatory({}..)", &self.to_hex()[..8])
    }
}

impl std::fmt::Display for Signatory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(k256::PublicKey);

impl PublicKey {
    /// Parse a SEC1-compressed (33-byte) public key.
    pub fn from_compressed_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != COMPRESSED_PUBKEY_SIZE {
            return Err(CryptoError::InvalidLength {
                what: "public key",
                expected: COMPRESSED_PUBKEY_SIZE,
                actual: bytes.len(),
            });
        }
        k256::PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// SEC1-compressed encoding (33 bytes).
    pub fn to_compressed_bytes(&self) -> [u8; COMPRESSED_PUBKEY_SIZE] {
        let point = self.0.to_encoded_point(true);
        let mut arr = [0u8; COMPRESSED_PUBKEY_SIZE];
        arr.copy_from_slice(point.as_bytes());
        arr
    }

    /// Derive the signatory of this key.
    pub fn signatory(&self) -> Signatory {
        Signatory(*blake3::hash(&self.to_compressed_bytes()).as_bytes())
    }

    pub(crate) fn inner(&self) -> &k256::PublicKey {
        &self.0
    }

    pub(crate) fn from_inner(inner: k256::PublicKey) -> Self {
        Self(inner)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({:?})", self.signatory())
    }
}

/// A secp256k1 keypair used for handshake authentication and ECIES.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::random(&mut OsRng),
        }
    }

    /// Restore a keypair from a 32-byte secret scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        SigningKey::from_slice(bytes)
            .map(|signing| Self { signing })
            .map_err(|_| CryptoError::InvalidPrivateKey)
    }

    /// The 32-byte secret scalar.
    ///
    /// # Security
    ///
    /// Handle with care; zeroize any copies once persisted.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes().into()
    }

    /// The public half of this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(k256::PublicKey::from(self.signing.verifying_key()))
    }

    /// The signatory of the public half.
    pub fn signatory(&self) -> Signatory {
        self.public_key().signatory()
    }

    /// Sign a 32-byte digest, producing a recoverable signature.
    pub fn sign(&self, digest: &[u8; 32]) -> Result<RecoverableSignature> {
        let (signature, recovery_id) = self
            .signing
            .sign_prehash_recoverable(digest)
            .map_err(|e| CryptoError::Signing(e.to_string()))?;

        let mut bytes = [0u8; SIGNATURE_SIZE];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = recovery_id.to_byte();
        Ok(RecoverableSignature(bytes))
    }

    pub(crate) fn secret(&self) -> k256::SecretKey {
        k256::SecretKey::from(&self.signing)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair({:?})", self.signatory())
    }
}

/// A 65-byte recoverable ECDSA signature (r || s || recovery id).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature([u8; SIGNATURE_SIZE]);

impl RecoverableSignature {
    /// Parse a signature from its 65-byte encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidLength {
                what: "signature",
                expected: SIGNATURE_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SIGNATURE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// The 65-byte encoding.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    /// Recover the public key that produced this signature over `digest`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the signature bytes are
    /// malformed or no key can be recovered.
    pub fn recover(&self, digest: &[u8; 32]) -> Result<PublicKey> {
        let signature =
            Signature::from_slice(&self.0[..64]).map_err(|_| CryptoError::InvalidSignature)?;
        let recovery_id =
            RecoveryId::from_byte(self.0[64]).ok_or(CryptoError::InvalidSignature)?;
        let verifying = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
            .map_err(|_| CryptoError::InvalidSignature)?;
        Ok(PublicKey(k256::PublicKey::from(&verifying)))
    }
}

impl std::fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RecoverableSignature({:02x}{:02x}.., v = {})",
            self.0[0], self.0[1], self.0[64]
        )
    }
}

/// Sign the signatory of `keypair` with itself, as sent during the handshake.
///
/// The signed digest is the signatory: the peer proves possession of the
/// private key matching the identity it claims.
pub fn sign_signatory(keypair: &Keypair) -> Result<RecoverableSignature> {
    keypair.sign(keypair.signatory().as_bytes())
}

/// Verify a handshake signature: recover the key from the signature over
/// `claimed` and check that its signatory equals `claimed`.
pub fn verify_signatory(
    claimed: &Signatory,
    signature: &RecoverableSignature,
) -> Result<PublicKey> {
    let recovered = signature.recover(claimed.as_bytes())?;
    if recovered.signatory() != *claimed {
        return Err(CryptoError::SignatoryMismatch);
    }
    Ok(recovered)
}

/// XOR-combine two 32-byte half keys into a session key.
pub fn combine_half_keys(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut key = [0u8; 32];
    for i in 0..32 {
        key[i] = a[i] ^ b[i];
    }
    key
}

/// Generate a random 32-byte half key.
pub fn random_half_key() -> [u8; 32] {
    use rand::RngCore;
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signatory_stable_for_key() {
        let keypair = Keypair::generate();
        assert_eq!(keypair.signatory(), keypair.public_key().signatory());

        let restored = Keypair::from_bytes(&keypair.to_bytes()).unwrap();
        assert_eq!(keypair.signatory(), restored.signatory());
    }

    #[test]
    fn test_signatories_differ_between_keys() {
        assert_ne!(Keypair::generate().signatory(), Keypair::generate().signatory());
    }

    #[test]
    fn test_compressed_pubkey_roundtrip() {
        let keypair = Keypair::generate();
        let bytes = keypair.public_key().to_compressed_bytes();
        let restored = PublicKey::from_compressed_bytes(&bytes).unwrap();
        assert_eq!(restored, keypair.public_key());
    }

    #[test]
    fn test_sign_and_recover() {
        let keypair = Keypair::generate();
        let digest = *blake3::hash(b"message").as_bytes();

        let signature = keypair.sign(&digest).unwrap();
        let recovered = signature.recover(&digest).unwrap();
        assert_eq!(recovered, keypair.public_key());
    }

    #[test]
    fn test_recover_with_wrong_digest_yields_other_key() {
        let keypair = Keypair::generate();
        let digest = *blake3::hash(b"message").as_bytes();
        let other = *blake3::hash(b"other").as_bytes();

        let signature = keypair.sign(&digest).unwrap();
        // Recovery either fails or yields an unrelated key.
        if let Ok(recovered) = signature.recover(&other) {
            assert_ne!(recovered, keypair.public_key());
        }
    }

    #[test]
    fn test_verify_signatory_accepts_honest_peer() {
        let keypair = Keypair::generate();
        let signature = sign_signatory(&keypair).unwrap();
        let recovered = verify_signatory(&keypair.signatory(), &signature).unwrap();
        assert_eq!(recovered, keypair.public_key());
    }

    #[test]
    fn test_verify_signatory_rejects_stolen_identity() {
        let honest = Keypair::generate();
        let attacker = Keypair::generate();

        // Attacker signs the honest signatory with its own key.
        let forged = attacker.sign(honest.signatory().as_bytes()).unwrap();
        assert!(matches!(
            verify_signatory(&honest.signatory(), &forged),
            Err(CryptoError::SignatoryMismatch)
        ));
    }

    #[test]
    fn test_signature_roundtrip() {
        let keypair = Keypair::generate();
        let digest = *blake3::hash(b"m").as_bytes();
        let signature = keypair.sign(&digest).unwrap();
        let restored = RecoverableSignature::from_bytes(signature.as_bytes()).unwrap();
        assert_eq!(signature, restored);
    }

    #[test]
    fn test_combine_half_keys_symmetric() {
        let a = random_half_key();
        let b = random_half_key();
        assert_eq!(combine_half_keys(&a, &b), combine_half_keys(&b, &a));
        assert_ne!(combine_half_keys(&a, &b), a);
    }
}
