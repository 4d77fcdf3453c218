//! Decentralized identifiers for Synapse agents.
//!
//! Format: `did:synapse:<hex(sha256(ed25519-public-key))>`
//!
//! A [`Did`] is derived deterministically from an Ed25519 verifying key. The
//! binding between identifier and key is checked by hashing the transmitted
//! key and comparing against the identifier suffix, so a peer cannot claim a
//! DID it does not hold the key for. Key slots are optional: a parsed DID
//! carries no key at all, a peer's DID carries the verifying key, and only
//! the local agent's DID holds the signing key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::constants::DID_METHOD;
use crate::error::ProtocolError;

/// A Synapse decentralized identifier with optional key material.
#[derive(Clone)]
pub struct Did {
    method: String,
    id: String,
    verifying_key: Option<VerifyingKey>,
    signing_key: Option<SigningKey>,
}

impl Did {
    /// Generate a fresh Ed25519 key pair and derive a DID from it.
    pub fn generate() -> Result<Self, ProtocolError> {
        let mut secret = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut secret)
            .map_err(|e| ProtocolError::RandomSource(e.to_string()))?;
        let signing_key = SigningKey::from_bytes(&secret);
        Ok(Self::from_signing_key(signing_key))
    }

    /// Derive a DID from an existing signing key (e.g. loaded from disk).
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            method: DID_METHOD.to_string(),
            id: key_digest(&verifying_key),
            verifying_key: Some(verifying_key),
            signing_key: Some(signing_key),
        }
    }

    /// Derive a DID from a peer's raw public key. No signing key is attached.
    pub fn from_public_key(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let arr: [u8; PUBLIC_KEY_LENGTH] =
            bytes.try_into().map_err(|_| ProtocolError::InvalidKeyLength {
                expected: PUBLIC_KEY_LENGTH,
                got: bytes.len(),
            })?;
        let verifying_key = VerifyingKey::from_bytes(&arr)
            .map_err(|e| ProtocolError::Decoding { context: "public_key", reason: e.to_string() })?;
        Ok(Self {
            method: DID_METHOD.to_string(),
            id: key_digest(&verifying_key),
            verifying_key: Some(verifying_key),
            signing_key: None,
        })
    }

    /// Parse a `did:<method>:<id>` string. The method token is not
    /// interpreted; binding validation enforces the cryptographic invariant
    /// independently of it.
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        let rest = s
            .strip_prefix("did:")
            .ok_or_else(|| ProtocolError::InvalidDid(s.to_string()))?;
        let (method, id) = rest
            .split_once(':')
            .ok_or_else(|| ProtocolError::InvalidDid(s.to_string()))?;
        if method.is_empty() || id.is_empty() {
            return Err(ProtocolError::InvalidDid(s.to_string()));
        }
        Ok(Self {
            method: method.to_string(),
            id: id.to_string(),
            verifying_key: None,
            signing_key: None,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The hex-encoded SHA-256 suffix of the identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw public key bytes, if this DID carries a verifying key.
    pub fn public_key(&self) -> Option<[u8; PUBLIC_KEY_LENGTH]> {
        self.verifying_key.as_ref().map(|vk| vk.to_bytes())
    }

    pub fn verifying_key(&self) -> Option<&VerifyingKey> {
        self.verifying_key.as_ref()
    }

    pub fn has_signing_key(&self) -> bool {
        self.signing_key.is_some()
    }

    /// Sign data with the DID's signing key.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let key = self.signing_key.as_ref().ok_or(ProtocolError::NoPrivateKey)?;
        Ok(key.sign(data).to_bytes().to_vec())
    }

    /// Check that `sig` is a valid Ed25519 signature of `data` under the key
    /// embedded in this DID. Total: returns false for a missing key or a
    /// malformed signature, never errors.
    pub fn verify(&self, data: &[u8], sig: &[u8]) -> bool {
        let Some(vk) = self.verifying_key.as_ref() else {
            return false;
        };
        match Signature::from_slice(sig) {
            Ok(sig) => vk.verify(data, &sig).is_ok(),
            Err(_) => false,
        }
    }

    /// Confirm that a raw public key hashes to this DID's identifier suffix.
    /// Call after receiving a handshake to ensure the claimed DID is genuine.
    pub fn validate_binding(&self, public_key: &[u8]) -> bool {
        hex::encode(Sha256::digest(public_key)) == self.id
    }
}

impl std::fmt::Display for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "did:{}:{}", self.method, self.id)
    }
}

// Key material stays out of debug output.
impl std::fmt::Debug for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Did")
            .field("method", &self.method)
            .field("id", &self.id)
            .field("has_signing_key", &self.signing_key.is_some())
            .finish()
    }
}

fn key_digest(vk: &VerifyingKey) -> String {
    hex::encode(Sha256::digest(vk.to_bytes()))
}

// ============================================================================
// Agent
// ============================================================================

/// A named protocol participant: agent id, DID (with key material for the
/// local agent), and declared capability tags.
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: String,
    pub did: Did,
    pub capabilities: Vec<String>,
}

impl Agent {
    /// Create an agent with a freshly generated identity.
    pub fn new(id: impl Into<String>, capabilities: Vec<String>) -> Result<Self, ProtocolError> {
        Ok(Self { id: id.into(), did: Did::generate()?, capabilities })
    }

    /// Create an agent from a persisted signing key.
    pub fn from_signing_key(
        id: impl Into<String>,
        capabilities: Vec<String>,
        signing_key: SigningKey,
    ) -> Self {
        Self { id: id.into(), did: Did::from_signing_key(signing_key), capabilities }
    }

    /// Raw Ed25519 public key bytes. Always present for a local agent.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.did.public_key().expect("local agent always has a verifying key")
    }

    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        self.did.sign(data)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_parse_round_trip() {
        let d = Did::generate().unwrap();
        let s = d.to_string();
        assert!(s.starts_with("did:synapse:"));

        let parsed = Did::parse(&s).unwrap();
        assert_eq!(parsed.id(), d.id());
        assert_eq!(parsed.method(), "synapse");
        assert!(parsed.public_key().is_none());
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["", "did:", "did:synapse", "did::abc", "did:synapse:", "notadid"] {
            assert!(Did::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn parse_accepts_foreign_method() {
        let d = Did::parse("did:web:example").unwrap();
        assert_eq!(d.method(), "web");
        assert_eq!(d.id(), "example");
    }

    #[test]
    fn binding_validation() {
        let d = Did::generate().unwrap();
        let pk = d.public_key().unwrap();
        assert!(d.validate_binding(&pk));

        let mut tampered = pk;
        tampered[0] ^= 0xFF;
        assert!(!d.validate_binding(&tampered));
    }

    #[test]
    fn binding_holds_for_every_bit_flip_in_first_byte() {
        let d = Did::generate().unwrap();
        let pk = d.public_key().unwrap();
        for bit in 0..8 {
            let mut flipped = pk;
            flipped[0] ^= 1 << bit;
            assert!(!d.validate_binding(&flipped));
        }
    }

    #[test]
    fn sign_verify_round_trip() {
        let d = Did::generate().unwrap();
        let msg = b"synapse test message";
        let sig = d.sign(msg).unwrap();
        assert!(d.verify(msg, &sig));

        let mut tampered = msg.to_vec();
        tampered[0] ^= 0xFF;
        assert!(!d.verify(&tampered, &sig));
    }

    #[test]
    fn sign_without_private_key_fails() {
        let d = Did::parse("did:synapse:deadbeef").unwrap();
        assert!(matches!(d.sign(b"x"), Err(ProtocolError::NoPrivateKey)));
    }

    #[test]
    fn verify_is_total() {
        let d = Did::generate().unwrap();
        // Wrong-length signature must return false, not panic.
        assert!(!d.verify(b"data", b"short"));
        // Keyless DID verifies nothing.
        let parsed = Did::parse(&d.to_string()).unwrap();
        assert!(!parsed.verify(b"data", &d.sign(b"data").unwrap()));
    }

    #[test]
    fn derived_did_matches_generated() {
        let d = Did::generate().unwrap();
        let derived = Did::from_public_key(&d.public_key().unwrap()).unwrap();
        assert_eq!(derived.id(), d.id());
        assert!(!derived.has_signing_key());
    }

    #[test]
    fn from_public_key_rejects_bad_length() {
        assert!(matches!(
            Did::from_public_key(&[0u8; 16]),
            Err(ProtocolError::InvalidKeyLength { expected: 32, got: 16 })
        ));
    }
}
