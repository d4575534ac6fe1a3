//! Key Agreement
//!
//! Ephemeral P-256 ECDH used to derive the client-generate session key.

use base64::Engine;
use ring::agreement::{self, EphemeralPrivateKey, UnparsedPublicKey, ECDH_P256};
use ring::rand::SystemRandom;
use secrecy::SecretVec;

use crate::error::CryptoError;

/// Length of the prefix preceding the base64 key in a server public key string.
pub const SERVER_PUBLIC_KEY_PREFIX_LENGTH: usize = 9;

/// DER SubjectPublicKeyInfo header for an uncompressed P-256 point.
const P256_SPKI_HEADER: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08, 0x2a,
    0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];

const P256_POINT_LENGTH: usize = 65;

/// Result of an ephemeral key agreement with the server.
pub struct KeyAgreement {
    /// Shared secret, used directly as the AES-256-GCM key.
    pub shared_secret: SecretVec<u8>,
    /// Client public key as base64 SubjectPublicKeyInfo.
    pub public_key: String,
}

/// Wrap an uncompressed P-256 point in a SubjectPublicKeyInfo structure.
pub fn encode_spki(point: &[u8]) -> Vec<u8> {
    let mut spki = Vec::with_capacity(P256_SPKI_HEADER.len() + point.len());
    spki.extend_from_slice(&P256_SPKI_HEADER);
    spki.extend_from_slice(point);
    spki
}

/// Extract the uncompressed point from a P-256 SubjectPublicKeyInfo structure.
pub fn decode_spki(spki: &[u8]) -> Result<&[u8], CryptoError> {
    if spki.len() != P256_SPKI_HEADER.len() + P256_POINT_LENGTH {
        return Err(CryptoError::InvalidPublicKey {
            message: format!("unexpected key length {}", spki.len()),
        });
    }

    let (header, point) = spki.split_at(P256_SPKI_HEADER.len());
    if header != P256_SPKI_HEADER {
        return Err(CryptoError::InvalidPublicKey {
            message: "not a P-256 public key".to_string(),
        });
    }

    Ok(point)
}

/// Parse a server public key string (prefix followed by base64 SPKI).
pub fn parse_server_public_key(key: &str) -> Result<Vec<u8>, CryptoError> {
    let encoded = key
        .get(SERVER_PUBLIC_KEY_PREFIX_LENGTH..)
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| CryptoError::InvalidPublicKey {
            message: "key too short".to_string(),
        })?;

    let spki = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidPublicKey {
            message: e.to_string(),
        })?;

    Ok(decode_spki(&spki)?.to_vec())
}

/// Generate an ephemeral key pair and agree on a secret with the server key.
pub fn agree(server_public_key: &str) -> Result<KeyAgreement, CryptoError> {
    let server_point = parse_server_public_key(server_public_key)?;

    let rng = SystemRandom::new();
    let private_key =
        EphemeralPrivateKey::generate(&ECDH_P256, &rng).map_err(|_| CryptoError::KeyGeneration)?;
    let public_key = private_key
        .compute_public_key()
        .map_err(|_| CryptoError::KeyGeneration)?;
    let public_key =
        base64::engine::general_purpose::STANDARD.encode(encode_spki(public_key.as_ref()));

    let peer = UnparsedPublicKey::new(&ECDH_P256, server_point);
    let shared_secret = agreement::agree_ephemeral(private_key, &peer, |secret| secret.to_vec())
        .map_err(|_| CryptoError::KeyAgreement)?;

    Ok(KeyAgreement {
        shared_secret: SecretVec::new(shared_secret),
        public_key,
    })
}
