//! Envelope Codec
//!
//! AES-GCM envelopes exchanged with the identity service.
//!
//! Refresh and generate responses are `IV (12) || ciphertext || tag (16)`,
//! base64 encoded. Versioned envelopes add a leading version byte and carry a
//! 16-byte `timestamp || nonce` prefix inside the plaintext.

use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, AES_256_GCM};
use secrecy::{ExposeSecret, SecretVec};

use crate::error::CryptoError;

/// Length of the GCM initialization vector.
pub const IV_LENGTH: usize = 12;

/// Length of the GCM authentication tag.
pub const TAG_LENGTH: usize = 16;

/// Length of the timestamp and nonce prefix inside request plaintexts.
pub const PAYLOAD_PREFIX_LENGTH: usize = 16;

/// Version byte leading every request envelope.
pub const ENVELOPE_VERSION: u8 = 0x01;

/// Symmetric key material, zeroized on drop.
struct EnvelopeKey(SecretVec<u8>);

impl EnvelopeKey {
    fn from_base64(key_b64: &str) -> Option<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(key_b64)
            .ok()?;
        Some(Self(SecretVec::new(bytes)))
    }

    fn from_bytes(key: &[u8]) -> Self {
        Self(SecretVec::new(key.to_vec()))
    }

    /// AES-128-GCM for 16-byte keys, AES-256-GCM for 32-byte keys.
    fn aead_key(&self) -> Result<LessSafeKey, CryptoError> {
        let bytes = self.0.expose_secret();
        let algorithm = match bytes.len() {
            16 => &AES_128_GCM,
            32 => &AES_256_GCM,
            other => {
                return Err(CryptoError::Encryption {
                    message: format!("unsupported key length {}", other),
                })
            }
        };

        let unbound = UnboundKey::new(algorithm, bytes).map_err(|_| CryptoError::Encryption {
            message: "invalid key".to_string(),
        })?;
        Ok(LessSafeKey::new(unbound))
    }

    fn open(&self, iv: &[u8], aad: &[u8], ciphertext: &[u8]) -> Option<Vec<u8>> {
        let key = self.aead_key().ok()?;
        let nonce = Nonce::try_assume_unique_for_key(iv).ok()?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = key.open_in_place(nonce, Aad::from(aad), &mut in_out).ok()?;
        Some(plaintext.to_vec())
    }

    fn seal(&self, iv: &[u8; IV_LENGTH], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = self.aead_key()?;
        let nonce = Nonce::assume_unique_for_key(*iv);

        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(nonce, Aad::from(aad), &mut in_out)
            .map_err(|_| CryptoError::Encryption {
                message: "seal failed".to_string(),
            })?;
        Ok(in_out)
    }
}

fn decode_base64(data: &str) -> Option<Vec<u8>> {
    base64::engine::general_purpose::STANDARD.decode(data).ok()
}

fn split_iv(data: &[u8]) -> Option<(&[u8], &[u8])> {
    if data.len() < IV_LENGTH + TAG_LENGTH {
        return None;
    }
    Some(data.split_at(IV_LENGTH))
}

fn strip_prefix(plaintext: Vec<u8>) -> Option<Vec<u8>> {
    if plaintext.len() < PAYLOAD_PREFIX_LENGTH {
        return None;
    }
    Some(plaintext[PAYLOAD_PREFIX_LENGTH..].to_vec())
}

/// Decrypt an envelope with a base64 key.
///
/// With `is_refresh` the data is a plain `IV || ciphertext` response and the
/// plaintext is returned as is. Otherwise the data is a versioned envelope as
/// produced by [`encrypt`]: the version byte is checked and the 16-byte
/// timestamp and nonce prefix is stripped from the plaintext.
///
/// Returns `None` on any failure: bad base64, unsupported key length, unknown
/// version or a tag mismatch.
pub fn decrypt(key_b64: &str, data_b64: &str, is_refresh: bool) -> Option<Vec<u8>> {
    let key = EnvelopeKey::from_base64(key_b64)?;
    decrypt_with(&key, data_b64, is_refresh)
}

/// Decrypt a response envelope with raw key bytes.
pub fn decrypt_with_key(key: &[u8], data_b64: &str, is_refresh: bool) -> Option<Vec<u8>> {
    decrypt_with(&EnvelopeKey::from_bytes(key), data_b64, is_refresh)
}

fn decrypt_with(key: &EnvelopeKey, data_b64: &str, is_refresh: bool) -> Option<Vec<u8>> {
    let data = decode_base64(data_b64)?;
    if is_refresh {
        let (iv, ciphertext) = split_iv(&data)?;
        return key.open(iv, &[], ciphertext);
    }
    open_versioned(key, &data)
}

fn open_versioned(key: &EnvelopeKey, data: &[u8]) -> Option<Vec<u8>> {
    let (version, rest) = data.split_first()?;
    if *version != ENVELOPE_VERSION {
        return None;
    }

    let (iv, ciphertext) = split_iv(rest)?;
    strip_prefix(key.open(iv, &[], ciphertext)?)
}

/// Encrypt a JSON request body into a versioned envelope.
///
/// The plaintext is the big-endian `timestamp_ms`, an 8-byte random nonce, the
/// body and a trailing newline.
pub fn encrypt(key_b64: &str, json: &str, timestamp_ms: i64) -> Result<String, CryptoError> {
    let key = EnvelopeKey::from_base64(key_b64).ok_or_else(|| CryptoError::Encryption {
        message: "key is not valid base64".to_string(),
    })?;

    let mut plaintext = Vec::with_capacity(PAYLOAD_PREFIX_LENGTH + json.len() + 1);
    plaintext.extend_from_slice(&timestamp_ms.to_be_bytes());
    plaintext.extend_from_slice(&rand::random::<[u8; 8]>());
    plaintext.extend_from_slice(json.as_bytes());
    plaintext.push(b'\n');

    let iv = rand::random::<[u8; IV_LENGTH]>();
    let sealed = key.seal(&iv, &[], &plaintext)?;

    let mut envelope = Vec::with_capacity(1 + IV_LENGTH + sealed.len());
    envelope.push(ENVELOPE_VERSION);
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&sealed);

    Ok(base64::engine::general_purpose::STANDARD.encode(envelope))
}

/// Open a request envelope produced by [`encrypt`], as the service would.
///
/// Returns the body (including its trailing newline) without the prefix.
pub fn open_request(key_b64: &str, data_b64: &str) -> Option<Vec<u8>> {
    decrypt(key_b64, data_b64, false)
}

/// Seal `plaintext` under a raw key, IV and additional authenticated data.
///
/// Returns `ciphertext || tag`.
pub fn seal_with_aad(
    key: &[u8],
    iv: &[u8; IV_LENGTH],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    EnvelopeKey::from_bytes(key).seal(iv, aad, plaintext)
}

/// Build a response envelope (`IV || ciphertext || tag`, base64), as the
/// service would.
pub fn seal_response(key: &[u8], plaintext: &[u8]) -> Result<String, CryptoError> {
    let iv = rand::random::<[u8; IV_LENGTH]>();
    let sealed = seal_with_aad(key, &iv, &[], plaintext)?;

    let mut envelope = iv.to_vec();
    envelope.extend_from_slice(&sealed);
    Ok(base64::engine::general_purpose::STANDARD.encode(envelope))
}
