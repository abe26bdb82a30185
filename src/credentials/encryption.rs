//! AES-256-GCM encryption for stored provider tokens.
//!
//! Every call to [`encrypt`] draws a fresh 96-bit nonce and embeds it in front of
//! the ciphertext, so a stored value is a single base64 string:
//!
//! ```text
//! base64( nonce[12] || ciphertext || tag[16] )
//! ```
//!
//! The master key must be 32 bytes (256 bits) and comes from process configuration.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// Cipher failures. Always a bug, a wrong key, or tampering; never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key is not exactly [`KEY_SIZE`] bytes
    InvalidKeyLength(usize),
    /// Stored value is not valid base64
    InvalidEncoding,
    /// Too short to hold a nonce and a tag
    Truncated(usize),
    /// Authentication tag did not verify (tampered data or wrong key)
    AuthenticationFailed,
    /// Plaintext is not UTF-8
    InvalidUtf8,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::InvalidKeyLength(len) => write!(
                f,
                "Encryption key must be {} bytes, got {} bytes",
                KEY_SIZE, len
            ),
            CryptoError::InvalidEncoding => write!(f, "Ciphertext is not valid base64"),
            CryptoError::Truncated(len) => write!(
                f,
                "Ciphertext too short: expected at least {} bytes, got {}",
                NONCE_SIZE + TAG_SIZE,
                len
            ),
            CryptoError::AuthenticationFailed => {
                write!(f, "Decryption failed (wrong key or corrupted data)")
            }
            CryptoError::InvalidUtf8 => write!(f, "Decrypted data is not valid UTF-8"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Process-wide token encryption key.
///
/// Loaded once at startup and never logged; `Debug` is redacted.
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Wraps raw key bytes. Mostly useful in tests.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generates a random key from the OS RNG.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(key.as_slice());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Base64 form, as expected by [`validate_key`].
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Decodes and validates the base64 master key.
///
/// Failure here is startup-fatal, so it reports through `anyhow` with context
/// rather than [`CryptoError`].
pub fn validate_key(key_base64: &str) -> Result<EncryptionKey> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .context("Failed to decode base64 encryption key")?;

    let bytes: [u8; KEY_SIZE] = key_bytes.as_slice().try_into().map_err(|_| {
        anyhow!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        )
    })?;

    Ok(EncryptionKey(bytes))
}

/// Encrypts plaintext using AES-256-GCM with a random nonce.
///
/// Nondeterministic: the same plaintext never yields the same output twice.
pub fn encrypt(plaintext: &str, key: &[u8]) -> Result<String, CryptoError> {
    let cipher = cipher_for(key)?;

    // Generate random nonce (never reuse!)
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(nonce.as_slice());
    sealed.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(sealed))
}

/// Decrypts a value produced by [`encrypt`].
pub fn decrypt(sealed: &str, key: &[u8]) -> Result<String, CryptoError> {
    let cipher = cipher_for(key)?;

    let bytes = BASE64
        .decode(sealed)
        .map_err(|_| CryptoError::InvalidEncoding)?;

    if bytes.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Truncated(bytes.len()));
    }

    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        // Valid 32-byte key (base64-encoded)
        let valid_key = BASE64.encode([7u8; 32]);
        assert_eq!(validate_key(&valid_key).unwrap().as_bytes(), &[7u8; 32]);

        // Too short
        assert!(validate_key(&BASE64.encode([0u8; 16])).is_err());

        // Too long
        assert!(validate_key(&BASE64.encode([0u8; 64])).is_err());

        // Invalid base64
        assert!(validate_key("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_generated_key_round_trips_through_base64() {
        let key = EncryptionKey::generate();
        let decoded = validate_key(&key.to_base64()).unwrap();
        assert_eq!(decoded.as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = EncryptionKey::from_bytes([42u8; 32]);
        assert_eq!(format!("{:?}", key), "EncryptionKey(<redacted>)");
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [0u8; 32];
        let long = "x".repeat(4096);
        let plaintexts = ["ya29.a0AfH6SMBx", "", "ünïcödé-token", long.as_str()];

        for plaintext in plaintexts {
            let sealed = encrypt(plaintext, &key).expect("Encryption failed");
            assert_ne!(sealed, plaintext);
            assert_eq!(decrypt(&sealed, &key).expect("Decryption failed"), plaintext);
        }
    }

    #[test]
    fn test_encryption_is_nondeterministic() {
        let key = [0u8; 32];

        let first = encrypt("same-plaintext", &key).unwrap();
        let second = encrypt("same-plaintext", &key).unwrap();

        assert_ne!(first, second);
        assert_eq!(decrypt(&first, &key).unwrap(), "same-plaintext");
        assert_eq!(decrypt(&second, &key).unwrap(), "same-plaintext");
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        assert_eq!(
            encrypt("secret", &[0u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        );
        let sealed = encrypt("secret", &[0u8; 32]).unwrap();
        assert_eq!(
            decrypt(&sealed, &[0u8; 31]),
            Err(CryptoError::InvalidKeyLength(31))
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt("secret", &[0u8; 32]).unwrap();
        assert_eq!(
            decrypt(&sealed, &[1u8; 32]),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_every_single_bit_flip_is_detected() {
        let key = [9u8; 32];
        let sealed = BASE64.decode(encrypt("access-token", &key).unwrap()).unwrap();

        for byte in 0..sealed.len() {
            for bit in 0..8 {
                let mut tampered = sealed.clone();
                tampered[byte] ^= 1 << bit;
                let result = decrypt(&BASE64.encode(&tampered), &key);
                assert_eq!(
                    result,
                    Err(CryptoError::AuthenticationFailed),
                    "flip of bit {} in byte {} went undetected",
                    bit,
                    byte
                );
            }
        }
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = [0u8; 32];
        let sealed = BASE64.decode(encrypt("secret", &key).unwrap()).unwrap();

        let short = BASE64.encode(&sealed[..NONCE_SIZE + 3]);
        assert_eq!(decrypt(&short, &key), Err(CryptoError::Truncated(NONCE_SIZE + 3)));

        // Still long enough to parse, but the tag no longer matches
        let clipped = BASE64.encode(&sealed[..sealed.len() - 1]);
        assert_eq!(decrypt(&clipped, &key), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn test_garbage_input_fails() {
        assert_eq!(
            decrypt("not base64 at all!", &[0u8; 32]),
            Err(CryptoError::InvalidEncoding)
        );
    }
}
