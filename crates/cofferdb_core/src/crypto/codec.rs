//! Passphrase-keyed AES-256-GCM codec.

use crate::config::PASSTHROUGH_PASSPHRASE;
use crate::error::{CoreError, CoreResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Fixed plaintext round-tripped by [`EncryptionCodec::self_test`].
pub const SELF_TEST_PLAINTEXT: &[u8] = b"cofferdb-encryption-self-test";

/// Whether a codec transforms bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    /// Encrypt and decrypt are identity functions.
    PassThrough,
    /// Bytes are encrypted with AES-256-GCM.
    Active,
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&digest);
        Self { bytes }
    }
}

/// Transparent at-rest encryption for file payloads.
///
/// The output format in active mode is `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
/// The key is fixed for the lifetime of the codec.
pub struct EncryptionCodec {
    cipher: Option<Aes256Gcm>,
}

impl EncryptionCodec {
    /// Creates a codec from an optional passphrase.
    ///
    /// `None` and the reserved value `"none"` select pass-through mode.
    #[must_use]
    pub fn new(passphrase: Option<&str>) -> Self {
        match passphrase {
            None => Self::passthrough(),
            Some(p) if p == PASSTHROUGH_PASSPHRASE => Self::passthrough(),
            Some(p) => {
                let key = DerivedKey::from_passphrase(p);
                let cipher = Aes256Gcm::new(GenericArray::from_slice(&key.bytes));
                Self {
                    cipher: Some(cipher),
                }
            }
        }
    }

    /// Creates a codec in pass-through mode.
    #[must_use]
    pub fn passthrough() -> Self {
        Self { cipher: None }
    }

    /// The mode this codec operates in.
    #[must_use]
    pub fn mode(&self) -> EncryptionMode {
        if self.cipher.is_some() {
            EncryptionMode::Active
        } else {
            EncryptionMode::PassThrough
        }
    }

    /// Returns true in active mode.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.mode() == EncryptionMode::Active
    }

    /// Encrypts a payload.
    ///
    /// # Errors
    ///
    /// Returns `EncryptionFailed` if the cipher rejects the input. Plaintext is
    /// never returned in active mode.
    pub fn encrypt(&self, plaintext: &[u8]) -> CoreResult<Vec<u8>> {
        let Some(cipher) = &self.cipher else {
            return Ok(plaintext.to_vec());
        };

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CoreError::encryption_failed("cipher rejected payload"))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend(ciphertext);
        Ok(result)
    }

    /// Decrypts a payload produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns `DecryptionFailed` if the input is shorter than a nonce plus
    /// tag, or if authentication fails (wrong key, tampered or unencrypted data).
    pub fn decrypt(&self, ciphertext: &[u8]) -> CoreResult<Vec<u8>> {
        let Some(cipher) = &self.cipher else {
            return Ok(ciphertext.to_vec());
        };

        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CoreError::decryption_failed(format!(
                "ciphertext too short: {} bytes",
                ciphertext.len()
            )));
        }

        let (nonce, body) = ciphertext.split_at(NONCE_SIZE);
        cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| CoreError::decryption_failed("authentication failed"))
    }

    /// Round-trips a fixed string through the codec.
    ///
    /// # Errors
    ///
    /// Returns `SelfTestFailed` if the round trip does not reproduce the input,
    /// or the underlying cipher error.
    pub fn self_test(&self) -> CoreResult<()> {
        let sealed = self.encrypt(SELF_TEST_PLAINTEXT)?;
        let opened = self.decrypt(&sealed)?;
        if opened != SELF_TEST_PLAINTEXT {
            return Err(CoreError::SelfTestFailed);
        }
        if self.is_encrypted() && sealed[NONCE_SIZE..].starts_with(SELF_TEST_PLAINTEXT) {
            return Err(CoreError::SelfTestFailed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for EncryptionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionCodec")
            .field("mode", &self.mode())
            .finish()
    }
}
