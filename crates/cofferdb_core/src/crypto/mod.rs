//! Encryption at rest.
//!
//! Every byte written to a collection or index file passes through the
//! database's [`EncryptionCodec`], and every byte read passes back through it
//! before decoding.
//!
//! ## Security Model
//!
//! - AES-256-GCM authenticated encryption
//! - Key is the SHA-256 digest of the passphrase, zeroized on drop
//! - Fresh random nonce per call, prepended to the ciphertext
//! - Pass-through mode is explicit ([`EncryptionMode::PassThrough`]) and never
//!   entered as a fallback from a failed decrypt
//!
//! ## Usage
//!
//! ```
//! use cofferdb_core::crypto::EncryptionCodec;
//!
//! let codec = EncryptionCodec::new(Some("correct horse"));
//! let ciphertext = codec.encrypt(b"secret data").unwrap();
//! assert_eq!(codec.decrypt(&ciphertext).unwrap(), b"secret data");
//! ```

mod codec;

pub use codec::{EncryptionCodec, EncryptionMode, KEY_SIZE, NONCE_SIZE, SELF_TEST_PLAINTEXT, TAG_SIZE};
