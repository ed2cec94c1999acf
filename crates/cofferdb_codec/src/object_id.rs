//! Document identifier.

use crate::error::{CodecError, CodecResult};
use rand::RngCore;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Size of an object identifier in bytes.
pub const OBJECT_ID_SIZE: usize = 12;

static PROCESS_UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
static COUNTER: OnceLock<AtomicU32> = OnceLock::new();

/// Unique identifier for a document.
///
/// Object IDs are 96-bit values laid out as:
/// - 4 bytes: seconds since the Unix epoch (big-endian)
/// - 5 bytes: random value fixed for the lifetime of the process
/// - 3 bytes: counter seeded randomly, incremented per ID (big-endian)
///
/// IDs generated by one process are strictly increasing within a second,
/// and immutable once assigned to a document.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; OBJECT_ID_SIZE]);

impl ObjectId {
    /// Creates an object ID from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; OBJECT_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generates a new object ID.
    #[must_use]
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0) as u32;

        let process = PROCESS_UNIQUE.get_or_init(|| {
            let mut bytes = [0u8; 5];
            rand::thread_rng().fill_bytes(&mut bytes);
            bytes
        });
        let counter = COUNTER
            .get_or_init(|| AtomicU32::new(rand::thread_rng().next_u32() & 0x00ff_ffff))
            .fetch_add(1, Ordering::SeqCst)
            & 0x00ff_ffff;

        let mut bytes = [0u8; OBJECT_ID_SIZE];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(process);
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; OBJECT_ID_SIZE] {
        &self.0
    }

    /// Seconds since the Unix epoch embedded in this ID.
    #[must_use]
    pub fn timestamp_secs(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Creates an object ID from a slice.
    ///
    /// Returns `None` if the slice is not exactly 12 bytes.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        <[u8; OBJECT_ID_SIZE]>::try_from(slice).ok().map(Self)
    }

    /// Lowercase hex rendering (24 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(OBJECT_ID_SIZE * 2);
        for byte in self.0 {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    /// Parses a 24-character hex string.
    pub fn parse_hex(input: &str) -> CodecResult<Self> {
        let invalid = || CodecError::InvalidObjectId {
            input: input.to_string(),
        };
        if input.len() != OBJECT_ID_SIZE * 2 || !input.is_ascii() {
            return Err(invalid());
        }
        let mut bytes = [0u8; OBJECT_ID_SIZE];
        for (i, chunk) in input.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| invalid())?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hex(s)
    }
}

impl From<[u8; OBJECT_ID_SIZE]> for ObjectId {
    fn from(bytes: [u8; OBJECT_ID_SIZE]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<ObjectId> for [u8; OBJECT_ID_SIZE] {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_unique() {
        let id1 = ObjectId::new();
        let id2 = ObjectId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn from_bytes_roundtrip() {
        let bytes = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let id = ObjectId::from_bytes(bytes);
        assert_eq!(*id.as_bytes(), bytes);
    }

    #[test]
    fn hex_roundtrip() {
        let id = ObjectId::new();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 24);
        assert_eq!(hex.parse::<ObjectId>().unwrap(), id);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(ObjectId::parse_hex("abc").is_err());
        assert!(ObjectId::parse_hex("zzzzzzzzzzzzzzzzzzzzzzzz").is_err());
        assert!(ObjectId::parse_hex("0123456789abcdef0123456789").is_err());
    }

    #[test]
    fn from_slice() {
        assert!(ObjectId::from_slice(&[0u8; 12]).is_some());
        assert!(ObjectId::from_slice(&[0u8; 11]).is_none());
        assert!(ObjectId::from_slice(&[0u8; 16]).is_none());
    }

    #[test]
    fn timestamp_is_recent() {
        let id = ObjectId::new();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as u32;
        assert!(now.saturating_sub(id.timestamp_secs()) < 5);
    }

    #[test]
    fn display_is_hex() {
        let id = ObjectId::from_bytes([0xab; 12]);
        assert_eq!(format!("{id}"), "abababababababababababab");
    }
}
