//! Identifier codec
//!
//! Maps internal surrogate keys (SQLite rowids) to opaque external ids and
//! back. Every id is a kind tag byte followed by a keyed 64-bit permutation
//! of the rowid, rendered as URL-safe unpadded base64 (12 characters).
//!
//! The mapping is stable for as long as the configured key is unchanged.
//! Strings that do not decode, or decode to another kind, simply refer to
//! no record.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

/// Odd multiplier of the permutation (golden-ratio constant).
const MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;

/// Inverse of `MULTIPLIER` modulo 2^64.
const INVERSE: u64 = mod_inverse(MULTIPLIER);

/// Default permutation key.
pub const DEFAULT_ID_KEY: u64 = 0x5EED_0F72_756E_6C00;

/// Encoded length: 1 tag byte + 8 key bytes.
const ENCODED_BYTES: usize = 9;

/// Newton iteration; every step doubles the number of correct low bits
/// (an odd `a` is its own inverse modulo 8).
const fn mod_inverse(a: u64) -> u64 {
    let mut x = a;
    let mut i = 0;
    while i < 5 {
        x = x.wrapping_mul(2u64.wrapping_sub(a.wrapping_mul(x)));
        i += 1;
    }
    x
}

/// Kind of record an id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    /// Experiment id
    Experiment,
    /// Run id
    Run,
    /// Log entry id
    Log,
}

impl IdKind {
    const fn tag(self) -> u8 {
        match self {
            Self::Experiment => b'e',
            Self::Run => b'r',
            Self::Log => b'l',
        }
    }
}

/// Keyed, reversible encoder for external identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdCodec {
    key: u64,
}

impl Default for IdCodec {
    fn default() -> Self {
        Self::new(DEFAULT_ID_KEY)
    }
}

impl IdCodec {
    /// Create a codec with the given permutation key.
    #[must_use]
    pub const fn new(key: u64) -> Self {
        Self { key }
    }

    /// Encode an internal key as an opaque id.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn encode(&self, kind: IdKind, id: i64) -> String {
        let mixed = (id as u64 ^ self.key).wrapping_mul(MULTIPLIER) ^ self.key.rotate_left(32);

        let mut bytes = [0u8; ENCODED_BYTES];
        bytes[0] = kind.tag();
        bytes[1..].copy_from_slice(&mixed.to_be_bytes());
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Decode an opaque id back to its internal key.
    ///
    /// Returns `None` for malformed ids, ids of another kind, and ids that
    /// cannot name a row (non-positive keys).
    #[must_use]
    pub fn decode(&self, kind: IdKind, id: &str) -> Option<i64> {
        let bytes = URL_SAFE_NO_PAD.decode(id).ok()?;
        if bytes.len() != ENCODED_BYTES || bytes[0] != kind.tag() {
            return None;
        }

        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[1..]);
        let mixed = u64::from_be_bytes(raw);
        let plain = (mixed ^ self.key.rotate_left(32)).wrapping_mul(INVERSE) ^ self.key;

        i64::try_from(plain).ok().filter(|id| *id > 0)
    }

    /// Decode a list of ids, dropping those that refer to no record.
    #[must_use]
    pub fn decode_all(&self, kind: IdKind, ids: &[String]) -> Vec<i64> {
        ids.iter().filter_map(|id| self.decode(kind, id)).collect()
    }
}
