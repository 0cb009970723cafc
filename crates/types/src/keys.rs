//! Key primitives for ledger state addressing.
//!
//! Every state object is addressed by a 256-bit identifier, totally ordered
//! by big-endian bytewise comparison. Two identifiers are reserved as
//! iteration bookends: [`ObjectId::FIRST`] (all zero) and [`ObjectId::LAST`]
//! (all ones). Neither is ever a real ledger object; successor walks start
//! below `FIRST` + 1 and terminate at `LAST`.
//!
//! Derived keys (directory page children, the fees singleton) are produced
//! by domain-tagged SHA-256 so that every component derives the same child
//! key from the same parent and index.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 256-bit hash identifying a transaction or a ledger header.
pub type Hash = [u8; 32];

/// Identifier of a state object in the ledger key space.
///
/// Ordering is big-endian bytewise, which the derived array ordering
/// provides. Displays as lowercase hex.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    /// Lower bookend of the key space (all zero). Reserved; never a real
    /// object.
    pub const FIRST: ObjectId = ObjectId([0x00; 32]);

    /// Upper bookend of the key space (all ones). Reserved; never a real
    /// object.
    pub const LAST: ObjectId = ObjectId([0xFF; 32]);

    /// Wraps raw key bytes.
    #[inline]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parses a key from a byte slice; `None` unless exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Returns the raw key bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// True for the reserved bookends, which may never be written as
    /// ledger objects.
    #[inline]
    pub fn is_sentinel(&self) -> bool {
        *self == Self::FIRST || *self == Self::LAST
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for ObjectId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Identifier of an account referenced by transaction indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId([u8; 32]);

impl AccountId {
    /// Wraps raw account bytes.
    #[inline]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parses an account id from a byte slice; `None` unless exactly 32
    /// bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Returns the raw account bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for AccountId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Upper bound of an offer book's key range.
///
/// A book identifier carries its 24-byte base in the high bytes and a
/// quality in the low 8 bytes; forcing the quality bytes to all ones yields
/// the largest key still inside the book.
pub fn book_end(book: &ObjectId) -> ObjectId {
    let mut bytes = *book.as_bytes();
    for byte in &mut bytes[24..] {
        *byte = 0xFF;
    }
    ObjectId::new(bytes)
}

/// Derives the key of a directory's numbered continuation page.
///
/// Deterministic over (root, index): SHA-256 of a domain tag, the root key,
/// and the big-endian page index.
pub fn keylet_page(root: &ObjectId, index: u64) -> ObjectId {
    let mut hasher = Sha256::new();
    hasher.update(b"chronicle/dir-page");
    hasher.update(root.as_bytes());
    hasher.update(index.to_be_bytes());
    ObjectId::new(hasher.finalize().into())
}

/// The well-known key of the fee settings singleton.
pub fn fees_key() -> ObjectId {
    let mut hasher = Sha256::new();
    hasher.update(b"chronicle/fee-settings");
    ObjectId::new(hasher.finalize().into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn key(fill: u8) -> ObjectId {
        ObjectId::new([fill; 32])
    }

    #[test]
    fn test_ordering_is_bytewise_big_endian() {
        let mut low = [0u8; 32];
        low[0] = 0x01;
        let mut high = [0u8; 32];
        high[0] = 0x02;
        high[31] = 0x00;
        assert!(ObjectId::new(low) < ObjectId::new(high));

        // A difference in the last byte only matters when the prefixes match.
        let mut tail = low;
        tail[31] = 0x01;
        assert!(ObjectId::new(low) < ObjectId::new(tail));
    }

    #[test]
    fn test_sentinels_bound_the_key_space() {
        let real = key(0x42);
        assert!(ObjectId::FIRST < real);
        assert!(real < ObjectId::LAST);
        assert!(ObjectId::FIRST.is_sentinel());
        assert!(ObjectId::LAST.is_sentinel());
        assert!(!real.is_sentinel());
    }

    #[test]
    fn test_from_slice_length_checked() {
        assert!(ObjectId::from_slice(&[0u8; 32]).is_some());
        assert!(ObjectId::from_slice(&[0u8; 31]).is_none());
        assert!(ObjectId::from_slice(&[0u8; 33]).is_none());
        assert!(AccountId::from_slice(&[7u8; 32]).is_some());
        assert!(AccountId::from_slice(&[]).is_none());
    }

    #[test]
    fn test_display_is_lowercase_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xAB;
        bytes[31] = 0x01;
        let rendered = ObjectId::new(bytes).to_string();
        assert_eq!(rendered.len(), 64);
        assert!(rendered.starts_with("ab"));
        assert!(rendered.ends_with("01"));
    }

    #[test]
    fn test_book_end_masks_quality_bytes() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x11;
        bytes[23] = 0x22;
        bytes[24] = 0x33;
        let book = ObjectId::new(bytes);
        let end = book_end(&book);
        assert_eq!(&end.as_bytes()[..24], &book.as_bytes()[..24]);
        assert_eq!(&end.as_bytes()[24..], &[0xFF; 8]);
        assert!(book < end);
    }

    #[test]
    fn test_keylet_page_deterministic_and_distinct() {
        let root = key(0x55);
        assert_eq!(keylet_page(&root, 1), keylet_page(&root, 1));
        assert_ne!(keylet_page(&root, 1), keylet_page(&root, 2));
        assert_ne!(keylet_page(&root, 1), keylet_page(&key(0x56), 1));
    }

    #[test]
    fn test_fees_key_is_stable() {
        assert_eq!(fees_key(), fees_key());
        assert!(!fees_key().is_sentinel());
    }
}
