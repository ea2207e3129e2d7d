//! Fixed-width content hash (`h32`) with commutative XOR combine.
//!
//! The hash tree (see `hpfs-merkle`) relies on XOR combine being both associative and
//! commutative to update a node's hash without re-reading its siblings: replacing a
//! child's contribution is `node_hash ^= old_child ^ new_child`, in any order.

use std::fmt;

pub mod version;

/// Width of a hash value in bytes. BLAKE3's default output size.
pub const HASH_LEN: usize = 32;

/// A 32-byte opaque content hash.
///
/// `Hash32::EMPTY` is the identity element under XOR: `h ^ Hash32::EMPTY == h` for all
/// `h`. Directories and freshly-deleted vnodes use it as their "no contribution" value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32(pub [u8; HASH_LEN]);

impl Hash32 {
    pub const EMPTY: Hash32 = Hash32([0u8; HASH_LEN]);

    /// Hashes a single buffer.
    pub fn of(bytes: &[u8]) -> Self {
        let digest = blake3::hash(bytes);
        Hash32(*digest.as_bytes())
    }

    /// Hashes the concatenation of two buffers without materializing it.
    ///
    /// Used for file block hashes, where the block's big-endian byte offset is hashed
    /// together with the block's bytes (see `hpfs_merkle::tree`).
    pub fn of2(a: &[u8], b: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(a);
        hasher.update(b);
        Hash32(*hasher.finalize().as_bytes())
    }

    pub fn is_empty(&self) -> bool {
        *self == Hash32::EMPTY
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(HASH_LEN * 2);
        for byte in &self.0 {
            s.push_str(&format!("{byte:02x}"));
        }
        s
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

impl std::ops::BitXor for Hash32 {
    type Output = Hash32;

    fn bitxor(mut self, rhs: Hash32) -> Hash32 {
        self ^= rhs;
        self
    }
}

impl std::ops::BitXorAssign for Hash32 {
    fn bitxor_assign(&mut self, rhs: Hash32) {
        for i in 0..HASH_LEN {
            self.0[i] ^= rhs.0[i];
        }
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_xor_identity() {
        let h = Hash32::of(b"hello");
        assert_eq!(h ^ Hash32::EMPTY, h);
        assert_eq!(Hash32::EMPTY ^ h, h);
    }

    #[test]
    fn xor_is_commutative_and_associative() {
        let a = Hash32::of(b"a");
        let b = Hash32::of(b"b");
        let c = Hash32::of(b"c");
        assert_eq!(a ^ b, b ^ a);
        assert_eq!((a ^ b) ^ c, a ^ (b ^ c));
    }

    #[test]
    fn create_delete_annihilates() {
        // Mirrors the create/delete annihilation law: XOR-ing a value in then back out
        // returns to the starting point.
        let mut node = Hash32::of(b"dir");
        let start = node;
        let child = Hash32::of(b"file");
        node ^= child; // create
        node ^= child; // delete
        assert_eq!(node, start);
    }

    #[test]
    fn of2_matches_manual_concat() {
        let a = Hash32::of2(b"abc", b"def");
        let b = Hash32::of(b"abcdef");
        assert_eq!(a, b);
    }

    #[test]
    fn hex_is_lowercase_two_chars_per_byte() {
        let h = Hash32([0xAB; HASH_LEN]);
        let hex = h.to_hex();
        assert_eq!(hex.len(), HASH_LEN * 2);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
