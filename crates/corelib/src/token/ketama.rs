//! Ketama token: a 32-bit ring position (spymemcached-compatible).

use crate::token::traits::Token;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ketama token using u32 representation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct KetamaToken(pub u32);

impl Token for KetamaToken {
    fn distance_to(&self, other: &Self) -> Self {
        KetamaToken(other.0.wrapping_sub(self.0))
    }
}

impl KetamaToken {
    /// Reads the `part`-th little-endian 32-bit word of a digest.
    ///
    /// Returns `None` when the digest is too short for that word.
    pub fn from_digest(digest: &[u8], part: usize) -> Option<Self> {
        let offset = part.checked_mul(4)?;
        let word = digest.get(offset..offset + 4)?;
        Some(KetamaToken(u32::from_le_bytes([word[0], word[1], word[2], word[3]])))
    }

    /// The fallback transform spymemcached applies to rehashed keys.
    ///
    /// Computed in 64-bit arithmetic then truncated, so for a 32-bit input the
    /// result is the input doubled modulo 2^32. Independent clients rely on
    /// this exact sequence to pick the same stand-in for a dead server.
    pub fn rehash(self) -> Self {
        let mut h = self.0 as u64;
        h = h.wrapping_add((h ^ (h >> 32)) & 0xffff_ffff);
        h &= 0xffff_ffff;
        KetamaToken(h as u32)
    }
}

impl fmt::Display for KetamaToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
