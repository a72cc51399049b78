//! Core partitioner trait definitions.

use crate::token::KetamaToken;
use std::fmt::Debug;

/// A partitioner converts keys into tokens for placement on the hash ring.
///
/// Partitioners are stateless and thread-safe, allowing concurrent
/// token generation without synchronization overhead.
pub trait Partitioner: Send + Sync + Debug + 'static {
    /// Digest size in bytes.
    fn digest_len(&self) -> usize;

    /// Hashes `data` into a digest of exactly `digest_len()` bytes.
    fn digest(&self, data: &[u8]) -> Vec<u8>;

    /// Returns the name of this partitioner.
    fn name(&self) -> &'static str;

    /// Number of ring positions one digest yields.
    fn parts_per_hash(&self) -> usize {
        self.digest_len() / 4
    }

    /// Converts a key into a token: the first word of its digest.
    fn partition(&self, key: &[u8]) -> KetamaToken {
        KetamaToken::from_digest(&self.digest(key), 0).unwrap_or(KetamaToken(0))
    }

    /// Every token a single digest of `data` yields, in digest order.
    fn tokens(&self, data: &[u8]) -> Vec<KetamaToken> {
        let digest = self.digest(data);
        (0..self.parts_per_hash())
            .filter_map(|part| KetamaToken::from_digest(&digest, part))
            .collect()
    }
}
