//! MD5 partitioner implementation (Ketama-compatible).

use crate::partitioner::traits::Partitioner;

/// MD5 partitioner, the hash every Ketama client agrees on.
#[derive(Clone, Copy, Debug, Default)]
pub struct Md5Partitioner;

impl Partitioner for Md5Partitioner {
    fn digest_len(&self) -> usize {
        16
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        ::md5::compute(data).0.to_vec()
    }

    fn name(&self) -> &'static str {
        "Md5Partitioner"
    }
}
