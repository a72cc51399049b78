//! Consistent hash ring implementation.
//!
//! The ring manages token positions and provides efficient lookup
//! operations for finding nodes responsible for keys.

pub mod ring;
pub mod snapshot;

pub use ring::{HashRing, RingBuilder, MIN_DIGEST_LEN};
pub use snapshot::RingSnapshot;

/// Alias for the main ring type (used by lib.rs).
pub type Ring = HashRing;
