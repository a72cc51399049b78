//! Token abstraction module for consistent hashing.
//!
//! Tokens represent positions on the hash ring and must be comparable,
//! hashable, and thread-safe.

pub mod ketama;
pub mod traits;

pub use ketama::KetamaToken;
pub use traits::Token;
