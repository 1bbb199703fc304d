//! Cryptographic primitives for OPR mining.
//!
//! - LXR lookup-XOR hashing for proof-of-work and record fingerprints
//! - SHA-256 chain identity derivation shared by every participant
//! - Prefixed base58 payout addresses

pub mod address;
mod chain;
mod lxr;

pub use chain::{
    chain_id_from_strings, decode_chain_identity, encode_chain_identity, sha256, ChainError,
    ChainIdentity, OPR_CHAIN_TAG,
};
pub use lxr::{HashEngine, LxrParams, LxrTable, HASH_SIZE};

use thiserror::Error;

/// A fixed-size hash digest produced by the proof-of-work hash engine
pub type Digest = [u8; HASH_SIZE];

/// Hash engine errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    /// `hash` was called before `init`
    #[error("hash engine used before initialization")]
    NotInitialized,
    /// Rejected table parameters
    #[error("invalid hash engine parameters: {0}")]
    InvalidParams(String),
}

/// Anything that can score proof-of-work.
///
/// Implementations must be pure: identical input always yields the identical
/// digest, and `hash` must be callable from many threads at once.
pub trait PowHasher: Send + Sync {
    /// Hash `data` into a fixed-size digest
    ///
    /// # Errors
    /// Returns error if the engine is not ready to hash
    fn hash(&self, data: &[u8]) -> Result<Digest, HashError>;
}
