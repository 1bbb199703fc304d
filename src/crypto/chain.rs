//! Chain identity derivation.
//!
//! Every record names the chain it belongs to. The identity is derived from
//! the protocol name, the network name and a fixed tag, so all participants of
//! one deployment compute the same value without talking to each other.

use std::sync::OnceLock;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Tag mixed into every OPR chain identity
pub const OPR_CHAIN_TAG: &str = "OraclePriceRecords";

/// Chain identity errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The cache already holds the identity of another deployment
    #[error("chain identity already bound to {bound_protocol}/{bound_network}, asked for {protocol}/{network}")]
    DeploymentMismatch {
        /// Protocol the cache was bound to
        bound_protocol: String,
        /// Network the cache was bound to
        bound_network: String,
        /// Protocol requested
        protocol: String,
        /// Network requested
        network: String,
    },
    /// Not a base58-encoded 32-byte chain id
    #[error("malformed chain identity: {0}")]
    Malformed(String),
}

/// SHA-256 of arbitrary data
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Derive a chain id from its name parts: `SHA256(SHA256(p0) || SHA256(p1) || ...)`
#[must_use]
pub fn chain_id_from_strings(parts: &[&str]) -> [u8; 32] {
    let mut outer = Sha256::new();
    for part in parts {
        outer.update(sha256(part.as_bytes()));
    }
    outer.finalize().into()
}

/// Base58 text form of a chain id
#[must_use]
pub fn encode_chain_identity(chain_id: &[u8; 32]) -> String {
    bs58::encode(chain_id).into_string()
}

/// Parse the base58 text form back into raw bytes
///
/// # Errors
/// Returns error if the text is not base58 or does not hold 32 bytes
pub fn decode_chain_identity(text: &str) -> Result<[u8; 32], ChainError> {
    let bytes = bs58::decode(text)
        .into_vec()
        .map_err(|e| ChainError::Malformed(e.to_string()))?;

    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| ChainError::Malformed(format!("expected 32 bytes, got {}", bytes.len())))
}

#[derive(Debug)]
struct Bound {
    protocol: String,
    network: String,
    identity: String,
}

/// Init-once cache of the deployment's OPR chain identity.
///
/// The first caller binds the cache to its (protocol, network) pair; the
/// derivation runs exactly once even under concurrent first use. Asking for a
/// different pair afterwards is an error rather than a silent re-derivation.
#[derive(Debug, Default)]
pub struct ChainIdentity {
    bound: OnceLock<Bound>,
}

impl ChainIdentity {
    /// Create an empty cache
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bound: OnceLock::new(),
        }
    }

    /// Derive the identity without caching
    #[must_use]
    pub fn derive(protocol: &str, network: &str) -> String {
        encode_chain_identity(&chain_id_from_strings(&[protocol, network, OPR_CHAIN_TAG]))
    }

    /// The cached identity, deriving it on first use
    ///
    /// # Errors
    /// Returns error if the cache is bound to another deployment
    pub fn get_or_derive(&self, protocol: &str, network: &str) -> Result<&str, ChainError> {
        let bound = self.bound.get_or_init(|| Bound {
            protocol: protocol.to_string(),
            network: network.to_string(),
            identity: Self::derive(protocol, network),
        });

        if bound.protocol != protocol || bound.network != network {
            return Err(ChainError::DeploymentMismatch {
                bound_protocol: bound.protocol.clone(),
                bound_network: bound.network.clone(),
                protocol: protocol.to_string(),
                network: network.to_string(),
            });
        }
        Ok(&bound.identity)
    }

    /// The cached identity, if derived
    #[must_use]
    pub fn get(&self) -> Option<&str> {
        self.bound.get().map(|b| b.identity.as_str())
    }
}
