//! Structural validation of Oracle Price Records.
//!
//! Every participant must reach the same verdict on the same record, so the
//! checks depend only on the record, the configuration, and the chain
//! identity derived from it. Rules are applied in a fixed order and the first
//! failure wins.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::config::{Config, KEY_ADDRESS_PREFIX, KEY_NETWORK, KEY_PROTOCOL};
use crate::crypto::address::{self, AddressError, MAINNET_PREFIX, TESTNET_PREFIX};
use crate::crypto::{ChainError, ChainIdentity};
use crate::types::{required_assets, OraclePriceRecord, EXEMPT_ASSET};

/// Network name whose addresses carry [`MAINNET_PREFIX`]
pub const MAIN_NETWORK: &str = "MainNet";

/// Why a record was rejected
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Protocol or network name missing from config
    #[error("config has no {0} specified")]
    MissingConfig(String),
    /// Chain identity cache belongs to another deployment
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Record names another chain
    #[error("wrong chain identity: expected {expected}, got {got}")]
    WrongChain {
        /// Derived identity
        expected: String,
        /// Identity in the record
        got: String,
    },
    /// Payout address does not decode
    #[error("bad payout address: {0}")]
    BadAddress(#[from] AddressError),
    /// Payout address belongs to another network
    #[error("payout address prefix {got}, expected {expected}")]
    WrongPrefix {
        /// Prefix for this network
        expected: String,
        /// Prefix in the record
        got: String,
    },
    /// A non-exempt asset is quoted at zero
    #[error("asset {0} has a zero price")]
    ZeroPrice(String),
    /// A required asset is absent
    #[error("asset {0} is missing")]
    MissingAsset(String),
}

/// Payout prefix expected on `network`, unless `Miner.AddressPrefix` overrides it
#[must_use]
pub fn expected_address_prefix(config: &Config, network: &str) -> String {
    if let Ok(prefix) = config.string(KEY_ADDRESS_PREFIX) {
        return prefix.to_string();
    }
    if network == MAIN_NETWORK {
        MAINNET_PREFIX.to_string()
    } else {
        TESTNET_PREFIX.to_string()
    }
}

/// Record validator bound to one deployment's chain identity
#[derive(Clone, Debug, Default)]
pub struct Validator {
    identity: Arc<ChainIdentity>,
}

impl Validator {
    /// Create a validator with its own identity cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator sharing an existing identity cache
    #[must_use]
    pub fn with_identity(identity: Arc<ChainIdentity>) -> Self {
        Self { identity }
    }

    /// The identity cache
    #[must_use]
    pub fn chain_identity(&self) -> &Arc<ChainIdentity> {
        &self.identity
    }

    /// Check `record`, reporting the first rule it breaks
    ///
    /// # Errors
    /// Returns the failed rule
    pub fn check(&self, record: &OraclePriceRecord, config: &Config) -> Result<(), ValidationError> {
        let protocol = config
            .string(KEY_PROTOCOL)
            .map_err(|_| ValidationError::MissingConfig(KEY_PROTOCOL.to_string()))?;
        let network = config
            .string(KEY_NETWORK)
            .map_err(|_| ValidationError::MissingConfig(KEY_NETWORK.to_string()))?;

        let expected = self.identity.get_or_derive(protocol, network)?;
        if record.chain_identity != expected {
            return Err(ValidationError::WrongChain {
                expected: expected.to_string(),
                got: record.chain_identity.clone(),
            });
        }

        let payout = address::decode(&record.payout_address)?;
        let prefix = expected_address_prefix(config, network);
        if payout.prefix != prefix {
            return Err(ValidationError::WrongPrefix {
                expected: prefix,
                got: payout.prefix,
            });
        }

        if let Some(code) = record.assets.first_zero(EXEMPT_ASSET) {
            return Err(ValidationError::ZeroPrice(code.to_string()));
        }

        let required = required_assets(config);
        if let Some(code) = record.assets.first_missing(&required) {
            return Err(ValidationError::MissingAsset(code.to_string()));
        }

        Ok(())
    }

    /// Whether `record` passes every rule
    #[must_use]
    pub fn validate(&self, record: &OraclePriceRecord, config: &Config) -> bool {
        match self.check(record, config) {
            Ok(()) => true,
            Err(e) => {
                debug!(did = %record.did(), error = %e, "Record failed validation");
                false
            }
        }
    }
}
