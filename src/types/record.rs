//! The Oracle Price Record.
//!
//! A record is one miner's candidate for an interval. Its JSON body (chain,
//! height, previous winners, payout address, identity, assets) is hashed once
//! into the record hash; mining then varies only a nonce appended to that hash.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{AssetList, AssetPrices, Entry, EntryError, Slate, Token};
use crate::config::{
    Config, ConfigError, KEY_COINBASE_ADDRESS, KEY_IDENTITY_CHAIN, KEY_NETWORK, KEY_PROTOCOL,
};
use crate::crypto::{
    address, decode_chain_identity, ChainError, ChainIdentity, Digest, HashError, PowHasher,
};
use crate::oracle::PriceError;

/// Network name on which each local miner gets its own payout address
const TEST_NETWORK: &str = "TestNet";

/// Record construction errors
#[derive(Debug, Error)]
pub enum RecordError {
    /// Missing or malformed configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Chain identity could not be derived or parsed
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Price feed failed for this interval
    #[error("price feed failed: {0}")]
    Price(#[from] PriceError),
    /// Hash engine failure while fingerprinting the body
    #[error("hash engine failed: {0}")]
    Hash(#[from] HashError),
    /// The JSON body could not be produced
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The ledger entry could not be encoded
    #[error(transparent)]
    Entry(#[from] EntryError),
    /// The record hash is already fixed
    #[error("record hash already computed")]
    AlreadySealed,
}

/// Oracle Price Record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OraclePriceRecord {
    /// Base58 chain identity of the deployment
    #[serde(rename = "oprchainid")]
    pub chain_identity: String,
    /// Directory block height of the interval
    #[serde(rename = "dbht")]
    pub block_height: i32,
    /// Short ids of the previous interval's winners
    #[serde(rename = "winners")]
    pub previous_winners: Slate,
    /// Address paid if this record wins
    #[serde(rename = "coinbase")]
    pub payout_address: String,
    /// Identity of the operator and miner instance
    #[serde(rename = "FactomDigitalID")]
    pub digital_identity: Vec<String>,
    /// Quoted prices
    pub assets: AssetList,

    /// Best proof-of-work found so far
    #[serde(skip)]
    pub difficulty: u64,
    /// Score assigned during grading
    #[serde(skip)]
    pub grade: f64,
    #[serde(skip)]
    record_hash: Option<Digest>,
    #[serde(skip)]
    sealed_body: Option<Vec<u8>>,
    #[serde(skip)]
    nonce: Vec<u8>,
}

impl OraclePriceRecord {
    /// Create an unsealed record
    #[must_use]
    pub fn new(
        chain_identity: String,
        block_height: i32,
        previous_winners: Slate,
        payout_address: String,
        digital_identity: Vec<String>,
        assets: AssetList,
    ) -> Self {
        Self {
            chain_identity,
            block_height,
            previous_winners,
            payout_address,
            digital_identity,
            assets,
            difficulty: 0,
            grade: 0.0,
            record_hash: None,
            sealed_body: None,
            nonce: Vec::new(),
        }
    }

    /// Assemble the record for one mining slot from configuration, the
    /// previous slate and this interval's prices.
    ///
    /// Slot 0 uses the configured identity as is; other slots append
    /// `minerNNN`. On the test network each slot > 0 is paid to its own
    /// derived test address.
    ///
    /// # Errors
    /// Returns error if a required config key is missing or the chain identity
    /// cache belongs to another deployment
    pub fn assemble(
        miner_number: u32,
        block_height: i32,
        config: &Config,
        chain: &ChainIdentity,
        previous_winners: &Slate,
        prices: AssetPrices,
    ) -> Result<Self, RecordError> {
        let mut identity = config.list(KEY_IDENTITY_CHAIN)?;
        if identity.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: KEY_IDENTITY_CHAIN.to_string(),
                reason: "identity must have at least one field".to_string(),
            }
            .into());
        }
        if miner_number > 0 {
            identity.push(format!("miner{miner_number:03}"));
        }

        let protocol = config.string(KEY_PROTOCOL)?;
        let network = config.string(KEY_NETWORK)?;
        let chain_identity = chain.get_or_derive(protocol, network)?.to_string();

        let payout_address = if network == TEST_NETWORK && miner_number != 0 {
            address::test_address_for_miner(miner_number)
        } else {
            config.string(KEY_COINBASE_ADDRESS)?.to_string()
        };

        Ok(Self::new(
            chain_identity,
            block_height,
            previous_winners.clone(),
            payout_address,
            identity,
            prices.into(),
        ))
    }

    /// Canonical JSON body (nonce, difficulty and grade excluded)
    ///
    /// # Errors
    /// Returns error if JSON encoding fails
    pub fn body(&self) -> Result<Vec<u8>, RecordError> {
        serde_json::to_vec(self).map_err(|e| RecordError::Serialization(e.to_string()))
    }

    /// Compute and fix the record hash. Must happen once, before mining.
    ///
    /// The hashed body bytes are kept; the ledger entry carries exactly
    /// those bytes even if fields change afterwards.
    ///
    /// # Errors
    /// Returns error if already sealed or the hash engine fails
    pub fn seal(&mut self, hasher: &dyn PowHasher) -> Result<Digest, RecordError> {
        if self.record_hash.is_some() {
            return Err(RecordError::AlreadySealed);
        }
        let body = self.body()?;
        let digest = hasher.hash(&body)?;
        self.record_hash = Some(digest);
        self.sealed_body = Some(body);
        Ok(digest)
    }

    /// Body bytes the record hash was computed from, once sealed
    #[must_use]
    pub fn sealed_body(&self) -> Option<&[u8]> {
        self.sealed_body.as_deref()
    }

    /// The fixed record hash, once sealed
    #[must_use]
    pub const fn record_hash(&self) -> Option<&Digest> {
        self.record_hash.as_ref()
    }

    /// Whether the record hash has been computed
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.record_hash.is_some()
    }

    /// Best nonce found so far
    #[must_use]
    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    /// Store a strictly better proof-of-work. Difficulty and nonce change together.
    pub(crate) fn record_best(&mut self, difficulty: u64, nonce: &[u8]) {
        self.difficulty = difficulty;
        self.nonce.clear();
        self.nonce.extend_from_slice(nonce);
    }

    /// Ledger entry: JSON body as content, best nonce in the only ext-id slot.
    /// A sealed record uses the body bytes that were hashed.
    ///
    /// # Errors
    /// Returns error if the chain identity is malformed or encoding fails
    pub fn to_entry(&self) -> Result<Entry, RecordError> {
        let content = match &self.sealed_body {
            Some(body) => body.clone(),
            None => self.body()?,
        };
        Ok(Entry {
            chain_id: decode_chain_identity(&self.chain_identity)?,
            ext_ids: vec![self.nonce.clone()],
            content,
        })
    }

    /// Short id naming this record in the next interval's slate
    ///
    /// # Errors
    /// Returns error if the entry cannot be built
    pub fn short_id(&self) -> Result<String, RecordError> {
        Ok(self.to_entry()?.short_id()?)
    }

    /// Digital identity joined with `-`
    #[must_use]
    pub fn did(&self) -> String {
        self.digital_identity.join("-")
    }

    /// Asset values as tokens
    #[must_use]
    pub fn tokens(&self) -> Vec<Token> {
        self.assets.tokens()
    }

    /// Hex of the record hash, or empty when unsealed
    #[must_use]
    pub fn hash_hex(&self) -> String {
        self.record_hash.map(hex::encode).unwrap_or_default()
    }

    /// One-line summary for logs
    #[must_use]
    pub fn short_string(&self) -> String {
        format!(
            "DID {:>30} OPRHash {:.30} Nonce {:>16} Difficulty {:>16x} Grade {:>20.6}",
            self.did(),
            self.hash_hex(),
            hex::encode(&self.nonce),
            self.difficulty,
            self.grade
        )
    }

    #[cfg(test)]
    pub(crate) fn with_record_hash(mut self, digest: Digest) -> Self {
        self.record_hash = Some(digest);
        self
    }
}

impl fmt::Display for OraclePriceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Nonce {}", hex::encode(&self.nonce))?;
        writeln!(f, "{:>32} {}", "OPRChainID", self.chain_identity)?;
        writeln!(f, "{:>32} {}", "Difficulty", self.difficulty)?;
        writeln!(f, "{:>32} {}", "Directory Block Height", self.block_height)?;
        writeln!(f, "{:>32}", "WinningPreviousOPRs")?;
        write!(f, "{}", self.previous_winners)?;
        writeln!(f, "{:>32} {}", "Coinbase PNT", self.payout_address)?;
        writeln!(f, "{:>32} {}", "FactomDigitalID", self.did())?;
        for token in self.tokens() {
            writeln!(f, "{:>32} {}", "PNT", token)?;
        }
        Ok(())
    }
}
