//! Prefixed payout addresses.
//!
//! Text form is `<prefix>_<base58(raw || checksum)>` where `raw` is a 32-byte
//! RCD hash and `checksum` is the first four bytes of
//! `SHA256(SHA256(prefix || "_" || raw))`. The prefix names the network the
//! address is valid on (`PNT` on main net, `tPNT` on test networks).

use thiserror::Error;

use super::sha256;

/// Raw address payload length
pub const RAW_LEN: usize = 32;

const CHECKSUM_LEN: usize = 4;

/// Main network prefix
pub const MAINNET_PREFIX: &str = "PNT";

/// Test network prefix
pub const TESTNET_PREFIX: &str = "tPNT";

/// Address decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// No `_` separator, or an empty part
    #[error("address is not of the form <prefix>_<body>")]
    MissingSeparator,
    /// Prefix contains characters other than ASCII letters and digits
    #[error("invalid address prefix: {0}")]
    InvalidPrefix(String),
    /// Body is not base58
    #[error("invalid base58 body: {0}")]
    InvalidEncoding(String),
    /// Body decodes to the wrong number of bytes
    #[error("address body must be {expected} bytes, got {got}")]
    InvalidLength {
        /// Expected byte count
        expected: usize,
        /// Actual byte count
        got: usize,
    },
    /// Checksum does not match
    #[error("address checksum mismatch")]
    ChecksumMismatch,
}

/// A decoded address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PegAddress {
    /// Network prefix
    pub prefix: String,
    /// Raw payload
    pub raw: [u8; RAW_LEN],
}

fn checksum(prefix: &str, raw: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut data = Vec::with_capacity(prefix.len() + 1 + raw.len());
    data.extend_from_slice(prefix.as_bytes());
    data.push(b'_');
    data.extend_from_slice(raw);

    let digest = sha256(&sha256(&data));
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

fn valid_prefix(prefix: &str) -> bool {
    !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Encode a raw payload under `prefix`
#[must_use]
pub fn encode(prefix: &str, raw: &[u8; RAW_LEN]) -> String {
    let mut body = Vec::with_capacity(RAW_LEN + CHECKSUM_LEN);
    body.extend_from_slice(raw);
    body.extend_from_slice(&checksum(prefix, raw));
    format!("{prefix}_{}", bs58::encode(body).into_string())
}

/// Decode an address, verifying its checksum
///
/// # Errors
/// Returns error if the text is malformed or the checksum is wrong
pub fn decode(text: &str) -> Result<PegAddress, AddressError> {
    let (prefix, body) = text.split_once('_').ok_or(AddressError::MissingSeparator)?;
    if body.is_empty() {
        return Err(AddressError::MissingSeparator);
    }
    if !valid_prefix(prefix) {
        return Err(AddressError::InvalidPrefix(prefix.to_string()));
    }

    let bytes = bs58::decode(body)
        .into_vec()
        .map_err(|e| AddressError::InvalidEncoding(e.to_string()))?;
    if bytes.len() != RAW_LEN + CHECKSUM_LEN {
        return Err(AddressError::InvalidLength {
            expected: RAW_LEN + CHECKSUM_LEN,
            got: bytes.len(),
        });
    }

    let (raw_bytes, check) = bytes.split_at(RAW_LEN);
    if checksum(prefix, raw_bytes).as_slice() != check {
        return Err(AddressError::ChecksumMismatch);
    }

    let mut raw = [0u8; RAW_LEN];
    raw.copy_from_slice(raw_bytes);
    Ok(PegAddress {
        prefix: prefix.to_string(),
        raw,
    })
}

/// Deterministic per-miner test address, so local miners are told apart in payouts
#[must_use]
pub fn test_address_for_miner(miner_number: u32) -> String {
    let raw = sha256(format!("opr test miner {miner_number}").as_bytes());
    encode(TESTNET_PREFIX, &raw)
}
