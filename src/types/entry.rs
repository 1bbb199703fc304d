//! Ledger entries handed to the submission collaborator.

use std::num::TryFromIntError;
use std::sync::Mutex;

use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

/// Entry format version
const ENTRY_VERSION: u8 = 0;

/// Bytes of the entry hash used as a record's short identifier
pub const SHORT_ID_LEN: usize = 8;

/// Entry encoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntryError {
    /// External ids, with their length prefixes, exceed a u16 section size
    #[error("external id section of {0} bytes exceeds {max} bytes", max = u16::MAX)]
    ExtIdsTooLarge(usize),
}

/// A record body plus its winning nonce, as written to the ledger
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Target chain
    pub chain_id: [u8; 32],
    /// External ids; slot 0 holds the nonce
    pub ext_ids: Vec<Vec<u8>>,
    /// The record's canonical JSON body
    pub content: Vec<u8>,
}

impl Entry {
    /// Binary form: version, chain id, u16 BE ext-id section size, each ext id as
    /// u16 BE length + bytes, then the content
    ///
    /// # Errors
    /// Returns error if an ext id or the ext-id section does not fit a u16 length
    pub fn marshal(&self) -> Result<Vec<u8>, EntryError> {
        let ext_size: usize = self.ext_ids.iter().map(|x| 2 + x.len()).sum();
        let too_large = |_: TryFromIntError| EntryError::ExtIdsTooLarge(ext_size);
        let section = u16::try_from(ext_size).map_err(too_large)?;

        let mut data = Vec::with_capacity(1 + 32 + 2 + ext_size + self.content.len());
        data.push(ENTRY_VERSION);
        data.extend_from_slice(&self.chain_id);
        data.extend_from_slice(&section.to_be_bytes());
        for ext in &self.ext_ids {
            let len = u16::try_from(ext.len()).map_err(too_large)?;
            data.extend_from_slice(&len.to_be_bytes());
            data.extend_from_slice(ext);
        }
        data.extend_from_slice(&self.content);
        Ok(data)
    }

    /// `SHA256(SHA512(marshal) || marshal)`
    ///
    /// # Errors
    /// Returns error if the entry cannot be marshalled
    pub fn hash(&self) -> Result<[u8; 32], EntryError> {
        let data = self.marshal()?;
        let inner = Sha512::digest(&data);

        let mut outer = Sha256::new();
        outer.update(inner);
        outer.update(&data);
        Ok(outer.finalize().into())
    }

    /// Hex of the first eight bytes of the entry hash
    ///
    /// # Errors
    /// Returns error if the entry cannot be marshalled
    pub fn short_id(&self) -> Result<String, EntryError> {
        Ok(hex::encode(&self.hash()?[..SHORT_ID_LEN]))
    }
}

/// Where finished records go
pub trait EntrySink: Send + Sync {
    /// Submit one entry
    ///
    /// # Errors
    /// Returns error if the ledger rejects or cannot be reached
    fn submit(&self, entry: &Entry) -> anyhow::Result<()>;
}

/// Keeps submitted entries in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    entries: Mutex<Vec<Entry>>,
}

impl CollectingSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything submitted so far
    #[must_use]
    pub fn entries(&self) -> Vec<Entry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl EntrySink for CollectingSink {
    fn submit(&self, entry: &Entry) -> anyhow::Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("entry sink lock poisoned"))?
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(nonce: &[u8]) -> Entry {
        Entry {
            chain_id: [1u8; 32],
            ext_ids: vec![nonce.to_vec()],
            content: b"{\"dbht\":1}".to_vec(),
        }
    }

    #[test]
    fn test_marshal_layout() {
        let data = entry(&[0xab, 0xcd]).marshal().unwrap();
        assert_eq!(data[0], ENTRY_VERSION);
        assert_eq!(&data[1..33], &[1u8; 32]);
        assert_eq!(&data[33..35], &[0, 4]);
        assert_eq!(&data[35..37], &[0, 2]);
        assert_eq!(&data[37..39], &[0xab, 0xcd]);
        assert_eq!(&data[39..], b"{\"dbht\":1}");
    }

    #[test]
    fn test_hash_covers_nonce() {
        assert_eq!(entry(&[1]).hash().unwrap(), entry(&[1]).hash().unwrap());
        assert_ne!(entry(&[1]).hash().unwrap(), entry(&[2]).hash().unwrap());
        assert_eq!(entry(&[1]).short_id().unwrap().len(), SHORT_ID_LEN * 2);
    }

    #[test]
    fn test_oversized_ext_ids_rejected() {
        let largest = usize::from(u16::MAX) - 2;
        assert!(entry(&vec![7; largest]).marshal().is_ok());

        assert_eq!(
            entry(&vec![7; largest + 1]).marshal(),
            Err(EntryError::ExtIdsTooLarge(largest + 3))
        );

        let mut split = entry(&[]);
        split.ext_ids = vec![vec![1; 40_000], vec![2; 40_000]];
        assert_eq!(split.hash(), Err(EntryError::ExtIdsTooLarge(80_004)));

        let mut big = entry(&[]);
        big.ext_ids = vec![vec![0; 70_000]];
        assert_eq!(big.short_id(), Err(EntryError::ExtIdsTooLarge(70_002)));
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        sink.submit(&entry(&[1])).unwrap();
        sink.submit(&entry(&[2])).unwrap();
        assert_eq!(sink.entries().len(), 2);
    }
}
