//! Read-only key/value configuration.
//!
//! Keys are `Section.Key` strings (`Miner.Protocol`, `Debug.Randomize`, ...).
//! Values are stored as text and parsed by the typed accessors, which fail
//! with [`ConfigError::MissingKey`] when a key is absent.

use std::collections::HashMap;
use std::env;

use thiserror::Error;
use tracing::debug;

use crate::crypto::address::{self, RAW_LEN, TESTNET_PREFIX};

/// Protocol name key
pub const KEY_PROTOCOL: &str = "Miner.Protocol";
/// Network name key
pub const KEY_NETWORK: &str = "Miner.Network";
/// Number of concurrent mining slots
pub const KEY_NUMBER_OF_MINERS: &str = "Miner.NumberOfMiners";
/// Top records submitted to the ledger per interval
pub const KEY_RECORDS_PER_BLOCK: &str = "Miner.RecordsPerBlock";
/// Payout address
pub const KEY_COINBASE_ADDRESS: &str = "Miner.CoinbasePNTAddress";
/// Comma-separated digital identity fields
pub const KEY_IDENTITY_CHAIN: &str = "Miner.IdentityChain";
/// Optional override of the required asset list
pub const KEY_ASSETS: &str = "Miner.Assets";
/// Optional override of the expected payout address prefix
pub const KEY_ADDRESS_PREFIX: &str = "Miner.AddressPrefix";
/// Price jitter in percent, for test networks
pub const KEY_RANDOMIZE: &str = "Debug.Randomize";
/// Coordinator listen address
pub const KEY_LISTEN: &str = "Network.Listen";
/// Address miners dial to reach the coordinator
pub const KEY_COORDINATOR: &str = "Network.Coordinator";
/// Seconds between intervals announced by the coordinator
pub const KEY_INTERVAL_SECONDS: &str = "Network.IntervalSeconds";

/// Every key the miner reads; each can be set from the environment
pub const KNOWN_KEYS: [&str; 12] = [
    KEY_PROTOCOL,
    KEY_NETWORK,
    KEY_NUMBER_OF_MINERS,
    KEY_RECORDS_PER_BLOCK,
    KEY_COINBASE_ADDRESS,
    KEY_IDENTITY_CHAIN,
    KEY_ASSETS,
    KEY_ADDRESS_PREFIX,
    KEY_RANDOMIZE,
    KEY_LISTEN,
    KEY_COORDINATOR,
    KEY_INTERVAL_SECONDS,
];

/// Payout payload used by the built-in test configuration
pub const TEST_ADDRESS_RAW: [u8; RAW_LEN] = [0x5a; RAW_LEN];

const UNIT_TEST_INI: &str = r"
[Debug]
# Randomize adds a random factor +/- the given percent.  3.1 for 3.1%
  Randomize=0.1
  Logging=true

[Miner]
  NetworkType=LOCAL
  NumberOfMiners=15
# The top N records are submitted per block
  RecordsPerBlock=10
  Protocol=PegNet
  Network=TestNet
  IdentityChain=prototype

[Network]
  Listen=127.0.0.1:5151
  Coordinator=127.0.0.1:5151
  IntervalSeconds=60
";

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Key not present
    #[error("config has no {0} specified")]
    MissingKey(String),
    /// Value present but not of the requested type
    #[error("config value for {key} is invalid: {reason}")]
    InvalidValue {
        /// The offending key
        key: String,
        /// Why it failed to parse
        reason: String,
    },
    /// Malformed configuration text
    #[error("config parse error on line {line}: {reason}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// What was wrong
        reason: String,
    },
}

/// Result type for config lookups
pub type ConfigResult<T> = Result<T, ConfigError>;

/// String-keyed configuration source
#[derive(Clone, Debug, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    /// Create an empty config
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit key/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse INI text: `[Section]` headers, `Key=Value` lines, `#`/`;` comments.
    ///
    /// # Errors
    /// Returns error on a key outside any section or a line that is neither
    /// a header, a comment nor an assignment
    pub fn from_ini_str(text: &str) -> ConfigResult<Self> {
        let mut values = HashMap::new();
        let mut section: Option<String> = None;

        for (n, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ConfigError::Parse {
                        line: n + 1,
                        reason: "empty section name".to_string(),
                    });
                }
                section = Some(name.to_string());
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Parse {
                line: n + 1,
                reason: format!("expected Key=Value, got {line:?}"),
            })?;
            let section = section.as_deref().ok_or_else(|| ConfigError::Parse {
                line: n + 1,
                reason: "key outside of any section".to_string(),
            })?;

            values.insert(format!("{section}.{}", key.trim()), value.trim().to_string());
        }

        Ok(Self { values })
    }

    /// The built-in configuration used by tests and local networks
    #[must_use]
    pub fn unit_test() -> Self {
        // The embedded text is a constant; a parse failure is a programming error caught by tests.
        let config = Self::from_ini_str(UNIT_TEST_INI).unwrap_or_default();
        config.with(
            KEY_COINBASE_ADDRESS,
            address::encode(TESTNET_PREFIX, &TEST_ADDRESS_RAW),
        )
    }

    /// Return a copy with `key` set to `value`
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Return a copy without `key`
    #[must_use]
    pub fn without(mut self, key: &str) -> Self {
        self.values.remove(key);
        self
    }

    /// Override keys from the environment.
    ///
    /// `Miner.Protocol` is set by `<PREFIX>_MINER_PROTOCOL`, and so on. Every
    /// key already present and every one of [`KNOWN_KEYS`] is looked up, so
    /// optional keys can be supplied from the environment alone.
    #[must_use]
    pub fn with_env_overrides(mut self, prefix: &str) -> Self {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        for key in KNOWN_KEYS {
            if !self.values.contains_key(key) {
                keys.push(key.to_string());
            }
        }

        for key in keys {
            let var = format!("{prefix}_{}", key.replace('.', "_")).to_uppercase();
            if let Ok(v) = env::var(&var) {
                debug!(key = %key, var = %var, "Config override from environment");
                self.values.insert(key, v.trim().to_string());
            }
        }
        self
    }

    /// Whether `key` is present
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// String value
    ///
    /// # Errors
    /// Returns error if the key is absent
    pub fn string(&self, key: &str) -> ConfigResult<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    /// Integer value
    ///
    /// # Errors
    /// Returns error if the key is absent or not an integer
    pub fn int(&self, key: &str) -> ConfigResult<i64> {
        self.parse(key)
    }

    /// Float value
    ///
    /// # Errors
    /// Returns error if the key is absent or not a number
    pub fn float(&self, key: &str) -> ConfigResult<f64> {
        self.parse(key)
    }

    /// Boolean value (`true`/`false`, `1`/`0`, `yes`/`no`)
    ///
    /// # Errors
    /// Returns error if the key is absent or not a boolean
    pub fn bool(&self, key: &str) -> ConfigResult<bool> {
        let raw = self.string(key)?;
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("{raw:?} is not a boolean"),
            }),
        }
    }

    /// Comma-separated list; empty items are dropped
    ///
    /// # Errors
    /// Returns error if the key is absent
    pub fn list(&self, key: &str) -> ConfigResult<Vec<String>> {
        Ok(self
            .string(key)?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn parse<T>(&self, key: &str) -> ConfigResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.string(key)?;
        raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}
