//! Asset price lists carried by records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{Config, KEY_ASSETS};

/// Symbol → price, iterated in symbol order
pub type AssetPrices = BTreeMap<String, f64>;

/// Symbol allowed to carry a zero price (its own value is not yet quoted)
pub const EXEMPT_ASSET: &str = "PNT";

/// Assets every record must quote unless the deployment overrides the list
pub const DEFAULT_ASSETS: &[&str] = &[
    "PNT", "USD", "EUR", "JPY", "GBP", "CAD", "CHF", "INR", "SGD", "CNY", "HKD", "XAU", "XAG",
    "XPD", "XPT", "XBT", "ETH", "LTC", "XBC", "FCT",
];

/// The deployment's required asset set (`Miner.Assets`, or [`DEFAULT_ASSETS`])
#[must_use]
pub fn required_assets(config: &Config) -> Vec<String> {
    match config.list(KEY_ASSETS) {
        Ok(list) if !list.is_empty() => list,
        _ => DEFAULT_ASSETS.iter().map(|s| (*s).to_string()).collect(),
    }
}

/// A symbol/value pair
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    /// Asset symbol
    pub code: String,
    /// Quoted price
    pub value: f64,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>4} {:>16.8}", self.code, self.value)
    }
}

/// The asset section of a record.
///
/// Keys are unique and serialized in sorted order so the JSON body of a record
/// is canonical.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetList(AssetPrices);

impl AssetList {
    /// Empty list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a price, replacing any previous one
    pub fn insert(&mut self, code: impl Into<String>, value: f64) {
        self.0.insert(code.into(), value);
    }

    /// Price of `code`
    #[must_use]
    pub fn get(&self, code: &str) -> Option<f64> {
        self.0.get(code).copied()
    }

    /// Drop `code`
    pub fn remove(&mut self, code: &str) -> Option<f64> {
        self.0.remove(code)
    }

    /// Number of assets
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no asset is quoted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in symbol order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// First required symbol not present, if any
    #[must_use]
    pub fn first_missing<'a, S: AsRef<str>>(&self, required: &'a [S]) -> Option<&'a str> {
        required
            .iter()
            .map(|s| AsRef::<str>::as_ref(s))
            .find(|code| !self.0.contains_key(*code))
    }

    /// Whether every required symbol is present
    #[must_use]
    pub fn contains_all<S: AsRef<str>>(&self, required: &[S]) -> bool {
        self.first_missing(required).is_none()
    }

    /// First symbol with a zero price, ignoring `exempt`
    #[must_use]
    pub fn first_zero(&self, exempt: &str) -> Option<&str> {
        self.iter()
            .find(|(code, value)| *value == 0.0 && *code != exempt)
            .map(|(code, _)| code)
    }

    /// All entries as tokens
    #[must_use]
    pub fn tokens(&self) -> Vec<Token> {
        self.iter()
            .map(|(code, value)| Token {
                code: code.to_string(),
                value,
            })
            .collect()
    }
}

impl From<AssetPrices> for AssetList {
    fn from(prices: AssetPrices) -> Self {
        Self(prices)
    }
}
