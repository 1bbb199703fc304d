//! Price feeds.
//!
//! Records quote prices pulled once per interval from a [`PriceSource`].
//! Live exchange APIs sit behind the same trait; this module ships a static
//! table and a jitter wrapper used on test networks.

use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::config::{Config, ConfigError, KEY_RANDOMIZE};
use crate::types::{AssetPrices, DEFAULT_ASSETS, EXEMPT_ASSET};

/// Price feed errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PriceError {
    /// The feed could not be reached
    #[error("price feed unavailable: {0}")]
    Unavailable(String),
    /// The feed answered without a required asset
    #[error("price feed has no quote for {0}")]
    MissingAsset(String),
    /// Jitter percentage outside 0..100
    #[error("invalid jitter percent {0}")]
    InvalidJitter(f64),
    /// Jitter setting present but unreadable
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Source of one snapshot of asset prices
pub trait PriceSource: Send + Sync {
    /// Pull current prices
    ///
    /// # Errors
    /// Returns error if the feed fails
    fn pull(&self) -> Result<AssetPrices, PriceError>;
}

/// A static price table
#[derive(Clone, Debug, Default)]
pub struct FixedPrices {
    prices: AssetPrices,
}

impl FixedPrices {
    /// Serve exactly `prices`
    #[must_use]
    pub fn new(prices: AssetPrices) -> Self {
        Self { prices }
    }

    /// Every default asset at a non-zero placeholder, PNT unquoted
    #[must_use]
    pub fn with_defaults() -> Self {
        let prices = DEFAULT_ASSETS
            .iter()
            .enumerate()
            .map(|(i, code)| {
                let value = if *code == EXEMPT_ASSET {
                    0.0
                } else {
                    1.0 + i as f64 / 10.0
                };
                ((*code).to_string(), value)
            })
            .collect();
        Self { prices }
    }

    /// Set one price
    #[must_use]
    pub fn with_price(mut self, code: impl Into<String>, value: f64) -> Self {
        self.prices.insert(code.into(), value);
        self
    }
}

impl PriceSource for FixedPrices {
    fn pull(&self) -> Result<AssetPrices, PriceError> {
        Ok(self.prices.clone())
    }
}

/// Adds a random factor of ± `percent` to every price of the inner source
#[derive(Clone, Debug)]
pub struct Randomized<S> {
    inner: S,
    percent: f64,
}

impl<S: PriceSource> Randomized<S> {
    /// Wrap `inner`
    ///
    /// # Errors
    /// Returns error if `percent` is negative, not finite, or 100 or more
    pub fn new(inner: S, percent: f64) -> Result<Self, PriceError> {
        if !percent.is_finite() || !(0.0..100.0).contains(&percent) {
            return Err(PriceError::InvalidJitter(percent));
        }
        Ok(Self { inner, percent })
    }

    /// Wrap `inner` with the `Debug.Randomize` percentage, or 0 when unset
    ///
    /// # Errors
    /// Returns error if the configured percentage is malformed or out of range
    pub fn from_config(inner: S, config: &Config) -> Result<Self, PriceError> {
        let percent = match config.float(KEY_RANDOMIZE) {
            Ok(percent) => percent,
            Err(ConfigError::MissingKey(_)) => 0.0,
            Err(e) => return Err(e.into()),
        };
        Self::new(inner, percent)
    }

    /// Configured jitter
    #[must_use]
    pub const fn percent(&self) -> f64 {
        self.percent
    }
}

impl<S: PriceSource> PriceSource for Randomized<S> {
    fn pull(&self) -> Result<AssetPrices, PriceError> {
        let mut prices = self.inner.pull()?;
        if self.percent == 0.0 {
            return Ok(prices);
        }

        let span = self.percent / 100.0;
        let mut rng = rand::thread_rng();
        for value in prices.values_mut() {
            *value *= 1.0 + rng.gen_range(-span..=span);
        }
        debug!(assets = prices.len(), percent = self.percent, "Randomized prices");
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_defaults() {
        let prices = FixedPrices::with_defaults().pull().unwrap();
        assert_eq!(prices.len(), DEFAULT_ASSETS.len());
        assert_eq!(prices[EXEMPT_ASSET], 0.0);
        assert!(prices
            .iter()
            .filter(|(k, _)| *k != EXEMPT_ASSET)
            .all(|(_, v)| *v > 0.0));
    }

    #[test]
    fn test_jitter_bounds() {
        let source = FixedPrices::default().with_price("USD", 100.0);
        let randomized = Randomized::new(source, 3.0).unwrap();
        for _ in 0..200 {
            let usd = randomized.pull().unwrap()["USD"];
            assert!((97.0..=103.0).contains(&usd), "{usd}");
        }
    }

    #[test]
    fn test_jitter_keeps_zero() {
        let randomized = Randomized::new(FixedPrices::with_defaults(), 5.0).unwrap();
        assert_eq!(randomized.pull().unwrap()[EXEMPT_ASSET], 0.0);
    }

    #[test]
    fn test_invalid_jitter() {
        assert!(Randomized::new(FixedPrices::default(), -1.0).is_err());
        assert!(Randomized::new(FixedPrices::default(), 100.0).is_err());
        assert!(Randomized::new(FixedPrices::default(), f64::NAN).is_err());
    }

    #[test]
    fn test_from_config() {
        let randomized = Randomized::from_config(FixedPrices::default(), &Config::unit_test()).unwrap();
        assert!((randomized.percent() - 0.1).abs() < f64::EPSILON);

        let randomized = Randomized::from_config(FixedPrices::default(), &Config::new()).unwrap();
        assert_eq!(randomized.percent(), 0.0);
    }

    #[test]
    fn test_from_config_rejects_malformed_percent() {
        let config = Config::unit_test().with(KEY_RANDOMIZE, "lots");
        assert!(matches!(
            Randomized::from_config(FixedPrices::default(), &config),
            Err(PriceError::Config(ConfigError::InvalidValue { .. }))
        ));

        let config = Config::unit_test().with(KEY_RANDOMIZE, "150");
        assert!(matches!(
            Randomized::from_config(FixedPrices::default(), &config),
            Err(PriceError::InvalidJitter(_))
        ));
    }
}
