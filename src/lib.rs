//! # OPR Miner
//!
//! Mining client for Oracle Price Records.
//!
//! ## Architecture
//!
//! Each interval every local miner slot builds a record quoting the current
//! asset prices, fixes its hash, and searches nonces for the highest
//! difficulty until the interval ends:
//! - **Hash engine**: one-time table generation, then pure lookup-XOR hashing
//! - **Validator**: chain identity, payout address and asset rules
//! - **Miner**: cancellable proof-of-work search
//! - **Grader**: ranks an interval's records into the next winner slate
//! - **Network**: framed messages between a coordinator and its miners
//!
//! ## Failure Model
//!
//! - Bad records are ineligible, not errors
//! - A broken connection ends only that connection
//! - Price or config failures skip one interval
//! - Hash engine failures stop mining

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod grading;
pub mod mining;
pub mod network;
pub mod oracle;
pub mod types;
pub mod validator;

pub use config::{Config, ConfigError};
pub use coordinator::{CoordinatorError, CoordinatorHandler, IntervalSummary, MiningCoordinator};
pub use crypto::{ChainIdentity, HashEngine, HashError, LxrParams, PowHasher};
pub use grading::{grade, GradingError, GradingRound};
pub use mining::{cancel_pair, compute_difficulty, Miner, MiningError, MiningStats};
pub use network::{Client, CoordinatorEvent, Message, NetworkError, Server};
pub use oracle::{FixedPrices, PriceSource, Randomized};
pub use types::{Entry, EntrySink, OraclePriceRecord, Slate};
pub use validator::{ValidationError, Validator};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
