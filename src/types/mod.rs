//! Core data types for OPR mining.

mod assets;
mod entry;
mod record;
mod slate;

pub use assets::{required_assets, AssetList, AssetPrices, Token, DEFAULT_ASSETS, EXEMPT_ASSET};
pub use entry::{CollectingSink, Entry, EntryError, EntrySink, SHORT_ID_LEN};
pub use record::{OraclePriceRecord, RecordError};
pub use slate::{Slate, SLATE_SIZE};

use chrono::Utc;

/// Unix timestamp in milliseconds
pub type Timestamp = i64;

/// Get current timestamp in milliseconds
#[must_use]
pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}
