//! # Meridian Zone I/O
//!
//! Zone content moves in and out of the catalog in two formats: the
//! native JSON shape (round-trippable) and BIND zone-file text. Both
//! formats share the same import semantics: `replace` wipes the zone
//! first, `upsert` touches only incoming (name, type) groups.

use meridian_store::{strip_timestamps, ImportMode, Store, StoreError, Zone};
use thiserror::Error;

pub mod bind;

pub use bind::{parse_bind, to_bind};

/// Zone I/O error.
#[derive(Error, Debug)]
pub enum ZoneIoError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("zone file line {line}: {message}")]
    BindParse {
        /// 1-based line number in the input.
        line: usize,
        /// What went wrong.
        message: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ZoneIoError {
    pub(crate) fn bind(line: usize, message: impl Into<String>) -> Self {
        Self::BindParse {
            line,
            message: message.into(),
        }
    }
}

/// Result type for zone I/O operations.
pub type Result<T> = std::result::Result<T, ZoneIoError>;

/// Imports a JSON zone payload into `zone`.
///
/// Timestamps the payload may carry from a previous export are stripped
/// before decoding; record and RRSet ids are discarded by the import.
pub async fn import_json(
    store: &Store,
    zone: &Zone,
    payload: serde_json::Value,
    mode: ImportMode,
    default_ttl: u32,
) -> Result<()> {
    let cleaned = strip_timestamps(payload);
    let incoming: Zone = serde_json::from_value(cleaned)?;
    store
        .import_rrsets(zone, incoming.rrsets, mode, default_ttl)
        .await?;
    Ok(())
}

/// Imports BIND zone-file text into `zone`.
pub async fn import_bind(
    store: &Store,
    zone: &Zone,
    text: &str,
    mode: ImportMode,
    default_ttl: u32,
) -> Result<()> {
    let sets = parse_bind(&zone.name, text, default_ttl)?;
    store.import_rrsets(zone, sets, mode, default_ttl).await?;
    Ok(())
}
