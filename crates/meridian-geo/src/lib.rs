//! # Meridian GeoIP
//!
//! Client-location resolution and Geo-aware answer selection.
//!
//! The provider resolves a client IP to `{country, continent, ASN}` from
//! MaxMind-format databases; the selector is a pure function picking the
//! answer subset for a client. MMDB readers sit behind an atomic swap so
//! hot reloads never expose a half-open state.

use std::net::IpAddr;
use thiserror::Error;

pub mod mmdb;
pub mod selector;

pub use mmdb::MmdbProvider;
pub use selector::{select_geo_records, SelectionRule};

/// GeoIP error.
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MMDB error: {0}")]
    Mmdb(#[from] maxminddb::MaxMindDBError),

    #[error("no MMDB files found at {0}")]
    NoDatabases(String),

    #[error("download error: {0}")]
    Download(#[from] reqwest::Error),
}

/// Result type for GeoIP operations.
pub type Result<T> = std::result::Result<T, GeoError>;

/// Resolved client location. Empty strings and a zero ASN mean unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoInfo {
    /// ISO-3166 alpha-2 country code, uppercase.
    pub country: String,
    /// Two-letter continent code, uppercase.
    pub continent: String,
    /// Autonomous system number, 0 when unknown.
    pub asn: u32,
}

/// Client IP to location resolution.
pub trait Provider: Send + Sync {
    /// Resolves an IP. `None` or an unknown IP yields an empty `GeoInfo`.
    fn lookup(&self, ip: Option<IpAddr>) -> GeoInfo;
}

/// Provider used when GeoDNS is disabled: everything is unknown.
#[derive(Debug, Default)]
pub struct NoopProvider;

impl Provider for NoopProvider {
    fn lookup(&self, _ip: Option<IpAddr>) -> GeoInfo {
        GeoInfo::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_provider() {
        let provider = NoopProvider;
        let info = provider.lookup(Some("8.8.8.8".parse().unwrap()));
        assert_eq!(info, GeoInfo::default());
        assert_eq!(provider.lookup(None), GeoInfo::default());
    }
}
