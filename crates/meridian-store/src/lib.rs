//! # Meridian Store
//!
//! Durable catalog of zones, RRSets, records and templates behind
//! `sqlx::AnyPool`, so the `db.driver`/`db.dsn` configuration pair picks
//! SQLite or PostgreSQL at runtime. The schema is created at startup;
//! every multi-row mutation runs in a single transaction.
//!
//! Placeholders use the `$n` syntax, which both backends accept.

use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use thiserror::Error;

pub mod model;
pub mod normalize;
pub mod soa;
mod sync;
mod templates;
mod zones;

pub use model::{strip_timestamps, RecordData, RrSet, SyncCatalog, Template, TemplateRecord, Zone};
pub use normalize::{normalize_fqdn, normalize_rrset_name};
pub use soa::SoaPolicy;
pub use zones::ImportMode;

/// Store error.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("not found")]
    NotFound,

    #[error("rrset already exists")]
    Conflict {
        /// Id of the RRSet occupying the (zone, name, type) slot.
        existing_id: i64,
    },

    #[error("{0}")]
    InvalidName(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Which backend the pool talks to. The schema DDL differs slightly
/// (auto-increment primary keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Sqlite,
    Postgres,
}

/// Handle to the zone catalog.
#[derive(Clone)]
pub struct Store {
    pool: AnyPool,
    backend: Backend,
}

impl Store {
    /// Connects to the backend selected by `driver` and `dsn`.
    pub async fn connect(driver: &str, dsn: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let (backend, url) = match driver {
            "sqlite" | "sqlite3" => {
                let url = if dsn.starts_with("sqlite:") {
                    dsn.to_string()
                } else {
                    format!("sqlite://{}?mode=rwc", dsn)
                };
                (Backend::Sqlite, url)
            }
            "postgres" | "postgresql" => {
                let url = if dsn.starts_with("postgres") {
                    dsn.to_string()
                } else {
                    format!("postgres://{}", dsn)
                };
                (Backend::Postgres, url)
            }
            other => {
                return Err(StoreError::InvalidName(format!(
                    "unsupported db driver {:?}",
                    other
                )));
            }
        };

        // An in-memory SQLite database exists per connection; a pool of
        // more than one would hand out empty databases.
        let max_connections = if url.contains(":memory:") { 1 } else { 8 };

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await?;

        Ok(Self { pool, backend })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Verifies connectivity.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Creates the schema if it does not exist yet. The `{pk}` slot is
    /// the backend's auto-increment primary key column.
    pub async fn migrate(&self) -> Result<()> {
        let pk = match self.backend {
            Backend::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
            Backend::Postgres => "id BIGSERIAL PRIMARY KEY",
        };

        let statements = [
            "CREATE TABLE IF NOT EXISTS zones (
                {pk},
                name VARCHAR(255) NOT NULL,
                created_at TEXT,
                updated_at TEXT
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_zones_name ON zones (name)",
            "CREATE TABLE IF NOT EXISTS rr_sets (
                {pk},
                zone_id BIGINT NOT NULL,
                name VARCHAR(255) NOT NULL,
                type VARCHAR(20) NOT NULL,
                ttl BIGINT NOT NULL DEFAULT 0,
                created_at TEXT,
                updated_at TEXT
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_rrset_unique
                ON rr_sets (zone_id, name, type)",
            "CREATE INDEX IF NOT EXISTS idx_rrset_lookup
                ON rr_sets (zone_id, name, type)",
            "CREATE TABLE IF NOT EXISTS r_data (
                {pk},
                rr_set_id BIGINT NOT NULL,
                data TEXT NOT NULL,
                country VARCHAR(2),
                continent VARCHAR(2),
                asn BIGINT,
                subnet VARCHAR(64),
                created_at TEXT,
                updated_at TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_rdata_rrset ON r_data (rr_set_id)",
            "CREATE TABLE IF NOT EXISTS templates (
                {pk},
                name VARCHAR(100) NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT,
                updated_at TEXT
            )",
            "CREATE TABLE IF NOT EXISTS template_records (
                {pk},
                template_id BIGINT NOT NULL,
                name VARCHAR(255) NOT NULL,
                type VARCHAR(20) NOT NULL,
                ttl BIGINT NOT NULL DEFAULT 0,
                data TEXT NOT NULL,
                country VARCHAR(2),
                continent VARCHAR(2),
                asn BIGINT,
                subnet VARCHAR(64),
                created_at TEXT,
                updated_at TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_template_records
                ON template_records (template_id)",
        ];

        for stmt in statements {
            let sql = stmt.replace("{pk}", pk);
            sqlx::query(&sql).execute(&self.pool).await?;
        }
        tracing::debug!("store schema migrated");
        Ok(())
    }
}

/// Current timestamp in the stored text form.
pub(crate) fn now_text() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(crate) fn parse_time(value: Option<String>) -> Option<chrono::DateTime<chrono::Utc>> {
    let raw = value?;
    chrono::DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

pub(crate) fn zone_from_row(row: &sqlx::any::AnyRow) -> Result<Zone> {
    Ok(Zone {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_at: parse_time(row.try_get("created_at")?),
        updated_at: parse_time(row.try_get("updated_at")?),
        rrsets: Vec::new(),
    })
}

pub(crate) fn rrset_from_row(row: &sqlx::any::AnyRow) -> Result<RrSet> {
    let ttl: i64 = row.try_get("ttl")?;
    Ok(RrSet {
        id: row.try_get("id")?,
        zone_id: row.try_get("zone_id")?,
        name: row.try_get("name")?,
        rtype: row.try_get("type")?,
        ttl: ttl.max(0) as u32,
        created_at: parse_time(row.try_get("created_at")?),
        updated_at: parse_time(row.try_get("updated_at")?),
        records: Vec::new(),
    })
}

pub(crate) fn record_from_row(row: &sqlx::any::AnyRow) -> Result<RecordData> {
    Ok(RecordData {
        id: row.try_get("id")?,
        rrset_id: row.try_get("rr_set_id")?,
        data: row.try_get("data")?,
        country: row.try_get("country")?,
        continent: row.try_get("continent")?,
        asn: row.try_get("asn")?,
        subnet: row.try_get("subnet")?,
    })
}

pub(crate) fn template_from_row(row: &sqlx::any::AnyRow) -> Result<Template> {
    Ok(Template {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: parse_time(row.try_get("created_at")?),
        updated_at: parse_time(row.try_get("updated_at")?),
        records: Vec::new(),
    })
}

pub(crate) fn template_record_from_row(row: &sqlx::any::AnyRow) -> Result<TemplateRecord> {
    let ttl: i64 = row.try_get("ttl")?;
    Ok(TemplateRecord {
        id: row.try_get("id")?,
        template_id: row.try_get("template_id")?,
        name: row.try_get("name")?,
        rtype: row.try_get("type")?,
        ttl: ttl.max(0) as u32,
        data: row.try_get("data")?,
        country: row.try_get("country")?,
        continent: row.try_get("continent")?,
        asn: row.try_get("asn")?,
        subnet: row.try_get("subnet")?,
    })
}

#[cfg(test)]
pub(crate) async fn test_store() -> Store {
    let store = Store::connect("sqlite", "sqlite::memory:").await.unwrap();
    store.migrate().await.unwrap();
    store
}
