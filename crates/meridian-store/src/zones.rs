//! Zone and RRSet operations.

use crate::model::{RecordData, RrSet, Zone};
use crate::normalize::{normalize_fqdn, normalize_rrset_name};
use crate::{
    now_text, record_from_row, rrset_from_row, zone_from_row, Result, Store, StoreError,
};
use sqlx::{Any, Row, Transaction};

/// Zone import mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Wipe the zone's RRSets first, then create the incoming ones.
    Replace,
    /// Update touched (name, type) groups, keep the rest.
    Upsert,
}

impl ImportMode {
    /// Parses the query-parameter form. `merge` is the historical alias
    /// for upsert.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Some(Self::Replace),
            "upsert" | "merge" => Some(Self::Upsert),
            _ => None,
        }
    }
}

impl Store {
    /// Creates a zone. The name is normalized before insert.
    pub async fn create_zone(&self, name: &str) -> Result<Zone> {
        let normalized = normalize_fqdn(name);
        if normalized.is_empty() {
            return Err(StoreError::InvalidName("zone name is empty".to_string()));
        }
        let now = now_text();
        let row = sqlx::query(
            "INSERT INTO zones (name, created_at, updated_at)
             VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&normalized)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        Ok(Zone {
            id: row.try_get("id")?,
            name: normalized,
            created_at: crate::parse_time(Some(now.clone())),
            updated_at: crate::parse_time(Some(now)),
            rrsets: Vec::new(),
        })
    }

    /// Lists all zones, bare.
    pub async fn list_zones(&self) -> Result<Vec<Zone>> {
        let rows = sqlx::query("SELECT * FROM zones ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(zone_from_row).collect()
    }

    /// Lists `(id, name)` pairs ordered longest name first, the order the
    /// zone cache wants for suffix matching.
    pub async fn zone_names_longest_first(&self) -> Result<Vec<(i64, String)>> {
        let rows = sqlx::query("SELECT id, name FROM zones ORDER BY length(name) DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| Ok((row.try_get("id")?, row.try_get("name")?)))
            .collect()
    }

    /// Finds a zone by normalized name.
    pub async fn find_zone_by_name(&self, name: &str) -> Result<Option<Zone>> {
        let normalized = normalize_fqdn(name);
        let row = sqlx::query("SELECT * FROM zones WHERE name = $1")
            .bind(&normalized)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(zone_from_row).transpose()
    }

    /// Fetches a zone without its RRSets.
    pub async fn get_zone(&self, id: i64) -> Result<Option<Zone>> {
        let row = sqlx::query("SELECT * FROM zones WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(zone_from_row).transpose()
    }

    /// Fetches a zone with RRSets and records preloaded.
    pub async fn get_zone_with_rrsets(&self, id: i64) -> Result<Option<Zone>> {
        let Some(mut zone) = self.get_zone(id).await? else {
            return Ok(None);
        };
        zone.rrsets = self.list_rrsets(id).await?;
        Ok(Some(zone))
    }

    /// Deletes a zone, cascading to its RRSets and records. Returns false
    /// when the zone does not exist.
    pub async fn delete_zone(&self, id: i64) -> Result<bool> {
        if self.get_zone(id).await?.is_none() {
            return Ok(false);
        }
        let mut tx = self.pool.begin().await?;
        delete_zone_rrsets_tx(&mut tx, id).await?;
        sqlx::query("DELETE FROM zones WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Lists a zone's RRSets with records preloaded.
    pub async fn list_rrsets(&self, zone_id: i64) -> Result<Vec<RrSet>> {
        let rows = sqlx::query("SELECT * FROM rr_sets WHERE zone_id = $1 ORDER BY id")
            .bind(zone_id)
            .fetch_all(&self.pool)
            .await?;
        let mut sets: Vec<RrSet> = rows
            .iter()
            .map(rrset_from_row)
            .collect::<Result<Vec<_>>>()?;
        for set in &mut sets {
            set.records = self.records_of(set.id).await?;
        }
        Ok(sets)
    }

    /// Looks up an RRSet by `(zone_id, name, type)`, records preloaded.
    pub async fn lookup_rrset(
        &self,
        zone_id: i64,
        name: &str,
        rtype: &str,
    ) -> Result<Option<RrSet>> {
        let row = sqlx::query(
            "SELECT * FROM rr_sets WHERE zone_id = $1 AND name = $2 AND type = $3",
        )
        .bind(zone_id)
        .bind(name.to_ascii_lowercase())
        .bind(rtype.to_ascii_uppercase())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let mut set = rrset_from_row(&row)?;
        set.records = self.records_of(set.id).await?;
        Ok(Some(set))
    }

    /// Fetches an RRSet by id, scoped to a zone, records preloaded.
    pub async fn get_rrset(&self, zone_id: i64, rrset_id: i64) -> Result<Option<RrSet>> {
        let row = sqlx::query("SELECT * FROM rr_sets WHERE zone_id = $1 AND id = $2")
            .bind(zone_id)
            .bind(rrset_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let mut set = rrset_from_row(&row)?;
        set.records = self.records_of(set.id).await?;
        Ok(Some(set))
    }

    async fn records_of(&self, rrset_id: i64) -> Result<Vec<RecordData>> {
        let rows = sqlx::query("SELECT * FROM r_data WHERE rr_set_id = $1 ORDER BY id")
            .bind(rrset_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Creates an RRSet. The name is normalized against the zone; a
    /// `(zone, name, type)` collision returns `Conflict` with the existing
    /// id and leaves the store untouched.
    pub async fn create_rrset(
        &self,
        zone: &Zone,
        name: &str,
        rtype: &str,
        ttl: u32,
        records: Vec<RecordData>,
    ) -> Result<RrSet> {
        let name = normalize_rrset_name(name, &zone.name)?;
        let rtype = rtype.trim().to_ascii_uppercase();

        if let Some(existing) = self.lookup_rrset(zone.id, &name, &rtype).await? {
            return Err(StoreError::Conflict {
                existing_id: existing.id,
            });
        }

        let records: Vec<RecordData> = records.iter().map(RecordData::normalized).collect();

        let mut tx = self.pool.begin().await?;
        let id = insert_rrset_tx(&mut tx, zone.id, &name, &rtype, ttl, &records).await?;
        tx.commit().await?;

        self.get_rrset(zone.id, id).await?.ok_or(StoreError::NotFound)
    }

    /// Replaces an RRSet's name, type, TTL and records.
    pub async fn update_rrset(
        &self,
        zone: &Zone,
        rrset_id: i64,
        name: &str,
        rtype: &str,
        ttl: u32,
        records: Vec<RecordData>,
    ) -> Result<RrSet> {
        if self.get_rrset(zone.id, rrset_id).await?.is_none() {
            return Err(StoreError::NotFound);
        }

        let name = normalize_rrset_name(name, &zone.name)?;
        let rtype = rtype.trim().to_ascii_uppercase();
        let records: Vec<RecordData> = records.iter().map(RecordData::normalized).collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE rr_sets SET name = $1, type = $2, ttl = $3, updated_at = $4 WHERE id = $5",
        )
        .bind(&name)
        .bind(&rtype)
        .bind(ttl as i64)
        .bind(now_text())
        .bind(rrset_id)
        .execute(&mut *tx)
        .await?;
        delete_records_tx(&mut tx, rrset_id).await?;
        insert_records_tx(&mut tx, rrset_id, &records).await?;
        tx.commit().await?;

        self.get_rrset(zone.id, rrset_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    /// Deletes an RRSet and its records. Returns false when absent.
    pub async fn delete_rrset(&self, zone_id: i64, rrset_id: i64) -> Result<bool> {
        if self.get_rrset(zone_id, rrset_id).await?.is_none() {
            return Ok(false);
        }
        let mut tx = self.pool.begin().await?;
        delete_records_tx(&mut tx, rrset_id).await?;
        sqlx::query("DELETE FROM rr_sets WHERE id = $1")
            .bind(rrset_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Imports RRSets into a zone under the given mode, in one
    /// transaction. Incoming ids are discarded, names normalized against
    /// the target zone, types uppercased, and a zero TTL replaced by
    /// `default_ttl`.
    pub async fn import_rrsets(
        &self,
        zone: &Zone,
        sets: Vec<RrSet>,
        mode: ImportMode,
        default_ttl: u32,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if mode == ImportMode::Replace {
            delete_zone_rrsets_tx(&mut tx, zone.id).await?;
        }

        for set in sets {
            let name = normalize_rrset_name(&set.name, &zone.name)?;
            let rtype = set.rtype.trim().to_ascii_uppercase();
            let ttl = if set.ttl == 0 && default_ttl > 0 {
                default_ttl
            } else {
                set.ttl
            };
            let records: Vec<RecordData> =
                set.records.iter().map(RecordData::normalized).collect();

            let existing: Option<i64> = sqlx::query(
                "SELECT id FROM rr_sets WHERE zone_id = $1 AND name = $2 AND type = $3",
            )
            .bind(zone.id)
            .bind(&name)
            .bind(&rtype)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.try_get("id"))
            .transpose()?;

            if let Some(id) = existing {
                sqlx::query("UPDATE rr_sets SET ttl = $1, updated_at = $2 WHERE id = $3")
                    .bind(ttl as i64)
                    .bind(now_text())
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                delete_records_tx(&mut tx, id).await?;
                insert_records_tx(&mut tx, id, &records).await?;
            } else {
                insert_rrset_tx(&mut tx, zone.id, &name, &rtype, ttl, &records).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

pub(crate) async fn insert_rrset_tx(
    tx: &mut Transaction<'_, Any>,
    zone_id: i64,
    name: &str,
    rtype: &str,
    ttl: u32,
    records: &[RecordData],
) -> Result<i64> {
    let now = now_text();
    let row = sqlx::query(
        "INSERT INTO rr_sets (zone_id, name, type, ttl, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
    )
    .bind(zone_id)
    .bind(name)
    .bind(rtype)
    .bind(ttl as i64)
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut **tx)
    .await?;
    let id: i64 = row.try_get("id")?;
    insert_records_tx(tx, id, records).await?;
    Ok(id)
}

pub(crate) async fn insert_records_tx(
    tx: &mut Transaction<'_, Any>,
    rrset_id: i64,
    records: &[RecordData],
) -> Result<()> {
    let now = now_text();
    for record in records {
        sqlx::query(
            "INSERT INTO r_data
                (rr_set_id, data, country, continent, asn, subnet, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(rrset_id)
        .bind(&record.data)
        .bind(&record.country)
        .bind(&record.continent)
        .bind(record.asn)
        .bind(&record.subnet)
        .bind(&now)
        .bind(&now)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub(crate) async fn delete_records_tx(
    tx: &mut Transaction<'_, Any>,
    rrset_id: i64,
) -> Result<()> {
    sqlx::query("DELETE FROM r_data WHERE rr_set_id = $1")
        .bind(rrset_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub(crate) async fn delete_zone_rrsets_tx(
    tx: &mut Transaction<'_, Any>,
    zone_id: i64,
) -> Result<()> {
    sqlx::query(
        "DELETE FROM r_data WHERE rr_set_id IN
            (SELECT id FROM rr_sets WHERE zone_id = $1)",
    )
    .bind(zone_id)
    .execute(&mut **tx)
    .await?;
    sqlx::query("DELETE FROM rr_sets WHERE zone_id = $1")
        .bind(zone_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store;

    fn record(data: &str) -> RecordData {
        RecordData {
            data: data.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_zone_lifecycle() {
        let store = test_store().await;

        let zone = store.create_zone("Example.COM").await.unwrap();
        assert_eq!(zone.name, "example.com.");
        assert!(zone.id > 0);

        let found = store.find_zone_by_name("example.com").await.unwrap();
        assert_eq!(found.unwrap().id, zone.id);

        assert!(store.delete_zone(zone.id).await.unwrap());
        assert!(!store.delete_zone(zone.id).await.unwrap());
        assert!(store.get_zone(zone.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_zone_rejected() {
        let store = test_store().await;
        store.create_zone("example.com.").await.unwrap();
        assert!(store.create_zone("EXAMPLE.com").await.is_err());
    }

    #[tokio::test]
    async fn test_rrset_conflict() {
        let store = test_store().await;
        let zone = store.create_zone("example.com.").await.unwrap();

        let set = store
            .create_rrset(&zone, "www", "a", 300, vec![record("192.0.2.1")])
            .await
            .unwrap();
        assert_eq!(set.name, "www.example.com.");
        assert_eq!(set.rtype, "A");

        let err = store
            .create_rrset(&zone, "www.example.com.", "A", 600, vec![record("192.0.2.2")])
            .await
            .unwrap_err();
        match err {
            StoreError::Conflict { existing_id } => assert_eq!(existing_id, set.id),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cascade_delete() {
        let store = test_store().await;
        let zone = store.create_zone("example.com.").await.unwrap();
        let set = store
            .create_rrset(&zone, "@", "A", 300, vec![record("192.0.2.1")])
            .await
            .unwrap();

        store.delete_zone(zone.id).await.unwrap();
        assert!(store.get_rrset(zone.id, set.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_replaces_records() {
        let store = test_store().await;
        let zone = store.create_zone("example.com.").await.unwrap();
        let set = store
            .create_rrset(
                &zone,
                "www",
                "A",
                300,
                vec![record("192.0.2.1"), record("192.0.2.2")],
            )
            .await
            .unwrap();

        let updated = store
            .update_rrset(&zone, set.id, "www", "A", 120, vec![record("198.51.100.9")])
            .await
            .unwrap();
        assert_eq!(updated.ttl, 120);
        assert_eq!(updated.records.len(), 1);
        assert_eq!(updated.records[0].data, "198.51.100.9");
    }

    #[tokio::test]
    async fn test_import_replace_vs_upsert() {
        let store = test_store().await;
        let zone = store.create_zone("example.com.").await.unwrap();
        store
            .create_rrset(&zone, "@", "A", 300, vec![record("192.0.2.1")])
            .await
            .unwrap();
        store
            .create_rrset(&zone, "@", "MX", 300, vec![record("10 mail.example.com.")])
            .await
            .unwrap();

        let incoming = vec![RrSet {
            name: "@".to_string(),
            rtype: "a".to_string(),
            ttl: 0,
            records: vec![record("203.0.113.5")],
            ..Default::default()
        }];

        // Upsert keeps the untouched MX.
        store
            .import_rrsets(&zone, incoming.clone(), ImportMode::Upsert, 900)
            .await
            .unwrap();
        let sets = store.list_rrsets(zone.id).await.unwrap();
        assert_eq!(sets.len(), 2);
        let a = sets.iter().find(|s| s.rtype == "A").unwrap();
        assert_eq!(a.ttl, 900); // default applied
        assert_eq!(a.records[0].data, "203.0.113.5");

        // Replace wipes everything else.
        store
            .import_rrsets(&zone, incoming, ImportMode::Replace, 900)
            .await
            .unwrap();
        let sets = store.list_rrsets(zone.id).await.unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].rtype, "A");
    }

    #[tokio::test]
    async fn test_import_rejects_foreign_name() {
        let store = test_store().await;
        let zone = store.create_zone("example.com.").await.unwrap();
        let incoming = vec![RrSet {
            name: "www.other.org.".to_string(),
            rtype: "A".to_string(),
            ttl: 300,
            records: vec![record("192.0.2.1")],
            ..Default::default()
        }];
        assert!(store
            .import_rrsets(&zone, incoming, ImportMode::Upsert, 0)
            .await
            .is_err());
    }

    #[test]
    fn test_import_mode_parse() {
        assert_eq!(ImportMode::parse("replace"), Some(ImportMode::Replace));
        assert_eq!(ImportMode::parse("UPSERT"), Some(ImportMode::Upsert));
        assert_eq!(ImportMode::parse("merge"), Some(ImportMode::Upsert));
        assert_eq!(ImportMode::parse("append"), None);
    }
}
