//! Full-catalog replication snapshot and restore.

use crate::model::SyncCatalog;
use crate::templates::{insert_template_records_tx, insert_template_tx};
use crate::zones::{delete_zone_rrsets_tx, insert_rrset_tx};
use crate::{now_text, Result, Store};
use sqlx::Row;

impl Store {
    /// Exports the entire catalog: all zones with RRSets and records, all
    /// templates with records.
    pub async fn sync_snapshot(&self) -> Result<SyncCatalog> {
        let mut zones = self.list_zones().await?;
        for zone in &mut zones {
            zone.rrsets = self.list_rrsets(zone.id).await?;
        }
        let templates = self.list_templates().await?;
        Ok(SyncCatalog { zones, templates })
    }

    /// Applies a master snapshot in a single transaction.
    ///
    /// Each incoming zone is upserted by name, its existing RRSets and
    /// records hard-deleted, and the incoming ones created verbatim.
    /// Templates follow the same pattern, keyed by name. Zones and
    /// templates absent from the snapshot are left in place.
    pub async fn sync_restore(&self, catalog: SyncCatalog) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for zone in catalog.zones {
            let existing: Option<i64> = sqlx::query("SELECT id FROM zones WHERE name = $1")
                .bind(&zone.name)
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| row.try_get("id"))
                .transpose()?;

            let zone_id = match existing {
                Some(id) => id,
                None => {
                    let now = now_text();
                    let row = sqlx::query(
                        "INSERT INTO zones (name, created_at, updated_at)
                         VALUES ($1, $2, $3) RETURNING id",
                    )
                    .bind(&zone.name)
                    .bind(&now)
                    .bind(&now)
                    .fetch_one(&mut *tx)
                    .await?;
                    row.try_get("id")?
                }
            };

            delete_zone_rrsets_tx(&mut tx, zone_id).await?;

            for set in zone.rrsets {
                let records: Vec<_> = set
                    .records
                    .into_iter()
                    .map(|mut r| {
                        r.id = 0;
                        r.rrset_id = 0;
                        r
                    })
                    .collect();
                insert_rrset_tx(&mut tx, zone_id, &set.name, &set.rtype, set.ttl, &records)
                    .await?;
            }
        }

        for template in catalog.templates {
            let existing: Option<i64> =
                sqlx::query("SELECT id FROM templates WHERE name = $1")
                    .bind(&template.name)
                    .fetch_optional(&mut *tx)
                    .await?
                    .map(|row| row.try_get("id"))
                    .transpose()?;

            let template_id = match existing {
                Some(id) => {
                    sqlx::query(
                        "UPDATE templates SET description = $1, updated_at = $2 WHERE id = $3",
                    )
                    .bind(&template.description)
                    .bind(now_text())
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    id
                }
                None => insert_template_tx(&mut tx, &template.name, &template.description).await?,
            };

            sqlx::query("DELETE FROM template_records WHERE template_id = $1")
                .bind(template_id)
                .execute(&mut *tx)
                .await?;
            insert_template_records_tx(&mut tx, template_id, &template.records).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{RecordData, TemplateRecord};
    use crate::test_store;

    fn record(data: &str) -> RecordData {
        RecordData {
            data: data.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_snapshot_restore_roundtrip() {
        let master = test_store().await;
        let zone_a = master.create_zone("alpha.test.").await.unwrap();
        master
            .create_rrset(&zone_a, "www", "A", 300, vec![record("192.0.2.1")])
            .await
            .unwrap();
        let zone_b = master.create_zone("beta.test.").await.unwrap();
        master
            .create_rrset(&zone_b, "@", "MX", 600, vec![record("10 mail.beta.test.")])
            .await
            .unwrap();
        master
            .create_template(
                "web",
                "demo",
                vec![TemplateRecord {
                    name: "{domain}".to_string(),
                    rtype: "A".to_string(),
                    ttl: 60,
                    data: "203.0.113.1".to_string(),
                    ..Default::default()
                }],
            )
            .await
            .unwrap();

        let snapshot = master.sync_snapshot().await.unwrap();

        let slave = test_store().await;
        slave.sync_restore(snapshot.clone()).await.unwrap();

        // The slave's own snapshot must match the master's catalog shape.
        let mirrored = slave.sync_snapshot().await.unwrap();
        assert_eq!(mirrored.zones.len(), 2);
        assert_eq!(mirrored.templates.len(), 1);

        let names: Vec<_> = mirrored.zones.iter().map(|z| z.name.as_str()).collect();
        assert!(names.contains(&"alpha.test."));
        assert!(names.contains(&"beta.test."));

        let alpha = mirrored
            .zones
            .iter()
            .find(|z| z.name == "alpha.test.")
            .unwrap();
        assert_eq!(alpha.rrsets.len(), 1);
        assert_eq!(alpha.rrsets[0].records[0].data, "192.0.2.1");
    }

    #[tokio::test]
    async fn test_restore_overwrites_local_rrsets() {
        let master = test_store().await;
        let zone = master.create_zone("gamma.test.").await.unwrap();
        master
            .create_rrset(&zone, "www", "A", 300, vec![record("192.0.2.10")])
            .await
            .unwrap();
        let snapshot = master.sync_snapshot().await.unwrap();

        let slave = test_store().await;
        let local_zone = slave.create_zone("gamma.test.").await.unwrap();
        slave
            .create_rrset(&local_zone, "stale", "A", 300, vec![record("203.0.113.99")])
            .await
            .unwrap();

        slave.sync_restore(snapshot).await.unwrap();

        let sets = slave.list_rrsets(local_zone.id).await.unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].name, "www.gamma.test.");
    }

    #[tokio::test]
    async fn test_restore_applied_twice_is_stable() {
        let master = test_store().await;
        let zone = master.create_zone("delta.test.").await.unwrap();
        master
            .create_rrset(&zone, "@", "A", 120, vec![record("198.51.100.1")])
            .await
            .unwrap();
        let snapshot = master.sync_snapshot().await.unwrap();

        let slave = test_store().await;
        slave.sync_restore(snapshot.clone()).await.unwrap();
        slave.sync_restore(snapshot).await.unwrap();

        let mirrored = slave.sync_snapshot().await.unwrap();
        assert_eq!(mirrored.zones.len(), 1);
        assert_eq!(mirrored.zones[0].rrsets.len(), 1);
        assert_eq!(mirrored.zones[0].rrsets[0].records.len(), 1);
    }
}
