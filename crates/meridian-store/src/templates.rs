//! Template catalog and application.

use crate::model::{RecordData, RrSet, Template, TemplateRecord, Zone};
use crate::normalize::normalize_rrset_name;
use crate::zones::ImportMode;
use crate::{now_text, template_from_row, template_record_from_row, Result, Store, StoreError};
use sqlx::{Any, Row, Transaction};

impl Store {
    /// Creates a template with its records.
    pub async fn create_template(
        &self,
        name: &str,
        description: &str,
        records: Vec<TemplateRecord>,
    ) -> Result<Template> {
        let mut tx = self.pool.begin().await?;
        let id = insert_template_tx(&mut tx, name, description).await?;
        insert_template_records_tx(&mut tx, id, &records).await?;
        tx.commit().await?;
        self.get_template(id).await?.ok_or(StoreError::NotFound)
    }

    /// Lists templates with records preloaded.
    pub async fn list_templates(&self) -> Result<Vec<Template>> {
        let rows = sqlx::query("SELECT * FROM templates ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut templates: Vec<Template> = rows
            .iter()
            .map(template_from_row)
            .collect::<Result<Vec<_>>>()?;
        for template in &mut templates {
            template.records = self.template_records_of(template.id).await?;
        }
        Ok(templates)
    }

    /// Fetches a template with records preloaded.
    pub async fn get_template(&self, id: i64) -> Result<Option<Template>> {
        let row = sqlx::query("SELECT * FROM templates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let mut template = template_from_row(&row)?;
        template.records = self.template_records_of(template.id).await?;
        Ok(Some(template))
    }

    /// Deletes a template and its records. Returns false when absent.
    pub async fn delete_template(&self, id: i64) -> Result<bool> {
        if self.get_template(id).await?.is_none() {
            return Ok(false);
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM template_records WHERE template_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM templates WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn template_records_of(&self, template_id: i64) -> Result<Vec<TemplateRecord>> {
        let rows =
            sqlx::query("SELECT * FROM template_records WHERE template_id = $1 ORDER BY id")
                .bind(template_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(template_record_from_row).collect()
    }

    /// Materializes a template into a zone.
    ///
    /// `{domain}` in names and data expands to the zone name without the
    /// trailing dot, `@` means the apex. The expanded records are grouped
    /// by (name, type) and upserted, so applying the same template twice
    /// leaves the zone unchanged.
    pub async fn apply_template(&self, zone: &Zone, template: &Template) -> Result<usize> {
        let domain = zone.name.trim_end_matches('.').to_string();

        let mut groups: Vec<RrSet> = Vec::new();
        for record in &template.records {
            let name = record.name.replace("{domain}", &domain);
            let name = normalize_rrset_name(&name, &zone.name)?;
            let rtype = record.rtype.trim().to_ascii_uppercase();
            let data = record.data.replace("{domain}", &domain);

            let entry = RecordData {
                data,
                country: record.country.clone(),
                continent: record.continent.clone(),
                asn: record.asn,
                subnet: record.subnet.clone(),
                ..Default::default()
            };

            match groups
                .iter_mut()
                .find(|g| g.name == name && g.rtype == rtype)
            {
                Some(group) => group.records.push(entry),
                None => groups.push(RrSet {
                    name,
                    rtype,
                    ttl: record.ttl,
                    records: vec![entry],
                    ..Default::default()
                }),
            }
        }

        let count = groups.iter().map(|g| g.records.len()).sum();
        self.import_rrsets(zone, groups, ImportMode::Upsert, 0).await?;
        Ok(count)
    }
}

pub(crate) async fn insert_template_tx(
    tx: &mut Transaction<'_, Any>,
    name: &str,
    description: &str,
) -> Result<i64> {
    let now = now_text();
    let row = sqlx::query(
        "INSERT INTO templates (name, description, created_at, updated_at)
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(name)
    .bind(description)
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.try_get("id")?)
}

pub(crate) async fn insert_template_records_tx(
    tx: &mut Transaction<'_, Any>,
    template_id: i64,
    records: &[TemplateRecord],
) -> Result<()> {
    let now = now_text();
    for record in records {
        sqlx::query(
            "INSERT INTO template_records
                (template_id, name, type, ttl, data,
                 country, continent, asn, subnet, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(template_id)
        .bind(&record.name)
        .bind(record.rtype.trim().to_ascii_uppercase())
        .bind(record.ttl as i64)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store;

    fn web_template_records() -> Vec<TemplateRecord> {
        vec![
            TemplateRecord {
                name: "{domain}".to_string(),
                rtype: "A".to_string(),
                ttl: 300,
                data: "192.0.2.1".to_string(),
                ..Default::default()
            },
            TemplateRecord {
                name: "www.{domain}".to_string(),
                rtype: "CNAME".to_string(),
                ttl: 300,
                data: "{domain}.".to_string(),
                ..Default::default()
            },
            TemplateRecord {
                name: "{domain}".to_string(),
                rtype: "MX".to_string(),
                ttl: 300,
                data: "10 mail.{domain}.".to_string(),
                ..Default::default()
            },
        ]
    }

    #[tokio::test]
    async fn test_template_crud() {
        let store = test_store().await;
        let template = store
            .create_template("web", "basic web records", web_template_records())
            .await
            .unwrap();
        assert_eq!(template.records.len(), 3);

        let listed = store.list_templates().await.unwrap();
        assert_eq!(listed.len(), 1);

        assert!(store.delete_template(template.id).await.unwrap());
        assert!(store.list_templates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_substitutes_domain() {
        let store = test_store().await;
        let zone = store.create_zone("shop.test.").await.unwrap();
        let template = store
            .create_template("web", "", web_template_records())
            .await
            .unwrap();

        let count = store.apply_template(&zone, &template).await.unwrap();
        assert_eq!(count, 3);

        let apex = store
            .lookup_rrset(zone.id, "shop.test.", "A")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(apex.records[0].data, "192.0.2.1");

        let mx = store
            .lookup_rrset(zone.id, "shop.test.", "MX")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mx.records[0].data, "10 mail.shop.test.");

        let cname = store
            .lookup_rrset(zone.id, "www.shop.test.", "CNAME")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cname.records[0].data, "shop.test.");
    }

    #[tokio::test]
    async fn test_apply_twice_is_idempotent() {
        let store = test_store().await;
        let zone = store.create_zone("shop.test.").await.unwrap();
        let template = store
            .create_template("web", "", web_template_records())
            .await
            .unwrap();

        store.apply_template(&zone, &template).await.unwrap();
        let first = store.list_rrsets(zone.id).await.unwrap();

        store.apply_template(&zone, &template).await.unwrap();
        let second = store.list_rrsets(zone.id).await.unwrap();

        assert_eq!(first.len(), second.len());
        let total_records: usize = second.iter().map(|s| s.records.len()).sum();
        assert_eq!(total_records, 3);
    }
}
