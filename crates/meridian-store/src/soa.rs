//! SOA serial maintenance.
//!
//! Every committed zone mutation bumps the SOA serial. When a zone has no
//! SOA yet and the policy allows it, one is synthesized from the
//! configured MNAME/RNAME templates.

use crate::model::{RecordData, RrSet, Zone};
use crate::zones::insert_rrset_tx;
use crate::{now_text, Result, Store};
use sqlx::Row;

/// SOA defaults: refresh, retry, expire, minimum, TTL.
const SOA_REFRESH: u32 = 7200;
const SOA_RETRY: u32 = 3600;
const SOA_EXPIRE: u32 = 1_209_600;
const SOA_MINIMUM: u32 = 300;
const SOA_TTL: u32 = 3600;

/// SOA synthesis policy, taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct SoaPolicy {
    /// Synthesize a SOA on mutation when the zone lacks one.
    pub auto_on_missing: bool,
    /// MNAME template; `{zone}` expands to the zone name without dot.
    pub primary: String,
    /// RNAME template; `{zone}` expands to the zone name without dot.
    pub hostmaster: String,
}

/// Resolves a SOA name template: `{zone}` substitution, lowercase,
/// trailing dot. Falls back when the template is empty.
fn resolve_soa_name(template: &str, zone: &str, fallback: &str) -> String {
    let mut v = template.trim().to_string();
    if v.is_empty() {
        v = fallback.to_string();
    }
    let zone = zone.trim_end_matches('.').to_ascii_lowercase();
    v = v.replace("{zone}", &zone);
    v = v.trim().to_ascii_lowercase();
    if !v.ends_with('.') {
        v.push('.');
    }
    v
}

/// Bumps the serial field of a seven-field SOA rdata string. A serial
/// that does not parse is reset to the current Unix epoch.
fn bump_serial_text(data: &str) -> Option<String> {
    let mut parts: Vec<String> = data.split_whitespace().map(str::to_string).collect();
    if parts.len() < 7 {
        return None;
    }
    parts[2] = match parts[2].parse::<i64>() {
        Ok(n) => (n + 1).to_string(),
        Err(_) => chrono::Utc::now().timestamp().to_string(),
    };
    Some(parts.join(" "))
}

impl Store {
    async fn find_soa(&self, zone_id: i64) -> Result<Option<RrSet>> {
        let row = sqlx::query(
            "SELECT * FROM rr_sets WHERE zone_id = $1 AND type = 'SOA' LIMIT 1",
        )
        .bind(zone_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let mut set = crate::rrset_from_row(&row)?;
        let records = sqlx::query("SELECT * FROM r_data WHERE rr_set_id = $1 ORDER BY id")
            .bind(set.id)
            .fetch_all(&self.pool)
            .await?;
        set.records = records
            .iter()
            .map(crate::record_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(set))
    }

    async fn write_soa_data(&self, record_id: i64, data: &str) -> Result<()> {
        sqlx::query("UPDATE r_data SET data = $1, updated_at = $2 WHERE id = $3")
            .bind(data)
            .bind(now_text())
            .bind(record_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Increments the zone's SOA serial. Quietly does nothing when the
    /// zone has no SOA.
    pub async fn bump_soa_serial(&self, zone_id: i64) -> Result<()> {
        let Some(soa) = self.find_soa(zone_id).await? else {
            return Ok(());
        };
        let Some(record) = soa.records.first() else {
            return Ok(());
        };
        if let Some(updated) = bump_serial_text(&record.data) {
            self.write_soa_data(record.id, &updated).await?;
        }
        Ok(())
    }

    /// Bumps the serial, or synthesizes a SOA when missing and the policy
    /// allows. Also re-resolves MNAME/RNAME from non-empty templates.
    pub async fn bump_soa_serial_auto(&self, zone: &Zone, policy: &SoaPolicy) -> Result<()> {
        let soa = self.find_soa(zone.id).await?;

        let existing = match soa {
            Some(set) if !set.records.is_empty() => set,
            _ => {
                if !policy.auto_on_missing {
                    return Ok(());
                }
                let zname = zone.name.trim_end_matches('.').to_ascii_lowercase();
                let origin = format!("{}.", zname);
                let primary = resolve_soa_name(&policy.primary, &zname, "ns1.{zone}");
                let hostmaster =
                    resolve_soa_name(&policy.hostmaster, &zname, "hostmaster.{zone}");
                let serial = chrono::Utc::now().timestamp();
                let data = format!(
                    "{} {} {} {} {} {} {}",
                    primary, hostmaster, serial, SOA_REFRESH, SOA_RETRY, SOA_EXPIRE, SOA_MINIMUM
                );

                let mut tx = self.pool.begin().await?;
                insert_rrset_tx(
                    &mut tx,
                    zone.id,
                    &origin,
                    "SOA",
                    SOA_TTL,
                    &[RecordData {
                        data,
                        ..Default::default()
                    }],
                )
                .await?;
                tx.commit().await?;
                return Ok(());
            }
        };

        let record = &existing.records[0];
        let mut parts: Vec<String> =
            record.data.split_whitespace().map(str::to_string).collect();
        if parts.len() < 7 {
            return Ok(());
        }
        let zname = zone.name.trim_end_matches('.').to_ascii_lowercase();
        if !policy.primary.is_empty() {
            parts[0] = resolve_soa_name(&policy.primary, &zname, &parts[0].clone());
        }
        if !policy.hostmaster.is_empty() {
            parts[1] = resolve_soa_name(&policy.hostmaster, &zname, &parts[1].clone());
        }
        let joined = parts.join(" ");
        if let Some(updated) = bump_serial_text(&joined) {
            self.write_soa_data(record.id, &updated).await?;
        }
        Ok(())
    }

    /// Current SOA serial of a zone, when present and parsable.
    pub async fn soa_serial(&self, zone_id: i64) -> Result<Option<i64>> {
        let Some(soa) = self.find_soa(zone_id).await? else {
            return Ok(None);
        };
        Ok(soa
            .records
            .first()
            .and_then(|r| r.data.split_whitespace().nth(2))
            .and_then(|s| s.parse().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store;

    fn auto_policy() -> SoaPolicy {
        SoaPolicy {
            auto_on_missing: true,
            primary: String::new(),
            hostmaster: String::new(),
        }
    }

    #[test]
    fn test_resolve_soa_name() {
        assert_eq!(
            resolve_soa_name("ns1.{zone}", "example.com", "x"),
            "ns1.example.com."
        );
        assert_eq!(
            resolve_soa_name("", "example.com", "hostmaster.{zone}"),
            "hostmaster.example.com."
        );
        assert_eq!(resolve_soa_name("NS.Fixed.Net.", "example.com", "x"), "ns.fixed.net.");
    }

    #[test]
    fn test_bump_serial_text() {
        let data = "ns1.example.com. hostmaster.example.com. 41 7200 3600 1209600 300";
        let bumped = bump_serial_text(data).unwrap();
        assert!(bumped.contains(" 42 "));

        // Unparsable serial resets to epoch.
        let data = "ns1.example.com. hostmaster.example.com. oops 7200 3600 1209600 300";
        let bumped = bump_serial_text(data).unwrap();
        let serial: i64 = bumped.split_whitespace().nth(2).unwrap().parse().unwrap();
        assert!(serial > 1_700_000_000);

        assert!(bump_serial_text("too short").is_none());
    }

    #[tokio::test]
    async fn test_soa_synthesized_and_bumped() {
        let store = test_store().await;
        let zone = store.create_zone("example.com.").await.unwrap();

        // No SOA yet: synthesis.
        store.bump_soa_serial_auto(&zone, &auto_policy()).await.unwrap();
        let soa = store
            .lookup_rrset(zone.id, "example.com.", "SOA")
            .await
            .unwrap()
            .expect("SOA should be synthesized");
        assert_eq!(soa.ttl, 3600);
        let data = &soa.records[0].data;
        assert!(data.starts_with("ns1.example.com. hostmaster.example.com. "));
        assert!(data.ends_with(" 7200 3600 1209600 300"));

        // Second call strictly increases the serial.
        let before = store.soa_serial(zone.id).await.unwrap().unwrap();
        store.bump_soa_serial_auto(&zone, &auto_policy()).await.unwrap();
        let after = store.soa_serial(zone.id).await.unwrap().unwrap();
        assert_eq!(after, before + 1);
    }

    #[tokio::test]
    async fn test_no_soa_without_auto() {
        let store = test_store().await;
        let zone = store.create_zone("example.com.").await.unwrap();
        store
            .bump_soa_serial_auto(&zone, &SoaPolicy::default())
            .await
            .unwrap();
        assert!(store
            .lookup_rrset(zone.id, "example.com.", "SOA")
            .await
            .unwrap()
            .is_none());
    }
}
