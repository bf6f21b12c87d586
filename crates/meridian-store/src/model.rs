//! Catalog entities.
//!
//! These serde shapes are the wire contract: zone export, zone import and
//! the replication payload all use them verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A DNS zone. Owns its RRSets; deletion cascades.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Row id.
    #[serde(default)]
    pub id: i64,
    /// Normalized zone name (lowercase, trailing dot).
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// RRSets, present when the zone was loaded preloaded.
    #[serde(default)]
    pub rrsets: Vec<RrSet>,
}

/// The set of records sharing a name and type within a zone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RrSet {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub zone_id: i64,
    /// FQDN owner name (lowercase, trailing dot).
    pub name: String,
    /// Uppercase type mnemonic.
    #[serde(rename = "type")]
    pub rtype: String,
    /// TTL shared by all records of the set.
    #[serde(default)]
    pub ttl: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub records: Vec<RecordData>,
}

/// A single record value with optional Geo-selection attributes.
///
/// An attribute set that is entirely absent marks the record as a generic
/// fallback for Geo selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordData {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub rrset_id: i64,
    /// Rendered rdata in zone-file text form.
    pub data: String,
    /// ISO-3166 alpha-2 country code, stored uppercase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Two-letter continent code, stored uppercase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continent: Option<String>,
    /// Autonomous system number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<i64>,
    /// CIDR the client must fall within.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
}

impl RecordData {
    /// Returns a copy with data trimmed and Geo attributes normalized:
    /// trimmed, uppercased, empty collapsed to absent.
    pub fn normalized(&self) -> Self {
        Self {
            id: self.id,
            rrset_id: self.rrset_id,
            data: self.data.trim().to_string(),
            country: normalize_attr(&self.country),
            continent: normalize_attr(&self.continent),
            asn: self.asn,
            subnet: normalize_attr(&self.subnet),
        }
    }

    /// True when no Geo attribute is set.
    pub fn is_generic(&self) -> bool {
        self.country.is_none()
            && self.continent.is_none()
            && self.asn.is_none()
            && self.subnet.is_none()
    }
}

fn normalize_attr(value: &Option<String>) -> Option<String> {
    let v = value.as_ref()?.trim();
    if v.is_empty() {
        return None;
    }
    Some(v.to_ascii_uppercase())
}

/// A named collection of record templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub records: Vec<TemplateRecord>,
}

/// A record inside a template. `name` and `data` may embed `{domain}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub template_id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub rtype: String,
    #[serde(default)]
    pub ttl: u32,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
}

/// Full-catalog replication payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncCatalog {
    #[serde(default)]
    pub zones: Vec<Zone>,
    #[serde(default)]
    pub templates: Vec<Template>,
}

/// Removes `created_at`/`updated_at`/`deleted_at` fields from an import
/// payload before decoding, so exported timestamps are never re-applied.
pub fn strip_timestamps(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| {
                    let lk = k.to_ascii_lowercase();
                    lk != "created_at" && lk != "updated_at" && lk != "deleted_at"
                })
                .map(|(k, v)| (k, strip_timestamps(v)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(strip_timestamps).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_normalization() {
        let record = RecordData {
            data: "  192.0.2.1  ".to_string(),
            country: Some(" us ".to_string()),
            continent: Some(String::new()),
            ..Default::default()
        };
        let normalized = record.normalized();
        assert_eq!(normalized.data, "192.0.2.1");
        assert_eq!(normalized.country.as_deref(), Some("US"));
        assert_eq!(normalized.continent, None);
    }

    #[test]
    fn test_generic_detection() {
        assert!(RecordData::default().is_generic());
        let geo = RecordData {
            country: Some("DE".to_string()),
            ..Default::default()
        };
        assert!(!geo.is_generic());
    }

    #[test]
    fn test_strip_timestamps() {
        let value = serde_json::json!({
            "name": "example.com.",
            "created_at": "2024-01-01T00:00:00Z",
            "rrsets": [{
                "name": "www.example.com.",
                "updated_at": "2024-01-01T00:00:00Z",
                "records": [{"data": "192.0.2.1", "deleted_at": null}]
            }]
        });
        let cleaned = strip_timestamps(value);
        assert!(cleaned.get("created_at").is_none());
        assert!(cleaned["rrsets"][0].get("updated_at").is_none());
        assert!(cleaned["rrsets"][0]["records"][0].get("deleted_at").is_none());
        assert_eq!(cleaned["name"], "example.com.");
    }

    #[test]
    fn test_rrset_type_field_name() {
        let json = r#"{"name": "www.example.com.", "type": "A", "ttl": 300}"#;
        let set: RrSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.rtype, "A");
        let out = serde_json::to_value(&set).unwrap();
        assert_eq!(out["type"], "A");
    }
}
