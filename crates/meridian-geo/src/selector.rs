//! Geo answer selection.
//!
//! A pure function over the candidate record list. Buckets are checked in
//! strict priority order and the first non-empty bucket wins; within a
//! bucket the original record order is preserved.

use crate::GeoInfo;
use ipnetwork::IpNetwork;
use meridian_store::RecordData;
use std::fmt;
use std::net::IpAddr;

/// Which rule produced the selected subset. Exposed for logging only;
/// it never influences the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionRule {
    /// Empty candidate list.
    None,
    /// Client subnet matched a record's CIDR.
    Subnet,
    /// Client ASN matched.
    Asn,
    /// Client country matched.
    Country,
    /// Client continent matched.
    Continent,
    /// Fallback to records without Geo attributes.
    Generic,
    /// Nothing matched; the full list is returned.
    All,
}

impl fmt::Display for SelectionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SelectionRule::None => "none",
            SelectionRule::Subnet => "subnet",
            SelectionRule::Asn => "asn",
            SelectionRule::Country => "country",
            SelectionRule::Continent => "continent",
            SelectionRule::Generic => "generic",
            SelectionRule::All => "all",
        };
        f.write_str(s)
    }
}

/// Selects the answer subset for a client.
///
/// Priority: subnet > ASN > country > continent > generic. With no valid
/// client IP only the generic records are considered; when every bucket
/// is empty the full list is returned.
pub fn select_geo_records(
    records: &[RecordData],
    client_ip: Option<IpAddr>,
    geo: &GeoInfo,
) -> (Vec<RecordData>, SelectionRule) {
    if records.is_empty() {
        return (Vec::new(), SelectionRule::None);
    }

    let Some(ip) = client_ip else {
        let generic: Vec<RecordData> = records
            .iter()
            .filter(|r| r.is_generic())
            .cloned()
            .collect();
        if !generic.is_empty() {
            return (generic, SelectionRule::Generic);
        }
        return (records.to_vec(), SelectionRule::All);
    };

    let mut subnet_match = Vec::new();
    let mut asn_match = Vec::new();
    let mut country_match = Vec::new();
    let mut continent_match = Vec::new();
    let mut generic = Vec::new();

    for record in records {
        if let Some(subnet) = &record.subnet {
            if let Ok(network) = subnet.parse::<IpNetwork>() {
                if network.contains(ip) {
                    subnet_match.push(record.clone());
                    continue;
                }
            }
        }
        if let Some(asn) = record.asn {
            if geo.asn != 0 && asn == geo.asn as i64 {
                asn_match.push(record.clone());
                continue;
            }
        }
        if let Some(country) = &record.country {
            if !geo.country.is_empty() && country.eq_ignore_ascii_case(&geo.country) {
                country_match.push(record.clone());
                continue;
            }
        }
        if let Some(continent) = &record.continent {
            if !geo.continent.is_empty() && continent.eq_ignore_ascii_case(&geo.continent) {
                continent_match.push(record.clone());
                continue;
            }
        }
        if record.is_generic() {
            generic.push(record.clone());
        }
    }

    if !subnet_match.is_empty() {
        return (subnet_match, SelectionRule::Subnet);
    }
    if !asn_match.is_empty() {
        return (asn_match, SelectionRule::Asn);
    }
    if !country_match.is_empty() {
        return (country_match, SelectionRule::Country);
    }
    if !continent_match.is_empty() {
        return (continent_match, SelectionRule::Continent);
    }
    if !generic.is_empty() {
        return (generic, SelectionRule::Generic);
    }
    (records.to_vec(), SelectionRule::All)
}
