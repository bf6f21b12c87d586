//! BIND zone-file parsing and serialization.
//!
//! The parser is line-oriented: `$ORIGIN` and `$TTL` directives,
//! parenthesized continuations, `;` comments, relative names and the `@`
//! apex shorthand. Records sharing a (name, type) merge into one RRSet
//! whose TTL is the first observed.

use crate::{Result, ZoneIoError};
use meridian_proto::{RData, RecordType};
use meridian_store::{normalize_fqdn, RecordData, RrSet, Zone};
use std::str::FromStr;

/// Serializes a preloaded zone to BIND text.
///
/// Names are emitted without the trailing dot, per BIND convention; the
/// `$ORIGIN` header keeps it.
pub fn to_bind(zone: &Zone) -> String {
    let mut out = String::new();
    out.push_str("$ORIGIN ");
    out.push_str(zone.name.trim_end_matches('.'));
    out.push_str(".\n");
    for set in &zone.rrsets {
        for record in &set.records {
            out.push_str(&format!(
                "{} {} IN {} {}\n",
                set.name.trim_end_matches('.'),
                set.ttl,
                set.rtype.to_ascii_uppercase(),
                record.data
            ));
        }
    }
    out
}

/// Parses BIND zone text into (name, type) grouped RRSets.
///
/// `zone_name` seeds `$ORIGIN`; a zero TTL on a group is left for the
/// import layer to replace with the configured default.
pub fn parse_bind(zone_name: &str, text: &str, default_ttl: u32) -> Result<Vec<RrSet>> {
    let mut origin = normalize_fqdn(zone_name);
    let mut default = default_ttl;
    let mut last_name: Option<String> = None;
    let mut sets: Vec<RrSet> = Vec::new();

    for (line_no, raw_line) in join_continuations(text) {
        let line = strip_comment(&raw_line);
        if line.trim().is_empty() {
            continue;
        }

        let starts_blank = line.starts_with(' ') || line.starts_with('\t');
        let mut tokens = tokenize(&line);
        if tokens.is_empty() {
            continue;
        }

        // Directives
        if tokens[0].eq_ignore_ascii_case("$ORIGIN") {
            let name = tokens
                .get(1)
                .ok_or_else(|| ZoneIoError::bind(line_no, "$ORIGIN needs a name"))?;
            origin = normalize_fqdn(name);
            continue;
        }
        if tokens[0].eq_ignore_ascii_case("$TTL") {
            let value = tokens
                .get(1)
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| ZoneIoError::bind(line_no, "$TTL needs a number"))?;
            default = value;
            continue;
        }
        if tokens[0].starts_with('$') {
            // $INCLUDE and friends are not supported.
            return Err(ZoneIoError::bind(
                line_no,
                format!("unsupported directive {}", tokens[0]),
            ));
        }

        // Owner name: first token unless the line started with blank space.
        let name = if starts_blank {
            last_name
                .clone()
                .ok_or_else(|| ZoneIoError::bind(line_no, "no previous owner name"))?
        } else {
            let raw = tokens.remove(0);
            resolve_name(&raw, &origin)
        };
        last_name = Some(name.clone());

        // Optional TTL and class, in either order, before the type.
        let mut ttl: Option<u32> = None;
        loop {
            let Some(token) = tokens.first() else {
                return Err(ZoneIoError::bind(line_no, "missing record type"));
            };
            if ttl.is_none() {
                if let Ok(value) = token.parse::<u32>() {
                    ttl = Some(value);
                    tokens.remove(0);
                    continue;
                }
            }
            if token.eq_ignore_ascii_case("IN")
                || token.eq_ignore_ascii_case("CH")
                || token.eq_ignore_ascii_case("HS")
            {
                tokens.remove(0);
                continue;
            }
            break;
        }

        let type_token = tokens.remove(0);
        let rtype = RecordType::from_str(&type_token)
            .map_err(|e| ZoneIoError::bind(line_no, e.to_string()))?;
        let rtype_str = rtype.mnemonic();

        if tokens.is_empty() {
            return Err(ZoneIoError::bind(line_no, "missing rdata"));
        }
        let mut data = tokens.join(" ");

        // Qualify relative names inside name-typed rdata so stored data
        // is always absolute.
        match rtype {
            RecordType::Cname | RecordType::Ns | RecordType::Ptr => {
                if data.trim() != "@" {
                    data = resolve_name(data.trim(), &origin);
                }
            }
            RecordType::Mx => {
                let mut parts: Vec<String> =
                    data.split_whitespace().map(str::to_string).collect();
                if parts.len() == 2 && parts[1] != "@" {
                    parts[1] = resolve_name(&parts[1], &origin);
                    data = parts.join(" ");
                }
            }
            _ => {}
        }

        // Validate rdata text for the supported record set.
        let check = if data.trim() == "@" {
            RData::from_text(rtype, &origin)
        } else {
            RData::from_text(rtype, &data)
        };
        if let Err(e) = check {
            return Err(ZoneIoError::bind(line_no, e.to_string()));
        }

        let ttl = ttl.unwrap_or(default);
        let record = RecordData {
            data,
            ..Default::default()
        };

        match sets
            .iter_mut()
            .find(|s| s.name == name && s.rtype == rtype_str)
        {
            Some(set) => set.records.push(record),
            None => sets.push(RrSet {
                name,
                rtype: rtype_str,
                ttl,
                records: vec![record],
                ..Default::default()
            }),
        }
    }

    Ok(sets)
}

/// Resolves a possibly relative owner name against the origin.
fn resolve_name(raw: &str, origin: &str) -> String {
    let raw = raw.trim();
    if raw == "@" {
        return origin.to_string();
    }
    let lower = raw.to_ascii_lowercase();
    if lower.ends_with('.') {
        lower
    } else {
        format!("{}.{}", lower, origin)
    }
}

/// Joins parenthesized continuations into single logical lines, keeping
/// the first physical line's number for diagnostics.
fn join_continuations(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending = String::new();
    let mut pending_line = 0usize;
    let mut depth = 0i32;

    for (i, line) in text.lines().enumerate() {
        let stripped = strip_comment(line);
        let opens = stripped.matches('(').count() as i32;
        let closes = stripped.matches(')').count() as i32;

        if depth == 0 {
            pending_line = i + 1;
            pending = stripped.replace(['(', ')'], " ");
        } else {
            pending.push(' ');
            pending.push_str(&stripped.replace(['(', ')'], " "));
        }
        depth += opens - closes;

        if depth <= 0 {
            depth = 0;
            out.push((pending_line, std::mem::take(&mut pending)));
        }
    }
    if !pending.trim().is_empty() {
        out.push((pending_line, pending));
    }
    out
}

/// Removes a `;` comment, honoring double quotes.
fn strip_comment(line: &str) -> String {
    let mut in_quotes = false;
    let mut out = String::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                out.push(c);
            }
            ';' if !in_quotes => break,
            c => out.push(c),
        }
    }
    out
}

/// Splits a line into whitespace-separated tokens, keeping quoted
/// strings (with their quotes) intact.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_zone() {
        let text = "\
$ORIGIN example.com.
$TTL 3600
@ IN A 192.0.2.1
www 300 IN A 192.0.2.2
mail IN CNAME www
";
        let sets = parse_bind("example.com.", text, 0).unwrap();
        assert_eq!(sets.len(), 3);

        let apex = &sets[0];
        assert_eq!(apex.name, "example.com.");
        assert_eq!(apex.rtype, "A");
        assert_eq!(apex.ttl, 3600);

        let www = &sets[1];
        assert_eq!(www.ttl, 300);

        let cname = &sets[2];
        assert_eq!(cname.name, "mail.example.com.");
        assert_eq!(cname.records[0].data, "www.example.com.");
    }

    #[test]
    fn test_same_name_type_merges() {
        let text = "\
www 300 IN A 192.0.2.1
www 600 IN A 192.0.2.2
";
        let sets = parse_bind("example.com.", text, 0).unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].ttl, 300); // first-observed TTL
        assert_eq!(sets[0].records.len(), 2);
    }

    #[test]
    fn test_blank_owner_repeats_previous() {
        let text = "\
www IN A 192.0.2.1
    IN A 192.0.2.2
";
        let sets = parse_bind("example.com.", text, 60).unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].records.len(), 2);
    }

    #[test]
    fn test_soa_with_parentheses() {
        let text = "\
$ORIGIN example.com.
@ 3600 IN SOA ns1.example.com. hostmaster.example.com. (
        2024010101 ; serial
        7200       ; refresh
        3600       ; retry
        1209600    ; expire
        300 )      ; minimum
";
        let sets = parse_bind("example.com.", text, 0).unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].rtype, "SOA");
        assert!(sets[0].records[0].data.contains("2024010101"));
    }

    #[test]
    fn test_comments_and_quotes() {
        let text = "@ IN TXT \"v=spf1 a ; not a comment\" ; real comment\n";
        let sets = parse_bind("example.com.", text, 60).unwrap();
        assert_eq!(sets[0].rtype, "TXT");
        assert!(sets[0].records[0].data.contains("not a comment"));
    }

    #[test]
    fn test_mx_rdata_qualified() {
        let text = "@ IN MX 10 mail\n";
        let sets = parse_bind("example.com.", text, 60).unwrap();
        assert_eq!(sets[0].records[0].data, "10 mail.example.com.");
    }

    #[test]
    fn test_bad_rdata_rejected() {
        let text = "www IN A not-an-address\n";
        let err = parse_bind("example.com.", text, 60).unwrap_err();
        assert!(matches!(err, ZoneIoError::BindParse { line: 1, .. }));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let text = "www IN BOGUS data\n";
        assert!(parse_bind("example.com.", text, 60).is_err());
    }

    #[test]
    fn test_to_bind_format() {
        let zone = Zone {
            name: "example.com.".to_string(),
            rrsets: vec![RrSet {
                name: "www.example.com.".to_string(),
                rtype: "A".to_string(),
                ttl: 300,
                records: vec![
                    RecordData {
                        data: "192.0.2.1".to_string(),
                        ..Default::default()
                    },
                    RecordData {
                        data: "192.0.2.2".to_string(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        };
        let text = to_bind(&zone);
        assert!(text.starts_with("$ORIGIN example.com.\n"));
        assert!(text.contains("www.example.com 300 IN A 192.0.2.1\n"));
        assert!(text.contains("www.example.com 300 IN A 192.0.2.2\n"));
    }

    #[test]
    fn test_export_import_roundtrip_shape() {
        let text = "\
$ORIGIN example.com.
www 300 IN A 192.0.2.1
@ 600 IN MX 10 mail.example.com.
";
        let sets = parse_bind("example.com.", text, 0).unwrap();
        let zone = Zone {
            name: "example.com.".to_string(),
            rrsets: sets,
            ..Default::default()
        };
        let emitted = to_bind(&zone);
        let reparsed = parse_bind("example.com.", &emitted, 0).unwrap();
        assert_eq!(zone.rrsets.len(), reparsed.len());
        for (a, b) in zone.rrsets.iter().zip(reparsed.iter()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.rtype, b.rtype);
            assert_eq!(a.ttl, b.ttl);
        }
    }
}
