//! Name normalization.
//!
//! Applied at every write boundary so the catalog only ever contains
//! lowercase FQDNs with a trailing dot. `normalize_fqdn` is idempotent.

use crate::StoreError;

/// Lowercases and trims a name, appending the trailing dot if missing.
/// Empty input stays empty.
pub fn normalize_fqdn(name: &str) -> String {
    let n = name.trim().to_ascii_lowercase();
    if n.is_empty() || n.ends_with('.') {
        n
    } else {
        format!("{}.", n)
    }
}

/// Normalizes a record name relative to its zone.
///
/// Supported input shapes:
/// - `@` or empty: the zone apex
/// - `www.@`: relative to the apex (the `.@` suffix is stripped)
/// - `www`: relative name, zone appended
/// - `www.example.com` / `www.example.com.`: absolute
///
/// Fails when the result is not the apex or a subdomain of the zone.
pub fn normalize_rrset_name(name: &str, zone_name: &str) -> Result<String, StoreError> {
    let mut n = name.trim().to_ascii_lowercase();
    let zone = zone_name.trim().to_ascii_lowercase();
    let zone = zone.trim_end_matches('.');
    let zone_fqdn = format!("{}.", zone);

    if n.is_empty() || n == "@" {
        return Ok(zone_fqdn);
    }

    if let Some(stripped) = n.strip_suffix(".@") {
        n = stripped.to_string();
    }

    let result = if n.ends_with('.') {
        n
    } else if n == zone {
        zone_fqdn.clone()
    } else if n.ends_with(&format!(".{}", zone)) {
        format!("{}.", n)
    } else {
        format!("{}.{}", n, zone_fqdn)
    };

    if result != zone_fqdn && !result.ends_with(&format!(".{}", zone_fqdn)) {
        return Err(StoreError::InvalidName(format!(
            "record name {:?} does not belong to zone {:?}",
            name, zone_name
        )));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_fqdn_idempotent() {
        for input in ["Example.COM", "example.com.", "  a.b  ", ""] {
            let once = normalize_fqdn(input);
            assert_eq!(normalize_fqdn(&once), once);
        }
        assert_eq!(normalize_fqdn("Example.COM"), "example.com.");
        assert_eq!(normalize_fqdn(""), "");
    }

    #[test]
    fn test_apex_shorthand() {
        assert_eq!(
            normalize_rrset_name("@", "example.com.").unwrap(),
            "example.com."
        );
        assert_eq!(
            normalize_rrset_name("", "example.com").unwrap(),
            "example.com."
        );
    }

    #[test]
    fn test_relative_to_apex_suffix() {
        assert_eq!(
            normalize_rrset_name("www.@", "example.com.").unwrap(),
            "www.example.com."
        );
    }

    #[test]
    fn test_relative_name() {
        assert_eq!(
            normalize_rrset_name("www", "example.com.").unwrap(),
            "www.example.com."
        );
        assert_eq!(
            normalize_rrset_name("a.b", "example.com.").unwrap(),
            "a.b.example.com."
        );
    }

    #[test]
    fn test_absolute_forms() {
        assert_eq!(
            normalize_rrset_name("www.example.com.", "example.com.").unwrap(),
            "www.example.com."
        );
        assert_eq!(
            normalize_rrset_name("www.example.com", "example.com.").unwrap(),
            "www.example.com."
        );
        assert_eq!(
            normalize_rrset_name("example.com", "example.com.").unwrap(),
            "example.com."
        );
    }

    #[test]
    fn test_foreign_name_rejected() {
        assert!(normalize_rrset_name("www.other.org.", "example.com.").is_err());
    }

    #[test]
    fn test_case_folded() {
        assert_eq!(
            normalize_rrset_name("WWW.Example.COM", "example.com.").unwrap(),
            "www.example.com."
        );
    }
}
