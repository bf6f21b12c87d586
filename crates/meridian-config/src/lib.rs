//! # Meridian Configuration
//!
//! YAML-based configuration for the Meridian GeoDNS server: listen
//! addresses, store backend, GeoIP, caching limits, REST credentials,
//! TLS, and replication.
//!
//! Loading applies defaults first, then validates every cross-field rule
//! so a misconfigured server refuses to start instead of failing later.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Store backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Backend driver: `sqlite` or `postgres`.
    pub driver: String,
    /// Driver-specific DSN.
    pub dsn: String,
}

/// GeoIP provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoIpConfig {
    /// Enables Geo-aware answer selection.
    pub enabled: bool,
    /// MMDB file, or a directory scanned for `*.mmdb`.
    pub mmdb_path: String,
    /// Hot-reload poll interval in seconds (0 = disabled).
    pub reload_sec: u64,
    /// Prefer the EDNS Client Subnet address over the transport peer.
    pub use_ecs: bool,
    /// URLs downloaded into `mmdb_path` (which must then be a directory).
    pub download_urls: Vec<String>,
    /// Download interval in seconds (0 = disabled).
    pub download_interval_sec: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,
    /// Log format: text or json.
    pub format: String,
    /// Per-query geo/rule detail in DNS logs.
    pub dns_verbose: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            dns_verbose: false,
        }
    }
}

/// Resource bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Response cache capacity in entries (0 disables the cache).
    pub cache_size: i64,
    /// Per-query DNS handling timeout in seconds.
    pub dns_timeout_sec: u64,
    /// Upstream forwarder exchange timeout in seconds.
    pub forwarder_timeout_sec: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            cache_size: 1024,
            dns_timeout_sec: 2,
            forwarder_timeout_sec: 2,
        }
    }
}

/// SOA synthesis policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SoaConfig {
    /// MNAME template; `{zone}` expands to the zone name without dot.
    pub primary: String,
    /// RNAME template; `{zone}` expands to the zone name without dot.
    pub hostmaster: String,
    /// Synthesize a SOA on the first mutation of a zone lacking one.
    pub auto_on_missing: bool,
}

/// Replication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// `master`, `slave`, `standalone`, or empty (disabled).
    pub mode: String,
    /// Master base URL, required in slave mode.
    pub master_url: String,
    /// Poll interval in seconds for slave mode.
    pub sync_interval_sec: u64,
    /// Bearer token presented to the master.
    pub api_token: String,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// DNS listen address (`host:port`; empty host means all interfaces).
    pub listen: String,
    /// Upstream recursor host; empty disables forwarding.
    pub forwarder: String,
    /// Plaintext API credential (deprecated; prefer `api_token_hash`).
    pub api_token: String,
    /// bcrypt hash of the API credential.
    pub api_token_hash: String,
    /// REST listen address.
    pub rest_listen: String,
    /// TLS certificate file for the REST listener.
    pub tls_cert_file: String,
    /// TLS private key file for the REST listener.
    pub tls_key_file: String,
    /// Certificate reload interval in seconds (0 = no reload).
    pub tls_reload_sec: u64,
    /// CIDRs allowed to reach the REST API (empty = allow all).
    pub allowed_cidrs: Vec<String>,
    /// Fallback TTL applied to imports without one.
    pub default_ttl: u32,
    /// SOA synthesis policy.
    pub soa: SoaConfig,
    /// Store backend.
    pub db: DbConfig,
    /// GeoIP provider.
    pub geoip: GeoIpConfig,
    /// Logging.
    pub log: LogConfig,
    /// Resource bounds.
    pub performance: PerformanceConfig,
    /// Replication.
    pub replication: ReplicationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ":53".to_string(),
            forwarder: String::new(),
            api_token: String::new(),
            api_token_hash: String::new(),
            rest_listen: ":8080".to_string(),
            tls_cert_file: String::new(),
            tls_key_file: String::new(),
            tls_reload_sec: 0,
            allowed_cidrs: Vec::new(),
            default_ttl: 3600,
            soa: SoaConfig::default(),
            db: DbConfig::default(),
            geoip: GeoIpConfig::default(),
            log: LogConfig::default(),
            performance: PerformanceConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a YAML file, applies defaults, validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parses configuration from a YAML string, applies defaults, validates.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(yaml)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Fills empty fields with their documented defaults.
    pub fn apply_defaults(&mut self) {
        if self.listen.is_empty() {
            self.listen = ":53".to_string();
        }
        if self.rest_listen.is_empty() {
            self.rest_listen = ":8080".to_string();
        }
        if self.performance.dns_timeout_sec == 0 {
            self.performance.dns_timeout_sec = 2;
        }
        if self.performance.forwarder_timeout_sec == 0 {
            self.performance.forwarder_timeout_sec = 2;
        }
        if self.replication.mode == "slave" && self.replication.sync_interval_sec == 0 {
            self.replication.sync_interval_sec = 60;
        }
        if self.is_tls_enabled() && self.tls_reload_sec == 0 {
            self.tls_reload_sec = 3600;
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        validate_addr("listen", &self.listen)?;
        validate_addr("rest_listen", &self.rest_listen)?;

        if !self.forwarder.is_empty() && self.forwarder.contains(' ') {
            return Err(ConfigError::invalid("forwarder", "invalid hostname"));
        }

        if self.db.driver.is_empty() {
            return Err(ConfigError::invalid("db.driver", "required"));
        }
        if self.db.dsn.is_empty() {
            return Err(ConfigError::invalid("db.dsn", "required"));
        }

        if self.geoip.enabled && self.geoip.mmdb_path.is_empty() {
            return Err(ConfigError::invalid(
                "geoip.mmdb_path",
                "required when geoip is enabled",
            ));
        }

        if self.performance.cache_size < 0 {
            return Err(ConfigError::invalid(
                "performance.cache_size",
                "must be >= 0",
            ));
        }

        if !self.api_token.is_empty() && !self.api_token_hash.is_empty() {
            return Err(ConfigError::invalid(
                "api_token",
                "cannot set both api_token and api_token_hash",
            ));
        }

        match self.replication.mode.as_str() {
            "" | "master" | "slave" | "standalone" => {}
            other => {
                return Err(ConfigError::invalid(
                    "replication.mode",
                    format!("must be master, slave, standalone or empty (got {:?})", other),
                ));
            }
        }
        if self.replication.mode == "slave" {
            if self.replication.master_url.is_empty() {
                return Err(ConfigError::invalid(
                    "replication.master_url",
                    "required in slave mode",
                ));
            }
            if self.replication.sync_interval_sec == 0 {
                return Err(ConfigError::invalid(
                    "replication.sync_interval_sec",
                    "must be > 0 in slave mode",
                ));
            }
        }

        let cert_set = !self.tls_cert_file.is_empty();
        let key_set = !self.tls_key_file.is_empty();
        if cert_set != key_set {
            return Err(ConfigError::invalid(
                "tls_cert_file",
                "tls_cert_file and tls_key_file must be set together",
            ));
        }
        if cert_set {
            for (field, path) in [
                ("tls_cert_file", &self.tls_cert_file),
                ("tls_key_file", &self.tls_key_file),
            ] {
                if !Path::new(path).exists() {
                    return Err(ConfigError::invalid(field, format!("{}: not found", path)));
                }
            }
        }

        for (i, cidr) in self.allowed_cidrs.iter().enumerate() {
            if cidr.parse::<IpNetwork>().is_err() {
                return Err(ConfigError::invalid(
                    &format!("allowed_cidrs[{}]", i),
                    format!("invalid CIDR {:?}", cidr),
                ));
            }
        }

        Ok(())
    }

    /// Returns true when the REST listener should use TLS.
    pub fn is_tls_enabled(&self) -> bool {
        !self.tls_cert_file.is_empty() && !self.tls_key_file.is_empty()
    }

    /// Returns true when the REST IP ACL is active.
    pub fn has_ip_acl(&self) -> bool {
        !self.allowed_cidrs.is_empty()
    }

    /// Parsed ACL networks. Call after `validate`.
    pub fn acl_networks(&self) -> Vec<IpNetwork> {
        self.allowed_cidrs
            .iter()
            .filter_map(|c| c.parse().ok())
            .collect()
    }

    /// Resolves the DNS listen address to a socket address.
    pub fn dns_addr(&self) -> Result<SocketAddr> {
        parse_listen_addr("listen", &self.listen)
    }

    /// Resolves the REST listen address to a socket address.
    pub fn rest_addr(&self) -> Result<SocketAddr> {
        parse_listen_addr("rest_listen", &self.rest_listen)
    }

    /// TLS cert/key paths when TLS is enabled.
    pub fn tls_paths(&self) -> Option<(PathBuf, PathBuf)> {
        if self.is_tls_enabled() {
            Some((
                PathBuf::from(&self.tls_cert_file),
                PathBuf::from(&self.tls_key_file),
            ))
        } else {
            None
        }
    }
}

/// Splits a `host:port` listen string; an empty host means all interfaces.
fn split_host_port(addr: &str) -> Option<(String, u32)> {
    // Bracketed IPv6 form: [::1]:53
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, port) = rest.split_once("]:")?;
        return Some((host.to_string(), port.parse().ok()?));
    }
    let (host, port) = addr.rsplit_once(':')?;
    Some((host.to_string(), port.parse().ok()?))
}

fn validate_addr(field: &str, addr: &str) -> Result<()> {
    let (host, port) =
        split_host_port(addr).ok_or_else(|| ConfigError::invalid(field, "expected host:port"))?;

    if !(1..=65535).contains(&port) {
        return Err(ConfigError::invalid(
            field,
            format!("port must be between 1 and 65535, got {}", port),
        ));
    }
    if !host.is_empty() && host.parse::<IpAddr>().is_err() && host.contains(' ') {
        return Err(ConfigError::invalid(field, "invalid host"));
    }
    Ok(())
}

fn parse_listen_addr(field: &str, addr: &str) -> Result<SocketAddr> {
    let (host, port) =
        split_host_port(addr).ok_or_else(|| ConfigError::invalid(field, "expected host:port"))?;
    let ip: IpAddr = if host.is_empty() {
        IpAddr::from([0, 0, 0, 0])
    } else {
        host.parse()
            .map_err(|_| ConfigError::invalid(field, format!("unresolvable host {:?}", host)))?
    };
    Ok(SocketAddr::new(ip, port as u16))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        "db:\n  driver: sqlite\n  dsn: \"sqlite::memory:\"\n"
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_yaml(minimal_yaml()).unwrap();
        assert_eq!(config.listen, ":53");
        assert_eq!(config.rest_listen, ":8080");
        assert_eq!(config.performance.cache_size, 1024);
        assert_eq!(config.performance.forwarder_timeout_sec, 2);
    }

    #[test]
    fn test_missing_db_rejected() {
        assert!(Config::from_yaml("listen: \":53\"\n").is_err());
    }

    #[test]
    fn test_port_range_enforced() {
        let yaml = format!("listen: \":70000\"\n{}", minimal_yaml());
        assert!(Config::from_yaml(&yaml).is_err());

        let yaml = format!("listen: \":0\"\n{}", minimal_yaml());
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_bad_cidr_rejected() {
        let yaml = format!("allowed_cidrs: [\"not-a-cidr\"]\n{}", minimal_yaml());
        assert!(Config::from_yaml(&yaml).is_err());

        let yaml = format!(
            "allowed_cidrs: [\"10.0.0.0/8\", \"2001:db8::/32\"]\n{}",
            minimal_yaml()
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert!(config.has_ip_acl());
        assert_eq!(config.acl_networks().len(), 2);
    }

    #[test]
    fn test_token_exclusivity() {
        let yaml = format!(
            "api_token: secret\napi_token_hash: \"$2b$10$abc\"\n{}",
            minimal_yaml()
        );
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_slave_requires_master_url() {
        let yaml = format!("replication:\n  mode: slave\n{}", minimal_yaml());
        assert!(Config::from_yaml(&yaml).is_err());

        let yaml = format!(
            "replication:\n  mode: slave\n  master_url: \"http://master:8080\"\n{}",
            minimal_yaml()
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.replication.sync_interval_sec, 60);
    }

    #[test]
    fn test_tls_requires_both_files() {
        let yaml = format!("tls_cert_file: /nonexistent/cert.pem\n{}", minimal_yaml());
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_geoip_requires_path() {
        let yaml = format!("geoip:\n  enabled: true\n{}", minimal_yaml());
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_listen_addr_resolution() {
        let config = Config::from_yaml(minimal_yaml()).unwrap();
        let addr = config.dns_addr().unwrap();
        assert_eq!(addr.port(), 53);

        let yaml = format!("listen: \"127.0.0.1:5353\"\n{}", minimal_yaml());
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.dns_addr().unwrap().to_string(), "127.0.0.1:5353");

        let yaml = format!("listen: \"[::1]:5353\"\n{}", minimal_yaml());
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.dns_addr().unwrap().port(), 5353);
    }

    #[test]
    fn test_replication_mode_vocabulary() {
        let yaml = format!("replication:\n  mode: chained\n{}", minimal_yaml());
        assert!(Config::from_yaml(&yaml).is_err());
    }
}
