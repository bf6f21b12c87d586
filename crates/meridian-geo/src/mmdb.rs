//! MMDB-backed provider with hot reload and auto-download.

use crate::{GeoError, GeoInfo, Provider, Result};
use arc_swap::ArcSwap;
use maxminddb::{geoip2, Reader};
use parking_lot::Mutex;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// One generation of opened readers. Country and ASN lookups may come
/// from different files; either may be absent.
#[derive(Default)]
struct ReaderSet {
    country: Option<Reader<Vec<u8>>>,
    asn: Option<Reader<Vec<u8>>>,
}

/// Source-file fingerprint used to detect changes between reload polls.
type Fingerprint = Vec<(PathBuf, SystemTime, u64)>;

/// GeoIP provider backed by one or more MaxMind databases.
///
/// `path` is either a single `.mmdb` file or a directory scanned for
/// `*.mmdb`. Files are classified by their MMDB metadata `database_type`:
/// Country and City databases feed country/continent, ASN databases feed
/// the ASN. Lookups combine both.
pub struct MmdbProvider {
    path: PathBuf,
    readers: ArcSwap<ReaderSet>,
    fingerprint: Mutex<Fingerprint>,
}

impl MmdbProvider {
    /// Opens the databases under `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (readers, fingerprint) = load_readers(&path)?;
        Ok(Self {
            path,
            readers: ArcSwap::new(Arc::new(readers)),
            fingerprint: Mutex::new(fingerprint),
        })
    }

    /// Re-stats the source files and reopens them when their content
    /// changed. Returns true when a new snapshot was installed.
    pub fn reload_if_changed(&self) -> Result<bool> {
        let current = stat_sources(&self.path)?;
        {
            let last = self.fingerprint.lock();
            if *last == current {
                return Ok(false);
            }
        }

        let (readers, fingerprint) = load_readers(&self.path)?;
        self.readers.store(Arc::new(readers));
        *self.fingerprint.lock() = fingerprint;
        info!(path = %self.path.display(), "GeoIP databases reloaded");
        Ok(true)
    }

    /// Spawns a periodic reload task bound to the shutdown signal.
    pub fn spawn_reload_task(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = provider.reload_if_changed() {
                            warn!(error = %e, "GeoIP reload failed; keeping previous databases");
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("GeoIP reload task stopping");
                        break;
                    }
                }
            }
        });
    }

    /// Spawns the periodic download task. Each URL is fetched into the
    /// provider directory; a successful batch triggers a reload check.
    pub fn spawn_download_task(
        self: &Arc<Self>,
        urls: Vec<String>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            let client = reqwest::Client::new();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        provider.download_all(&client, &urls).await;
                    }
                    _ = shutdown.recv() => {
                        debug!("GeoIP download task stopping");
                        break;
                    }
                }
            }
        });
    }

    /// Downloads every URL, then reloads when anything changed. Failures
    /// log and leave the previous snapshot serving.
    pub async fn download_all(&self, client: &reqwest::Client, urls: &[String]) {
        for url in urls {
            match self.download_one(client, url).await {
                Ok(target) => {
                    debug!(url = %url, target = %target.display(), "GeoIP database downloaded")
                }
                Err(e) => warn!(url = %url, error = %e, "GeoIP download failed"),
            }
        }
        if let Err(e) = self.reload_if_changed() {
            warn!(error = %e, "GeoIP reload after download failed");
        }
    }

    async fn download_one(&self, client: &reqwest::Client, url: &str) -> Result<PathBuf> {
        // A temp file plus rename keeps a concurrent reload from ever
        // seeing a partial database.
        let target = download_target(&self.path, url);
        download_file(client, url, &target).await?;
        Ok(target)
    }

    /// Downloads any URL whose target file is missing, then reloads.
    /// Used at startup.
    pub async fn download_missing(&self, urls: &[String]) {
        fetch_missing(&self.path, urls).await;
        if let Err(e) = self.reload_if_changed() {
            warn!(error = %e, "GeoIP reload after initial download failed");
        }
    }
}

/// Resolves the download target for a URL under `base` (a directory gets
/// the URL's basename, a file path is used as-is).
fn download_target(base: &Path, url: &str) -> PathBuf {
    let filename = url
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("geoip.mmdb");
    if base.is_dir() {
        base.join(filename)
    } else {
        base.to_path_buf()
    }
}

/// Downloads every URL whose target under `base` does not exist yet.
/// Failures log; usable before a provider has been opened.
pub async fn fetch_missing(base: &Path, urls: &[String]) {
    let client = reqwest::Client::new();
    for url in urls {
        let target = download_target(base, url);
        if target.exists() {
            continue;
        }
        match download_file(&client, url, &target).await {
            Ok(()) => info!(target = %target.display(), "GeoIP database fetched"),
            Err(e) => warn!(url = %url, error = %e, "initial GeoIP download failed"),
        }
    }
}

/// Downloads one URL to `target` via a temp file and atomic rename.
async fn download_file(client: &reqwest::Client, url: &str, target: &Path) -> Result<()> {
    let response = client.get(url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?;

    let tmp = target.with_extension("mmdb.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, target).await?;
    Ok(())
}

impl Provider for MmdbProvider {
    fn lookup(&self, ip: Option<IpAddr>) -> GeoInfo {
        let Some(ip) = ip else {
            return GeoInfo::default();
        };
        let readers = self.readers.load();
        let mut info = GeoInfo::default();

        if let Some(reader) = &readers.country {
            if let Ok(country) = reader.lookup::<geoip2::Country>(ip) {
                if let Some(code) = country.country.and_then(|c| c.iso_code) {
                    info.country = code.to_ascii_uppercase();
                }
                if let Some(code) = country.continent.and_then(|c| c.code) {
                    info.continent = code.to_ascii_uppercase();
                }
            }
        }
        if let Some(reader) = &readers.asn {
            if let Ok(asn) = reader.lookup::<geoip2::Asn>(ip) {
                info.asn = asn.autonomous_system_number.unwrap_or(0);
            }
        }
        info
    }
}

/// Lists the MMDB source files for a path (single file or directory scan).
fn source_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if path.is_dir() {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let p = entry.path();
            if p.extension().and_then(|e| e.to_str()) == Some("mmdb") {
                files.push(p);
            }
        }
        files.sort();
        return Ok(files);
    }
    Ok(Vec::new())
}

fn stat_sources(path: &Path) -> Result<Fingerprint> {
    let mut fingerprint = Vec::new();
    for file in source_files(path)? {
        let meta = std::fs::metadata(&file)?;
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        fingerprint.push((file, mtime, meta.len()));
    }
    Ok(fingerprint)
}

fn load_readers(path: &Path) -> Result<(ReaderSet, Fingerprint)> {
    let files = source_files(path)?;
    let mut set = ReaderSet::default();

    for file in &files {
        let reader = match Reader::open_readfile(file) {
            Ok(r) => r,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "skipping unreadable MMDB");
                continue;
            }
        };
        let db_type = reader.metadata.database_type.clone();
        if db_type.contains("ASN") {
            debug!(file = %file.display(), db_type = %db_type, "loaded ASN database");
            set.asn = Some(reader);
        } else if db_type.contains("Country") || db_type.contains("City") {
            debug!(file = %file.display(), db_type = %db_type, "loaded country database");
            set.country = Some(reader);
        } else {
            warn!(file = %file.display(), db_type = %db_type, "unrecognized MMDB type");
        }
    }

    if set.country.is_none() && set.asn.is_none() {
        return Err(GeoError::NoDatabases(path.display().to_string()));
    }
    Ok((set, stat_sources(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_path_fails() {
        assert!(MmdbProvider::open("/nonexistent/geoip").is_err());
    }

    #[test]
    fn test_source_files_on_empty_dir() {
        let dir = std::env::temp_dir().join("meridian-geo-empty-test");
        let _ = std::fs::create_dir_all(&dir);
        let files = source_files(&dir).unwrap();
        assert!(files.is_empty());
        // No databases means open() must fail rather than serve nothing.
        assert!(MmdbProvider::open(&dir).is_err());
        let _ = std::fs::remove_dir(&dir);
    }
}
