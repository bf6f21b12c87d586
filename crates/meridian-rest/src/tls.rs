//! TLS serving with periodic certificate reload.
//!
//! The rustls `ServerConfig` lives behind an `ArcSwap`; the accept loop
//! builds its acceptor from the current snapshot per connection, so a
//! reload takes effect for the next handshake without dropping
//! established connections.

use arc_swap::ArcSwap;
use axum::extract::ConnectInfo;
use axum::Extension;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::CertificateDer;
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// ALPN protocol identifiers.
const ALPN_H2: &[u8] = b"h2";
const ALPN_HTTP11: &[u8] = b"http/1.1";

/// Holds the current TLS configuration and reloads it from disk.
pub struct CertReloader {
    cert_path: PathBuf,
    key_path: PathBuf,
    config: ArcSwap<ServerConfig>,
}

impl CertReloader {
    /// Loads the initial certificate and key.
    pub fn new(cert_path: &Path, key_path: &Path) -> std::io::Result<Self> {
        let config = load_tls_config(cert_path, key_path)?;
        Ok(Self {
            cert_path: cert_path.to_path_buf(),
            key_path: key_path.to_path_buf(),
            config: ArcSwap::new(config),
        })
    }

    /// Current TLS configuration snapshot.
    pub fn current(&self) -> Arc<ServerConfig> {
        self.config.load_full()
    }

    /// Re-reads the certificate files. A failed reload logs and keeps
    /// the previous configuration serving.
    pub fn reload(&self) {
        match load_tls_config(&self.cert_path, &self.key_path) {
            Ok(config) => {
                self.config.store(config);
                info!(cert = %self.cert_path.display(), "TLS certificate reloaded");
            }
            Err(e) => {
                warn!(error = %e, "TLS certificate reload failed; keeping previous");
            }
        }
    }

    /// Spawns the periodic reload task bound to the shutdown signal.
    pub fn spawn_reload_task(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let reloader = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => reloader.reload(),
                    _ = shutdown.recv() => {
                        debug!("TLS reload task stopping");
                        break;
                    }
                }
            }
        });
    }
}

/// Loads a rustls server configuration from PEM files. TLS 1.2 is the
/// floor; ALPN offers HTTP/2 with an HTTP/1.1 fallback.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> std::io::Result<Arc<ServerConfig>> {
    let cert_file = File::open(cert_path)?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if certs.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "no certificates found",
        ));
    }

    let key_file = File::open(key_path)?;
    let mut key_reader = BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)?.ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "no private key found")
    })?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    config.alpn_protocols = vec![ALPN_H2.to_vec(), ALPN_HTTP11.to_vec()];

    Ok(Arc::new(config))
}

/// Accept loop for the HTTPS control plane.
pub async fn serve_tls(
    listener: TcpListener,
    reloader: Arc<CertReloader>,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "error accepting TLS connection");
                        continue;
                    }
                };

                let acceptor = TlsAcceptor::from(reloader.current());
                // Make the peer address visible to the ACL middleware,
                // matching what into_make_service_with_connect_info does.
                let service = router
                    .clone()
                    .layer(Extension(ConnectInfo::<SocketAddr>(peer)));

                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(s) => s,
                        Err(e) => {
                            debug!(error = %e, client = %peer, "TLS handshake failed");
                            return;
                        }
                    };

                    let io = TokioIo::new(tls_stream);
                    let builder = ConnectionBuilder::new(TokioExecutor::new());
                    let hyper_service = TowerToHyperService::new(service);
                    if let Err(e) = builder.serve_connection_with_upgrades(io, hyper_service).await {
                        debug!(error = %e, client = %peer, "HTTPS connection ended");
                    }
                });
            }
            _ = shutdown.recv() => {
                info!("HTTPS listener stopping");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn install_crypto_provider() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    fn generate_test_cert() -> (NamedTempFile, NamedTempFile) {
        use rcgen::{generate_simple_self_signed, CertifiedKey};

        let subject_alt_names = vec!["localhost".to_string(), "127.0.0.1".to_string()];
        let CertifiedKey { cert, key_pair } =
            generate_simple_self_signed(subject_alt_names).unwrap();

        let mut cert_file = NamedTempFile::new().unwrap();
        cert_file.write_all(cert.pem().as_bytes()).unwrap();

        let mut key_file = NamedTempFile::new().unwrap();
        key_file
            .write_all(key_pair.serialize_pem().as_bytes())
            .unwrap();

        (cert_file, key_file)
    }

    #[test]
    fn test_load_tls_config() {
        install_crypto_provider();
        let (cert, key) = generate_test_cert();
        let config = load_tls_config(cert.path(), key.path()).unwrap();
        assert!(config.alpn_protocols.contains(&ALPN_H2.to_vec()));
    }

    #[test]
    fn test_reloader_keeps_previous_on_failure() {
        install_crypto_provider();
        let (cert, key) = generate_test_cert();
        let reloader = CertReloader::new(cert.path(), key.path()).unwrap();
        let before = reloader.current();

        // Corrupt the cert file; reload must keep the old snapshot.
        std::fs::write(cert.path(), "garbage").unwrap();
        reloader.reload();
        let after = reloader.current();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_reloader_swaps_on_change() {
        install_crypto_provider();
        let (cert, key) = generate_test_cert();
        let reloader = CertReloader::new(cert.path(), key.path()).unwrap();
        let before = reloader.current();

        let (new_cert, new_key) = generate_test_cert();
        std::fs::copy(new_cert.path(), cert.path()).unwrap();
        std::fs::copy(new_key.path(), key.path()).unwrap();
        reloader.reload();

        assert!(!Arc::ptr_eq(&before, &reloader.current()));
    }

    #[test]
    fn test_missing_cert_rejected() {
        assert!(CertReloader::new(Path::new("/nonexistent/cert.pem"), Path::new("/nonexistent/key.pem")).is_err());
    }
}
