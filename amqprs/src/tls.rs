//! TLS transport (feature `tls`, spec §6 `amqps://`): builds a
//! `rustls::ClientConfig` from an optional CA bundle and optional client
//! certificate, and wraps a connected `TcpStream` into a
//! `tokio_rustls::client::TlsStream`.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::net::TcpStream;
use tokio_rustls::rustls::client::{ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::{self, Certificate, OwnedTrustAnchor, PrivateKey, RootCertStore, ServerName};
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::error::{Error, Result};

fn tls_err(what: impl std::fmt::Display) -> Error {
    Error::Tls(what.to_string())
}

/// Accepts any certificate chain: backs the `verify=false` query option
/// (spec §6). Never used unless the caller explicitly opts out of
/// verification.
struct NoCertVerification;

impl ServerCertVerifier for NoCertVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

fn default_root_store() -> RootCertStore {
    let mut store = RootCertStore::empty();
    store.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(ta.subject, ta.spki, ta.name_constraints)
    }));
    store
}

fn load_root_store(ca_cert_path: &Path) -> Result<RootCertStore> {
    let file = std::fs::File::open(ca_cert_path).map_err(|e| tls_err(format!("opening CA cert {}: {e}", ca_cert_path.display())))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader).map_err(|e| tls_err(format!("parsing CA cert: {e}")))?;
    let mut store = RootCertStore::empty();
    for cert in certs {
        store.add(&Certificate(cert)).map_err(|e| tls_err(format!("adding CA cert to trust store: {e}")))?;
    }
    Ok(store)
}

fn load_client_cert_key(cert_path: &Path, key_path: &Path) -> Result<(Vec<Certificate>, PrivateKey)> {
    let cert_file = std::fs::File::open(cert_path).map_err(|e| tls_err(format!("opening client cert {}: {e}", cert_path.display())))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .map_err(|e| tls_err(format!("parsing client cert: {e}")))?
        .into_iter()
        .map(Certificate)
        .collect();

    let key_file = std::fs::File::open(key_path).map_err(|e| tls_err(format!("opening client key {}: {e}", key_path.display())))?;
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(key_file)).map_err(|e| tls_err(format!("parsing client key: {e}")))?;
    let key = keys.pop().ok_or_else(|| tls_err("no private key found in client key file"))?;
    Ok((certs, PrivateKey(key)))
}

/// Configuration for opening a TLS connection (spec §6 `amqps://`).
/// Construct with [`TlsAdaptor::without_client_auth`] or
/// [`TlsAdaptor::with_client_auth`], then pass to
/// [`crate::OpenConnectionArguments::tls_adaptor`].
#[derive(Clone)]
pub struct TlsAdaptor {
    config: Arc<rustls::ClientConfig>,
    /// Override for the certificate-verification domain name, for when it
    /// differs from the connection's `host`.
    domain: Option<String>,
}

impl TlsAdaptor {
    /// Trust the platform's bundled CA roots (feature-carried via
    /// `webpki-roots`) when `ca_cert_path` is `None`, otherwise trust only
    /// the certificates in the given PEM file. `verify=false` disables
    /// peer certificate verification entirely (spec §6 `verify` query
    /// option) — only intended for testing against a broker with a
    /// self-signed or otherwise untrusted certificate.
    pub fn without_client_auth(ca_cert_path: Option<&Path>, domain: Option<&str>) -> Result<Self> {
        Self::without_client_auth_verify(ca_cert_path, domain, true)
    }

    pub fn without_client_auth_verify(ca_cert_path: Option<&Path>, domain: Option<&str>, verify: bool) -> Result<Self> {
        let root_store = match ca_cert_path {
            Some(path) => load_root_store(path)?,
            None => default_root_store(),
        };
        let mut config = rustls::ClientConfig::builder().with_safe_defaults().with_root_certificates(root_store).with_no_client_auth();
        if !verify {
            config.dangerous().set_certificate_verifier(Arc::new(NoCertVerification));
        }
        Ok(Self { config: Arc::new(config), domain: domain.map(str::to_string) })
    }

    /// Like [`without_client_auth`](Self::without_client_auth) but also
    /// presents a client certificate for mutual TLS.
    pub fn with_client_auth(ca_cert_path: Option<&Path>, client_cert_path: &Path, client_key_path: &Path, domain: Option<&str>) -> Result<Self> {
        Self::with_client_auth_verify(ca_cert_path, client_cert_path, client_key_path, domain, true)
    }

    pub fn with_client_auth_verify(
        ca_cert_path: Option<&Path>,
        client_cert_path: &Path,
        client_key_path: &Path,
        domain: Option<&str>,
        verify: bool,
    ) -> Result<Self> {
        let root_store = match ca_cert_path {
            Some(path) => load_root_store(path)?,
            None => default_root_store(),
        };
        let (certs, key) = load_client_cert_key(client_cert_path, client_key_path)?;
        let mut config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_single_cert(certs, key)
            .map_err(|e| tls_err(format!("invalid client certificate/key: {e}")))?;
        if !verify {
            config.dangerous().set_certificate_verifier(Arc::new(NoCertVerification));
        }
        Ok(Self { config: Arc::new(config), domain: domain.map(str::to_string) })
    }

    pub(crate) async fn connect(&self, host: &str, tcp: TcpStream) -> Result<TlsStream<TcpStream>> {
        let domain = self.domain.as_deref().unwrap_or(host);
        let server_name = ServerName::try_from(domain).map_err(|e| tls_err(format!("invalid server name {domain}: {e}")))?;
        let connector = TlsConnector::from(self.config.clone());
        connector.connect(server_name, tcp).await.map_err(|e| tls_err(format!("TLS handshake with {domain} failed: {e}")))
    }
}
