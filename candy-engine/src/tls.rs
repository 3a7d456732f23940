//! Local TLS issuer
//!
//! Per-host self-signed certificates, generated in memory on first handshake
//! and cached. The subject set is swapped on reload; hosts that leave the
//! set lose their cached certificate.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::EngineError;

pub(crate) struct LocalIssuer {
    subjects: RwLock<HashSet<String>>,
    certs: RwLock<HashMap<String, Arc<CertifiedKey>>>,
}

impl LocalIssuer {
    pub(crate) fn new() -> Self {
        Self {
            subjects: RwLock::new(HashSet::new()),
            certs: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the subject set. Cached certificates for dropped subjects
    /// are evicted so a later re-add gets a fresh leaf.
    pub(crate) fn set_subjects(&self, subjects: impl IntoIterator<Item = String>) {
        let subjects: HashSet<String> = subjects.into_iter().collect();
        self.certs.write().retain(|host, _| subjects.contains(host));
        *self.subjects.write() = subjects;
    }

    /// Generates a self-signed leaf for one host.
    pub(crate) fn issue(&self, host: &str) -> Result<Arc<CertifiedKey>, EngineError> {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec![host.to_string()])
                .map_err(|err| EngineError::Tls(format!("failed to issue cert for {host}: {err}")))?;

        let key = rustls::pki_types::PrivateKeyDer::Pkcs8(key_pair.serialize_der().into());
        let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)
            .map_err(|err| EngineError::Tls(format!("unsupported key type: {err}")))?;

        Ok(Arc::new(CertifiedKey::new(
            vec![cert.der().clone()],
            signing_key,
        )))
    }

    /// Builds the rustls server config backed by this issuer.
    pub(crate) fn server_config(self: &Arc<Self>) -> Result<rustls::ServerConfig, EngineError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|err| EngineError::Tls(err.to_string()))?
            .with_no_client_auth()
            .with_cert_resolver(self.clone() as Arc<dyn ResolvesServerCert>);
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }
}

impl ResolvesServerCert for LocalIssuer {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let host = client_hello.server_name()?.to_ascii_lowercase();
        if !self.subjects.read().contains(&host) {
            return None;
        }

        if let Some(cert) = self.certs.read().get(&host) {
            return Some(cert.clone());
        }

        match self.issue(&host) {
            Ok(cert) => {
                tracing::debug!(%host, "issued self-signed certificate");
                self.certs.write().insert(host, cert.clone());
                Some(cert)
            }
            Err(err) => {
                tracing::warn!(%host, %err, "certificate issuance failed");
                None
            }
        }
    }
}

impl fmt::Debug for LocalIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalIssuer")
            .field("subjects", &self.subjects.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_a_leaf_per_host() {
        let issuer = LocalIssuer::new();
        let cert = issuer.issue("app.test").unwrap();
        assert_eq!(cert.cert.len(), 1);
        assert!(!cert.cert[0].is_empty());
    }

    #[test]
    fn evicts_certs_for_dropped_subjects() {
        let issuer = LocalIssuer::new();
        issuer.set_subjects(vec!["app.test".to_string()]);
        issuer
            .certs
            .write()
            .insert("app.test".to_string(), issuer.issue("app.test").unwrap());

        issuer.set_subjects(vec!["other.test".to_string()]);
        assert!(issuer.certs.read().is_empty());
    }
}
