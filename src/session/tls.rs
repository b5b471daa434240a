//! TLS client configuration for the node connection.
//!
//! TLS is enabled as soon as any of root CA, client certificate or client key
//! is configured. Server certificates are always verified.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

use crate::config::{AerospikeConfig, ConfigError};

/// Build the TLS client configuration, or `None` when TLS is not configured.
///
/// The system trust store is a best-effort base; a missing store only degrades
/// to an empty pool. Explicitly configured files that fail to load are fatal.
///
/// # Errors
/// Returns `ConfigError::Tls` when the root CA or the client pair cannot be loaded.
pub fn build_client_config(config: &AerospikeConfig) -> Result<Option<ClientConfig>, ConfigError> {
    if !config.tls_enabled() {
        return Ok(None);
    }

    let mut roots = system_roots();

    if let Some(root_ca) = &config.root_ca {
        let added = append_root_ca(&mut roots, root_ca)?;
        tracing::info!(path = %root_ca.display(), added, "Added server certificate to the pool");
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::ValidationError(format!("tls protocol versions: {e}")))?
        .with_root_certificates(roots);

    let tls = match (&config.cert_file, &config.key_file) {
        (None, None) => builder.with_no_client_auth(),
        (Some(cert_file), Some(key_file)) => {
            let certs = load_certs(cert_file)?;
            let key = PrivateKeyDer::from_pem_file(key_file).map_err(|e| ConfigError::Tls {
                path: key_file.clone(),
                reason: e.to_string(),
            })?;
            let tls = builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ConfigError::Tls {
                    path: cert_file.clone(),
                    reason: e.to_string(),
                })?;
            tracing::info!(path = %cert_file.display(), "Added client certificate");
            tls
        }
        _ => {
            return Err(ConfigError::ValidationError(
                "cert_file and key_file must be configured together".to_string(),
            ));
        }
    };

    Ok(Some(tls))
}

/// Load the platform trust store, falling back to an empty one.
fn system_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();

    for err in &native.errors {
        tracing::info!(error = %err, "Adding system certificates to the cert pool failed");
    }

    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::debug!(added, ignored, "Loaded system certificates");
    roots
}

fn append_root_ca(roots: &mut RootCertStore, path: &Path) -> Result<usize, ConfigError> {
    let certs = load_certs(path)?;
    let mut added = 0;
    for cert in certs {
        roots.add(cert).map_err(|e| ConfigError::Tls {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        added += 1;
    }
    Ok(added)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let tls_err = |reason: String| ConfigError::Tls {
        path: path.to_path_buf(),
        reason,
    };

    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| tls_err(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_err(e.to_string()))?;

    if certs.is_empty() {
        return Err(tls_err("no certificate found".to_string()));
    }
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::client::ResolvesClientCert;
    use std::path::PathBuf;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    #[test]
    fn test_tls_disabled_without_files() {
        let config = AerospikeConfig::default();
        assert!(build_client_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_root_ca_only_is_server_authenticated() {
        let config = AerospikeConfig {
            root_ca: Some(fixture("ca.pem")),
            ..AerospikeConfig::default()
        };

        let tls = build_client_config(&config).unwrap().expect("tls enabled");
        assert!(!tls.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn test_missing_root_ca_is_fatal() {
        let config = AerospikeConfig {
            root_ca: Some(fixture("does-not-exist.pem")),
            ..AerospikeConfig::default()
        };

        let err = build_client_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::Tls { .. }));
        assert!(err.to_string().contains("does-not-exist.pem"));
    }

    #[test]
    fn test_root_ca_without_certificates_is_fatal() {
        let config = AerospikeConfig {
            root_ca: Some(fixture("client.key")),
            ..AerospikeConfig::default()
        };

        assert!(matches!(
            build_client_config(&config),
            Err(ConfigError::Tls { .. })
        ));
    }

    #[test]
    fn test_client_pair_enables_mutual_tls() {
        let config = AerospikeConfig {
            root_ca: Some(fixture("ca.pem")),
            cert_file: Some(fixture("client.pem")),
            key_file: Some(fixture("client.key")),
            ..AerospikeConfig::default()
        };

        let tls = build_client_config(&config).unwrap().expect("tls enabled");
        assert!(tls.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn test_client_pair_without_root_ca_uses_system_roots() {
        let config = AerospikeConfig {
            cert_file: Some(fixture("client.pem")),
            key_file: Some(fixture("client.key")),
            ..AerospikeConfig::default()
        };

        assert!(build_client_config(&config).unwrap().is_some());
    }

    #[test]
    fn test_unreadable_client_key_is_fatal() {
        let config = AerospikeConfig {
            cert_file: Some(fixture("client.pem")),
            key_file: Some(fixture("missing.key")),
            ..AerospikeConfig::default()
        };

        let err = build_client_config(&config).unwrap_err();
        assert!(err.to_string().contains("missing.key"));
    }

    #[test]
    fn test_half_client_pair_rejected() {
        let config = AerospikeConfig {
            cert_file: Some(fixture("client.pem")),
            ..AerospikeConfig::default()
        };

        assert!(build_client_config(&config).is_err());
    }
}
