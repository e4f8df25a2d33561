//! # TLS
//!
//! Serves the certificate stored in the managed Secret.
//!
//! The key pair is looked up on every handshake, so a rotated certificate is served
//! as soon as the Secret watch delivers it, without restarting. Parsing is cached per
//! `resourceVersion`. While the Secret is missing or holds an unusable pair, the last
//! good key pair keeps being served.

use crate::certificate;
use k8s_openapi::api::core::v1::Secret;
use kube_runtime::reflector::{ObjectRef, Store};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct ResolverState {
    /// Last key pair that parsed, with the version it came from
    current: Option<(Option<String>, Arc<CertifiedKey>)>,
    /// Version that failed to parse, so the failure is logged once
    failed_version: Option<Option<String>>,
}

/// [`ResolvesServerCert`] backed by the reflector store of the certificate Secret
pub struct SecretCertResolver {
    store: Store<Secret>,
    secret: ObjectRef<Secret>,
    state: Mutex<ResolverState>,
}

impl std::fmt::Debug for SecretCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCertResolver")
            .field("secret", &self.secret)
            .finish_non_exhaustive()
    }
}

impl SecretCertResolver {
    pub fn new(store: Store<Secret>, namespace: &str, name: &str) -> Self {
        Self {
            store,
            secret: ObjectRef::new(name).within(namespace),
            state: Mutex::new(ResolverState::default()),
        }
    }

    /// Key pair to present right now, `None` if no usable one was ever seen
    pub fn current_key(&self) -> Option<Arc<CertifiedKey>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let last_good = state.current.as_ref().map(|(_, key)| Arc::clone(key));

        let Some(secret) = self.store.get(&self.secret) else {
            if last_good.is_none() {
                warn!(secret = %self.secret, "Certificate secret not available, cannot complete handshake");
            }
            return last_good;
        };
        let version = secret.metadata.resource_version.clone();

        if let Some((cached_version, key)) = state.current.as_ref() {
            if *cached_version == version {
                return Some(Arc::clone(key));
            }
        }
        if state.failed_version.as_ref() == Some(&version) {
            return last_good;
        }

        match certificate::secret_key_pair(&secret) {
            Ok(key) => {
                info!(
                    secret = %self.secret,
                    resource_version = version.as_deref().unwrap_or_default(),
                    "Loaded serving certificate"
                );
                state.current = Some((version, Arc::clone(&key)));
                state.failed_version = None;
                Some(key)
            }
            Err(e) => {
                warn!(
                    secret = %self.secret,
                    "Stored key pair is unusable, serving the previous one: {}", e
                );
                state.failed_version = Some(version);
                last_good
            }
        }
    }
}

impl ResolvesServerCert for SecretCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.current_key()
    }
}

/// rustls server configuration resolving certificates through `resolver`
pub fn server_config(resolver: Arc<SecretCertResolver>) -> Result<ServerConfig, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}
