//! # Secret Reconciler
//!
//! Keeps the certificate Secret present and away from expiry.
//!
//! Each cycle looks at the Secret as it is now:
//! - absent: generate a certificate and create the Secret
//! - certificate unparseable, or expiring within the threshold: regenerate and replace
//!   the Secret's data in place, keeping its metadata
//! - otherwise: nothing to do
//!
//! A new certificate is always generated completely in memory before the single write
//! that stores it, so a failure never leaves a half-written Secret.

use crate::certificate;
use crate::config::{CertificatePolicy, ManagedObjects};
use crate::controller::client::ObjectClient;
use crate::controller::runner::Reconcile;
use crate::controller::types::ReconcilerError;
use crate::observability::{self, RotationReason};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const CONTROLLER_NAME: &str = "secret";

pub struct SecretReconciler {
    client: Arc<dyn ObjectClient<Secret>>,
    objects: ManagedObjects,
    policy: CertificatePolicy,
}

impl std::fmt::Debug for SecretReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretReconciler")
            .field("objects", &self.objects)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SecretReconciler {
    pub fn new(
        client: Arc<dyn ObjectClient<Secret>>,
        objects: ManagedObjects,
        policy: CertificatePolicy,
    ) -> Self {
        Self {
            client,
            objects,
            policy,
        }
    }

    /// Fresh certificate data valid from now
    fn certificate_data(
        &self,
    ) -> Result<std::collections::BTreeMap<String, k8s_openapi::ByteString>, ReconcilerError> {
        let (not_before, not_after) = self.policy.window(Utc::now());
        Ok(certificate::generate_secret_data(
            &self.objects.certificate_hosts(),
            not_before,
            not_after,
        )?)
    }

    async fn create(&self) -> Result<(), ReconcilerError> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(self.objects.secret_name.clone()),
                namespace: Some(self.objects.namespace.clone()),
                ..Default::default()
            },
            data: Some(self.certificate_data()?),
            ..Default::default()
        };
        let created = self.client.create(&secret).await?;
        self.record_rotation(&created, RotationReason::Created);
        Ok(())
    }

    /// Replace the certificate of `current`, keeping its identity and metadata
    async fn rotate(&self, current: Secret, reason: RotationReason) -> Result<(), ReconcilerError> {
        let mut updated = current;
        updated.data = Some(self.certificate_data()?);
        updated.string_data = None;
        let replaced = self.client.replace(&updated).await?;
        self.record_rotation(&replaced, reason);
        Ok(())
    }

    fn record_rotation(&self, secret: &Secret, reason: RotationReason) {
        observability::metrics::increment_certificate_rotations(reason);
        match certificate::secret_time_until_expiry(secret) {
            Ok(remaining) => {
                observability::metrics::set_certificate_expiry(remaining);
                info!(
                    secret.namespace = %self.objects.namespace,
                    secret.name = %self.objects.secret_name,
                    reason = reason.as_str(),
                    expires_in = %remaining,
                    "Wrote new webhook certificate"
                );
            }
            Err(e) => {
                warn!(
                    secret.name = %self.objects.secret_name,
                    "Wrote new webhook certificate but could not read it back: {}", e
                );
            }
        }
    }
}

#[async_trait]
impl Reconcile for SecretReconciler {
    fn name(&self) -> &'static str {
        CONTROLLER_NAME
    }

    async fn reconcile(&self) -> Result<(), ReconcilerError> {
        let Some(current) = self.client.get().await? else {
            info!(
                secret.namespace = %self.objects.namespace,
                secret.name = %self.objects.secret_name,
                "Certificate secret not found, creating it"
            );
            return self.create().await;
        };

        match certificate::secret_time_until_expiry(&current) {
            Ok(remaining) if remaining >= self.policy.expiration_threshold => {
                observability::metrics::set_certificate_expiry(remaining);
                debug!(expires_in = %remaining, "Certificate is valid");
                Ok(())
            }
            Ok(remaining) => {
                info!(
                    expires_in = %remaining,
                    threshold = %self.policy.expiration_threshold,
                    "Certificate is about to expire, regenerating"
                );
                self.rotate(current, RotationReason::Expiring).await
            }
            Err(e) => {
                warn!(
                    secret.name = %self.objects.secret_name,
                    "Stored certificate is unusable, regenerating: {}", e
                );
                self.rotate(current, RotationReason::Unparseable).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CERT_KEY, KEY_KEY};
    use crate::controller::backoff::ExponentialBackoff;
    use crate::controller::client::FakeApi;
    use crate::controller::events::object_changes;
    use crate::controller::runner::testing::{eventually, run_applier};
    use crate::controller::runner::{anchor_ref, Context};
    use futures::channel::mpsc;
    use futures::TryStreamExt;
    use k8s_openapi::ByteString;
    use kube_runtime::watcher;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn reconciler(api: &Arc<FakeApi<Secret>>) -> SecretReconciler {
        let client: Arc<dyn ObjectClient<Secret>> = Arc::<FakeApi<Secret>>::clone(api);
        SecretReconciler::new(client, ManagedObjects::default(), CertificatePolicy::default())
    }

    fn secret_with_data(data: BTreeMap<String, ByteString>) -> Secret {
        let objects = ManagedObjects::default();
        Secret {
            metadata: ObjectMeta {
                name: Some(objects.secret_name),
                namespace: Some(objects.namespace),
                labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    "node-ip-webhook".to_string(),
                )])),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    fn secret_valid_for(validity: chrono::Duration) -> Secret {
        let now = Utc::now();
        let hosts = ManagedObjects::default().certificate_hosts();
        let data = certificate::generate_secret_data(&hosts, now, now + validity).unwrap();
        secret_with_data(data)
    }

    fn stored(api: &FakeApi<Secret>) -> Secret {
        api.current().expect("secret should exist")
    }

    fn remaining(secret: &Secret) -> chrono::Duration {
        certificate::secret_time_until_expiry(secret).unwrap()
    }

    #[tokio::test]
    async fn test_creates_missing_secret() {
        let api = Arc::new(FakeApi::empty());
        reconciler(&api).reconcile().await.unwrap();

        let secret = stored(&api);
        assert_eq!(secret.metadata.name.as_deref(), Some("webhook-cert"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("node-ip-webhook"));
        assert!(remaining(&secret) >= chrono::Duration::days(364));
        // The stored pair is servable
        certificate::secret_key_pair(&secret).unwrap();
    }

    #[tokio::test]
    async fn test_valid_secret_is_left_untouched() {
        let api = Arc::new(FakeApi::empty());
        let reconciler = reconciler(&api);
        reconciler.reconcile().await.unwrap();
        let before = stored(&api);

        reconciler.reconcile().await.unwrap();
        reconciler.reconcile().await.unwrap();

        assert_eq!(api.writes(), 1);
        assert_eq!(stored(&api), before);
    }

    #[tokio::test]
    async fn test_rotates_expiring_certificate() {
        let original = secret_valid_for(chrono::Duration::minutes(5));
        let api = Arc::new(FakeApi::new(Some(original.clone())));

        reconciler(&api).reconcile().await.unwrap();

        let secret = stored(&api);
        assert_ne!(secret.data, original.data);
        assert!(remaining(&secret) >= chrono::Duration::days(364));
        // Identity and metadata survive the rotation
        assert_eq!(secret.metadata.labels, original.metadata.labels);
        assert_eq!(api.writes(), 1);
    }

    #[tokio::test]
    async fn test_certificate_just_above_threshold_is_kept() {
        let api = Arc::new(FakeApi::new(Some(secret_valid_for(chrono::Duration::days(31)))));
        reconciler(&api).reconcile().await.unwrap();
        assert_eq!(api.writes(), 0);
    }

    #[tokio::test]
    async fn test_regenerates_unparseable_certificate() {
        let garbage = secret_with_data(BTreeMap::from([
            (CERT_KEY.to_string(), ByteString(b"not a certificate".to_vec())),
            (KEY_KEY.to_string(), ByteString(b"not a key".to_vec())),
        ]));
        let api = Arc::new(FakeApi::new(Some(garbage)));

        reconciler(&api).reconcile().await.unwrap();

        assert!(remaining(&stored(&api)) >= chrono::Duration::days(364));
    }

    #[tokio::test]
    async fn test_regenerates_secret_without_certificate_entry() {
        let api = Arc::new(FakeApi::new(Some(secret_with_data(BTreeMap::new()))));

        reconciler(&api).reconcile().await.unwrap();

        let secret = stored(&api);
        let data = secret.data.as_ref().unwrap();
        assert!(data.contains_key(CERT_KEY));
        assert!(data.contains_key(KEY_KEY));
    }

    #[tokio::test]
    async fn test_api_error_is_surfaced() {
        let api = Arc::new(FakeApi::empty());
        api.fail_writes(500);
        let reconciler = reconciler(&api);

        let err = reconciler.reconcile().await.unwrap_err();
        assert!(matches!(err, ReconcilerError::Kube(_)));
        assert!(api.current().is_none());

        // Next cycle after recovery converges
        api.heal();
        reconciler.reconcile().await.unwrap();
        assert!(api.current().is_some());
    }

    #[tokio::test]
    async fn test_recreates_secret_deleted_out_of_band() {
        let api = Arc::new(FakeApi::empty());
        let reconciler = reconciler(&api);
        reconciler.reconcile().await.unwrap();

        api.delete();
        reconciler.reconcile().await.unwrap();

        assert_eq!(api.writes(), 2);
        assert!(remaining(&stored(&api)) >= chrono::Duration::days(364));
    }

    #[tokio::test]
    async fn test_threshold_above_validity_does_not_rotate_every_cycle() {
        let policy = CertificatePolicy {
            validity: chrono::Duration::days(10),
            ..CertificatePolicy::default()
        }
        .validated();
        let api = Arc::new(FakeApi::empty());
        let client: Arc<dyn ObjectClient<Secret>> = Arc::<FakeApi<Secret>>::clone(&api);
        let reconciler = SecretReconciler::new(client, ManagedObjects::default(), policy);

        for _ in 0..5 {
            reconciler.reconcile().await.unwrap();
        }

        assert_eq!(api.writes(), 1);
    }

    #[tokio::test]
    async fn test_watched_delete_recreates_secret() {
        let objects = ManagedObjects::default();
        let api = Arc::new(FakeApi::empty());
        let ctx = Arc::new(Context::new(
            reconciler(&api),
            ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1)),
        ));

        let (events, watch) = mpsc::unbounded::<Result<watcher::Event<Secret>, watcher::Error>>();
        let anchor = anchor_ref(&objects.namespace);
        let triggers = object_changes(
            watch,
            Some(objects.namespace.clone()),
            objects.secret_name.clone(),
        )
        .map_ok(move |_| anchor.clone());

        let driver = async {
            // Initial list of an empty namespace triggers nothing
            for event in [watcher::Event::Init, watcher::Event::InitDone] {
                events.unbounded_send(Ok(event)).unwrap();
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(api.writes(), 0);

            // Creation arrives as a watch event
            api.set(secret_valid_for(chrono::Duration::days(365)));
            let created = stored(&api);
            events
                .unbounded_send(Ok(watcher::Event::Apply(created.clone())))
                .unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(stored(&api), created);

            api.delete();
            let mut deleted = created.clone();
            // The API server stamps the delete with a new resourceVersion
            deleted.metadata.resource_version = Some("100".to_string());
            events
                .unbounded_send(Ok(watcher::Event::Delete(deleted)))
                .unwrap();
            eventually(|| api.current().is_some()).await;
            assert_ne!(stored(&api).data, created.data);

            events.close_channel();
        };

        futures::join!(run_applier(Arc::clone(&ctx), &objects.namespace, triggers), driver);
        assert_eq!(ctx.failures(), 0);
    }
}
