//! # Webhook Reconciler
//!
//! Keeps the MutatingWebhookConfiguration pointing at the admission Service with the
//! current certificate as its CA bundle.
//!
//! Each cycle recomputes the desired webhook list from the Secret and writes it,
//! creating the configuration if it is missing. An existing configuration is always
//! rewritten, even if nothing changed: the API server absorbs no-op writes and this
//! avoids a diff that would have to know about server-side defaulting. A no-op write
//! keeps the resourceVersion, so it does not trigger another cycle.
//!
//! Without a readable certificate there is nothing to point the webhook at, so a
//! missing Secret or a broken `cert.pem` fails the cycle without writing anything.

use crate::certificate::{self, CertificateError};
use crate::config::ManagedObjects;
use crate::constants::{CERT_KEY, NAMESPACE_OPT_OUT_LABEL, POD_SELECTOR_LABEL};
use crate::controller::client::ObjectClient;
use crate::controller::runner::Reconcile;
use crate::controller::types::ReconcilerError;
use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    WebhookClientConfig,
};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use kube::api::ObjectMeta;
use std::sync::Arc;
use tracing::{debug, info};

pub const CONTROLLER_NAME: &str = "webhook";

/// Where the webhook sends admission requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    /// Name of the MutatingWebhookConfiguration object
    pub configuration_name: String,
    /// Name of the single webhook entry (configuration name with `-` replaced by `.`)
    pub entry_name: String,
    pub service_namespace: String,
    pub service_name: String,
    pub service_path: String,
    pub service_port: i32,
}

impl From<&ManagedObjects> for WebhookTarget {
    fn from(objects: &ManagedObjects) -> Self {
        Self {
            configuration_name: objects.webhook_name.clone(),
            entry_name: objects.webhook_name.replace('-', "."),
            service_namespace: objects.namespace.clone(),
            service_name: objects.service_name.clone(),
            service_path: objects.service_path.clone(),
            service_port: objects.service_port,
        }
    }
}

/// The webhook entries the configuration must contain for the certificate in `secret`
///
/// Fails if `secret` has no `cert.pem` entry.
pub fn desired_webhooks(
    secret: &Secret,
    target: &WebhookTarget,
) -> Result<Vec<MutatingWebhook>, CertificateError> {
    let ca_bundle = certificate::ca_bundle(secret).ok_or(CertificateError::MissingEntry(CERT_KEY))?;

    Ok(vec![MutatingWebhook {
        name: target.entry_name.clone(),
        admission_review_versions: vec!["v1".to_string()],
        client_config: WebhookClientConfig {
            service: Some(ServiceReference {
                namespace: target.service_namespace.clone(),
                name: target.service_name.clone(),
                path: Some(target.service_path.clone()),
                port: Some(target.service_port),
            }),
            ca_bundle: Some(ca_bundle),
            url: None,
        },
        rules: Some(vec![RuleWithOperations {
            operations: Some(vec!["CREATE".to_string()]),
            api_groups: Some(vec![String::new()]),
            api_versions: Some(vec!["v1".to_string()]),
            resources: Some(vec!["pods".to_string()]),
            scope: None,
        }]),
        failure_policy: Some("Fail".to_string()),
        namespace_selector: Some(LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: NAMESPACE_OPT_OUT_LABEL.to_string(),
                operator: "NotIn".to_string(),
                values: Some(vec!["false".to_string()]),
            }]),
            match_labels: None,
        }),
        object_selector: Some(LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: POD_SELECTOR_LABEL.to_string(),
                operator: "Exists".to_string(),
                values: None,
            }]),
            match_labels: None,
        }),
        side_effects: "None".to_string(),
        ..Default::default()
    }])
}

pub struct WebhookReconciler {
    secrets: Arc<dyn ObjectClient<Secret>>,
    webhooks: Arc<dyn ObjectClient<MutatingWebhookConfiguration>>,
    target: WebhookTarget,
    secret_namespace: String,
    secret_name: String,
}

impl std::fmt::Debug for WebhookReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookReconciler")
            .field("target", &self.target)
            .field("secret_namespace", &self.secret_namespace)
            .field("secret_name", &self.secret_name)
            .finish_non_exhaustive()
    }
}

impl WebhookReconciler {
    pub fn new(
        secrets: Arc<dyn ObjectClient<Secret>>,
        webhooks: Arc<dyn ObjectClient<MutatingWebhookConfiguration>>,
        objects: &ManagedObjects,
    ) -> Self {
        Self {
            secrets,
            webhooks,
            target: WebhookTarget::from(objects),
            secret_namespace: objects.namespace.clone(),
            secret_name: objects.secret_name.clone(),
        }
    }
}

#[async_trait]
impl Reconcile for WebhookReconciler {
    fn name(&self) -> &'static str {
        CONTROLLER_NAME
    }

    async fn reconcile(&self) -> Result<(), ReconcilerError> {
        let Some(secret) = self.secrets.get().await? else {
            return Err(ReconcilerError::SecretNotFound {
                namespace: self.secret_namespace.clone(),
                name: self.secret_name.clone(),
            });
        };
        // Never advertise a CA bundle that is not a certificate
        certificate::secret_time_until_expiry(&secret)?;
        let webhooks = desired_webhooks(&secret, &self.target)?;

        match self.webhooks.get().await? {
            None => {
                let configuration = MutatingWebhookConfiguration {
                    metadata: ObjectMeta {
                        name: Some(self.target.configuration_name.clone()),
                        ..Default::default()
                    },
                    webhooks: Some(webhooks),
                };
                self.webhooks.create(&configuration).await?;
                info!(
                    webhook.name = %self.target.configuration_name,
                    "Created MutatingWebhookConfiguration"
                );
            }
            Some(current) => {
                let mut updated = current;
                updated.webhooks = Some(webhooks);
                let replaced = self.webhooks.replace(&updated).await?;
                debug!(
                    webhook.name = %self.target.configuration_name,
                    resource_version = replaced.metadata.resource_version.as_deref().unwrap_or_default(),
                    "Updated MutatingWebhookConfiguration"
                );
            }
        }
        Ok(())
    }
}
