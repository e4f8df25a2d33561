//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_START_MS, DEFAULT_CERT_EXPIRATION_THRESHOLD_DAYS,
    DEFAULT_CERT_NOT_BEFORE_SKEW_SECS, DEFAULT_CERT_VALIDITY_DAYS, DEFAULT_METRICS_PORT,
    DEFAULT_NAMESPACE, DEFAULT_RESYNC_INTERVAL_SECS, DEFAULT_SECRET_NAME, DEFAULT_SERVICE_NAME,
    DEFAULT_SERVICE_PATH, DEFAULT_SERVICE_PORT, DEFAULT_WATCH_RESTART_DELAY_SECS,
    DEFAULT_WEBHOOK_NAME, DEFAULT_WEBHOOK_PORT,
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::warn;

/// Identities of the objects this deployment manages
///
/// All of them are fixed at deployment time: exactly one Secret and one
/// MutatingWebhookConfiguration, plus the Service the webhook points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedObjects {
    /// Namespace of the Secret and of the Service
    pub namespace: String,
    /// Name of the certificate Secret
    pub secret_name: String,
    /// Name of the cluster-scoped MutatingWebhookConfiguration
    pub webhook_name: String,
    /// Name of the Service in front of the admission server
    pub service_name: String,
    /// Path called on the Service
    pub service_path: String,
    /// Port called on the Service
    pub service_port: i32,
}

impl Default for ManagedObjects {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            secret_name: DEFAULT_SECRET_NAME.to_string(),
            webhook_name: DEFAULT_WEBHOOK_NAME.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_path: DEFAULT_SERVICE_PATH.to_string(),
            service_port: DEFAULT_SERVICE_PORT,
        }
    }
}

impl ManagedObjects {
    /// Hostnames the certificate must be valid for, from the short Service name to the FQDN
    pub fn certificate_hosts(&self) -> Vec<String> {
        let service = &self.service_name;
        let namespace = &self.namespace;
        vec![
            service.clone(),
            format!("{service}.{namespace}"),
            format!("{service}.{namespace}.svc"),
            format!("{service}.{namespace}.svc.cluster.local"),
        ]
    }
}

/// Validity rules for generated certificates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificatePolicy {
    /// How long a new certificate is valid
    pub validity: chrono::Duration,
    /// Remaining validity below which the certificate is regenerated
    pub expiration_threshold: chrono::Duration,
    /// How far `notBefore` is backdated
    pub not_before_skew: chrono::Duration,
}

impl Default for CertificatePolicy {
    fn default() -> Self {
        Self {
            validity: chrono::Duration::days(DEFAULT_CERT_VALIDITY_DAYS),
            expiration_threshold: chrono::Duration::days(DEFAULT_CERT_EXPIRATION_THRESHOLD_DAYS),
            not_before_skew: chrono::Duration::seconds(DEFAULT_CERT_NOT_BEFORE_SKEW_SECS),
        }
    }
}

impl CertificatePolicy {
    /// Validity window `[now - skew, now + validity]` of a certificate issued at `now`
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - self.not_before_skew, now + self.validity)
    }

    /// Whether a freshly issued certificate is outside the rotation threshold
    pub fn is_consistent(&self) -> bool {
        self.expiration_threshold >= chrono::Duration::zero()
            && self.expiration_threshold < self.validity
    }

    /// This policy, or the default validity and threshold if they are inconsistent
    ///
    /// A threshold at or above the validity rotates every certificate on every check.
    #[must_use]
    pub fn validated(self) -> Self {
        if self.is_consistent() {
            return self;
        }
        let defaults = Self::default();
        warn!(
            validity = %self.validity,
            expiration_threshold = %self.expiration_threshold,
            "Certificate expiration threshold must be below the validity, using defaults \
             (validity {}, threshold {})",
            defaults.validity,
            defaults.expiration_threshold
        );
        Self {
            validity: defaults.validity,
            expiration_threshold: defaults.expiration_threshold,
            not_before_skew: self.not_before_skew,
        }
    }
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Objects managed by this deployment
    pub objects: ManagedObjects,
    /// Certificate validity rules
    pub certificate: CertificatePolicy,
    /// Periodic certificate re-check interval (seconds)
    /// The only way an approaching expiry is noticed without a watch event
    pub resync_interval_secs: u64,
    /// Per-item exponential backoff starting value (milliseconds)
    pub backoff_start_ms: u64,
    /// Per-item exponential backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Port of the plain HTTP metrics and health server
    pub metrics_port: u16,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            objects: ManagedObjects::default(),
            certificate: CertificatePolicy::default(),
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            metrics_port: DEFAULT_METRICS_PORT,
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let objects = ManagedObjects {
            namespace: env_var_or_default_str("POD_NAMESPACE", DEFAULT_NAMESPACE),
            secret_name: env_var_or_default_str("SECRET_NAME", DEFAULT_SECRET_NAME),
            webhook_name: env_var_or_default_str("WEBHOOK_NAME", DEFAULT_WEBHOOK_NAME),
            service_name: env_var_or_default_str("SERVICE_NAME", DEFAULT_SERVICE_NAME),
            service_path: DEFAULT_SERVICE_PATH.to_string(),
            service_port: env_var_or_default("SERVICE_PORT", DEFAULT_SERVICE_PORT),
        };
        let defaults = CertificatePolicy::default();
        let certificate = CertificatePolicy {
            validity: days_or(
                env_var_or_default("CERT_VALIDITY_DAYS", DEFAULT_CERT_VALIDITY_DAYS),
                defaults.validity,
            ),
            expiration_threshold: days_or(
                env_var_or_default(
                    "CERT_EXPIRATION_THRESHOLD_DAYS",
                    DEFAULT_CERT_EXPIRATION_THRESHOLD_DAYS,
                ),
                defaults.expiration_threshold,
            ),
            not_before_skew: seconds_or(
                env_var_or_default("CERT_NOT_BEFORE_SKEW_SECS", DEFAULT_CERT_NOT_BEFORE_SKEW_SECS),
                defaults.not_before_skew,
            ),
        };
        Self {
            objects,
            certificate,
            resync_interval_secs: env_var_or_default(
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            ),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
        }
    }

    /// Get periodic resync duration
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Get backoff start duration
    pub fn backoff_start_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_start_ms)
    }

    /// Get backoff max duration
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Admission server configuration
#[derive(Debug, Clone)]
pub struct WebhookServerConfig {
    /// Where the certificate Secret lives
    pub objects: ManagedObjects,
    /// HTTPS port of the admission endpoint
    pub port: u16,
    /// Port of the plain HTTP metrics and health server
    pub metrics_port: u16,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for WebhookServerConfig {
    fn default() -> Self {
        Self {
            objects: ManagedObjects::default(),
            port: DEFAULT_WEBHOOK_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            log_format: "json".to_string(),
        }
    }
}

impl WebhookServerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let controller = ControllerConfig::from_env();
        Self {
            objects: controller.objects,
            port: env_var_or_default("WEBHOOK_PORT", DEFAULT_WEBHOOK_PORT),
            metrics_port: controller.metrics_port,
            watch_restart_delay_secs: controller.watch_restart_delay_secs,
            log_format: controller.log_format,
        }
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// `days` as a duration, `default` if it does not fit
fn days_or(days: i64, default: chrono::Duration) -> chrono::Duration {
    chrono::Duration::try_days(days).unwrap_or(default)
}

fn seconds_or(seconds: i64, default: chrono::Duration) -> chrono::Duration {
    chrono::Duration::try_seconds(seconds).unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_hosts_cover_every_service_form() {
        let objects = ManagedObjects::default();
        assert_eq!(
            objects.certificate_hosts(),
            vec![
                "webhook".to_string(),
                "webhook.node-ip-webhook".to_string(),
                "webhook.node-ip-webhook.svc".to_string(),
                "webhook.node-ip-webhook.svc.cluster.local".to_string(),
            ]
        );
    }

    #[test]
    fn test_certificate_window_is_backdated_by_skew() {
        let policy = CertificatePolicy::default();
        let now = Utc::now();
        let (not_before, not_after) = policy.window(now);
        assert_eq!(now - not_before, chrono::Duration::minutes(5));
        assert_eq!(not_after - now, chrono::Duration::days(365));
    }

    #[test]
    fn test_defaults_match_constants() {
        let config = ControllerConfig::default();
        assert_eq!(config.objects.secret_name, DEFAULT_SECRET_NAME);
        assert_eq!(config.objects.webhook_name, DEFAULT_WEBHOOK_NAME);
        assert_eq!(config.resync_interval(), Duration::from_secs(86_400));
        assert_eq!(config.backoff_start_duration(), Duration::from_millis(5));
        assert_eq!(
            config.certificate.expiration_threshold,
            chrono::Duration::days(30)
        );
    }

    #[test]
    fn test_out_of_range_durations_fall_back_to_default() {
        let default = chrono::Duration::days(30);
        assert_eq!(days_or(i64::MAX, default), default);
        assert_eq!(days_or(i64::MIN, default), default);
        assert_eq!(days_or(7, default), chrono::Duration::days(7));
        assert_eq!(seconds_or(i64::MAX, default), default);
        assert_eq!(seconds_or(60, default), chrono::Duration::minutes(1));
    }

    #[test]
    fn test_threshold_at_or_above_validity_is_replaced_by_defaults() {
        let skew = chrono::Duration::seconds(10);
        for threshold in [10, 30] {
            let policy = CertificatePolicy {
                validity: chrono::Duration::days(10),
                expiration_threshold: chrono::Duration::days(threshold),
                not_before_skew: skew,
            };
            assert!(!policy.is_consistent());

            let validated = policy.validated();
            assert_eq!(validated.validity, chrono::Duration::days(365));
            assert_eq!(validated.expiration_threshold, chrono::Duration::days(30));
            assert_eq!(validated.not_before_skew, skew);
            assert!(validated.is_consistent());
        }
    }

    #[test]
    fn test_consistent_policy_is_kept() {
        let policy = CertificatePolicy {
            validity: chrono::Duration::days(90),
            expiration_threshold: chrono::Duration::days(7),
            not_before_skew: chrono::Duration::zero(),
        };
        assert_eq!(policy.validated(), policy);
        assert!(CertificatePolicy::default().is_consistent());
    }

    #[test]
    fn test_env_var_or_default_falls_back_on_garbage() {
        // Unique key so parallel tests never observe it
        std::env::set_var("NODE_IP_WEBHOOK_TEST_GARBAGE_PORT", "not-a-number");
        let port: u16 = env_var_or_default("NODE_IP_WEBHOOK_TEST_GARBAGE_PORT", 1234);
        assert_eq!(port, 1234);
        std::env::remove_var("NODE_IP_WEBHOOK_TEST_GARBAGE_PORT");
    }
}
