//! # Constants
//!
//! Shared constants used throughout the controllers and the admission server.
//!
//! These values represent the deployment-time defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Namespace where the controllers, the admission server and the certificate Secret live
pub const DEFAULT_NAMESPACE: &str = "node-ip-webhook";

/// Name of the Secret holding the webhook TLS certificate inside the namespace
pub const DEFAULT_SECRET_NAME: &str = "webhook-cert";

/// Name of the cluster-scoped MutatingWebhookConfiguration
pub const DEFAULT_WEBHOOK_NAME: &str = "node-ip-webhook";

/// Name of the Service pointing at the admission server inside the namespace
pub const DEFAULT_SERVICE_NAME: &str = "webhook";

/// Path the API server calls on the admission Service
pub const DEFAULT_SERVICE_PATH: &str = "/mutate";

/// Port the API server calls on the admission Service
pub const DEFAULT_SERVICE_PORT: i32 = 443;

/// Secret entry holding the PEM certificate (also the webhook CA bundle)
pub const CERT_KEY: &str = "cert.pem";

/// Secret entry holding the PEM private key
pub const KEY_KEY: &str = "key.pem";

/// Subject organization of generated certificates
pub const CERT_ORGANIZATION: &str = "Node IP Webhook";

/// Validity of a freshly generated certificate (days)
pub const DEFAULT_CERT_VALIDITY_DAYS: i64 = 365;

/// A certificate expiring within this many days is regenerated
pub const DEFAULT_CERT_EXPIRATION_THRESHOLD_DAYS: i64 = 30;

/// `notBefore` is backdated by this much to tolerate clock drift (seconds)
pub const DEFAULT_CERT_NOT_BEFORE_SKEW_SECS: i64 = 300;

/// Namespaces labelled `inject-node-ip=false` are not sent to the webhook
pub const NAMESPACE_OPT_OUT_LABEL: &str = "inject-node-ip";

/// Only pods carrying this label are sent to the webhook
pub const POD_SELECTOR_LABEL: &str = "serving.knative.dev/service";

/// Pods with a label under this prefix are mutated
pub const INJECT_LABEL_PREFIX: &str = "serving.knative.dev/";

/// Environment variable injected into containers
pub const NODE_IP_ENV_VAR: &str = "NODE_IP";

/// Downward API field the injected variable is sourced from
pub const NODE_IP_FIELD_PATH: &str = "status.hostIP";

/// Sidecar container that never receives the variable
pub const EXCLUDED_CONTAINER: &str = "queue-proxy";

/// Default HTTPS port of the admission server
pub const DEFAULT_WEBHOOK_PORT: u16 = 10250;

/// Default HTTP server port for metrics and health checks
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default interval of the periodic certificate re-check (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Default per-item exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 5;

/// Default per-item exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 1_000_000;

/// Default delay before restarting a watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;
