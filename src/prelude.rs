//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use node_ip_webhook::prelude::*;
//! ```

// Config types
pub use crate::config::{CertificatePolicy, ControllerConfig, ManagedObjects, WebhookServerConfig};

// Controller machinery
pub use crate::controller::client::{NamedApi, ObjectClient};
pub use crate::controller::events::object_changes;
pub use crate::controller::runner::{Context, Reconcile};
pub use crate::controller::secret::SecretReconciler;
pub use crate::controller::webhook::WebhookReconciler;
pub use crate::controller::ReconcilerError;

// Common error types
pub use crate::admission::AdmissionError;
pub use crate::certificate::CertificateError;
