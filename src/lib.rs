//! Node IP Webhook Library
//!
//! Two Kubernetes controllers keep a self-signed serving certificate rotated and a
//! MutatingWebhookConfiguration pointing at it. The admission server serves that
//! certificate and injects the node IP into Knative pods.
//! Tests are included in the module files (e.g., controller/secret.rs).
//!
//! ## Quick Start
//!
//! ```rust
//! use node_ip_webhook::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod admission;
pub mod certificate;
pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
