//! # Controller
//!
//! The two reconciliation loops and the machinery they share.
//!
//! - `backoff`: Exponential backoff for failed cycles
//! - `events`: Watch streams filtered down to changes of the managed object
//! - `client`: Read and write access to one named object
//! - `runner`: Adapter from a reconciler to the kube-runtime controller
//! - `secret`: Certificate Secret reconciler
//! - `webhook`: MutatingWebhookConfiguration reconciler

pub mod backoff;
pub mod client;
pub mod events;
pub mod runner;
pub mod secret;
pub mod types;
pub mod webhook;

pub use types::ReconcilerError;
